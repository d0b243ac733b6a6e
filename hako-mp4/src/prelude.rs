pub type Result<I> = std::result::Result<I, crate::error::Mp4Error>;

pub use crate::demux::{
    Chapter, Demux, MediaInfo, SeekMethod, TimeCmp, TrackInfo, TrackSample,
};
pub use crate::error::Mp4Error;
pub use crate::fourcc::FourCC;
pub use crate::mux::{
    Mux, MuxConfig, MuxSample, MuxScatteredSample, MuxTrackParams, RecoveryConfig,
};
pub use crate::track::{CodecConfig, CoverType, HvccInfo, TrackType, VideoDecoderConfig};
