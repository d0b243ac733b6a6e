//! `hako-mp4` reads and writes ISO base media (MP4) files.
//!
//! Three cooperating subsystems share one data model:
//! - [`Demux`]: parses the box tree of a finished file, expands the sample
//!   tables into a flat per-sample index and answers random-access queries
//!   (sample at time, sync sample navigation, metadata, cover art).
//! - [`Mux`]: accepts samples incrementally, writes their payloads into the
//!   mdat region as they arrive and emits the moov box on sync/close.
//! - [`recovery`]: a journal of the muxer's table state kept in two side
//!   files, from which a file interrupted by a crash is rebuilt into valid
//!   MP4.
//!
//! ## Quick start (demux)
//! - Open a file with [`Demux::from_file`], enumerate tracks with
//!   [`Demux::track_info`], pull samples with [`Demux::get_track_sample`].
//!
//! ## Quick start (mux)
//! - Open with [`Mux::open`], add tracks and their decoder configs, feed
//!   [`MuxSample`]s, then [`Mux::close`].

pub mod error;
pub mod prelude;

mod boxes;
mod demux;
mod fourcc;
mod io;
mod metadata;
mod mux;
pub mod recovery;
mod track;
mod utils;

pub use demux::{Chapter, Demux, MediaInfo, SeekMethod, TimeCmp, TrackInfo, TrackSample};
pub use error::Mp4Error;
pub use fourcc::FourCC;
pub use metadata::{
    META_KEY_COMMENT, META_KEY_COPYRIGHT, META_KEY_COVER, META_KEY_FRIENDLY_NAME,
    META_KEY_LOCATION, META_KEY_MAKER, META_KEY_MEDIA_DATE, META_KEY_MODEL,
    META_KEY_SOFTWARE_VERSION, META_KEY_TITLE, UDTA_KEY_COMMENT, UDTA_KEY_COPYRIGHT,
    UDTA_KEY_FRIENDLY_NAME, UDTA_KEY_LOCATION, UDTA_KEY_MAKER, UDTA_KEY_MEDIA_DATE,
    UDTA_KEY_MODEL, UDTA_KEY_SOFTWARE_VERSION, UDTA_KEY_TITLE,
};
pub use mux::{
    Mux, MuxConfig, MuxSample, MuxScatteredSample, MuxTrackParams, RecoveryConfig,
    MUX_DEFAULT_TABLE_SIZE_MB,
};
pub use track::{
    CodecConfig, CoverType, HvccInfo, SampleToChunkEntry, TimeToSampleEntry, TrackType,
    VideoDecoderConfig,
};

use error::Mp4Error as Error;
use prelude::Result;

/// Offset between the ISO/QuickTime epoch (1904-01-01 UTC) and the Unix
/// epoch, in seconds.
pub const MP4_MAC_TO_UNIX_EPOCH_OFFSET: u64 = 0x7c25_b080;

/// Convert a time in microseconds to timescale ticks, rounding half up.
pub fn usec_to_sample_time(time: u64, timescale: u32) -> u64 {
    (time * u64::from(timescale) + 500_000) / 1_000_000
}

/// Convert timescale ticks to microseconds, rounding half up.
pub fn sample_time_to_usec(time: u64, timescale: u32) -> u64 {
    if timescale == 0 {
        return 0;
    }
    (time * 1_000_000 + u64::from(timescale) / 2) / u64::from(timescale)
}

/// Convert a duration between two timescales, rounding half up.
pub fn convert_timescale(time: u64, src_timescale: u32, dest_timescale: u32) -> u64 {
    if src_timescale == dest_timescale {
        return time;
    }
    if src_timescale == 0 {
        return 0;
    }
    (time * u64::from(dest_timescale) + u64::from(src_timescale) / 2) / u64::from(src_timescale)
}

/// Synthesize an AVC decoder configuration record (the avcC payload) from
/// raw SPS and PPS NAL units.
pub fn generate_avc_decoder_config(sps: &[u8], pps: &[u8]) -> Result<Vec<u8>> {
    if sps.len() < 4 {
        return Err(Error::InvalidArgument("SPS shorter than 4 bytes"));
    }
    if pps.is_empty() {
        return Err(Error::InvalidArgument("empty PPS"));
    }

    let mut avcc = Vec::with_capacity(11 + sps.len() + pps.len());
    avcc.push(0x01); // configurationVersion
    avcc.push(sps[1]); // AVCProfileIndication
    avcc.push(sps[2]); // profile_compatibility
    avcc.push(sps[3]); // AVCLevelIndication
    avcc.push(0xff); // reserved | lengthSizeMinusOne = 3
    avcc.push(0xe1); // reserved | numOfSequenceParameterSets = 1
    avcc.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    avcc.extend_from_slice(sps);
    avcc.push(0x01); // numOfPictureParameterSets
    avcc.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    avcc.extend_from_slice(pps);
    Ok(avcc)
}

/// Build a chapter-track sample from a chapter name: a 2-byte length prefix,
/// the UTF-8 name, and the trailing text-encoding box.
pub fn generate_chapter_sample(name: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + name.len() + 12);
    buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
    // 'encd' sub-box flagging UTF-8 text
    buf.extend_from_slice(&12u32.to_be_bytes());
    buf.extend_from_slice(b"encd");
    buf.extend_from_slice(&0x0000_0100u32.to_be_bytes());
    buf
}
