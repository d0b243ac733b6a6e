use crate::fourcc::FourCC;
use std::string::FromUtf8Error;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Mp4Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("track {0} not found")]
    TrackNotFound(u32),
    #[error("no sample matching the requested time")]
    SampleNotFound,
    #[error("invalid mp4 file: 'ftyp' is not the first box")]
    FtypNotFirst,
    #[error("invalid size in '{box_type}': {available} bytes available, {needed} needed")]
    InvalidSize {
        box_type: FourCC,
        available: u64,
        needed: u64,
    },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("buffer too small: {available} bytes, {needed} needed")]
    BufferExhausted { available: u64, needed: u64 },
    #[error("no space left in the tables region")]
    NoSpace,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("{0} already defined")]
    AlreadyExists(&'static str),
    #[error(transparent)]
    InvalidString(#[from] FromUtf8Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Mp4Error {
    /// End-of-journal condition for the recovery reader: a record torn by the
    /// crash reads as an unexpected EOF, not as a corrupt file.
    pub(crate) fn is_torn_tail(&self) -> bool {
        matches!(
            self,
            Mp4Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof
        )
    }
}
