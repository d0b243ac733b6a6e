//! Crash recovery: a muxer session journals its table state into two side
//! files (a plain-text link file and a binary tables file) so that a file
//! left without a moov can be rebuilt from its orphaned mdat.

pub(crate) mod reader;
pub(crate) mod writer;

use crate::error::Mp4Error;
use crate::mux::{Mux, MuxConfig, MUX_DEFAULT_TABLE_SIZE_MB};
use crate::prelude::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// The only supported recovery format. Version 1 (a full moov snapshot per
/// sync) is rejected.
pub const RECOVERY_VERSION: u32 = 2;

const UUID_SENTINEL: &str = "DON'T CHECK UUID";

/// Maximum rows in one journal record; a bigger count means corruption.
pub(crate) const MAX_ITEM_NUMBER: u32 = 1_000_000;

/// Parsed contents of a link file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkFileInfo {
    pub recovery_version: u32,
    pub data_file: PathBuf,
    pub tables_file: PathBuf,
    pub tables_size_bytes: u64,
    /// Storage UUID, `None` when the sentinel asked for no check.
    pub uuid: Option<String>,
}

/// Write the link file: recovery version, media path, tables path, tables
/// size and the storage-UUID line, one LF-terminated line each.
pub(crate) fn prepare_link_file(
    link_file: &Path,
    tables_file: &Path,
    data_file: &Path,
    tables_size_bytes: u64,
    check_storage_uuid: bool,
) -> Result<()> {
    if check_storage_uuid {
        log::warn!("storage UUID probing is not supported, writing the sentinel");
    }
    let mut file = fs::File::create(link_file)?;
    write!(
        file,
        "{}\n{}\n{}\n{}\n{}\n",
        RECOVERY_VERSION,
        data_file.display(),
        tables_file.display(),
        tables_size_bytes,
        UUID_SENTINEL,
    )?;
    Ok(())
}

/// Parse a link file. Lines may end in LF or CRLF.
pub fn parse_link_file<P: AsRef<Path>>(link_file: P) -> Result<LinkFileInfo> {
    let content = fs::read_to_string(link_file.as_ref())?;
    let mut lines = content.lines().map(|l| l.trim_end_matches('\r'));

    let version: u32 = lines
        .next()
        .and_then(|l| l.trim().parse().ok())
        .ok_or_else(|| Mp4Error::Protocol("missing recovery version".to_string()))?;
    if version != RECOVERY_VERSION {
        return Err(Mp4Error::Unsupported(format!(
            "recovery version {}",
            version
        )));
    }

    let data_file = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| Mp4Error::Protocol("missing media file path".to_string()))?;
    let tables_file = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| Mp4Error::Protocol("missing tables file path".to_string()))?;
    let tables_size_bytes: u64 = lines
        .next()
        .and_then(|l| l.trim().parse().ok())
        .ok_or_else(|| Mp4Error::Protocol("missing tables size".to_string()))?;
    if tables_size_bytes == 0 {
        return Err(Mp4Error::Protocol("invalid tables size".to_string()));
    }

    let uuid = match lines.next() {
        Some(line) if !line.is_empty() && line != UUID_SENTINEL => Some(line.to_string()),
        Some(_) => None,
        None => {
            log::warn!("invalid storage uuid line");
            None
        }
    };

    Ok(LinkFileInfo {
        recovery_version: version,
        data_file: PathBuf::from(data_file),
        tables_file: PathBuf::from(tables_file),
        tables_size_bytes,
        uuid,
    })
}

/// Remove the recovery side files once the session is finished; with
/// `truncate_file` the media file itself is emptied too.
pub fn finalize<P: AsRef<Path>>(link_file: P, truncate_file: bool) -> Result<()> {
    let info = parse_link_file(link_file.as_ref())?;

    if truncate_file {
        if let Err(e) = fs::File::options()
            .write(true)
            .open(&info.data_file)
            .and_then(|f| f.set_len(0))
        {
            log::error!("truncate '{}': {}", info.data_file.display(), e);
        }
    }
    if let Err(e) = fs::remove_file(&info.tables_file) {
        log::error!("remove '{}': {}", info.tables_file.display(), e);
    }
    fs::remove_file(link_file.as_ref())?;
    Ok(())
}

/// Recover a media file from its link file: replay every complete journal
/// record into a fresh muxer, drop the samples whose payload never reached
/// the disk, and close the muxer so the moov gets written. Returns the path
/// of the recovered file.
pub fn recover_file<P: AsRef<Path>>(link_file: P) -> Result<PathBuf> {
    let info = parse_link_file(link_file.as_ref())?;

    if !info.data_file.exists() {
        log::error!("failed to find data file ({})", info.data_file.display());
        return Err(Mp4Error::InvalidArgument("data file not found"));
    }
    if !info.tables_file.exists() {
        log::error!("failed to find tables file ({})", info.tables_file.display());
        return Err(Mp4Error::InvalidArgument("tables file not found"));
    }
    if let Some(uuid) = &info.uuid {
        // No storage probing here: the file has to be checked by the caller
        log::warn!("storage UUID check requested ({}) but not supported, skipping", uuid);
    }
    if fs::metadata(&info.tables_file)?.len() == 0 {
        // Record was probably stopped before any sync
        log::error!(
            "empty tables file ({}): record probably stopped before any sync",
            info.tables_file.display()
        );
        return Err(Mp4Error::Protocol("empty tables file".to_string()));
    }

    log::info!(
        "starting recovery of file {} using tables file {}",
        info.data_file.display(),
        info.tables_file.display()
    );

    let mut tables_size_mbytes = (info.tables_size_bytes / 1024 / 1024) as usize;
    if tables_size_mbytes == 0 {
        tables_size_mbytes = MUX_DEFAULT_TABLE_SIZE_MB;
    }
    let mut config = MuxConfig::new(&info.data_file, 1_000_000);
    config.tables_size_mbytes = tables_size_mbytes;

    let mut mux = Mux::open(config)?;
    reader::fill_from_tables(&info.tables_file, &mut mux)?;
    mux.close()?;

    Ok(info.data_file)
}

/// Like `recover_file`, but rewrites the link file first with the given
/// tables/data paths (for files moved after the crash).
pub fn recover_file_from_paths<P: AsRef<Path>>(
    link_file: P,
    tables_file: P,
    data_file: P,
) -> Result<PathBuf> {
    let info = parse_link_file(link_file.as_ref())?;
    prepare_link_file(
        link_file.as_ref(),
        tables_file.as_ref(),
        data_file.as_ref(),
        info.tables_size_bytes,
        false,
    )?;
    recover_file(link_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("rec.lnk");
        prepare_link_file(
            &link,
            Path::new("/tmp/tables.bin"),
            Path::new("/tmp/media.mp4"),
            2 * 1024 * 1024,
            false,
        )
        .unwrap();

        let info = parse_link_file(&link).unwrap();
        assert_eq!(info.recovery_version, RECOVERY_VERSION);
        assert_eq!(info.data_file, PathBuf::from("/tmp/media.mp4"));
        assert_eq!(info.tables_file, PathBuf::from("/tmp/tables.bin"));
        assert_eq!(info.tables_size_bytes, 2 * 1024 * 1024);
        assert_eq!(info.uuid, None);
    }

    #[test]
    fn link_file_accepts_crlf() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("rec.lnk");
        std::fs::write(
            &link,
            "2\r\n/tmp/a.mp4\r\n/tmp/a.bin\r\n1048576\r\nsome-uuid\r\n",
        )
        .unwrap();
        let info = parse_link_file(&link).unwrap();
        assert_eq!(info.data_file, PathBuf::from("/tmp/a.mp4"));
        assert_eq!(info.uuid, Some("some-uuid".to_string()));
    }

    #[test]
    fn link_file_rejects_version_1() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("rec.lnk");
        std::fs::write(&link, "1\n/tmp/a.mp4\n/tmp/a.bin\n1048576\n").unwrap();
        assert!(matches!(
            parse_link_file(&link),
            Err(Mp4Error::Unsupported(_))
        ));
    }

    #[test]
    fn link_file_rejects_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("rec.lnk");
        std::fs::write(&link, "2\n/tmp/a.mp4\n").unwrap();
        assert!(matches!(parse_link_file(&link), Err(Mp4Error::Protocol(_))));
    }
}
