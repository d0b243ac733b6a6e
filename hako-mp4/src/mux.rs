//! MP4 muxer: accepts samples incrementally, accumulates the sample tables
//! in memory, writes payloads straight into the mdat region and emits the
//! moov box on sync/close. With recovery enabled, every sync also appends
//! the table deltas to the journal side files.

use crate::boxes::writer as boxwriter;
use crate::error::Mp4Error;
use crate::io::BoundedWriter;
use crate::metadata::{self, MetaStorage};
use crate::prelude::Result;
use crate::recovery;
use crate::track::{
    CoverType, SampleToChunkEntry, TimeToSampleEntry, TrackType, VideoDecoderConfig,
    TRACK_FLAG_ENABLED, TRACK_FLAG_IN_MOVIE, TRACK_FLAG_IN_PREVIEW, TRACK_REF_MAX,
};
use crate::{convert_timescale, MP4_MAC_TO_UNIX_EPOCH_OFFSET};
use std::fs::{File, OpenOptions};
use std::io::{IoSlice, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const MUX_DEFAULT_TABLE_SIZE_MB: usize = 2;

/// Recovery side files created at open time. Both must be deleted by the
/// caller (via `recovery::finalize`) once the file is closed or recovered.
#[derive(Clone, Debug)]
pub struct RecoveryConfig {
    pub link_file: PathBuf,
    pub tables_file: PathBuf,
    pub check_storage_uuid: bool,
}

#[derive(Clone, Debug)]
pub struct MuxConfig {
    pub path: PathBuf,
    /// Movie timescale in ticks per second. Mandatory.
    pub timescale: u32,
    /// Creation time, seconds since the Unix epoch.
    pub creation_time: u64,
    /// Modification time; when zero the creation time is used.
    pub modification_time: u64,
    /// Size of the region reserved at the start of the file for the moov.
    pub tables_size_mbytes: usize,
    pub recovery: Option<RecoveryConfig>,
}

impl MuxConfig {
    pub fn new<P: AsRef<Path>>(path: P, timescale: u32) -> Self {
        MuxConfig {
            path: path.as_ref().to_path_buf(),
            timescale,
            creation_time: 0,
            modification_time: 0,
            tables_size_mbytes: MUX_DEFAULT_TABLE_SIZE_MB,
            recovery: None,
        }
    }
}

/// Parameters of a new muxed track.
#[derive(Clone, Debug)]
pub struct MuxTrackParams {
    pub track_type: TrackType,
    pub name: Option<String>,
    pub enabled: bool,
    pub in_movie: bool,
    pub in_preview: bool,
    /// Track timescale, mandatory.
    pub timescale: u32,
    /// Creation time, seconds since the Unix epoch.
    pub creation_time: u64,
    /// Modification time; when zero the creation time is used.
    pub modification_time: u64,
}

/// One sample to append.
#[derive(Clone, Copy, Debug)]
pub struct MuxSample<'a> {
    pub buffer: &'a [u8],
    pub sync: bool,
    pub dts: u64,
}

/// A sample given as a scatter-gather list, written with one vectored write.
#[derive(Clone, Copy, Debug)]
pub struct MuxScatteredSample<'a> {
    pub buffers: &'a [&'a [u8]],
    pub sync: bool,
    pub dts: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct MuxMetadata {
    pub key: String,
    pub value: String,
    pub storage: MetaStorage,
}

#[derive(Clone, Debug)]
pub(crate) struct MuxAudioConfig {
    pub asc: Vec<u8>,
    pub channel_count: u32,
    pub sample_size: u32,
    /// Q16.16 fixed point.
    pub sample_rate: u32,
}

/// Type-specific configuration of a muxed track.
#[derive(Clone, Debug)]
pub(crate) enum MuxTrackConfig {
    None,
    Video(VideoDecoderConfig),
    Audio(MuxAudioConfig),
    TimedMetadata {
        content_encoding: Option<String>,
        mime_type: Option<String>,
    },
}

/// Journal write positions: rows before these counts are already on disk.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct JournalCounters {
    pub samples: u32,
    pub chunks: u32,
    pub time_to_sample: u32,
    pub sample_to_chunk: u32,
    pub sync: u32,
}

pub(crate) struct MuxTrack {
    pub handle: u32,
    pub id: u32,
    pub track_type: TrackType,
    pub name: Option<String>,
    pub flags: u32,
    pub timescale: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    /// Duration in track-timescale ticks, recomputed with the stts runs.
    pub duration: u64,
    /// Duration in movie-timescale ticks.
    pub duration_moov: u64,

    pub sample_sizes: Vec<u32>,
    pub sample_dts: Vec<u64>,
    pub sample_offsets: Vec<u64>,
    pub chunk_offsets: Vec<u64>,
    pub time_to_sample: Vec<TimeToSampleEntry>,
    pub sample_to_chunk: Vec<SampleToChunkEntry>,
    pub sync_samples: Vec<u32>,
    pub refs: Vec<u32>,

    pub config: MuxTrackConfig,
    pub metadatas: Vec<MuxMetadata>,
    pub cover: Option<(CoverType, Vec<u8>)>,

    pub info_written: bool,
    pub written: JournalCounters,
    pub meta_write_count: usize,
}

impl MuxTrack {
    pub(crate) fn sample_count(&self) -> u32 {
        self.sample_sizes.len() as u32
    }

    fn enabled(&self) -> bool {
        self.flags & TRACK_FLAG_ENABLED != 0
    }

    /// Moov emission priority; lower sorts first.
    fn priority(&self) -> u32 {
        let type_priority = match self.track_type {
            TrackType::Video => 0,
            TrackType::Audio => 1,
            TrackType::Hint => 2,
            TrackType::Metadata => 3,
            TrackType::Text => 4,
            TrackType::Chapters => 5,
            TrackType::Unknown => 6,
        };
        type_priority * 2 + if self.enabled() { 0 } else { 1 }
    }
}

pub(crate) struct RecoverySession {
    pub link_file: PathBuf,
    pub tables_file: PathBuf,
    pub tables: File,
    pub meta_write_count: usize,
    pub cover_written: bool,
}

pub struct Mux {
    pub(crate) file: File,
    path: PathBuf,
    pub(crate) timescale: u32,
    pub(crate) creation_time: u64,
    pub(crate) modification_time: u64,
    pub(crate) duration: u64,
    /// Offset of the mdat region: everything before it is reserved for
    /// ftyp + moov tables.
    pub(crate) data_offset: u64,
    /// End of the ftyp box; the moov lands here.
    pub(crate) boxes_offset: u64,
    max_tables_size_reached: bool,

    pub(crate) tracks: Vec<MuxTrack>,
    pub(crate) metadatas: Vec<MuxMetadata>,
    pub(crate) file_cover: Option<(CoverType, Vec<u8>)>,
    pub(crate) recovery: Option<RecoverySession>,
}

impl Mux {
    /// Create a muxer on `config.path` and write the initial file layout:
    /// ftyp, a free placeholder covering the reserved tables region, and an
    /// open-ended mdat.
    pub fn open(config: MuxConfig) -> Result<Mux> {
        if config.timescale == 0 {
            return Err(Mp4Error::InvalidArgument("timescale is zero"));
        }
        if config.tables_size_mbytes == 0 {
            return Err(Mp4Error::InvalidArgument("tables size is zero"));
        }
        if config.path.as_os_str().is_empty() {
            return Err(Mp4Error::InvalidArgument("empty path"));
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&config.path)?;

        let modification_time = if config.modification_time != 0 {
            config.modification_time
        } else {
            config.creation_time
        };
        let mut mux = Mux {
            file,
            path: config.path.clone(),
            timescale: config.timescale,
            creation_time: config.creation_time + MP4_MAC_TO_UNIX_EPOCH_OFFSET,
            modification_time: modification_time + MP4_MAC_TO_UNIX_EPOCH_OFFSET,
            duration: 0,
            data_offset: (config.tables_size_mbytes * 1024 * 1024) as u64,
            boxes_offset: 0,
            max_tables_size_reached: false,
            tracks: Vec::new(),
            metadatas: Vec::new(),
            file_cover: None,
            recovery: None,
        };

        mux.boxes_offset = boxwriter::write_ftyp(&mut mux.file)?;
        boxwriter::write_free(&mut mux.file, mux.data_offset - mux.boxes_offset)?;
        mux.file.seek(SeekFrom::Start(mux.data_offset))?;
        boxwriter::write_mdat_header(&mut mux.file, 0)?;

        if let Some(rec) = &config.recovery {
            let tables = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&rec.tables_file)?;
            recovery::prepare_link_file(
                &rec.link_file,
                &rec.tables_file,
                &config.path,
                mux.data_offset,
                rec.check_storage_uuid,
            )?;
            mux.recovery = Some(RecoverySession {
                link_file: rec.link_file.clone(),
                tables_file: rec.tables_file.clone(),
                tables,
                meta_write_count: 0,
                cover_written: false,
            });
        }

        mux.sync_to_disk()?;
        Ok(mux)
    }

    #[cfg(not(windows))]
    fn sync_to_disk(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    #[cfg(windows)]
    fn sync_to_disk(&mut self) -> Result<()> {
        log::warn!("fsync not available, mp4 file not sync'ed on disk");
        Ok(())
    }

    pub(crate) fn track_by_handle(&self, handle: u32) -> Option<&MuxTrack> {
        self.tracks.iter().find(|t| t.handle == handle)
    }

    pub(crate) fn track_by_handle_mut(&mut self, handle: u32) -> Option<&mut MuxTrack> {
        self.tracks.iter_mut().find(|t| t.handle == handle)
    }

    /// Add a track; returns its handle (dense, 1-based).
    pub fn add_track(&mut self, params: &MuxTrackParams) -> Result<u32> {
        if params.timescale == 0 {
            return Err(Mp4Error::InvalidArgument("track timescale is zero"));
        }
        match params.track_type {
            TrackType::Video | TrackType::Audio | TrackType::Metadata | TrackType::Chapters => {}
            _ => return Err(Mp4Error::InvalidArgument("unsupported track type")),
        }

        let mut flags = 0;
        if params.enabled {
            flags |= TRACK_FLAG_ENABLED;
        }
        if params.in_movie {
            flags |= TRACK_FLAG_IN_MOVIE;
        }
        if params.in_preview {
            flags |= TRACK_FLAG_IN_PREVIEW;
        }

        let modification_time = if params.modification_time != 0 {
            params.modification_time
        } else {
            params.creation_time
        };
        let handle = self.tracks.len() as u32 + 1;
        self.tracks.push(MuxTrack {
            handle,
            id: handle,
            track_type: params.track_type,
            name: params.name.clone(),
            flags,
            timescale: params.timescale,
            creation_time: params.creation_time + MP4_MAC_TO_UNIX_EPOCH_OFFSET,
            modification_time: modification_time + MP4_MAC_TO_UNIX_EPOCH_OFFSET,
            duration: 0,
            duration_moov: 0,
            sample_sizes: Vec::new(),
            sample_dts: Vec::new(),
            sample_offsets: Vec::new(),
            chunk_offsets: Vec::new(),
            time_to_sample: Vec::new(),
            // One sample per chunk: a single run covers the whole track
            sample_to_chunk: vec![SampleToChunkEntry {
                first_chunk: 1,
                samples_per_chunk: 1,
                sample_description_index: 1,
            }],
            sync_samples: Vec::new(),
            refs: Vec::new(),
            config: MuxTrackConfig::None,
            metadatas: Vec::new(),
            cover: None,
            info_written: false,
            written: JournalCounters::default(),
            meta_write_count: 0,
        });
        Ok(handle)
    }

    /// Record a reference from `track_handle` to `ref_track_handle`.
    pub fn add_track_ref(&mut self, track_handle: u32, ref_track_handle: u32) -> Result<()> {
        if track_handle == 0 || ref_track_handle == 0 {
            return Err(Mp4Error::InvalidArgument("track handle is zero"));
        }
        if self.track_by_handle(ref_track_handle).is_none() {
            return Err(Mp4Error::TrackNotFound(ref_track_handle));
        }
        let track = self
            .track_by_handle_mut(track_handle)
            .ok_or(Mp4Error::TrackNotFound(track_handle))?;
        if track.refs.contains(&ref_track_handle) {
            return Ok(());
        }
        if track.refs.len() >= TRACK_REF_MAX {
            return Err(Mp4Error::BufferExhausted {
                available: TRACK_REF_MAX as u64,
                needed: track.refs.len() as u64 + 1,
            });
        }
        track.refs.push(ref_track_handle);
        // Reference change means the track record must be journaled again
        track.info_written = false;
        Ok(())
    }

    /// Set the decoder configuration of a video track.
    pub fn set_video_decoder_config(
        &mut self,
        track_handle: u32,
        config: &VideoDecoderConfig,
    ) -> Result<()> {
        config.validate()?;
        let track = self
            .track_by_handle_mut(track_handle)
            .ok_or(Mp4Error::TrackNotFound(track_handle))?;
        if track.track_type != TrackType::Video {
            return Err(Mp4Error::InvalidArgument("track is not of video type"));
        }
        track.config = MuxTrackConfig::Video(config.clone());
        Ok(())
    }

    /// Set the AudioSpecificConfig of an audio track.
    pub fn set_audio_specific_config(
        &mut self,
        track_handle: u32,
        asc: &[u8],
        channel_count: u32,
        sample_size: u32,
        sample_rate: f32,
    ) -> Result<()> {
        if asc.is_empty() {
            return Err(Mp4Error::InvalidArgument("empty audio specific config"));
        }
        let track = self
            .track_by_handle_mut(track_handle)
            .ok_or(Mp4Error::TrackNotFound(track_handle))?;
        if track.track_type != TrackType::Audio {
            return Err(Mp4Error::InvalidArgument("track is not of audio type"));
        }
        track.config = MuxTrackConfig::Audio(MuxAudioConfig {
            asc: asc.to_vec(),
            channel_count,
            sample_size,
            sample_rate: (sample_rate * 65536.0) as u32,
        });
        Ok(())
    }

    /// Set the content encoding and MIME type of a timed-metadata track.
    pub fn set_metadata_mime_type(
        &mut self,
        track_handle: u32,
        content_encoding: Option<&str>,
        mime_type: Option<&str>,
    ) -> Result<()> {
        let track = self
            .track_by_handle_mut(track_handle)
            .ok_or(Mp4Error::TrackNotFound(track_handle))?;
        if track.track_type != TrackType::Metadata && track.track_type != TrackType::Chapters {
            return Err(Mp4Error::InvalidArgument("track has no mime type"));
        }
        track.config = MuxTrackConfig::TimedMetadata {
            content_encoding: content_encoding.map(str::to_string),
            mime_type: mime_type.map(str::to_string),
        };
        Ok(())
    }

    fn add_metadata_internal(
        &mut self,
        key: &str,
        value: &str,
        user: bool,
        track_handle: u32,
    ) -> Result<()> {
        let storage = metadata::storage_for_key(key)
            .ok_or(Mp4Error::InvalidArgument("unrecognized metadata key shape"))?;

        let mut overridden = false;
        {
            let entries = if track_handle > 0 {
                let track = self
                    .track_by_handle_mut(track_handle)
                    .ok_or(Mp4Error::TrackNotFound(track_handle))?;
                &mut track.metadatas
            } else {
                &mut self.metadatas
            };

            match entries.iter_mut().find(|m| m.key == key) {
                Some(existing) => {
                    if !user {
                        // Mirrored write never overrides a caller-set value
                        log::debug!("metadata key {} was already set, skip", key);
                        return Ok(());
                    }
                    log::debug!("metadata key {} was already set, override", key);
                    existing.value = value.to_string();
                    overridden = true;
                }
                None => entries.push(MuxMetadata {
                    key: key.to_string(),
                    value: value.to_string(),
                    storage,
                }),
            }
        }
        if overridden && track_handle > 0 {
            // The journal must carry this track's metadata again
            if let Some(track) = self.track_by_handle_mut(track_handle) {
                track.meta_write_count = 0;
            }
        }

        // A user write also fills the well-known alternate key, if any
        if user {
            if let Some(alt) = metadata::alternate_key(key) {
                self.add_metadata_internal(alt, value, false, track_handle)?;
            }
        }
        Ok(())
    }

    /// Add a file-level metadata entry. Writing a well-known META key also
    /// sets its UDTA counterpart (and vice versa) unless already set.
    pub fn add_file_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        self.add_metadata_internal(key, value, true, 0)
    }

    /// Add a track-level metadata entry.
    pub fn add_track_metadata(&mut self, track_handle: u32, key: &str, value: &str) -> Result<()> {
        if track_handle == 0 || track_handle > self.tracks.len() as u32 {
            return Err(Mp4Error::InvalidArgument("invalid track handle"));
        }
        self.add_metadata_internal(key, value, true, track_handle)
    }

    /// Set the cover image of the file.
    pub fn set_file_cover(&mut self, cover_type: CoverType, cover: &[u8]) -> Result<()> {
        if cover.is_empty() {
            return Err(Mp4Error::InvalidArgument("empty cover"));
        }
        self.file_cover = Some((cover_type, cover.to_vec()));
        if let Some(rec) = &mut self.recovery {
            rec.cover_written = false;
        }
        Ok(())
    }

    /// Set the cover image of a track.
    pub fn set_track_cover(
        &mut self,
        track_handle: u32,
        cover_type: CoverType,
        cover: &[u8],
    ) -> Result<()> {
        if cover.is_empty() {
            return Err(Mp4Error::InvalidArgument("empty cover"));
        }
        let track = self
            .track_by_handle_mut(track_handle)
            .ok_or(Mp4Error::TrackNotFound(track_handle))?;
        track.cover = Some((cover_type, cover.to_vec()));
        Ok(())
    }

    /// Append one sample to a track.
    pub fn add_sample(&mut self, track_handle: u32, sample: &MuxSample<'_>) -> Result<()> {
        self.add_scattered_sample(
            track_handle,
            &MuxScatteredSample {
                buffers: &[sample.buffer],
                sync: sample.sync,
                dts: sample.dts,
            },
        )
    }

    /// Append one sample given as a scatter-gather buffer list. The payload
    /// is written at the current end of the mdat region with a single
    /// vectored write; on a short write the file cursor is restored.
    pub fn add_scattered_sample(
        &mut self,
        track_handle: u32,
        sample: &MuxScatteredSample<'_>,
    ) -> Result<()> {
        let track = self
            .track_by_handle_mut(track_handle)
            .ok_or(Mp4Error::TrackNotFound(track_handle))?;

        // DTS must be monotonic within a track; anything else is a caller bug
        if let Some(&last) = track.sample_dts.last() {
            if sample.dts < last {
                return Err(Mp4Error::Protocol(format!(
                    "non-monotonic dts on track {}: {} after {}",
                    track_handle, sample.dts, last
                )));
            }
        }

        let total_size: u64 = sample.buffers.iter().map(|b| b.len() as u64).sum();
        let track_type = track.track_type;
        let is_sync_video = sample.sync && track_type == TrackType::Video;
        log::debug!(
            "adding a {}sample of size {} at dts {} to track {} (type {})",
            if sample.sync { "sync " } else { "" },
            total_size,
            sample.dts,
            track_handle,
            track_type
        );

        let offset = self.file.stream_position()?;
        if let Err(e) = write_vectored_all(&mut self.file, sample.buffers) {
            // Restore the cursor so a retry does not leave a gap
            let _ = self.file.seek(SeekFrom::Start(offset));
            return Err(e);
        }

        let track = self.track_by_handle_mut(track_handle).unwrap();
        track.sample_sizes.push(total_size as u32);
        track.sample_dts.push(sample.dts);
        track.sample_offsets.push(offset);
        track.chunk_offsets.push(offset);
        if is_sync_video {
            track.sync_samples.push(track.sample_sizes.len() as u32);
        }
        Ok(())
    }

    /// Fold consecutive equal dts deltas into stts runs and recompute the
    /// track durations. A terminal zero-delta run covers the last sample.
    pub(crate) fn compute_time_to_sample(&mut self, track_idx: usize) {
        let mux_timescale = self.timescale;
        let track = &mut self.tracks[track_idx];
        track.time_to_sample.clear();
        track.duration = 0;
        track.duration_moov = 0;

        let n = track.sample_dts.len();
        if n == 0 {
            return;
        }

        let mut prev_diff = u32::MAX;
        let mut prev_dts = track.sample_dts[0];
        for i in 1..n {
            let next_dts = track.sample_dts[i];
            let diff = (next_dts - prev_dts) as u32;
            track.duration += u64::from(diff);
            track.duration_moov +=
                convert_timescale(u64::from(diff), track.timescale, mux_timescale);
            if diff != prev_diff {
                track.time_to_sample.push(TimeToSampleEntry {
                    sample_count: 1,
                    sample_delta: diff,
                });
            } else if let Some(last) = track.time_to_sample.last_mut() {
                last.sample_count += 1;
            }
            prev_diff = diff;
            prev_dts = next_dts;
        }
        // Terminal sentinel: the last sample has no successor to diff against
        track.time_to_sample.push(TimeToSampleEntry {
            sample_count: 1,
            sample_delta: 0,
        });
    }

    /// Sort tracks by emission priority (video first, enabled before
    /// disabled of the same type) and reassign dense track IDs from 1.
    pub(crate) fn sort_tracks(&mut self) {
        self.tracks.sort_by_key(|t| t.priority());
        for (i, track) in self.tracks.iter_mut().enumerate() {
            track.id = i as u32 + 1;
        }
    }

    /// Serialize the moov and patch the mdat size.
    ///
    /// The moov goes into the reserved region when it fits; otherwise the
    /// region is rewritten as a free box and the moov is appended at the end
    /// of the file, which stays valid MP4.
    fn sync_internal(&mut self, allow_boxes_after: bool) -> Result<()> {
        if self.max_tables_size_reached && !allow_boxes_after {
            return Ok(());
        }

        let result = self.sync_tables(allow_boxes_after);

        // Always leave the cursor at the end for the next sample append
        self.file.seek(SeekFrom::End(0))?;
        result
    }

    fn sync_tables(&mut self, allow_boxes_after: bool) -> Result<()> {
        // Patch the mdat size to cover everything written so far
        let end = self.file.seek(SeekFrom::End(0))?;
        let written = end - self.data_offset - 8;
        self.file.seek(SeekFrom::Start(self.data_offset))?;
        boxwriter::write_mdat_header(&mut self.file, written)?;

        self.sort_tracks();

        let mut duration = 0;
        for i in 0..self.tracks.len() {
            self.compute_time_to_sample(i);
            duration = duration.max(self.tracks[i].duration_moov);
        }
        self.duration = duration;

        // Reserve room for the trailing free box header
        let region = (self.data_offset - self.boxes_offset) as usize;
        let mut writer = BoundedWriter::with_limit(region - 8);
        match boxwriter::write_moov(&mut writer, self) {
            Ok(()) => {
                self.file.seek(SeekFrom::Start(self.boxes_offset))?;
                self.file.write_all(writer.as_slice())?;
                boxwriter::write_free(&mut self.file, (region - writer.len()) as u64)?;
            }
            Err(Mp4Error::NoSpace) if allow_boxes_after => {
                // Rewrite the whole reserved region as free, then append the
                // moov at the end of the file
                self.file.seek(SeekFrom::Start(self.boxes_offset))?;
                boxwriter::write_free_header(&mut self.file, region as u64)?;

                let mut writer = BoundedWriter::with_limit(usize::MAX);
                boxwriter::write_moov(&mut writer, self)?;
                self.file.seek(SeekFrom::End(0))?;
                self.file.write_all(writer.as_slice())?;
            }
            Err(Mp4Error::NoSpace) => {
                log::warn!("tables region exhausted, mp4 file not sync'ed on disk");
                self.max_tables_size_reached = true;
                return Err(Mp4Error::NoSpace);
            }
            Err(e) => return Err(e),
        }

        self.sync_to_disk()
    }

    /// Sync the muxer.
    ///
    /// With recovery enabled this appends the new table rows to the journal.
    /// With `write_tables` the moov is also serialized into the final file,
    /// making it readable as-is at this point.
    pub fn sync(&mut self, write_tables: bool) -> Result<()> {
        if self.recovery.is_some() {
            recovery::writer::incremental_sync(self)?;
        }
        if write_tables {
            self.sync_internal(false)?;
        }
        Ok(())
    }

    /// Close the muxer, always attempting the full moov serialization.
    pub fn close(mut self) -> Result<()> {
        self.sync_internal(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log the complete muxer state at info level.
    pub fn dump(&mut self) {
        for i in 0..self.tracks.len() {
            self.compute_time_to_sample(i);
        }
        self.sort_tracks();

        log::info!("muxer dump: {} tracks", self.tracks.len());
        if let Some(rec) = &self.recovery {
            log::info!(
                "- recovery: link={} tables={}",
                rec.link_file.display(),
                rec.tables_file.display()
            );
        }
        for track in &self.tracks {
            log::info!(
                "- track {} (ID={}) of type {}:",
                track.handle,
                track.id,
                track.track_type
            );
            for &r in &track.refs {
                log::info!("  - reference to track {}", r);
            }
            log::info!("  - samples[{}]:", track.sample_sizes.len());
            for i in 0..track.sample_sizes.len() {
                log::info!(
                    "    - size:{:10}, offset:{:10}, dts:{:10}",
                    track.sample_sizes[i],
                    track.sample_offsets[i],
                    track.sample_dts[i]
                );
            }
            log::info!("  - time_to_sample[{}]:", track.time_to_sample.len());
            for entry in &track.time_to_sample {
                log::info!(
                    "    - count:{}, delta:{}",
                    entry.sample_count,
                    entry.sample_delta
                );
            }
            log::info!("  - sync[{}]:", track.sync_samples.len());
            for &s in &track.sync_samples {
                log::info!("    - sample:{}", s);
            }
        }
        for meta in &self.metadatas {
            log::info!(
                "- metadata {} :: {} [{}]",
                meta.key,
                meta.value,
                meta.storage.as_str()
            );
        }
    }
}

/// Write all buffers with vectored writes, retrying on partial progress.
fn write_vectored_all(file: &mut File, buffers: &[&[u8]]) -> Result<()> {
    let mut slices: Vec<IoSlice<'_>> = buffers.iter().map(|b| IoSlice::new(b)).collect();
    let mut slices = &mut slices[..];
    while !slices.is_empty() {
        let written = file.write_vectored(slices)?;
        if written == 0 {
            return Err(Mp4Error::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "vectored write made no progress",
            )));
        }
        IoSlice::advance_slices(&mut slices, written);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn empty_video_track() -> MuxTrack {
        MuxTrack {
            handle: 1,
            id: 1,
            track_type: TrackType::Video,
            name: None,
            flags: TRACK_FLAG_ENABLED,
            timescale: 1000,
            creation_time: 0,
            modification_time: 0,
            duration: 0,
            duration_moov: 0,
            sample_sizes: Vec::new(),
            sample_dts: Vec::new(),
            sample_offsets: Vec::new(),
            chunk_offsets: Vec::new(),
            time_to_sample: Vec::new(),
            sample_to_chunk: Vec::new(),
            sync_samples: Vec::new(),
            refs: Vec::new(),
            config: MuxTrackConfig::None,
            metadatas: Vec::new(),
            cover: None,
            info_written: false,
            written: JournalCounters::default(),
            meta_write_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_with_dts(dts: &[u64]) -> MuxTrack {
        let mut track = test_support::empty_video_track();
        track.sample_sizes = vec![1; dts.len()];
        track.sample_dts = dts.to_vec();
        track.sample_offsets = vec![0; dts.len()];
        track.chunk_offsets = vec![0; dts.len()];
        track
    }

    fn mux_with_track(track: MuxTrack) -> Mux {
        let dir = tempfile::tempdir().unwrap();
        let mut mux = Mux::open(MuxConfig::new(dir.path().join("t.mp4"), 1000)).unwrap();
        mux.tracks.push(track);
        mux
    }

    #[test]
    fn stts_runs_fold_equal_deltas() {
        let mut mux = mux_with_track(track_with_dts(&[0, 10, 20, 30, 45, 60]));
        mux.compute_time_to_sample(0);
        let track = &mux.tracks[0];
        assert_eq!(
            track.time_to_sample,
            vec![
                TimeToSampleEntry { sample_count: 3, sample_delta: 10 },
                TimeToSampleEntry { sample_count: 2, sample_delta: 15 },
                TimeToSampleEntry { sample_count: 1, sample_delta: 0 },
            ]
        );
        assert_eq!(track.duration, 60);
    }

    #[test]
    fn stts_of_single_sample_is_the_sentinel() {
        let mut mux = mux_with_track(track_with_dts(&[0]));
        mux.compute_time_to_sample(0);
        assert_eq!(
            mux.tracks[0].time_to_sample,
            vec![TimeToSampleEntry { sample_count: 1, sample_delta: 0 }]
        );
    }

    #[test]
    fn track_sort_puts_video_first_and_enabled_before_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut mux = Mux::open(MuxConfig::new(dir.path().join("t.mp4"), 1000)).unwrap();
        let make = |tt, enabled| MuxTrackParams {
            track_type: tt,
            name: None,
            enabled,
            in_movie: true,
            in_preview: true,
            timescale: 1000,
            creation_time: 0,
            modification_time: 0,
        };
        let meta = mux.add_track(&make(TrackType::Metadata, true)).unwrap();
        let video_off = mux.add_track(&make(TrackType::Video, false)).unwrap();
        let video_on = mux.add_track(&make(TrackType::Video, true)).unwrap();
        let audio = mux.add_track(&make(TrackType::Audio, true)).unwrap();
        mux.sort_tracks();

        let order: Vec<u32> = mux.tracks.iter().map(|t| t.handle).collect();
        assert_eq!(order, vec![video_on, video_off, audio, meta]);
        let ids: Vec<u32> = mux.tracks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn non_monotonic_dts_is_rejected(){
        let dir = tempfile::tempdir().unwrap();
        let mut mux = Mux::open(MuxConfig::new(dir.path().join("t.mp4"), 1000)).unwrap();
        let handle = mux
            .add_track(&MuxTrackParams {
                track_type: TrackType::Video,
                name: None,
                enabled: true,
                in_movie: true,
                in_preview: true,
                timescale: 1000,
                creation_time: 0,
                modification_time: 0,
            })
            .unwrap();
        let data = [0u8; 8];
        mux.add_sample(handle, &MuxSample { buffer: &data, sync: true, dts: 100 })
            .unwrap();
        let err = mux
            .add_sample(handle, &MuxSample { buffer: &data, sync: false, dts: 50 })
            .unwrap_err();
        assert!(matches!(err, Mp4Error::Protocol(_)));
    }
}
