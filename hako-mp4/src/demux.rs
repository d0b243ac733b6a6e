//! MP4 demuxer: opens a finished file, parses the box tree, builds the
//! per-track sample index and answers random-access queries.

use crate::boxes::reader::read_children;
use crate::boxes::BoxArena;
use crate::error::Mp4Error;
use crate::fourcc::FourCC;
use crate::prelude::Result;
use crate::track::{CoverLocation, CoverType, Track, TrackType, VideoDecoderConfig};
pub use crate::track::TimeCmp;
use crate::{sample_time_to_usec, usec_to_sample_time, MP4_MAC_TO_UNIX_EPOCH_OFFSET};
use byteorder::{BigEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// One chapter of the file: presentation time in microseconds and name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chapter {
    pub time: u64,
    pub name: String,
}

/// File-level state filled in by the box reader.
pub(crate) struct MediaState {
    pub file_size: u64,
    pub timescale: u32,
    pub duration: u64,
    pub creation_time: u64,
    pub modification_time: u64,
    pub tracks: Vec<Track>,
    pub arena: BoxArena,

    pub meta_keys: Vec<String>,
    pub meta_values: Vec<Option<String>>,
    pub udta_entries: Vec<(String, String)>,
    pub udta_location: Option<(String, String)>,
    pub meta_cover: Option<CoverLocation>,
    pub udta_cover: Option<CoverLocation>,

    pub final_metadata: Vec<(String, String)>,
    pub final_cover: Option<CoverLocation>,
    pub chapters: Vec<Chapter>,
}

impl MediaState {
    fn new(file_size: u64) -> Self {
        MediaState {
            file_size,
            timescale: 0,
            duration: 0,
            creation_time: 0,
            modification_time: 0,
            tracks: Vec::new(),
            arena: BoxArena::with_root(file_size),
            meta_keys: Vec::new(),
            meta_values: Vec::new(),
            udta_entries: Vec::new(),
            udta_location: None,
            meta_cover: None,
            udta_cover: None,
            final_metadata: Vec::new(),
            final_cover: None,
            chapters: Vec::new(),
        }
    }

    fn track_index_by_id(&self, track_id: u32) -> Result<usize> {
        self.tracks
            .iter()
            .position(|t| t.id == track_id)
            .ok_or(Mp4Error::TrackNotFound(track_id))
    }
}

/// Media-level information.
#[derive(Clone, Debug, Default)]
pub struct MediaInfo {
    /// Total duration in microseconds.
    pub duration: u64,
    /// Creation time, seconds since the Unix epoch.
    pub creation_time: u64,
    /// Modification time, seconds since the Unix epoch.
    pub modification_time: u64,
    pub track_count: u32,
}

/// Per-track information snapshot.
#[derive(Clone, Debug, Default)]
pub struct TrackInfo {
    pub id: u32,
    pub name: Option<String>,
    pub enabled: bool,
    pub in_movie: bool,
    pub in_preview: bool,
    pub track_type: TrackType,
    pub timescale: u32,
    /// Duration in track-timescale ticks.
    pub duration: u64,
    pub creation_time: u64,
    pub modification_time: u64,
    pub sample_count: u32,
    pub sample_max_size: u32,
    pub video_width: u32,
    pub video_height: u32,
    pub audio_channel_count: u32,
    pub audio_sample_size: u32,
    pub audio_sample_rate: f32,
    pub content_encoding: Option<String>,
    pub mime_format: Option<String>,
    pub has_metadata: bool,
    pub metadata_content_encoding: Option<String>,
    pub metadata_mime_format: Option<String>,
}

/// One delivered sample. A zero `size` signals the end of the track.
#[derive(Clone, Debug, Default)]
pub struct TrackSample {
    pub size: u32,
    pub offset: u64,
    pub metadata_size: u32,
    /// Post-seek ramp-up sample: decode for reference, do not display.
    pub silent: bool,
    pub sync: bool,
    pub dts: u64,
    pub next_dts: u64,
    pub prev_sync_dts: u64,
    pub next_sync_dts: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeekMethod {
    Previous,
    PreviousSync,
    NextSync,
    NearestSync,
}

/// MP4 demuxer over any seekable input.
pub struct Demux<R: Read + Seek> {
    reader: R,
    state: MediaState,
}

impl Demux<BufReader<File>> {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Demux::from_reader(BufReader::new(file))
    }
}

impl<R: Read + Seek> Demux<R> {
    /// Parse the box tree and build the sample indices.
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        if file_size == 0 {
            return Err(Mp4Error::InvalidArgument("empty file"));
        }
        reader.seek(SeekFrom::Start(0))?;

        let mut state = MediaState::new(file_size);
        let root = state.arena.root();
        read_children(&mut reader, &mut state, root, file_size, None)?;

        let mut demux = Demux { reader, state };
        demux.build_tracks()?;
        demux.build_metadata();
        demux.state.arena.log_tree();
        Ok(demux)
    }

    /// Expand the sample tables of every track, resolve track references and
    /// collect the chapter list. A track whose tables do not hold together
    /// is dropped with a warning; its siblings are still reported.
    fn build_tracks(&mut self) -> Result<()> {
        let file_size = self.state.file_size;
        let mut idx = 0;
        while idx < self.state.tracks.len() {
            let track = &mut self.state.tracks[idx];
            let built = track.build_sample_index().and_then(|()| {
                // Every sample must lie inside the file
                for i in 0..track.sample_offsets.len() {
                    let end = track.sample_offsets[i] + u64::from(track.sample_sizes[i]);
                    if end > file_size {
                        return Err(Mp4Error::Protocol(format!(
                            "sample {} ends at {} past the file size {}",
                            i, end, file_size
                        )));
                    }
                }
                Ok(())
            });
            match built {
                Ok(()) => idx += 1,
                Err(e) => {
                    log::warn!(
                        "dropping corrupt track {}: {}",
                        self.state.tracks[idx].id,
                        e
                    );
                    self.state.tracks.remove(idx);
                }
            }
        }

        // Resolve track references (stored by ID, looked up on demand)
        let mut video_count = 0;
        let mut audio_count = 0;
        let mut hint_count = 0;
        let mut metadata_count = 0;
        let mut video_idx = None;
        let mut meta_idx = None;
        let mut chap_idx = None;

        for i in 0..self.state.tracks.len() {
            match self.state.tracks[i].track_type {
                TrackType::Video => {
                    video_count += 1;
                    video_idx = Some(i);
                }
                TrackType::Audio => audio_count += 1,
                TrackType::Hint => hint_count += 1,
                TrackType::Metadata => {
                    metadata_count += 1;
                    meta_idx = Some(i);
                }
                _ => {}
            }

            let ref_type = self.state.tracks[i].reference_type;
            let ref_ids = self.state.tracks[i].reference_track_ids.clone();
            for ref_id in ref_ids {
                let Ok(ref_idx) = self.state.track_index_by_id(ref_id) else {
                    log::warn!("track reference: track ID {} not found", ref_id);
                    continue;
                };
                if ref_type == FourCC::REF_DESCRIPTION
                    && self.state.tracks[i].track_type == TrackType::Metadata
                {
                    let id = self.state.tracks[i].id;
                    self.state.tracks[ref_idx].linked_metadata = Some(id);
                } else if ref_type == FourCC::REF_CHAPTERS
                    && self.state.tracks[ref_idx].track_type == TrackType::Text
                {
                    self.state.tracks[ref_idx].track_type = TrackType::Chapters;
                    chap_idx = Some(ref_idx);
                }
            }
        }

        // Lone video + lone metadata track with no reference: link them anyway
        if video_count == 1
            && metadata_count == 1
            && audio_count == 0
            && hint_count == 0
        {
            let (video_idx, meta_idx) = (video_idx.unwrap(), meta_idx.unwrap());
            if self.state.tracks[video_idx].linked_metadata.is_none() {
                let id = self.state.tracks[meta_idx].id;
                self.state.tracks[video_idx].linked_metadata = Some(id);
            }
        }

        // Chapter names live in the chapter track's sample payloads
        if let Some(chap_idx) = chap_idx {
            let count = self.state.tracks[chap_idx].sample_count as usize;
            for i in 0..count {
                let track = &self.state.tracks[chap_idx];
                let offset = track.sample_offsets[i];
                let size = track.sample_sizes[i];
                let dts = track.sample_dts[i];
                let timescale = track.timescale;

                self.reader.seek(SeekFrom::Start(offset))?;
                let len = self.reader.read_u16::<BigEndian>()?;
                if u32::from(len) + 2 > size {
                    continue;
                }
                let name = crate::utils::take_string(&mut self.reader, len as usize)?;
                let time = sample_time_to_usec(dts, timescale);
                log::debug!(
                    "chapter #{} time={} '{}'",
                    self.state.chapters.len() + 1,
                    time,
                    name
                );
                self.state.chapters.push(Chapter { time, name });
            }
        }

        Ok(())
    }

    /// Merge the three metadata scopes into the final map and pick the cover
    /// location, preferring META storage over UDTA.
    fn build_metadata(&mut self) {
        let state = &mut self.state;
        for (key, value) in state.meta_keys.iter().zip(state.meta_values.iter()) {
            if let Some(value) = value {
                if !key.is_empty() && !value.is_empty() {
                    state.final_metadata.push((key.clone(), value.clone()));
                }
            }
        }
        for (key, value) in &state.udta_entries {
            if !key.is_empty() && !value.is_empty() {
                state.final_metadata.push((key.clone(), value.clone()));
            }
        }
        if let Some((key, value)) = &state.udta_location {
            if !key.is_empty() && !value.is_empty() {
                state.final_metadata.push((key.clone(), value.clone()));
            }
        }
        state.final_cover = state.meta_cover.or(state.udta_cover);
    }

    pub fn media_info(&self) -> MediaInfo {
        MediaInfo {
            duration: sample_time_to_usec(self.state.duration, self.state.timescale),
            creation_time: self
                .state
                .creation_time
                .saturating_sub(MP4_MAC_TO_UNIX_EPOCH_OFFSET),
            modification_time: self
                .state
                .modification_time
                .saturating_sub(MP4_MAC_TO_UNIX_EPOCH_OFFSET),
            track_count: self.state.tracks.len() as u32,
        }
    }

    pub fn track_count(&self) -> usize {
        self.state.tracks.len()
    }

    pub fn track_info(&self, track_idx: usize) -> Result<TrackInfo> {
        let track = self
            .state
            .tracks
            .get(track_idx)
            .ok_or(Mp4Error::InvalidArgument("track index out of range"))?;

        let mut info = TrackInfo {
            id: track.id,
            name: track.name.clone(),
            enabled: track.enabled,
            in_movie: track.in_movie,
            in_preview: track.in_preview,
            track_type: track.track_type,
            timescale: track.timescale,
            duration: track.duration,
            creation_time: track
                .creation_time
                .saturating_sub(MP4_MAC_TO_UNIX_EPOCH_OFFSET),
            modification_time: track
                .modification_time
                .saturating_sub(MP4_MAC_TO_UNIX_EPOCH_OFFSET),
            sample_count: track.sample_count,
            sample_max_size: track.sample_max_size,
            ..TrackInfo::default()
        };
        match track.track_type {
            TrackType::Video => {
                info.video_width = track.video_width;
                info.video_height = track.video_height;
            }
            TrackType::Audio => {
                info.audio_channel_count = track.audio_channel_count;
                info.audio_sample_size = track.audio_sample_size;
                info.audio_sample_rate = track.audio_sample_rate as f32 / 65536.0;
            }
            TrackType::Metadata => {
                info.content_encoding = track.content_encoding.clone();
                info.mime_format = track.mime_format.clone();
            }
            _ => {}
        }
        if let Some(meta_id) = track.linked_metadata {
            info.has_metadata = true;
            if let Ok(meta_idx) = self.state.track_index_by_id(meta_id) {
                let meta = &self.state.tracks[meta_idx];
                info.metadata_content_encoding = meta.content_encoding.clone();
                info.metadata_mime_format = meta.mime_format.clone();
            }
        }
        Ok(info)
    }

    /// Sample sizes of a track, one entry per sample.
    pub fn track_sample_sizes(&self, track_id: u32) -> Result<&[u32]> {
        let idx = self.state.track_index_by_id(track_id)?;
        Ok(&self.state.tracks[idx].sample_sizes)
    }

    /// Absolute file offsets of a track's samples.
    pub fn track_sample_offsets(&self, track_id: u32) -> Result<&[u64]> {
        let idx = self.state.track_index_by_id(track_id)?;
        Ok(&self.state.tracks[idx].sample_offsets)
    }

    /// Decoding times of a track's samples, in track-timescale ticks.
    pub fn track_sample_dts(&self, track_id: u32) -> Result<&[u64]> {
        let idx = self.state.track_index_by_id(track_id)?;
        Ok(&self.state.tracks[idx].sample_dts)
    }

    /// Decoder configuration of a video track.
    pub fn video_decoder_config(&self, track_id: u32) -> Result<VideoDecoderConfig> {
        let idx = self.state.track_index_by_id(track_id)?;
        let track = &self.state.tracks[idx];
        if track.track_type != TrackType::Video {
            return Err(Mp4Error::InvalidArgument("track is not of video type"));
        }
        let codec = track.codec_config().ok_or_else(|| {
            Mp4Error::Unsupported("video codec is neither AVC nor HEVC".to_string())
        })?;
        Ok(VideoDecoderConfig {
            width: track.video_width,
            height: track.video_height,
            codec,
        })
    }

    /// AudioSpecificConfig bytes of an audio track.
    pub fn audio_specific_config(&self, track_id: u32) -> Result<&[u8]> {
        let idx = self.state.track_index_by_id(track_id)?;
        let track = &self.state.tracks[idx];
        if track.track_type != TrackType::Audio {
            return Err(Mp4Error::InvalidArgument("track is not of audio type"));
        }
        track
            .audio_specific_config
            .as_deref()
            .ok_or_else(|| Mp4Error::Protocol("track has no AudioSpecificConfig".to_string()))
    }

    /// Deliver the sample at the track cursor.
    ///
    /// A returned `size` of zero means end of track. When a buffer is passed
    /// and is too small, the call fails with `BufferExhausted` and the cursor
    /// is not advanced.
    pub fn get_track_sample(
        &mut self,
        track_id: u32,
        advance: bool,
        sample_buffer: Option<&mut [u8]>,
        metadata_buffer: Option<&mut [u8]>,
    ) -> Result<TrackSample> {
        let idx = self.state.track_index_by_id(track_id)?;
        let next = self.state.tracks[idx].next_sample;
        if next >= self.state.tracks[idx].sample_count {
            return Ok(TrackSample::default());
        }
        let i = next as usize;

        let mut sample = TrackSample {
            size: self.state.tracks[idx].sample_sizes[i],
            offset: self.state.tracks[idx].sample_offsets[i],
            ..TrackSample::default()
        };

        if let Some(buf) = sample_buffer {
            if (buf.len() as u64) < u64::from(sample.size) {
                return Err(Mp4Error::BufferExhausted {
                    available: buf.len() as u64,
                    needed: u64::from(sample.size),
                });
            }
            self.reader.seek(SeekFrom::Start(sample.offset))?;
            self.reader.read_exact(&mut buf[..sample.size as usize])?;
        }

        // Timed metadata of the linked track at the same index
        if let Some(meta_id) = self.state.tracks[idx].linked_metadata {
            if let Ok(meta_idx) = self.state.track_index_by_id(meta_id) {
                let meta = &self.state.tracks[meta_idx];
                if next < meta.sample_count {
                    let meta_size = meta.sample_sizes[i];
                    let meta_offset = meta.sample_offsets[i];
                    sample.metadata_size = meta_size;
                    if let Some(buf) = metadata_buffer {
                        if (buf.len() as u64) < u64::from(meta_size) {
                            return Err(Mp4Error::BufferExhausted {
                                available: buf.len() as u64,
                                needed: u64::from(meta_size),
                            });
                        }
                        self.reader.seek(SeekFrom::Start(meta_offset))?;
                        self.reader.read_exact(&mut buf[..meta_size as usize])?;
                    }
                }
            }
        }

        let track = &mut self.state.tracks[idx];
        let dts = track.sample_dts[i];
        sample.dts = dts;
        sample.silent = track.pending_seek_time != 0 && dts < track.pending_seek_time;
        if dts >= track.pending_seek_time {
            track.pending_seek_time = 0;
        }
        sample.next_dts = if next + 1 < track.sample_count {
            track.sample_dts[i + 1]
        } else {
            0
        };
        if let Ok(prev) = track.find_sample_by_time(dts, TimeCmp::Lt, true, Some(next)) {
            sample.prev_sync_dts = track.sample_dts[prev as usize];
        }
        if let Ok(nxt) = track.find_sample_by_time(dts, TimeCmp::Gt, true, Some(next)) {
            sample.next_sync_dts = track.sample_dts[nxt as usize];
        }
        sample.sync = track.is_sync_sample(next, None);

        if advance {
            track.next_sample += 1;
        }
        Ok(sample)
    }

    /// Seek every non-chapters track to `time_offset` (microseconds).
    ///
    /// Selects a target sample per the method, positions each track cursor
    /// and arms the silent tagging: samples delivered strictly before the
    /// requested time are flagged silent until the first at-or-after sample.
    pub fn seek(&mut self, time_offset: u64, method: SeekMethod) -> Result<()> {
        for idx in 0..self.state.tracks.len() {
            let track = &self.state.tracks[idx];
            if track.track_type == TrackType::Chapters {
                continue;
            }
            if track.sample_count == 0 || track.duration == 0 {
                continue;
            }

            let ts = usec_to_sample_time(time_offset, track.timescale);
            let n = track.sample_count;

            // Linear estimate, then settle on the last sample at or before ts
            let mut start =
                ((u64::from(n) * ts + track.duration - 1) / track.duration) as u32;
            if start >= n {
                // Past the end: clamp to the last sample
                start = n - 1;
            }
            while start < n - 1 && track.sample_dts[start as usize] < ts {
                start += 1;
            }

            let mut selected = None;
            for i in (0..=start).rev() {
                if track.sample_dts[i as usize] <= ts {
                    selected = Some(self.seek_sample_for(track, i, ts, method)?);
                    break;
                }
            }
            let Some(target) = selected else {
                log::error!("unable to seek in track {}", track.id);
                return Err(Mp4Error::SampleNotFound);
            };

            let pending = if track.is_sync_sample(target, None) {
                0
            } else {
                ts
            };
            let meta_id = track.linked_metadata;
            let target_dts = track.sample_dts[target as usize];
            let timescale = track.timescale;

            let track = &mut self.state.tracks[idx];
            track.next_sample = target;
            track.pending_seek_time = pending;
            log::debug!(
                "seek to {} -> sample #{} time {}",
                time_offset,
                target,
                sample_time_to_usec(target_dts, timescale)
            );

            // Keep the linked metadata track in step when timelines agree
            if let Some(meta_id) = meta_id {
                if let Ok(meta_idx) = self.state.track_index_by_id(meta_id) {
                    let meta = &mut self.state.tracks[meta_idx];
                    if target < meta.sample_count
                        && meta.sample_dts[target as usize] == target_dts
                    {
                        meta.next_sample = target;
                    } else {
                        log::warn!("failed to sync metadata with ref track");
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply the seek method around the reference sample `start` (the last
    /// sample at or before the requested time `ts`).
    fn seek_sample_for(
        &self,
        track: &Track,
        start: u32,
        ts: u64,
        method: SeekMethod,
    ) -> Result<u32> {
        let mut prev_sync = None;
        match method {
            SeekMethod::Previous => Ok(start),
            SeekMethod::PreviousSync => {
                if track.is_sync_sample(start, Some(&mut prev_sync)) {
                    Ok(start)
                } else {
                    prev_sync.ok_or(Mp4Error::SampleNotFound)
                }
            }
            SeekMethod::NextSync => {
                if track.is_sync_sample(start, Some(&mut prev_sync)) {
                    Ok(start)
                } else {
                    track.find_sample_by_time(
                        track.sample_dts[start as usize],
                        TimeCmp::Gt,
                        true,
                        Some(start),
                    )
                }
            }
            SeekMethod::NearestSync => {
                if track.is_sync_sample(start, Some(&mut prev_sync)) {
                    return Ok(start);
                }
                let next_sync = track
                    .find_sample_by_time(
                        track.sample_dts[start as usize],
                        TimeCmp::Gt,
                        true,
                        Some(start),
                    )
                    .ok();
                match (prev_sync, next_sync) {
                    (Some(prev), Some(next)) => {
                        // Distances measured from the requested time
                        let prev_ts = track.sample_dts[prev as usize];
                        let next_ts = track.sample_dts[next as usize];
                        if ts - prev_ts > next_ts - ts {
                            Ok(next)
                        } else {
                            Ok(prev)
                        }
                    }
                    (Some(prev), None) => Ok(prev),
                    (None, Some(next)) => Ok(next),
                    (None, None) => Err(Mp4Error::SampleNotFound),
                }
            }
        }
    }

    /// Step the track cursor back by one sample (lands on the previous sync).
    pub fn seek_to_track_prev_sample(&mut self, track_id: u32) -> Result<()> {
        let idx = self.state.track_index_by_id(track_id)?;
        let track = &self.state.tracks[idx];
        let i = track.next_sample.saturating_sub(2);
        let ts = sample_time_to_usec(track.sample_dts[i as usize], track.timescale);
        self.seek(ts, SeekMethod::PreviousSync)
    }

    /// Step the track cursor forward by one sample.
    pub fn seek_to_track_next_sample(&mut self, track_id: u32) -> Result<()> {
        let idx = self.state.track_index_by_id(track_id)?;
        let track = &self.state.tracks[idx];
        let i = if track.next_sample + 1 < track.sample_count {
            track.next_sample + 1
        } else {
            0
        };
        let ts = sample_time_to_usec(track.sample_dts[i as usize], track.timescale);
        self.seek(ts, SeekMethod::Previous)
    }

    /// Time of the sample before the current one, in microseconds.
    pub fn track_prev_sample_time(&self, track_id: u32) -> Result<u64> {
        let idx = self.state.track_index_by_id(track_id)?;
        let track = &self.state.tracks[idx];
        if track.next_sample < 2 {
            return Err(Mp4Error::SampleNotFound);
        }
        Ok(sample_time_to_usec(
            track.sample_dts[(track.next_sample - 2) as usize],
            track.timescale,
        ))
    }

    /// Time of the sample at the cursor, in microseconds.
    pub fn track_next_sample_time(&self, track_id: u32) -> Result<u64> {
        let idx = self.state.track_index_by_id(track_id)?;
        let track = &self.state.tracks[idx];
        if track.next_sample >= track.sample_count {
            return Err(Mp4Error::SampleNotFound);
        }
        Ok(sample_time_to_usec(
            track.sample_dts[track.next_sample as usize],
            track.timescale,
        ))
    }

    fn track_sample_time(
        &self,
        track_id: u32,
        time: u64,
        sync: bool,
        cmp: TimeCmp,
    ) -> Result<u64> {
        let idx = self.state.track_index_by_id(track_id)?;
        let track = &self.state.tracks[idx];
        let ts = usec_to_sample_time(time, track.timescale);
        let i = track.find_sample_by_time(ts, cmp, sync, None)?;
        Ok(sample_time_to_usec(
            track.sample_dts[i as usize],
            track.timescale,
        ))
    }

    /// Time of the last sample strictly before `time` (µs), optionally sync.
    pub fn track_prev_sample_time_before(
        &self,
        track_id: u32,
        time: u64,
        sync: bool,
    ) -> Result<u64> {
        self.track_sample_time(track_id, time, sync, TimeCmp::Lt)
    }

    /// Time of the first sample strictly after `time` (µs), optionally sync.
    pub fn track_next_sample_time_after(
        &self,
        track_id: u32,
        time: u64,
        sync: bool,
    ) -> Result<u64> {
        self.track_sample_time(track_id, time, sync, TimeCmp::Gt)
    }

    /// Whether sample `sample_idx` (0-based) of a track is a sync sample.
    /// A track without a sync table has only sync samples.
    pub fn is_sync_sample(&self, track_id: u32, sample_idx: u32) -> Result<bool> {
        let idx = self.state.track_index_by_id(track_id)?;
        let track = &self.state.tracks[idx];
        if sample_idx >= track.sample_count {
            return Err(Mp4Error::InvalidArgument("sample index out of range"));
        }
        Ok(track.is_sync_sample(sample_idx, None))
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.state.chapters
    }

    /// File-level metadata as key/value pairs: META entries, then UDTA
    /// entries, then the bare udta location entry.
    pub fn metadata_strings(&self) -> &[(String, String)] {
        &self.state.final_metadata
    }

    /// Static (META) metadata of one track.
    pub fn track_metadata_strings(&self, track_id: u32) -> Result<Vec<(String, String)>> {
        let idx = self.state.track_index_by_id(track_id)?;
        let track = &self.state.tracks[idx];
        Ok(track
            .static_meta_keys
            .iter()
            .zip(track.static_meta_values.iter())
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect())
    }

    /// Cover size and type, filling `buffer` with the bytes when provided.
    /// `Ok(None)` when the file has no cover.
    pub fn metadata_cover(
        &mut self,
        buffer: Option<&mut [u8]>,
    ) -> Result<Option<(u32, CoverType)>> {
        let Some(cover) = self.state.final_cover else {
            return Ok(None);
        };
        if let Some(buf) = buffer {
            if (buf.len() as u64) < u64::from(cover.size) {
                return Err(Mp4Error::BufferExhausted {
                    available: buf.len() as u64,
                    needed: u64::from(cover.size),
                });
            }
            self.reader.seek(SeekFrom::Start(cover.offset))?;
            self.reader.read_exact(&mut buf[..cover.size as usize])?;
        }
        Ok(Some((cover.size, cover.cover_type)))
    }

    /// Cover bytes as an owned vector, `Ok(None)` when absent.
    pub fn metadata_cover_bytes(&mut self) -> Result<Option<(Vec<u8>, CoverType)>> {
        let Some(cover) = self.state.final_cover else {
            return Ok(None);
        };
        let mut buf = vec![0u8; cover.size as usize];
        self.reader.seek(SeekFrom::Start(cover.offset))?;
        self.reader.read_exact(&mut buf)?;
        Ok(Some((buf, cover.cover_type)))
    }

    /// Cover size and type of one track, filling `buffer` with the bytes
    /// when provided. `Ok(None)` when the track has no cover.
    pub fn track_metadata_cover(
        &mut self,
        track_id: u32,
        buffer: Option<&mut [u8]>,
    ) -> Result<Option<(u32, CoverType)>> {
        let idx = self.state.track_index_by_id(track_id)?;
        let Some(cover) = self.state.tracks[idx].cover else {
            return Ok(None);
        };
        if let Some(buf) = buffer {
            if (buf.len() as u64) < u64::from(cover.size) {
                return Err(Mp4Error::BufferExhausted {
                    available: buf.len() as u64,
                    needed: u64::from(cover.size),
                });
            }
            self.reader.seek(SeekFrom::Start(cover.offset))?;
            self.reader.read_exact(&mut buf[..cover.size as usize])?;
        }
        Ok(Some((cover.size, cover.cover_type)))
    }

    /// Cover bytes of one track as an owned vector, `Ok(None)` when absent.
    pub fn track_metadata_cover_bytes(
        &mut self,
        track_id: u32,
    ) -> Result<Option<(Vec<u8>, CoverType)>> {
        let idx = self.state.track_index_by_id(track_id)?;
        let Some(cover) = self.state.tracks[idx].cover else {
            return Ok(None);
        };
        let mut buf = vec![0u8; cover.size as usize];
        self.reader.seek(SeekFrom::Start(cover.offset))?;
        self.reader.read_exact(&mut buf)?;
        Ok(Some((buf, cover.cover_type)))
    }

    /// Track IDs in tree order.
    pub fn track_ids(&self) -> Vec<u32> {
        self.state.tracks.iter().map(|t| t.id).collect()
    }
}
