use crate::error::Mp4Error;
use crate::fourcc::FourCC;
use crate::prelude::Result;
use num_derive::FromPrimitive;

pub const TRACK_FLAG_ENABLED: u32 = 1 << 0;
pub const TRACK_FLAG_IN_MOVIE: u32 = 1 << 1;
pub const TRACK_FLAG_IN_PREVIEW: u32 = 1 << 2;

/// Simultaneous outbound track references kept per track; the excess is
/// warned about and dropped.
pub const TRACK_REF_MAX: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum TrackType {
    Unknown = 0,
    Video,
    Audio,
    Hint,
    Metadata,
    Text,
    Chapters,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackType::Unknown => "unknown",
            TrackType::Video => "video",
            TrackType::Audio => "audio",
            TrackType::Hint => "hint",
            TrackType::Metadata => "metadata",
            TrackType::Text => "text",
            TrackType::Chapters => "chapters",
        }
    }

    pub(crate) fn from_handler(handler: FourCC) -> TrackType {
        match handler {
            FourCC::HANDLER_VIDEO => TrackType::Video,
            FourCC::HANDLER_AUDIO => TrackType::Audio,
            FourCC::HANDLER_HINT => TrackType::Hint,
            FourCC::HANDLER_METADATA => TrackType::Metadata,
            FourCC::HANDLER_TEXT => TrackType::Text,
            _ => TrackType::Unknown,
        }
    }
}

impl std::fmt::Display for TrackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum CoverType {
    Jpeg = 1,
    Png,
    Bmp,
}

impl CoverType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverType::Jpeg => "jpeg",
            CoverType::Png => "png",
            CoverType::Bmp => "bmp",
        }
    }

    /// iTunes 'data' box class byte for this cover type.
    pub(crate) fn data_class(self) -> u32 {
        match self {
            CoverType::Jpeg => crate::metadata::DATA_CLASS_JPEG,
            CoverType::Png => crate::metadata::DATA_CLASS_PNG,
            CoverType::Bmp => crate::metadata::DATA_CLASS_BMP,
        }
    }

    pub(crate) fn from_data_class(class: u32) -> Option<CoverType> {
        match class {
            crate::metadata::DATA_CLASS_JPEG => Some(CoverType::Jpeg),
            crate::metadata::DATA_CLASS_PNG => Some(CoverType::Png),
            crate::metadata::DATA_CLASS_BMP => Some(CoverType::Bmp),
            _ => None,
        }
    }
}

/// Location of a cover image inside the file; bytes are fetched on demand.
#[derive(Copy, Clone, Debug)]
pub(crate) struct CoverLocation {
    pub offset: u64,
    pub size: u32,
    pub cover_type: CoverType,
}

/// Fixed-layout fields of the hvcC decoder configuration record.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HvccInfo {
    pub general_profile_space: u8,
    pub general_tier_flag: u8,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    pub general_constraints_indicator_flags: u64,
    pub general_level_idc: u8,
    pub min_spatial_segmentation_idc: u16,
    pub parallelism_type: u8,
    pub chroma_format: u8,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub avg_framerate: u16,
    pub constant_framerate: u8,
    pub num_temporal_layers: u8,
    pub temporal_id_nested: u8,
    pub length_size: u8,
}

/// Codec-specific configuration, one arm per supported codec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodecConfig {
    Avc {
        sps: Vec<u8>,
        pps: Vec<u8>,
    },
    Hevc {
        hvcc_info: HvccInfo,
        vps: Vec<u8>,
        sps: Vec<u8>,
        pps: Vec<u8>,
    },
    Aac {
        asc: Vec<u8>,
        channel_count: u32,
        sample_size: u32,
        /// Q16.16 fixed point, as stored in the audio sample entry.
        sample_rate: u32,
    },
}

impl CodecConfig {
    pub fn name(&self) -> &'static str {
        match self {
            CodecConfig::Avc { .. } => "H.264/AVC",
            CodecConfig::Hevc { .. } => "H.265/HEVC",
            CodecConfig::Aac { .. } => "AAC-LC",
        }
    }
}

/// Decoder configuration of a video track: dimensions plus the codec arm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoDecoderConfig {
    pub width: u32,
    pub height: u32,
    pub codec: CodecConfig,
}

impl VideoDecoderConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        match &self.codec {
            CodecConfig::Avc { sps, pps } => {
                // avcC profile/level bytes come straight out of the SPS
                if sps.len() < 4 || pps.is_empty() {
                    return Err(Mp4Error::InvalidArgument("incomplete AVC parameter sets"));
                }
            }
            CodecConfig::Hevc { vps, sps, pps, .. } => {
                if vps.is_empty() || sps.len() < 4 || pps.is_empty() {
                    return Err(Mp4Error::InvalidArgument("incomplete HEVC parameter sets"));
                }
            }
            CodecConfig::Aac { .. } => {
                return Err(Mp4Error::InvalidArgument("AAC config on a video track"));
            }
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimeToSampleEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SampleToChunkEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

/// Sample-at-time comparison modes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimeCmp {
    Exact,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// One demuxed track: header fields, the compressed sample tables as read
/// from `stbl`, and the flat per-sample index built from them.
#[derive(Default)]
pub struct Track {
    pub id: u32,
    pub track_type: TrackType,
    pub timescale: u32,
    pub duration: u64,
    pub creation_time: u64,
    pub modification_time: u64,
    pub enabled: bool,
    pub in_movie: bool,
    pub in_preview: bool,
    pub name: Option<String>,

    pub(crate) reference_type: FourCC,
    pub(crate) reference_track_ids: Vec<u32>,

    // Video
    pub(crate) video_width: u32,
    pub(crate) video_height: u32,
    pub(crate) avc_sps: Option<Vec<u8>>,
    pub(crate) avc_pps: Option<Vec<u8>>,
    pub(crate) hevc_vps: Option<Vec<u8>>,
    pub(crate) hevc_sps: Option<Vec<u8>>,
    pub(crate) hevc_pps: Option<Vec<u8>>,
    pub(crate) hvcc_info: Option<HvccInfo>,
    pub(crate) is_avc: bool,
    pub(crate) is_hevc: bool,

    // Audio
    pub(crate) audio_channel_count: u32,
    pub(crate) audio_sample_size: u32,
    pub(crate) audio_sample_rate: u32,
    pub(crate) audio_specific_config: Option<Vec<u8>>,
    pub(crate) is_aac_lc: bool,

    // Timed metadata
    pub(crate) content_encoding: Option<String>,
    pub(crate) mime_format: Option<String>,

    // Static (META) metadata
    pub(crate) static_meta_keys: Vec<String>,
    pub(crate) static_meta_values: Vec<Option<String>>,
    pub(crate) cover: Option<CoverLocation>,

    // Compressed tables
    pub(crate) sample_count: u32,
    pub(crate) chunk_count: u32,
    pub(crate) sample_sizes: Vec<u32>,
    pub(crate) sample_max_size: u32,
    pub(crate) chunk_offsets: Vec<u64>,
    pub(crate) time_to_sample: Vec<TimeToSampleEntry>,
    pub(crate) sample_to_chunk: Vec<SampleToChunkEntry>,
    pub(crate) sync_samples: Option<Vec<u32>>,

    // Flat index
    pub(crate) sample_offsets: Vec<u64>,
    pub(crate) sample_dts: Vec<u64>,

    // Cursor state
    pub(crate) next_sample: u32,
    pub(crate) pending_seek_time: u64,

    // Cross-track link, stored by track ID and resolved by lookup
    pub(crate) linked_metadata: Option<u32>,
}

impl Default for TrackType {
    fn default() -> Self {
        TrackType::Unknown
    }
}

impl Track {
    /// Assembled codec configuration, if the sample description carried one.
    pub fn codec_config(&self) -> Option<CodecConfig> {
        if self.is_avc {
            return Some(CodecConfig::Avc {
                sps: self.avc_sps.clone().unwrap_or_default(),
                pps: self.avc_pps.clone().unwrap_or_default(),
            });
        }
        if self.is_hevc {
            return Some(CodecConfig::Hevc {
                hvcc_info: self.hvcc_info.unwrap_or_default(),
                vps: self.hevc_vps.clone().unwrap_or_default(),
                sps: self.hevc_sps.clone().unwrap_or_default(),
                pps: self.hevc_pps.clone().unwrap_or_default(),
            });
        }
        if self.is_aac_lc {
            return Some(CodecConfig::Aac {
                asc: self.audio_specific_config.clone().unwrap_or_default(),
                channel_count: self.audio_channel_count,
                sample_size: self.audio_sample_size,
                sample_rate: self.audio_sample_rate,
            });
        }
        None
    }

    /// Whether sample `idx` (0-based) is a sync sample. When a sync list is
    /// absent, every sample is sync. `prev_sync` receives the 0-based index
    /// of the closest earlier sync sample when the answer is no.
    pub fn is_sync_sample(&self, idx: u32, prev_sync: Option<&mut Option<u32>>) -> bool {
        let entries = match &self.sync_samples {
            None => return true,
            Some(e) => e,
        };

        let mut last_before = None;
        for &entry in entries {
            let sync_idx = entry - 1;
            if sync_idx == idx {
                return true;
            } else if sync_idx > idx {
                break;
            }
            last_before = Some(sync_idx);
        }
        if let Some(out) = prev_sync {
            *out = last_before;
        }
        false
    }

    /// Scan for the first sample whose decoding time satisfies `cmp` against
    /// `time`, optionally restricted to sync samples. `start` bounds the scan
    /// origin; `None` means the natural end for the scan direction.
    pub fn find_sample_by_time(
        &self,
        time: u64,
        cmp: TimeCmp,
        sync: bool,
        start: Option<u32>,
    ) -> Result<u32> {
        let n = self.sample_count as usize;
        if n == 0 {
            return Err(Mp4Error::SampleNotFound);
        }
        let clamp = |v: usize| v.min(n - 1);

        match cmp {
            TimeCmp::Exact => {
                let start = clamp(start.unwrap_or(0) as usize);
                for i in start..n {
                    if self.sample_dts[i] == time {
                        if !sync || self.is_sync_sample(i as u32, None) {
                            return Ok(i as u32);
                        }
                    } else if self.sample_dts[i] > time {
                        break;
                    }
                }
            }
            TimeCmp::Lt | TimeCmp::LtEq => {
                let start = clamp(start.unwrap_or((n - 1) as u32) as usize);
                for i in (0..=start).rev() {
                    let hit = match cmp {
                        TimeCmp::Lt => self.sample_dts[i] < time,
                        _ => self.sample_dts[i] <= time,
                    };
                    if hit && (!sync || self.is_sync_sample(i as u32, None)) {
                        return Ok(i as u32);
                    }
                }
            }
            TimeCmp::Gt | TimeCmp::GtEq => {
                let start = clamp(start.unwrap_or(0) as usize);
                for i in start..n {
                    let hit = match cmp {
                        TimeCmp::Gt => self.sample_dts[i] > time,
                        _ => self.sample_dts[i] >= time,
                    };
                    if hit && (!sync || self.is_sync_sample(i as u32, None)) {
                        return Ok(i as u32);
                    }
                }
            }
        }

        Err(Mp4Error::SampleNotFound)
    }

    /// Expand the compressed tables into the flat per-sample index.
    ///
    /// `stsc` runs give each chunk its sample count; sample offsets follow as
    /// chunk offset plus the sizes of the earlier samples of the chunk.
    /// `stts` runs unfold into one decoding time per sample. Both expansions
    /// are cross-checked against the `stsz` sample count and any mismatch
    /// rejects the file.
    pub(crate) fn build_sample_index(&mut self) -> Result<()> {
        // Samples per chunk from the stsc runs
        let mut chunk_samples = vec![0u32; self.chunk_count as usize];
        let mut derived: u64 = 0;
        for (i, entry) in self.sample_to_chunk.iter().enumerate() {
            let next_first = self
                .sample_to_chunk
                .get(i + 1)
                .map(|e| e.first_chunk)
                .unwrap_or(self.chunk_count + 1);
            if entry.first_chunk == 0 || next_first < entry.first_chunk {
                return Err(Mp4Error::Protocol(format!(
                    "invalid stsc run ordering at entry {}",
                    i
                )));
            }
            for chunk in entry.first_chunk..next_first {
                let idx = (chunk - 1) as usize;
                if idx < chunk_samples.len() {
                    chunk_samples[idx] = entry.samples_per_chunk;
                    derived += u64::from(entry.samples_per_chunk);
                }
            }
        }
        if derived != u64::from(self.sample_count) {
            return Err(Mp4Error::Protocol(format!(
                "sample count mismatch: stsc derives {}, stsz says {}",
                derived, self.sample_count
            )));
        }

        // Per-sample offsets
        self.sample_offsets = Vec::with_capacity(self.sample_count as usize);
        let mut n = 0usize;
        for (chunk_idx, &count) in chunk_samples.iter().enumerate() {
            let mut offset = self.chunk_offsets[chunk_idx];
            for _ in 0..count {
                self.sample_offsets.push(offset);
                offset += u64::from(self.sample_sizes[n]);
                n += 1;
            }
        }

        // Per-sample decoding times
        let stts_total: u64 = self
            .time_to_sample
            .iter()
            .map(|e| u64::from(e.sample_count))
            .sum();
        if stts_total != u64::from(self.sample_count) {
            return Err(Mp4Error::Protocol(format!(
                "sample count mismatch: stts derives {}, stsz says {}",
                stts_total, self.sample_count
            )));
        }
        self.sample_dts = Vec::with_capacity(self.sample_count as usize);
        let mut ts = 0u64;
        for entry in &self.time_to_sample {
            for _ in 0..entry.sample_count {
                self.sample_dts.push(ts);
                ts += u64::from(entry.sample_delta);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_with_dts(dts: &[u64], sync: Option<&[u32]>) -> Track {
        let mut t = Track::default();
        t.sample_count = dts.len() as u32;
        t.sample_dts = dts.to_vec();
        t.sync_samples = sync.map(|s| s.to_vec());
        t
    }

    #[test]
    fn sync_lookup_without_table_is_always_true() {
        let t = track_with_dts(&[0, 10, 20], None);
        assert!(t.is_sync_sample(1, None));
    }

    #[test]
    fn sync_lookup_reports_previous_sync() {
        let t = track_with_dts(&[0, 10, 20, 30, 40], Some(&[1, 4]));
        let mut prev = None;
        assert!(!t.is_sync_sample(2, Some(&mut prev)));
        assert_eq!(prev, Some(0));
        let mut prev = None;
        assert!(t.is_sync_sample(3, Some(&mut prev)));
        let mut prev = None;
        assert!(!t.is_sync_sample(4, Some(&mut prev)));
        assert_eq!(prev, Some(3));
    }

    #[test]
    fn find_sample_exact() {
        let t = track_with_dts(&[0, 33, 66, 99], None);
        assert_eq!(t.find_sample_by_time(66, TimeCmp::Exact, false, None).unwrap(), 2);
        assert!(t.find_sample_by_time(50, TimeCmp::Exact, false, None).is_err());
    }

    #[test]
    fn find_sample_directional() {
        let t = track_with_dts(&[0, 33, 66, 99, 132], Some(&[1, 4]));
        assert_eq!(t.find_sample_by_time(66, TimeCmp::Lt, false, None).unwrap(), 1);
        assert_eq!(t.find_sample_by_time(66, TimeCmp::LtEq, false, None).unwrap(), 2);
        assert_eq!(t.find_sample_by_time(66, TimeCmp::Gt, false, None).unwrap(), 3);
        assert_eq!(t.find_sample_by_time(66, TimeCmp::GtEq, false, None).unwrap(), 2);
        // Sync-restricted searches land on sync samples only
        assert_eq!(t.find_sample_by_time(66, TimeCmp::Lt, true, None).unwrap(), 0);
        assert_eq!(t.find_sample_by_time(66, TimeCmp::Gt, true, None).unwrap(), 3);
    }

    #[test]
    fn build_index_expands_chunks() {
        let mut t = Track::default();
        t.sample_count = 5;
        t.chunk_count = 2;
        t.sample_sizes = vec![10, 20, 30, 40, 50];
        t.chunk_offsets = vec![1000, 2000];
        t.sample_to_chunk = vec![
            SampleToChunkEntry { first_chunk: 1, samples_per_chunk: 3, sample_description_index: 1 },
            SampleToChunkEntry { first_chunk: 2, samples_per_chunk: 2, sample_description_index: 1 },
        ];
        t.time_to_sample = vec![
            TimeToSampleEntry { sample_count: 4, sample_delta: 100 },
            TimeToSampleEntry { sample_count: 1, sample_delta: 0 },
        ];
        t.build_sample_index().unwrap();
        assert_eq!(t.sample_offsets, vec![1000, 1010, 1030, 2000, 2040]);
        assert_eq!(t.sample_dts, vec![0, 100, 200, 300, 400]);
    }

    #[test]
    fn build_index_rejects_count_mismatch() {
        let mut t = Track::default();
        t.sample_count = 4;
        t.chunk_count = 1;
        t.sample_sizes = vec![1, 1, 1, 1];
        t.chunk_offsets = vec![0];
        t.sample_to_chunk = vec![SampleToChunkEntry {
            first_chunk: 1,
            samples_per_chunk: 3,
            sample_description_index: 1,
        }];
        t.time_to_sample = vec![TimeToSampleEntry { sample_count: 4, sample_delta: 1 }];
        assert!(matches!(t.build_sample_index(), Err(Mp4Error::Protocol(_))));
    }
}
