//! Journal replay: rebuilds a muxer's in-memory state from the tables file,
//! then drops every sample whose payload bytes never reached the media file
//! and truncates the media file to the last coherent byte.

use crate::error::Mp4Error;
use crate::fourcc::FourCC;
use crate::mux::{Mux, MuxAudioConfig, MuxTrackConfig, MuxTrackParams};
use crate::prelude::Result;
use crate::recovery::MAX_ITEM_NUMBER;
use crate::track::{
    CodecConfig, CoverType, HvccInfo, SampleToChunkEntry, TimeToSampleEntry, TrackType,
    VideoDecoderConfig, TRACK_FLAG_ENABLED, TRACK_FLAG_IN_MOVIE, TRACK_FLAG_IN_PREVIEW,
    TRACK_REF_MAX,
};
use crate::MP4_MAC_TO_UNIX_EPOCH_OFFSET;
use byteorder::{BigEndian, ReadBytesExt};
use num_traits::FromPrimitive;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

struct RecordInfo {
    /// Track handle, 0 for file-scope records.
    track_handle: u32,
    box_type: FourCC,
    /// Number of payload rows.
    count: u32,
}

/// Replay every complete record of `tables_file` into `mux`, then truncate.
pub(crate) fn fill_from_tables(tables_file: &Path, mux: &mut Mux) -> Result<()> {
    let file = File::open(tables_file)?;
    let end = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut pos = 0u64;
    while pos + 12 <= end {
        match read_record(&mut reader, mux) {
            Ok(()) => {}
            Err(e) if e.is_torn_tail() => {
                // Crash tore the final record; everything before it holds
                log::warn!("torn record at tables file offset {}, stopping replay", pos);
                break;
            }
            Err(e) => match e {
                Mp4Error::Protocol(_) | Mp4Error::Unsupported(_) | Mp4Error::TrackNotFound(_) => {
                    return Err(e)
                }
                other => {
                    log::warn!("journal record failed ({}), stopping replay", other);
                    break;
                }
            },
        }
        pos = reader.stream_position()?;
    }

    truncate_to_coherent(mux)
}

fn read_record<R: Read>(r: &mut R, mux: &mut Mux) -> Result<()> {
    let info = RecordInfo {
        track_handle: r.read_u32::<BigEndian>()?,
        box_type: FourCC(r.read_u32::<BigEndian>()?),
        count: r.read_u32::<BigEndian>()?,
    };
    if info.count > MAX_ITEM_NUMBER {
        return Err(Mp4Error::Protocol(format!(
            "journal record row count {} is too big",
            info.count
        )));
    }

    match info.box_type {
        FourCC::TRAK => read_track(r, mux, &info),
        FourCC::STSD => read_stsd(r, mux, &info),
        FourCC::STTS => read_stts(r, mux, &info),
        FourCC::STSS => read_stss(r, mux, &info),
        FourCC::STSC => read_stsc(r, mux, &info),
        FourCC::STSZ => read_stsz(r, mux, &info),
        FourCC::STCO | FourCC::CO64 => read_stco(r, mux, &info),
        FourCC::META => read_meta(r, mux, &info),
        FourCC::COVR => read_cover(r, mux),
        other => Err(Mp4Error::Protocol(format!(
            "unknown journal record '{}'",
            other
        ))),
    }
}

fn read_arr<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = r.read_u32::<BigEndian>()?;
    if len > MAX_ITEM_NUMBER {
        return Err(Mp4Error::Protocol(format!(
            "journal array length {} is too big",
            len
        )));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_str<R: Read>(r: &mut R) -> Result<String> {
    Ok(String::from_utf8_lossy(&read_arr(r)?).to_string())
}

fn read_track<R: Read>(r: &mut R, mux: &mut Mux, info: &RecordInfo) -> Result<()> {
    let track_type = TrackType::from_u32(r.read_u32::<BigEndian>()?)
        .ok_or_else(|| Mp4Error::Protocol("invalid track type in journal".to_string()))?;
    let name = read_str(r)?;
    let flags = r.read_u32::<BigEndian>()?;
    let timescale = r.read_u32::<BigEndian>()?;

    // Times are journaled in the MP4 epoch; add_track re-adds the offset
    let creation_time = r.read_u64::<BigEndian>()?;
    let modification_time = r.read_u64::<BigEndian>()?;
    if creation_time < MP4_MAC_TO_UNIX_EPOCH_OFFSET
        || modification_time < MP4_MAC_TO_UNIX_EPOCH_OFFSET
    {
        return Err(Mp4Error::Protocol(
            "invalid creation time in journal".to_string(),
        ));
    }

    if mux.track_by_handle(info.track_handle).is_none() {
        let handle = mux.add_track(&MuxTrackParams {
            track_type,
            name: if name.is_empty() { None } else { Some(name) },
            enabled: flags & TRACK_FLAG_ENABLED != 0,
            in_movie: flags & TRACK_FLAG_IN_MOVIE != 0,
            in_preview: flags & TRACK_FLAG_IN_PREVIEW != 0,
            timescale,
            creation_time: creation_time - MP4_MAC_TO_UNIX_EPOCH_OFFSET,
            modification_time: modification_time - MP4_MAC_TO_UNIX_EPOCH_OFFSET,
        })?;
        if handle != info.track_handle {
            return Err(Mp4Error::Protocol(format!(
                "journal track handles out of order: read {}, assigned {}",
                info.track_handle, handle
            )));
        }
    }

    let ref_count = r.read_u32::<BigEndian>()? as usize;
    if ref_count > TRACK_REF_MAX {
        return Err(Mp4Error::Protocol(format!(
            "journal track reference count {} is too big",
            ref_count
        )));
    }
    let mut refs = Vec::with_capacity(ref_count);
    for _ in 0..ref_count {
        refs.push(r.read_u32::<BigEndian>()?);
    }
    let track = mux.track_by_handle_mut(info.track_handle).unwrap();
    track.refs = refs;
    Ok(())
}

fn read_stsd<R: Read>(r: &mut R, mux: &mut Mux, info: &RecordInfo) -> Result<()> {
    let track = mux
        .track_by_handle(info.track_handle)
        .ok_or(Mp4Error::TrackNotFound(info.track_handle))?;

    let config = match track.track_type {
        TrackType::Video => {
            let codec = FourCC(r.read_u32::<BigEndian>()?);
            let codec = match codec {
                FourCC::AVC1 => CodecConfig::Avc {
                    sps: read_arr(r)?,
                    pps: read_arr(r)?,
                },
                FourCC::HVC1 => {
                    let sps = read_arr(r)?;
                    let pps = read_arr(r)?;
                    let vps = read_arr(r)?;
                    let hvcc_info = HvccInfo {
                        general_profile_space: r.read_u8()?,
                        general_tier_flag: r.read_u8()?,
                        general_profile_idc: r.read_u8()?,
                        general_profile_compatibility_flags: r.read_u32::<BigEndian>()?,
                        general_constraints_indicator_flags: r.read_u64::<BigEndian>()?,
                        general_level_idc: r.read_u8()?,
                        min_spatial_segmentation_idc: r.read_u16::<BigEndian>()?,
                        parallelism_type: r.read_u8()?,
                        chroma_format: r.read_u8()?,
                        bit_depth_luma: r.read_u8()?,
                        bit_depth_chroma: r.read_u8()?,
                        avg_framerate: r.read_u16::<BigEndian>()?,
                        constant_framerate: r.read_u8()?,
                        num_temporal_layers: r.read_u8()?,
                        temporal_id_nested: r.read_u8()?,
                        length_size: r.read_u8()?,
                    };
                    CodecConfig::Hevc {
                        hvcc_info,
                        vps,
                        sps,
                        pps,
                    }
                }
                other => {
                    return Err(Mp4Error::Protocol(format!(
                        "invalid video codec '{}' in journal",
                        other
                    )))
                }
            };
            let width = r.read_u32::<BigEndian>()?;
            let height = r.read_u32::<BigEndian>()?;
            MuxTrackConfig::Video(VideoDecoderConfig {
                width,
                height,
                codec,
            })
        }
        TrackType::Audio => {
            let codec = r.read_u32::<BigEndian>()?;
            if codec != 1 {
                return Err(Mp4Error::Protocol(format!(
                    "invalid audio codec {} in journal",
                    codec
                )));
            }
            MuxTrackConfig::Audio(MuxAudioConfig {
                asc: read_arr(r)?,
                channel_count: r.read_u32::<BigEndian>()?,
                sample_size: r.read_u32::<BigEndian>()?,
                sample_rate: r.read_u32::<BigEndian>()?,
            })
        }
        TrackType::Metadata => {
            let content_encoding = read_str(r)?;
            let mime_type = read_str(r)?;
            MuxTrackConfig::TimedMetadata {
                content_encoding: (!content_encoding.is_empty()).then_some(content_encoding),
                mime_type: (!mime_type.is_empty()).then_some(mime_type),
            }
        }
        TrackType::Chapters => MuxTrackConfig::None,
        other => {
            return Err(Mp4Error::Protocol(format!(
                "invalid track type {} in journal stsd",
                other
            )))
        }
    };

    let track = mux.track_by_handle_mut(info.track_handle).unwrap();
    track.config = config;
    Ok(())
}

fn read_stts<R: Read>(r: &mut R, mux: &mut Mux, info: &RecordInfo) -> Result<()> {
    let mut entries = Vec::with_capacity(info.count as usize);
    for _ in 0..info.count {
        entries.push(TimeToSampleEntry {
            sample_count: r.read_u32::<BigEndian>()?,
            sample_delta: r.read_u32::<BigEndian>()?,
        });
    }
    let track = mux
        .track_by_handle_mut(info.track_handle)
        .ok_or(Mp4Error::TrackNotFound(info.track_handle))?;
    // Informational only: the table is recomputed from the sample rows when
    // the recovered muxer closes
    track.time_to_sample.extend(entries);
    Ok(())
}

fn read_stss<R: Read>(r: &mut R, mux: &mut Mux, info: &RecordInfo) -> Result<()> {
    let mut entries = Vec::with_capacity(info.count as usize);
    for _ in 0..info.count {
        entries.push(r.read_u32::<BigEndian>()?);
    }
    let track = mux
        .track_by_handle_mut(info.track_handle)
        .ok_or(Mp4Error::TrackNotFound(info.track_handle))?;
    track.sync_samples.extend(entries);
    Ok(())
}

fn read_stsc<R: Read>(r: &mut R, mux: &mut Mux, info: &RecordInfo) -> Result<()> {
    let mut entries = Vec::with_capacity(info.count as usize);
    for _ in 0..info.count {
        entries.push(SampleToChunkEntry {
            first_chunk: r.read_u32::<BigEndian>()?,
            samples_per_chunk: r.read_u32::<BigEndian>()?,
            sample_description_index: r.read_u32::<BigEndian>()?,
        });
    }
    let track = mux
        .track_by_handle_mut(info.track_handle)
        .ok_or(Mp4Error::TrackNotFound(info.track_handle))?;
    // The muxer policy keeps a single stsc run, created by add_track;
    // replayed rows refresh it in place
    for entry in entries {
        match track.sample_to_chunk.last_mut() {
            Some(last) => *last = entry,
            None => track.sample_to_chunk.push(entry),
        }
    }
    Ok(())
}

fn read_stsz<R: Read>(r: &mut R, mux: &mut Mux, info: &RecordInfo) -> Result<()> {
    let mut rows = Vec::with_capacity(info.count as usize);
    for _ in 0..info.count {
        let size = r.read_u32::<BigEndian>()?;
        let offset = r.read_u64::<BigEndian>()?;
        let dts = r.read_u64::<BigEndian>()?;
        rows.push((size, offset, dts));
    }
    let track = mux
        .track_by_handle_mut(info.track_handle)
        .ok_or(Mp4Error::TrackNotFound(info.track_handle))?;
    for (size, offset, dts) in rows {
        track.sample_sizes.push(size);
        track.sample_offsets.push(offset);
        track.sample_dts.push(dts);
    }
    Ok(())
}

fn read_stco<R: Read>(r: &mut R, mux: &mut Mux, info: &RecordInfo) -> Result<()> {
    let mut offsets = Vec::with_capacity(info.count as usize);
    for _ in 0..info.count {
        // 64 bits on the wire whether the final box is stco or co64
        offsets.push(r.read_u64::<BigEndian>()?);
    }
    let track = mux
        .track_by_handle_mut(info.track_handle)
        .ok_or(Mp4Error::TrackNotFound(info.track_handle))?;
    track.chunk_offsets.extend(offsets);
    Ok(())
}

fn read_meta<R: Read>(r: &mut R, mux: &mut Mux, info: &RecordInfo) -> Result<()> {
    let _storage = r.read_u32::<BigEndian>()?; // re-derived from the key shape
    let key = read_str(r)?;
    let value = read_str(r)?;
    if info.track_handle == 0 {
        mux.add_file_metadata(&key, &value)
    } else {
        mux.add_track_metadata(info.track_handle, &key, &value)
    }
}

fn read_cover<R: Read>(r: &mut R, mux: &mut Mux) -> Result<()> {
    let cover_type = CoverType::from_u32(r.read_u32::<BigEndian>()?)
        .ok_or_else(|| Mp4Error::Protocol("invalid cover type in journal".to_string()))?;
    let bytes = read_arr(r)?;
    mux.file_cover = Some((cover_type, bytes));
    Ok(())
}

/// Drop samples whose payload lies past the end of the media file, then
/// truncate the media file to the last referenced byte.
fn truncate_to_coherent(mux: &mut Mux) -> Result<()> {
    let end_of_file = mux.file.seek(SeekFrom::End(0))?;
    // Never truncate into the file header: ftyp + free + mdat header
    let mut max_offset = mux.data_offset + 16;

    for track in &mut mux.tracks {
        let count = track.chunk_offsets.len().min(track.sample_sizes.len());
        let mut kept = 0;
        for i in 0..count {
            let sample_end = track.chunk_offsets[i] + u64::from(track.sample_sizes[i]);
            if sample_end > end_of_file {
                break;
            }
            max_offset = max_offset.max(sample_end);
            kept += 1;
        }
        if kept < track.sample_sizes.len() {
            log::warn!(
                "track {}: dropping {} samples past the end of the media file",
                track.handle,
                track.sample_sizes.len() - kept
            );
        }
        track.sample_sizes.truncate(kept);
        track.sample_offsets.truncate(kept);
        track.sample_dts.truncate(kept);
        track.chunk_offsets.truncate(kept);
        track.sync_samples.retain(|&s| s as usize <= kept);
    }

    mux.file.set_len(max_offset)?;
    Ok(())
}
