//! Incremental journal writer.
//!
//! On every sync, the rows added since the previous sync are appended to the
//! tables file. Each record is `track_handle:u32 box_type:u32 count:u32`
//! followed by a payload shaped by the box type; all integers big-endian.
//! Records never rewrite earlier rows, so a torn tail only costs the rows of
//! the final sync.

use crate::fourcc::FourCC;
use crate::mux::{Mux, MuxMetadata, MuxTrack, MuxTrackConfig, RecoverySession};
use crate::prelude::Result;
use crate::track::CodecConfig;
use byteorder::{BigEndian, WriteBytesExt};
use std::fs::File;
use std::io::Write;

pub(crate) fn incremental_sync(mux: &mut Mux) -> Result<()> {
    let Some(mut session) = mux.recovery.take() else {
        return Ok(());
    };
    let result = sync_records(mux, &mut session);
    mux.recovery = Some(session);
    result
}

fn sync_records(mux: &mut Mux, session: &mut RecoverySession) -> Result<()> {
    for track in &mut mux.tracks {
        // Track descriptor and sample description are journaled once
        if !track.info_written {
            write_track(&mut session.tables, track)?;
            write_stsd(&mut session.tables, track)?;
            track.info_written = true;
        }

        if track.sample_count() == 0 {
            continue;
        }

        write_stts_delta(&mut session.tables, track)?;
        write_stss_delta(&mut session.tables, track)?;
        write_stsc_delta(&mut session.tables, track)?;
        write_stsz_delta(&mut session.tables, track)?;
        write_stco_delta(&mut session.tables, track)?;

        for i in track.meta_write_count..track.metadatas.len() {
            let meta = track.metadatas[i].clone();
            write_meta(&mut session.tables, track.handle, &meta)?;
        }
        track.meta_write_count = track.metadatas.len();
    }

    for i in session.meta_write_count..mux.metadatas.len() {
        write_meta(&mut session.tables, 0, &mux.metadatas[i])?;
    }
    session.meta_write_count = mux.metadatas.len();

    if !session.cover_written {
        if let Some((cover_type, bytes)) = &mux.file_cover {
            write_record_header(&mut session.tables, 0, FourCC::COVR, 1)?;
            session.tables.write_u32::<BigEndian>(*cover_type as u32)?;
            write_arr(&mut session.tables, bytes)?;
            session.cover_written = true;
        }
    }

    session.tables.sync_all()?;
    Ok(())
}

fn write_record_header(f: &mut File, track_handle: u32, box_type: FourCC, count: u32) -> Result<()> {
    f.write_u32::<BigEndian>(track_handle)?;
    f.write_u32::<BigEndian>(box_type.0)?;
    f.write_u32::<BigEndian>(count)?;
    Ok(())
}

fn write_arr(f: &mut File, data: &[u8]) -> Result<()> {
    f.write_u32::<BigEndian>(data.len() as u32)?;
    f.write_all(data)?;
    Ok(())
}

fn write_track(f: &mut File, track: &MuxTrack) -> Result<()> {
    write_record_header(f, track.handle, FourCC::TRAK, 1)?;
    f.write_u32::<BigEndian>(track.track_type as u32)?;
    write_arr(f, track.name.as_deref().unwrap_or("").as_bytes())?;
    f.write_u32::<BigEndian>(track.flags)?;
    f.write_u32::<BigEndian>(track.timescale)?;
    f.write_u64::<BigEndian>(track.creation_time)?;
    f.write_u64::<BigEndian>(track.modification_time)?;
    f.write_u32::<BigEndian>(track.refs.len() as u32)?;
    for &handle in &track.refs {
        f.write_u32::<BigEndian>(handle)?;
    }
    Ok(())
}

fn write_stsd(f: &mut File, track: &MuxTrack) -> Result<()> {
    write_record_header(f, track.handle, FourCC::STSD, 1)?;
    match &track.config {
        MuxTrackConfig::Video(video) => {
            match &video.codec {
                CodecConfig::Avc { sps, pps } => {
                    f.write_u32::<BigEndian>(FourCC::AVC1.0)?;
                    write_arr(f, sps)?;
                    write_arr(f, pps)?;
                }
                CodecConfig::Hevc {
                    hvcc_info,
                    vps,
                    sps,
                    pps,
                } => {
                    f.write_u32::<BigEndian>(FourCC::HVC1.0)?;
                    write_arr(f, sps)?;
                    write_arr(f, pps)?;
                    write_arr(f, vps)?;
                    f.write_u8(hvcc_info.general_profile_space)?;
                    f.write_u8(hvcc_info.general_tier_flag)?;
                    f.write_u8(hvcc_info.general_profile_idc)?;
                    f.write_u32::<BigEndian>(hvcc_info.general_profile_compatibility_flags)?;
                    f.write_u64::<BigEndian>(hvcc_info.general_constraints_indicator_flags)?;
                    f.write_u8(hvcc_info.general_level_idc)?;
                    f.write_u16::<BigEndian>(hvcc_info.min_spatial_segmentation_idc)?;
                    f.write_u8(hvcc_info.parallelism_type)?;
                    f.write_u8(hvcc_info.chroma_format)?;
                    f.write_u8(hvcc_info.bit_depth_luma)?;
                    f.write_u8(hvcc_info.bit_depth_chroma)?;
                    f.write_u16::<BigEndian>(hvcc_info.avg_framerate)?;
                    f.write_u8(hvcc_info.constant_framerate)?;
                    f.write_u8(hvcc_info.num_temporal_layers)?;
                    f.write_u8(hvcc_info.temporal_id_nested)?;
                    f.write_u8(hvcc_info.length_size)?;
                }
                CodecConfig::Aac { .. } => {}
            }
            f.write_u32::<BigEndian>(video.width)?;
            f.write_u32::<BigEndian>(video.height)?;
        }
        MuxTrackConfig::Audio(audio) => {
            f.write_u32::<BigEndian>(1)?; // audio codec: AAC-LC
            write_arr(f, &audio.asc)?;
            f.write_u32::<BigEndian>(audio.channel_count)?;
            f.write_u32::<BigEndian>(audio.sample_size)?;
            f.write_u32::<BigEndian>(audio.sample_rate)?;
        }
        MuxTrackConfig::TimedMetadata {
            content_encoding,
            mime_type,
        } => {
            write_arr(f, content_encoding.as_deref().unwrap_or("").as_bytes())?;
            write_arr(f, mime_type.as_deref().unwrap_or("").as_bytes())?;
        }
        MuxTrackConfig::None => {}
    }
    Ok(())
}

fn write_stts_delta(f: &mut File, track: &mut MuxTrack) -> Result<()> {
    // The stts table is recomputed on full syncs; never report more rows
    // than currently exist
    let done = (track.written.time_to_sample as usize).min(track.time_to_sample.len());
    let rows = &track.time_to_sample[done..];
    write_record_header(f, track.handle, FourCC::STTS, rows.len() as u32)?;
    for entry in rows {
        f.write_u32::<BigEndian>(entry.sample_count)?;
        f.write_u32::<BigEndian>(entry.sample_delta)?;
    }
    track.written.time_to_sample = track.time_to_sample.len() as u32;
    Ok(())
}

fn write_stss_delta(f: &mut File, track: &mut MuxTrack) -> Result<()> {
    let done = track.written.sync as usize;
    let rows = &track.sync_samples[done..];
    write_record_header(f, track.handle, FourCC::STSS, rows.len() as u32)?;
    for &entry in rows {
        f.write_u32::<BigEndian>(entry)?;
    }
    track.written.sync = track.sync_samples.len() as u32;
    Ok(())
}

fn write_stsc_delta(f: &mut File, track: &mut MuxTrack) -> Result<()> {
    let done = track.written.sample_to_chunk as usize;
    let rows = &track.sample_to_chunk[done..];
    write_record_header(f, track.handle, FourCC::STSC, rows.len() as u32)?;
    for entry in rows {
        f.write_u32::<BigEndian>(entry.first_chunk)?;
        f.write_u32::<BigEndian>(entry.samples_per_chunk)?;
        f.write_u32::<BigEndian>(entry.sample_description_index)?;
    }
    track.written.sample_to_chunk = track.sample_to_chunk.len() as u32;
    Ok(())
}

/// Sample rows carry size, offset and decoding time together so that the
/// tables can be rebuilt without the media file's help.
fn write_stsz_delta(f: &mut File, track: &mut MuxTrack) -> Result<()> {
    let done = track.written.samples as usize;
    let count = track.sample_sizes.len() - done;
    write_record_header(f, track.handle, FourCC::STSZ, count as u32)?;
    for i in done..track.sample_sizes.len() {
        f.write_u32::<BigEndian>(track.sample_sizes[i])?;
        f.write_u64::<BigEndian>(track.sample_offsets[i])?;
        f.write_u64::<BigEndian>(track.sample_dts[i])?;
    }
    track.written.samples = track.sample_sizes.len() as u32;
    Ok(())
}

fn write_stco_delta(f: &mut File, track: &mut MuxTrack) -> Result<()> {
    let done = track.written.chunks as usize;
    let rows = &track.chunk_offsets[done..];
    // Offsets are stored as 64 bits whether the final box is stco or co64
    write_record_header(f, track.handle, FourCC::STCO, rows.len() as u32)?;
    for &offset in rows {
        f.write_u64::<BigEndian>(offset)?;
    }
    track.written.chunks = track.chunk_offsets.len() as u32;
    Ok(())
}

fn write_meta(f: &mut File, track_handle: u32, meta: &MuxMetadata) -> Result<()> {
    write_record_header(f, track_handle, FourCC::META, 1)?;
    f.write_u32::<BigEndian>(meta.storage as u32)?;
    write_arr(f, meta.key.as_bytes())?;
    write_arr(f, meta.value.as_bytes())?;
    Ok(())
}
