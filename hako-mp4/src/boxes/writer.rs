//! Box writers for the muxer.
//!
//! The moov subtree is serialized into a bounded in-memory buffer and lands
//! either in the reserved region at the start of the file or, when it no
//! longer fits there, at the end of the file. The ftyp/free/mdat writers go
//! straight to the file during layout.

use crate::boxes::stsd::descriptor_size_length;
use crate::error::Mp4Error;
use crate::fourcc::FourCC;
use crate::io::BoundedWriter;
use crate::metadata::{self, MetaStorage};
use crate::mux::{Mux, MuxAudioConfig, MuxMetadata, MuxTrack, MuxTrackConfig};
use crate::prelude::Result;
use crate::track::{CodecConfig, CoverType, TrackType};
use byteorder::{BigEndian, WriteBytesExt};
use std::fs::File;
use std::io::Write;

const H265_NALU_TYPE_VPS: u8 = 32;
const H265_NALU_TYPE_SPS: u8 = 33;
const H265_NALU_TYPE_PPS: u8 = 34;

/// ISO/IEC 14496-12 - chap. 4.3 - File Type Box. Returns its size.
pub(crate) fn write_ftyp(file: &mut File) -> Result<u64> {
    file.write_u32::<BigEndian>(8 * 4)?;
    file.write_u32::<BigEndian>(FourCC::FTYP.0)?;
    file.write_u32::<BigEndian>(FourCC::ISOM.0)?; // major_brand
    file.write_u32::<BigEndian>(2)?; // minor_version
    for brand in [FourCC::ISOM, FourCC::ISO2, FourCC::MP41, FourCC::AVC1] {
        file.write_u32::<BigEndian>(brand.0)?;
    }
    Ok(8 * 4)
}

/// Free box header only, leaving the payload bytes as they are.
pub(crate) fn write_free_header(file: &mut File, len: u64) -> Result<()> {
    if !(8..=u64::from(u32::MAX)).contains(&len) {
        return Err(Mp4Error::InvalidArgument("free box size out of range"));
    }
    file.write_u32::<BigEndian>(len as u32)?;
    file.write_u32::<BigEndian>(FourCC::FREE.0)?;
    Ok(())
}

/// Full free box of `len` bytes, zero filled.
pub(crate) fn write_free(file: &mut File, len: u64) -> Result<()> {
    write_free_header(file, len)?;
    let zeros = [0u8; 4096];
    let mut left = len - 8;
    while left > 0 {
        let n = left.min(zeros.len() as u64) as usize;
        file.write_all(&zeros[..n])?;
        left -= n as u64;
    }
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.1.1 - Media Data Box header.
///
/// `size` is the mdat box size including its own 8-byte header; zero keeps
/// the open-ended form used while recording. The 8-byte free box written in
/// front reserves room to widen the size field to 64 bits without moving
/// payload bytes once the mdat exceeds 4 GiB.
pub(crate) fn write_mdat_header(file: &mut File, size: u64) -> Result<()> {
    if size <= u64::from(u32::MAX) {
        write_free_header(file, 8)?;
        file.write_u32::<BigEndian>(size as u32)?;
        file.write_u32::<BigEndian>(FourCC::MDAT.0)?;
    } else {
        // Consume the reserved free box: the wide mdat starts 8 bytes early
        let size = size + 8;
        file.write_u32::<BigEndian>(1)?;
        file.write_u32::<BigEndian>(FourCC::MDAT.0)?;
        file.write_u64::<BigEndian>(size)?;
    }
    Ok(())
}

/// Serialize the whole moov subtree.
pub(crate) fn write_moov(w: &mut BoundedWriter, mux: &Mux) -> Result<()> {
    let moov = w.begin_box(FourCC::MOOV)?;
    write_mvhd(w, mux)?;
    for track in &mux.tracks {
        // Skip empty tracks
        if track.sample_count() == 0 {
            continue;
        }
        write_trak(w, mux, track)?;
    }
    write_metadata_scopes(w, &mux.metadatas, mux.file_cover.as_ref())?;
    w.end_box(moov);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.2.2 - Movie Header Box (version 1).
fn write_mvhd(w: &mut BoundedWriter, mux: &Mux) -> Result<()> {
    let start = w.begin_box(FourCC::MVHD)?;
    w.write_u32(0x0100_0000)?; // version 1, flags 0
    w.write_u64(mux.creation_time)?;
    w.write_u64(mux.modification_time)?;
    w.write_u32(mux.timescale)?;
    w.write_u64(mux.duration)?;
    w.write_u32(0x0001_0000)?; // rate, Q16.16
    w.write_u16(0x0100)?; // volume, Q8.8
    w.pad(10)?; // reserved
    write_unity_matrix(w)?;
    w.pad(24)?; // pre_defined
    w.write_u32(mux.tracks.len() as u32 + 1)?; // next_track_ID
    w.end_box(start);
    Ok(())
}

fn write_unity_matrix(w: &mut BoundedWriter) -> Result<()> {
    w.write_u32(0x0001_0000)?;
    w.pad(12)?;
    w.write_u32(0x0001_0000)?;
    w.pad(12)?;
    w.write_u32(0x4000_0000)?;
    Ok(())
}

fn write_trak(w: &mut BoundedWriter, mux: &Mux, track: &MuxTrack) -> Result<()> {
    let trak = w.begin_box(FourCC::TRAK)?;
    write_tkhd(w, track)?;
    if !track.refs.is_empty() {
        write_tref(w, mux, track)?;
    }

    let mdia = w.begin_box(FourCC::MDIA)?;
    write_mdhd(w, track)?;
    write_hdlr(w, track)?;
    let minf = w.begin_box(FourCC::MINF)?;
    match track.track_type {
        TrackType::Video => write_vmhd(w)?,
        TrackType::Audio => write_smhd(w)?,
        TrackType::Metadata => write_nmhd(w)?,
        TrackType::Chapters => write_gmhd(w)?,
        _ => {}
    }
    write_dinf(w)?;
    let stbl = w.begin_box(FourCC::STBL)?;
    write_stsd(w, track)?;
    write_stts(w, track)?;
    write_stss(w, track)?;
    write_stsc(w, track)?;
    write_stsz(w, track)?;
    write_stco(w, track)?;
    w.end_box(stbl);
    w.end_box(minf);
    w.end_box(mdia);

    write_metadata_scopes(w, &track.metadatas, track.cover.as_ref())?;
    w.end_box(trak);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.3.2 - Track Header Box (version 1).
fn write_tkhd(w: &mut BoundedWriter, track: &MuxTrack) -> Result<()> {
    let start = w.begin_box(FourCC::TKHD)?;
    w.write_u32(0x0100_0000 | (track.flags & 0x7))?;
    w.write_u64(track.creation_time)?;
    w.write_u64(track.modification_time)?;
    w.write_u32(track.id)?;
    w.pad(4)?; // reserved
    w.write_u64(track.duration_moov)?;
    w.pad(8)?; // reserved
    w.write_u32(0)?; // layer & alternate_group
    w.write_u16(if track.track_type == TrackType::Audio {
        0x0100
    } else {
        0
    })?; // volume
    w.pad(2)?; // reserved
    write_unity_matrix(w)?;
    let (width, height) = match &track.config {
        MuxTrackConfig::Video(v) => (v.width, v.height),
        _ => (0, 0),
    };
    w.write_u32(width << 16)?;
    w.write_u32(height << 16)?;
    w.end_box(start);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.3.3 - Track Reference Box. References are
/// stored as handles and written as the referenced tracks' final IDs.
fn write_tref(w: &mut BoundedWriter, mux: &Mux, track: &MuxTrack) -> Result<()> {
    let ref_type = if track.track_type == TrackType::Metadata {
        FourCC::REF_DESCRIPTION
    } else {
        let first = mux
            .track_by_handle(track.refs[0])
            .ok_or(Mp4Error::TrackNotFound(track.refs[0]))?;
        if first.track_type != TrackType::Chapters {
            return Err(Mp4Error::InvalidArgument(
                "track reference is neither cdsc nor chap",
            ));
        }
        FourCC::REF_CHAPTERS
    };

    let tref = w.begin_box(FourCC::TREF)?;
    let content = w.begin_box(ref_type)?;
    for &handle in &track.refs {
        let referenced = mux
            .track_by_handle(handle)
            .ok_or(Mp4Error::TrackNotFound(handle))?;
        w.write_u32(referenced.id)?;
    }
    w.end_box(content);
    w.end_box(tref);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.4.2 - Media Header Box (version 1).
fn write_mdhd(w: &mut BoundedWriter, track: &MuxTrack) -> Result<()> {
    let start = w.begin_box(FourCC::MDHD)?;
    w.write_u32(0x0100_0000)?;
    w.write_u64(track.creation_time)?;
    w.write_u64(track.modification_time)?;
    w.write_u32(track.timescale)?;
    w.write_u64(track.duration)?;
    w.write_u32(0)?; // language & quality
    w.end_box(start);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.4.3 - Handler Reference Box.
fn write_hdlr(w: &mut BoundedWriter, track: &MuxTrack) -> Result<()> {
    let (handler_type, default_name) = match track.track_type {
        TrackType::Video => (FourCC::HANDLER_VIDEO, "VideoHandler"),
        TrackType::Audio => (FourCC::HANDLER_AUDIO, "SoundHandler"),
        TrackType::Metadata => (FourCC::HANDLER_METADATA, "TimedMetadata"),
        TrackType::Chapters => (FourCC::HANDLER_TEXT, "TextHandler"),
        _ => return Err(Mp4Error::InvalidArgument("unsupported track type")),
    };
    let name = track.name.as_deref().unwrap_or(default_name);

    let start = w.begin_box(FourCC::HDLR)?;
    w.write_u32(0)?; // version & flags
    w.pad(4)?; // pre_defined
    w.write_fourcc(handler_type)?;
    w.pad(12)?; // reserved
    w.write_all(name.as_bytes())?;
    w.write_u8(0)?; // terminating NUL
    w.end_box(start);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.4.5.2 - Video Media Header Box.
fn write_vmhd(w: &mut BoundedWriter) -> Result<()> {
    let start = w.begin_box(FourCC::VMHD)?;
    w.write_u32(1)?; // version & flags
    w.pad(8)?; // graphicsmode & opcolor
    w.end_box(start);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.4.5.3 - Sound Media Header Box.
fn write_smhd(w: &mut BoundedWriter) -> Result<()> {
    let start = w.begin_box(FourCC::SMHD)?;
    w.write_u32(0)?; // version & flags
    w.write_u32(0)?; // balance (center) & reserved
    w.end_box(start);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.4.5.5 - Null Media Header Box.
fn write_nmhd(w: &mut BoundedWriter) -> Result<()> {
    let start = w.begin_box(FourCC::NMHD)?;
    w.write_u32(0)?; // version & flags
    w.end_box(start);
    Ok(())
}

/// QuickTime base media header for chapter (text) tracks.
fn write_gmhd(w: &mut BoundedWriter) -> Result<()> {
    let gmhd = w.begin_box(FourCC::GMHD)?;
    let gmin = w.begin_box(FourCC::GMIN)?;
    w.write_u32(0)?; // version & flags
    w.write_u16(0x40)?; // graphics mode: dither copy
    for _ in 0..3 {
        w.write_u16(0x8000)?; // opcolor
    }
    w.write_u16(0)?; // balance
    w.write_u16(0)?; // reserved
    w.end_box(gmin);
    let text = w.begin_box(FourCC::TEXT)?;
    write_unity_matrix(w)?;
    w.end_box(text);
    w.end_box(gmhd);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.7.2 - Data Information / Data Reference.
fn write_dinf(w: &mut BoundedWriter) -> Result<()> {
    let dinf = w.begin_box(FourCC::DINF)?;
    let dref = w.begin_box(FourCC::DREF)?;
    w.write_u32(0)?; // version & flags
    w.write_u32(1)?; // entry_count
    w.write_u32(12)?; // url box size
    w.write_fourcc(FourCC::URL)?;
    w.write_u32(1)?; // self-contained flag
    w.end_box(dref);
    w.end_box(dinf);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.5.2 - Sample Description Box, one entry whose
/// shape depends on the track type.
fn write_stsd(w: &mut BoundedWriter, track: &MuxTrack) -> Result<()> {
    let stsd = w.begin_box(FourCC::STSD)?;
    w.write_u32(0)?; // version & flags
    w.write_u32(1)?; // entry_count

    match (&track.track_type, &track.config) {
        (TrackType::Video, MuxTrackConfig::Video(config)) => {
            write_visual_entry(w, track, config)?
        }
        (TrackType::Audio, MuxTrackConfig::Audio(config)) => {
            write_audio_entry(w, track, config)?
        }
        (TrackType::Metadata, MuxTrackConfig::TimedMetadata { content_encoding, mime_type }) => {
            write_mett_entry(w, content_encoding.as_deref(), mime_type.as_deref())?
        }
        (TrackType::Metadata, _) => write_mett_entry(w, None, None)?,
        (TrackType::Chapters, _) => write_text_entry(w)?,
        _ => {
            return Err(Mp4Error::InvalidArgument(
                "track has no decoder configuration",
            ))
        }
    }

    w.end_box(stsd);
    Ok(())
}

/// VisualSampleEntry ('avc1'/'hvc1') with its nested decoder config box.
fn write_visual_entry(
    w: &mut BoundedWriter,
    track: &MuxTrack,
    config: &crate::track::VideoDecoderConfig,
) -> Result<()> {
    let entry_type = match &config.codec {
        CodecConfig::Avc { .. } => FourCC::AVC1,
        CodecConfig::Hevc { .. } => FourCC::HVC1,
        CodecConfig::Aac { .. } => return Err(Mp4Error::InvalidArgument("bad video codec")),
    };

    let entry = w.begin_box(entry_type)?;
    w.pad(6)?; // reserved
    w.write_u16(1)?; // data_reference_index
    w.pad(16)?; // pre_defined & reserved
    w.write_u16(config.width as u16)?;
    w.write_u16(config.height as u16)?;
    w.write_u32(0x0048_0000)?; // horizresolution, 72 dpi
    w.write_u32(0x0048_0000)?; // vertresolution
    w.pad(4)?; // reserved
    w.write_u16(1)?; // frame_count
    w.pad(32)?; // compressorname
    w.write_u16(0x0018)?; // depth
    w.write_u16(0xffff)?; // pre_defined

    match &config.codec {
        CodecConfig::Avc { sps, pps } => write_avcc(w, sps, pps)?,
        CodecConfig::Hevc {
            hvcc_info,
            vps,
            sps,
            pps,
        } => write_hvcc(w, hvcc_info, vps, sps, pps)?,
        CodecConfig::Aac { .. } => unreachable!(),
    }
    w.end_box(entry);
    Ok(())
}

/// ISO/IEC 14496-15 - chap. 5.3.4 - AVC decoder configuration record.
fn write_avcc(w: &mut BoundedWriter, sps: &[u8], pps: &[u8]) -> Result<()> {
    if sps.len() < 4 {
        return Err(Mp4Error::InvalidArgument("SPS shorter than 4 bytes"));
    }
    let start = w.begin_box(FourCC::AVCC)?;
    w.write_u8(1)?; // configurationVersion
    w.write_u8(sps[1])?; // AVCProfileIndication
    w.write_u8(sps[2])?; // profile_compatibility
    w.write_u8(sps[3])?; // AVCLevelIndication
    w.write_u8(0xfc | 0x03)?; // reserved | lengthSizeMinusOne
    w.write_u8(0xe0 | 1)?; // reserved | numOfSequenceParameterSets
    w.write_u16(sps.len() as u16)?;
    w.write_all(sps)?;
    w.write_u8(1)?; // numOfPictureParameterSets
    w.write_u16(pps.len() as u16)?;
    w.write_all(pps)?;
    w.end_box(start);
    Ok(())
}

/// ISO/IEC 14496-15 - chap. 8.3.3.1.2 - HEVC decoder configuration record.
fn write_hvcc(
    w: &mut BoundedWriter,
    hvcc: &crate::track::HvccInfo,
    vps: &[u8],
    sps: &[u8],
    pps: &[u8],
) -> Result<()> {
    if sps.len() < 4 {
        return Err(Mp4Error::InvalidArgument("SPS shorter than 4 bytes"));
    }
    let start = w.begin_box(FourCC::HVCC)?;
    w.write_u8(1)?; // configurationVersion
    w.write_u8(
        (hvcc.general_profile_space << 6)
            | (hvcc.general_tier_flag << 5)
            | hvcc.general_profile_idc,
    )?;
    w.write_u32(hvcc.general_profile_compatibility_flags)?;
    w.write_u32((hvcc.general_constraints_indicator_flags >> 16) as u32)?;
    w.write_u16((hvcc.general_constraints_indicator_flags & 0xffff) as u16)?;
    w.write_u8(hvcc.general_level_idc)?;
    w.write_u16(hvcc.min_spatial_segmentation_idc | 0xf000)?;
    w.write_u8(hvcc.parallelism_type | 0xfc)?;
    w.write_u8(hvcc.chroma_format | 0xfc)?;
    w.write_u8((hvcc.bit_depth_luma.wrapping_sub(8)) | 0xf8)?;
    w.write_u8((hvcc.bit_depth_chroma.wrapping_sub(8)) | 0xf8)?;
    w.write_u16(hvcc.avg_framerate)?;
    w.write_u8(
        (hvcc.constant_framerate << 6)
            | (hvcc.num_temporal_layers << 3)
            | (hvcc.temporal_id_nested << 2)
            | (hvcc.length_size.saturating_sub(1) & 0x03),
    )?;
    w.write_u8(3)?; // numOfArrays: vps, sps, pps

    for (nalu_type, nalu) in [
        (H265_NALU_TYPE_VPS, vps),
        (H265_NALU_TYPE_SPS, sps),
        (H265_NALU_TYPE_PPS, pps),
    ] {
        w.write_u8(0x80 | nalu_type)?; // array_completeness | NAL_unit_type
        w.write_u16(1)?; // numNalus
        w.write_u16(nalu.len() as u16)?;
        w.write_all(nalu)?;
    }
    w.end_box(start);
    Ok(())
}

/// AudioSampleEntry ('mp4a') with its nested esds box.
fn write_audio_entry(
    w: &mut BoundedWriter,
    track: &MuxTrack,
    config: &MuxAudioConfig,
) -> Result<()> {
    let entry = w.begin_box(FourCC::MP4A)?;
    w.pad(6)?; // reserved
    w.write_u16(1)?; // data_reference_index
    w.pad(8)?; // reserved
    w.write_u16(config.channel_count as u16)?;
    w.write_u16(config.sample_size as u16)?;
    w.pad(4)?; // pre_defined & reserved
    w.write_u32(config.sample_rate)?;
    write_esds(w, track.id, &config.asc)?;
    w.end_box(entry);
    Ok(())
}

/// ISO/IEC 14496-14 - chap. 5.6 + 14496-1 - chap. 7.2.6.5 - esds. The
/// descriptor lengths are re-encoded with the minimum number of bytes.
fn write_esds(w: &mut BoundedWriter, track_id: u32, asc: &[u8]) -> Result<()> {
    if asc.is_empty() {
        return Err(Mp4Error::InvalidArgument("empty audio specific config"));
    }
    let dsi_size = asc.len() as u32;
    let dcd_size = dsi_size + u32::from(descriptor_size_length(dsi_size)) + 14;
    let esd_size = dcd_size + u32::from(descriptor_size_length(dcd_size)) + 4;
    if descriptor_size_length(esd_size) > 4 {
        return Err(Mp4Error::InvalidArgument("audio specific config too large"));
    }

    let start = w.begin_box(FourCC::ESDS)?;
    w.write_u32(0)?; // version & flags

    w.write_u8(0x03)?; // ES descriptor tag
    write_descriptor_size(w, esd_size)?;
    w.write_u16(track_id as u16)?; // ES_ID
    w.write_u8(0)?; // no stream dependency, URL or OCR

    w.write_u8(0x04)?; // DecoderConfigDescriptor tag
    write_descriptor_size(w, dcd_size)?;
    w.write_u8(0x40)?; // objectTypeIndication: Audio ISO/IEC 14496-3
    w.write_u8(0x15)?; // streamType audio, upStream 0
    w.pad(11)?; // bufferSizeDB, maxBitrate, avgBitrate

    w.write_u8(0x05)?; // DecoderSpecificInfo tag
    write_descriptor_size(w, dsi_size)?;
    w.write_all(asc)?;

    w.write_u8(0x06)?; // SLConfigDescriptor tag
    w.write_u8(1)?;
    w.write_u8(2)?; // predefined: reserved for MP4 files

    w.end_box(start);
    Ok(())
}

fn write_descriptor_size(w: &mut BoundedWriter, size: u32) -> Result<()> {
    let len = descriptor_size_length(size);
    for i in (1..len).rev() {
        w.write_u8(((size >> (7 * i)) & 0x7f) as u8 | 0x80)?;
    }
    w.write_u8((size & 0x7f) as u8)?;
    Ok(())
}

/// MetadataSampleEntry ('mett').
fn write_mett_entry(
    w: &mut BoundedWriter,
    content_encoding: Option<&str>,
    mime_type: Option<&str>,
) -> Result<()> {
    let entry = w.begin_box(FourCC::METT)?;
    w.pad(6)?; // reserved
    w.write_u16(1)?; // data_reference_index
    w.write_all(content_encoding.unwrap_or("").as_bytes())?;
    w.write_u8(0)?;
    w.write_all(mime_type.unwrap_or("").as_bytes())?;
    w.write_u8(0)?;
    w.end_box(entry);
    Ok(())
}

/// QuickTime text sample description, used for chapter tracks.
fn write_text_entry(w: &mut BoundedWriter) -> Result<()> {
    let entry = w.begin_box(FourCC::TEXT)?;
    w.pad(6)?; // reserved
    w.write_u16(1)?; // data_reference_index
    w.write_u32(0)?; // display flags
    w.write_u32(1)?; // text justification
    w.pad(6)?; // background color
    w.pad(8)?; // default text box
    w.pad(8)?; // reserved
    w.write_u16(0)?; // font number
    w.write_u16(0)?; // font face
    w.pad(3)?; // reserved
    w.pad(6)?; // foreground color
    w.end_box(entry);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.6.1.2 - Decoding Time to Sample Box.
fn write_stts(w: &mut BoundedWriter, track: &MuxTrack) -> Result<()> {
    if track.time_to_sample.is_empty() {
        return Ok(());
    }
    let start = w.begin_box(FourCC::STTS)?;
    w.write_u32(0)?; // version & flags
    w.write_u32(track.time_to_sample.len() as u32)?;
    for entry in &track.time_to_sample {
        w.write_u32(entry.sample_count)?;
        w.write_u32(entry.sample_delta)?;
    }
    w.end_box(start);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.6.2 - Sync Sample Box. Absent when every
/// sample is sync.
fn write_stss(w: &mut BoundedWriter, track: &MuxTrack) -> Result<()> {
    if track.sync_samples.is_empty() {
        return Ok(());
    }
    let start = w.begin_box(FourCC::STSS)?;
    w.write_u32(0)?; // version & flags
    w.write_u32(track.sync_samples.len() as u32)?;
    for &entry in &track.sync_samples {
        w.write_u32(entry)?;
    }
    w.end_box(start);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.7.4 - Sample To Chunk Box.
fn write_stsc(w: &mut BoundedWriter, track: &MuxTrack) -> Result<()> {
    if track.sample_to_chunk.is_empty() {
        return Ok(());
    }
    let start = w.begin_box(FourCC::STSC)?;
    w.write_u32(0)?; // version & flags
    w.write_u32(track.sample_to_chunk.len() as u32)?;
    for entry in &track.sample_to_chunk {
        w.write_u32(entry.first_chunk)?;
        w.write_u32(entry.samples_per_chunk)?;
        w.write_u32(entry.sample_description_index)?;
    }
    w.end_box(start);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.7.3.2 - Sample Size Box.
fn write_stsz(w: &mut BoundedWriter, track: &MuxTrack) -> Result<()> {
    if track.sample_sizes.is_empty() {
        return Ok(());
    }
    let start = w.begin_box(FourCC::STSZ)?;
    w.write_u32(0)?; // version & flags
    w.write_u32(0)?; // sample_size: per-sample table follows
    w.write_u32(track.sample_sizes.len() as u32)?;
    for &size in &track.sample_sizes {
        w.write_u32(size)?;
    }
    w.end_box(start);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.7.5 - Chunk Offset Box, widened to co64 when
/// any offset exceeds 32 bits.
fn write_stco(w: &mut BoundedWriter, track: &MuxTrack) -> Result<()> {
    if track.chunk_offsets.is_empty() {
        return Ok(());
    }
    let co64 = track
        .chunk_offsets
        .iter()
        .any(|&off| off > u64::from(u32::MAX));

    let start = w.begin_box(if co64 { FourCC::CO64 } else { FourCC::STCO })?;
    w.write_u32(0)?; // version & flags
    w.write_u32(track.chunk_offsets.len() as u32)?;
    for &offset in &track.chunk_offsets {
        if co64 {
            w.write_u64(offset)?;
        } else {
            w.write_u32(offset as u32)?;
        }
    }
    w.end_box(start);
    Ok(())
}

/// Emit the metadata boxes of one scope owner (the file under moov, or one
/// track under trak): a `meta` box for META entries, and a `udta` box
/// holding the UDTA ilst (with the cover) plus the bare UDTA_ROOT entries.
pub(crate) fn write_metadata_scopes(
    w: &mut BoundedWriter,
    entries: &[MuxMetadata],
    cover: Option<&(CoverType, Vec<u8>)>,
) -> Result<()> {
    let has_meta = entries.iter().any(|m| m.storage == MetaStorage::Meta);
    let has_udta = entries.iter().any(|m| m.storage == MetaStorage::Udta) || cover.is_some();
    let has_udta_root = entries.iter().any(|m| m.storage == MetaStorage::UdtaRoot);

    if has_meta {
        write_meta(w, entries)?;
    }
    if has_udta || has_udta_root {
        let udta = w.begin_box(FourCC::UDTA)?;
        if has_udta {
            write_meta_udta(w, entries, cover)?;
        }
        for meta in entries {
            if meta.storage == MetaStorage::UdtaRoot {
                write_udta_root_entry(w, meta)?;
            }
        }
        w.end_box(udta);
    }
    Ok(())
}

/// Apple-style meta box under moov/trak: mdta handler, keys box, ilst box.
fn write_meta(w: &mut BoundedWriter, entries: &[MuxMetadata]) -> Result<()> {
    let meta = w.begin_box(FourCC::META)?;

    // Handler sub-box, fixed 33 bytes
    w.write_u32(33)?;
    w.write_fourcc(FourCC::HDLR)?;
    w.write_u32(0)?; // version & flags
    w.write_u32(0)?; // pre_defined
    w.write_fourcc(FourCC::MDTA)?;
    w.pad(13)?; // reserved & name

    write_keys(w, entries)?;
    write_ilst(w, entries, MetaStorage::Meta, None)?;
    w.end_box(meta);
    Ok(())
}

/// meta box under udta: full box with the mdir/appl handler, then the ilst.
fn write_meta_udta(
    w: &mut BoundedWriter,
    entries: &[MuxMetadata],
    cover: Option<&(CoverType, Vec<u8>)>,
) -> Result<()> {
    let meta = w.begin_box(FourCC::META)?;
    w.write_u32(0)?; // version & flags

    w.write_u32(33)?;
    w.write_fourcc(FourCC::HDLR)?;
    w.write_u32(0)?; // version & flags
    w.write_fourcc(FourCC::MHLR)?;
    w.write_fourcc(FourCC::MDIR)?;
    w.write_fourcc(FourCC::APPL)?;
    w.pad(9)?; // reserved & name

    write_ilst(w, entries, MetaStorage::Udta, cover)?;
    w.end_box(meta);
    Ok(())
}

/// QuickTime 'keys' box listing the reverse-DNS keys of the META entries.
fn write_keys(w: &mut BoundedWriter, entries: &[MuxMetadata]) -> Result<()> {
    let start = w.begin_box(FourCC::KEYS)?;
    w.write_u32(0)?; // version & flags
    let metas: Vec<&MuxMetadata> = entries
        .iter()
        .filter(|m| m.storage == MetaStorage::Meta)
        .collect();
    w.write_u32(metas.len() as u32)?;
    for meta in metas {
        w.write_u32(meta.key.len() as u32 + 8)?;
        w.write_fourcc(FourCC::MDTA)?; // key namespace
        w.write_all(meta.key.as_bytes())?;
    }
    w.end_box(start);
    Ok(())
}

/// One ilst value entry. META entries are keyed by the 1-based index into
/// the keys list, UDTA entries by their 4-byte tag.
fn write_ilst_entry(
    w: &mut BoundedWriter,
    key: &str,
    class: u32,
    data: &[u8],
    storage: MetaStorage,
    index: u32,
) -> Result<()> {
    let entry = match storage {
        MetaStorage::Meta => w.begin_box(FourCC(index))?,
        _ => {
            let tag = metadata::key_to_tag(key)
                .ok_or(Mp4Error::InvalidArgument("metadata key is not a 4-CC tag"))?;
            w.begin_box(FourCC(u32::from_be_bytes(tag)))?
        }
    };
    let data_box = w.begin_box(FourCC::DATA)?;
    w.write_u32(class)?;
    w.write_u32(0)?; // locale
    w.write_all(data)?;
    w.end_box(data_box);
    w.end_box(entry);
    Ok(())
}

/// QuickTime 'ilst' box with the value entries of one storage location.
fn write_ilst(
    w: &mut BoundedWriter,
    entries: &[MuxMetadata],
    storage: MetaStorage,
    cover: Option<&(CoverType, Vec<u8>)>,
) -> Result<()> {
    let start = w.begin_box(FourCC::ILST)?;
    let mut index = 0;
    for meta in entries {
        if meta.storage != storage {
            continue;
        }
        index += 1;
        write_ilst_entry(
            w,
            &meta.key,
            metadata::DATA_CLASS_UTF8,
            meta.value.as_bytes(),
            storage,
            index,
        )?;
    }
    if storage == MetaStorage::Udta {
        if let Some((cover_type, bytes)) = cover {
            write_ilst_entry(w, "covr", cover_type.data_class(), bytes, storage, index)?;
        }
    }
    w.end_box(start);
    Ok(())
}

/// Bare udta entry (the ISO-6709 location): 2-byte length, language code,
/// value, directly under udta.
fn write_udta_root_entry(w: &mut BoundedWriter, meta: &MuxMetadata) -> Result<()> {
    let tag = metadata::key_to_tag(&meta.key)
        .ok_or(Mp4Error::InvalidArgument("metadata key is not a 4-CC tag"))?;
    let start = w.begin_box(FourCC(u32::from_be_bytes(tag)))?;
    w.write_u16(meta.value.len() as u16)?;
    w.write_u16(0x55c4)?; // language code
    w.write_all(meta.value.as_bytes())?;
    w.end_box(start);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_size_minimal_encoding() {
        let mut w = BoundedWriter::with_limit(16);
        write_descriptor_size(&mut w, 0x1b).unwrap();
        assert_eq!(w.as_slice(), &[0x1b]);

        let mut w = BoundedWriter::with_limit(16);
        write_descriptor_size(&mut w, 130).unwrap();
        assert_eq!(w.as_slice(), &[0x81, 0x02]);
    }

    #[test]
    fn stco_widens_to_co64_past_4gib() {
        let mut track = crate::mux::test_support::empty_video_track();
        track.chunk_offsets = vec![100, 5 << 32];
        track.sample_sizes = vec![1, 1];
        let mut w = BoundedWriter::with_limit(1024);
        write_stco(&mut w, &track).unwrap();
        assert_eq!(&w.as_slice()[4..8], b"co64");
        // 16-byte header/count + two 8-byte offsets
        assert_eq!(w.len(), 32);
    }

    #[test]
    fn ilst_entry_is_keyed_by_index_for_meta_storage() {
        let mut w = BoundedWriter::with_limit(256);
        write_ilst_entry(
            &mut w,
            "com.apple.quicktime.artist",
            metadata::DATA_CLASS_UTF8,
            b"ACME",
            MetaStorage::Meta,
            1,
        )
        .unwrap();
        assert_eq!(&w.as_slice()[4..8], &1u32.to_be_bytes());
        assert_eq!(&w.as_slice()[12..16], b"data");
    }
}
