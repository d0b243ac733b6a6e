//! Sample Description Box parsing: the visual, audio and timed-metadata
//! sample entries together with their nested decoder-config boxes.

use crate::error::Mp4Error;
use crate::fourcc::FourCC;
use crate::io::BoundedReader;
use crate::prelude::Result;
use crate::track::{HvccInfo, Track, TrackType};
use std::io::{Read, Seek};

const H265_NALU_TYPE_VPS: u8 = 32;
const H265_NALU_TYPE_SPS: u8 = 33;
const H265_NALU_TYPE_PPS: u8 = 34;

/// ISO/IEC 14496-12 - chap. 8.5.2 - Sample Description Box.
/// Dispatches on the track type set by the preceding hdlr box.
pub(crate) fn read_stsd<R: Read + Seek>(
    br: &mut BoundedReader<R>,
    track: Option<&mut Track>,
) -> Result<()> {
    let track = track.ok_or(Mp4Error::InvalidArgument("stsd outside of trak"))?;

    br.read_version_flags()?;
    let entry_count = br.read_u32()?;
    log::debug!("- stsd: entry_count={}", entry_count);

    for _ in 0..entry_count {
        match track.track_type {
            TrackType::Video => read_visual_entry(br, track)?,
            TrackType::Audio => read_audio_entry(br, track)?,
            TrackType::Metadata => read_metadata_entry(br, track)?,
            other => {
                log::debug!("- stsd: {} handler type, entry skipped", other);
                br.skip_to_end()?;
            }
        }
    }
    Ok(())
}

/// VisualSampleEntry: 8-byte box header, 78 bytes of fixed fields, then the
/// codec configuration box (avcC or hvcC).
fn read_visual_entry<R: Read + Seek>(br: &mut BoundedReader<R>, track: &mut Track) -> Result<()> {
    let _size = br.read_u32()?;
    let entry_type = br.read_fourcc()?;
    log::debug!("- stsd: visual entry type={}", entry_type);

    br.read_u32()?; // reserved
    let dref = br.read_u32()?; // reserved + data_reference_index
    log::debug!("- stsd: data_reference_index={}", dref & 0xffff);

    br.skip(16)?; // pre_defined + reserved
    let dims = br.read_u32()?;
    track.video_width = (dims >> 16) & 0xffff;
    track.video_height = dims & 0xffff;
    log::debug!(
        "- stsd: width={} height={}",
        track.video_width,
        track.video_height
    );

    br.read_u32()?; // horizresolution
    br.read_u32()?; // vertresolution
    br.read_u32()?; // reserved
    let frame_count = br.read_u16()?;
    log::debug!("- stsd: frame_count={}", frame_count);
    br.skip(32)?; // compressorname
    br.read_u32()?; // depth + pre_defined

    // Nested codec configuration box
    let codec_size = br.read_u32()?;
    let codec = br.read_fourcc()?;
    log::debug!("- stsd: codec box '{}' size={}", codec, codec_size);

    match codec {
        FourCC::AVCC => {
            track.is_avc = true;
            read_avcc(br, track)
        }
        FourCC::HVCC => {
            track.is_hevc = true;
            read_hvcc(br, track)
        }
        _ => {
            // Leave the track without a codec config; the rest of the file
            // still demuxes
            log::warn!("unsupported decoder config box '{}'", codec);
            br.skip_to_end()
        }
    }
}

/// ISO/IEC 14496-15 - chap. 5.3.3.1 - AVC decoder configuration record.
/// Only the first SPS and the first PPS are kept.
fn read_avcc<R: Read + Seek>(br: &mut BoundedReader<R>, track: &mut Track) -> Result<()> {
    let head = br.read_u32()?;
    log::debug!(
        "- avcC: version={} profile={} level={}",
        (head >> 24) & 0xff,
        (head >> 16) & 0xff,
        head & 0xff
    );

    let v = br.read_u16()?;
    let length_size = ((v >> 8) & 0x3) + 1;
    let sps_count = v & 0x1f;
    log::debug!("- avcC: length_size={} sps_count={}", length_size, sps_count);

    for _ in 0..sps_count {
        let sps_length = br.read_u16()? as usize;
        if track.avc_sps.is_none() && sps_length > 0 {
            track.avc_sps = Some(br.take(sps_length)?);
        } else {
            br.skip(sps_length as u64)?;
        }
    }

    let pps_count = br.read_u8()?;
    log::debug!("- avcC: pps_count={}", pps_count);
    for _ in 0..pps_count {
        let pps_length = br.read_u16()? as usize;
        if track.avc_pps.is_none() && pps_length > 0 {
            track.avc_pps = Some(br.take(pps_length)?);
        } else {
            br.skip(pps_length as u64)?;
        }
    }
    Ok(())
}

/// ISO/IEC 14496-15 - chap. 8.3.3.1.2 - HEVC decoder configuration record.
/// The fixed-layout fields land in `HvccInfo`; of the NAL-unit arrays only
/// the first VPS, SPS and PPS are kept.
fn read_hvcc<R: Read + Seek>(br: &mut BoundedReader<R>, track: &mut Track) -> Result<()> {
    let version = br.read_u8()?;
    if version != 1 {
        log::error!("hvcC configurationVersion mismatch: {} (expected 1)", version);
    }

    let mut hvcc = HvccInfo::default();
    let v = br.read_u8()?;
    hvcc.general_profile_space = v >> 6;
    hvcc.general_tier_flag = (v >> 5) & 0x01;
    hvcc.general_profile_idc = v & 0x1f;
    hvcc.general_profile_compatibility_flags = br.read_u32()?;
    let hi = br.read_u32()?;
    let lo = br.read_u16()?;
    hvcc.general_constraints_indicator_flags = (u64::from(hi) << 16) | u64::from(lo);
    hvcc.general_level_idc = br.read_u8()?;
    hvcc.min_spatial_segmentation_idc = br.read_u16()? & 0x0fff;
    hvcc.parallelism_type = br.read_u8()? & 0x03;
    hvcc.chroma_format = br.read_u8()? & 0x03;
    hvcc.bit_depth_luma = (br.read_u8()? & 0x07) + 8;
    hvcc.bit_depth_chroma = (br.read_u8()? & 0x07) + 8;
    hvcc.avg_framerate = br.read_u16()?;
    let v = br.read_u8()?;
    hvcc.constant_framerate = (v >> 6) & 0x03;
    hvcc.num_temporal_layers = (v >> 3) & 0x07;
    hvcc.temporal_id_nested = (v >> 2) & 0x01;
    hvcc.length_size = (v & 0x03) + 1;
    log::debug!(
        "- hvcC: profile_idc={} level_idc={} length_size={}",
        hvcc.general_profile_idc,
        hvcc.general_level_idc,
        hvcc.length_size
    );
    track.hvcc_info = Some(hvcc);

    let nb_arrays = br.read_u8()?;
    if nb_arrays > 16 {
        return Err(Mp4Error::Protocol(format!(
            "hvcC: invalid numOfArrays={}",
            nb_arrays
        )));
    }
    for _ in 0..nb_arrays {
        let v = br.read_u8()?;
        let nalu_type = v & 0x3f;
        let nb_nalus = br.read_u16()?;
        if nb_nalus > 16 {
            return Err(Mp4Error::Protocol(format!(
                "hvcC: invalid numNalus={}",
                nb_nalus
            )));
        }
        for _ in 0..nb_nalus {
            let nalu_length = br.read_u16()? as usize;
            let slot = match nalu_type {
                H265_NALU_TYPE_VPS => &mut track.hevc_vps,
                H265_NALU_TYPE_SPS => &mut track.hevc_sps,
                H265_NALU_TYPE_PPS => &mut track.hevc_pps,
                other => {
                    log::debug!("- hvcC: ignoring NALU (type = {})", other);
                    br.skip(nalu_length as u64)?;
                    continue;
                }
            };
            if slot.is_none() && nalu_length > 0 {
                *slot = Some(br.take(nalu_length)?);
            } else {
                br.skip(nalu_length as u64)?;
            }
        }
    }
    Ok(())
}

/// AudioSampleEntry: 8-byte box header, 28 bytes of fixed fields, then the
/// nested esds box.
fn read_audio_entry<R: Read + Seek>(br: &mut BoundedReader<R>, track: &mut Track) -> Result<()> {
    let _size = br.read_u32()?;
    let entry_type = br.read_fourcc()?;
    log::debug!("- stsd: audio entry type={}", entry_type);

    br.read_u32()?; // reserved
    br.read_u32()?; // reserved + data_reference_index
    br.skip(8)?; // reserved

    let v = br.read_u32()?;
    track.audio_channel_count = (v >> 16) & 0xffff;
    track.audio_sample_size = v & 0xffff;
    br.read_u32()?; // reserved
    track.audio_sample_rate = br.read_u32()?;
    log::debug!(
        "- stsd: channelcount={} samplesize={} samplerate={:.2}",
        track.audio_channel_count,
        track.audio_sample_size,
        f64::from(track.audio_sample_rate) / 65536.0
    );

    let codec_size = br.read_u32()?;
    let codec = br.read_fourcc()?;
    log::debug!("- stsd: codec box '{}' size={}", codec, codec_size);
    if codec == FourCC::ESDS {
        read_esds(br, track)?;
    }
    Ok(())
}

/// ISO/IEC 14496-14 - chap. 5.6 - esds and its MPEG-4 descriptor chain:
/// an ES descriptor (tag 0x03) holding a DecoderConfigDescriptor (0x04)
/// holding the DecoderSpecificInfo (0x05) whose payload is the
/// AudioSpecificConfig.
fn read_esds<R: Read + Seek>(br: &mut BoundedReader<R>, track: &mut Track) -> Result<()> {
    br.read_u32()?; // version & flags, always 0

    let tag = br.read_u8()?;
    if tag != 0x03 {
        return Err(Mp4Error::Protocol(format!(
            "invalid ESDescriptor tag: {:#04x}, expected 0x03",
            tag
        )));
    }
    let size = read_descriptor_size(br)?;
    log::debug!("- esds: ESDescriptor size={}", size);

    br.read_u16()?; // ES_ID
    let flags = br.read_u8()?;
    if flags & 0x80 != 0 {
        br.read_u16()?; // dependsOn_ES_ID
    }
    if flags & 0x40 != 0 {
        let url_len = br.read_u8()?;
        br.skip(u64::from(url_len))?;
    }

    let tag = br.read_u8()?;
    if tag != 0x04 {
        return Err(Mp4Error::Protocol(format!(
            "invalid DecoderConfigDescriptor tag: {:#04x}, expected 0x04",
            tag
        )));
    }
    let size = read_descriptor_size(br)?;
    log::debug!("- esds: DecoderConfigDescriptor size={}", size);

    let object_type = br.read_u8()?;
    if object_type != 0x40 {
        return Err(Mp4Error::Protocol(format!(
            "invalid objectTypeIndication: {:#04x}, expected 0x40",
            object_type
        )));
    }
    let stream_type = br.read_u8()? >> 2;
    if stream_type != 0x05 {
        return Err(Mp4Error::Protocol(format!(
            "invalid streamType: {:#04x}, expected 0x05",
            stream_type
        )));
    }
    br.skip(11)?; // bufferSizeDB, maxBitrate, avgBitrate

    let tag = br.read_u8()?;
    if tag != 0x05 {
        return Err(Mp4Error::Protocol(format!(
            "invalid DecoderSpecificInfo tag: {:#04x}, expected 0x05",
            tag
        )));
    }
    let size = read_descriptor_size(br)? as usize;
    log::debug!("- esds: DecoderSpecificInfo size={}", size);

    if track.audio_specific_config.is_none() && size > 0 {
        let asc = br.take(size)?;
        // Top 5 bits of the first byte: audio object type, 2 = AAC-LC
        let audio_object_type = asc[0] >> 3;
        log::debug!("- esds: audioObjectType={}", audio_object_type);
        if audio_object_type == 2 {
            track.is_aac_lc = true;
        }
        track.audio_specific_config = Some(asc);
    }
    Ok(())
}

/// MetadataSampleEntry ('mett'): two consecutive NUL-terminated strings,
/// content encoding then MIME type.
fn read_metadata_entry<R: Read + Seek>(
    br: &mut BoundedReader<R>,
    track: &mut Track,
) -> Result<()> {
    let _size = br.read_u32()?;
    let entry_type = br.read_fourcc()?;
    log::debug!("- stsd: metadata entry type={}", entry_type);

    br.read_u32()?; // reserved
    br.read_u16()?; // reserved
    br.read_u16()?; // data_reference_index

    let content_encoding = br.take_nul_string(100)?;
    let mime_format = br.take_nul_string(100)?;
    log::debug!(
        "- stsd: content_encoding='{}' mime_format='{}'",
        content_encoding,
        mime_format
    );
    if !content_encoding.is_empty() {
        track.content_encoding = Some(content_encoding);
    }
    if !mime_format.is_empty() {
        track.mime_format = Some(mime_format);
    }
    Ok(())
}

/// MPEG-4 descriptor length: 1 to 4 bytes of 7-bit payload with top-bit
/// continuation. Longer encodings are rejected.
pub(crate) fn read_descriptor_size<R: Read + Seek>(br: &mut BoundedReader<R>) -> Result<u32> {
    let mut size: u32 = 0;
    for _ in 0..4 {
        let b = br.read_u8()?;
        size = (size << 7) | u32::from(b & 0x7f);
        if b & 0x80 == 0 {
            return Ok(size);
        }
    }
    Err(Mp4Error::Protocol(
        "invalid descriptor size: more than 4 bytes".to_string(),
    ))
}

/// Number of bytes the descriptor length encoding of `size` occupies.
pub(crate) fn descriptor_size_length(size: u32) -> u8 {
    let mut bytes = 0;
    let mut size = size;
    while size > 0 {
        bytes += 1;
        size >>= 7;
    }
    if bytes == 0 {
        1
    } else {
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::BoundedReader;
    use std::io::Cursor;

    fn read_size(bytes: &[u8]) -> Result<u32> {
        let mut c = Cursor::new(bytes.to_vec());
        let mut br = BoundedReader::new(&mut c, FourCC::ESDS, bytes.len() as u64);
        read_descriptor_size(&mut br)
    }

    #[test]
    fn descriptor_size_single_byte() {
        assert_eq!(read_size(&[0x1b]).unwrap(), 0x1b);
    }

    #[test]
    fn descriptor_size_with_continuation() {
        // 0x81 0x02 = (1 << 7) | 2
        assert_eq!(read_size(&[0x81, 0x02]).unwrap(), 130);
        // Padded form used by some encoders
        assert_eq!(read_size(&[0x80, 0x80, 0x80, 0x0d]).unwrap(), 13);
    }

    #[test]
    fn descriptor_size_rejects_overlong() {
        assert!(read_size(&[0x80, 0x80, 0x80, 0x80, 0x01]).is_err());
    }

    #[test]
    fn descriptor_size_length_matches_encoding() {
        assert_eq!(descriptor_size_length(0), 1);
        assert_eq!(descriptor_size_length(127), 1);
        assert_eq!(descriptor_size_length(128), 2);
        assert_eq!(descriptor_size_length(1 << 14), 3);
        assert_eq!(descriptor_size_length(1 << 21), 4);
    }
}
