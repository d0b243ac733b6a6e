//! Recursive-descent box reader.
//!
//! The dispatcher reads one box header at a time, hands the bounded payload
//! to the matching handler and skips whatever the handler left unread, so a
//! short handler never corrupts the walk. Unknown boxes are kept in the tree
//! as unparsed leaves.

use crate::boxes::stsd::read_stsd;
use crate::boxes::NodeIndex;
use crate::demux::MediaState;
use crate::error::Mp4Error;
use crate::fourcc::FourCC;
use crate::io::BoundedReader;
use crate::metadata;
use crate::prelude::Result;
use crate::track::{
    CoverLocation, SampleToChunkEntry, TimeToSampleEntry, Track, TrackType,
    TRACK_FLAG_ENABLED, TRACK_FLAG_IN_MOVIE, TRACK_FLAG_IN_PREVIEW, TRACK_REF_MAX,
};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

/// Walk all children of `parent` within `max_bytes`, dispatching each box to
/// its handler. Returns the number of bytes consumed.
pub(crate) fn read_children<R: Read + Seek>(
    r: &mut R,
    state: &mut MediaState,
    parent: NodeIndex,
    max_bytes: u64,
    mut track: Option<&mut Track>,
) -> Result<u64> {
    let mut read_bytes = 0u64;
    let mut first = true;
    let parent_depth = state.arena.node(parent).depth;
    let parent_type = state.arena.node(parent).box_type;

    while read_bytes + 8 <= max_bytes {
        let mut header = 8u64;
        let size32 = r.read_u32::<BigEndian>()?;
        let box_type = FourCC(r.read_u32::<BigEndian>()?);

        // The first box of the file must be 'ftyp'
        if parent_depth == 0 && first && box_type != FourCC::FTYP {
            return Err(Mp4Error::FtypNotFirst);
        }

        let mut largesize = None;
        let mut last_box = false;
        let real_size = match size32 {
            0 => {
                // Box extends to the end of the enclosing region
                last_box = true;
                max_bytes - read_bytes
            }
            1 => {
                let ls = r.read_u64::<BigEndian>()?;
                header += 8;
                largesize = Some(ls);
                ls
            }
            s => u64::from(s),
        };
        if real_size < header {
            return Err(Mp4Error::Protocol(format!(
                "box '{}' declares size {} smaller than its header",
                box_type, real_size
            )));
        }

        // A box bigger than its enclosing region is not fatal: warn and
        // treat the region as fully consumed.
        if max_bytes < read_bytes + real_size {
            log::warn!(
                "truncated box '{}': size {} exceeds the {} bytes left in '{}'",
                box_type,
                real_size,
                max_bytes - read_bytes,
                parent_type
            );
            let delta = max_bytes as i64 - (read_bytes + header) as i64;
            r.seek(SeekFrom::Current(delta))?;
            return Ok(max_bytes);
        }

        let node = state.arena.alloc(parent, box_type, size32, largesize);
        let payload = real_size - header;
        log::debug!("box '{}' size {} in '{}'", box_type, real_size, parent_type);

        let mut br = BoundedReader::new(r, box_type, payload);
        match box_type {
            FourCC::UUID => {
                let mut uuid = [0u8; 16];
                br.read_exact(&mut uuid)?;
                state.arena.set_uuid(node, uuid);
            }
            FourCC::MOOV
            | FourCC::UDTA
            | FourCC::MDIA
            | FourCC::MINF
            | FourCC::DINF
            | FourCC::STBL => {
                let consumed =
                    read_children(br.inner(), state, node, payload, track.as_deref_mut())?;
                br.note(consumed);
            }
            FourCC::TRAK if parent_type == FourCC::MOOV => {
                // One corrupt track must not hide its siblings
                let mut tk = Track::default();
                let start = br.position()?;
                match read_children(br.inner(), state, node, payload, Some(&mut tk)) {
                    Ok(consumed) => {
                        br.note(consumed);
                        state.tracks.push(tk);
                    }
                    Err(e @ Mp4Error::Io(_)) => return Err(e),
                    Err(e) => {
                        log::warn!("dropping corrupt track: {}", e);
                        br.inner().seek(SeekFrom::Start(start + payload))?;
                        br.note(payload);
                    }
                }
            }
            FourCC::FTYP => read_ftyp(&mut br)?,
            FourCC::MVHD => read_mvhd(&mut br, state)?,
            FourCC::TKHD => read_tkhd(&mut br, track.as_deref_mut())?,
            FourCC::TREF => read_tref(&mut br, track.as_deref_mut())?,
            FourCC::MDHD => read_mdhd(&mut br, track.as_deref_mut())?,
            FourCC::HDLR => read_hdlr(&mut br, parent_type, track.as_deref_mut())?,
            FourCC::VMHD => read_vmhd(&mut br)?,
            FourCC::SMHD => read_smhd(&mut br)?,
            FourCC::HMHD => read_hmhd(&mut br)?,
            FourCC::NMHD => read_nmhd(&mut br)?,
            FourCC::STSD => read_stsd(&mut br, track.as_deref_mut())?,
            FourCC::STTS => read_stts(&mut br, track.as_deref_mut())?,
            FourCC::STSS => read_stss(&mut br, track.as_deref_mut())?,
            FourCC::STSZ => read_stsz(&mut br, track.as_deref_mut())?,
            FourCC::STSC => read_stsc(&mut br, track.as_deref_mut())?,
            FourCC::STCO => read_stco(&mut br, track.as_deref_mut())?,
            FourCC::CO64 => read_co64(&mut br, track.as_deref_mut())?,
            FourCC::META => {
                if parent_type == FourCC::UDTA {
                    // QuickTime-style meta under udta carries version/flags
                    br.read_version_flags()?;
                    let consumed = read_children(
                        br.inner(),
                        state,
                        node,
                        payload - 4,
                        track.as_deref_mut(),
                    )?;
                    br.note(consumed);
                } else if parent_type == FourCC::MOOV || parent_type == FourCC::TRAK {
                    let consumed =
                        read_children(br.inner(), state, node, payload, track.as_deref_mut())?;
                    br.note(consumed);
                }
            }
            FourCC::ILST => {
                let consumed =
                    read_children(br.inner(), state, node, payload, track.as_deref_mut())?;
                br.note(consumed);
            }
            FourCC::DATA => {
                // A malformed metadata entry is dropped, not fatal
                match read_data(&mut br, state, parent_type, track.as_deref_mut()) {
                    Ok(()) => {}
                    Err(e @ Mp4Error::Io(_)) => return Err(e),
                    Err(e) => {
                        log::warn!("skipping malformed metadata entry in '{}': {}", parent_type, e)
                    }
                }
            }
            FourCC::XYZ if parent_type == FourCC::UDTA => read_xyz(&mut br, state)?,
            FourCC::KEYS if parent_type == FourCC::META => {
                read_keys(&mut br, state, track.as_deref_mut())?
            }
            _ => {
                if parent_type == FourCC::ILST {
                    // ilst items are containers keyed by tag or key index
                    let consumed =
                        read_children(br.inner(), state, node, payload, track.as_deref_mut())?;
                    br.note(consumed);
                }
                // Anything else stays in the tree as an unparsed leaf
            }
        }

        // Tolerate spec-legal trailing padding inside the box
        br.skip_to_end()?;

        read_bytes += real_size;
        first = false;
        if last_box {
            break;
        }
    }

    Ok(read_bytes)
}

/// ISO/IEC 14496-12 - chap. 4.3 - File Type Box
fn read_ftyp<R: Read + Seek>(br: &mut BoundedReader<R>) -> Result<()> {
    let major_brand = br.read_fourcc()?;
    let minor_version = br.read_u32()?;
    log::debug!("- ftyp: major_brand={} minor_version={}", major_brand, minor_version);
    let mut k = 0;
    while br.remaining() >= 4 {
        let brand = br.read_fourcc()?;
        log::debug!("- ftyp: compatible_brands[{}]={}", k, brand);
        k += 1;
    }
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.2.2 - Movie Header Box
fn read_mvhd<R: Read + Seek>(br: &mut BoundedReader<R>, state: &mut MediaState) -> Result<()> {
    let (version, _flags) = br.read_version_flags()?;
    state.creation_time = br.read_time(version)?;
    state.modification_time = br.read_time(version)?;
    state.timescale = br.read_u32()?;
    state.duration = br.read_time(version)?;
    log::debug!(
        "- mvhd: timescale={} duration={}",
        state.timescale,
        state.duration
    );

    let rate = br.read_u32()?;
    let volume = br.read_u32()?;
    log::debug!(
        "- mvhd: rate={:.4} volume={:.2}",
        f64::from(rate) / 65536.0,
        f64::from((volume >> 16) & 0xffff) / 256.0
    );
    // reserved (8), matrix (36), pre_defined (24)
    br.skip(8 + 36 + 24)?;
    let next_track_id = br.read_u32()?;
    log::debug!("- mvhd: next_track_ID={}", next_track_id);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.3.2 - Track Header Box
fn read_tkhd<R: Read + Seek>(br: &mut BoundedReader<R>, track: Option<&mut Track>) -> Result<()> {
    let track = track.ok_or(Mp4Error::InvalidArgument("tkhd outside of trak"))?;

    let (version, flags) = br.read_version_flags()?;
    track.enabled = flags & TRACK_FLAG_ENABLED != 0;
    track.in_movie = flags & TRACK_FLAG_IN_MOVIE != 0;
    track.in_preview = flags & TRACK_FLAG_IN_PREVIEW != 0;

    br.read_time(version)?; // creation_time (the authoritative one is in mdhd)
    br.read_time(version)?; // modification_time
    track.id = br.read_u32()?;
    br.read_u32()?; // reserved
    let duration = br.read_time(version)?;
    log::debug!(
        "- tkhd: track_ID={} flags={:#x} duration={}",
        track.id,
        flags,
        duration
    );

    // reserved (8), layer/alternate_group (4), volume/reserved (4), matrix (36)
    br.skip(8 + 4 + 4 + 36)?;
    let width = br.read_u32()?;
    let height = br.read_u32()?;
    log::debug!(
        "- tkhd: width={:.2} height={:.2}",
        f64::from(width) / 65536.0,
        f64::from(height) / 65536.0
    );
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.3.3 - Track Reference Box
fn read_tref<R: Read + Seek>(br: &mut BoundedReader<R>, track: Option<&mut Track>) -> Result<()> {
    let track = track.ok_or(Mp4Error::InvalidArgument("tref outside of trak"))?;

    // The contained reference box: size + type + track ID words
    let _ref_size = br.read_u32()?;
    track.reference_type = br.read_fourcc()?;
    log::debug!("- tref: reference_type={}", track.reference_type);

    track.reference_track_ids.clear();
    while br.remaining() >= 4 && track.reference_track_ids.len() < TRACK_REF_MAX {
        let id = br.read_u32()?;
        log::debug!("- tref: track_id={}", id);
        track.reference_track_ids.push(id);
    }
    if br.remaining() > 0 {
        log::warn!(
            "tref: track_IDs count exceeds internal max count ({}), subsequent references ignored",
            TRACK_REF_MAX
        );
    }
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.4.2 - Media Header Box
fn read_mdhd<R: Read + Seek>(br: &mut BoundedReader<R>, track: Option<&mut Track>) -> Result<()> {
    let track = track.ok_or(Mp4Error::InvalidArgument("mdhd outside of trak"))?;

    let (version, _flags) = br.read_version_flags()?;
    track.creation_time = br.read_time(version)?;
    track.modification_time = br.read_time(version)?;
    track.timescale = br.read_u32()?;
    track.duration = br.read_time(version)?;
    log::debug!(
        "- mdhd: timescale={} duration={}",
        track.timescale,
        track.duration
    );

    let language = br.read_u32()?;
    log::debug!("- mdhd: language={}", (language >> 16) & 0x7fff);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.4.3 - Handler Reference Box
fn read_hdlr<R: Read + Seek>(
    br: &mut BoundedReader<R>,
    parent_type: FourCC,
    track: Option<&mut Track>,
) -> Result<()> {
    br.read_version_flags()?;
    br.read_u32()?; // pre_defined
    let handler_type = br.read_fourcc()?;
    br.skip(12)?; // reserved

    // Name is either NUL-terminated or runs to the end of the box
    let name = br.take_nul_string(100)?;
    log::debug!("- hdlr: handler_type={} name='{}'", handler_type, name);

    // Only the media handler sets the track type; meta/udta handlers don't
    if parent_type == FourCC::MDIA {
        if let Some(track) = track {
            track.track_type = TrackType::from_handler(handler_type);
            track.name = Some(name);
        }
    }
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.4.5.2 - Video Media Header Box
fn read_vmhd<R: Read + Seek>(br: &mut BoundedReader<R>) -> Result<()> {
    br.read_version_flags()?;
    let graphicsmode = br.read_u16()?;
    let mut opcolor = [0u16; 3];
    for c in opcolor.iter_mut() {
        *c = br.read_u16()?;
    }
    log::debug!("- vmhd: graphicsmode={} opcolor={:?}", graphicsmode, opcolor);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.4.5.3 - Sound Media Header Box
fn read_smhd<R: Read + Seek>(br: &mut BoundedReader<R>) -> Result<()> {
    br.read_version_flags()?;
    let balance = br.read_u32()?;
    log::debug!(
        "- smhd: balance={:.2}",
        f64::from(((balance >> 16) & 0xffff) as i16) / 256.0
    );
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.4.5.4 - Hint Media Header Box
fn read_hmhd<R: Read + Seek>(br: &mut BoundedReader<R>) -> Result<()> {
    br.read_version_flags()?;
    let pdu = br.read_u32()?;
    let maxbitrate = br.read_u32()?;
    let avgbitrate = br.read_u32()?;
    br.read_u32()?; // reserved
    log::debug!(
        "- hmhd: maxPDUsize={} avgPDUsize={} maxbitrate={} avgbitrate={}",
        (pdu >> 16) & 0xffff,
        pdu & 0xffff,
        maxbitrate,
        avgbitrate
    );
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.4.5.5 - Null Media Header Box
fn read_nmhd<R: Read + Seek>(br: &mut BoundedReader<R>) -> Result<()> {
    br.read_version_flags()?;
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.6.1.2 - Decoding Time to Sample Box
fn read_stts<R: Read + Seek>(br: &mut BoundedReader<R>, track: Option<&mut Track>) -> Result<()> {
    let track = track.ok_or(Mp4Error::InvalidArgument("stts outside of trak"))?;
    if !track.time_to_sample.is_empty() {
        return Err(Mp4Error::AlreadyExists("time to sample table"));
    }

    br.read_version_flags()?;
    let entry_count = br.read_u32()?;
    log::debug!("- stts: entry_count={}", entry_count);

    br.check_table(entry_count, 8)?;
    track.time_to_sample = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        track.time_to_sample.push(TimeToSampleEntry {
            sample_count: br.read_u32()?,
            sample_delta: br.read_u32()?,
        });
    }
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.6.2 - Sync Sample Box
fn read_stss<R: Read + Seek>(br: &mut BoundedReader<R>, track: Option<&mut Track>) -> Result<()> {
    let track = track.ok_or(Mp4Error::InvalidArgument("stss outside of trak"))?;
    if track.sync_samples.is_some() {
        return Err(Mp4Error::AlreadyExists("sync sample table"));
    }

    br.read_version_flags()?;
    let entry_count = br.read_u32()?;
    log::debug!("- stss: entry_count={}", entry_count);

    br.check_table(entry_count, 4)?;
    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        entries.push(br.read_u32()?);
    }
    track.sync_samples = Some(entries);
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.7.3.2 - Sample Size Box
fn read_stsz<R: Read + Seek>(br: &mut BoundedReader<R>, track: Option<&mut Track>) -> Result<()> {
    let track = track.ok_or(Mp4Error::InvalidArgument("stsz outside of trak"))?;
    if !track.sample_sizes.is_empty() {
        return Err(Mp4Error::AlreadyExists("sample size table"));
    }

    br.read_version_flags()?;
    let sample_size = br.read_u32()?;
    let sample_count = br.read_u32()?;
    log::debug!("- stsz: sample_size={} sample_count={}", sample_size, sample_count);
    track.sample_count = sample_count;

    if sample_size == 0 {
        br.check_table(sample_count, 4)?;
        track.sample_sizes = Vec::with_capacity(sample_count as usize);
        for _ in 0..sample_count {
            let size = br.read_u32()?;
            if size > track.sample_max_size {
                track.sample_max_size = size;
            }
            track.sample_sizes.push(size);
        }
    } else {
        track.sample_sizes = vec![sample_size; sample_count as usize];
        track.sample_max_size = sample_size;
    }
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.7.4 - Sample To Chunk Box
fn read_stsc<R: Read + Seek>(br: &mut BoundedReader<R>, track: Option<&mut Track>) -> Result<()> {
    let track = track.ok_or(Mp4Error::InvalidArgument("stsc outside of trak"))?;
    if !track.sample_to_chunk.is_empty() {
        return Err(Mp4Error::AlreadyExists("sample to chunk table"));
    }

    br.read_version_flags()?;
    let entry_count = br.read_u32()?;
    log::debug!("- stsc: entry_count={}", entry_count);

    br.check_table(entry_count, 12)?;
    track.sample_to_chunk = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        track.sample_to_chunk.push(SampleToChunkEntry {
            first_chunk: br.read_u32()?,
            samples_per_chunk: br.read_u32()?,
            sample_description_index: br.read_u32()?,
        });
    }
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.7.5 - Chunk Offset Box (32-bit)
fn read_stco<R: Read + Seek>(br: &mut BoundedReader<R>, track: Option<&mut Track>) -> Result<()> {
    let track = track.ok_or(Mp4Error::InvalidArgument("stco outside of trak"))?;
    if !track.chunk_offsets.is_empty() {
        return Err(Mp4Error::AlreadyExists("chunk offset table"));
    }

    br.read_version_flags()?;
    let entry_count = br.read_u32()?;
    log::debug!("- stco: entry_count={}", entry_count);
    track.chunk_count = entry_count;

    br.check_table(entry_count, 4)?;
    track.chunk_offsets = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        track.chunk_offsets.push(u64::from(br.read_u32()?));
    }
    Ok(())
}

/// ISO/IEC 14496-12 - chap. 8.7.5 - Chunk Offset Box (64-bit)
fn read_co64<R: Read + Seek>(br: &mut BoundedReader<R>, track: Option<&mut Track>) -> Result<()> {
    let track = track.ok_or(Mp4Error::InvalidArgument("co64 outside of trak"))?;
    if !track.chunk_offsets.is_empty() {
        return Err(Mp4Error::AlreadyExists("chunk offset table"));
    }

    br.read_version_flags()?;
    let entry_count = br.read_u32()?;
    log::debug!("- co64: entry_count={}", entry_count);
    track.chunk_count = entry_count;

    br.check_table(entry_count, 8)?;
    track.chunk_offsets = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        track.chunk_offsets.push(br.read_u64()?);
    }
    Ok(())
}

/// QuickTime/Android '©xyz' location entry directly under udta: a 2-byte
/// length, a 2-byte language code, then an ISO-6709 string.
fn read_xyz<R: Read + Seek>(br: &mut BoundedReader<R>, state: &mut MediaState) -> Result<()> {
    let location_size = br.read_u16()?;
    let language_code = br.read_u16()?;
    let value = br.take_string(location_size as usize)?;
    log::debug!(
        "- xyz: language_code={} location='{}'",
        language_code,
        value
    );
    state.udta_location = Some((metadata::UDTA_KEY_LOCATION.to_string(), value));
    Ok(())
}

/// QuickTime metadata 'keys' box: ordered list of (namespace, key) entries.
/// The ilst items reference keys by their 1-based position in this list.
fn read_keys<R: Read + Seek>(
    br: &mut BoundedReader<R>,
    state: &mut MediaState,
    track: Option<&mut Track>,
) -> Result<()> {
    br.read_version_flags()?;
    let entry_count = br.read_u32()?;
    log::debug!("- keys: entry_count={}", entry_count);

    let mut keys = Vec::with_capacity(entry_count as usize);
    for i in 0..entry_count {
        let key_size = br.read_u32()?;
        if key_size < 8 {
            return Err(Mp4Error::Protocol(format!(
                "invalid key size {} in keys entry {}",
                key_size, i
            )));
        }
        let namespace = br.read_fourcc()?;
        let key = br.take_string((key_size - 8) as usize)?;
        log::debug!("- keys: [{}] namespace={} key='{}'", i, namespace, key);
        keys.push(key);
    }

    let values = vec![None; keys.len()];
    match track {
        Some(track) => {
            track.static_meta_keys = keys;
            track.static_meta_values = values;
        }
        None => {
            state.meta_keys = keys;
            state.meta_values = values;
        }
    }
    Ok(())
}

/// QuickTime metadata 'data' box: 1-byte class + 3-byte locale prefix, then
/// the value. The parent item's type selects the destination: a well-known
/// 4-CC tag feeds the UDTA scope, a small integer indexes the keys list of
/// the enclosing META scope, and image classes mark the cover location.
fn read_data<R: Read + Seek>(
    br: &mut BoundedReader<R>,
    state: &mut MediaState,
    parent_type: FourCC,
    track: Option<&mut Track>,
) -> Result<()> {
    let clazz = br.read_u32()? & 0xff;
    br.read_u32()?; // locale, unused
    let value_len = br.remaining();

    if clazz == metadata::DATA_CLASS_UTF8 {
        if parent_type.is_known_udta_tag() {
            let key = metadata::tag_to_key(parent_type.bytes());
            let value = br.take_string(value_len as usize)?;
            log::debug!("- data: udta value[{}]='{}'", key, value);
            state.udta_entries.push((key, value));
            return Ok(());
        }

        let (keys, values) = match track {
            Some(track) => (&track.static_meta_keys, &mut track.static_meta_values),
            None => (&state.meta_keys, &mut state.meta_values),
        };
        let index = parent_type.0 as usize;
        if index > 0 && index <= keys.len() {
            let value = br.take_string(value_len as usize)?;
            log::debug!("- data: value[{}]='{}'", keys[index - 1], value);
            values[index - 1] = Some(value);
        }
        return Ok(());
    }

    // Image classes: record the cover location, fetched lazily
    if let Some(cover_type) = crate::track::CoverType::from_data_class(clazz) {
        let location = CoverLocation {
            offset: br.position()?,
            size: value_len as u32,
            cover_type,
        };
        if let Some(track) = track {
            if parent_type == FourCC::COVR {
                // META storage wins when both carry a cover
                if track.cover.is_none() {
                    log::debug!(
                        "- data: track udta cover size={} type={}",
                        location.size,
                        cover_type.as_str()
                    );
                    track.cover = Some(location);
                }
            } else {
                let index = parent_type.0 as usize;
                if index > 0
                    && index <= track.static_meta_keys.len()
                    && track.static_meta_keys[index - 1] == metadata::META_KEY_COVER
                {
                    log::debug!(
                        "- data: track meta cover size={} type={}",
                        location.size,
                        cover_type.as_str()
                    );
                    track.cover = Some(location);
                }
            }
            return Ok(());
        }
        if parent_type == FourCC::COVR {
            log::debug!("- data: udta cover size={} type={}", location.size, cover_type.as_str());
            state.udta_cover = Some(location);
        } else {
            let index = parent_type.0 as usize;
            if index > 0
                && index <= state.meta_keys.len()
                && state.meta_keys[index - 1] == metadata::META_KEY_COVER
            {
                log::debug!(
                    "- data: meta cover size={} type={}",
                    location.size,
                    cover_type.as_str()
                );
                state.meta_cover = Some(location);
            }
        }
    }
    Ok(())
}
