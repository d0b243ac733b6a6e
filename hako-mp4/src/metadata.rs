//! Metadata key conventions shared by the demuxer and the muxer.
//!
//! Values live in one of three storage locations:
//! - `Meta`: `moov/meta` (or `trak/meta`) with a `keys` box of reverse-DNS
//!   keys and an `ilst` box of values;
//! - `Udta`: an `ilst` under `udta/meta`, keyed by 4-byte tags;
//! - `UdtaRoot`: bare entries directly under `udta` (the ISO-6709 location).

/// iTunes 'data' box class bytes.
pub(crate) const DATA_CLASS_UTF8: u32 = 1;
pub(crate) const DATA_CLASS_JPEG: u32 = 13;
pub(crate) const DATA_CLASS_PNG: u32 = 14;
pub(crate) const DATA_CLASS_BMP: u32 = 27;

pub const META_KEY_FRIENDLY_NAME: &str = "com.apple.quicktime.artist";
pub const UDTA_KEY_FRIENDLY_NAME: &str = "\u{a9}ART";
pub const META_KEY_TITLE: &str = "com.apple.quicktime.title";
pub const UDTA_KEY_TITLE: &str = "\u{a9}nam";
pub const META_KEY_COMMENT: &str = "com.apple.quicktime.comment";
pub const UDTA_KEY_COMMENT: &str = "\u{a9}cmt";
pub const META_KEY_COPYRIGHT: &str = "com.apple.quicktime.copyright";
pub const UDTA_KEY_COPYRIGHT: &str = "\u{a9}cpy";
pub const META_KEY_MEDIA_DATE: &str = "com.apple.quicktime.creationdate";
pub const UDTA_KEY_MEDIA_DATE: &str = "\u{a9}day";
pub const META_KEY_LOCATION: &str = "com.apple.quicktime.location.ISO6709";
pub const UDTA_KEY_LOCATION: &str = "\u{a9}xyz";
pub const META_KEY_MAKER: &str = "com.apple.quicktime.make";
pub const UDTA_KEY_MAKER: &str = "\u{a9}mak";
pub const META_KEY_MODEL: &str = "com.apple.quicktime.model";
pub const UDTA_KEY_MODEL: &str = "\u{a9}mod";
pub const META_KEY_SOFTWARE_VERSION: &str = "com.apple.quicktime.software";
pub const UDTA_KEY_SOFTWARE_VERSION: &str = "\u{a9}swr";

pub const META_KEY_COVER: &str = "com.apple.quicktime.artwork";

/// Canonical META/UDTA pairs: writing one side mirrors to the other unless
/// the caller already set it.
const ALTERNATE_KEYS: [(&str, &str); 9] = [
    (META_KEY_FRIENDLY_NAME, UDTA_KEY_FRIENDLY_NAME),
    (META_KEY_TITLE, UDTA_KEY_TITLE),
    (META_KEY_COMMENT, UDTA_KEY_COMMENT),
    (META_KEY_COPYRIGHT, UDTA_KEY_COPYRIGHT),
    (META_KEY_MEDIA_DATE, UDTA_KEY_MEDIA_DATE),
    (META_KEY_LOCATION, UDTA_KEY_LOCATION),
    (META_KEY_MAKER, UDTA_KEY_MAKER),
    (META_KEY_MODEL, UDTA_KEY_MODEL),
    (META_KEY_SOFTWARE_VERSION, UDTA_KEY_SOFTWARE_VERSION),
];

pub(crate) fn alternate_key(key: &str) -> Option<&'static str> {
    for (base, alt) in ALTERNATE_KEYS {
        if key == base {
            return Some(alt);
        }
        if key == alt {
            return Some(base);
        }
    }
    None
}

/// 4-byte user-data tag to key string. Tags are Latin-1 (the "©" prefix is
/// the single byte 0xa9), so each byte maps to one char.
pub(crate) fn tag_to_key(tag: [u8; 4]) -> String {
    tag.iter().map(|&b| char::from(b)).collect()
}

/// Key string back to its 4-byte tag; `None` when the key is not a 4-char
/// Latin-1 tag.
pub(crate) fn key_to_tag(key: &str) -> Option<[u8; 4]> {
    let mut tag = [0u8; 4];
    let mut chars = key.chars();
    for slot in tag.iter_mut() {
        let c = chars.next()?;
        if (c as u32) > 0xff {
            return None;
        }
        *slot = c as u8;
    }
    if chars.next().is_some() {
        return None;
    }
    Some(tag)
}

/// Where a muxed metadata entry is stored.
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_derive::FromPrimitive)]
#[repr(u32)]
pub enum MetaStorage {
    Meta = 0,
    Udta,
    UdtaRoot,
}

impl MetaStorage {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaStorage::Meta => "meta",
            MetaStorage::Udta => "udta",
            MetaStorage::UdtaRoot => "udta-root",
        }
    }
}

/// Storage location derived from the key shape: reverse-DNS keys go to META,
/// 4-byte tags to UDTA, the location tag directly under `udta`.
pub(crate) fn storage_for_key(key: &str) -> Option<MetaStorage> {
    if key.starts_with("com.") {
        Some(MetaStorage::Meta)
    } else if key.chars().count() == 4 {
        if key == UDTA_KEY_LOCATION {
            Some(MetaStorage::UdtaRoot)
        } else {
            Some(MetaStorage::Udta)
        }
    } else {
        None
    }
}
