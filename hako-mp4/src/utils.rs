use crate::prelude::Result;
use std::io::Read;

pub(crate) fn take<R: Read>(reader: &mut R, len: usize) -> std::io::Result<Vec<u8>> {
    let mut r = vec![0u8; len];
    reader.read_exact(&mut r)?;
    Ok(r)
}

pub(crate) fn take_string<R: Read>(reader: &mut R, len: usize) -> Result<String> {
    let r = take(reader, len)?;
    Ok(String::from_utf8_lossy(&r).to_string())
}

/// Read a NUL-terminated string of at most `cap` bytes from `reader`, never
/// consuming more than `available` bytes. Some writers omit the terminator on
/// the last string of a box, so end-of-budget also terminates.
pub(crate) fn take_nul_string<R: Read>(
    reader: &mut R,
    cap: usize,
    available: u64,
) -> Result<String> {
    let mut out = Vec::new();
    let mut left = available;
    while left > 0 && out.len() < cap {
        let mut b = [0u8; 1];
        reader.read_exact(&mut b)?;
        left -= 1;
        if b[0] == 0 {
            break;
        }
        out.push(b[0]);
    }
    Ok(String::from_utf8_lossy(&out).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn nul_string_stops_at_terminator() {
        let mut c = Cursor::new(b"abc\0def".to_vec());
        let s = take_nul_string(&mut c, 100, 7).unwrap();
        assert_eq!(s, "abc");
        assert_eq!(c.position(), 4);
    }

    #[test]
    fn nul_string_accepts_missing_terminator() {
        let mut c = Cursor::new(b"abc".to_vec());
        let s = take_nul_string(&mut c, 100, 3).unwrap();
        assert_eq!(s, "abc");
    }
}
