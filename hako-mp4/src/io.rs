use crate::error::Mp4Error;
use crate::fourcc::FourCC;
use crate::prelude::Result;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

/// Budgeted big-endian reader over one box payload.
///
/// Every read is checked against the remaining budget first, so a handler
/// detects truncation locally instead of running into the next box. The
/// consumed counter lets the dispatcher skip whatever the handler left.
pub(crate) struct BoundedReader<'a, R> {
    inner: &'a mut R,
    box_type: FourCC,
    limit: u64,
    consumed: u64,
}

impl<'a, R: Read + Seek> BoundedReader<'a, R> {
    pub fn new(inner: &'a mut R, box_type: FourCC, limit: u64) -> Self {
        BoundedReader {
            inner,
            box_type,
            limit,
            consumed: 0,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.consumed
    }

    /// Absolute file offset of the next byte to be read.
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    fn ensure(&self, needed: u64) -> Result<()> {
        if self.remaining() < needed {
            return Err(Mp4Error::InvalidSize {
                box_type: self.box_type,
                available: self.remaining(),
                needed,
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let v = self.inner.read_u8()?;
        self.consumed += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        let v = self.inner.read_u16::<BigEndian>()?;
        self.consumed += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let v = self.inner.read_u32::<BigEndian>()?;
        self.consumed += 4;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        let v = self.inner.read_u64::<BigEndian>()?;
        self.consumed += 8;
        Ok(v)
    }

    pub fn read_fourcc(&mut self) -> Result<FourCC> {
        Ok(FourCC(self.read_u32()?))
    }

    /// Version/flags prefix of a full box: returns `(version, flags)`.
    pub fn read_version_flags(&mut self) -> Result<(u8, u32)> {
        let v = self.read_u32()?;
        Ok((((v >> 24) & 0xff) as u8, v & 0x00ff_ffff))
    }

    /// 32-bit or 64-bit time field depending on the full-box version.
    pub fn read_time(&mut self, version: u8) -> Result<u64> {
        if version == 1 {
            self.read_u64()
        } else {
            Ok(u64::from(self.read_u32()?))
        }
    }

    /// Guard a table read: the declared entry count must fit in the box
    /// payload before anything is allocated for it.
    pub fn check_table(&self, entry_count: u32, entry_size: u64) -> Result<()> {
        self.ensure(u64::from(entry_count) * entry_size)
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure(buf.len() as u64)?;
        self.inner.read_exact(buf)?;
        self.consumed += buf.len() as u64;
        Ok(())
    }

    pub fn take(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure(len as u64)?;
        let v = crate::utils::take(self.inner, len)?;
        self.consumed += len as u64;
        Ok(v)
    }

    pub fn take_string(&mut self, len: usize) -> Result<String> {
        self.ensure(len as u64)?;
        let s = crate::utils::take_string(self.inner, len)?;
        self.consumed += len as u64;
        Ok(s)
    }

    /// NUL- or budget-terminated string, at most `cap` bytes.
    pub fn take_nul_string(&mut self, cap: usize) -> Result<String> {
        let before = self.inner.stream_position()?;
        let s = crate::utils::take_nul_string(self.inner, cap, self.remaining())?;
        let after = self.inner.stream_position()?;
        self.consumed += after - before;
        Ok(s)
    }

    /// Account for bytes consumed directly on the underlying reader, e.g. by
    /// a recursive container walk.
    pub fn note(&mut self, n: u64) {
        self.consumed += n;
    }

    /// Advance without reading. Unlike the data reads, skipping is bounded by
    /// the caller, not checked: the dispatcher uses it to consume padding.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        if n > 0 {
            self.inner.seek(SeekFrom::Current(n as i64))?;
            self.consumed += n;
        }
        Ok(())
    }

    pub fn skip_to_end(&mut self) -> Result<()> {
        let n = self.remaining();
        self.skip(n)
    }

    pub fn inner(&mut self) -> &mut R {
        self.inner
    }
}

/// Bounded in-memory emit buffer for the moov serialization.
///
/// Writes past the budget fail with `NoSpace` rather than silently
/// truncating; the top-level writer turns that into the fallback-to-tail
/// layout. Container boxes write a zero size placeholder and patch it once
/// their children are emitted.
pub(crate) struct BoundedWriter {
    buf: Vec<u8>,
    limit: usize,
}

impl BoundedWriter {
    pub fn with_limit(limit: usize) -> Self {
        BoundedWriter {
            buf: Vec::new(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.len() + needed > self.limit {
            return Err(Mp4Error::NoSpace);
        }
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.ensure(1)?;
        self.buf.push(v);
        Ok(())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_all(&v.to_be_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_all(&v.to_be_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_all(&v.to_be_bytes())
    }

    pub fn write_fourcc(&mut self, v: FourCC) -> Result<()> {
        self.write_u32(v.0)
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.ensure(data.len())?;
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Zero padding, used for reserved fields.
    pub fn pad(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.buf.resize(self.buf.len() + n, 0);
        Ok(())
    }

    /// Open a box: placeholder size + type. Returns the patch position.
    pub fn begin_box(&mut self, box_type: FourCC) -> Result<usize> {
        let start = self.buf.len();
        self.write_u32(0)?;
        self.write_fourcc(box_type)?;
        Ok(start)
    }

    /// Close a box opened with `begin_box`, patching its real size.
    pub fn end_box(&mut self, start: usize) {
        let size = (self.buf.len() - start) as u32;
        self.buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
    }
}
