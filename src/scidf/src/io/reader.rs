use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use super::{Endian, Width};
use crate::{Error, Result};

/// Positioned reader over a random-access byte store.
/// Wraps anything that is `Read + Seek` — typically a `Cursor<Vec<u8>>`
/// for an in-memory container or a `File` for an on-disk one.
pub struct ByteReader<R> {
    inner: R,
}

impl<R: Read + Seek> ByteReader<R> {
    pub fn new(inner: R) -> ByteReader<R> {
        ByteReader { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    pub fn seek_to(&mut self, pos: u64) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::Start(pos))?)
    }

    pub fn skip(&mut self, n: u64) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::Current(n as i64))?)
    }

    /// Advance to the next multiple of `n` bytes from the start of the
    /// stream.
    pub fn align(&mut self, n: u64) -> Result<()> {
        let pos = self.position()?;
        let rem = pos % n;
        if rem != 0 {
            self.skip(n - rem)?;
        }
        Ok(())
    }

    pub fn read_exact_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.inner.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::corrupt(format!("short read: wanted {n} bytes"))
            } else {
                Error::Io(e)
            }
        })?;
        Ok(buf)
    }

    /// Read `n` bytes without advancing the cursor.
    pub fn peek(&mut self, n: usize) -> Result<Vec<u8>> {
        let pos = self.position()?;
        let bytes = self.read_exact_bytes(n)?;
        self.seek_to(pos)?;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.inner.read_u8()?)
    }

    pub fn read_u16(&mut self, endian: Endian) -> Result<u16> {
        Ok(match endian {
            Endian::Little => self.inner.read_u16::<LittleEndian>()?,
            Endian::Big => self.inner.read_u16::<BigEndian>()?,
        })
    }

    pub fn read_u32(&mut self, endian: Endian) -> Result<u32> {
        Ok(match endian {
            Endian::Little => self.inner.read_u32::<LittleEndian>()?,
            Endian::Big => self.inner.read_u32::<BigEndian>()?,
        })
    }

    pub fn read_u64(&mut self, endian: Endian) -> Result<u64> {
        Ok(match endian {
            Endian::Little => self.inner.read_u64::<LittleEndian>()?,
            Endian::Big => self.inner.read_u64::<BigEndian>()?,
        })
    }

    /// Read an unsigned value of the given byte width (1/2/4/8), used
    /// for offsets, lengths, and other variable-width on-disk fields.
    pub fn read_uint(&mut self, width: Width, endian: Endian) -> Result<u64> {
        match width.bytes() {
            2 => Ok(self.read_u16(endian)? as u64),
            4 => Ok(self.read_u32(endian)? as u64),
            8 => self.read_u64(endian),
            other => Err(Error::corrupt(format!("unsupported field width {other}"))),
        }
    }

    pub fn read_offset(&mut self, width: Width) -> Result<u64> {
        self.read_uint(width, Endian::Little)
    }

    pub fn read_length(&mut self, width: Width) -> Result<u64> {
        self.read_uint(width, Endian::Little)
    }

    /// Read a NUL-terminated byte string (no length prefix).
    pub fn read_cstr(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let b = self.read_u8()?;
            if b == 0 {
                break;
            }
            out.push(b);
        }
        Ok(out)
    }
}
