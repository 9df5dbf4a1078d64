use std::io::{Seek, SeekFrom, Write};

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

use super::{Endian, Width};
use crate::Result;

/// Positioned writer over a random-access byte store.
/// Tracks the highest position ever written so the space allocator can
/// report end-of-file without a separate `stat` of the backing store.
pub struct ByteWriter<W> {
    inner: W,
    max_position: u64,
}

impl<W: Write + Seek> ByteWriter<W> {
    pub fn new(inner: W) -> ByteWriter<W> {
        ByteWriter {
            inner,
            max_position: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    pub fn seek_to(&mut self, pos: u64) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::Start(pos))?)
    }

    fn track(&mut self) -> Result<()> {
        let pos = self.position()?;
        if pos > self.max_position {
            self.max_position = pos;
        }
        Ok(())
    }

    /// Highest byte offset ever written through this writer.
    pub fn high_water_mark(&self) -> u64 {
        self.max_position
    }

    pub fn align(&mut self, n: u64) -> Result<()> {
        let pos = self.position()?;
        let rem = pos % n;
        if rem != 0 {
            self.write_bytes(&vec![0u8; (n - rem) as usize])?;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.track()?;
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.inner.write_u8(v)?;
        self.track()
    }

    pub fn write_u16(&mut self, v: u16, endian: Endian) -> Result<()> {
        match endian {
            Endian::Little => self.inner.write_u16::<LittleEndian>(v)?,
            Endian::Big => self.inner.write_u16::<BigEndian>(v)?,
        }
        self.track()
    }

    pub fn write_u32(&mut self, v: u32, endian: Endian) -> Result<()> {
        match endian {
            Endian::Little => self.inner.write_u32::<LittleEndian>(v)?,
            Endian::Big => self.inner.write_u32::<BigEndian>(v)?,
        }
        self.track()
    }

    pub fn write_u64(&mut self, v: u64, endian: Endian) -> Result<()> {
        match endian {
            Endian::Little => self.inner.write_u64::<LittleEndian>(v)?,
            Endian::Big => self.inner.write_u64::<BigEndian>(v)?,
        }
        self.track()
    }

    pub fn write_uint(&mut self, v: u64, width: Width, endian: Endian) -> Result<()> {
        match width.bytes() {
            2 => self.write_u16(v as u16, endian),
            4 => self.write_u32(v as u32, endian),
            8 => self.write_u64(v, endian),
            other => Err(crate::Error::invalid(format!("unsupported field width {other}"))),
        }
    }

    pub fn write_offset(&mut self, v: u64, width: Width) -> Result<()> {
        self.write_uint(v, width, Endian::Little)
    }

    pub fn write_length(&mut self, v: u64, width: Width) -> Result<()> {
        self.write_uint(v, width, Endian::Little)
    }

    pub fn write_cstr(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_bytes(bytes)?;
        self.write_u8(0)
    }
}
