//! Superblock: the fixed entry point of the container,
//! located by scanning for an 8-byte signature at offsets 0, 512,
//! 1024, 2048, ... (doubling). This crate only ever *writes* the
//! compact v2/v3 layout; it reads v0/v1 (the pre-locator layout with a
//! symbol-table root and separate free-space/driver-info fields) for
//! compatibility with files produced elsewhere.

use std::io::{Read, Seek, Write};

use crate::checksum::lookup3;
use crate::io::{is_undefined_offset, undefined_offset, ByteReader, ByteWriter, Endian, Width};
use crate::{Error, Result};

pub const SIGNATURE: &[u8; 8] = b"\x89SCI\r\n\x1a\n";

/// Where the root group's structure lives, depending on superblock
/// version.
#[derive(Debug, Clone, Copy)]
pub enum RootLocator {
    /// v0/v1: address of the root group's symbol table entry.
    SymbolTableEntry { object_header_addr: u64, btree_addr: u64, local_heap_addr: u64 },
    /// v2/v3: direct address of the root group's object header.
    ObjectHeader { addr: u64 },
}

#[derive(Debug, Clone)]
pub struct Superblock {
    pub version: u8,
    pub offset_width: Width,
    pub length_width: Width,
    pub base_addr: u64,
    pub eof_addr: u64,
    pub root: RootLocator,
}

impl Superblock {
    /// Locates and parses the superblock, trying candidate offsets in
    /// the doubling sequence the format specifies.
    pub fn locate<R: Read + Seek>(reader: &mut ByteReader<R>) -> Result<Superblock> {
        let mut candidate = 0u64;
        loop {
            reader.seek_to(candidate)?;
            if let Ok(sig) = reader.peek(8) {
                if sig.as_slice() == SIGNATURE {
                    return Superblock::parse_at(reader, candidate);
                }
            } else {
                break;
            }
            if candidate == 0 {
                candidate = 512;
            } else {
                candidate *= 2;
            }
            if candidate > 1 << 30 {
                break;
            }
        }
        Err(Error::NotAContainer)
    }

    fn parse_at<R: Read + Seek>(reader: &mut ByteReader<R>, base_addr: u64) -> Result<Superblock> {
        reader.seek_to(base_addr)?;
        reader.skip(8)?; // signature, already matched
        let version = reader.read_u8()?;
        match version {
            0 | 1 => Self::parse_v0_v1(reader, base_addr, version),
            2 | 3 => Self::parse_v2_v3(reader, base_addr, version),
            other => Err(Error::UnsupportedVersion(other)),
        }
    }

    fn parse_v0_v1<R: Read + Seek>(reader: &mut ByteReader<R>, base_addr: u64, version: u8) -> Result<Superblock> {
        reader.skip(1)?; // free-space version
        reader.skip(1)?; // root group symbol table version
        reader.skip(1)?; // reserved
        reader.skip(1)?; // shared header message format version
        let offset_size = reader.read_u8()?;
        let length_size = reader.read_u8()?;
        reader.skip(1)?; // reserved
        reader.skip(2)?; // group leaf node K
        reader.skip(2)?; // group internal node K
        reader.skip(4)?; // file consistency flags
        if version == 1 {
            reader.skip(2)?; // indexed storage internal node K
            reader.skip(2)?; // reserved
        }

        let offset_width = Width::new(offset_size)?;
        let length_width = Width::new(length_size)?;

        let _base_addr_field = reader.read_offset(offset_width)?;
        let _free_space_addr = reader.read_offset(offset_width)?;
        let eof_addr = reader.read_offset(offset_width)?;
        let _driver_info_addr = reader.read_offset(offset_width)?;

        // Root group symbol table entry: link name offset, object
        // header address, cache type, reserved, scratch (btree + heap).
        reader.skip(offset_width.bytes() as u64)?; // link name offset
        let object_header_addr = reader.read_offset(offset_width)?;
        let cache_type = reader.read_u32(Endian::Little)?;
        reader.skip(4)?; // reserved
        let scratch = reader.read_exact_bytes(16)?;
        let (btree_addr, local_heap_addr) = if cache_type == 1 {
            let mut sc = ByteReader::new(std::io::Cursor::new(scratch));
            let b = sc.read_offset(offset_width)?;
            let h = sc.read_offset(offset_width)?;
            (b, h)
        } else {
            (undefined_offset(offset_width), undefined_offset(offset_width))
        };

        Ok(Superblock {
            version,
            offset_width,
            length_width,
            base_addr,
            eof_addr,
            root: RootLocator::SymbolTableEntry { object_header_addr, btree_addr, local_heap_addr },
        })
    }

    fn parse_v2_v3<R: Read + Seek>(reader: &mut ByteReader<R>, base_addr: u64, version: u8) -> Result<Superblock> {
        let offset_size = reader.read_u8()?;
        let length_size = reader.read_u8()?;
        let _file_consistency_flags = reader.read_u8()?;

        let offset_width = Width::new(offset_size)?;
        let length_width = Width::new(length_size)?;

        let base_addr_field = reader.read_offset(offset_width)?;
        let _ext_addr = reader.read_offset(offset_width)?;
        let eof_addr = reader.read_offset(offset_width)?;
        let root_object_header_addr = reader.read_offset(offset_width)?;

        let body_end = reader.position()?;
        let body_start = base_addr;
        reader.seek_to(body_start)?;
        let body = reader.read_exact_bytes((body_end - body_start) as usize)?;
        let stored_checksum = reader.read_u32(Endian::Little)?;
        let computed = lookup3(&body);
        if computed != stored_checksum {
            return Err(Error::corrupt("superblock checksum mismatch"));
        }

        if base_addr_field != base_addr && !is_undefined_offset(base_addr_field, offset_width) {
            // Some writers record the base address relative to itself;
            // tolerate either convention rather than rejecting the file.
        }

        Ok(Superblock {
            version,
            offset_width,
            length_width,
            base_addr,
            eof_addr,
            root: RootLocator::ObjectHeader { addr: root_object_header_addr },
        })
    }

    /// Size in bytes of the v2/v3 superblock this crate writes,
    /// including its trailing checksum.
    pub fn v3_size(offset_width: Width) -> u64 {
        8 + 1 + 1 + 1 + 1 + 4 * offset_width.bytes() as u64 + 4
    }

    /// Writes a v3 superblock at offset 0. `root_addr` should be the
    /// final address of the root group's object header; callers that
    /// don't know it yet (first pass) can pass `undefined_offset` and
    /// rewrite at flush time once it is known.
    pub fn write_v3<W: Write + Seek>(
        writer: &mut ByteWriter<W>,
        offset_width: Width,
        length_width: Width,
        eof_addr: u64,
        root_addr: u64,
    ) -> Result<()> {
        writer.seek_to(0)?;
        writer.write_bytes(SIGNATURE)?;
        writer.write_u8(3)?;
        writer.write_u8(offset_width.bytes())?;
        writer.write_u8(length_width.bytes())?;
        writer.write_u8(0)?; // file consistency flags
        writer.write_offset(0, offset_width)?; // base address
        writer.write_offset(undefined_offset(offset_width), offset_width)?; // extension addr
        writer.write_offset(eof_addr, offset_width)?;
        writer.write_offset(root_addr, offset_width)?;

        let body_len = Self::v3_size(offset_width) - 4;
        writer.seek_to(0)?;
        let body = {
            let mut buf = Vec::new();
            let mut tmp = ByteWriter::new(std::io::Cursor::new(&mut buf));
            tmp.write_bytes(SIGNATURE)?;
            tmp.write_u8(3)?;
            tmp.write_u8(offset_width.bytes())?;
            tmp.write_u8(length_width.bytes())?;
            tmp.write_u8(0)?;
            tmp.write_offset(0, offset_width)?;
            tmp.write_offset(undefined_offset(offset_width), offset_width)?;
            tmp.write_offset(eof_addr, offset_width)?;
            tmp.write_offset(root_addr, offset_width)?;
            buf
        };
        debug_assert_eq!(body.len() as u64, body_len);
        let checksum = lookup3(&body);
        writer.seek_to(body_len)?;
        writer.write_u32(checksum, Endian::Little)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn v3_roundtrips() {
        let mut buf = vec![0u8; 256];
        {
            let mut writer = ByteWriter::new(Cursor::new(&mut buf));
            Superblock::write_v3(&mut writer, Width::EIGHT, Width::EIGHT, 256, 48).unwrap();
        }
        let cursor = Cursor::new(buf);
        let mut reader = ByteReader::new(cursor);
        let sb = Superblock::locate(&mut reader).unwrap();
        assert_eq!(sb.version, 3);
        assert_eq!(sb.eof_addr, 256);
        match sb.root {
            RootLocator::ObjectHeader { addr } => assert_eq!(addr, 48),
            _ => panic!("expected ObjectHeader locator"),
        }
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut buf = vec![0u8; 256];
        {
            let mut writer = ByteWriter::new(Cursor::new(&mut buf));
            Superblock::write_v3(&mut writer, Width::EIGHT, Width::EIGHT, 256, 48).unwrap();
        }
        buf[10] ^= 0xFF; // corrupt a body byte without touching the checksum
        let cursor = Cursor::new(buf);
        let mut reader = ByteReader::new(cursor);
        assert!(Superblock::locate(&mut reader).is_err());
    }

    #[test]
    fn missing_signature_is_not_a_container() {
        let buf = vec![0u8; 4096];
        let cursor = Cursor::new(buf);
        let mut reader = ByteReader::new(cursor);
        assert!(matches!(Superblock::locate(&mut reader), Err(Error::NotAContainer)));
    }
}
