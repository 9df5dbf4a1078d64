//! Group and chunk indices that live outside the object header itself:
//! the v1 B-tree + "SNOD" leaves used by old-style group symbol tables
//! (read-only),
//! and the fixed-array chunk index ("FAHD"/"FADB") used by this
//! crate's chunked dataset writer.

use std::io::{Read, Seek, Write};

use crate::heap::LocalHeap;
use crate::io::{ByteReader, ByteWriter, Endian, Width};
use crate::{Error, Result};

const BTREE_SIGNATURE: &[u8; 4] = b"TREE";
const SNOD_SIGNATURE: &[u8; 4] = b"SNOD";
const FAHD_SIGNATURE: &[u8; 4] = b"FAHD";
const FADB_SIGNATURE: &[u8; 4] = b"FADB";

/// One entry from a v1 group symbol table: a link name (resolved via
/// the group's local heap) and the object header it points to.
#[derive(Debug, Clone)]
pub struct SymbolTableEntry {
    pub name: String,
    pub object_header_addr: u64,
}

/// Walks a v1 B-tree of group-node type (node type 0) rooted at
/// `btree_addr`, resolving every leaf's symbol table entries against
/// `heap`.
pub fn read_group_btree<R: Read + Seek>(reader: &mut ByteReader<R>, btree_addr: u64, heap: &LocalHeap, offset_width: Width, length_width: Width) -> Result<Vec<SymbolTableEntry>> {
    let mut out = Vec::new();
    read_btree_node(reader, btree_addr, heap, offset_width, length_width, &mut out)?;
    Ok(out)
}

fn read_btree_node<R: Read + Seek>(
    reader: &mut ByteReader<R>,
    addr: u64,
    heap: &LocalHeap,
    offset_width: Width,
    length_width: Width,
    out: &mut Vec<SymbolTableEntry>,
) -> Result<()> {
    reader.seek_to(addr)?;
    let sig = reader.read_exact_bytes(4)?;
    if sig.as_slice() != BTREE_SIGNATURE {
        return Err(Error::corrupt("group B-tree signature mismatch"));
    }
    let node_type = reader.read_u8()?;
    if node_type != 0 {
        return Err(Error::unsupported("only group (type 0) v1 B-trees are supported"));
    }
    let node_level = reader.read_u8()?;
    let entries_used = reader.read_u16(Endian::Little)?;
    reader.skip(2 * offset_width.bytes() as u64)?; // left, right sibling addresses

    // key[0], then (child, key) pairs.
    reader.skip(length_width.bytes() as u64)?; // key 0 (unused: we read every child)
    let mut children = Vec::with_capacity(entries_used as usize);
    for _ in 0..entries_used {
        let child_addr = reader.read_offset(offset_width)?;
        children.push(child_addr);
        reader.skip(length_width.bytes() as u64)?; // key i
    }

    for child_addr in children {
        if node_level == 0 {
            read_snod(reader, child_addr, heap, offset_width, out)?;
        } else {
            read_btree_node(reader, child_addr, heap, offset_width, length_width, out)?;
        }
    }
    Ok(())
}

fn read_snod<R: Read + Seek>(reader: &mut ByteReader<R>, addr: u64, heap: &LocalHeap, offset_width: Width, out: &mut Vec<SymbolTableEntry>) -> Result<()> {
    reader.seek_to(addr)?;
    let sig = reader.read_exact_bytes(4)?;
    if sig.as_slice() != SNOD_SIGNATURE {
        return Err(Error::corrupt("symbol table node signature mismatch"));
    }
    let version = reader.read_u8()?;
    if version != 1 {
        return Err(Error::UnsupportedVersion(version));
    }
    reader.skip(1)?; // reserved
    let num_symbols = reader.read_u16(Endian::Little)?;
    for _ in 0..num_symbols {
        let name_offset = reader.read_offset(offset_width)?;
        let object_header_addr = reader.read_offset(offset_width)?;
        let _cache_type = reader.read_u32(Endian::Little)?;
        reader.skip(4)?; // reserved
        reader.skip(16)?; // scratch-pad
        let name = heap.get_string(name_offset)?;
        out.push(SymbolTableEntry { name, object_header_addr });
    }
    Ok(())
}

/// One page of a fixed-array chunk index: a flat list of chunk
/// addresses, index == chunk's row-major position.
#[derive(Debug, Clone, Default)]
pub struct FixedArrayIndex {
    pub chunk_addrs: Vec<u64>,
}

impl FixedArrayIndex {
    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>, header_addr: u64, offset_width: Width) -> Result<FixedArrayIndex> {
        reader.seek_to(header_addr)?;
        let sig = reader.read_exact_bytes(4)?;
        if sig.as_slice() != FAHD_SIGNATURE {
            return Err(Error::corrupt("fixed array header signature mismatch"));
        }
        let version = reader.read_u8()?;
        if version != 0 {
            return Err(Error::UnsupportedVersion(version));
        }
        reader.skip(1)?; // client id
        reader.skip(1)?; // entry size
        reader.skip(1)?; // page bits
        let entries_count = reader.read_length(offset_width)?;
        let data_block_addr = reader.read_offset(offset_width)?;

        reader.seek_to(data_block_addr)?;
        let sig = reader.read_exact_bytes(4)?;
        if sig.as_slice() != FADB_SIGNATURE {
            return Err(Error::corrupt("fixed array data block signature mismatch"));
        }
        let version = reader.read_u8()?;
        if version != 0 {
            return Err(Error::UnsupportedVersion(version));
        }
        reader.skip(1)?; // client id
        reader.skip(offset_width.bytes() as u64)?; // header address back-pointer

        let mut chunk_addrs = Vec::with_capacity(entries_count as usize);
        for _ in 0..entries_count {
            chunk_addrs.push(reader.read_offset(offset_width)?);
        }
        Ok(FixedArrayIndex { chunk_addrs })
    }

    pub fn write<W: Write + Seek>(&self, writer: &mut ByteWriter<W>, header_addr: u64, data_block_addr: u64, offset_width: Width) -> Result<u64> {
        writer.seek_to(data_block_addr)?;
        writer.write_bytes(FADB_SIGNATURE)?;
        writer.write_u8(0)?; // version
        writer.write_u8(0)?; // client id
        writer.write_offset(header_addr, offset_width)?;
        for addr in &self.chunk_addrs {
            writer.write_offset(*addr, offset_width)?;
        }
        let data_block_end = writer.position()?;

        writer.seek_to(header_addr)?;
        writer.write_bytes(FAHD_SIGNATURE)?;
        writer.write_u8(0)?; // version
        writer.write_u8(0)?; // client id
        writer.write_u8(offset_width.bytes())?; // entry size
        writer.write_u8(0)?; // page bits: single page, no paging
        writer.write_length(self.chunk_addrs.len() as u64, offset_width)?;
        writer.write_offset(data_block_addr, offset_width)?;

        Ok(data_block_end)
    }

    pub fn header_size(offset_width: Width) -> u64 {
        4 + 1 + 1 + 1 + 1 + offset_width.bytes() as u64 + offset_width.bytes() as u64
    }

    pub fn data_block_size(&self, offset_width: Width) -> u64 {
        4 + 1 + 1 + offset_width.bytes() as u64 + self.chunk_addrs.len() as u64 * offset_width.bytes() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn fixed_array_roundtrips() {
        let index = FixedArrayIndex { chunk_addrs: vec![1000, 2000, 3000, 4000] };
        let header_addr = 0u64;
        let data_block_addr = FixedArrayIndex::header_size(Width::EIGHT);
        let mut buf = vec![0u8; 4096];
        {
            let mut writer = ByteWriter::new(Cursor::new(&mut buf));
            index.write(&mut writer, header_addr, data_block_addr, Width::EIGHT).unwrap();
        }
        let cursor = Cursor::new(buf);
        let mut reader = ByteReader::new(cursor);
        let parsed = FixedArrayIndex::parse(&mut reader, header_addr, Width::EIGHT).unwrap();
        assert_eq!(parsed.chunk_addrs, index.chunk_addrs);
    }

    #[test]
    fn group_btree_resolves_entries_via_heap() {
        let mut heap = LocalHeap::default();
        let off_a = heap.add_string("alpha");
        let off_b = heap.add_string("beta");

        let mut buf = vec![0u8; 4096];
        let snod_addr = 512u64;
        {
            let mut writer = ByteWriter::new(Cursor::new(&mut buf));
            writer.seek_to(snod_addr).unwrap();
            writer.write_bytes(SNOD_SIGNATURE).unwrap();
            writer.write_u8(1).unwrap();
            writer.write_u8(0).unwrap();
            writer.write_u16(2, Endian::Little).unwrap();
            writer.write_offset(off_a, Width::EIGHT).unwrap();
            writer.write_offset(100, Width::EIGHT).unwrap();
            writer.write_u32(0, Endian::Little).unwrap();
            writer.write_bytes(&[0, 0, 0, 0]).unwrap();
            writer.write_bytes(&[0u8; 16]).unwrap();
            writer.write_offset(off_b, Width::EIGHT).unwrap();
            writer.write_offset(200, Width::EIGHT).unwrap();
            writer.write_u32(0, Endian::Little).unwrap();
            writer.write_bytes(&[0, 0, 0, 0]).unwrap();
            writer.write_bytes(&[0u8; 16]).unwrap();

            let btree_addr = 0u64;
            writer.seek_to(btree_addr).unwrap();
            writer.write_bytes(BTREE_SIGNATURE).unwrap();
            writer.write_u8(0).unwrap(); // node type: group
            writer.write_u8(0).unwrap(); // node level: leaf
            writer.write_u16(1, Endian::Little).unwrap(); // entries used
            writer.write_offset(crate::io::undefined_offset(Width::EIGHT), Width::EIGHT).unwrap();
            writer.write_offset(crate::io::undefined_offset(Width::EIGHT), Width::EIGHT).unwrap();
            writer.write_length(0, Width::EIGHT).unwrap(); // key 0
            writer.write_offset(snod_addr, Width::EIGHT).unwrap();
            writer.write_length(0, Width::EIGHT).unwrap(); // key 1
        }

        let cursor = Cursor::new(buf);
        let mut reader = ByteReader::new(cursor);
        let entries = read_group_btree(&mut reader, 0, &heap, Width::EIGHT, Width::EIGHT).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "alpha");
        assert_eq!(entries[0].object_header_addr, 100);
        assert_eq!(entries[1].name, "beta");
        assert_eq!(entries[1].object_header_addr, 200);
    }
}
