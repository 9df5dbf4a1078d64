//! Data layout message: where a
//! dataset's raw element bytes physically live — contiguous, a single
//! implicit chunk, or a chunk index (fixed-array or v1 B-tree).

use std::io::{Read, Seek, Write};

use crate::io::{undefined_offset, ByteReader, ByteWriter, Width};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkIndex {
    /// A single chunk covering the whole (fixed-size) dataspace.
    Implicit,
    /// "FAHD"/"FADB" fixed-array index.
    FixedArray { header_addr: u64 },
    /// "TREE" v1 B-tree index, read-only.
    BTreeV1 { root_addr: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    Contiguous { addr: u64, size: u64 },
    Chunked { dims: Vec<u32>, index: ChunkIndex, addr: u64 },
}

impl DataLayout {
    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>, offset_width: Width, length_width: Width) -> Result<DataLayout> {
        let version = reader.read_u8()?;
        if version != 4 {
            return Err(Error::UnsupportedVersion(version));
        }
        let class = reader.read_u8()?;
        match class {
            0 => {
                // Contiguous, unallocated (no address/size recorded).
                Ok(DataLayout::Contiguous { addr: undefined_offset(offset_width), size: 0 })
            }
            1 => {
                let addr = reader.read_offset(offset_width)?;
                let size = reader.read_length(length_width)?;
                Ok(DataLayout::Contiguous { addr, size })
            }
            2 => {
                let rank = reader.read_u8()?;
                let index_kind = reader.read_u8()?;
                let mut dims = Vec::with_capacity(rank as usize);
                for _ in 0..rank {
                    dims.push(reader.read_u32(crate::io::Endian::Little)?);
                }
                let addr = reader.read_offset(offset_width)?;
                let index = match index_kind {
                    0 => ChunkIndex::Implicit,
                    1 => ChunkIndex::FixedArray { header_addr: addr },
                    2 => ChunkIndex::BTreeV1 { root_addr: addr },
                    other => return Err(Error::unsupported(format!("chunk index kind {other}"))),
                };
                Ok(DataLayout::Chunked { dims, index, addr })
            }
            other => Err(Error::unsupported(format!("data layout class {other}"))),
        }
    }

    pub fn serialize<W: Write + Seek>(&self, writer: &mut ByteWriter<W>, offset_width: Width, length_width: Width) -> Result<()> {
        writer.write_u8(4)?; // version
        match self {
            DataLayout::Contiguous { addr, size } => {
                writer.write_u8(1)?;
                writer.write_offset(*addr, offset_width)?;
                writer.write_length(*size, length_width)?;
            }
            DataLayout::Chunked { dims, index, addr } => {
                writer.write_u8(2)?;
                writer.write_u8(dims.len() as u8)?;
                let kind = match index {
                    ChunkIndex::Implicit => 0u8,
                    ChunkIndex::FixedArray { .. } => 1,
                    ChunkIndex::BTreeV1 { .. } => 2,
                };
                writer.write_u8(kind)?;
                for d in dims {
                    writer.write_u32(*d, crate::io::Endian::Little)?;
                }
                writer.write_offset(*addr, offset_width)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(layout: &DataLayout) -> DataLayout {
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(Cursor::new(&mut buf));
        layout.serialize(&mut writer, Width::EIGHT, Width::EIGHT).unwrap();
        let mut reader = ByteReader::new(Cursor::new(buf));
        DataLayout::parse(&mut reader, Width::EIGHT, Width::EIGHT).unwrap()
    }

    #[test]
    fn contiguous_roundtrips() {
        let layout = DataLayout::Contiguous { addr: 128, size: 256 };
        assert_eq!(roundtrip(&layout), layout);
    }

    #[test]
    fn chunked_implicit_roundtrips() {
        let layout = DataLayout::Chunked { dims: vec![10, 10], index: ChunkIndex::Implicit, addr: 64 };
        assert_eq!(roundtrip(&layout), layout);
    }

    #[test]
    fn chunked_fixed_array_roundtrips() {
        let layout = DataLayout::Chunked { dims: vec![4], index: ChunkIndex::FixedArray { header_addr: 512 }, addr: 512 };
        assert_eq!(roundtrip(&layout), layout);
    }
}
