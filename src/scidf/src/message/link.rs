//! Link-related messages: the v2 inline-link group-indexing style, plus the
//! two structural messages ("Link Info", "Group Info") that accompany it.

use std::io::{Read, Seek, Write};

use crate::io::{is_undefined_offset, undefined_offset, ByteReader, ByteWriter, Width};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Hard { object_header_addr: u64 },
    Soft { path: String },
    External { file: String, path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub target: LinkTarget,
}

impl Link {
    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>, offset_width: Width) -> Result<Link> {
        let version = reader.read_u8()?;
        if version != 1 {
            return Err(Error::UnsupportedVersion(version));
        }
        let flags = reader.read_u8()?;
        let link_type = if flags & 0x08 != 0 { reader.read_u8()? } else { 0 };
        if flags & 0x04 != 0 {
            reader.read_u64(crate::io::Endian::Little)?; // creation order, unused by the resolver
        }
        if flags & 0x10 != 0 {
            reader.read_u8()?; // charset, always treated as UTF-8
        }
        let name_len_size = 1usize << (flags & 0x03);
        let name_len = match name_len_size {
            1 => reader.read_u8()? as u64,
            2 => reader.read_u16(crate::io::Endian::Little)? as u64,
            4 => reader.read_u32(crate::io::Endian::Little)? as u64,
            8 => reader.read_u64(crate::io::Endian::Little)?,
            _ => unreachable!(),
        };
        let name_bytes = reader.read_exact_bytes(name_len as usize)?;
        let name = String::from_utf8_lossy(&name_bytes).into_owned();

        let target = match link_type {
            0 => LinkTarget::Hard { object_header_addr: reader.read_offset(offset_width)? },
            1 => {
                let len = reader.read_u16(crate::io::Endian::Little)?;
                let bytes = reader.read_exact_bytes(len as usize)?;
                LinkTarget::Soft { path: String::from_utf8_lossy(&bytes).into_owned() }
            }
            64 => {
                let len = reader.read_u16(crate::io::Endian::Little)?;
                let bytes = reader.read_exact_bytes(len as usize)?;
                let text = String::from_utf8_lossy(&bytes);
                let mut parts = text.splitn(2, '\0');
                let file = parts.next().unwrap_or_default().to_string();
                let path = parts.next().unwrap_or_default().to_string();
                LinkTarget::External { file, path }
            }
            other => return Err(Error::unsupported(format!("link type {other}"))),
        };

        Ok(Link { name, target })
    }

    pub fn serialize<W: Write + Seek>(&self, writer: &mut ByteWriter<W>, offset_width: Width) -> Result<()> {
        let link_type: u8 = match &self.target {
            LinkTarget::Hard { .. } => 0,
            LinkTarget::Soft { .. } => 1,
            LinkTarget::External { .. } => 64,
        };
        writer.write_u8(1)?; // version
        writer.write_u8(0x08 | 0x03)?; // flags: explicit link type present, 8-byte name length
        writer.write_u8(link_type)?;
        writer.write_u64(self.name.len() as u64, crate::io::Endian::Little)?;
        writer.write_bytes(self.name.as_bytes())?;
        match &self.target {
            LinkTarget::Hard { object_header_addr } => {
                writer.write_offset(*object_header_addr, offset_width)?;
            }
            LinkTarget::Soft { path } => {
                writer.write_u16(path.len() as u16, crate::io::Endian::Little)?;
                writer.write_bytes(path.as_bytes())?;
            }
            LinkTarget::External { file, path } => {
                let mut payload = file.as_bytes().to_vec();
                payload.push(0);
                payload.extend_from_slice(path.as_bytes());
                writer.write_u16(payload.len() as u16, crate::io::Endian::Little)?;
                writer.write_bytes(&payload)?;
            }
        }
        Ok(())
    }
}

/// Link Info message: points at the fractal
/// heap + B-tree name index a v2 group *could* use for very large
/// link counts. This crate's writer never produces dense storage
/// (every link it writes is an inline Link message), so both
/// addresses are always undefined on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub max_creation_index: Option<u64>,
    pub fractal_heap_addr: u64,
    pub name_btree_addr: u64,
}

impl LinkInfo {
    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>, offset_width: Width) -> Result<LinkInfo> {
        let version = reader.read_u8()?;
        if version != 0 {
            return Err(Error::UnsupportedVersion(version));
        }
        let flags = reader.read_u8()?;
        let max_creation_index = if flags & 0x01 != 0 { Some(reader.read_u64(crate::io::Endian::Little)?) } else { None };
        let fractal_heap_addr = reader.read_offset(offset_width)?;
        let name_btree_addr = reader.read_offset(offset_width)?;
        if flags & 0x02 != 0 {
            reader.skip(offset_width.bytes() as u64)?; // creation-order b-tree addr, unused
        }
        Ok(LinkInfo { max_creation_index, fractal_heap_addr, name_btree_addr })
    }

    pub fn serialize<W: Write + Seek>(&self, writer: &mut ByteWriter<W>, offset_width: Width) -> Result<()> {
        writer.write_u8(0)?; // version
        writer.write_u8(0)?; // flags: no creation-order tracking, no max index
        writer.write_offset(undefined_offset(offset_width), offset_width)?;
        writer.write_offset(undefined_offset(offset_width), offset_width)?;
        Ok(())
    }

    pub fn no_dense_storage(offset_width: Width) -> LinkInfo {
        LinkInfo {
            max_creation_index: None,
            fractal_heap_addr: undefined_offset(offset_width),
            name_btree_addr: undefined_offset(offset_width),
        }
    }

    pub fn has_dense_storage(&self, offset_width: Width) -> bool {
        !is_undefined_offset(self.fractal_heap_addr, offset_width)
    }
}

/// Group Info message: hints about expected
/// link count/name length. Purely advisory; this crate records
/// defaults and never relies on them for correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupInfo {
    pub max_compact_links: Option<u16>,
    pub est_num_entries: Option<u16>,
    pub est_link_name_len: Option<u16>,
}

impl GroupInfo {
    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>) -> Result<GroupInfo> {
        let version = reader.read_u8()?;
        if version != 0 {
            return Err(Error::UnsupportedVersion(version));
        }
        let flags = reader.read_u8()?;
        let mut info = GroupInfo::default();
        if flags & 0x01 != 0 {
            info.max_compact_links = Some(reader.read_u16(crate::io::Endian::Little)?);
            reader.skip(2)?; // min dense links, unused
        }
        if flags & 0x02 != 0 {
            info.est_num_entries = Some(reader.read_u16(crate::io::Endian::Little)?);
            info.est_link_name_len = Some(reader.read_u16(crate::io::Endian::Little)?);
        }
        Ok(info)
    }

    pub fn serialize<W: Write + Seek>(&self, writer: &mut ByteWriter<W>) -> Result<()> {
        writer.write_u8(0)?;
        writer.write_u8(0)?; // flags: no optional fields
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip_link(link: &Link) -> Link {
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(Cursor::new(&mut buf));
        link.serialize(&mut writer, Width::EIGHT).unwrap();
        let mut reader = ByteReader::new(Cursor::new(buf));
        Link::parse(&mut reader, Width::EIGHT).unwrap()
    }

    #[test]
    fn hard_link_roundtrips() {
        let link = Link { name: "data".into(), target: LinkTarget::Hard { object_header_addr: 4096 } };
        assert_eq!(roundtrip_link(&link), link);
    }

    #[test]
    fn soft_link_roundtrips() {
        let link = Link { name: "alias".into(), target: LinkTarget::Soft { path: "/real/data".into() } };
        assert_eq!(roundtrip_link(&link), link);
    }

    #[test]
    fn external_link_roundtrips() {
        let link = Link {
            name: "ext".into(),
            target: LinkTarget::External { file: "other.sci".into(), path: "/shared".into() },
        };
        assert_eq!(roundtrip_link(&link), link);
    }

    #[test]
    fn link_info_no_dense_storage_roundtrips() {
        let info = LinkInfo::no_dense_storage(Width::EIGHT);
        assert!(!info.has_dense_storage(Width::EIGHT));
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(Cursor::new(&mut buf));
        info.serialize(&mut writer, Width::EIGHT).unwrap();
        let mut reader = ByteReader::new(Cursor::new(buf));
        let parsed = LinkInfo::parse(&mut reader, Width::EIGHT).unwrap();
        assert_eq!(parsed, info);
    }
}
