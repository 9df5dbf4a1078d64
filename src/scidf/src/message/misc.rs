//! The remaining object header messages: Fill Value, Symbol Table
//! (v1 group indexing), Object Header Continuation, and Attribute Info.

use std::io::{Read, Seek, Write};

use crate::io::{ByteReader, ByteWriter, Width};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FillValue {
    pub defined: bool,
    pub value: Vec<u8>,
}

impl FillValue {
    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>) -> Result<FillValue> {
        let version = reader.read_u8()?;
        if !(2..=3).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }
        if version == 2 {
            reader.skip(2)?; // space allocation time, fill value write time
            let defined = reader.read_u8()? != 0;
            if defined {
                let size = reader.read_u32(crate::io::Endian::Little)?;
                let value = reader.read_exact_bytes(size as usize)?;
                Ok(FillValue { defined, value })
            } else {
                Ok(FillValue { defined: false, value: Vec::new() })
            }
        } else {
            let flags = reader.read_u8()?;
            let defined = flags & 0x20 != 0;
            if defined {
                let size = reader.read_u32(crate::io::Endian::Little)?;
                let value = reader.read_exact_bytes(size as usize)?;
                Ok(FillValue { defined, value })
            } else {
                Ok(FillValue { defined: false, value: Vec::new() })
            }
        }
    }

    pub fn serialize<W: Write + Seek>(&self, writer: &mut ByteWriter<W>) -> Result<()> {
        writer.write_u8(3)?; // version
        let flags: u8 = if self.defined { 0x20 } else { 0x00 };
        writer.write_u8(flags)?;
        if self.defined {
            writer.write_u32(self.value.len() as u32, crate::io::Endian::Little)?;
            writer.write_bytes(&self.value)?;
        }
        Ok(())
    }
}

/// Symbol Table message: the v1
/// group-indexing style, pointing at a B-tree of "SNOD" leaves plus
/// the local heap holding their link names. Read-only in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTable {
    pub btree_addr: u64,
    pub local_heap_addr: u64,
}

impl SymbolTable {
    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>, offset_width: Width) -> Result<SymbolTable> {
        let btree_addr = reader.read_offset(offset_width)?;
        let local_heap_addr = reader.read_offset(offset_width)?;
        Ok(SymbolTable { btree_addr, local_heap_addr })
    }

    pub fn serialize<W: Write + Seek>(&self, writer: &mut ByteWriter<W>, offset_width: Width) -> Result<()> {
        writer.write_offset(self.btree_addr, offset_width)?;
        writer.write_offset(self.local_heap_addr, offset_width)?;
        Ok(())
    }
}

/// Object Header Continuation message: points at another
/// chunk ("OCHK" for v2 headers, a raw continuation block for v1)
/// holding the rest of this object's messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Continuation {
    pub addr: u64,
    pub length: u64,
}

impl Continuation {
    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>, offset_width: Width, length_width: Width) -> Result<Continuation> {
        let addr = reader.read_offset(offset_width)?;
        let length = reader.read_length(length_width)?;
        Ok(Continuation { addr, length })
    }

    pub fn serialize<W: Write + Seek>(&self, writer: &mut ByteWriter<W>, offset_width: Width, length_width: Width) -> Result<()> {
        writer.write_offset(self.addr, offset_width)?;
        writer.write_length(self.length, length_width)?;
        Ok(())
    }
}

/// Attribute Info message: like Link
/// Info, but for dense attribute storage. This crate always keeps
/// attributes as inline Attribute messages, so it's parsed for
/// compatibility but never emitted with dense addresses set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeInfo {
    pub fractal_heap_addr: u64,
    pub name_btree_addr: u64,
}

impl AttributeInfo {
    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>, offset_width: Width) -> Result<AttributeInfo> {
        let version = reader.read_u8()?;
        if version != 0 {
            return Err(Error::UnsupportedVersion(version));
        }
        let flags = reader.read_u8()?;
        if flags & 0x01 != 0 {
            reader.skip(2)?; // max creation index
        }
        let fractal_heap_addr = reader.read_offset(offset_width)?;
        let name_btree_addr = reader.read_offset(offset_width)?;
        Ok(AttributeInfo { fractal_heap_addr, name_btree_addr })
    }

    pub fn serialize<W: Write + Seek>(&self, writer: &mut ByteWriter<W>, offset_width: Width) -> Result<()> {
        writer.write_u8(0)?;
        writer.write_u8(0)?;
        writer.write_offset(self.fractal_heap_addr, offset_width)?;
        writer.write_offset(self.name_btree_addr, offset_width)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn fill_value_defined_roundtrips() {
        let fv = FillValue { defined: true, value: vec![1, 2, 3, 4] };
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(Cursor::new(&mut buf));
        fv.serialize(&mut writer).unwrap();
        let mut reader = ByteReader::new(Cursor::new(buf));
        assert_eq!(FillValue::parse(&mut reader).unwrap(), fv);
    }

    #[test]
    fn fill_value_undefined_roundtrips() {
        let fv = FillValue::default();
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(Cursor::new(&mut buf));
        fv.serialize(&mut writer).unwrap();
        let mut reader = ByteReader::new(Cursor::new(buf));
        assert_eq!(FillValue::parse(&mut reader).unwrap(), fv);
    }

    #[test]
    fn symbol_table_roundtrips() {
        let st = SymbolTable { btree_addr: 100, local_heap_addr: 200 };
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(Cursor::new(&mut buf));
        st.serialize(&mut writer, Width::EIGHT).unwrap();
        let mut reader = ByteReader::new(Cursor::new(buf));
        assert_eq!(SymbolTable::parse(&mut reader, Width::EIGHT).unwrap(), st);
    }
}
