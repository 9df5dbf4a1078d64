//! Attribute message: a named, self-contained
//! datatype + dataspace + raw value payload attached to an object
//! header. Unlike dataset storage, attribute data always lives inline
//! in the message — no separate layout or filter pipeline.

use std::io::{Read, Seek, Write};

use crate::datatype::{decode_elements, encode_fixed_element, Datatype, HeapResolver};
use crate::io::{ByteReader, ByteWriter, Width};
use crate::message::dataspace::Dataspace;
use crate::{Error, Result, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    pub raw: Vec<u8>,
}

impl Attribute {
    pub fn scalar(name: impl Into<String>, datatype: Datatype, value: &Value) -> Result<Attribute> {
        let raw = encode_fixed_element(&datatype, value)?;
        Ok(Attribute { name: name.into(), datatype, dataspace: Dataspace::Scalar, raw })
    }

    pub fn values(&self, heap: &mut dyn HeapResolver) -> Result<Vec<Value>> {
        decode_elements(&self.datatype, &self.raw, self.dataspace.element_count() as usize, heap)
    }

    pub fn value(&self, heap: &mut dyn HeapResolver) -> Result<Value> {
        let mut v = self.values(heap)?;
        if v.len() != 1 {
            return Err(Error::wrong_kind("attribute is not scalar"));
        }
        Ok(v.remove(0))
    }

    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>, offset_width: Width) -> Result<Attribute> {
        let version = reader.read_u8()?;
        if !(1..=3).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }
        let flags = if version >= 3 { reader.read_u8()? } else { reader.read_u8()? };
        let _ = flags;
        let name_size = reader.read_u16(crate::io::Endian::Little)?;
        let datatype_size = reader.read_u16(crate::io::Endian::Little)?;
        let dataspace_size = reader.read_u16(crate::io::Endian::Little)?;
        if version >= 3 {
            reader.read_u8()?; // name charset, always treated as UTF-8
        }

        let name_bytes = reader.read_exact_bytes(name_size as usize)?;
        if version < 3 {
            let pad = (8 - name_size as usize % 8) % 8;
            reader.skip(pad as u64)?;
        }
        let name = String::from_utf8_lossy(&name_bytes).trim_end_matches('\0').to_string();

        let dt_start = reader.position()?;
        let datatype = Datatype::parse(reader)?;
        reader.seek_to(dt_start + datatype_size as u64)?;
        if version < 3 {
            let pad = (8 - datatype_size as usize % 8) % 8;
            reader.skip(pad as u64)?;
        }

        let ds_start = reader.position()?;
        let dataspace = Dataspace::parse(reader, offset_width)?;
        reader.seek_to(ds_start + dataspace_size as u64)?;
        if version < 3 {
            let pad = (8 - dataspace_size as usize % 8) % 8;
            reader.skip(pad as u64)?;
        }

        let raw_len = dataspace.element_count() * datatype.size() as u64;
        let raw = reader.read_exact_bytes(raw_len as usize)?;

        Ok(Attribute { name, datatype, dataspace, raw })
    }

    pub fn serialize<W: Write + Seek>(&self, writer: &mut ByteWriter<W>, offset_width: Width) -> Result<()> {
        writer.write_u8(3)?; // version
        writer.write_u8(0)?; // flags
        let name_bytes = self.name.as_bytes();
        writer.write_u16(name_bytes.len() as u16 + 1, crate::io::Endian::Little)?;

        let datatype_bytes = {
            let mut buf = Vec::new();
            let mut tmp = ByteWriter::new(std::io::Cursor::new(&mut buf));
            self.datatype.serialize(&mut tmp)?;
            buf
        };
        writer.write_u16(datatype_bytes.len() as u16, crate::io::Endian::Little)?;

        let dataspace_bytes = {
            let mut buf = Vec::new();
            let mut tmp = ByteWriter::new(std::io::Cursor::new(&mut buf));
            self.dataspace.serialize(&mut tmp, offset_width)?;
            buf
        };
        writer.write_u16(dataspace_bytes.len() as u16, crate::io::Endian::Little)?;
        writer.write_u8(1)?; // name charset: UTF-8

        writer.write_cstr(name_bytes)?;
        writer.write_bytes(&datatype_bytes)?;
        writer.write_bytes(&dataspace_bytes)?;
        writer.write_bytes(&self.raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::NoHeap;
    use std::io::Cursor;

    #[test]
    fn scalar_i32_attribute_roundtrips() {
        let attr = Attribute::scalar("count", Datatype::i32_le(), &Value::I32(42)).unwrap();
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(Cursor::new(&mut buf));
        attr.serialize(&mut writer, Width::EIGHT).unwrap();
        let mut reader = ByteReader::new(Cursor::new(buf));
        let parsed = Attribute::parse(&mut reader, Width::EIGHT).unwrap();
        assert_eq!(parsed.name, "count");
        assert_eq!(parsed.value(&mut NoHeap).unwrap(), Value::I32(42));
    }

    #[test]
    fn fixed_string_array_attribute_roundtrips() {
        use crate::datatype::StringPadding;
        let dt = Datatype::fixed_string(8, StringPadding::NullPad);
        let mut raw = Vec::new();
        for s in ["red", "green", "blue"] {
            raw.extend_from_slice(&crate::datatype::encode_fixed_element(&dt, &Value::Str(s.to_string())).unwrap());
        }
        let attr = Attribute {
            name: "colors".into(),
            datatype: dt,
            dataspace: Dataspace::Simple { dims: vec![3], max_dims: None },
            raw,
        };
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(Cursor::new(&mut buf));
        attr.serialize(&mut writer, Width::EIGHT).unwrap();
        let mut reader = ByteReader::new(Cursor::new(buf));
        let parsed = Attribute::parse(&mut reader, Width::EIGHT).unwrap();
        let values = parsed.values(&mut NoHeap).unwrap();
        assert_eq!(values, vec![
            Value::Str("red".into()),
            Value::Str("green".into()),
            Value::Str("blue".into()),
        ]);
    }
}
