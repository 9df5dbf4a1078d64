//! Dataspace message: the shape of a dataset
//! or attribute — a dimensionality and, for simple dataspaces, current
//! and (optionally) maximum extents per dimension.

use std::io::{Read, Seek, Write};

use crate::io::{is_undefined_offset, undefined_offset, ByteReader, ByteWriter, Endian, Width};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Dataspace {
    Scalar,
    Simple { dims: Vec<u64>, max_dims: Option<Vec<u64>> },
}

impl Dataspace {
    pub fn element_count(&self) -> u64 {
        match self {
            Dataspace::Scalar => 1,
            Dataspace::Simple { dims, .. } => dims.iter().product(),
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            Dataspace::Scalar => 0,
            Dataspace::Simple { dims, .. } => dims.len(),
        }
    }

    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>, offset_width: Width) -> Result<Dataspace> {
        let version = reader.read_u8()?;
        if !(1..=2).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }
        let rank = reader.read_u8()?;
        let flags = reader.read_u8()?;
        let has_max_dims = flags & 0x01 != 0;

        if version == 1 {
            reader.skip(1)?; // reserved
            reader.skip(4)?; // reserved
        } else {
            let dataspace_type = reader.read_u8()?;
            if dataspace_type == 0 && rank == 0 {
                return Ok(Dataspace::Scalar);
            }
        }

        if rank == 0 {
            return Ok(Dataspace::Scalar);
        }

        let mut dims = Vec::with_capacity(rank as usize);
        for _ in 0..rank {
            dims.push(reader.read_length(offset_width)?);
        }
        let max_dims = if has_max_dims {
            let mut m = Vec::with_capacity(rank as usize);
            for _ in 0..rank {
                let v = reader.read_length(offset_width)?;
                m.push(v);
            }
            Some(m)
        } else {
            None
        };

        Ok(Dataspace::Simple { dims, max_dims })
    }

    pub fn serialize<W: Write + Seek>(&self, writer: &mut ByteWriter<W>, offset_width: Width) -> Result<()> {
        writer.write_u8(2)?; // version
        match self {
            Dataspace::Scalar => {
                writer.write_u8(0)?; // rank
                writer.write_u8(0)?; // flags
                writer.write_u8(0)?; // dataspace type: scalar
            }
            Dataspace::Simple { dims, max_dims } => {
                writer.write_u8(dims.len() as u8)?;
                let flags = if max_dims.is_some() { 0x01 } else { 0x00 };
                writer.write_u8(flags)?;
                writer.write_u8(1)?; // dataspace type: simple
                for d in dims {
                    writer.write_length(*d, offset_width)?;
                }
                if let Some(m) = max_dims {
                    for v in m {
                        writer.write_length(*v, offset_width)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn unlimited(width: Width) -> u64 {
        undefined_offset(width)
    }

    pub fn is_unlimited(dim: u64, width: Width) -> bool {
        is_undefined_offset(dim, width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(ds: &Dataspace) -> Dataspace {
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(Cursor::new(&mut buf));
        ds.serialize(&mut writer, Width::EIGHT).unwrap();
        let mut reader = ByteReader::new(Cursor::new(buf));
        Dataspace::parse(&mut reader, Width::EIGHT).unwrap()
    }

    #[test]
    fn scalar_roundtrips() {
        assert_eq!(roundtrip(&Dataspace::Scalar), Dataspace::Scalar);
    }

    #[test]
    fn simple_roundtrips() {
        let ds = Dataspace::Simple { dims: vec![3, 4], max_dims: None };
        assert_eq!(roundtrip(&ds), ds);
    }

    #[test]
    fn simple_with_max_dims_roundtrips() {
        let ds = Dataspace::Simple { dims: vec![3], max_dims: Some(vec![Dataspace::unlimited(Width::EIGHT)]) };
        assert_eq!(roundtrip(&ds), ds);
    }
}
