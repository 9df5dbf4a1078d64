//! Filter pipeline message: an ordered
//! list of filters applied to each chunk before it hits disk, applied
//! in reverse on read. Deflate and shuffle are general-purpose;
//! Fletcher-32 is an integrity check appended last.

use std::io::{Read, Seek, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::checksum::fletcher32;
use crate::io::{ByteReader, ByteWriter, Endian};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Deflate { level: u8 },
    Shuffle { element_size: u32 },
    Fletcher32,
}

impl Filter {
    fn id(&self) -> u16 {
        match self {
            Filter::Deflate { .. } => 1,
            Filter::Shuffle { .. } => 2,
            Filter::Fletcher32 => 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPipeline {
    pub filters: Vec<Filter>,
}

impl FilterPipeline {
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Applies the pipeline forward (encode order) to a single chunk's
    /// raw bytes, as the writer does before storing it.
    pub fn apply(&self, mut data: Vec<u8>) -> Result<Vec<u8>> {
        for filter in &self.filters {
            data = match filter {
                Filter::Shuffle { element_size } => shuffle(&data, *element_size as usize),
                Filter::Deflate { level } => deflate(&data, *level)?,
                Filter::Fletcher32 => {
                    let sum = fletcher32(&data);
                    data.extend_from_slice(&sum.to_le_bytes());
                    data
                }
            };
        }
        Ok(data)
    }

    /// Reverses the pipeline (decode order: last filter applied first
    /// on read) to recover a chunk's raw bytes.
    pub fn remove(&self, mut data: Vec<u8>) -> Result<Vec<u8>> {
        for filter in self.filters.iter().rev() {
            data = match filter {
                Filter::Shuffle { element_size } => unshuffle(&data, *element_size as usize),
                Filter::Deflate { .. } => inflate(&data)?,
                Filter::Fletcher32 => {
                    if data.len() < 4 {
                        return Err(Error::corrupt("chunk too short for fletcher32 trailer"));
                    }
                    let split = data.len() - 4;
                    let stored = u32::from_le_bytes(data[split..].try_into().unwrap());
                    data.truncate(split);
                    let computed = fletcher32(&data);
                    if computed != stored {
                        return Err(Error::corrupt("fletcher32 checksum mismatch"));
                    }
                    data
                }
            };
        }
        Ok(data)
    }

    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>) -> Result<FilterPipeline> {
        let version = reader.read_u8()?;
        if !(1..=2).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }
        let count = reader.read_u8()?;
        if version == 1 {
            reader.skip(6)?; // reserved
        }
        let mut filters = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = reader.read_u16(Endian::Little)?;
            let name_len = if version == 1 || id >= 256 {
                reader.read_u16(Endian::Little)?
            } else {
                0
            };
            reader.skip(2)?; // flags
            let cd_count = reader.read_u16(Endian::Little)?;
            if name_len > 0 {
                reader.skip(name_len as u64)?;
            }
            let mut cd_values = Vec::with_capacity(cd_count as usize);
            for _ in 0..cd_count {
                cd_values.push(reader.read_u32(Endian::Little)?);
            }
            if cd_count % 2 != 0 && version == 1 {
                reader.skip(4)?; // padding to 4-byte alignment
            }
            filters.push(match id {
                1 => Filter::Deflate { level: *cd_values.first().unwrap_or(&6) as u8 },
                2 => Filter::Shuffle { element_size: *cd_values.first().unwrap_or(&1) },
                3 => Filter::Fletcher32,
                other => return Err(Error::unsupported(format!("filter id {other}"))),
            });
        }
        Ok(FilterPipeline { filters })
    }

    pub fn serialize<W: Write + Seek>(&self, writer: &mut ByteWriter<W>) -> Result<()> {
        writer.write_u8(2)?; // version
        writer.write_u8(self.filters.len() as u8)?;
        for filter in &self.filters {
            writer.write_u16(filter.id(), Endian::Little)?;
            writer.write_u16(0, Endian::Little)?; // flags
            let cd_values: Vec<u32> = match filter {
                Filter::Deflate { level } => vec![*level as u32],
                Filter::Shuffle { element_size } => vec![*element_size],
                Filter::Fletcher32 => vec![],
            };
            writer.write_u16(cd_values.len() as u16, Endian::Little)?;
            for v in cd_values {
                writer.write_u32(v, Endian::Little)?;
            }
        }
        Ok(())
    }
}

fn shuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() % element_size != 0 {
        return data.to_vec();
    }
    let count = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for byte_pos in 0..element_size {
        for i in 0..count {
            out[byte_pos * count + i] = data[i * element_size + byte_pos];
        }
    }
    out
}

fn unshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    if element_size <= 1 || data.len() % element_size != 0 {
        return data.to_vec();
    }
    let count = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for byte_pos in 0..element_size {
        for i in 0..count {
            out[i * element_size + byte_pos] = data[byte_pos * count + i];
        }
    }
    out
}

fn deflate(data: &[u8], level: u8) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level as u32));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn shuffle_unshuffle_roundtrips() {
        let data: Vec<u8> = (0..40u8).collect();
        let shuffled = shuffle(&data, 4);
        assert_eq!(unshuffle(&shuffled, 4), data);
    }

    #[test]
    fn deflate_inflate_roundtrips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(8);
        let compressed = deflate(&data, 6).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(inflate(&compressed).unwrap(), data);
    }

    #[test]
    fn pipeline_apply_remove_roundtrips() {
        let pipeline = FilterPipeline {
            filters: vec![Filter::Shuffle { element_size: 4 }, Filter::Deflate { level: 6 }, Filter::Fletcher32],
        };
        let data: Vec<u8> = (0..64u8).cycle().take(400).collect();
        let encoded = pipeline.apply(data.clone()).unwrap();
        let decoded = pipeline.remove(encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn fletcher32_detects_corruption() {
        let pipeline = FilterPipeline { filters: vec![Filter::Fletcher32] };
        let mut encoded = pipeline.apply(b"hello world".to_vec()).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(pipeline.remove(encoded).is_err());
    }

    #[test]
    fn pipeline_message_roundtrips() {
        let pipeline = FilterPipeline { filters: vec![Filter::Deflate { level: 4 }] };
        let mut buf = Vec::new();
        let mut writer = ByteWriter::new(Cursor::new(&mut buf));
        pipeline.serialize(&mut writer).unwrap();
        let mut reader = ByteReader::new(Cursor::new(buf));
        let parsed = FilterPipeline::parse(&mut reader).unwrap();
        assert_eq!(parsed, pipeline);
    }
}
