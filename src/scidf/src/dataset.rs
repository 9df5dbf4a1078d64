//! Dataset storage: turns a dataset's
//! `Datatype` + `Dataspace` + `DataLayout` + `FilterPipeline` messages
//! into a decoded row-major element list on read, and the reverse
//! (splitting a row-major element list into zero-padded chunks) on
//! write.
//!
//! Every chunk this crate writes is prefixed with its own `u32` LE
//! byte length, whether or not a filter is applied — this is what
//! lets a filtered (and therefore variably-sized) chunk be read back
//! without a separate per-chunk size table in the index itself.

use std::io::{Read, Seek, Write};

use crate::btree::FixedArrayIndex;
use crate::datatype::{decode_elements, encode_fixed_element, Datatype, HeapResolver};
use crate::io::{ByteReader, ByteWriter, Endian, Width};
use crate::message::dataspace::Dataspace;
use crate::message::filter::FilterPipeline;
use crate::message::layout::{ChunkIndex, DataLayout};
use crate::{Error, Result};

/// Gathers a dataset's element bytes into one flat, row-major,
/// filter-removed buffer, without decoding them. Kept separate from
/// decoding (see [`read_all`]) so a caller whose datatype decode needs
/// a heap resolver (itself backed by the same reader) doesn't have to
/// hold two overlapping mutable borrows of one reader at once: gather
/// the bytes first, let that borrow end, then decode.
pub fn read_raw<R: Read + Seek>(
    reader: &mut ByteReader<R>,
    elem_size: u32,
    dataspace: &Dataspace,
    layout: &DataLayout,
    filters: &FilterPipeline,
    offset_width: Width,
) -> Result<Vec<u8>> {
    let dims: Vec<u64> = match dataspace {
        Dataspace::Scalar => vec![1],
        Dataspace::Simple { dims, .. } => dims.clone(),
    };
    let total: u64 = dims.iter().product();
    let elem_size = elem_size as u64;

    match layout {
        DataLayout::Contiguous { addr, .. } => {
            reader.seek_to(*addr)?;
            reader.read_exact_bytes((total * elem_size) as usize)
        }
        DataLayout::Chunked { dims: chunk_dims, index, addr } => {
            let chunk_dims_u64: Vec<u64> = chunk_dims.iter().map(|d| *d as u64).collect();
            let chunk_elems: u64 = chunk_dims_u64.iter().product();
            let grid = chunk_grid(&dims, chunk_dims);
            let grid_total: u64 = grid.iter().product::<u64>().max(1);

            let mut out = vec![0u8; (total * elem_size) as usize];
            let mut filled = vec![false; total as usize];

            let fixed_array = match index {
                ChunkIndex::FixedArray { header_addr } => Some(FixedArrayIndex::parse(reader, *header_addr, offset_width)?),
                _ => None,
            };

            for grid_linear in 0..grid_total {
                let chunk_addr = match index {
                    ChunkIndex::Implicit => *addr,
                    ChunkIndex::FixedArray { .. } => fixed_array.as_ref().unwrap().chunk_addrs[grid_linear as usize],
                    ChunkIndex::BTreeV1 { .. } => return Err(Error::unsupported("v1 B-tree chunk index is not supported for reads")),
                };

                let filtered = read_framed_chunk(reader, chunk_addr)?;
                let unfiltered = filters.remove(filtered)?;
                let grid_coords = multi_index(grid_linear, &grid);

                for local_linear in 0..chunk_elems {
                    let local_coords = multi_index(local_linear, &chunk_dims_u64);
                    let mut global_coords = vec![0u64; dims.len()];
                    let mut in_bounds = true;
                    for d in 0..dims.len() {
                        let g = grid_coords[d] * chunk_dims_u64[d] + local_coords[d];
                        if g >= dims[d] {
                            in_bounds = false;
                            break;
                        }
                        global_coords[d] = g;
                    }
                    if in_bounds {
                        let global_linear = linear_index(&global_coords, &dims) as usize;
                        let src = (local_linear * elem_size) as usize;
                        let dst = global_linear * elem_size as usize;
                        out[dst..dst + elem_size as usize].copy_from_slice(&unfiltered[src..src + elem_size as usize]);
                        filled[global_linear] = true;
                    }
                }
            }

            if let Some(i) = filled.iter().position(|f| !f) {
                return Err(Error::corrupt(format!("chunk grid left element {i} unfilled")));
            }
            Ok(out)
        }
    }
}

/// Decomposes a row-major linear index into per-dimension coordinates.
fn multi_index(mut linear: u64, dims: &[u64]) -> Vec<u64> {
    let mut out = vec![0u64; dims.len()];
    for i in (0..dims.len()).rev() {
        out[i] = linear % dims[i];
        linear /= dims[i];
    }
    out
}

fn linear_index(coords: &[u64], dims: &[u64]) -> u64 {
    let mut idx = 0u64;
    for i in 0..dims.len() {
        idx = idx * dims[i] + coords[i];
    }
    idx
}

fn chunk_grid(dims: &[u64], chunk_dims: &[u32]) -> Vec<u64> {
    dims.iter()
        .zip(chunk_dims.iter())
        .map(|(d, c)| (*d + *c as u64 - 1) / (*c as u64))
        .collect()
}

fn read_framed_chunk<R: Read + Seek>(reader: &mut ByteReader<R>, addr: u64) -> Result<Vec<u8>> {
    reader.seek_to(addr)?;
    let len = reader.read_u32(Endian::Little)?;
    log::trace!("decoding chunk at {addr:#x}, {len} byte frame");
    reader.read_exact_bytes(len as usize)
}

fn write_framed_chunk<W: Write + Seek>(writer: &mut ByteWriter<W>, addr: u64, payload: &[u8]) -> Result<u64> {
    writer.seek_to(addr)?;
    writer.write_u32(payload.len() as u32, Endian::Little)?;
    writer.write_bytes(payload)?;
    writer.position()
}

/// Reads every element of a dataset in row-major order: gathers raw
/// bytes via [`read_raw`], then decodes them in one pass.
pub fn read_all<R: Read + Seek>(
    reader: &mut ByteReader<R>,
    datatype: &Datatype,
    dataspace: &Dataspace,
    layout: &DataLayout,
    filters: &FilterPipeline,
    heap: &mut dyn HeapResolver,
    offset_width: Width,
) -> Result<Vec<crate::Value>> {
    let raw = read_raw(reader, datatype.size(), dataspace, layout, filters, offset_width)?;
    decode_elements(datatype, &raw, dataspace.element_count() as usize, heap)
}

/// Splits `values` (row-major, already in dataset order) into chunks
/// of shape `chunk_dims`, zero-pads partial edge chunks, runs the
/// filter pipeline per chunk, and writes them out starting at
/// `base_addr`. A dataspace that fits in exactly one chunk gets an
/// implicit index; anything larger gets a fixed-array index.
pub fn write_chunked<W: Write + Seek>(
    writer: &mut ByteWriter<W>,
    base_addr: u64,
    values: &[crate::Value],
    datatype: &Datatype,
    dims: &[u64],
    chunk_dims: &[u32],
    filters: &FilterPipeline,
    offset_width: Width,
) -> Result<(DataLayout, u64)> {
    let chunk_dims_u64: Vec<u64> = chunk_dims.iter().map(|d| *d as u64).collect();
    let chunk_elems: u64 = chunk_dims_u64.iter().product();
    let grid = chunk_grid(dims, chunk_dims);
    let grid_total: u64 = grid.iter().product::<u64>().max(1);

    let mut cursor = base_addr;
    let mut chunk_addrs = Vec::with_capacity(grid_total as usize);

    for grid_linear in 0..grid_total {
        let grid_coords = multi_index(grid_linear, &grid);
        let mut chunk_values = Vec::with_capacity(chunk_elems as usize);
        for local_linear in 0..chunk_elems {
            let local_coords = multi_index(local_linear, &chunk_dims_u64);
            let mut global_coords = vec![0u64; dims.len()];
            let mut in_bounds = true;
            for d in 0..dims.len() {
                let g = grid_coords[d] * chunk_dims_u64[d] + local_coords[d];
                if g >= dims[d] {
                    in_bounds = false;
                    break;
                }
                global_coords[d] = g;
            }
            if in_bounds {
                let global_linear = linear_index(&global_coords, dims);
                chunk_values.push(values[global_linear as usize].clone());
            } else {
                chunk_values.push(zero_value(datatype));
            }
        }

        let mut raw = Vec::with_capacity((chunk_elems * datatype.size() as u64) as usize);
        for v in &chunk_values {
            raw.extend_from_slice(&encode_fixed_element(datatype, v)?);
        }
        let filtered = filters.apply(raw)?;

        let chunk_addr = cursor;
        cursor = write_framed_chunk(writer, chunk_addr, &filtered)?;
        chunk_addrs.push(chunk_addr);
    }

    if grid_total == 1 {
        Ok((DataLayout::Chunked { dims: chunk_dims.to_vec(), index: ChunkIndex::Implicit, addr: chunk_addrs[0] }, cursor))
    } else {
        let index_header_addr = cursor;
        let index_data_addr = index_header_addr + FixedArrayIndex::header_size(offset_width);
        let fa = FixedArrayIndex { chunk_addrs };
        let end = fa.write(writer, index_header_addr, index_data_addr, offset_width)?;
        Ok((DataLayout::Chunked { dims: chunk_dims.to_vec(), index: ChunkIndex::FixedArray { header_addr: index_header_addr }, addr: index_header_addr }, end))
    }
}

fn zero_value(dt: &Datatype) -> crate::Value {
    use crate::Value;
    match dt {
        Datatype::FixedPoint { signed: true, .. } => Value::I64(0),
        Datatype::FixedPoint { signed: false, .. } => Value::U64(0),
        Datatype::Float { size, .. } if *size == 4 => Value::F32(0.0),
        Datatype::Float { .. } => Value::F64(0.0),
        Datatype::FixedString { .. } => Value::Str(String::new()),
        _ => Value::Bytes(vec![0u8; dt.size() as usize]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::filter::Filter;
    use crate::Value;
    use std::io::Cursor;

    #[test]
    fn contiguous_roundtrips() {
        let dt = Datatype::i32_le();
        let values: Vec<Value> = (0..6).map(Value::I32).collect();
        let mut buf = vec![0u8; 1024];
        {
            let mut writer = ByteWriter::new(Cursor::new(&mut buf));
            writer.seek_to(0).unwrap();
            for v in &values {
                writer.write_bytes(&encode_fixed_element(&dt, v).unwrap()).unwrap();
            }
        }
        let layout = DataLayout::Contiguous { addr: 0, size: 24 };
        let dataspace = Dataspace::Simple { dims: vec![6], max_dims: None };
        let mut reader = ByteReader::new(Cursor::new(buf));
        let decoded = read_all(&mut reader, &dt, &dataspace, &layout, &FilterPipeline::default(), &mut crate::datatype::NoHeap, Width::EIGHT).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn single_implicit_chunk_roundtrips() {
        let dt = Datatype::i32_le();
        let dims = vec![4u64];
        let chunk_dims = vec![4u32];
        let values: Vec<Value> = (0..4).map(Value::I32).collect();
        let mut buf = vec![0u8; 1024];
        let (layout, _end) = {
            let mut writer = ByteWriter::new(Cursor::new(&mut buf));
            write_chunked(&mut writer, 0, &values, &dt, &dims, &chunk_dims, &FilterPipeline::default(), Width::EIGHT).unwrap()
        };
        let dataspace = Dataspace::Simple { dims, max_dims: None };
        let mut reader = ByteReader::new(Cursor::new(buf));
        let decoded = read_all(&mut reader, &dt, &dataspace, &layout, &FilterPipeline::default(), &mut crate::datatype::NoHeap, Width::EIGHT).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn multi_chunk_with_partial_edge_roundtrips() {
        let dt = Datatype::i32_le();
        let dims = vec![5u64];
        let chunk_dims = vec![2u32]; // 5 elements / 2-wide chunks -> 3 chunks, last partial
        let values: Vec<Value> = (0..5).map(Value::I32).collect();
        let mut buf = vec![0u8; 4096];
        let (layout, _end) = {
            let mut writer = ByteWriter::new(Cursor::new(&mut buf));
            write_chunked(&mut writer, 0, &values, &dt, &dims, &chunk_dims, &FilterPipeline::default(), Width::EIGHT).unwrap()
        };
        let dataspace = Dataspace::Simple { dims, max_dims: None };
        let mut reader = ByteReader::new(Cursor::new(buf));
        let decoded = read_all(&mut reader, &dt, &dataspace, &layout, &FilterPipeline::default(), &mut crate::datatype::NoHeap, Width::EIGHT).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn filtered_multi_chunk_roundtrips() {
        let dt = Datatype::f64_le();
        let dims = vec![6u64];
        let chunk_dims = vec![4u32]; // 2 chunks, second partial
        let values: Vec<Value> = (0..6).map(|i| Value::F64(i as f64 * 1.5)).collect();
        let filters = FilterPipeline { filters: vec![Filter::Shuffle { element_size: 8 }, Filter::Deflate { level: 6 }, Filter::Fletcher32] };
        let mut buf = vec![0u8; 8192];
        let (layout, _end) = {
            let mut writer = ByteWriter::new(Cursor::new(&mut buf));
            write_chunked(&mut writer, 0, &values, &dt, &dims, &chunk_dims, &filters, Width::EIGHT).unwrap()
        };
        let dataspace = Dataspace::Simple { dims, max_dims: None };
        let mut reader = ByteReader::new(Cursor::new(buf));
        let decoded = read_all(&mut reader, &dt, &dataspace, &layout, &filters, &mut crate::datatype::NoHeap, Width::EIGHT).unwrap();
        assert_eq!(decoded, values);
    }
}
