//! Local heap ("HEAP") and global heap ("GCOL") support. Local heaps
//! back v1 symbol-table link names; global heaps
//! back variable-length string/sequence datatype values, addressed by
//! `{collection address, object index}` pairs.

use std::collections::HashMap;
use std::io::{Read, Seek, Write};

use crate::datatype::HeapResolver;
use crate::io::{ByteReader, ByteWriter, Endian, Width};
use crate::{Error, Result};

const LOCAL_HEAP_SIGNATURE: &[u8; 4] = b"HEAP";
const GLOBAL_HEAP_SIGNATURE: &[u8; 4] = b"GCOL";

/// A local heap's data segment: a flat byte
/// pool of NUL-terminated strings addressed by offset into the
/// segment, used by v1 symbol table entries for link names.
#[derive(Debug, Clone)]
pub struct LocalHeap {
    data: Vec<u8>,
}

impl LocalHeap {
    pub fn parse<R: Read + Seek>(reader: &mut ByteReader<R>, addr: u64, offset_width: Width) -> Result<LocalHeap> {
        reader.seek_to(addr)?;
        let sig = reader.read_exact_bytes(4)?;
        if sig.as_slice() != LOCAL_HEAP_SIGNATURE {
            return Err(Error::corrupt("local heap signature mismatch"));
        }
        let version = reader.read_u8()?;
        if version != 0 {
            return Err(Error::UnsupportedVersion(version));
        }
        reader.skip(3)?; // reserved
        let _data_segment_size = reader.read_length(offset_width)?;
        let _free_list_head = reader.read_offset(offset_width)?;
        let data_segment_addr = reader.read_offset(offset_width)?;

        reader.seek_to(data_segment_addr)?;
        let data = reader.read_exact_bytes(_data_segment_size as usize)?;
        Ok(LocalHeap { data })
    }

    /// Looks up a NUL-terminated string starting at `offset` into the
    /// heap's data segment.
    pub fn get_string(&self, offset: u64) -> Result<String> {
        let start = offset as usize;
        if start > self.data.len() {
            return Err(Error::corrupt("local heap offset out of range"));
        }
        let end = self.data[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .unwrap_or(self.data.len());
        Ok(String::from_utf8_lossy(&self.data[start..end]).into_owned())
    }

    /// Appends `s` (NUL-terminated) to the heap's in-memory data
    /// segment and returns the offset it was written at. The on-disk
    /// heap is always rewritten in full at flush time; there's no
    /// in-place heap growth.
    pub fn add_string(&mut self, s: &str) -> u64 {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        offset
    }

    pub fn write<W: Write + Seek>(&self, writer: &mut ByteWriter<W>, addr: u64, data_addr: u64, offset_width: Width) -> Result<()> {
        writer.seek_to(addr)?;
        writer.write_bytes(LOCAL_HEAP_SIGNATURE)?;
        writer.write_u8(0)?;
        writer.write_bytes(&[0, 0, 0])?;
        writer.write_length(self.data.len() as u64, offset_width)?;
        writer.write_offset(crate::io::undefined_offset(offset_width), offset_width)?;
        writer.write_offset(data_addr, offset_width)?;
        writer.seek_to(data_addr)?;
        writer.write_bytes(&self.data)?;
        Ok(())
    }

    pub fn header_size(offset_width: Width) -> u64 {
        8 + 3 * offset_width.bytes() as u64
    }

    pub fn data_len(&self) -> u64 {
        self.data.len() as u64
    }
}

impl Default for LocalHeap {
    fn default() -> Self {
        LocalHeap { data: vec![0] } // offset 0 reserved, conventionally the empty string
    }
}

/// One object inside a global heap collection.
#[derive(Debug, Clone)]
struct GlobalHeapObject {
    data: Vec<u8>,
}

/// A single parsed "GCOL" collection block.
#[derive(Debug, Clone)]
struct GlobalHeapCollection {
    objects: HashMap<u32, GlobalHeapObject>,
}

impl GlobalHeapCollection {
    fn parse<R: Read + Seek>(reader: &mut ByteReader<R>, addr: u64, offset_width: Width, length_width: Width) -> Result<GlobalHeapCollection> {
        reader.seek_to(addr)?;
        let sig = reader.read_exact_bytes(4)?;
        if sig.as_slice() != GLOBAL_HEAP_SIGNATURE {
            return Err(Error::corrupt("global heap collection signature mismatch"));
        }
        let version = reader.read_u8()?;
        if version != 1 {
            return Err(Error::UnsupportedVersion(version));
        }
        reader.skip(3)?; // reserved
        let collection_size = reader.read_length(length_width)?;
        let body_end = addr + collection_size;

        let mut objects = HashMap::new();
        loop {
            let pos = reader.position()?;
            if pos + 2 + 2 + 4 > body_end {
                break;
            }
            let index = reader.read_u16(Endian::Little)? as u32;
            if index == 0 {
                break; // index 0 marks remaining free space, not a real object
            }
            let _ref_count = reader.read_u16(Endian::Little)?;
            reader.skip(4)?; // reserved
            let obj_size = reader.read_length(length_width)?;
            let data = reader.read_exact_bytes(obj_size as usize)?;
            reader.align(8)?;
            objects.insert(index, GlobalHeapObject { data });
        }
        Ok(GlobalHeapCollection { objects })
    }
}

/// Lazily-loaded, address-keyed cache of global heap collections. This
/// is what backs [`HeapResolver`] during reads: a datatype decode that
/// needs a variable-length payload calls `resolve_global`, which loads
/// (and memoizes) the owning "GCOL" block on first access.
pub struct GlobalHeapCache<R> {
    reader: ByteReader<R>,
    offset_width: Width,
    length_width: Width,
    collections: HashMap<u64, GlobalHeapCollection>,
}

impl<R: Read + Seek> GlobalHeapCache<R> {
    pub fn new(reader: ByteReader<R>, offset_width: Width, length_width: Width) -> GlobalHeapCache<R> {
        GlobalHeapCache {
            reader,
            offset_width,
            length_width,
            collections: HashMap::new(),
        }
    }

    pub fn into_inner(self) -> ByteReader<R> {
        self.reader
    }

    /// Direct access to the underlying reader, for code that needs to
    /// pull raw bytes (object headers, chunk data) from the same
    /// stream this cache resolves global heap references against.
    /// Callers must not hold this borrow alongside a `&mut dyn
    /// HeapResolver` borrow of the same cache; gather bytes first,
    /// let this borrow end, then decode.
    pub fn reader_mut(&mut self) -> &mut ByteReader<R> {
        &mut self.reader
    }
}

impl<R: Read + Seek> HeapResolver for GlobalHeapCache<R> {
    fn resolve_global(&mut self, collection_addr: u64, index: u32) -> Result<Vec<u8>> {
        if !self.collections.contains_key(&collection_addr) {
            let collection = GlobalHeapCollection::parse(&mut self.reader, collection_addr, self.offset_width, self.length_width)?;
            self.collections.insert(collection_addr, collection);
        }
        let collection = self.collections.get(&collection_addr).unwrap();
        collection
            .objects
            .get(&index)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| Error::corrupt(format!("global heap object {index} not found in collection at {collection_addr}")))
    }
}

/// A writer-side global heap: objects accumulate in memory and the
/// whole collection is serialized in one shot at flush time (append-only
/// allocation; there's no in-place heap growth).
#[derive(Default)]
pub struct GlobalHeapWriter {
    next_index: u32,
    objects: Vec<(u32, Vec<u8>)>,
}

impl GlobalHeapWriter {
    pub fn new() -> GlobalHeapWriter {
        GlobalHeapWriter { next_index: 1, objects: Vec::new() }
    }

    /// Stores `data` as a new object and returns its index within this
    /// (not-yet-written) collection.
    pub fn add(&mut self, data: Vec<u8>) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        self.objects.push((index, data));
        index
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Serializes the whole collection at `addr` and returns its total
    /// on-disk size.
    pub fn write<W: Write + Seek>(&self, writer: &mut ByteWriter<W>, addr: u64, length_width: Width) -> Result<u64> {
        writer.seek_to(addr)?;
        writer.write_bytes(GLOBAL_HEAP_SIGNATURE)?;
        writer.write_u8(1)?;
        writer.write_bytes(&[0, 0, 0])?;
        let size_field_pos = writer.position()?;
        writer.write_length(0, length_width)?; // patched below

        for (index, data) in &self.objects {
            writer.write_u16(*index as u16, Endian::Little)?;
            writer.write_u16(1, Endian::Little)?; // ref count
            writer.write_bytes(&[0, 0, 0, 0])?;
            writer.write_length(data.len() as u64, length_width)?;
            writer.write_bytes(data)?;
            writer.align(8)?;
        }

        let end = writer.position()?;
        let total_size = end - addr;
        writer.seek_to(size_field_pos)?;
        writer.write_length(total_size, length_width)?;
        writer.seek_to(end)?;
        Ok(total_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn local_heap_roundtrips_string() {
        let mut heap = LocalHeap::default();
        let off = heap.add_string("hello");
        assert_eq!(heap.get_string(off).unwrap(), "hello");

        let mut buf = vec![0u8; 4096];
        let header_addr = 0u64;
        let data_addr = LocalHeap::header_size(Width::EIGHT);
        {
            let mut writer = ByteWriter::new(Cursor::new(&mut buf));
            heap.write(&mut writer, header_addr, data_addr, Width::EIGHT).unwrap();
        }
        let cursor = Cursor::new(buf);
        let mut reader = ByteReader::new(cursor);
        let parsed = LocalHeap::parse(&mut reader, header_addr, Width::EIGHT).unwrap();
        assert_eq!(parsed.get_string(off).unwrap(), "hello");
    }

    #[test]
    fn global_heap_roundtrips_objects() {
        let mut w = GlobalHeapWriter::new();
        let i1 = w.add(b"first".to_vec());
        let i2 = w.add(b"second-object".to_vec());

        let mut buf = vec![0u8; 4096];
        {
            let mut writer = ByteWriter::new(Cursor::new(&mut buf));
            w.write(&mut writer, 0, Width::EIGHT).unwrap();
        }

        let cursor = Cursor::new(buf);
        let reader = ByteReader::new(cursor);
        let mut cache = GlobalHeapCache::new(reader, Width::EIGHT, Width::EIGHT);
        assert_eq!(cache.resolve_global(0, i1).unwrap(), b"first".to_vec());
        assert_eq!(cache.resolve_global(0, i2).unwrap(), b"second-object".to_vec());
    }

    #[test]
    fn global_heap_cache_memoizes_collection() {
        let mut w = GlobalHeapWriter::new();
        let idx = w.add(b"only".to_vec());
        let mut buf = vec![0u8; 4096];
        {
            let mut writer = ByteWriter::new(Cursor::new(&mut buf));
            w.write(&mut writer, 0, Width::EIGHT).unwrap();
        }
        let cursor = Cursor::new(buf);
        let reader = ByteReader::new(cursor);
        let mut cache = GlobalHeapCache::new(reader, Width::EIGHT, Width::EIGHT);
        cache.resolve_global(0, idx).unwrap();
        assert_eq!(cache.collections.len(), 1);
        cache.resolve_global(0, idx).unwrap();
        assert_eq!(cache.collections.len(), 1);
    }
}
