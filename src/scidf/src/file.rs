//! Container facade: ties the superblock, group indexing, global heap cache,
//! and link resolver together into the entry point applications open,
//! walk, and build containers through.
//!
//! Reads and writes are deliberately asymmetric. [`File`] opens an
//! existing container and answers path-based queries against it,
//! loading object headers and group indices lazily. [`FileBuilder`]
//! assembles an entire tree in memory and commits it in one pass — no
//! partial or random rewrites, matching the allocator's append-only
//! design.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::alloc::Allocator;
use crate::config::{CreateOptions, DatasetOptions};
use crate::dataset;
use crate::datatype::{decode_elements, encode_fixed_element, Datatype};
use crate::group::{GroupIndex, InlineLinkIndex, SymbolTableIndex};
use crate::heap::{GlobalHeapCache, LocalHeap};
use crate::io::{ByteReader, ByteWriter, Width};
use crate::message::attribute::Attribute;
use crate::message::dataspace::Dataspace;
use crate::message::filter::FilterPipeline;
use crate::message::layout::DataLayout;
use crate::message::link::{GroupInfo, LinkInfo, LinkTarget};
use crate::message::{self, Message};
use crate::objheader::ObjectHeader;
use crate::resolver::{self, LinkLookup, Location};
use crate::superblock::{RootLocator, Superblock};
use crate::{Error, Result, Value};

/// An open container, backed by any `Read + Seek` source. External
/// links are followed by opening further [`File`]s against `fs::File`,
/// cached by the path they were opened with.
pub struct File<R> {
    heap: GlobalHeapCache<R>,
    superblock: Superblock,
    closed: bool,
    external: HashMap<String, File<fs::File>>,
}

impl File<fs::File> {
    pub fn open_read(path: impl AsRef<Path>) -> Result<File<fs::File>> {
        File::from_reader(fs::File::open(path)?)
    }
}

impl<R: Read + Seek> File<R> {
    pub fn from_reader(raw: R) -> Result<File<R>> {
        let mut reader = ByteReader::new(raw);
        let superblock = Superblock::locate(&mut reader)?;
        let offset_width = superblock.offset_width;
        let length_width = superblock.length_width;
        Ok(File {
            heap: GlobalHeapCache::new(reader, offset_width, length_width),
            superblock,
            closed: false,
            external: HashMap::new(),
        })
    }

    pub fn version(&self) -> u8 {
        self.superblock.version
    }

    pub fn root_object_header_addr(&self) -> u64 {
        match self.superblock.root {
            RootLocator::SymbolTableEntry { object_header_addr, .. } => object_header_addr,
            RootLocator::ObjectHeader { addr } => addr,
        }
    }

    /// Closes the file. Idempotent; subsequent operations return
    /// [`Error::Closed`] rather than touching the underlying reader.
    pub fn close(&mut self) {
        self.closed = true;
        self.external.clear();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Resolves an absolute `/`-separated path, following hard, soft,
    /// and external links.
    pub fn resolve(&mut self, path: &str) -> Result<Location> {
        self.ensure_open()?;
        resolver::resolve(self, path)
    }

    pub fn list_group(&mut self, path: &str) -> Result<Vec<String>> {
        match self.resolve(path)? {
            Location::Local(addr) => Ok(owned_names(self.group_index_at(addr)?.as_ref())),
            Location::External { file_key, addr } => {
                let ext = self.external_mut(&file_key)?;
                Ok(owned_names(ext.group_index_at(addr)?.as_ref()))
            }
        }
    }

    pub fn dataset_values(&mut self, path: &str) -> Result<Vec<Value>> {
        match self.resolve(path)? {
            Location::Local(addr) => self.dataset_values_at(addr),
            Location::External { file_key, addr } => self.external_mut(&file_key)?.dataset_values_at(addr),
        }
    }

    pub fn attribute_names(&mut self, path: &str) -> Result<Vec<String>> {
        match self.resolve(path)? {
            Location::Local(addr) => self.attribute_names_at(addr),
            Location::External { file_key, addr } => self.external_mut(&file_key)?.attribute_names_at(addr),
        }
    }

    pub fn attribute_value(&mut self, path: &str, name: &str) -> Result<Value> {
        match self.resolve(path)? {
            Location::Local(addr) => self.attribute_value_at(addr, name),
            Location::External { file_key, addr } => self.external_mut(&file_key)?.attribute_value_at(addr, name),
        }
    }

    /// Depth-first walk of the tree starting at the root, following
    /// only hard links (soft and external targets are reported as
    /// their link names but not descended into, to keep a walk bounded
    /// to one file). `visit` controls whether descent continues.
    pub fn walk<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, NodeKind) -> Result<Control>,
    {
        self.ensure_open()?;
        let root_addr = self.root_object_header_addr();
        self.walk_from(root_addr, "/", &mut visit)?;
        Ok(())
    }

    fn walk_from<F>(&mut self, addr: u64, path: &str, visit: &mut F) -> Result<Control>
    where
        F: FnMut(&str, NodeKind) -> Result<Control>,
    {
        let header = self.header_at(addr)?;
        if Self::is_dataset(&header) {
            return visit(path, NodeKind::Dataset);
        }
        if let Control::Stop = visit(path, NodeKind::Group)? {
            return Ok(Control::Stop);
        }

        let index = self.group_index_at(addr)?;
        let children: Vec<(String, LinkTarget)> = index
            .list()
            .into_iter()
            .filter_map(|name| index.find(name).map(|target| (name.to_string(), target.clone())))
            .collect();
        drop(index);

        for (name, target) in children {
            if let LinkTarget::Hard { object_header_addr } = target {
                let child_path = if path == "/" { format!("/{name}") } else { format!("{path}/{name}") };
                if let Control::Stop = self.walk_from(object_header_addr, &child_path, visit)? {
                    return Ok(Control::Stop);
                }
            }
        }
        Ok(Control::Continue)
    }

    fn header_at(&mut self, addr: u64) -> Result<ObjectHeader> {
        let offset_width = self.superblock.offset_width;
        let length_width = self.superblock.length_width;
        ObjectHeader::parse(self.heap.reader_mut(), addr, offset_width, length_width)
    }

    fn is_dataset(header: &ObjectHeader) -> bool {
        header.find(message::TYPE_DATA_LAYOUT).is_some()
    }

    /// Builds the right [`GroupIndex`] for the group object header at
    /// `addr`: inline Link messages if present, otherwise the v1
    /// Symbol Table message, falling back to the superblock's own root
    /// locator for a v0/v1 root group that carries no such message.
    fn group_index_at(&mut self, addr: u64) -> Result<Box<dyn GroupIndex>> {
        let header = self.header_at(addr)?;
        let offset_width = self.superblock.offset_width;
        let length_width = self.superblock.length_width;

        if let Some(Message::SymbolTable(st)) = header.find(message::TYPE_SYMBOL_TABLE) {
            let st = *st;
            let local_heap = LocalHeap::parse(self.heap.reader_mut(), st.local_heap_addr, offset_width)?;
            let index = SymbolTableIndex::load(self.heap.reader_mut(), st.btree_addr, &local_heap, offset_width, length_width)?;
            return Ok(Box::new(index));
        }

        if let RootLocator::SymbolTableEntry { object_header_addr, btree_addr, local_heap_addr } = self.superblock.root {
            if addr == object_header_addr {
                let local_heap = LocalHeap::parse(self.heap.reader_mut(), local_heap_addr, offset_width)?;
                let index = SymbolTableIndex::load(self.heap.reader_mut(), btree_addr, &local_heap, offset_width, length_width)?;
                return Ok(Box::new(index));
            }
        }

        let mut links = Vec::new();
        for m in header.find_all(message::TYPE_LINK) {
            links.push(m.as_link()?.clone());
        }
        Ok(Box::new(InlineLinkIndex::from_links(links)))
    }

    fn dataset_values_at(&mut self, addr: u64) -> Result<Vec<Value>> {
        let header = self.header_at(addr)?;
        if !Self::is_dataset(&header) {
            return Err(Error::wrong_kind("object is not a dataset"));
        }
        let datatype = header
            .find(message::TYPE_DATATYPE)
            .ok_or_else(|| Error::corrupt("dataset missing Datatype message"))?
            .as_datatype()?
            .clone();
        let dataspace = header
            .find(message::TYPE_DATASPACE)
            .ok_or_else(|| Error::corrupt("dataset missing Dataspace message"))?
            .as_dataspace()?
            .clone();
        let layout = header
            .find(message::TYPE_DATA_LAYOUT)
            .ok_or_else(|| Error::corrupt("dataset missing DataLayout message"))?
            .as_data_layout()?
            .clone();
        let filters = match header.find(message::TYPE_FILTER_PIPELINE) {
            Some(Message::FilterPipeline(f)) => f.clone(),
            _ => FilterPipeline::default(),
        };

        let offset_width = self.superblock.offset_width;
        // Gather raw bytes first (needs only the reader), then decode
        // (needs only the heap cache) — the two borrows never overlap.
        let raw = dataset::read_raw(self.heap.reader_mut(), datatype.size(), &dataspace, &layout, &filters, offset_width)?;
        decode_elements(&datatype, &raw, dataspace.element_count() as usize, &mut self.heap)
    }

    fn attribute_names_at(&mut self, addr: u64) -> Result<Vec<String>> {
        let header = self.header_at(addr)?;
        header
            .find_all(message::TYPE_ATTRIBUTE)
            .into_iter()
            .map(|m| m.as_attribute().map(|a| a.name.clone()))
            .collect()
    }

    fn attribute_value_at(&mut self, addr: u64, name: &str) -> Result<Value> {
        let header = self.header_at(addr)?;
        let attr = header
            .find_all(message::TYPE_ATTRIBUTE)
            .into_iter()
            .map(|m| m.as_attribute().map(|a| a.clone()))
            .collect::<Result<Vec<Attribute>>>()?
            .into_iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::not_found(format!("no such attribute {name:?}")))?;
        attr.value(&mut self.heap)
    }

    fn external_mut(&mut self, file_key: &str) -> Result<&mut File<fs::File>> {
        self.external
            .get_mut(file_key)
            .ok_or_else(|| Error::corrupt(format!("external file {file_key:?} not open")))
    }
}

fn owned_names(index: &dyn GroupIndex) -> Vec<String> {
    index.list().into_iter().map(String::from).collect()
}

impl<R: Read + Seek> LinkLookup for File<R> {
    fn lookup_child(&mut self, loc: &Location, name: &str) -> Result<Option<LinkTarget>> {
        match loc {
            Location::Local(addr) => Ok(self.group_index_at(*addr)?.find(name).cloned()),
            Location::External { file_key, addr } => Ok(self.external_mut(file_key)?.group_index_at(*addr)?.find(name).cloned()),
        }
    }

    fn open_external(&mut self, file: &str, _path: &str) -> Result<Location> {
        let addr = if let Some(existing) = self.external.get(file) {
            existing.root_object_header_addr()
        } else {
            log::warn!("external file cache miss for {file:?}, opening from disk");
            let opened = File::open_read(file)?;
            let addr = opened.root_object_header_addr();
            self.external.insert(file.to_string(), opened);
            addr
        };
        Ok(Location::External { file_key: file.to_string(), addr })
    }

    fn root(&self) -> Location {
        Location::Local(self.root_object_header_addr())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Dataset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// One child of a [`GroupBuilder`]: either a subtree built in this same
/// commit, or a link whose target is resolved elsewhere. Soft and
/// external links are write-supported even though their targets
/// aren't validated until read time.
enum ChildEntry {
    Group(GroupBuilder),
    Dataset(DatasetBuilder),
    SoftLink(String),
    ExternalLink(String, String),
}

/// In-memory description of a group, built up before a single commit
/// pass serializes the whole tree: everything is written once,
/// children before parents, with no partial/random rewrites.
#[derive(Default)]
pub struct GroupBuilder {
    attributes: Vec<Attribute>,
    children: Vec<(String, ChildEntry)>,
}

impl GroupBuilder {
    pub fn new() -> GroupBuilder {
        GroupBuilder::default()
    }

    /// Adds a child group named `name` and returns a handle to it for
    /// further nesting.
    pub fn group(&mut self, name: impl Into<String>) -> &mut GroupBuilder {
        self.children.push((name.into(), ChildEntry::Group(GroupBuilder::new())));
        match &mut self.children.last_mut().expect("just pushed").1 {
            ChildEntry::Group(g) => g,
            _ => unreachable!(),
        }
    }

    pub fn dataset(&mut self, name: impl Into<String>, dataset: DatasetBuilder) -> &mut GroupBuilder {
        self.children.push((name.into(), ChildEntry::Dataset(dataset)));
        self
    }

    pub fn soft_link(&mut self, name: impl Into<String>, target_path: impl Into<String>) -> &mut GroupBuilder {
        self.children.push((name.into(), ChildEntry::SoftLink(target_path.into())));
        self
    }

    pub fn external_link(&mut self, name: impl Into<String>, file: impl Into<String>, path: impl Into<String>) -> &mut GroupBuilder {
        self.children.push((name.into(), ChildEntry::ExternalLink(file.into(), path.into())));
        self
    }

    pub fn attribute(&mut self, attr: Attribute) -> &mut GroupBuilder {
        self.attributes.push(attr);
        self
    }
}

/// In-memory description of a dataset: its shape, values, and storage
/// options, validated up front so a bad combination never reaches the
/// commit pass.
pub struct DatasetBuilder {
    datatype: Datatype,
    dims: Vec<u64>,
    values: Vec<Value>,
    options: DatasetOptions,
    attributes: Vec<Attribute>,
}

impl DatasetBuilder {
    pub fn new(datatype: Datatype, dims: Vec<u64>, values: Vec<Value>, options: DatasetOptions) -> Result<DatasetBuilder> {
        datatype.validate()?;
        options.validate(dims.len())?;
        let expected: u64 = dims.iter().product::<u64>().max(1);
        if values.len() as u64 != expected {
            return Err(Error::invalid(format!("dataset expects {expected} values, got {}", values.len())));
        }
        Ok(DatasetBuilder { datatype, dims, values, options, attributes: Vec::new() })
    }

    pub fn attribute(mut self, attr: Attribute) -> DatasetBuilder {
        self.attributes.push(attr);
        self
    }
}

/// Assembles a whole container in memory and commits it in a single
/// pass. There is no incremental append:
/// build the tree with [`GroupBuilder::group`]/[`GroupBuilder::dataset`]
/// under [`FileBuilder::root`], then call [`FileBuilder::write_to`]
/// once.
pub struct FileBuilder {
    offset_width: Width,
    length_width: Width,
    root: GroupBuilder,
}

impl FileBuilder {
    pub fn new(options: CreateOptions) -> Result<FileBuilder> {
        let (offset_width, length_width) = options.validate()?;
        Ok(FileBuilder { offset_width, length_width, root: GroupBuilder::new() })
    }

    pub fn root(&mut self) -> &mut GroupBuilder {
        &mut self.root
    }

    /// Serializes the whole tree bottom-up: every child's object
    /// header is written (and its address known) before its parent's,
    /// so a group's Link messages always reference already-resolved
    /// addresses. Returns the final end-of-file address.
    pub fn write_to<W: Write + Seek + Read>(&self, writer: &mut ByteWriter<W>) -> Result<u64> {
        let sb_size = Superblock::v3_size(self.offset_width);
        let mut allocator = Allocator::new(sb_size);
        let root_addr = write_group(writer, &mut allocator, &self.root, self.offset_width, self.length_width)?;
        let eof = allocator.eof();
        Superblock::write_v3(writer, self.offset_width, self.length_width, eof, root_addr)?;
        Ok(eof)
    }
}

fn write_group<W: Write + Seek + Read>(
    writer: &mut ByteWriter<W>,
    allocator: &mut Allocator,
    group: &GroupBuilder,
    offset_width: Width,
    length_width: Width,
) -> Result<u64> {
    let mut index = InlineLinkIndex::new();
    for (name, child) in &group.children {
        let target = match child {
            ChildEntry::Group(g) => LinkTarget::Hard {
                object_header_addr: write_group(writer, allocator, g, offset_width, length_width)?,
            },
            ChildEntry::Dataset(d) => LinkTarget::Hard {
                object_header_addr: write_dataset(writer, allocator, d, offset_width, length_width)?,
            },
            ChildEntry::SoftLink(path) => LinkTarget::Soft { path: path.clone() },
            ChildEntry::ExternalLink(file, path) => LinkTarget::External { file: file.clone(), path: path.clone() },
        };
        index.add(name.clone(), target)?;
    }

    let mut header = ObjectHeader::new();
    header.push(Message::LinkInfo(LinkInfo::no_dense_storage(offset_width)));
    for link in index.links() {
        header.push(Message::Link(link.clone()));
    }
    header.push(Message::GroupInfo(GroupInfo::default()));
    for attr in &group.attributes {
        header.push(Message::Attribute(attr.clone()));
    }

    let header_addr = allocator.alloc(0);
    let len = header.write(writer, header_addr, offset_width, length_width, 0)?;
    allocator.observe(header_addr + len);
    Ok(header_addr)
}

fn write_dataset<W: Write + Seek + Read>(
    writer: &mut ByteWriter<W>,
    allocator: &mut Allocator,
    dataset: &DatasetBuilder,
    offset_width: Width,
    length_width: Width,
) -> Result<u64> {
    let data_addr = allocator.alloc(0);
    let filters = dataset.options.build_pipeline(dataset.datatype.size());

    let (layout, data_end) = match &dataset.options.chunk_dims {
        Some(chunk_dims) => dataset::write_chunked(
            writer,
            data_addr,
            &dataset.values,
            &dataset.datatype,
            &dataset.dims,
            chunk_dims,
            &filters,
            offset_width,
        )?,
        None => {
            writer.seek_to(data_addr)?;
            for v in &dataset.values {
                writer.write_bytes(&encode_fixed_element(&dataset.datatype, v)?)?;
            }
            let end = writer.position()?;
            (DataLayout::Contiguous { addr: data_addr, size: end - data_addr }, end)
        }
    };
    allocator.observe(data_end);

    let dataspace = if dataset.dims.is_empty() {
        Dataspace::Scalar
    } else {
        Dataspace::Simple { dims: dataset.dims.clone(), max_dims: None }
    };

    let mut header = ObjectHeader::new();
    header.push(Message::Dataspace(dataspace));
    header.push(Message::Datatype(dataset.datatype.clone()));
    header.push(Message::DataLayout(layout));
    if !filters.is_empty() {
        header.push(Message::FilterPipeline(filters));
    }
    for attr in &dataset.attributes {
        header.push(Message::Attribute(attr.clone()));
    }

    let header_addr = allocator.alloc(0);
    let len = header.write(writer, header_addr, offset_width, length_width, 0)?;
    allocator.observe(header_addr + len);
    Ok(header_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::StringPadding;
    use std::io::Cursor;

    fn build_and_reopen(build: impl FnOnce(&mut GroupBuilder)) -> File<Cursor<Vec<u8>>> {
        let mut builder = FileBuilder::new(CreateOptions::default()).unwrap();
        build(builder.root());
        let mut buf = vec![0u8; 1 << 16];
        {
            let mut writer = ByteWriter::new(Cursor::new(&mut buf));
            builder.write_to(&mut writer).unwrap();
        }
        File::from_reader(Cursor::new(buf)).unwrap()
    }

    #[test]
    fn scalar_attribute_on_root_roundtrips() {
        let mut file = build_and_reopen(|root| {
            root.attribute(Attribute::scalar("version", Datatype::i32_le(), &Value::I32(7)).unwrap());
        });
        assert_eq!(file.attribute_value("/", "version").unwrap(), Value::I32(7));
        assert_eq!(file.attribute_names("/").unwrap(), vec!["version".to_string()]);
    }

    #[test]
    fn nested_group_and_contiguous_dataset_roundtrip() {
        let mut file = build_and_reopen(|root| {
            let measurements = root.group("measurements");
            let ds = DatasetBuilder::new(
                Datatype::f64_le(),
                vec![4],
                vec![Value::F64(1.0), Value::F64(2.0), Value::F64(3.0), Value::F64(4.0)],
                DatasetOptions::contiguous(),
            )
            .unwrap();
            measurements.dataset("temps", ds);
        });
        assert_eq!(file.list_group("/").unwrap(), vec!["measurements".to_string()]);
        let values = file.dataset_values("/measurements/temps").unwrap();
        assert_eq!(values, vec![Value::F64(1.0), Value::F64(2.0), Value::F64(3.0), Value::F64(4.0)]);
    }

    #[test]
    fn chunked_dataset_with_fixed_string_values_roundtrips() {
        let mut file = build_and_reopen(|root| {
            let dt = Datatype::fixed_string(8, StringPadding::NullPad);
            let values = vec![Value::Str("red".into()), Value::Str("green".into()), Value::Str("blue".into())];
            let ds = DatasetBuilder::new(dt, vec![3], values, DatasetOptions::chunked(vec![3])).unwrap();
            root.dataset("colors", ds);
        });
        let values = file.dataset_values("/colors").unwrap();
        assert_eq!(values, vec![Value::Str("red".into()), Value::Str("green".into()), Value::Str("blue".into())]);
    }

    #[test]
    fn soft_link_resolves_to_target() {
        let mut file = build_and_reopen(|root| {
            let ds = DatasetBuilder::new(Datatype::i32_le(), vec![1], vec![Value::I32(9)], DatasetOptions::contiguous()).unwrap();
            root.dataset("real", ds);
            root.soft_link("alias", "/real");
        });
        let values = file.dataset_values("/alias").unwrap();
        assert_eq!(values, vec![Value::I32(9)]);
    }

    #[test]
    fn walk_visits_every_group_and_dataset() {
        let mut file = build_and_reopen(|root| {
            let sub = root.group("sub");
            let ds = DatasetBuilder::new(Datatype::i32_le(), vec![1], vec![Value::I32(1)], DatasetOptions::contiguous()).unwrap();
            sub.dataset("leaf", ds);
        });
        let mut visited = Vec::new();
        file.walk(|path, kind| {
            visited.push((path.to_string(), kind));
            Ok(Control::Continue)
        })
        .unwrap();
        assert_eq!(visited, vec![
            ("/".to_string(), NodeKind::Group),
            ("/sub".to_string(), NodeKind::Group),
            ("/sub/leaf".to_string(), NodeKind::Dataset),
        ]);
    }

    #[test]
    fn dataset_builder_rejects_value_count_mismatch() {
        let err = DatasetBuilder::new(Datatype::i32_le(), vec![3], vec![Value::I32(1)], DatasetOptions::contiguous());
        assert!(err.is_err());
    }

    #[test]
    fn missing_path_is_not_found() {
        let mut file = build_and_reopen(|_root| {});
        assert!(matches!(file.dataset_values("/nope"), Err(Error::NotFound(_))));
    }
}
