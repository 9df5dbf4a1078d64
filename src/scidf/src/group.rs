//! Group indexing: a
//! group's children can be recorded either the old way (v1 B-tree +
//! local heap) or the new way (a flat list of inline Link messages in
//! the group's own object header). [`GroupIndex`] hides which one a
//! given group uses behind a single lookup/listing interface.

use std::io::{Read, Seek};

use crate::btree::{read_group_btree, SymbolTableEntry};
use crate::heap::LocalHeap;
use crate::io::{ByteReader, Width};
use crate::message::link::{Link, LinkTarget};
use crate::{Error, Result};

pub trait GroupIndex {
    fn find(&self, name: &str) -> Option<&LinkTarget>;
    fn list(&self) -> Vec<&str>;
    fn is_empty(&self) -> bool;
}

/// v1 group: a fully-resolved snapshot of symbol table entries (every
/// entry implicitly a hard link, since v1 symbol tables predate soft
/// and external links).
pub struct SymbolTableIndex {
    entries: Vec<SymbolTableEntry>,
    targets: Vec<LinkTarget>,
}

impl SymbolTableIndex {
    pub fn load<R: Read + Seek>(reader: &mut ByteReader<R>, btree_addr: u64, heap: &LocalHeap, offset_width: Width, length_width: Width) -> Result<SymbolTableIndex> {
        let entries = read_group_btree(reader, btree_addr, heap, offset_width, length_width)?;
        let targets = entries.iter().map(|e| LinkTarget::Hard { object_header_addr: e.object_header_addr }).collect();
        Ok(SymbolTableIndex { entries, targets })
    }
}

impl GroupIndex for SymbolTableIndex {
    fn find(&self, name: &str) -> Option<&LinkTarget> {
        self.entries.iter().position(|e| e.name == name).map(|i| &self.targets[i])
    }

    fn list(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// v2 group: the inline Link messages carried directly in the group's
/// own object header. This is the only form this crate's writer ever
/// produces — it never emits dense/fractal-heap link storage.
#[derive(Default)]
pub struct InlineLinkIndex {
    links: Vec<Link>,
}

impl InlineLinkIndex {
    pub fn new() -> InlineLinkIndex {
        InlineLinkIndex::default()
    }

    pub fn from_links(links: Vec<Link>) -> InlineLinkIndex {
        InlineLinkIndex { links }
    }

    pub fn add(&mut self, name: impl Into<String>, target: LinkTarget) -> Result<()> {
        let name = name.into();
        if self.links.iter().any(|l| l.name == name) {
            return Err(Error::invalid(format!("link {name:?} already exists in this group")));
        }
        self.links.push(Link { name, target });
        Ok(())
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }
}

impl GroupIndex for InlineLinkIndex {
    fn find(&self, name: &str) -> Option<&LinkTarget> {
        self.links.iter().find(|l| l.name == name).map(|l| &l.target)
    }

    fn list(&self) -> Vec<&str> {
        self.links.iter().map(|l| l.name.as_str()).collect()
    }

    fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_index_rejects_duplicate_names() {
        let mut idx = InlineLinkIndex::new();
        idx.add("a", LinkTarget::Hard { object_header_addr: 10 }).unwrap();
        assert!(idx.add("a", LinkTarget::Hard { object_header_addr: 20 }).is_err());
    }

    #[test]
    fn inline_index_finds_and_lists() {
        let mut idx = InlineLinkIndex::new();
        idx.add("data", LinkTarget::Hard { object_header_addr: 10 }).unwrap();
        idx.add("alias", LinkTarget::Soft { path: "/data".into() }).unwrap();
        assert_eq!(idx.list(), vec!["data", "alias"]);
        assert_eq!(idx.find("alias"), Some(&LinkTarget::Soft { path: "/data".into() }));
        assert_eq!(idx.find("missing"), None);
    }
}
