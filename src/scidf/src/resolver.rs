//! Link resolver: walks an absolute
//! path one hop at a time, following hard links directly, soft links
//! by re-resolving their target path, and external links by opening
//! another file. Cycle detection tracks `(file key, path)` pairs so a
//! soft link that points back into an external file's own soft link
//! doesn't loop forever; a hop-count ceiling catches cycles that
//! don't revisit an exact path (e.g. ever-growing synthetic chains).

use std::collections::HashSet;

use crate::message::link::LinkTarget;
use crate::{Error, Result};

pub const MAX_LINK_DEPTH: u32 = 100;

/// Where a resolved path landed: either an address in the file the
/// resolution started from, or an address inside some other,
/// already-opened external file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(u64),
    External { file_key: String, addr: u64 },
}

/// One step of resolution: given the current location and the next
/// path component, what should happen. Implemented by the file-level
/// code that actually knows how to read group indices and open
/// external files — this module only owns the traversal state
/// machine (visited set, hop counter, cycle/depth errors).
pub trait LinkLookup {
    /// Looks up `name` as a child of the group at `loc`. `None` means
    /// no such child.
    fn lookup_child(&mut self, loc: &Location, name: &str) -> Result<Option<LinkTarget>>;

    /// Resolves `file` + `path` (an external link's own addressing) to
    /// a starting location in that external file, keyed by `file`.
    fn open_external(&mut self, file: &str, path: &str) -> Result<Location>;

    fn root(&self) -> Location;
}

fn file_key_of(loc: &Location) -> String {
    match loc {
        Location::Local(_) => String::new(),
        Location::External { file_key, .. } => file_key.clone(),
    }
}

fn visited_key(loc: &Location, path: &str) -> String {
    format!("{}:{}", file_key_of(loc), path)
}

/// Resolves an absolute, `/`-separated path against `lookup`, starting
/// from `lookup.root()`. Cycle detection and the hop-depth ceiling
/// apply uniformly across hard, soft, and external hops.
pub fn resolve(lookup: &mut dyn LinkLookup, path: &str) -> Result<Location> {
    let root = lookup.root();
    resolve_from(lookup, root, path, &mut HashSet::new(), 0)
}

fn resolve_from(
    lookup: &mut dyn LinkLookup,
    start: Location,
    path: &str,
    visited: &mut HashSet<String>,
    hops: u32,
) -> Result<Location> {
    if hops > MAX_LINK_DEPTH {
        return Err(Error::LinkDepthExceeded(MAX_LINK_DEPTH));
    }

    let key = visited_key(&start, path);
    if !visited.insert(key.clone()) {
        return Err(Error::LinkCycle(key));
    }

    let mut current = start;
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();

    for name in components {
        let target = lookup
            .lookup_child(&current, name)?
            .ok_or_else(|| Error::not_found(format!("no such link {name:?}")))?;

        current = match target {
            LinkTarget::Hard { object_header_addr } => match &current {
                Location::Local(_) => Location::Local(object_header_addr),
                Location::External { file_key, .. } => Location::External { file_key: file_key.clone(), addr: object_header_addr },
            },
            LinkTarget::Soft { path: soft_path } => {
                let root = file_root(lookup, &current)?;
                resolve_from(lookup, root, &soft_path, visited, hops + 1)?
            }
            LinkTarget::External { file, path: ext_path } => {
                let ext_root = lookup.open_external(&file, &ext_path)?;
                resolve_from(lookup, ext_root, &ext_path, visited, hops + 1)?
            }
        };
    }

    Ok(current)
}

/// Where a soft link's (always-absolute) path should be re-resolved
/// from: this file's own root if we're currently inside it, or the
/// external file's root if the soft link was reached by following an
/// external link into another file.
fn file_root(lookup: &mut dyn LinkLookup, current: &Location) -> Result<Location> {
    match current {
        Location::Local(_) => Ok(lookup.root()),
        Location::External { file_key, .. } => lookup.open_external(file_key, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// An in-memory graph keyed by (file_key, addr) -> { name -> target }.
    struct TestGraph {
        groups: HashMap<(String, u64), HashMap<String, LinkTarget>>,
        external_roots: HashMap<String, u64>,
    }

    impl LinkLookup for TestGraph {
        fn lookup_child(&mut self, loc: &Location, name: &str) -> Result<Option<LinkTarget>> {
            let (key, addr) = match loc {
                Location::Local(a) => (String::new(), *a),
                Location::External { file_key, addr } => (file_key.clone(), *addr),
            };
            Ok(self.groups.get(&(key, addr)).and_then(|m| m.get(name)).cloned())
        }

        fn open_external(&mut self, file: &str, _path: &str) -> Result<Location> {
            let root_addr = *self.external_roots.get(file).ok_or_else(|| Error::not_found(file.to_string()))?;
            Ok(Location::External { file_key: file.to_string(), addr: root_addr })
        }

        fn root(&self) -> Location {
            Location::Local(0)
        }
    }

    #[test]
    fn resolves_hard_link_chain() {
        let mut graph = TestGraph { groups: HashMap::new(), external_roots: HashMap::new() };
        graph.groups.insert((String::new(), 0), HashMap::from([("a".to_string(), LinkTarget::Hard { object_header_addr: 10 })]));
        graph.groups.insert((String::new(), 10), HashMap::from([("b".to_string(), LinkTarget::Hard { object_header_addr: 20 })]));
        let loc = resolve(&mut graph, "/a/b").unwrap();
        assert_eq!(loc, Location::Local(20));
    }

    #[test]
    fn follows_soft_link() {
        let mut graph = TestGraph { groups: HashMap::new(), external_roots: HashMap::new() };
        graph.groups.insert((String::new(), 0), HashMap::from([
            ("real".to_string(), LinkTarget::Hard { object_header_addr: 10 }),
            ("alias".to_string(), LinkTarget::Soft { path: "/real".to_string() }),
        ]));
        let loc = resolve(&mut graph, "/alias").unwrap();
        assert_eq!(loc, Location::Local(10));
    }

    #[test]
    fn detects_soft_link_cycle() {
        let mut graph = TestGraph { groups: HashMap::new(), external_roots: HashMap::new() };
        graph.groups.insert((String::new(), 0), HashMap::from([
            ("a".to_string(), LinkTarget::Soft { path: "/b".to_string() }),
            ("b".to_string(), LinkTarget::Soft { path: "/a".to_string() }),
        ]));
        assert!(matches!(resolve(&mut graph, "/a"), Err(Error::LinkCycle(_))));
    }

    #[test]
    fn follows_external_link() {
        let mut graph = TestGraph { groups: HashMap::new(), external_roots: HashMap::new() };
        graph.groups.insert((String::new(), 0), HashMap::from([
            ("ext".to_string(), LinkTarget::External { file: "other.sci".to_string(), path: "/shared".to_string() }),
        ]));
        graph.groups.insert(("other.sci".to_string(), 0), HashMap::from([
            ("shared".to_string(), LinkTarget::Hard { object_header_addr: 99 }),
        ]));
        graph.external_roots.insert("other.sci".to_string(), 0);
        let loc = resolve(&mut graph, "/ext/shared").unwrap();
        assert_eq!(loc, Location::External { file_key: "other.sci".to_string(), addr: 99 });
    }

    #[test]
    fn missing_link_is_not_found() {
        let mut graph = TestGraph { groups: HashMap::new(), external_roots: HashMap::new() };
        assert!(matches!(resolve(&mut graph, "/missing"), Err(Error::NotFound(_))));
    }
}
