//! In-memory inode bookkeeping for a mounted instance.
//!
//! One entry per live inode number: a reference count driven by
//! lookup/putnode traffic, a mirror of the inode's mode (used for
//! directory and special-file checks without calling back into the
//! server), and the mount-point mark. Nothing but a successful
//! mount-point request ever sets the mark, which is what makes
//! double-mounting structurally impossible.

use std::collections::BTreeMap;

use shrew_abi::ErrorCode;

use super::InodeNr;

struct Node {
    refcount: u32,
    mode: u32,
    mountpoint: bool,
}

/// Table of inodes currently referenced by the requester.
pub struct NodeTable {
    nodes: BTreeMap<InodeNr, Node>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    /// Take one reference on `ino`, creating the entry on first use.
    pub fn open(&mut self, ino: InodeNr, mode: u32) {
        let node = self.nodes.entry(ino).or_insert(Node {
            refcount: 0,
            mode,
            mountpoint: false,
        });
        node.refcount += 1;
        node.mode = mode;
    }

    /// Drop `count` references; the entry disappears at zero.
    pub fn put(&mut self, ino: InodeNr, count: u32) -> Result<(), ErrorCode> {
        let node = self.nodes.get_mut(&ino).ok_or(ErrorCode::Invalid)?;
        if count == 0 || count > node.refcount {
            return Err(ErrorCode::Invalid);
        }
        node.refcount -= count;
        if node.refcount == 0 {
            self.nodes.remove(&ino);
        }
        Ok(())
    }

    /// Whether the requester holds a reference on `ino`.
    pub fn is_open(&self, ino: InodeNr) -> bool {
        self.nodes.contains_key(&ino)
    }

    pub fn mode(&self, ino: InodeNr) -> Result<u32, ErrorCode> {
        self.nodes
            .get(&ino)
            .map(|node| node.mode)
            .ok_or(ErrorCode::Invalid)
    }

    pub fn set_mode(&mut self, ino: InodeNr, mode: u32) {
        if let Some(node) = self.nodes.get_mut(&ino) {
            node.mode = mode;
        }
    }

    pub fn is_mountpoint(&self, ino: InodeNr) -> Result<bool, ErrorCode> {
        self.nodes
            .get(&ino)
            .map(|node| node.mountpoint)
            .ok_or(ErrorCode::Invalid)
    }

    pub fn set_mountpoint(&mut self, ino: InodeNr) {
        if let Some(node) = self.nodes.get_mut(&ino) {
            node.mountpoint = true;
        }
    }

    /// Forget everything; used by unmount.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shrew_abi::codes::MODE_DIR;

    #[test]
    fn references_accumulate_and_drain() {
        let mut table = NodeTable::new();
        table.open(5, MODE_DIR | 0o755);
        table.open(5, MODE_DIR | 0o755);
        assert!(table.is_open(5));

        table.put(5, 1).expect("one reference held");
        assert!(table.is_open(5));
        table.put(5, 1).expect("one reference held");
        assert!(!table.is_open(5));
    }

    #[test]
    fn over_release_is_rejected() {
        let mut table = NodeTable::new();
        table.open(9, 0o644);
        assert_eq!(table.put(9, 2), Err(ErrorCode::Invalid));
        assert_eq!(table.put(7, 1), Err(ErrorCode::Invalid));
        assert_eq!(table.put(9, 0), Err(ErrorCode::Invalid));
    }

    #[test]
    fn mountpoint_mark_survives_until_clear() {
        let mut table = NodeTable::new();
        table.open(2, MODE_DIR | 0o755);
        assert_eq!(table.is_mountpoint(2), Ok(false));
        table.set_mountpoint(2);
        assert_eq!(table.is_mountpoint(2), Ok(true));
        table.clear();
        assert!(!table.is_open(2));
    }
}
