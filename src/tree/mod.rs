//! In-memory filesystem tree assembled from package archives.
//!
//! A [`TreeBuilder`] owns the tree while packages are merged into it. Calling
//! [`TreeBuilder::freeze`] hands out a read-only [`Tree`] that the cpio
//! serializer and kernel extraction work from.
//!
//! # Merge rules
//!
//! - Missing ancestors are created as `0o40777` directories carrying the
//!   mtime of the insert that needed them.
//! - Inserting at an existing path replaces mode, mtime and data but keeps
//!   the node's children, so several packages can fill the same directory.
//! - Every directory passed through on the way to a leaf has its mtime raised
//!   to at least the inserted mtime.
//!
//! # Example
//!
//! ```rust
//! use initrd_builder::tree::TreeBuilder;
//!
//! let mut builder = TreeBuilder::new();
//! builder.add_dir("usr", 0o755, 1000)?;
//! builder.add_file("usr/bin/sh", b"#!/bin/sh\n".to_vec(), 0o755, 2000)?;
//!
//! let tree = builder.freeze();
//! assert_eq!(tree.read("usr/bin/sh")?, b"#!/bin/sh\n");
//! assert_eq!(tree.lookup("usr")?.mtime(), 2000);
//! # Ok::<(), initrd_builder::Error>(())
//! ```

mod node;

pub use node::{
    Node, NodeKind, DEFAULT_DIR_MODE, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG,
};

use crate::error::{Error, Result};

/// Token that matches the first child of a directory in [`Tree::read`].
pub const WILDCARD: &str = "*";

/// Permission bits kept from a caller supplied mode.
const PERMISSION_MASK: u32 = 0o7777;

/// Mutable tree used during the construction phase.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    root: Node,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    /// Start with an empty root directory.
    pub fn new() -> Self {
        Self { root: Node::root() }
    }

    /// Insert or update the node at `path`.
    ///
    /// `perm` carries permission bits only; the type bits come from `kind`.
    pub fn insert(
        &mut self,
        path: &str,
        kind: NodeKind,
        perm: u32,
        mtime: u64,
        data: Vec<u8>,
    ) -> Result<()> {
        let (ancestors, leaf) = split_path(path)?;
        let mode = kind.type_bits() | (perm & PERMISSION_MASK);

        let mut cur = &mut self.root;
        cur.mtime = cur.mtime.max(mtime);
        for segment in ancestors {
            let child = cur
                .children
                .entry(segment.to_string())
                .or_insert_with(|| Node::new(segment, DEFAULT_DIR_MODE, mtime));
            if !child.is_dir() {
                return Err(Error::PathConflict {
                    path: path.to_string(),
                    segment: segment.to_string(),
                });
            }
            child.mtime = child.mtime.max(mtime);
            cur = child;
        }

        let node = match leaf {
            // "dir/." or "" names the directory reached so far
            None => {
                if kind != NodeKind::Directory {
                    return Err(Error::PathConflict {
                        path: path.to_string(),
                        segment: cur.name.clone(),
                    });
                }
                cur
            }
            Some(leaf) => cur
                .children
                .entry(leaf.to_string())
                .or_insert_with(|| Node::new(leaf, mode, mtime)),
        };
        node.mode = mode;
        node.mtime = mtime;
        node.data = data;
        Ok(())
    }

    /// Insert a directory with the given permission bits.
    pub fn add_dir(&mut self, path: &str, perm: u32, mtime: u64) -> Result<()> {
        self.insert(path, NodeKind::Directory, perm, mtime, Vec::new())
    }

    /// Insert a regular file.
    pub fn add_file(&mut self, path: &str, data: Vec<u8>, perm: u32, mtime: u64) -> Result<()> {
        self.insert(path, NodeKind::File, perm, mtime, data)
    }

    /// Insert a symbolic link pointing at `target`.
    pub fn add_symlink(&mut self, path: &str, target: &str, perm: u32, mtime: u64) -> Result<()> {
        self.insert(
            path,
            NodeKind::Symlink,
            perm,
            mtime,
            target.as_bytes().to_vec(),
        )
    }

    /// End the construction phase.
    pub fn freeze(self) -> Tree {
        Tree { root: self.root }
    }
}

/// Read-only view of a completed tree.
#[derive(Debug, Clone)]
pub struct Tree {
    root: Node,
}

impl Tree {
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Resolve `pattern` to a node.
    ///
    /// Segments are matched by exact name, except [`WILDCARD`] which selects
    /// the first-inserted child of the current directory.
    pub fn lookup(&self, pattern: &str) -> Result<&Node> {
        let (ancestors, leaf) = split_path(pattern)?;
        let miss = || Error::LookupMiss {
            pattern: pattern.to_string(),
        };

        let mut cur = &self.root;
        for segment in ancestors {
            cur = select(cur, segment).ok_or_else(miss)?;
            if !cur.is_dir() {
                return Err(Error::PathConflict {
                    path: pattern.to_string(),
                    segment: cur.name.clone(),
                });
            }
        }

        match leaf {
            None => Ok(cur),
            Some(leaf) => select(cur, leaf).ok_or_else(miss),
        }
    }

    /// Payload of the node matching `pattern`.
    pub fn read(&self, pattern: &str) -> Result<&[u8]> {
        self.lookup(pattern).map(Node::data)
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        fn count(node: &Node) -> usize {
            1 + node.children().map(count).sum::<usize>()
        }
        count(&self.root)
    }

    /// A tree always holds at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Visit every node depth first, root first, children in insertion order.
    ///
    /// The callback receives the rendered archive path of each node.
    pub fn walk<F, E>(&self, mut visit: F) -> std::result::Result<(), E>
    where
        F: FnMut(&str, &Node) -> std::result::Result<(), E>,
    {
        walk_node(&self.root, ".", &mut visit)
    }
}

fn walk_node<F, E>(node: &Node, path: &str, visit: &mut F) -> std::result::Result<(), E>
where
    F: FnMut(&str, &Node) -> std::result::Result<(), E>,
{
    visit(path, node)?;
    for child in node.children() {
        let child_path = child_path(path, &child.name);
        walk_node(child, &child_path, visit)?;
    }
    Ok(())
}

/// Render a child's archive path from its parent's rendered path.
pub fn child_path(parent: &str, name: &str) -> String {
    match parent {
        "" | "." | "/" => name.to_string(),
        _ => format!("{parent}/{name}"),
    }
}

fn select<'a>(dir: &'a Node, segment: &str) -> Option<&'a Node> {
    if segment == WILDCARD {
        dir.first_child()
    } else {
        dir.child(segment)
    }
}

/// Split a path into ancestor segments and a leaf name.
///
/// Trailing separators are stripped, and empty or `.` ancestor segments are
/// dropped. A leaf of `None` means the path names the last ancestor itself.
fn split_path(path: &str) -> Result<(Vec<&str>, Option<&str>)> {
    let trimmed = path.trim_end_matches('/');
    let (dirname, basename) = match trimmed.rsplit_once('/') {
        Some((dirname, basename)) => (dirname, basename),
        None => ("", trimmed),
    };

    if basename == ".." || dirname.split('/').any(|segment| segment == "..") {
        return Err(Error::InvalidPath {
            path: path.to_string(),
        });
    }

    let ancestors = dirname
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    let leaf = match basename {
        "" | "." => None,
        name => Some(name),
    };
    Ok((ancestors, leaf))
}
