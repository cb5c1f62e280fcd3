//! Tree nodes and the file type bits they carry in `mode`.

use hashlink::LinkedHashMap;

/// File type mask of a POSIX mode value.
pub const S_IFMT: u32 = 0o170000;
/// Directory type bits.
pub const S_IFDIR: u32 = 0o040000;
/// Regular file type bits.
pub const S_IFREG: u32 = 0o100000;
/// Symbolic link type bits.
pub const S_IFLNK: u32 = 0o120000;

/// Mode given to directories created implicitly as ancestors of an insert.
pub const DEFAULT_DIR_MODE: u32 = S_IFDIR | 0o777;

/// The kinds of node the tree can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
    Symlink,
}

impl NodeKind {
    /// File type bits for this kind.
    pub fn type_bits(self) -> u32 {
        match self {
            NodeKind::Directory => S_IFDIR,
            NodeKind::File => S_IFREG,
            NodeKind::Symlink => S_IFLNK,
        }
    }

    /// Decode the kind from a full mode value.
    ///
    /// Returns `None` for file types the tree does not represent
    /// (devices, fifos, sockets).
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFDIR => Some(NodeKind::Directory),
            S_IFREG => Some(NodeKind::File),
            S_IFLNK => Some(NodeKind::Symlink),
            _ => None,
        }
    }

    /// Link count recorded for this kind in a newc header.
    pub fn nlink(self) -> u32 {
        match self {
            NodeKind::Directory => 2,
            NodeKind::File | NodeKind::Symlink => 1,
        }
    }
}

/// One filesystem entry of the virtual tree.
///
/// Ownership is always root and group 0, so no uid/gid is stored.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) mode: u32,
    pub(crate) mtime: u64,
    pub(crate) data: Vec<u8>,
    pub(crate) children: LinkedHashMap<String, Node>,
}

impl Node {
    pub(crate) fn new(name: &str, mode: u32, mtime: u64) -> Self {
        Self {
            name: name.to_string(),
            mode,
            mtime,
            data: Vec::new(),
            children: LinkedHashMap::new(),
        }
    }

    pub(crate) fn root() -> Self {
        Self::new(".", DEFAULT_DIR_MODE, 0)
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    /// File content, symlink target, or empty for directories.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Kind decoded from `mode`. Nodes are only ever created with one of the
    /// three supported type bits, so anything else reads as a file.
    pub fn kind(&self) -> NodeKind {
        NodeKind::from_mode(self.mode).unwrap_or(NodeKind::File)
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Children in insertion order.
    pub fn children(&self) -> impl Iterator<Item = &Node> {
        self.children.values()
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.get(name)
    }

    /// Child selected by a `*` path segment: the first one inserted.
    pub(crate) fn first_child(&self) -> Option<&Node> {
        self.children.values().next()
    }
}
