//! Core object model for odbscan
//!
//! Objects are content-addressed and immutable. A typed object starts out
//! holding only its [`ObjectId`]; [`Object::instantiate`] reads the object's
//! text from the store the first time it is called and is a no-op afterwards.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::commit::Commit;
use crate::database::ObjectDatabase;
use crate::error::{Error, Result};
use crate::tag::Tag;
use crate::tree::Tree;
use crate::tree_cache::TreeCache;

/// Content hash naming a stored object (SHA-1, 20 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// Length of the hexadecimal form
    pub const HEX_LEN: usize = 40;

    /// Create a new ObjectId from raw bytes
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Parse from the 40-character lowercase hexadecimal form
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != Self::HEX_LEN || !is_lower_hex(hex_str) {
            return Err(Error::InvalidObjectId(hex_str.to_string()));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex_str, &mut bytes)
            .map_err(|_| Error::InvalidObjectId(hex_str.to_string()))?;
        Ok(Self(bytes))
    }

    /// Build an id from a loose object's shard directory and file name.
    ///
    /// Returns `None` unless `dir` is exactly 2 and `file` exactly 38
    /// lowercase hex characters.
    pub fn from_loose_parts(dir: &str, file: &str) -> Option<Self> {
        if dir.len() != 2 || file.len() != Self::HEX_LEN - 2 {
            return None;
        }
        if !is_lower_hex(dir) || !is_lower_hex(file) {
            return None;
        }
        Self::from_hex(&format!("{}{}", dir, file)).ok()
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

/// Object type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectKind {
    /// Every kind, in registry order
    pub const ALL: [ObjectKind; 4] = [
        ObjectKind::Blob,
        ObjectKind::Tree,
        ObjectKind::Commit,
        ObjectKind::Tag,
    ];

    /// The storage tool's name for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
            ObjectKind::Tag => "tag",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ObjectKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownKind(s.to_string()))
    }
}

/// Capability shared by every typed object
#[async_trait]
pub trait Object: Send + Sync {
    /// Returns the type of object
    fn kind(&self) -> ObjectKind;

    /// Returns the id of the object
    fn id(&self) -> ObjectId;

    /// Populate internal state from the store.
    ///
    /// Idempotent: only the first successful call reads from storage.
    async fn instantiate(&self, db: &ObjectDatabase) -> Result<()>;
}

/// File content object.
///
/// Holds nothing but its id; size and contents are fetched on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    id: ObjectId,
}

impl Blob {
    /// Create a reference to a stored blob
    pub fn new(id: ObjectId) -> Self {
        Self { id }
    }

    /// Size of the decompressed contents in bytes
    pub async fn size(&self, db: &ObjectDatabase) -> Result<u64> {
        db.object_size(self.id)
            .await
            .map_err(|e| e.context(format!("Getting decompressed size for blob {}", self.id)))
    }

    /// Raw contents of the blob
    pub async fn contents(&self, db: &ObjectDatabase) -> Result<Bytes> {
        db.object_contents(ObjectKind::Blob, self.id)
            .await
            .map_err(|e| e.context(format!("Reading blob {}", self.id)))
    }
}

#[async_trait]
impl Object for Blob {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Blob
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    async fn instantiate(&self, _db: &ObjectDatabase) -> Result<()> {
        Ok(())
    }
}

/// Any typed object, as delivered by the scan pipeline
#[derive(Debug)]
pub enum AnyObject {
    Blob(Blob),
    Tree(Arc<Tree>),
    Commit(Commit),
    Tag(Tag),
}

impl AnyObject {
    /// Borrow the inner commit, if this is one
    pub fn as_commit(&self) -> Option<&Commit> {
        match self {
            AnyObject::Commit(commit) => Some(commit),
            _ => None,
        }
    }

    /// Take the inner commit, if this is one
    pub fn into_commit(self) -> Option<Commit> {
        match self {
            AnyObject::Commit(commit) => Some(commit),
            _ => None,
        }
    }

    /// Take the inner tree, if this is one
    pub fn into_tree(self) -> Option<Arc<Tree>> {
        match self {
            AnyObject::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    /// Take the inner blob, if this is one
    pub fn into_blob(self) -> Option<Blob> {
        match self {
            AnyObject::Blob(blob) => Some(blob),
            _ => None,
        }
    }

    /// Take the inner tag, if this is one
    pub fn into_tag(self) -> Option<Tag> {
        match self {
            AnyObject::Tag(tag) => Some(tag),
            _ => None,
        }
    }

    fn as_object(&self) -> &dyn Object {
        match self {
            AnyObject::Blob(blob) => blob,
            AnyObject::Tree(tree) => tree.as_ref(),
            AnyObject::Commit(commit) => commit,
            AnyObject::Tag(tag) => tag,
        }
    }
}

#[async_trait]
impl Object for AnyObject {
    fn kind(&self) -> ObjectKind {
        self.as_object().kind()
    }

    fn id(&self) -> ObjectId {
        self.as_object().id()
    }

    async fn instantiate(&self, db: &ObjectDatabase) -> Result<()> {
        self.as_object().instantiate(db).await
    }
}

/// Builds an uninstantiated object of one kind from its id
pub type Constructor = fn(ObjectId, &TreeCache) -> AnyObject;

fn construct_blob(id: ObjectId, _cache: &TreeCache) -> AnyObject {
    AnyObject::Blob(Blob::new(id))
}

// Trees go through the cache so every holder shares one parse.
fn construct_tree(id: ObjectId, cache: &TreeCache) -> AnyObject {
    AnyObject::Tree(cache.get_or_create(id))
}

fn construct_commit(id: ObjectId, _cache: &TreeCache) -> AnyObject {
    AnyObject::Commit(Commit::new(id))
}

fn construct_tag(id: ObjectId, _cache: &TreeCache) -> AnyObject {
    AnyObject::Tag(Tag::new(id))
}

const CONSTRUCTORS: &[(ObjectKind, Constructor)] = &[
    (ObjectKind::Blob, construct_blob as Constructor),
    (ObjectKind::Tree, construct_tree as Constructor),
    (ObjectKind::Commit, construct_commit as Constructor),
    (ObjectKind::Tag, construct_tag as Constructor),
];

/// Look up the constructor registered for `kind`.
///
/// # Panics
///
/// Panics if no constructor is registered, which means a kind was added to
/// [`ObjectKind`] without a matching registry entry.
pub fn constructor_for(kind: ObjectKind) -> Constructor {
    CONSTRUCTORS
        .iter()
        .find(|(registered, _)| *registered == kind)
        .map(|(_, constructor)| *constructor)
        .unwrap_or_else(|| panic!("object kind {} is not supported by the registry", kind))
}

/// One header line of a commit or tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header<'a> {
    /// Empty for continuation lines and keys that are not UTF-8
    pub key: &'a str,
    pub value: &'a [u8],
    /// The whole line, key included
    pub line: &'a [u8],
}

/// Header fields and message of a commit or tag in pretty-printed form.
///
/// Header lines run up to the first empty line and are split into key and
/// value at the first space. Everything after that empty line is the
/// message, byte for byte, minus one trailing `\n`.
pub(crate) struct HeadedText<'a> {
    pub headers: Vec<Header<'a>>,
    pub message: &'a [u8],
}

impl<'a> HeadedText<'a> {
    pub fn parse(text: &'a [u8]) -> Self {
        let mut headers = Vec::new();
        let mut rest = text;

        while !rest.is_empty() {
            let (line, after) = match rest.iter().position(|&b| b == b'\n') {
                Some(end) => (&rest[..end], &rest[end + 1..]),
                None => (rest, &rest[rest.len()..]),
            };
            rest = after;
            if line.is_empty() {
                break;
            }

            let (key, value) = match line.iter().position(|&b| b == b' ') {
                Some(space) => (&line[..space], &line[space + 1..]),
                None => (line, &line[line.len()..]),
            };
            headers.push(Header {
                key: std::str::from_utf8(key).unwrap_or(""),
                value,
                line,
            });
        }

        let message = rest.strip_suffix(b"\n").unwrap_or(rest);
        Self { headers, message }
    }
}
