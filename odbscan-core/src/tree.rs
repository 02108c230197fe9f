//! Tree objects and their entries
//!
//! A [`Tree`] is shared through the store's [`TreeCache`](crate::TreeCache)
//! and parsed at most once. Child trees are instantiated depth-first while the
//! parent parses, so an instantiated tree is always fully instantiated below.

use async_trait::async_trait;
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::database::ObjectDatabase;
use crate::error::{Error, Result};
use crate::object::{Blob, Object, ObjectId, ObjectKind};

/// Byte offset of the tab separating `<mode> <kind> <id>` from the name
const NAME_SEPARATOR_OFFSET: usize = 52;

/// What a tree entry points at
#[derive(Debug, Clone)]
pub enum EntryTarget {
    Tree(Arc<Tree>),
    Blob(Blob),
}

/// Named edge inside a tree
#[derive(Debug, Clone)]
pub struct Entry {
    id: ObjectId,
    /// Mode bits exactly as printed, e.g. `100644`
    permissions: String,
    /// Unquoted file name
    name: OsString,
    target: EntryTarget,
}

impl Entry {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &OsStr {
        &self.name
    }

    pub fn permissions(&self) -> &str {
        &self.permissions
    }

    pub fn target(&self) -> &EntryTarget {
        &self.target
    }

    /// Kind of the object this entry points at
    pub fn kind(&self) -> ObjectKind {
        match self.target {
            EntryTarget::Tree(_) => ObjectKind::Tree,
            EntryTarget::Blob(_) => ObjectKind::Blob,
        }
    }

    /// The blob this entry points at, if it is a blob entry
    pub fn blob(&self) -> Option<&Blob> {
        match &self.target {
            EntryTarget::Blob(blob) => Some(blob),
            EntryTarget::Tree(_) => None,
        }
    }

    /// The child tree, instantiated.
    ///
    /// # Panics
    ///
    /// Panics if this entry points at a blob.
    pub async fn tree(&self, db: &ObjectDatabase) -> Result<Arc<Tree>> {
        let EntryTarget::Tree(tree) = &self.target else {
            panic!("Entry {} ({:?}) has no tree", self.id, self.name);
        };
        tree.instantiate(db)
            .await
            .map_err(|e| e.context(format!("Instantiating entry {} tree", self.id)))?;
        Ok(Arc::clone(tree))
    }
}

/// A blob reached from a tree, with its path relative to that tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobPath {
    pub blob: Blob,
    pub path: PathBuf,
}

/// Output of [`Tree::stream_blob_paths_unique`]
#[derive(Debug)]
pub struct BlobPathStream {
    /// Every blob not already in the seen-set, depth-first
    pub paths: mpsc::Receiver<BlobPath>,
    /// Closed together with `paths` when the walk ends
    pub errors: mpsc::Receiver<Error>,
    /// Hands the seen-set back once the walk ends
    pub seen: JoinHandle<HashSet<ObjectId>>,
}

/// Directory object.
///
/// Starts empty; [`Object::instantiate`] parses it once. A caller entering
/// `instantiate` while another caller is parsing blocks on the tree's lock
/// until the first parse completes, then returns without parsing again.
#[derive(Debug)]
pub struct Tree {
    id: ObjectId,
    entries: OnceLock<Vec<Entry>>,
    instantiate_lock: Mutex<()>,
}

impl Tree {
    /// Create an uninstantiated tree.
    ///
    /// Prefer [`TreeCache::get_or_create`](crate::TreeCache::get_or_create)
    /// so the tree is shared.
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            entries: OnceLock::new(),
            instantiate_lock: Mutex::new(()),
        }
    }

    pub fn is_instantiated(&self) -> bool {
        self.entries.get().is_some()
    }

    /// Entries in the order they were printed.
    ///
    /// # Panics
    ///
    /// Panics if the tree has not been instantiated.
    pub fn entries(&self) -> &[Entry] {
        match self.entries.get() {
            Some(entries) => entries,
            None => panic!("Tree {} has not been instantiated", self.id),
        }
    }

    /// Stream every blob below this tree whose id is not in `seen`.
    ///
    /// Entry ids (blobs and trees) are added to `seen` as they are visited, so
    /// a blob reachable through several paths is emitted once and a subtree
    /// already seen is skipped whole. Pass the set returned through
    /// [`BlobPathStream::seen`] into the next call to skip everything already
    /// emitted for an earlier tree; pass a fresh set otherwise.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics (in the calling task for this tree, in the walk task for
    /// subtrees) if a tree on the walk has not been instantiated.
    pub fn stream_blob_paths_unique(self: &Arc<Self>, seen: HashSet<ObjectId>) -> BlobPathStream {
        assert!(
            self.is_instantiated(),
            "Tree {} must be instantiated before streaming blob paths",
            self.id
        );

        let (path_tx, path_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);
        let tree = Arc::clone(self);

        let seen = tokio::task::spawn_blocking(move || {
            let mut seen = seen;
            let mut emitted = 0usize;
            tree.walk_blob_paths(Path::new(""), &mut seen, &path_tx, &mut emitted);
            tracing::debug!(tree = %tree.id, emitted, "blob path walk finished");
            // Only the top of the walk closes the channels
            drop(path_tx);
            drop(error_tx);
            seen
        });

        BlobPathStream {
            paths: path_rx,
            errors: error_rx,
            seen,
        }
    }

    /// Returns false once the receiver is gone
    fn walk_blob_paths(
        &self,
        parent: &Path,
        seen: &mut HashSet<ObjectId>,
        paths: &mpsc::Sender<BlobPath>,
        emitted: &mut usize,
    ) -> bool {
        for entry in self.entries() {
            if !seen.insert(entry.id) {
                continue;
            }
            let path = parent.join(&entry.name);
            match &entry.target {
                EntryTarget::Blob(blob) => {
                    let blob_path = BlobPath {
                        blob: blob.clone(),
                        path,
                    };
                    if paths.blocking_send(blob_path).is_err() {
                        return false;
                    }
                    *emitted += 1;
                }
                EntryTarget::Tree(child) => {
                    assert!(
                        child.is_instantiated(),
                        "Tree {} reached at {} has not been instantiated",
                        child.id,
                        path.display()
                    );
                    if !child.walk_blob_paths(&path, seen, paths, emitted) {
                        return false;
                    }
                }
            }
        }
        true
    }

    async fn parse_entries(&self, db: &ObjectDatabase, text: &[u8]) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let body = text.strip_suffix(b"\n").unwrap_or(text);
        if body.is_empty() {
            return Ok(entries);
        }

        for line in body.split(|&b| b == b'\n') {
            let malformed = |detail: &str| {
                Error::format(
                    ObjectKind::Tree,
                    self.id,
                    format!("{} in line {:?}", detail, String::from_utf8_lossy(line)),
                )
            };

            if line.get(NAME_SEPARATOR_OFFSET) != Some(&b'\t') {
                return Err(malformed(&format!("no tab at offset {}", NAME_SEPARATOR_OFFSET)));
            }
            let (meta, quoted_name) = line.split_at(NAME_SEPARATOR_OFFSET);
            let quoted_name = &quoted_name[1..];

            let meta = std::str::from_utf8(meta).map_err(|_| malformed("non-ASCII entry header"))?;
            let fields: Vec<&str> = meta.split(' ').collect();
            let &[permissions, kind, entry_id] = fields.as_slice() else {
                return Err(malformed("expected `<mode> <kind> <id>`"));
            };
            let name = unquote_name(quoted_name).ok_or_else(|| malformed("badly quoted name"))?;
            let entry_id = ObjectId::from_hex(entry_id)
                .map_err(|e| e.context(format!("Parsing entry {:?} of tree {}", name, self.id)))?;

            let target = match kind {
                "tree" => {
                    let child = db.tree_cache().get_or_create(entry_id);
                    child
                        .instantiate(db)
                        .await
                        .map_err(|e| e.context(format!("Instantiating tree {}", entry_id)))?;
                    EntryTarget::Tree(child)
                }
                "blob" => EntryTarget::Blob(Blob::new(entry_id)),
                other => {
                    return Err(Error::format(
                        ObjectKind::Tree,
                        self.id,
                        format!("entry {:?} has unsupported kind {:?}", name, other),
                    ));
                }
            };

            entries.push(Entry {
                id: entry_id,
                permissions: permissions.to_string(),
                name,
                target,
            });
        }

        Ok(entries)
    }
}

/// Decode an entry name as printed by `cat-file -p`.
///
/// Names with control characters, `"`, `\` or (by default) bytes above
/// 0x7f are printed inside double quotes with C escapes and octal `\NNN`
/// bytes. Anything else is the name verbatim. Returns `None` for a quoted
/// name that does not decode.
fn unquote_name(raw: &[u8]) -> Option<OsString> {
    let Some(inner) = raw.strip_prefix(b"\"") else {
        return Some(os_string_from_bytes(raw.to_vec()));
    };
    let inner = inner.strip_suffix(b"\"")?;

    let mut name = Vec::with_capacity(inner.len());
    let mut bytes = inner.iter().copied();
    while let Some(b) = bytes.next() {
        match b {
            b'\\' => {}
            b'"' => return None,
            _ => {
                name.push(b);
                continue;
            }
        }
        let escaped = match bytes.next()? {
            b'a' => 0x07,
            b'b' => 0x08,
            b't' => b'\t',
            b'n' => b'\n',
            b'v' => 0x0b,
            b'f' => 0x0c,
            b'r' => b'\r',
            b'"' => b'"',
            b'\\' => b'\\',
            high @ b'0'..=b'3' => {
                let mid = octal_digit(bytes.next()?)?;
                let low = octal_digit(bytes.next()?)?;
                ((high - b'0') << 6) | (mid << 3) | low
            }
            _ => return None,
        };
        name.push(escaped);
    }
    Some(os_string_from_bytes(name))
}

fn octal_digit(b: u8) -> Option<u8> {
    matches!(b, b'0'..=b'7').then(|| b - b'0')
}

#[cfg(unix)]
fn os_string_from_bytes(bytes: Vec<u8>) -> OsString {
    use std::os::unix::ffi::OsStringExt;
    OsString::from_vec(bytes)
}

#[cfg(not(unix))]
fn os_string_from_bytes(bytes: Vec<u8>) -> OsString {
    match String::from_utf8(bytes) {
        Ok(name) => name.into(),
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned().into(),
    }
}

#[async_trait]
impl Object for Tree {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Tree
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    async fn instantiate(&self, db: &ObjectDatabase) -> Result<()> {
        if self.is_instantiated() {
            return Ok(());
        }
        let _guard = self.instantiate_lock.lock().await;
        if self.is_instantiated() {
            return Ok(());
        }

        let text = db
            .pretty_print(self.id)
            .await
            .map_err(|e| e.context(format!("Calling cat-file on tree {}", self.id)))?;
        let entries = self.parse_entries(db, &text).await?;
        tracing::trace!(tree = %self.id, entries = entries.len(), "tree instantiated");

        // Only ever set while holding the lock
        let _ = self.entries.set(entries);
        Ok(())
    }
}
