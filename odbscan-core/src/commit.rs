//! Commit objects

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;

use crate::database::ObjectDatabase;
use crate::error::{Error, Result};
use crate::object::{HeadedText, Object, ObjectId, ObjectKind};
use crate::tree::Tree;

/// Fields read from a commit's pretty-printed text
#[derive(Debug, Clone, PartialEq, Eq)]
struct CommitData {
    tree_id: ObjectId,
    parent_ids: Vec<ObjectId>,
    /// Whole `author ...` line, key included
    author_line: Bytes,
    committer_line: Bytes,
    message: Bytes,
}

/// Snapshot object referencing a root tree, its parents, and a message.
///
/// The root tree is resolved separately by [`Commit::instantiate_tree`], so
/// scanning commits never parses trees unless asked to.
#[derive(Debug)]
pub struct Commit {
    id: ObjectId,
    data: OnceCell<CommitData>,
    tree: OnceLock<Arc<Tree>>,
}

impl Commit {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            data: OnceCell::new(),
            tree: OnceLock::new(),
        }
    }

    pub fn is_instantiated(&self) -> bool {
        self.data.initialized()
    }

    fn data(&self) -> &CommitData {
        match self.data.get() {
            Some(data) => data,
            None => panic!("Commit {} has not been instantiated", self.id),
        }
    }

    /// Id of the root tree. Panics if the commit is not instantiated.
    pub fn tree_id(&self) -> ObjectId {
        self.data().tree_id
    }

    /// Parent ids in recorded order; the first parent comes first
    pub fn parent_ids(&self) -> &[ObjectId] {
        &self.data().parent_ids
    }

    /// Raw bytes of the `author` line; commits may declare a legacy encoding
    pub fn author_line(&self) -> &[u8] {
        &self.data().author_line
    }

    pub fn committer_line(&self) -> &[u8] {
        &self.data().committer_line
    }

    /// The commit message exactly as recorded, without a trailing newline
    pub fn message(&self) -> &[u8] {
        &self.data().message
    }

    /// The root tree.
    ///
    /// # Panics
    ///
    /// Panics if [`Commit::instantiate_tree`] has not completed.
    pub fn tree(&self) -> Arc<Tree> {
        match self.tree.get() {
            Some(tree) => Arc::clone(tree),
            None => panic!("Commit {} has not had its tree instantiated", self.id),
        }
    }

    /// Resolve and instantiate the root tree through the store's tree cache.
    ///
    /// # Panics
    ///
    /// Panics if the commit itself is not instantiated, or if its tree was
    /// already instantiated by an earlier call.
    pub async fn instantiate_tree(&self, db: &ObjectDatabase) -> Result<Arc<Tree>> {
        assert!(
            self.tree.get().is_none(),
            "Commit {} tree has already been instantiated",
            self.id
        );
        let tree_id = self.tree_id();

        let tree = db.tree_cache().get_or_create(tree_id);
        tree.instantiate(db).await.map_err(|e| {
            e.context(format!("Instantiating commit {} tree {}", self.id, tree_id))
        })?;

        if self.tree.set(Arc::clone(&tree)).is_err() {
            panic!("Commit {} tree has already been instantiated", self.id);
        }
        Ok(tree)
    }

    fn parse(&self, text: &Bytes) -> Result<CommitData> {
        let parsed = HeadedText::parse(text);

        let mut tree_id = None;
        let mut parent_ids = Vec::new();
        let mut author_line = Bytes::new();
        let mut committer_line = Bytes::new();

        for header in parsed.headers {
            match header.key {
                "tree" => tree_id = Some(self.parse_header_id(header.key, header.value)?),
                "parent" => parent_ids.push(self.parse_header_id(header.key, header.value)?),
                "author" => author_line = text.slice_ref(header.line),
                "committer" => committer_line = text.slice_ref(header.line),
                // encoding, gpgsig and friends
                _ => {}
            }
        }

        let Some(tree_id) = tree_id else {
            return Err(Error::format(ObjectKind::Commit, self.id, "missing tree header"));
        };

        Ok(CommitData {
            tree_id,
            parent_ids,
            author_line,
            committer_line,
            message: text.slice_ref(parsed.message),
        })
    }

    fn parse_header_id(&self, key: &str, value: &[u8]) -> Result<ObjectId> {
        std::str::from_utf8(value)
            .ok()
            .and_then(|hex| ObjectId::from_hex(hex).ok())
            .ok_or_else(|| {
                Error::format(
                    ObjectKind::Commit,
                    self.id,
                    format!("{} header {:?} is not an object id", key, String::from_utf8_lossy(value)),
                )
            })
    }
}

#[async_trait]
impl Object for Commit {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Commit
    }

    fn id(&self) -> ObjectId {
        self.id
    }

    async fn instantiate(&self, db: &ObjectDatabase) -> Result<()> {
        self.data
            .get_or_try_init(|| async {
                let text = db
                    .pretty_print(self.id)
                    .await
                    .map_err(|e| e.context(format!("Calling cat-file on commit {}", self.id)))?;
                self.parse(&text)
            })
            .await?;
        Ok(())
    }
}
