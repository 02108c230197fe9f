//! Shared tree cache
//!
//! Maps tree ids to the single [`Tree`] instance every holder shares, so a
//! tree reached from many commits is parsed once per store handle.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::object::ObjectId;
use crate::tree::Tree;

/// Concurrency-safe map from tree id to shared tree
#[derive(Debug, Default)]
pub struct TreeCache {
    trees: RwLock<HashMap<ObjectId, Arc<Tree>>>,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, id: &ObjectId) -> bool {
        self.trees
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn get(&self, id: &ObjectId) -> Option<Arc<Tree>> {
        self.trees
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Insert or replace the tree stored under `id`
    pub fn set(&self, id: ObjectId, tree: Arc<Tree>) {
        self.trees
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tree);
    }

    /// Return the cached tree for `id`, creating an empty one if absent.
    ///
    /// Concurrent callers asking for the same id always receive the same
    /// instance.
    pub fn get_or_create(&self, id: ObjectId) -> Arc<Tree> {
        if let Some(tree) = self.get(&id) {
            return tree;
        }
        let mut trees = self.trees.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(trees.entry(id).or_insert_with(|| Arc::new(Tree::new(id))))
    }

    pub fn len(&self) -> usize {
        self.trees.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
