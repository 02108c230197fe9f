//! odbscan core library
//!
//! Concurrent enumeration of a content-addressed object database:
//! - Object model (Blob, Tree, Commit, Tag) with lazy, memoized instantiation
//! - Tree cache shared per database handle
//! - Command runner seam over the storage tool
//! - Scan pipeline: loose and packed discovery, classification, fan-in
//! - Blob-path streaming with cross-call deduplication

pub mod command;
pub mod commit;
pub mod config;
pub mod database;
pub mod error;
pub mod object;
pub mod scan;
pub mod tag;
pub mod tree;
pub mod tree_cache;

#[cfg(test)]
mod test_support;

pub use command::{CommandRunner, GitCommand, LineSource};
pub use commit::Commit;
pub use config::ScanConfig;
pub use database::ObjectDatabase;
pub use error::{Error, Result};
pub use object::{AnyObject, Blob, Constructor, Object, ObjectId, ObjectKind, constructor_for};
pub use scan::ObjectStream;
pub use tag::Tag;
pub use tree::{BlobPath, BlobPathStream, Entry, EntryTarget, Tree};
pub use tree_cache::TreeCache;
pub use tokio_util::sync::CancellationToken;
