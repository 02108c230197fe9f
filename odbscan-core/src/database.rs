//! Object database handle
//!
//! [`ObjectDatabase`] ties together the storage directory, the command
//! runner used to read objects, and the tree cache shared by every object
//! read through this handle. Clones share the runner and the cache.

use bytes::Bytes;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::command::{CommandRunner, GitCommand};
use crate::config::ScanConfig;
use crate::error::{Error, Result};
use crate::object::{ObjectId, ObjectKind};
use crate::tree_cache::TreeCache;

/// Handle on one repository's object storage
#[derive(Clone)]
pub struct ObjectDatabase {
    git_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    tree_cache: Arc<TreeCache>,
    config: ScanConfig,
}

impl fmt::Debug for ObjectDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectDatabase")
            .field("git_dir", &self.git_dir)
            .field("cached_trees", &self.tree_cache.len())
            .field("config", &self.config)
            .finish()
    }
}

impl ObjectDatabase {
    /// Open the repository containing `dir` with the default configuration.
    ///
    /// `dir` may be a work tree, a bare repository, or the storage directory
    /// itself. An empty path means the current directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(dir, ScanConfig::default()).await
    }

    pub async fn open_with_config(dir: impl AsRef<Path>, config: ScanConfig) -> Result<Self> {
        let dir = match dir.as_ref() {
            p if p.as_os_str().is_empty() => Path::new("."),
            p => p,
        };
        let config = config.normalized();

        let locator = GitCommand::new(&config.git_binary, dir);
        let git_dir = discover_git_dir(&locator, dir)
            .await
            .map_err(|e| e.context(format!("Finding storage directory for {}", dir.display())))?;
        tracing::debug!(git_dir = %git_dir.display(), "opened object database");

        let runner = Arc::new(GitCommand::new(&config.git_binary, &git_dir));
        Ok(Self::with_runner(git_dir, runner, config))
    }

    /// Build a handle over an already-located storage directory
    pub fn with_runner(git_dir: PathBuf, runner: Arc<dyn CommandRunner>, config: ScanConfig) -> Self {
        Self {
            git_dir,
            runner,
            tree_cache: Arc::new(TreeCache::new()),
            config: config.normalized(),
        }
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.git_dir.join("objects")
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.objects_dir().join("pack")
    }

    pub fn tree_cache(&self) -> &TreeCache {
        &self.tree_cache
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run a storage tool subcommand and return its stdout
    pub async fn output(&self, args: &[&str]) -> Result<Bytes> {
        self.runner.output(args).await
    }

    /// Ask the store which kind of object `id` is
    pub async fn object_kind(&self, id: ObjectId) -> Result<ObjectKind> {
        let hex = id.to_hex();
        let output = self.output(&["cat-file", "-t", &hex]).await?;
        let text = String::from_utf8_lossy(&output);
        text.trim_end_matches('\n').parse()
    }

    /// Pretty-printed form of an object, byte for byte.
    ///
    /// Commit and tag text is not necessarily UTF-8, and tree entry names
    /// may come back C-quoted.
    pub async fn pretty_print(&self, id: ObjectId) -> Result<Bytes> {
        let hex = id.to_hex();
        self.output(&["cat-file", "-p", &hex]).await
    }

    /// Decompressed size of an object in bytes
    pub async fn object_size(&self, id: ObjectId) -> Result<u64> {
        let hex = id.to_hex();
        let output = self.output(&["cat-file", "-s", &hex]).await?;
        let text = String::from_utf8_lossy(&output);
        let text = text.trim_end_matches('\n');
        text.parse().map_err(|_| {
            Error::io(
                format!("Parsing size of {}", id),
                std::io::Error::other(format!("unexpected size output {:?}", text)),
            )
        })
    }

    /// Raw contents of an object of a known kind
    pub async fn object_contents(&self, kind: ObjectKind, id: ObjectId) -> Result<Bytes> {
        let hex = id.to_hex();
        self.output(&["cat-file", kind.as_str(), &hex]).await
    }
}

async fn discover_git_dir(runner: &GitCommand, dir: &Path) -> Result<PathBuf> {
    let output = match runner.output(&["rev-parse", "--absolute-git-dir"]).await {
        Ok(output) => output,
        Err(e) => {
            // Older tools lack --absolute-git-dir
            tracing::debug!(error = %e, "retrying git dir discovery with --git-dir");
            runner.output(&["rev-parse", "--git-dir"]).await?
        }
    };

    let reported = PathBuf::from(String::from_utf8_lossy(&output).trim_end_matches('\n'));
    if reported.is_absolute() {
        return Ok(normalize_lexically(&reported));
    }
    let base = std::path::absolute(dir)
        .map_err(|e| Error::io(format!("Finding absolute path for {}", dir.display()), e))?;
    Ok(normalize_lexically(&base.join(reported)))
}

/// Drop `.` components and fold `..` into their parent without touching the
/// filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

#[cfg(test)]
impl ObjectDatabase {
    /// Handle over a fake storage directory answering through `runner`
    pub(crate) fn for_tests(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_runner(PathBuf::from("/odbscan-test/.git"), runner, ScanConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{id, MockRunner};

    const BLOB: &str = "9daeafb9864cf43055ae93beb0afd6c7d144bfa4";

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(normalize_lexically(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_lexically(Path::new("/repo/.")), PathBuf::from("/repo"));
        assert_eq!(normalize_lexically(Path::new("/repo/work/../.git")), PathBuf::from("/repo/.git"));
    }

    #[test]
    fn test_derived_paths() {
        let db = ObjectDatabase::for_tests(Arc::new(MockRunner::new()));
        assert_eq!(db.objects_dir(), PathBuf::from("/odbscan-test/.git/objects"));
        assert_eq!(db.pack_dir(), PathBuf::from("/odbscan-test/.git/objects/pack"));
        assert!(db.tree_cache().is_empty());
    }

    #[tokio::test]
    async fn test_object_queries() {
        let runner = MockRunner::new()
            .respond(&["cat-file", "-t", BLOB], "blob\n")
            .respond(&["cat-file", "-s", BLOB], "5\n")
            .respond(&["cat-file", "blob", BLOB], "test\n");
        let db = ObjectDatabase::for_tests(Arc::new(runner));

        assert_eq!(db.object_kind(id(BLOB)).await.unwrap(), ObjectKind::Blob);
        assert_eq!(db.object_size(id(BLOB)).await.unwrap(), 5);
        assert_eq!(&db.object_contents(ObjectKind::Blob, id(BLOB)).await.unwrap()[..], b"test\n");

        let blob = crate::object::Blob::new(id(BLOB));
        assert_eq!(blob.size(&db).await.unwrap(), 5);
        assert_eq!(&blob.contents(&db).await.unwrap()[..], b"test\n");
    }

    #[tokio::test]
    async fn test_unknown_kind_reported() {
        let runner = MockRunner::new().respond(&["cat-file", "-t", BLOB], "gitlink\n");
        let db = ObjectDatabase::for_tests(Arc::new(runner));
        assert!(matches!(db.object_kind(id(BLOB)).await, Err(Error::UnknownKind(_))));
    }

    #[tokio::test]
    async fn test_open_outside_repository_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ScanConfig {
            git_binary: PathBuf::from("/nonexistent/odbscan-git"),
            ..ScanConfig::default()
        };
        let err = ObjectDatabase::open_with_config(dir.path(), config).await.unwrap_err();
        assert!(err.to_string().starts_with("Finding storage directory"));
        assert!(matches!(err.root_cause(), Error::Spawn { .. }));
    }
}
