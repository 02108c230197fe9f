//! Scripted command runner and fake storage directories for unit tests

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::command::{CommandRunner, LineSource};
use crate::config::ScanConfig;
use crate::database::ObjectDatabase;
use crate::error::{Error, Result};
use crate::object::ObjectId;

pub(crate) fn id(hex: &str) -> ObjectId {
    ObjectId::from_hex(hex).unwrap()
}

/// One line of pretty-printed tree output
pub(crate) fn tree_line(mode: &str, kind: &str, hex: &str, name: &str) -> String {
    format!("{} {} {}\t{}", mode, kind, hex, name)
}

/// One line of index listing output
pub(crate) fn index_line(hex: &str) -> String {
    format!("12 {} (0a1b2c3d)", hex)
}

#[derive(Debug, Clone)]
enum Response {
    Output(Bytes),
    Fail(String),
    Panic,
}

#[derive(Debug, Clone)]
struct IndexListing {
    lines: Vec<String>,
    finish_errors: Vec<String>,
}

/// [`CommandRunner`] answering from a table of argument vectors
#[derive(Debug, Default)]
pub(crate) struct MockRunner {
    responses: HashMap<Vec<String>, Response>,
    indexes: HashMap<PathBuf, IndexListing>,
    calls: Mutex<Vec<Vec<String>>>,
    delay: Option<Duration>,
}

fn key(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

fn failure(args: &[&str], stderr: &str) -> Error {
    Error::CommandFailed {
        command: format!("mock {}", args.join(" ")),
        code: Some(128),
        stderr: stderr.to_string(),
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, args: &[&str], output: impl Into<Bytes>) -> Self {
        self.responses.insert(key(args), Response::Output(output.into()));
        self
    }

    pub fn fail(mut self, args: &[&str], stderr: &str) -> Self {
        self.responses.insert(key(args), Response::Fail(stderr.to_string()));
        self
    }

    pub fn panic_on(mut self, args: &[&str]) -> Self {
        self.responses.insert(key(args), Response::Panic);
        self
    }

    /// Answer `cat-file -t` for each `(id, kind)` pair
    pub fn kinds(mut self, kinds: &[(&str, &str)]) -> Self {
        for (hex, kind) in kinds {
            self = self.respond(&["cat-file", "-t", hex], format!("{}\n", kind));
        }
        self
    }

    /// List `ids` when `show-index` is fed the file at `path`
    pub fn index<'a>(self, path: &Path, ids: impl IntoIterator<Item = &'a str>) -> Self {
        let lines = ids.into_iter().map(index_line).collect();
        self.index_lines(path, lines)
    }

    pub fn index_lines(self, path: &Path, lines: Vec<String>) -> Self {
        self.index_failing(path, lines, &[])
    }

    /// Emit `lines`, then report one failure per entry of `finish_errors`
    pub fn index_failing(mut self, path: &Path, lines: Vec<String>, finish_errors: &[&str]) -> Self {
        let finish_errors = finish_errors.iter().map(|s| s.to_string()).collect();
        self.indexes
            .insert(path.to_path_buf(), IndexListing { lines, finish_errors });
        self
    }

    /// Sleep this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `args` was run
    pub fn calls_to(&self, args: &[&str]) -> usize {
        let wanted = key(args);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| **call == wanted)
            .count()
    }

    async fn record(&self, args: &[&str]) {
        self.calls.lock().unwrap().push(key(args));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn output(&self, args: &[&str]) -> Result<Bytes> {
        self.record(args).await;
        match self.responses.get(&key(args)) {
            Some(Response::Output(bytes)) => Ok(bytes.clone()),
            Some(Response::Fail(stderr)) => Err(failure(args, stderr)),
            Some(Response::Panic) => panic!("scripted panic for {:?}", args),
            None => Err(failure(args, "fatal: no scripted response")),
        }
    }

    async fn lines_with_input(&self, args: &[&str], input: &Path) -> Result<Box<dyn LineSource>> {
        self.record(args).await;
        let Some(listing) = self.indexes.get(input) else {
            return Err(Error::io(
                format!("Opening pack index {}", input.display()),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        };
        let finish_errors = listing
            .finish_errors
            .iter()
            .map(|stderr| failure(args, stderr))
            .collect();
        Ok(Box::new(VecLineSource {
            lines: listing.lines.iter().cloned().collect(),
            finish_errors,
        }))
    }
}

struct VecLineSource {
    lines: VecDeque<String>,
    finish_errors: Vec<Error>,
}

#[async_trait]
impl LineSource for VecLineSource {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    async fn finish(self: Box<Self>) -> Vec<Error> {
        self.finish_errors
    }
}

/// Temporary storage directory laid out like `.git/objects`
pub(crate) struct FakeStore {
    dir: TempDir,
}

impl FakeStore {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("objects").join("pack")).unwrap();
        Self { dir }
    }

    pub fn git_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.git_dir().join("objects")
    }

    /// Create an empty file at `relative` below `objects/`
    pub fn add_file(&self, relative: &str) -> PathBuf {
        let path = self.objects_dir().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"").unwrap();
        path
    }

    pub fn add_loose(&self, hex: &str) -> PathBuf {
        self.add_file(&format!("{}/{}", &hex[..2], &hex[2..]))
    }

    pub fn add_pack(&self, name: &str) -> PathBuf {
        self.add_file(&format!("pack/{}", name))
    }

    pub fn database(&self, runner: MockRunner) -> ObjectDatabase {
        ObjectDatabase::with_runner(self.git_dir().to_path_buf(), Arc::new(runner), ScanConfig::default())
    }
}
