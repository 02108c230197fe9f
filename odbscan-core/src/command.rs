//! Storage tool invocation
//!
//! Everything odbscan learns about objects comes from running the storage
//! tool's subcommands through a [`CommandRunner`]. [`GitCommand`] runs the
//! real `git` binary; tests substitute a scripted runner.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout};

use crate::error::{Error, Result};

/// Runs storage tool subcommands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run with `args` and return stdout, or an error if the command could
    /// not be started or exited unsuccessfully
    async fn output(&self, args: &[&str]) -> Result<Bytes>;

    /// Run with `args` reading the file at `input` as stdin, and read stdout
    /// line by line.
    ///
    /// Fails only if the input cannot be opened or the command cannot be
    /// started; everything after that is reported by [`LineSource::finish`].
    async fn lines_with_input(&self, args: &[&str], input: &Path) -> Result<Box<dyn LineSource>>;
}

/// Line-oriented output of a running command
#[async_trait]
pub trait LineSource: Send {
    /// Next line without its terminator, or `None` at end of output or after
    /// a read error
    async fn next_line(&mut self) -> Option<String>;

    /// Stop reading, wait for the command, and return every failure seen,
    /// both its exit status and errors reading its output
    async fn finish(self: Box<Self>) -> Vec<Error>;
}

/// [`CommandRunner`] backed by the `git` executable
#[derive(Debug, Clone)]
pub struct GitCommand {
    binary: PathBuf,
    dir: PathBuf,
}

impl GitCommand {
    /// Run `binary` with `dir` as its working directory
    pub fn new(binary: impl Into<PathBuf>, dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.binary.display(), args.join(" "))
    }

    fn command(&self, args: &[&str]) -> tokio::process::Command {
        assert!(!args.is_empty(), "storage tool invoked without a subcommand");
        let mut command = tokio::process::Command::new(&self.binary);
        command
            .args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl CommandRunner for GitCommand {
    async fn output(&self, args: &[&str]) -> Result<Bytes> {
        let description = self.describe(args);
        tracing::trace!(command = %description, "running");

        let output = self
            .command(args)
            .output()
            .await
            .map_err(|source| Error::Spawn {
                command: description.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: description,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(Bytes::from(output.stdout))
    }

    async fn lines_with_input(&self, args: &[&str], input: &Path) -> Result<Box<dyn LineSource>> {
        let description = self.describe(args);
        let file = tokio::fs::File::open(input)
            .await
            .map_err(|e| Error::io(format!("Opening pack index {}", input.display()), e))?
            .into_std()
            .await;

        // show-index stops before the trailer, so the child reads the file directly
        let mut child = self
            .command(args)
            .stdin(Stdio::from(file))
            .spawn()
            .map_err(|source| Error::Spawn {
                command: description.clone(),
                source,
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(Error::io(
                format!("Attaching to `{}`", description),
                std::io::Error::other("child process pipes unavailable"),
            ));
        };

        Ok(Box::new(GitLineSource {
            description,
            child,
            lines: BufReader::new(stdout).lines(),
            stderr,
            scan_error: None,
        }))
    }
}

struct GitLineSource {
    description: String,
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stderr: ChildStderr,
    scan_error: Option<Error>,
}

#[async_trait]
impl LineSource for GitLineSource {
    async fn next_line(&mut self) -> Option<String> {
        if self.scan_error.is_some() {
            return None;
        }
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                self.scan_error = Some(Error::io(format!("Reading output of `{}`", self.description), e));
                None
            }
        }
    }

    async fn finish(self: Box<Self>) -> Vec<Error> {
        let GitLineSource {
            description,
            mut child,
            lines,
            mut stderr,
            scan_error,
        } = *self;
        let mut errors = Vec::new();

        // Unread output must not keep the child blocked on a full pipe
        drop(lines);

        let mut stderr_text = String::new();
        let _ = stderr.read_to_string(&mut stderr_text).await;

        match child.wait().await {
            Ok(status) if status.success() => {}
            Ok(status) => errors.push(Error::CommandFailed {
                command: description.clone(),
                code: status.code(),
                stderr: stderr_text.trim().to_string(),
            }),
            Err(e) => errors.push(Error::io(format!("Waiting for `{}`", description), e)),
        }

        errors.extend(scan_error);
        errors
    }
}
