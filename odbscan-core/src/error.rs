//! Error types for odbscan
//!
//! Every recoverable failure (I/O, a failing subcommand, a malformed object)
//! is an [`Error`]. Caller misuse is not: those conditions panic.

use std::path::PathBuf;

use crate::object::{ObjectId, ObjectKind};

/// Result type for object database operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scanning or reading objects
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", describe_exit(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Walking loose objects: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Invalid object id: {0:?}")]
    InvalidObjectId(String),

    #[error("Unknown object kind: {0:?}")]
    UnknownKind(String),

    #[error("Malformed {kind} {id}: {detail}")]
    Format {
        kind: ObjectKind,
        id: ObjectId,
        detail: String,
    },

    #[error("Unexpected line from index listing of {}: {line:?}", .path.display())]
    PackIndexLine { path: PathBuf, line: String },

    #[error("{}", join_messages(.0))]
    Aggregate(Vec<Error>),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Pipeline stage `{stage}` aborted: {message}")]
    StageAborted { stage: &'static str, message: String },

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// Wrap this error with a description of the operation that failed
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn format(kind: ObjectKind, id: ObjectId, detail: impl Into<String>) -> Self {
        Error::Format {
            kind,
            id,
            detail: detail.into(),
        }
    }

    /// Collapse a list of errors into one, or `None` when the list is empty
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Aggregate(errors)),
        }
    }

    /// Walk the `Context` chain down to the innermost error
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

fn join_messages(errors: &[Error]) -> String {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("{} errors occurred: {}", errors.len(), messages.join("; "))
}
