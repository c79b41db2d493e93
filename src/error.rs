//! Error types for recipe resolution and execution.

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving or executing a recipe.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing recipe fields.
    #[error("invalid recipe: {0}")]
    Config(String),

    /// The detected platform is not in the recipe's allow-list.
    #[error("unsupported {kind} {detected:?} (allowed: {allowed:?})")]
    UnsupportedTarget {
        /// `OS` or `Arch`.
        kind: &'static str,
        /// The value reported by the platform.
        detected: String,
        /// The recipe's allow-list.
        allowed: Vec<String>,
    },

    /// Template syntax or evaluation failure.
    #[error("template error: {0}")]
    Template(String),

    /// Transport, HTTP status or decode failure.
    #[error("request to {url} failed: {message}")]
    Network {
        /// The requested URL.
        url: String,
        /// What went wrong.
        message: String,
    },

    /// Remote content did not have the expected shape.
    #[error("unexpected format: {0}")]
    Format(String),

    /// Downloaded file does not match the expected digest.
    #[error("sha256 mismatch for {}: got {actual}, want {expected}", file.display())]
    ChecksumMismatch {
        /// The file that was hashed.
        file: PathBuf,
        /// Expected digest from the recipe.
        expected: String,
        /// Computed digest.
        actual: String,
    },

    /// Unsupported or corrupt archive.
    #[error("archive error: {0}")]
    Archive(String),

    /// A filesystem mutation failed.
    #[error("{op} {}: {source}", path.display())]
    Filesystem {
        /// Operation that failed (`mkdir`, `rename`, ...).
        op: &'static str,
        /// The path involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A spawned command failed or exited non-zero.
    #[error("process error: {0}")]
    Process(String),

    /// The operation was cancelled or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,

    /// A resolution stage failed.
    #[error("{stage}: {source}")]
    Resolve {
        /// Stage name, e.g. `resolve version`.
        stage: &'static str,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// An install action failed.
    #[error("{action}: {source}")]
    Action {
        /// Action type tag.
        action: &'static str,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML decoding error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl Error {
    /// Create a network error for `url`.
    pub fn network(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Wrap an IO error with the operation and path it belongs to.
    pub fn fs(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            op,
            path: path.into(),
            source,
        }
    }

    /// Attach a resolution stage name.
    pub fn in_stage(self, stage: &'static str) -> Self {
        Self::Resolve {
            stage,
            source: Box::new(self),
        }
    }

    /// Attach an action type tag.
    pub fn in_action(self, action: &'static str) -> Self {
        Self::Action {
            action,
            source: Box::new(self),
        }
    }

    /// Whether this error, or anything it wraps, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Resolve { source, .. } | Self::Action { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
