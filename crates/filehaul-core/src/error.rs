//! Error types for task execution.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while running a task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error with path context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Source and destination are the same file.
    #[error("Cannot overwrite {path} with itself")]
    OverwriteSelf { path: PathBuf },

    /// Auto-rename ran out of candidate names.
    #[error("No free name for {path} after {attempts} attempts")]
    RenameExhausted { path: PathBuf, attempts: u32 },

    /// A source path has no final component to name the destination after.
    #[error("Source path has no file name: {path}")]
    NoFileName { path: PathBuf },

    /// The task was created without any source paths.
    #[error("Task has no source paths")]
    NoSources,

    /// `run()` was called more than once.
    #[error("Task was already started")]
    AlreadyStarted,

    /// Failed to write the transient command script.
    #[error("Failed to write command script: {source}")]
    ScriptWrite {
        #[source]
        source: std::io::Error,
    },

    /// Failed to spawn a child process.
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl TaskError {
    /// Create an I/O error with path context, classifying common kinds.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Infrastructural errors always abort the task regardless of the
    /// caller's error policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ScriptWrite { .. } | Self::Spawn { .. } | Self::AlreadyStarted | Self::NoSources
        )
    }
}
