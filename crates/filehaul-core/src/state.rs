//! State machine values, conflicts, and overwrite decisions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr};

/// The kind of mutation a task performs. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum TaskKind {
    Move,
    Copy,
    Delete,
    Link,
    ChmodChown,
    Exec,
}

/// The task state machine.
///
/// `Running` is the only state that performs I/O. All intermediate states
/// return to `Running`; `Finish` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, FromRepr)]
#[repr(u8)]
pub enum TaskState {
    /// Normal execution.
    Running,
    /// The size pass gave up; the engine proceeds with an unknown total.
    SizeTimeout,
    /// The worker is blocked inside the overwrite resolver awaiting a decision.
    QueryOverwrite,
    /// A fault occurred; the observer decides continue-vs-abort.
    Error,
    /// The worker is suspended on the condition variable.
    Pause,
    /// The worker has not started mutation I/O yet.
    Queue,
    /// Terminal.
    Finish,
}

/// Sticky policy for destination collisions, mutable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OverwriteMode {
    /// Ask the observer for each collision.
    #[default]
    AskEach,
    /// Overwrite every colliding destination.
    OverwriteAll,
    /// Skip every colliding item.
    SkipAll,
    /// Probe `name-copy2.ext`, `name-copy3.ext`, ... for a free name.
    AutoRename,
}

/// A destination collision detected during an operation.
#[derive(Debug, Clone)]
pub struct Conflict {
    /// The source path being operated on.
    pub source: PathBuf,
    /// The destination path where the collision exists.
    pub destination: PathBuf,
    /// What occupies the destination.
    pub kind: ConflictKind,
}

impl Conflict {
    pub fn new(source: PathBuf, destination: PathBuf, kind: ConflictKind) -> Self {
        Self {
            source,
            destination,
            kind,
        }
    }
}

/// What kind of entry occupies a colliding destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// A file already exists at the destination.
    FileExists,
    /// A directory already exists at the destination.
    DirectoryExists,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileExists => write!(f, "File already exists"),
            Self::DirectoryExists => write!(f, "Directory already exists"),
        }
    }
}

/// The observer's reply to a single conflict. Consumed once per colliding
/// destination; sticky variants also update the task's overwrite mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Replace the existing destination.
    Overwrite,
    /// Skip this item.
    Skip,
    /// Retry with this replacement file name. A name that still collides
    /// is re-queried rather than silently overwritten.
    Rename(String),
    /// Replace this and all remaining collisions.
    OverwriteAll,
    /// Skip this and all remaining collisions.
    SkipAll,
    /// Auto-rename this and all remaining collisions.
    AutoRenameAll,
    /// Abort the entire task.
    Abort,
}

impl Decision {
    /// The overwrite mode a sticky decision installs, if any.
    pub fn sticky_mode(&self) -> Option<OverwriteMode> {
        match self {
            Self::OverwriteAll => Some(OverwriteMode::OverwriteAll),
            Self::SkipAll => Some(OverwriteMode::SkipAll),
            Self::AutoRenameAll => Some(OverwriteMode::AutoRename),
            _ => None,
        }
    }
}
