//! The task action sum type.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ExecSpec, ModeChange, Ownership, TaskError, TaskKind};

/// One filesystem mutation request. The variant is fixed at creation;
/// a task runs exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskAction {
    /// Move sources into a destination directory.
    Move {
        sources: Vec<PathBuf>,
        destination: PathBuf,
    },
    /// Copy sources into a destination directory.
    Copy {
        sources: Vec<PathBuf>,
        destination: PathBuf,
    },
    /// Delete targets, depth-first.
    Delete { targets: Vec<PathBuf> },
    /// Create symlinks in a destination directory pointing at the
    /// literal source paths.
    Link {
        sources: Vec<PathBuf>,
        destination: PathBuf,
    },
    /// Apply a mode change-list and/or ownership to targets.
    ChmodChown {
        targets: Vec<PathBuf>,
        change: ModeChange,
        owner: Ownership,
        recursive: bool,
    },
    /// Run an external command.
    Exec(ExecSpec),
}

impl TaskAction {
    /// Create a move action.
    pub fn move_to(sources: Vec<PathBuf>, destination: PathBuf) -> Self {
        Self::Move {
            sources,
            destination,
        }
    }

    /// Create a copy action.
    pub fn copy(sources: Vec<PathBuf>, destination: PathBuf) -> Self {
        Self::Copy {
            sources,
            destination,
        }
    }

    /// Create a delete action.
    pub fn delete(targets: Vec<PathBuf>) -> Self {
        Self::Delete { targets }
    }

    /// Create a link action.
    pub fn link(sources: Vec<PathBuf>, destination: PathBuf) -> Self {
        Self::Link {
            sources,
            destination,
        }
    }

    /// The kind tag for this action.
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Move { .. } => TaskKind::Move,
            Self::Copy { .. } => TaskKind::Copy,
            Self::Delete { .. } => TaskKind::Delete,
            Self::Link { .. } => TaskKind::Link,
            Self::ChmodChown { .. } => TaskKind::ChmodChown,
            Self::Exec(_) => TaskKind::Exec,
        }
    }

    /// The source/target path list, empty for exec.
    pub fn sources(&self) -> &[PathBuf] {
        match self {
            Self::Move { sources, .. } | Self::Copy { sources, .. } | Self::Link { sources, .. } => {
                sources
            }
            Self::Delete { targets } | Self::ChmodChown { targets, .. } => targets,
            Self::Exec(_) => &[],
        }
    }

    /// The destination directory, where the kind has one.
    pub fn destination(&self) -> Option<&Path> {
        match self {
            Self::Move { destination, .. }
            | Self::Copy { destination, .. }
            | Self::Link { destination, .. } => Some(destination),
            _ => None,
        }
    }

    /// Validate the action before a task starts.
    pub fn validate(&self) -> Result<(), TaskError> {
        if !matches!(self, Self::Exec(_)) && self.sources().is_empty() {
            return Err(TaskError::NoSources);
        }
        Ok(())
    }
}
