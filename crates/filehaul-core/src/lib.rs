//! Core task model for the filehaul engine.
//!
//! Defines the action sum type, runtime options, state-machine values,
//! conflict decisions, progress snapshots, and the error taxonomy shared
//! by the operation executors and the exec orchestrator.
//!
//! The engine targets Unix: mode bits, ownership, symlinks, and shell
//! execution are all expressed in POSIX terms.

mod action;
mod chmod;
mod error;
mod exec;
mod options;
mod progress;
mod state;

pub use action::TaskAction;
pub use chmod::{bit, ChmodAction, ModeChange, Ownership, MODE_BITS, MODE_BIT_COUNT};
pub use error::TaskError;
pub use exec::{ExecCommand, ExecSpec, ExecSpecBuilder};
pub use options::{ErrorPolicy, QueueThresholds, TaskOptions, TaskOptionsBuilder};
pub use progress::{ActiveClock, Outcome, ProgressSnapshot};
pub use state::{Conflict, ConflictKind, Decision, OverwriteMode, TaskKind, TaskState};

/// Fixed chunk size for streamed file copies.
pub const COPY_CHUNK_SIZE: usize = 64 * 1024;
