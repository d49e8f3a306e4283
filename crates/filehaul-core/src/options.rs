//! Task runtime options.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::{OverwriteMode, TaskKind};

/// What to do when a per-item error occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ErrorPolicy {
    /// Log, count, and keep walking (the observer may still abort).
    #[default]
    Continue,
    /// Abort the task on the first error.
    AbortOnFirst,
}

/// Size thresholds below which a queued task bypasses the queue.
///
/// Queuing exists to keep many large I/O-heavy tasks from thrashing shared
/// devices, not to throttle cheap ones. The defaults are workload-dependent
/// guesses; callers should tune them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueThresholds {
    /// Move and copy tasks below this many bytes skip the queue.
    pub move_copy: u64,
    /// Delete tasks below this many bytes skip the queue.
    pub delete: u64,
}

impl Default for QueueThresholds {
    fn default() -> Self {
        Self {
            move_copy: 10 * 1024 * 1024,
            delete: 5 * 1024 * 1024 * 1024,
        }
    }
}

impl QueueThresholds {
    /// The threshold applying to a task kind, `None` if that kind always
    /// bypasses the queue.
    pub fn for_kind(&self, kind: TaskKind) -> Option<u64> {
        match kind {
            TaskKind::Move | TaskKind::Copy => Some(self.move_copy),
            TaskKind::Delete => Some(self.delete),
            _ => None,
        }
    }
}

/// Options shared by all task kinds.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct TaskOptions {
    /// Initial collision policy; mutable while the task runs.
    #[builder(default)]
    #[serde(default)]
    pub overwrite_mode: OverwriteMode,

    /// Per-item error handling.
    #[builder(default)]
    #[serde(default)]
    pub error_policy: ErrorPolicy,

    /// Start in the `Queue` state instead of running immediately.
    #[builder(default)]
    #[serde(default)]
    pub queued: bool,

    /// Smart-queue bypass thresholds.
    #[builder(default)]
    #[serde(default)]
    pub thresholds: QueueThresholds,

    /// Hard deadline for the size-estimation pass.
    #[builder(default = "Duration::from_secs(5)")]
    #[serde(default = "default_size_deadline")]
    pub size_pass_deadline: Duration,
}

fn default_size_deadline() -> Duration {
    Duration::from_secs(5)
}

impl TaskOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(deadline) = self.size_pass_deadline {
            if deadline.is_zero() {
                return Err("size_pass_deadline must be non-zero".to_string());
            }
        }
        Ok(())
    }
}

impl TaskOptions {
    /// Create a new options builder.
    pub fn builder() -> TaskOptionsBuilder {
        TaskOptionsBuilder::default()
    }
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            overwrite_mode: OverwriteMode::default(),
            error_policy: ErrorPolicy::default(),
            queued: false,
            thresholds: QueueThresholds::default(),
            size_pass_deadline: default_size_deadline(),
        }
    }
}
