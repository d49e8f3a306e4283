//! Worker-side view of a task: checkpoints, transitions, and error
//! bookkeeping shared by every executor.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use filehaul_core::{TaskError, TaskState};

use crate::task::{Flow, TaskObserver, TaskShared};

/// Raised when the task must stop unwinding through the executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stop {
    Aborted,
}

pub(crate) struct OpContext<'a> {
    pub(crate) shared: &'a TaskShared,
    pub(crate) observer: &'a mut dyn TaskObserver,
}

impl OpContext<'_> {
    /// Honor pending abort and pause requests. Called at every recursion
    /// boundary so no entry is half-processed on resume.
    pub(crate) fn checkpoint(&mut self) -> Result<(), Stop> {
        if self.shared.abort_requested() {
            return Err(Stop::Aborted);
        }
        if self.shared.pause_requested() {
            self.transition(TaskState::Pause)?;
            self.shared.park_while_paused();
            if self.shared.abort_requested() {
                return Err(Stop::Aborted);
            }
            self.transition(TaskState::Running)?;
        }
        Ok(())
    }

    /// Move to `state` and notify the observer with a fresh snapshot.
    pub(crate) fn transition(&mut self, state: TaskState) -> Result<(), Stop> {
        self.shared.set_state(state);
        let snapshot = self.shared.snapshot();
        if self.observer.state_changed(&snapshot, state) == Flow::Abort {
            self.shared.request_abort();
            return Err(Stop::Aborted);
        }
        Ok(())
    }

    /// Record a per-entry error and either continue or unwind, depending
    /// on the error policy and the error itself.
    pub(crate) fn error(&mut self, err: TaskError) -> Result<(), Stop> {
        tracing::warn!("task error: {err}");
        self.shared.append_log(&format!("error: {err}"));
        self.shared.bump_errors();
        let fatal = err.is_fatal()
            || self.shared.options.error_policy == filehaul_core::ErrorPolicy::AbortOnFirst;
        self.transition(TaskState::Error)?;
        if fatal {
            self.shared.request_abort();
            return Err(Stop::Aborted);
        }
        self.transition(TaskState::Running)
    }

    /// Record an error that the task cannot survive regardless of
    /// policy, such as an unusable destination directory.
    pub(crate) fn fatal(&mut self, err: TaskError) -> Stop {
        tracing::warn!("fatal task error: {err}");
        self.shared.append_log(&format!("fatal: {err}"));
        self.shared.bump_errors();
        self.shared.set_state(TaskState::Error);
        let snapshot = self.shared.snapshot();
        let _ = self.observer.state_changed(&snapshot, TaskState::Error);
        self.shared.request_abort();
        Stop::Aborted
    }

    pub(crate) fn log(&self, line: &str) {
        self.shared.append_log(line);
    }

    pub(crate) fn publish(&self, source: &Path, dest: Option<&Path>) {
        self.shared.publish(source, dest);
    }

    pub(crate) fn begin_item(&self, index: usize) {
        self.shared.begin_item(index);
    }

    pub(crate) fn add_bytes(&self, bytes: u64) {
        self.shared.add_bytes(bytes);
    }

    pub(crate) fn record_device(&self, dev: u64) {
        self.shared.record_device(dev);
    }
}

/// Device ID of an already-stat'ed entry.
pub(crate) fn device_of(md: &fs::Metadata) -> u64 {
    md.dev()
}

/// Whether two paths name the same filesystem object, without following
/// symlinks. Missing paths compare unequal.
pub(crate) fn same_inode(a: &Path, b: &Path) -> bool {
    match (fs::symlink_metadata(a), fs::symlink_metadata(b)) {
        (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
        _ => false,
    }
}

/// Make sure the destination directory exists, creating parents as
/// needed. Failure here dooms every entry, so it is always fatal.
pub(crate) fn ensure_dest_dir(cx: &mut OpContext<'_>, dir: &Path) -> Result<(), Stop> {
    match fs::symlink_metadata(dir) {
        Ok(md) if md.is_dir() => {
            cx.record_device(device_of(&md));
            Ok(())
        }
        _ => match fs::create_dir_all(dir) {
            Ok(()) => {
                if let Ok(md) = fs::symlink_metadata(dir) {
                    cx.record_device(device_of(&md));
                }
                Ok(())
            }
            Err(e) => Err(cx.fatal(TaskError::io(dir, e))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_inode_detects_hard_link() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "x").unwrap();
        fs::hard_link(&a, &b).unwrap();
        assert!(same_inode(&a, &b));
        assert!(same_inode(&a, &a));
    }

    #[test]
    fn test_same_inode_distinct_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "x").unwrap();
        fs::write(&b, "x").unwrap();
        assert!(!same_inode(&a, &b));
    }

    #[test]
    fn test_same_inode_missing_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = dir.path().join("a");
        fs::write(&a, "x").unwrap();
        assert!(!same_inode(&a, &dir.path().join("missing")));
    }
}
