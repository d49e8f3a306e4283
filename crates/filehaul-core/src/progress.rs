//! Progress snapshots and pause-aware time accounting.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::{TaskKind, TaskState};

/// A consistent view of a task's mutable fields, taken under the task
/// mutex. Safe to hand to any thread.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub kind: TaskKind,
    pub state: TaskState,
    /// Bytes processed so far. Monotonically non-decreasing.
    pub progress_bytes: u64,
    /// Total bytes, `None` until the size pass completes (or forever,
    /// after a size-pass timeout).
    pub total_bytes: Option<u64>,
    /// Index of the top-level item currently in progress.
    pub current_item: usize,
    /// The source path currently being worked on.
    pub current_source: Option<PathBuf>,
    /// The destination path currently being worked on.
    pub current_dest: Option<PathBuf>,
    /// Errors counted so far.
    pub error_count: usize,
    /// Device IDs touched by the task so far.
    pub devices_touched: Vec<u64>,
    /// Active time, excluding time spent paused.
    pub elapsed: Duration,
    /// Bytes per second since the last pause/resume baseline.
    pub rate: f64,
    /// OS process id of the spawned child, for exec tasks.
    pub exec_pid: Option<u32>,
}

impl ProgressSnapshot {
    /// Progress as a fraction of the total, when the total is known.
    pub fn percentage(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some((self.progress_bytes as f64 / total as f64) * 100.0)
            }
            Some(_) => Some(100.0),
            None => None,
        }
    }
}

/// Final result of a task, returned by `join()`.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    /// True if the task observed an abort request and unwound early.
    pub aborted: bool,
    /// Errors counted over the whole run.
    pub error_count: usize,
    /// Total bytes processed.
    pub bytes_processed: u64,
    /// Child exit code, for exec tasks.
    pub exit_code: Option<i32>,
}

impl Outcome {
    /// True if the task finished naturally without errors.
    pub fn is_success(&self) -> bool {
        !self.aborted && self.error_count == 0 && self.exit_code.unwrap_or(0) == 0
    }
}

/// Wall-clock accounting that excludes paused time.
///
/// Pausing freezes the elapsed counter; resuming resets the throughput
/// baseline so paused time never deflates the reported rate.
#[derive(Debug)]
pub struct ActiveClock {
    active: Duration,
    resumed_at: Option<Instant>,
    rate_baseline: Instant,
    rate_bytes: u64,
}

impl ActiveClock {
    /// Start the clock running.
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            active: Duration::ZERO,
            resumed_at: Some(now),
            rate_baseline: now,
            rate_bytes: 0,
        }
    }

    /// Freeze the elapsed counter.
    pub fn pause(&mut self) {
        if let Some(resumed) = self.resumed_at.take() {
            self.active += resumed.elapsed();
        }
    }

    /// Resume, resetting the rate baseline at the current byte count.
    pub fn resume(&mut self, progress_bytes: u64) {
        if self.resumed_at.is_none() {
            let now = Instant::now();
            self.resumed_at = Some(now);
            self.rate_baseline = now;
            self.rate_bytes = progress_bytes;
        }
    }

    /// Active time so far.
    pub fn elapsed(&self) -> Duration {
        self.active
            + self
                .resumed_at
                .map(|resumed| resumed.elapsed())
                .unwrap_or_default()
    }

    /// Bytes per second since the current baseline.
    pub fn rate(&self, progress_bytes: u64) -> f64 {
        if self.resumed_at.is_none() {
            return 0.0;
        }
        let secs = self.rate_baseline.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        progress_bytes.saturating_sub(self.rate_bytes) as f64 / secs
    }
}
