//! The task object: shared state, control plane, and worker dispatch.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use humansize::{format_size, BINARY};

use filehaul_core::{
    ActiveClock, Conflict, Decision, ExecSpec, Outcome, OverwriteMode, ProgressSnapshot,
    QueueThresholds, TaskAction, TaskError, TaskKind, TaskOptions, TaskState,
};

use crate::context::OpContext;
use crate::{chmod, copy, delete, link, move_op, size};

/// Whether the task should keep running after a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Abort,
}

/// The caller's view into a running task.
///
/// Invoked synchronously from the worker thread on every state
/// transition, and for each destination collision while the task is in
/// `QueryOverwrite`. The callback may pump an event loop, but it must not
/// call control methods (`abort`, `pause`, `resume`, `run`) on the same
/// task: the worker is blocked inside it.
pub trait TaskObserver: Send {
    /// Called on every state transition with a consistent snapshot.
    fn state_changed(&mut self, snapshot: &ProgressSnapshot, state: TaskState) -> Flow {
        let _ = (snapshot, state);
        Flow::Continue
    }

    /// Called for each collision the overwrite resolver cannot settle on
    /// its own. The default skips.
    fn resolve_conflict(&mut self, snapshot: &ProgressSnapshot, conflict: &Conflict) -> Decision {
        let _ = (snapshot, conflict);
        Decision::Skip
    }
}

/// Observer that never intervenes; sticky overwrite modes decide
/// everything, unresolved collisions are skipped.
pub struct SilentObserver;

impl TaskObserver for SilentObserver {}

/// Mutable task fields, guarded by the one task mutex.
struct ProgressState {
    overwrite_mode: OverwriteMode,
    progress_bytes: u64,
    total_bytes: Option<u64>,
    current_item: usize,
    current_source: Option<PathBuf>,
    current_dest: Option<PathBuf>,
    error_count: usize,
    devices: BTreeSet<u64>,
    log: String,
    clock: ActiveClock,
    queued: bool,
    aborted: bool,
    exit_code: Option<i32>,
    exec_pid: Option<u32>,
}

/// State shared between the task handle, its worker thread, and the
/// exec watchers.
pub(crate) struct TaskShared {
    pub(crate) action: TaskAction,
    pub(crate) options: TaskOptions,
    kind: TaskKind,
    progress: Mutex<ProgressState>,
    cond: Condvar,
    state_tag: AtomicU8,
    abort: Arc<AtomicBool>,
    pause: AtomicBool,
}

impl TaskShared {
    fn new(action: TaskAction, options: TaskOptions) -> Self {
        let kind = action.kind();
        let queued = options.queued;
        Self {
            action,
            kind,
            progress: Mutex::new(ProgressState {
                overwrite_mode: options.overwrite_mode,
                progress_bytes: 0,
                total_bytes: None,
                current_item: 0,
                current_source: None,
                current_dest: None,
                error_count: 0,
                devices: BTreeSet::new(),
                log: String::new(),
                clock: ActiveClock::start(),
                queued,
                aborted: false,
                exit_code: None,
                exec_pid: None,
            }),
            options,
            cond: Condvar::new(),
            state_tag: AtomicU8::new(TaskState::Running as u8),
            abort: Arc::new(AtomicBool::new(false)),
            pause: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn kind(&self) -> TaskKind {
        self.kind
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_repr(self.state_tag.load(Ordering::Acquire)).unwrap_or(TaskState::Running)
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state_tag.store(state as u8, Ordering::Release);
    }

    pub(crate) fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    pub(crate) fn request_abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
        self.cond.notify_all();
    }

    pub(crate) fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::Relaxed)
    }

    fn request_pause(&self) {
        self.pause.store(true, Ordering::Relaxed);
    }

    /// Clear the pause flag and promote out of the queue, waking the
    /// worker if it is parked.
    fn resume(&self) {
        self.pause.store(false, Ordering::Relaxed);
        self.lock().queued = false;
        self.cond.notify_all();
    }

    /// Park the worker until resumed or aborted. Paused time is excluded
    /// from elapsed/throughput accounting.
    pub(crate) fn park_while_paused(&self) {
        let mut progress = self.lock();
        progress.clock.pause();
        while self.pause.load(Ordering::Relaxed) && !self.abort.load(Ordering::Relaxed) {
            progress = self
                .cond
                .wait(progress)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let bytes = progress.progress_bytes;
        progress.clock.resume(bytes);
    }

    /// Park the worker until promoted out of the queue or aborted.
    fn park_while_queued(&self) {
        let mut progress = self.lock();
        progress.clock.pause();
        while progress.queued && !self.abort.load(Ordering::Relaxed) {
            progress = self
                .cond
                .wait(progress)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let bytes = progress.progress_bytes;
        progress.clock.resume(bytes);
    }

    fn promote(&self) {
        self.lock().queued = false;
    }

    pub(crate) fn overwrite_mode(&self) -> OverwriteMode {
        self.lock().overwrite_mode
    }

    pub(crate) fn set_overwrite_mode(&self, mode: OverwriteMode) {
        self.lock().overwrite_mode = mode;
    }

    pub(crate) fn append_log(&self, line: &str) {
        let mut progress = self.lock();
        progress.log.push_str(line);
        progress.log.push('\n');
    }

    pub(crate) fn bump_errors(&self) {
        self.lock().error_count += 1;
    }

    pub(crate) fn add_bytes(&self, bytes: u64) {
        self.lock().progress_bytes += bytes;
    }

    fn set_total(&self, total: Option<u64>) {
        self.lock().total_bytes = total;
    }

    pub(crate) fn begin_item(&self, index: usize) {
        self.lock().current_item = index;
    }

    pub(crate) fn publish(&self, source: &Path, dest: Option<&Path>) {
        let mut progress = self.lock();
        progress.current_source = Some(source.to_path_buf());
        progress.current_dest = dest.map(Path::to_path_buf);
    }

    pub(crate) fn record_device(&self, dev: u64) {
        self.lock().devices.insert(dev);
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        let progress = self.lock();
        ProgressSnapshot {
            kind: self.kind,
            state: self.state(),
            progress_bytes: progress.progress_bytes,
            total_bytes: progress.total_bytes,
            current_item: progress.current_item,
            current_source: progress.current_source.clone(),
            current_dest: progress.current_dest.clone(),
            error_count: progress.error_count,
            devices_touched: progress.devices.iter().copied().collect(),
            elapsed: progress.clock.elapsed(),
            rate: progress.clock.rate(progress.progress_bytes),
            exec_pid: progress.exec_pid,
        }
    }

    fn outcome(&self) -> Outcome {
        let progress = self.lock();
        Outcome {
            aborted: progress.aborted,
            error_count: progress.error_count,
            bytes_processed: progress.progress_bytes,
            exit_code: progress.exit_code,
        }
    }
}

/// One in-flight filesystem mutation request.
///
/// Single-shot: `run()` may be called once; after `Finish` the task is
/// only good for reading its outcome. Dropping an unfinished task aborts
/// it and joins the worker.
pub struct Task {
    shared: Arc<TaskShared>,
    worker: Option<JoinHandle<()>>,
    started: bool,
}

impl Task {
    /// Create a task. Validates the action (non-empty sources for
    /// everything but exec).
    pub fn new(action: TaskAction, options: TaskOptions) -> Result<Self, TaskError> {
        action.validate()?;
        Ok(Self {
            shared: Arc::new(TaskShared::new(action, options)),
            worker: None,
            started: false,
        })
    }

    pub fn kind(&self) -> TaskKind {
        self.shared.kind()
    }

    /// Cheap lock-free poll of the current state.
    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// A consistent snapshot of all progress fields, taken under the
    /// task mutex. Safe to call from any thread.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.shared.snapshot()
    }

    /// The append-only human-readable log accumulated so far.
    pub fn log(&self) -> String {
        self.shared.lock().log.clone()
    }

    /// The final result. Meaningful once the task reached `Finish`.
    pub fn outcome(&self) -> Outcome {
        self.shared.outcome()
    }

    /// Start the task. For all kinds but exec this spawns the worker
    /// thread and returns immediately; for exec the script is written and
    /// the child spawned inline, so spawn failures surface here.
    pub fn run(&mut self, observer: Box<dyn TaskObserver>) -> Result<(), TaskError> {
        if self.started {
            return Err(TaskError::AlreadyStarted);
        }
        self.started = true;

        let exec_spec = match &self.shared.action {
            TaskAction::Exec(spec) => Some(spec.clone()),
            _ => None,
        };
        if let Some(spec) = exec_spec {
            return self.run_exec(spec, observer);
        }

        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name("filehaul-task".to_string())
            .spawn(move || worker_main(&shared, observer))
            .map_err(|e| TaskError::Spawn {
                command: "filehaul-task worker".to_string(),
                source: e,
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn run_exec(
        &mut self,
        spec: ExecSpec,
        mut observer: Box<dyn TaskObserver>,
    ) -> Result<(), TaskError> {
        let shared = Arc::clone(&self.shared);
        shared.set_state(TaskState::Running);
        let snapshot = shared.snapshot();
        if observer.state_changed(&snapshot, TaskState::Running) == Flow::Abort {
            shared.request_abort();
        }

        let log_target = Arc::clone(&self.shared);
        let sink: filehaul_exec::LineSink =
            Box::new(move |_stream, line| log_target.append_log(line));

        match filehaul_exec::launch(&spec, sink, Arc::clone(&shared.abort)) {
            Ok(handle) => {
                shared.lock().exec_pid = Some(handle.pid());
                let worker = thread::Builder::new()
                    .name("filehaul-exec-wait".to_string())
                    .spawn(move || {
                        let result = handle.wait();
                        {
                            let mut progress = shared.lock();
                            progress.exit_code = result.exit_code;
                            progress.aborted = result.aborted;
                            progress.clock.pause();
                        }
                        shared.set_state(TaskState::Finish);
                        let snapshot = shared.snapshot();
                        let _ = observer.state_changed(&snapshot, TaskState::Finish);
                    })
                    .map_err(|e| TaskError::Spawn {
                        command: "filehaul-exec-wait worker".to_string(),
                        source: e,
                    })?;
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                shared.append_log(&format!("error: {e}"));
                shared.bump_errors();
                shared.set_state(TaskState::Error);
                let snapshot = shared.snapshot();
                let _ = observer.state_changed(&snapshot, TaskState::Error);
                shared.set_state(TaskState::Finish);
                let snapshot = shared.snapshot();
                let _ = observer.state_changed(&snapshot, TaskState::Finish);
                Err(e)
            }
        }
    }

    /// Request a cooperative abort. Already-started syscalls finish; the
    /// next boundary unwinds without further writes.
    pub fn abort(&self) {
        self.shared.request_abort();
    }

    /// Suspend the worker at its next checkpoint.
    pub fn pause(&self) {
        self.shared.request_pause();
    }

    /// Wake a paused worker, or promote a queued task.
    pub fn resume(&self) {
        self.shared.resume();
    }

    /// Change the collision policy mid-task.
    pub fn set_overwrite_mode(&self, mode: OverwriteMode) {
        self.shared.set_overwrite_mode(mode);
    }

    #[cfg(test)]
    pub(crate) fn shared_for_tests(&self) -> &TaskShared {
        &self.shared
    }

    /// Wait for the worker to finish and return the outcome.
    pub fn join(&mut self) -> Outcome {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.shared.outcome()
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.shared.request_abort();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_main(shared: &Arc<TaskShared>, mut observer: Box<dyn TaskObserver>) {
    let mut cx = OpContext {
        shared: shared.as_ref(),
        observer: observer.as_mut(),
    };
    let result = run_pipeline(&mut cx);

    {
        let mut progress = shared.lock();
        progress.aborted = result.is_err();
        progress.clock.pause();
    }
    let summary = {
        let outcome = shared.outcome();
        format!(
            "{} {}: {} processed, {} error(s)",
            shared.kind(),
            if outcome.aborted { "aborted" } else { "complete" },
            format_size(outcome.bytes_processed, BINARY),
            outcome.error_count,
        )
    };
    shared.append_log(&summary);
    tracing::debug!("{summary}");
    let _ = cx.transition(TaskState::Finish);
}

fn run_pipeline(cx: &mut OpContext<'_>) -> Result<(), crate::context::Stop> {
    cx.transition(TaskState::Running)?;

    let total = size::estimate(cx)?;
    cx.shared.set_total(total);

    if cx.shared.options.queued {
        if should_bypass_queue(cx.shared.kind(), total, &cx.shared.options.thresholds) {
            cx.shared.promote();
            cx.log("small task, bypassing queue");
        } else {
            cx.transition(TaskState::Queue)?;
            cx.shared.park_while_queued();
            if cx.shared.abort_requested() {
                return Err(crate::context::Stop::Aborted);
            }
            cx.transition(TaskState::Running)?;
        }
    }

    let action = cx.shared.action.clone();
    match &action {
        TaskAction::Move {
            sources,
            destination,
        } => move_op::run(cx, sources, destination),
        TaskAction::Copy {
            sources,
            destination,
        } => copy::run(cx, sources, destination),
        TaskAction::Delete { targets } => delete::run(cx, targets),
        TaskAction::Link {
            sources,
            destination,
        } => link::run(cx, sources, destination),
        TaskAction::ChmodChown {
            targets,
            change,
            owner,
            recursive,
        } => chmod::run(cx, targets, change, owner, *recursive),
        // Exec never reaches the worker; it is dispatched inline by run().
        TaskAction::Exec(_) => Ok(()),
    }
}

/// Small tasks skip the queue once their size is known; kinds without a
/// threshold always do. An unknown total never bypasses.
fn should_bypass_queue(kind: TaskKind, total: Option<u64>, thresholds: &QueueThresholds) -> bool {
    match thresholds.for_kind(kind) {
        None => true,
        Some(limit) => total.is_some_and(|bytes| bytes < limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_bypass_small_copy() {
        let thresholds = QueueThresholds::default();
        assert!(should_bypass_queue(TaskKind::Copy, Some(1024), &thresholds));
        assert!(!should_bypass_queue(
            TaskKind::Copy,
            Some(100 * 1024 * 1024),
            &thresholds
        ));
    }

    #[test]
    fn test_queue_unknown_total_never_bypasses() {
        let thresholds = QueueThresholds::default();
        assert!(!should_bypass_queue(TaskKind::Copy, None, &thresholds));
    }

    #[test]
    fn test_queue_unlimited_kinds_bypass() {
        let thresholds = QueueThresholds::default();
        assert!(should_bypass_queue(TaskKind::Link, None, &thresholds));
        assert!(should_bypass_queue(
            TaskKind::ChmodChown,
            None,
            &thresholds
        ));
    }

    #[test]
    fn test_delete_threshold_is_larger() {
        let thresholds = QueueThresholds::default();
        let bytes = 100 * 1024 * 1024;
        assert!(!should_bypass_queue(TaskKind::Copy, Some(bytes), &thresholds));
        assert!(should_bypass_queue(TaskKind::Delete, Some(bytes), &thresholds));
    }

    #[test]
    fn test_run_twice_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), "x").unwrap();
        let action = TaskAction::delete(vec![dir.path().join("f")]);
        let mut task = Task::new(action, TaskOptions::default()).unwrap();
        task.run(Box::new(SilentObserver)).unwrap();
        task.join();
        assert!(matches!(
            task.run(Box::new(SilentObserver)),
            Err(TaskError::AlreadyStarted)
        ));
    }
}
