//! End-to-end tests driving whole tasks against real temp trees.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};

use filehaul_core::{
    bit, ChmodAction, Conflict, Decision, ExecSpec, ModeChange, Outcome, Ownership,
    ProgressSnapshot, TaskAction, TaskError, TaskKind, TaskOptions, TaskOptionsBuilder, TaskState,
};
use filehaul_ops::{SilentObserver, Task, TaskObserver};

fn run_silent(action: TaskAction) -> (Task, Outcome) {
    run_with(action, TaskOptions::default(), Box::new(SilentObserver))
}

fn run_with(
    action: TaskAction,
    options: TaskOptions,
    observer: Box<dyn TaskObserver>,
) -> (Task, Outcome) {
    let mut task = Task::new(action, options).unwrap();
    task.run(observer).unwrap();
    let outcome = task.join();
    (task, outcome)
}

/// Poll the task until it reaches `state`, or panic after two seconds.
fn wait_for_state(task: &Task, state: TaskState) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while task.state() != state {
        assert!(
            Instant::now() < deadline,
            "task never reached {state}, stuck in {}",
            task.state()
        );
        sleep(Duration::from_millis(5));
    }
}

/// Observer that counts conflict queries and answers each with a fixed
/// decision.
struct CountingObserver {
    asked: Arc<Mutex<usize>>,
    decision: Decision,
}

impl TaskObserver for CountingObserver {
    fn resolve_conflict(&mut self, _snapshot: &ProgressSnapshot, _conflict: &Conflict) -> Decision {
        *self.asked.lock().unwrap() += 1;
        self.decision.clone()
    }
}

fn make_tree(root: &Path) {
    fs::create_dir(root.join("A")).unwrap();
    fs::write(root.join("A/f1"), vec![1u8; 100]).unwrap();
    fs::create_dir(root.join("A/sub")).unwrap();
    fs::write(root.join("A/sub/f2"), vec![2u8; 50]).unwrap();
}

#[test]
fn test_copy_tree() {
    let src = tempfile::TempDir::new().unwrap();
    let dst = tempfile::TempDir::new().unwrap();
    make_tree(src.path());

    let action = TaskAction::copy(vec![src.path().join("A")], dst.path().to_path_buf());
    let (task, outcome) = run_silent(action);

    assert!(outcome.is_success(), "log: {}", task.log());
    assert_eq!(
        fs::read(dst.path().join("A/f1")).unwrap(),
        vec![1u8; 100]
    );
    assert_eq!(
        fs::read(dst.path().join("A/sub/f2")).unwrap(),
        vec![2u8; 50]
    );
    // Source untouched.
    assert!(src.path().join("A/f1").exists());

    let snapshot = task.snapshot();
    assert_eq!(snapshot.state, TaskState::Finish);
    assert_eq!(Some(snapshot.progress_bytes), snapshot.total_bytes);
    assert_eq!(snapshot.percentage(), Some(100.0));
    assert!(!snapshot.devices_touched.is_empty());
}

#[test]
fn test_copy_auto_rename_leaves_existing_intact() {
    let src = tempfile::TempDir::new().unwrap();
    let dst = tempfile::TempDir::new().unwrap();
    make_tree(src.path());
    // Pre-existing destination content that must survive.
    fs::create_dir(dst.path().join("A")).unwrap();
    fs::write(dst.path().join("A/f1"), b"x").unwrap();

    let options = TaskOptionsBuilder::default()
        .overwrite_mode(filehaul_core::OverwriteMode::AutoRename)
        .build()
        .unwrap();
    let action = TaskAction::copy(vec![src.path().join("A")], dst.path().to_path_buf());
    let (task, outcome) = run_with(action, options, Box::new(SilentObserver));

    assert!(outcome.is_success(), "log: {}", task.log());
    assert_eq!(fs::read(dst.path().join("A/f1")).unwrap(), b"x");
    assert_eq!(
        fs::read(dst.path().join("A/f1-copy2")).unwrap(),
        vec![1u8; 100]
    );
    // Directories merge without renaming.
    assert_eq!(
        fs::read(dst.path().join("A/sub/f2")).unwrap(),
        vec![2u8; 50]
    );
}

#[test]
fn test_auto_rename_suffix_increments() {
    let src = tempfile::TempDir::new().unwrap();
    let dst = tempfile::TempDir::new().unwrap();
    fs::write(src.path().join("dup.txt"), b"new").unwrap();
    fs::write(dst.path().join("dup.txt"), b"old").unwrap();

    let options = TaskOptionsBuilder::default()
        .overwrite_mode(filehaul_core::OverwriteMode::AutoRename)
        .build()
        .unwrap();
    for _ in 0..2 {
        let action = TaskAction::copy(vec![src.path().join("dup.txt")], dst.path().to_path_buf());
        let (_, outcome) = run_with(action, options.clone(), Box::new(SilentObserver));
        assert!(outcome.is_success());
    }

    assert_eq!(fs::read(dst.path().join("dup.txt")).unwrap(), b"old");
    assert_eq!(fs::read(dst.path().join("dup-copy2.txt")).unwrap(), b"new");
    assert_eq!(fs::read(dst.path().join("dup-copy3.txt")).unwrap(), b"new");
}

#[test]
fn test_move_same_device() {
    let root = tempfile::TempDir::new().unwrap();
    let dst = root.path().join("dest");
    make_tree(root.path());

    let action = TaskAction::move_to(vec![root.path().join("A")], dst.clone());
    let (task, outcome) = run_silent(action);

    assert!(outcome.is_success(), "log: {}", task.log());
    assert!(!root.path().join("A").exists());
    assert_eq!(fs::read(dst.join("A/f1")).unwrap(), vec![1u8; 100]);
    assert_eq!(fs::read(dst.join("A/sub/f2")).unwrap(), vec![2u8; 50]);
}

#[test]
fn test_move_merges_into_existing_directory() {
    let root = tempfile::TempDir::new().unwrap();
    make_tree(root.path());
    let dst = root.path().join("dest");
    fs::create_dir_all(dst.join("A")).unwrap();
    fs::write(dst.join("A/keep"), b"k").unwrap();

    let action = TaskAction::move_to(vec![root.path().join("A")], dst.clone());
    let (task, outcome) = run_silent(action);

    assert!(outcome.is_success(), "log: {}", task.log());
    assert!(!root.path().join("A").exists());
    assert_eq!(fs::read(dst.join("A/keep")).unwrap(), b"k");
    assert_eq!(fs::read(dst.join("A/f1")).unwrap(), vec![1u8; 100]);
    assert_eq!(fs::read(dst.join("A/sub/f2")).unwrap(), vec![2u8; 50]);
}

#[test]
fn test_delete_tree_and_missing_target() {
    let root = tempfile::TempDir::new().unwrap();
    make_tree(root.path());

    let action = TaskAction::delete(vec![
        root.path().join("A"),
        root.path().join("never-existed"),
    ]);
    let (task, outcome) = run_silent(action);

    assert!(outcome.is_success(), "log: {}", task.log());
    assert!(!root.path().join("A").exists());
    assert!(task.log().contains("already gone"));
}

#[test]
fn test_chmod_clears_owner_write() {
    let root = tempfile::TempDir::new().unwrap();
    let file = root.path().join("f");
    fs::write(&file, b"x").unwrap();
    fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

    let change = ModeChange::keep_all().with(bit::OWNER_WRITE, ChmodAction::Clear);
    let action = TaskAction::ChmodChown {
        targets: vec![file.clone()],
        change,
        owner: Ownership::default(),
        recursive: false,
    };
    let (_, outcome) = run_silent(action);

    assert!(outcome.is_success());
    let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o7777;
    assert_eq!(mode, 0o444);
}

#[test]
fn test_chmod_recursive() {
    let root = tempfile::TempDir::new().unwrap();
    make_tree(root.path());
    fs::set_permissions(
        root.path().join("A/sub/f2"),
        fs::Permissions::from_mode(0o666),
    )
    .unwrap();

    let change = ModeChange::keep_all().with(bit::OTHER_WRITE, ChmodAction::Clear);
    let action = TaskAction::ChmodChown {
        targets: vec![root.path().join("A")],
        change,
        owner: Ownership::default(),
        recursive: true,
    };
    let (_, outcome) = run_silent(action);

    assert!(outcome.is_success());
    let mode = fs::metadata(root.path().join("A/sub/f2"))
        .unwrap()
        .permissions()
        .mode()
        & 0o7777;
    assert_eq!(mode, 0o664);
}

#[test]
fn test_link_points_back_at_source() {
    let src = tempfile::TempDir::new().unwrap();
    let dst = tempfile::TempDir::new().unwrap();
    fs::write(src.path().join("f"), b"x").unwrap();

    let action = TaskAction::link(vec![src.path().join("f")], dst.path().to_path_buf());
    let (_, outcome) = run_silent(action);

    assert!(outcome.is_success());
    assert_eq!(
        fs::read_link(dst.path().join("f")).unwrap(),
        src.path().join("f")
    );
}

#[test]
fn test_link_to_missing_source_is_created_broken() {
    let src = tempfile::TempDir::new().unwrap();
    let dst = tempfile::TempDir::new().unwrap();
    let ghost = src.path().join("ghost");

    let action = TaskAction::link(vec![ghost.clone()], dst.path().to_path_buf());
    let (_, outcome) = run_silent(action);

    assert!(outcome.is_success());
    let link = dst.path().join("ghost");
    assert!(fs::symlink_metadata(&link).unwrap().is_symlink());
    assert_eq!(fs::read_link(&link).unwrap(), ghost);
}

#[test]
fn test_copy_preserves_symlinks() {
    let src = tempfile::TempDir::new().unwrap();
    let dst = tempfile::TempDir::new().unwrap();
    fs::write(src.path().join("target"), b"x").unwrap();
    std::os::unix::fs::symlink("target", src.path().join("ln")).unwrap();

    let action = TaskAction::copy(vec![src.path().join("ln")], dst.path().to_path_buf());
    let (_, outcome) = run_silent(action);

    assert!(outcome.is_success());
    assert_eq!(
        fs::read_link(dst.path().join("ln")).unwrap(),
        PathBuf::from("target")
    );
}

#[test]
fn test_abort_before_run() {
    let src = tempfile::TempDir::new().unwrap();
    fs::write(src.path().join("f"), vec![0u8; 100]).unwrap();
    let root = tempfile::TempDir::new().unwrap();
    let dst = root.path().join("never-created");

    let action = TaskAction::copy(vec![src.path().join("f")], dst.clone());
    let mut task = Task::new(action, TaskOptions::default()).unwrap();
    task.abort();
    task.run(Box::new(SilentObserver)).unwrap();
    let outcome = task.join();

    assert!(outcome.aborted);
    assert!(!dst.exists());
    assert!(src.path().join("f").exists());
}

#[test]
fn test_abort_decision_halts_remaining_writes() {
    let src = tempfile::TempDir::new().unwrap();
    let dst = tempfile::TempDir::new().unwrap();
    fs::write(src.path().join("a"), b"new").unwrap();
    fs::write(src.path().join("z"), b"later").unwrap();
    fs::write(dst.path().join("a"), b"old").unwrap();

    let asked = Arc::new(Mutex::new(0));
    let observer = CountingObserver {
        asked: Arc::clone(&asked),
        decision: Decision::Abort,
    };
    let action = TaskAction::copy(
        vec![src.path().join("a"), src.path().join("z")],
        dst.path().to_path_buf(),
    );
    let mut task = Task::new(action, TaskOptions::default()).unwrap();
    task.run(Box::new(observer)).unwrap();
    let outcome = task.join();

    assert!(outcome.aborted);
    assert_eq!(*asked.lock().unwrap(), 1);
    // The conflicting destination is untouched and the walk never
    // reached the second source.
    assert_eq!(fs::read(dst.path().join("a")).unwrap(), b"old");
    assert!(!dst.path().join("z").exists());
    assert_eq!(task.state(), TaskState::Finish);
}

#[test]
fn test_overwrite_all_sticky_asks_once() {
    let src = tempfile::TempDir::new().unwrap();
    let dst = tempfile::TempDir::new().unwrap();
    fs::write(src.path().join("a"), b"new-a").unwrap();
    fs::write(src.path().join("b"), b"new-b").unwrap();
    fs::write(dst.path().join("a"), b"old").unwrap();
    fs::write(dst.path().join("b"), b"old").unwrap();

    let asked = Arc::new(Mutex::new(0));
    let observer = CountingObserver {
        asked: Arc::clone(&asked),
        decision: Decision::OverwriteAll,
    };
    let action = TaskAction::copy(
        vec![src.path().join("a"), src.path().join("b")],
        dst.path().to_path_buf(),
    );
    let (_, outcome) = run_with(action, TaskOptions::default(), Box::new(observer));

    assert!(outcome.is_success());
    assert_eq!(*asked.lock().unwrap(), 1);
    assert_eq!(fs::read(dst.path().join("a")).unwrap(), b"new-a");
    assert_eq!(fs::read(dst.path().join("b")).unwrap(), b"new-b");
}

#[test]
fn test_skip_decision_keeps_destination() {
    let src = tempfile::TempDir::new().unwrap();
    let dst = tempfile::TempDir::new().unwrap();
    fs::write(src.path().join("a"), b"new").unwrap();
    fs::write(dst.path().join("a"), b"old").unwrap();

    let asked = Arc::new(Mutex::new(0));
    let observer = CountingObserver {
        asked: Arc::clone(&asked),
        decision: Decision::Skip,
    };
    let action = TaskAction::copy(vec![src.path().join("a")], dst.path().to_path_buf());
    let (task, outcome) = run_with(action, TaskOptions::default(), Box::new(observer));

    assert!(outcome.is_success());
    assert_eq!(fs::read(dst.path().join("a")).unwrap(), b"old");
    assert!(task.log().contains("skipped existing"));
}

#[test]
fn test_copy_onto_itself_counts_one_error() {
    let root = tempfile::TempDir::new().unwrap();
    fs::write(root.path().join("f"), b"x").unwrap();

    // Destination directory is the file's own parent.
    let action = TaskAction::copy(vec![root.path().join("f")], root.path().to_path_buf());
    let (_, outcome) = run_silent(action);

    assert_eq!(outcome.error_count, 1);
    assert!(!outcome.aborted);
    assert_eq!(fs::read(root.path().join("f")).unwrap(), b"x");
}

#[test]
fn test_small_queued_task_bypasses_queue() {
    let src = tempfile::TempDir::new().unwrap();
    let dst = tempfile::TempDir::new().unwrap();
    fs::write(src.path().join("f"), vec![0u8; 16]).unwrap();

    let options = TaskOptionsBuilder::default().queued(true).build().unwrap();
    let action = TaskAction::copy(vec![src.path().join("f")], dst.path().to_path_buf());
    let (task, outcome) = run_with(action, options, Box::new(SilentObserver));

    assert!(outcome.is_success());
    assert!(task.log().contains("bypassing queue"));
    assert!(dst.path().join("f").exists());
}

#[test]
fn test_queued_task_waits_for_resume() {
    let src = tempfile::TempDir::new().unwrap();
    let dst = tempfile::TempDir::new().unwrap();
    fs::write(src.path().join("f"), vec![0u8; 16]).unwrap();

    // A zero threshold forces every copy into the queue.
    let options = TaskOptionsBuilder::default()
        .queued(true)
        .thresholds(filehaul_core::QueueThresholds {
            move_copy: 0,
            delete: 0,
        })
        .build()
        .unwrap();
    let action = TaskAction::copy(vec![src.path().join("f")], dst.path().to_path_buf());
    let mut task = Task::new(action, options).unwrap();
    task.run(Box::new(SilentObserver)).unwrap();

    wait_for_state(&task, TaskState::Queue);
    assert!(!dst.path().join("f").exists());

    task.resume();
    let outcome = task.join();
    assert!(outcome.is_success());
    assert!(dst.path().join("f").exists());
}

#[test]
fn test_pause_and_resume() {
    let src = tempfile::TempDir::new().unwrap();
    let dst = tempfile::TempDir::new().unwrap();
    fs::write(src.path().join("f"), vec![0u8; 1024]).unwrap();

    let action = TaskAction::copy(vec![src.path().join("f")], dst.path().to_path_buf());
    let mut task = Task::new(action, TaskOptions::default()).unwrap();
    task.pause();
    task.run(Box::new(SilentObserver)).unwrap();

    wait_for_state(&task, TaskState::Pause);
    task.resume();
    let outcome = task.join();

    assert!(outcome.is_success());
    assert_eq!(fs::read(dst.path().join("f")).unwrap(), vec![0u8; 1024]);
}

#[test]
fn test_exec_captures_output_and_exit_code() {
    let action = TaskAction::Exec(ExecSpec::line("echo out"));
    let mut task = Task::new(action, TaskOptions::default()).unwrap();
    assert_eq!(task.kind(), TaskKind::Exec);
    task.run(Box::new(SilentObserver)).unwrap();
    assert!(task.snapshot().exec_pid.is_some());
    let outcome = task.join();

    assert_eq!(outcome.exit_code, Some(0));
    assert!(!outcome.aborted);
    assert!(task.log().contains("out"));
    assert_eq!(task.state(), TaskState::Finish);
}

#[test]
fn test_exec_nonzero_exit_code() {
    let action = TaskAction::Exec(ExecSpec::line("exit 7"));
    let mut task = Task::new(action, TaskOptions::default()).unwrap();
    task.run(Box::new(SilentObserver)).unwrap();
    let outcome = task.join();

    assert_eq!(outcome.exit_code, Some(7));
}

#[test]
fn test_exec_spawn_failure_surfaces_in_run() {
    let spec = ExecSpec::builder()
        .command(filehaul_core::ExecCommand::Line("echo hi".into()))
        .terminal(Some(PathBuf::from("/nonexistent/terminal-emulator")))
        .build()
        .unwrap();
    let mut task = Task::new(TaskAction::Exec(spec), TaskOptions::default()).unwrap();
    let result = task.run(Box::new(SilentObserver));

    assert!(matches!(result, Err(TaskError::Spawn { .. })));
    assert_eq!(task.state(), TaskState::Finish);
    assert_eq!(task.outcome().error_count, 1);
}

#[test]
fn test_empty_sources_rejected_at_creation() {
    let result = Task::new(TaskAction::delete(vec![]), TaskOptions::default());
    assert!(matches!(result, Err(TaskError::NoSources)));
}
