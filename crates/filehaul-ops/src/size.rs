//! Bounded pre-pass that totals the bytes a task will touch.

use std::fs;
use std::path::Path;
use std::time::Instant;

use filehaul_core::{TaskAction, TaskState};

use crate::context::{device_of, OpContext, Stop};

/// Walk the task's sources and total their apparent sizes, so progress
/// can be reported as a fraction. The walk is capped by the configured
/// deadline; past it the task runs with an unknown total rather than
/// stalling on a huge tree. Unreadable entries are skipped silently, the
/// executor proper will report them.
pub(crate) fn estimate(cx: &mut OpContext<'_>) -> Result<Option<u64>, Stop> {
    let (sources, destination, recurse) = match &cx.shared.action {
        TaskAction::Move {
            sources,
            destination,
        }
        | TaskAction::Copy {
            sources,
            destination,
        } => (sources.clone(), Some(destination.clone()), true),
        TaskAction::Delete { targets } => (targets.clone(), None, true),
        TaskAction::Link {
            sources,
            destination,
        } => (sources.clone(), Some(destination.clone()), false),
        TaskAction::ChmodChown {
            targets, recursive, ..
        } => (targets.clone(), None, *recursive),
        TaskAction::Exec(_) => return Ok(None),
    };

    let deadline = Instant::now() + cx.shared.options.size_pass_deadline;
    let mut total = 0u64;
    let mut complete = true;
    for source in &sources {
        if !walk(cx, source, recurse, deadline, &mut total)? {
            complete = false;
            break;
        }
    }

    if let Some(dest) = destination {
        if let Ok(md) = fs::symlink_metadata(&dest) {
            cx.record_device(device_of(&md));
        }
    }

    if !complete {
        cx.log("size pass timed out; progress total unknown");
        cx.transition(TaskState::SizeTimeout)?;
        cx.transition(TaskState::Running)?;
        return Ok(None);
    }
    Ok(Some(total))
}

/// Returns `Ok(false)` once the deadline has passed.
fn walk(
    cx: &mut OpContext<'_>,
    path: &Path,
    recurse: bool,
    deadline: Instant,
    total: &mut u64,
) -> Result<bool, Stop> {
    if cx.shared.abort_requested() {
        return Err(Stop::Aborted);
    }
    if Instant::now() > deadline {
        return Ok(false);
    }
    let md = match fs::symlink_metadata(path) {
        Ok(md) => md,
        Err(_) => return Ok(true),
    };
    cx.record_device(device_of(&md));
    *total += md.len();
    if recurse && md.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                if !walk(cx, &entry.path(), recurse, deadline, total)? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}
