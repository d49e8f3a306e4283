//! Recursive delete executor.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use filehaul_core::TaskError;

use crate::context::{device_of, OpContext, Stop};

pub(crate) fn run(cx: &mut OpContext<'_>, targets: &[PathBuf]) -> Result<(), Stop> {
    for (index, target) in targets.iter().enumerate() {
        cx.begin_item(index);
        delete_entry(cx, target, true)?;
    }
    Ok(())
}

/// Delete one entry, children first. Returns whether the entry is gone.
/// `count` credits progress bytes; the cross-device move fallback passes
/// `false` because the copy already counted them.
pub(crate) fn delete_entry(
    cx: &mut OpContext<'_>,
    path: &Path,
    count: bool,
) -> Result<bool, Stop> {
    cx.checkpoint()?;
    cx.publish(path, None);
    let md = match fs::symlink_metadata(path) {
        Ok(md) => md,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            cx.log(&format!("already gone: {}", path.display()));
            return Ok(true);
        }
        Err(e) => {
            cx.error(TaskError::io(path, e))?;
            return Ok(false);
        }
    };
    cx.record_device(device_of(&md));

    if md.is_dir() {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                cx.error(TaskError::io(path, e))?;
                return Ok(false);
            }
        };
        let mut clean = true;
        for entry in entries.flatten() {
            clean &= delete_entry(cx, &entry.path(), count)?;
        }
        if !clean {
            // A surviving child makes rmdir pointless.
            return Ok(false);
        }
        if let Err(e) = fs::remove_dir(path) {
            cx.error(TaskError::io(path, e))?;
            return Ok(false);
        }
    } else if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            cx.error(TaskError::io(path, e))?;
            return Ok(false);
        }
    }

    if count {
        cx.add_bytes(md.len());
    }
    Ok(true)
}
