//! Permission and ownership executor.

use std::fs;
use std::os::unix::fs::{chown, lchown, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use filehaul_core::{ModeChange, Ownership, TaskError};

use crate::context::{device_of, OpContext, Stop};

pub(crate) fn run(
    cx: &mut OpContext<'_>,
    targets: &[PathBuf],
    change: &ModeChange,
    owner: &Ownership,
    recursive: bool,
) -> Result<(), Stop> {
    for (index, target) in targets.iter().enumerate() {
        cx.begin_item(index);
        apply_entry(cx, target, change, owner, recursive)?;
    }
    Ok(())
}

fn apply_entry(
    cx: &mut OpContext<'_>,
    path: &Path,
    change: &ModeChange,
    owner: &Ownership,
    recursive: bool,
) -> Result<(), Stop> {
    cx.checkpoint()?;
    cx.publish(path, None);
    let md = match fs::symlink_metadata(path) {
        Ok(md) => md,
        Err(e) => {
            cx.error(TaskError::io(path, e))?;
            return Ok(());
        }
    };
    cx.record_device(device_of(&md));

    if md.is_symlink() {
        // Mode bits on a symlink are meaningless; only ownership of the
        // link itself can change, and without following it.
        if !owner.is_noop() {
            if let Err(e) = lchown(path, owner.uid, owner.gid) {
                cx.error(TaskError::io(path, e))?;
                return Ok(());
            }
        }
        cx.add_bytes(md.len());
        return Ok(());
    }

    if !change.is_noop() {
        let current = md.mode() & 0o7777;
        let new_mode = change.apply(current);
        if new_mode != current {
            let perms = fs::Permissions::from_mode(new_mode);
            if let Err(e) = fs::set_permissions(path, perms) {
                cx.error(TaskError::io(path, e))?;
                return Ok(());
            }
        }
    }
    if !owner.is_noop() {
        if let Err(e) = chown(path, owner.uid, owner.gid) {
            cx.error(TaskError::io(path, e))?;
            return Ok(());
        }
    }
    cx.add_bytes(md.len());

    if recursive && md.is_dir() {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                cx.error(TaskError::io(path, e))?;
                return Ok(());
            }
        };
        for entry in entries.flatten() {
            apply_entry(cx, &entry.path(), change, owner, recursive)?;
        }
    }
    Ok(())
}
