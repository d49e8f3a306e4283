//! Move executor: rename on the same device, copy-then-delete across.

use std::fs;
use std::path::{Path, PathBuf};

use filehaul_core::TaskError;

use crate::context::{device_of, ensure_dest_dir, OpContext, Stop};
use crate::copy::copy_entry;
use crate::delete::delete_entry;
use crate::resolve;

pub(crate) fn run(
    cx: &mut OpContext<'_>,
    sources: &[PathBuf],
    destination: &Path,
) -> Result<(), Stop> {
    ensure_dest_dir(cx, destination)?;
    let dest_dev = match fs::metadata(destination) {
        Ok(md) => device_of(&md),
        Err(e) => return Err(cx.fatal(TaskError::io(destination, e))),
    };
    for (index, source) in sources.iter().enumerate() {
        cx.begin_item(index);
        let name = match source.file_name() {
            Some(name) => name,
            None => {
                cx.error(TaskError::NoFileName {
                    path: source.clone(),
                })?;
                continue;
            }
        };
        move_entry(cx, source, &destination.join(name), dest_dev)?;
    }
    Ok(())
}

fn move_entry(
    cx: &mut OpContext<'_>,
    source: &Path,
    dest: &Path,
    dest_dev: u64,
) -> Result<(), Stop> {
    cx.checkpoint()?;
    let md = match fs::symlink_metadata(source) {
        Ok(md) => md,
        Err(e) => {
            cx.error(TaskError::io(source, e))?;
            return Ok(());
        }
    };
    cx.record_device(device_of(&md));
    cx.publish(source, Some(dest));

    // Directory onto directory merges entry by entry; the source dir is
    // only removed once it has been emptied.
    if md.is_dir() {
        if let Ok(existing) = fs::symlink_metadata(dest) {
            if existing.is_dir() {
                let entries = match fs::read_dir(source) {
                    Ok(entries) => entries,
                    Err(e) => {
                        cx.error(TaskError::io(source, e))?;
                        return Ok(());
                    }
                };
                for entry in entries.flatten() {
                    let child = entry.path();
                    let child_dest = dest.join(entry.file_name());
                    move_entry(cx, &child, &child_dest, dest_dev)?;
                }
                match fs::remove_dir(source) {
                    Ok(()) => cx.add_bytes(md.len()),
                    Err(_) => {
                        cx.log(&format!("source directory kept: {}", source.display()))
                    }
                }
                return Ok(());
            }
        }
    }

    let final_dest = match resolve::resolve(cx, source, dest)? {
        Some(path) => path,
        None => return Ok(()),
    };

    // The collision was resolved once, above. Clear the occupied slot
    // here so the cross-device copy fallback finds it vacant instead of
    // querying the observer a second time.
    if let Ok(existing) = fs::symlink_metadata(&final_dest) {
        let removal = if existing.is_dir() {
            fs::remove_dir_all(&final_dest)
        } else {
            fs::remove_file(&final_dest)
        };
        if let Err(e) = removal {
            cx.error(TaskError::io(&final_dest, e))?;
            return Ok(());
        }
    }

    if device_of(&md) == dest_dev {
        match fs::rename(source, &final_dest) {
            // Credit the whole renamed subtree so progress lines up with
            // the size pass total.
            Ok(()) => cx.add_bytes(tree_size(&final_dest)),
            Err(e) => cx.error(TaskError::io(source, e))?,
        }
        return Ok(());
    }

    cx.log(&format!(
        "cross-device move, copying: {}",
        source.display()
    ));
    if copy_entry(cx, source, &final_dest)? {
        delete_entry(cx, source, false)?;
    } else {
        cx.log(&format!(
            "source kept after incomplete copy: {}",
            source.display()
        ));
    }
    Ok(())
}

fn tree_size(path: &Path) -> u64 {
    let Ok(md) = fs::symlink_metadata(path) else {
        return 0;
    };
    let mut total = md.len();
    if md.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                total += tree_size(&entry.path());
            }
        }
    }
    total
}
