//! Recursive copy executor.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use filehaul_core::{TaskError, COPY_CHUNK_SIZE};

use crate::context::{device_of, ensure_dest_dir, OpContext, Stop};
use crate::resolve;

pub(crate) fn run(
    cx: &mut OpContext<'_>,
    sources: &[PathBuf],
    destination: &Path,
) -> Result<(), Stop> {
    ensure_dest_dir(cx, destination)?;
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
        copy_entry(cx, source, &destination.join(name))?;
    }
    Ok(())
}

/// Copy one entry, recursing into directories. Returns whether the whole
/// subtree landed without errors or skips; the cross-device move
/// fallback only deletes sources that did.
pub(crate) fn copy_entry(
    cx: &mut OpContext<'_>,
    source: &Path,
    dest: &Path,
) -> Result<bool, Stop> {
    cx.checkpoint()?;
    let md = match fs::symlink_metadata(source) {
        Ok(md) => md,
        Err(e) => {
            cx.error(TaskError::io(source, e))?;
            return Ok(false);
        }
    };
    cx.record_device(device_of(&md));
    cx.publish(source, Some(dest));

    if md.is_dir() {
        copy_dir(cx, source, dest, &md)
    } else if md.is_symlink() {
        copy_symlink(cx, source, dest, &md)
    } else {
        copy_file(cx, source, dest, &md)
    }
}

fn copy_dir(
    cx: &mut OpContext<'_>,
    source: &Path,
    dest: &Path,
    md: &fs::Metadata,
) -> Result<bool, Stop> {
    let mut dest = dest.to_path_buf();
    match fs::symlink_metadata(&dest) {
        Ok(existing) if existing.is_dir() => {
            // Merge into the existing directory without asking.
        }
        Ok(_) => {
            // A non-directory squats on the name.
            match resolve::resolve(cx, source, &dest)? {
                Some(target) => {
                    dest = target;
                    if fs::symlink_metadata(&dest).is_ok() {
                        if let Err(e) = fs::remove_file(&dest) {
                            cx.error(TaskError::io(&dest, e))?;
                            return Ok(false);
                        }
                    }
                    if let Err(e) = fs::create_dir(&dest) {
                        cx.error(TaskError::io(&dest, e))?;
                        return Ok(false);
                    }
                    let perms = fs::Permissions::from_mode(md.mode() & 0o7777);
                    let _ = fs::set_permissions(&dest, perms);
                }
                None => return Ok(false),
            }
        }
        Err(_) => {
            if let Err(e) = fs::create_dir(&dest) {
                cx.error(TaskError::io(&dest, e))?;
                return Ok(false);
            }
            let perms = fs::Permissions::from_mode(md.mode() & 0o7777);
            let _ = fs::set_permissions(&dest, perms);
        }
    }

    let entries = match fs::read_dir(source) {
        Ok(entries) => entries,
        Err(e) => {
            cx.error(TaskError::io(source, e))?;
            return Ok(false);
        }
    };
    let mut clean = true;
    for entry in entries.flatten() {
        let child = entry.path();
        let child_dest = dest.join(entry.file_name());
        clean &= copy_entry(cx, &child, &child_dest)?;
    }

    propagate_times(&dest, md);
    cx.add_bytes(md.len());
    Ok(clean)
}

fn copy_symlink(
    cx: &mut OpContext<'_>,
    source: &Path,
    dest: &Path,
    md: &fs::Metadata,
) -> Result<bool, Stop> {
    let target = match fs::read_link(source) {
        Ok(target) => target,
        Err(e) => {
            cx.error(TaskError::io(source, e))?;
            return Ok(false);
        }
    };
    let final_dest = match resolve::resolve(cx, source, dest)? {
        Some(path) => path,
        None => return Ok(false),
    };
    if let Ok(existing) = fs::symlink_metadata(&final_dest) {
        let removal = if existing.is_dir() {
            fs::remove_dir_all(&final_dest)
        } else {
            fs::remove_file(&final_dest)
        };
        if let Err(e) = removal {
            cx.error(TaskError::io(&final_dest, e))?;
            return Ok(false);
        }
    }
    if let Err(e) = symlink(&target, &final_dest) {
        cx.error(TaskError::io(&final_dest, e))?;
        return Ok(false);
    }
    cx.add_bytes(md.len());
    Ok(true)
}

fn copy_file(
    cx: &mut OpContext<'_>,
    source: &Path,
    dest: &Path,
    md: &fs::Metadata,
) -> Result<bool, Stop> {
    let final_dest = match resolve::resolve(cx, source, dest)? {
        Some(path) => path,
        None => return Ok(false),
    };
    // Never write through a squatting directory or symlink.
    if let Ok(existing) = fs::symlink_metadata(&final_dest) {
        let removal = if existing.is_dir() {
            fs::remove_dir_all(&final_dest)
        } else {
            fs::remove_file(&final_dest)
        };
        if let Err(e) = removal {
            cx.error(TaskError::io(&final_dest, e))?;
            return Ok(false);
        }
    }

    let mut reader = match File::open(source) {
        Ok(file) => file,
        Err(e) => {
            cx.error(TaskError::io(source, e))?;
            return Ok(false);
        }
    };
    let mut writer = match File::create(&final_dest) {
        Ok(file) => file,
        Err(e) => {
            cx.error(TaskError::io(&final_dest, e))?;
            return Ok(false);
        }
    };

    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    loop {
        cx.checkpoint()?;
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                cx.error(TaskError::io(source, e))?;
                let _ = fs::remove_file(&final_dest);
                return Ok(false);
            }
        };
        if let Err(e) = writer.write_all(&buf[..n]) {
            cx.error(TaskError::io(&final_dest, e))?;
            let _ = fs::remove_file(&final_dest);
            return Ok(false);
        }
        cx.add_bytes(n as u64);
    }

    let perms = fs::Permissions::from_mode(md.mode() & 0o7777);
    let _ = writer.set_permissions(perms);
    if let Ok(modified) = md.modified() {
        let _ = writer.set_modified(modified);
    }
    Ok(true)
}

/// Carry the source's mtime onto a copied directory. Best effort, stamped
/// after the children so their creation does not disturb it.
fn propagate_times(dest: &Path, md: &fs::Metadata) {
    let Ok(dest_md) = fs::symlink_metadata(dest) else {
        return;
    };
    if dest_md.is_symlink() {
        return;
    }
    if let (Ok(file), Ok(modified)) = (File::open(dest), md.modified()) {
        let _ = file.set_modified(modified);
    }
}
