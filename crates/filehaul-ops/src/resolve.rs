//! Destination collision resolution.

use std::fs;
use std::path::{Path, PathBuf};

use filehaul_core::{Conflict, ConflictKind, Decision, OverwriteMode, TaskError, TaskState};

use crate::context::{same_inode, OpContext, Stop};

const RENAME_PROBE_LIMIT: u32 = 1000;

/// Decide where `source` may land given that `dest` might already exist.
///
/// Returns the path to write to, or `None` when the entry is skipped.
/// Sticky modes answer without consulting the observer; `AskEach` parks
/// the task in `QueryOverwrite` and blocks on the observer's decision. A
/// caller-supplied rename that itself collides re-enters the query.
pub(crate) fn resolve(
    cx: &mut OpContext<'_>,
    source: &Path,
    dest: &Path,
) -> Result<Option<PathBuf>, Stop> {
    let mut dest = dest.to_path_buf();
    let mut existing = match fs::symlink_metadata(&dest) {
        Ok(md) => md,
        Err(_) => return Ok(Some(dest)),
    };

    if same_inode(source, &dest) {
        cx.error(TaskError::OverwriteSelf {
            path: dest.clone(),
        })?;
        return Ok(None);
    }

    loop {
        match cx.shared.overwrite_mode() {
            OverwriteMode::OverwriteAll => return Ok(Some(dest)),
            OverwriteMode::SkipAll => {
                cx.log(&format!("skipped existing: {}", dest.display()));
                return Ok(None);
            }
            OverwriteMode::AutoRename => match vacant_rename(&dest) {
                Ok(renamed) => {
                    cx.log(&format!("renamed to: {}", renamed.display()));
                    return Ok(Some(renamed));
                }
                Err(e) => {
                    cx.error(e)?;
                    return Ok(None);
                }
            },
            OverwriteMode::AskEach => {
                let conflict = Conflict {
                    source: source.to_path_buf(),
                    destination: dest.clone(),
                    kind: if existing.is_dir() {
                        ConflictKind::DirectoryExists
                    } else {
                        ConflictKind::FileExists
                    },
                };
                cx.transition(TaskState::QueryOverwrite)?;
                let snapshot = cx.shared.snapshot();
                let decision = cx.observer.resolve_conflict(&snapshot, &conflict);
                cx.transition(TaskState::Running)?;

                match decision {
                    Decision::Overwrite => return Ok(Some(dest)),
                    Decision::Skip => {
                        cx.log(&format!("skipped existing: {}", dest.display()));
                        return Ok(None);
                    }
                    Decision::Abort => {
                        cx.shared.request_abort();
                        return Err(Stop::Aborted);
                    }
                    Decision::Rename(name) => {
                        let parent = dest.parent().unwrap_or_else(|| Path::new(""));
                        let candidate = parent.join(&name);
                        match fs::symlink_metadata(&candidate) {
                            Err(_) => return Ok(Some(candidate)),
                            Ok(md) => {
                                // Chosen name also exists, ask again.
                                dest = candidate;
                                existing = md;
                            }
                        }
                    }
                    Decision::OverwriteAll | Decision::SkipAll | Decision::AutoRenameAll => {
                        if let Some(mode) = decision.sticky_mode() {
                            cx.shared.set_overwrite_mode(mode);
                        }
                    }
                }
            }
        }
    }
}

/// First vacant `name-copyN` sibling of an occupied path. The suffix
/// goes before the final extension so renamed files keep their type.
fn vacant_rename(path: &Path) -> Result<PathBuf, TaskError> {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());

    for n in 2..RENAME_PROBE_LIMIT {
        let name = match &ext {
            Some(ext) => format!("{stem}-copy{n}.{ext}"),
            None => format!("{stem}-copy{n}"),
        };
        let candidate = parent.join(name);
        if fs::symlink_metadata(&candidate).is_err() {
            return Ok(candidate);
        }
    }
    Err(TaskError::RenameExhausted {
        path: path.to_path_buf(),
        attempts: RENAME_PROBE_LIMIT - 2,
    })
}
