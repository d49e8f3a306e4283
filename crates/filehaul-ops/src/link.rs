//! Symlink executor.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use filehaul_core::TaskError;

use crate::context::{ensure_dest_dir, OpContext, Stop};
use crate::resolve;

/// Create one symlink per source inside the destination directory, each
/// pointing back at its source. Sources are not required to exist, a
/// link to a missing path is simply created broken.
pub(crate) fn run(
    cx: &mut OpContext<'_>,
    sources: &[PathBuf],
    destination: &Path,
) -> Result<(), Stop> {
    ensure_dest_dir(cx, destination)?;
    for (index, source) in sources.iter().enumerate() {
        cx.begin_item(index);
        cx.checkpoint()?;
        let name = match source.file_name() {
            Some(name) => name,
            None => {
                cx.error(TaskError::NoFileName {
                    path: source.clone(),
                })?;
                continue;
            }
        };
        let dest = destination.join(name);
        cx.publish(source, Some(&dest));

        let final_dest = match resolve::resolve(cx, source, &dest)? {
            Some(path) => path,
            None => continue,
        };
        if let Ok(existing) = fs::symlink_metadata(&final_dest) {
            let removal = if existing.is_dir() {
                fs::remove_dir_all(&final_dest)
            } else {
                fs::remove_file(&final_dest)
            };
            if let Err(e) = removal {
                cx.error(TaskError::io(&final_dest, e))?;
                continue;
            }
        }
        if let Err(e) = symlink(source, &final_dest) {
            cx.error(TaskError::io(&final_dest, e))?;
            continue;
        }
        let credited = fs::symlink_metadata(source).map(|md| md.len()).unwrap_or(0);
        cx.add_bytes(credited);
    }
    Ok(())
}
