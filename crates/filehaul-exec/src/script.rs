//! Shell quoting and transient script generation.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use filehaul_core::{ExecCommand, ExecSpec, TaskError};

/// Quote one word for POSIX shells.
///
/// Plain words pass through unchanged; anything else is single-quoted
/// with embedded quotes escaped. This is the only quoting function in the
/// crate; every rendered argument goes through it.
pub fn sh_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-/=:@%+,".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Render the script for a spec: shebang, context exports, working
/// directory, the command, captured exit status, and the optional
/// kept-open-terminal trailer.
pub fn render_script(spec: &ExecSpec) -> String {
    let mut script = String::new();
    script.push_str("#!/bin/bash\n");

    for line in &spec.context_exports {
        script.push_str(line);
        script.push('\n');
    }

    if let Some(dir) = &spec.working_dir {
        script.push_str("cd ");
        script.push_str(&sh_quote(&dir.to_string_lossy()));
        script.push_str(" || exit 1\n");
    }

    match &spec.command {
        ExecCommand::Line(line) => {
            script.push_str(line);
            script.push('\n');
        }
        ExecCommand::Argv(argv) => {
            let rendered: Vec<String> = argv.iter().map(|arg| sh_quote(arg)).collect();
            script.push_str(&rendered.join(" "));
            script.push('\n');
        }
    }

    script.push_str("fh_status=$?\n");

    if spec.keep_terminal_open && spec.terminal.is_some() {
        script.push_str("echo\necho '( press Enter to close )'\nread -r fh_unused\n");
    }

    script.push_str("exit $fh_status\n");
    script
}

/// Write the rendered script into the spec's script directory with mode
/// 0700 and return its path. The caller owns deletion.
pub fn write_script(spec: &ExecSpec) -> Result<PathBuf, TaskError> {
    let mut file = tempfile::Builder::new()
        .prefix("filehaul-exec-")
        .suffix(".sh")
        .permissions(std::fs::Permissions::from_mode(0o700))
        .tempfile_in(&spec.script_dir)
        .map_err(|e| TaskError::ScriptWrite { source: e })?;

    file.write_all(render_script(spec).as_bytes())
        .map_err(|e| TaskError::ScriptWrite { source: e })?;

    let (_, path) = file
        .keep()
        .map_err(|e| TaskError::ScriptWrite { source: e.error })?;
    Ok(path)
}

/// Hex checksum of the script contents, for the auth-helper guard.
pub fn script_checksum(path: &Path) -> Result<String, TaskError> {
    let bytes = std::fs::read(path).map_err(|e| TaskError::io(path, e))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}
