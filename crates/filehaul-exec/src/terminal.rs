//! Terminal-emulator invocation styles.

use std::path::Path;

use crate::script::sh_quote;

/// How an emulator accepts the command to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgStyle {
    /// `term -e cmd arg arg` (xterm, konsole, urxvt, alacritty, ...).
    Separate,
    /// `term -e "cmd arg arg"` as a single shell string.
    Joined,
    /// `term -- cmd arg arg`.
    DoubleDash,
}

fn style_for(name: &str) -> ArgStyle {
    match name {
        "gnome-terminal" | "kgx" | "ptyxis" => ArgStyle::DoubleDash,
        "lxterminal" | "xfce4-terminal" | "terminator" | "mate-terminal" => ArgStyle::Joined,
        _ => ArgStyle::Separate,
    }
}

/// Build the argv that makes `terminal` execute `inner`.
pub fn terminal_invocation(terminal: &Path, inner: &[String]) -> Vec<String> {
    let term = terminal.to_string_lossy().to_string();
    let name = terminal
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut argv = vec![term];
    match style_for(&name) {
        ArgStyle::DoubleDash => {
            argv.push("--".to_string());
            argv.extend(inner.iter().cloned());
        }
        ArgStyle::Separate => {
            argv.push("-e".to_string());
            argv.extend(inner.iter().cloned());
        }
        ArgStyle::Joined => {
            let joined: Vec<String> = inner.iter().map(|arg| sh_quote(arg)).collect();
            argv.push("-e".to_string());
            argv.push(joined.join(" "));
        }
    }
    argv
}
