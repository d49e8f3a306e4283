//! Exec orchestrator for the filehaul engine.
//!
//! Turns an [`ExecSpec`](filehaul_core::ExecSpec) into a transient shell
//! script, optionally wrapped in a terminal emulator and/or a
//! privilege-escalation helper, spawns it, and streams stdout/stderr back
//! through a line sink without blocking the caller.

mod orchestrator;
mod script;
mod terminal;

pub use orchestrator::{launch, ExecHandle, ExecOutcome, ExecStream, LineSink};
pub use script::{render_script, script_checksum, sh_quote, write_script};
pub use terminal::terminal_invocation;
