//! Specification of an external command execution.

use std::path::PathBuf;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// The command a task should run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecCommand {
    /// A raw shell line, passed through verbatim.
    Line(String),
    /// A structured argv, quoted by the orchestrator when rendered.
    Argv(Vec<String>),
}

impl ExecCommand {
    /// True if there is nothing to run.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Line(line) => line.trim().is_empty(),
            Self::Argv(argv) => argv.is_empty(),
        }
    }
}

impl std::fmt::Display for ExecCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Line(line) => write!(f, "{line}"),
            Self::Argv(argv) => write!(f, "{}", argv.join(" ")),
        }
    }
}

/// Configuration for an exec task.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ExecSpec {
    /// The command to run.
    pub command: ExecCommand,

    /// Working directory the script changes into before running.
    #[builder(default)]
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Shell lines exported into the script verbatim (caller-side
    /// selection context). The engine does not interpret them.
    #[builder(default)]
    #[serde(default)]
    pub context_exports: Vec<String>,

    /// Run the command as this user via `su_program`.
    #[builder(default)]
    #[serde(default)]
    pub as_user: Option<String>,

    /// Privilege-escalation program (required when `as_user` is set).
    #[builder(default)]
    #[serde(default)]
    pub su_program: Option<PathBuf>,

    /// Helper that verifies the script checksum before executing it as
    /// another user. Unavailable helper downgrades to direct invocation
    /// with a logged warning.
    #[builder(default)]
    #[serde(default)]
    pub auth_helper: Option<PathBuf>,

    /// Verify script integrity through `auth_helper` when escalating.
    #[builder(default)]
    #[serde(default)]
    pub checksum: bool,

    /// Terminal emulator to wrap the invocation in.
    #[builder(default)]
    #[serde(default)]
    pub terminal: Option<PathBuf>,

    /// Append a "press Enter to close" trailer for kept-open terminals.
    #[builder(default)]
    #[serde(default)]
    pub keep_terminal_open: bool,

    /// Directory the transient script is written into, mode 0700.
    #[builder(default = "std::env::temp_dir()")]
    #[serde(default = "std::env::temp_dir")]
    pub script_dir: PathBuf,

    /// Keep the script after the run for diagnostics.
    #[builder(default)]
    #[serde(default)]
    pub keep_script: bool,
}

impl ExecSpecBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(Some(_)) = self.as_user {
            match self.su_program {
                Some(Some(_)) => {}
                _ => return Err("su_program is required when as_user is set".to_string()),
            }
        }
        match &self.command {
            Some(command) if !command.is_empty() => Ok(()),
            Some(_) => Err("command is empty".to_string()),
            None => Err("command is required".to_string()),
        }
    }
}

impl ExecSpec {
    /// Create a new exec spec builder.
    pub fn builder() -> ExecSpecBuilder {
        ExecSpecBuilder::default()
    }

    /// A simple spec running a raw shell line with defaults.
    pub fn line(line: impl Into<String>) -> Self {
        Self {
            command: ExecCommand::Line(line.into()),
            working_dir: None,
            context_exports: Vec::new(),
            as_user: None,
            su_program: None,
            auth_helper: None,
            checksum: false,
            terminal: None,
            keep_terminal_open: false,
            script_dir: std::env::temp_dir(),
            keep_script: false,
        }
    }
}
