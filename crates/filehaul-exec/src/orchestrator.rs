//! Spawning and output capture for exec tasks.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use filehaul_core::{ExecSpec, TaskError};

use crate::script::{script_checksum, sh_quote, write_script};
use crate::terminal::terminal_invocation;

/// Which pipe a captured line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStream {
    Stdout,
    Stderr,
}

/// Receives captured output lines (without their terminators) as they
/// arrive. Called from the watcher threads.
pub type LineSink = Box<dyn FnMut(ExecStream, &str) + Send>;

/// Final result of an exec task.
#[derive(Debug, Clone, Copy)]
pub struct ExecOutcome {
    /// Child exit code, `None` if it was killed by a signal.
    pub exit_code: Option<i32>,
    /// True if the child was killed because of an abort request.
    pub aborted: bool,
}

/// A spawned exec task. The child and both pipe watchers run on their own
/// threads; `wait()` joins them all.
pub struct ExecHandle {
    supervisor: JoinHandle<ExecOutcome>,
    pid: u32,
}

impl ExecHandle {
    /// OS process id of the child.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Block until the child has exited and both pipes reached EOF.
    pub fn wait(self) -> ExecOutcome {
        self.supervisor.join().unwrap_or(ExecOutcome {
            exit_code: None,
            aborted: false,
        })
    }
}

/// Write the script, build the (possibly wrapped) argv, and spawn.
///
/// Script-write and spawn failures surface synchronously; after a
/// successful spawn the returned handle supervises draining, exit-status
/// capture, and script cleanup in the background. Setting `abort` kills
/// the child at the next poll.
pub fn launch(
    spec: &ExecSpec,
    sink: LineSink,
    abort: Arc<AtomicBool>,
) -> Result<ExecHandle, TaskError> {
    let script = write_script(spec)?;
    let sink = Arc::new(Mutex::new(sink));

    let (argv, warnings) = match build_argv(spec, &script) {
        Ok(built) => built,
        Err(e) => {
            let _ = std::fs::remove_file(&script);
            return Err(e);
        }
    };
    if let Ok(mut sink) = sink.lock() {
        for warning in &warnings {
            tracing::warn!("{warning}");
            (sink)(ExecStream::Stderr, warning);
        }
    }

    tracing::debug!(command = %argv.join(" "), script = %script.display(), "spawning");

    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            let _ = std::fs::remove_file(&script);
            TaskError::Spawn {
                command: argv.join(" "),
                source: e,
            }
        })?;

    let pid = child.id();
    let stdout_watch = child
        .stdout
        .take()
        .map(|pipe| spawn_watcher("exec-stdout", pipe, ExecStream::Stdout, Arc::clone(&sink)));
    let stderr_watch = child
        .stderr
        .take()
        .map(|pipe| spawn_watcher("exec-stderr", pipe, ExecStream::Stderr, Arc::clone(&sink)));

    let keep_script = spec.keep_script;
    let supervisor = thread::Builder::new()
        .name("exec-supervisor".to_string())
        .spawn(move || {
            let mut killed = false;
            let status = loop {
                if abort.load(Ordering::Relaxed) && !killed {
                    let _ = child.kill();
                    killed = true;
                }
                match child.try_wait() {
                    Ok(Some(status)) => break Some(status),
                    Ok(None) => thread::sleep(Duration::from_millis(50)),
                    Err(_) => break None,
                }
            };

            // Output must be fully drained before the outcome is reported.
            for watcher in [stdout_watch, stderr_watch].into_iter().flatten() {
                let _ = watcher.join();
            }

            if keep_script {
                tracing::debug!(script = %script.display(), "keeping script for diagnostics");
            } else {
                let _ = std::fs::remove_file(&script);
            }

            ExecOutcome {
                exit_code: status.and_then(|s| s.code()),
                aborted: killed,
            }
        })
        .map_err(|e| TaskError::Spawn {
            command: "exec-supervisor".to_string(),
            source: e,
        })?;

    Ok(ExecHandle { supervisor, pid })
}

/// Build the full argv: the script, wrapped for privilege escalation
/// and/or a terminal emulator as requested. Returns warnings to surface
/// in the task log.
fn build_argv(spec: &ExecSpec, script: &Path) -> Result<(Vec<String>, Vec<String>), TaskError> {
    let mut warnings = Vec::new();

    let inner = if let Some(user) = &spec.as_user {
        // Validated at spec build time.
        let su = spec
            .su_program
            .as_deref()
            .unwrap_or_else(|| Path::new("/bin/su"));

        let payload = if spec.checksum {
            match spec.auth_helper.as_deref().and_then(find_program) {
                Some(helper) => {
                    let sum = script_checksum(script)?;
                    format!(
                        "{} {} {}",
                        sh_quote(&helper.to_string_lossy()),
                        sh_quote(&script.to_string_lossy()),
                        sum
                    )
                }
                None => {
                    warnings.push(
                        "auth helper not found; running without checksum verification"
                            .to_string(),
                    );
                    sh_quote(&script.to_string_lossy())
                }
            }
        } else {
            sh_quote(&script.to_string_lossy())
        };

        vec![
            su.to_string_lossy().to_string(),
            user.clone(),
            "/bin/bash".to_string(),
            "-c".to_string(),
            payload,
        ]
    } else {
        vec![script.to_string_lossy().to_string()]
    };

    let argv = match &spec.terminal {
        Some(terminal) => terminal_invocation(terminal, &inner),
        None => inner,
    };
    Ok((argv, warnings))
}

/// Resolve a program to an existing path, searching `PATH` for bare names.
fn find_program(program: &Path) -> Option<PathBuf> {
    if program.is_absolute() {
        return program.exists().then(|| program.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.exists())
}

fn spawn_watcher<R: Read + Send + 'static>(
    name: &str,
    pipe: R,
    stream: ExecStream,
    sink: Arc<Mutex<LineSink>>,
) -> JoinHandle<()> {
    let builder = thread::Builder::new().name(name.to_string());
    builder
        .spawn(move || {
            let mut reader = BufReader::new(pipe);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
                            buf.pop();
                        }
                        let line = String::from_utf8_lossy(&buf);
                        if let Ok(mut sink) = sink.lock() {
                            (sink)(stream, &line);
                        }
                    }
                }
            }
        })
        .unwrap_or_else(|_| thread::spawn(|| {}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use filehaul_core::ExecCommand;
    use tempfile::TempDir;

    fn collecting_sink() -> (Arc<Mutex<String>>, Arc<Mutex<String>>, LineSink) {
        let stdout = Arc::new(Mutex::new(String::new()));
        let stderr = Arc::new(Mutex::new(String::new()));
        let (out, err) = (Arc::clone(&stdout), Arc::clone(&stderr));
        let sink: LineSink = Box::new(move |stream, line| {
            let buf = match stream {
                ExecStream::Stdout => &out,
                ExecStream::Stderr => &err,
            };
            let mut buf = buf.lock().unwrap();
            buf.push_str(line);
            buf.push('\n');
        });
        (stdout, stderr, sink)
    }

    #[test]
    fn test_echo_captured() {
        let dir = TempDir::new().unwrap();
        let mut spec = ExecSpec::line("echo hi");
        spec.script_dir = dir.path().to_path_buf();

        let (stdout, _, sink) = collecting_sink();
        let handle = launch(&spec, sink, Arc::new(AtomicBool::new(false))).unwrap();
        let outcome = handle.wait();

        assert_eq!(outcome.exit_code, Some(0));
        assert!(!outcome.aborted);
        assert_eq!(*stdout.lock().unwrap(), "hi\n");
    }

    #[test]
    fn test_stderr_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let mut spec = ExecSpec::line("echo oops 1>&2; exit 3");
        spec.script_dir = dir.path().to_path_buf();

        let (stdout, stderr, sink) = collecting_sink();
        let handle = launch(&spec, sink, Arc::new(AtomicBool::new(false))).unwrap();
        let outcome = handle.wait();

        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(*stdout.lock().unwrap(), "");
        assert_eq!(*stderr.lock().unwrap(), "oops\n");
    }

    #[test]
    fn test_script_removed_after_run() {
        let dir = TempDir::new().unwrap();
        let mut spec = ExecSpec::line("true");
        spec.script_dir = dir.path().to_path_buf();

        let (_, _, sink) = collecting_sink();
        launch(&spec, sink, Arc::new(AtomicBool::new(false)))
            .unwrap()
            .wait();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_script_kept_on_request() {
        let dir = TempDir::new().unwrap();
        let mut spec = ExecSpec::line("true");
        spec.script_dir = dir.path().to_path_buf();
        spec.keep_script = true;

        let (_, _, sink) = collecting_sink();
        launch(&spec, sink, Arc::new(AtomicBool::new(false)))
            .unwrap()
            .wait();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_spawn_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut spec = ExecSpec::line("true");
        spec.script_dir = dir.path().to_path_buf();
        spec.terminal = Some(PathBuf::from("/nonexistent/filehaul-term"));

        let (_, _, sink) = collecting_sink();
        let result = launch(&spec, sink, Arc::new(AtomicBool::new(false)));
        assert!(matches!(result, Err(TaskError::Spawn { .. })));
        // The script must not be left behind after a failed spawn.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_argv_wrapping_for_user() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("s.sh");
        std::fs::write(&script, "#!/bin/bash\ntrue\n").unwrap();

        let spec = ExecSpec::builder()
            .command(ExecCommand::Line("true".into()))
            .as_user(Some("root".to_string()))
            .su_program(Some(PathBuf::from("/bin/su")))
            .build()
            .unwrap();

        let (argv, warnings) = build_argv(&spec, &script).unwrap();
        assert_eq!(argv[0], "/bin/su");
        assert_eq!(argv[1], "root");
        assert_eq!(argv[2], "/bin/bash");
        assert_eq!(argv[3], "-c");
        assert!(argv[4].contains("s.sh"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_missing_auth_helper_warns() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("s.sh");
        std::fs::write(&script, "#!/bin/bash\ntrue\n").unwrap();

        let spec = ExecSpec::builder()
            .command(ExecCommand::Line("true".into()))
            .as_user(Some("root".to_string()))
            .su_program(Some(PathBuf::from("/bin/su")))
            .auth_helper(Some(PathBuf::from("/nonexistent/filehaul-auth")))
            .checksum(true)
            .build()
            .unwrap();

        let (argv, warnings) = build_argv(&spec, &script).unwrap();
        assert_eq!(warnings.len(), 1);
        // Downgraded to a direct invocation.
        assert!(!argv[4].contains("filehaul-auth"));
    }

    #[test]
    fn test_checksum_included_when_helper_exists() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("s.sh");
        std::fs::write(&script, "#!/bin/bash\ntrue\n").unwrap();
        let helper = dir.path().join("auth");
        std::fs::write(&helper, "#!/bin/bash\n").unwrap();

        let spec = ExecSpec::builder()
            .command(ExecCommand::Line("true".into()))
            .as_user(Some("root".to_string()))
            .su_program(Some(PathBuf::from("/bin/su")))
            .auth_helper(Some(helper.clone()))
            .checksum(true)
            .build()
            .unwrap();

        let (argv, warnings) = build_argv(&spec, &script).unwrap();
        assert!(warnings.is_empty());
        let expected = script_checksum(&script).unwrap();
        assert!(argv[4].contains(&expected));
    }
}
