//! Bounded subprocess execution.
//!
//! # Responsibility
//! - Run an external program with optional stdin and a hard timeout.
//! - Collect stdout/stderr without risking pipe deadlock.
//!
//! # Invariants
//! - A timed-out child is killed and reaped before returning.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Captured result of a finished child process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub enum ExecError {
    Spawn { program: String, source: io::Error },
    Io { program: String, source: io::Error },
    Timeout { program: String, timeout: Duration },
}

impl Display for ExecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn { program, source } => write!(f, "failed to start `{program}`: {source}"),
            Self::Io { program, source } => write!(f, "i/o with `{program}` failed: {source}"),
            Self::Timeout { program, timeout } => {
                write!(f, "`{program}` timed out after {}s", timeout.as_secs())
            }
        }
    }
}

impl Error for ExecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn { source, .. } | Self::Io { source, .. } => Some(source),
            Self::Timeout { .. } => None,
        }
    }
}

/// Runs `program args..`, feeding `stdin` when given, bounded by `timeout`.
///
/// # Errors
/// - The program cannot be spawned.
/// - Writing stdin or waiting fails.
/// - The program does not exit within `timeout` (it is killed).
pub fn run_with_timeout(
    program: &str,
    args: &[String],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<CommandOutput, ExecError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        if let Err(source) = pipe.write_all(input.as_bytes()) {
            kill_and_reap(&mut child);
            return Err(ExecError::Io {
                program: program.to_string(),
                source,
            });
        }
    }

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            kill_and_reap(&mut child);
            return Err(ExecError::Timeout {
                program: program.to_string(),
                timeout,
            });
        }
        Err(source) => {
            kill_and_reap(&mut child);
            return Err(ExecError::Io {
                program: program.to_string(),
                source,
            });
        }
    };

    Ok(CommandOutput {
        status,
        stdout: join_reader(stdout_reader),
        stderr: join_reader(stderr_reader),
    })
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            String::from_utf8_lossy(&buffer).into_owned()
        })
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::{run_with_timeout, ExecError};
    use std::time::Duration;

    #[test]
    fn captures_stdout_from_stdin() {
        let output = run_with_timeout("cat", &[], Some("hello"), Duration::from_secs(5)).unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout, "hello");
    }

    #[test]
    fn kills_program_after_timeout() {
        let err = run_with_timeout(
            "sleep",
            &["5".to_string()],
            None,
            Duration::from_millis(100),
        )
        .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    #[test]
    fn reports_missing_program() {
        let err = run_with_timeout(
            "secondbrain-no-such-binary",
            &[],
            None,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
