//! Subprocess execution with captured output.
//!
//! Build steps are opaque commands whose combined stdout/stderr is saved to
//! a log file next to the build tree. On failure only the tail of the
//! capture travels upward in the error (full logs stay on disk), unless
//! debug logging is active, in which case everything is surfaced.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn, Level};

/// Lines of captured output included in a failure error when not at debug
/// level. Keeps failure reports a manageable size.
const ERR_LOG_LEN: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to launch {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} exited with {status}; last output:\n{tail}")]
    CommandFailed {
        command: String,
        status: String,
        /// Tail of the captured output (or all of it at debug level). The
        /// full capture remains in the log file on disk.
        tail: String,
    },
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options for [`logged_call`].
#[derive(Debug, Default)]
pub struct CallOptions {
    /// Arguments invoked ahead of the real command, e.g. a shell wrapper
    /// that sources build-environment configuration.
    pub wrapper_args: Vec<String>,
    /// Environment override for the child. `None` inherits the parent
    /// environment; `Some` replaces it entirely.
    pub env: Option<HashMap<String, String>>,
    /// Explicit log file path; defaults to
    /// `<workdir>/<command>-output.txt`.
    pub log_file: Option<PathBuf>,
}

/// Run `args` in `workdir`, capturing combined stdout+stderr to a log file.
///
/// The working directory is always passed explicitly to the child; the
/// caller's process-wide cwd is never touched.
pub fn logged_call(args: &[String], workdir: &Path, opts: CallOptions) -> Result<(), RunnerError> {
    assert!(!args.is_empty(), "logged_call requires a command");
    let base_command = Path::new(&args[0])
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args[0].clone());

    let mut call_args: Vec<&String> = opts.wrapper_args.iter().collect();
    call_args.extend(args.iter());

    let log_path = opts
        .log_file
        .unwrap_or_else(|| workdir.join(format!("{base_command}-output.txt")));

    debug!(command = ?call_args, workdir = %workdir.display(), log = %log_path.display(), "executing");

    let stdout = File::create(&log_path)?;
    let stderr = stdout.try_clone()?;

    let mut cmd = Command::new(call_args[0]);
    cmd.args(&call_args[1..])
        .current_dir(workdir)
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    if let Some(env) = &opts.env {
        cmd.env_clear().envs(env);
    }

    let status = cmd.status().map_err(|e| RunnerError::Spawn {
        command: base_command.clone(),
        source: e,
    })?;

    let capture = std::fs::read_to_string(&log_path).unwrap_or_default();
    if status.success() {
        if tracing::enabled!(Level::DEBUG) {
            for line in capture.lines() {
                debug!(command = %base_command, "{line}");
            }
        }
        Ok(())
    } else {
        warn!(command = %base_command, status = %status, "command failed");
        let tail = if tracing::enabled!(Level::DEBUG) {
            // caller wanted all output anyway
            capture
        } else {
            let lines: Vec<&str> = capture.lines().collect();
            let start = lines.len().saturating_sub(ERR_LOG_LEN);
            lines[start..].join("\n")
        };
        for line in tail.lines() {
            warn!(command = %base_command, "{line}");
        }
        Err(RunnerError::CommandFailed {
            command: base_command,
            status: status.to_string(),
            tail,
        })
    }
}
