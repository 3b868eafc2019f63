//! Runs the shell pipelines that back PUT/GET transfers, `eval`, and
//! `map`/`map_to_n`/`map_from_n`. All of these are plain `sh -c` subprocess
//! invocations, run synchronously on a pool worker thread — never on the
//! async event loop, per spec.md §5.

use crate::pool::Started;
use std::process::{Command, Stdio};

/// The outcome of running one subprocess pipeline. `checksum` is only
/// meaningful for PUT/GET transfers, which run a `hash --stream` stage that
/// emits its digest on standard error.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub success: bool,
    pub checksum: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Runs `cmd` via `sh -c`, signaling `started` the moment the child process
/// has actually been spawned (not merely queued onto the pool). This is the
/// literal "first action" the start-countdown design note calls for.
pub fn run_shell_blocking(cmd: &str, started: &mut Started) -> PipelineOutcome {
    let child = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let child = match child {
        Ok(c) => {
            started.signal();
            c
        }
        Err(e) => {
            started.signal();
            return PipelineOutcome {
                success: false,
                checksum: String::new(),
                stdout: String::new(),
                stderr: format!("failed to spawn pipeline: {e}"),
                exit_code: -1,
            };
        }
    };

    match child.wait_with_output() {
        Ok(out) => {
            let stdout = String::from_utf8_lossy(&out.stdout).to_string();
            let stderr = String::from_utf8_lossy(&out.stderr).to_string();
            PipelineOutcome {
                success: out.status.success(),
                checksum: stderr.trim().to_string(),
                stdout,
                stderr,
                exit_code: out.status.code().unwrap_or(-1),
            }
        }
        Err(e) => PipelineOutcome {
            success: false,
            checksum: String::new(),
            stdout: String::new(),
            stderr: format!("failed to wait for pipeline: {e}"),
            exit_code: -1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Started;
    use tokio::sync::oneshot;

    fn started_handle() -> (Started, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Started::from_sender(tx), rx)
    }

    #[test]
    fn runs_a_simple_command() {
        let (mut started, _rx) = started_handle();
        let out = run_shell_blocking("echo hello", &mut started);
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn captures_nonzero_exit() {
        let (mut started, _rx) = started_handle();
        let out = run_shell_blocking("exit 3", &mut started);
        assert!(!out.success);
        assert_eq!(out.exit_code, 3);
    }
}
