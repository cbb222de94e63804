//! External command runner with timeouts and retries.
//!
//! Used for host probes (`df`). Never pass secrets as arguments.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

fn is_transient_exec_error(e: &anyhow::Error) -> bool {
    let msg = e.to_string().to_ascii_lowercase();
    msg.contains("timed out")
        || msg.contains("temporarily")
        || msg.contains("busy")
        || msg.contains("interrupted")
}

async fn run_once(program: &str, args: &[String], timeout_dur: Duration) -> Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn command '{}'", program))?;

    let output = match timeout(timeout_dur, child.wait_with_output()).await {
        Ok(res) => res.with_context(|| format!("Command wait failed (program={})", program))?,
        Err(_) => {
            anyhow::bail!(
                "Command timed out after {}ms (program={})",
                timeout_dur.as_millis(),
                program
            )
        }
    };

    Ok(CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run an external command with a timeout and up to 3 retries for transient failures.
///
/// Returns captured output even when the exit code is non-zero (caller decides success).
pub async fn run_cmd_with_timeout(
    program: &str,
    args: &[String],
    timeout_dur: Duration,
    operation: &str,
) -> Result<CommandOutput> {
    let started = Instant::now();
    debug!(
        "[PHASE: requirements] [STEP: cmd] run_cmd_with_timeout entered (operation={}, program={}, args_count={})",
        operation,
        program,
        args.len()
    );

    let attempt = || run_once(program, args, timeout_dur);

    let retry_strategy = ExponentialBackoff::from_millis(200)
        .factor(2)
        .max_delay(Duration::from_secs(2))
        .take(2)
        .map(jitter);

    let result = RetryIf::spawn(retry_strategy, attempt, |e: &anyhow::Error| {
        let transient = is_transient_exec_error(e);
        if transient {
            warn!(
                "[PHASE: requirements] [STEP: cmd] Transient command failure; will retry (operation={}, err={})",
                operation, e
            );
        }
        transient
    })
    .await;

    if let Ok(out) = &result {
        debug!(
            "[PHASE: requirements] [STEP: cmd] run_cmd_with_timeout exit (operation={}, exit_code={:?}, duration_ms={})",
            operation,
            out.exit_code,
            started.elapsed().as_millis()
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn run_cmd_with_timeout_captures_stdout() {
        let out = run_cmd_with_timeout(
            "sh",
            &["-c".to_string(), "echo hello".to_string()],
            Duration::from_secs(5),
            "test_echo",
        )
        .await
        .expect("command should run");
        assert_eq!(out.exit_code, Some(0));
        assert!(out.stdout.contains("hello"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_cmd_with_timeout_reports_timeout() {
        let err = run_cmd_with_timeout(
            "sh",
            &["-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(50),
            "test_sleep",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn run_cmd_with_timeout_missing_program_errors() {
        let res = run_cmd_with_timeout(
            "definitely-not-a-real-binary-xyz",
            &[],
            Duration::from_secs(1),
            "test_missing",
        )
        .await;
        assert!(res.is_err());
    }
}
