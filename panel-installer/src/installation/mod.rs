// Installation plumbing
//
// Host control (web server, services, platform features) behind the traits in host.rs, the
// action pipeline and per-component workflows, backups, and the shared external-command
// runner.
//
// IMPORTANT:
// - Never log secrets (passwords, connection strings, crypto keys).
// - All I/O should be async.

pub mod backup;
pub mod files;
pub mod host;
pub mod pipeline;
pub mod progress;
pub mod service;
pub mod web_features;
pub mod windows_parsers;
pub mod workflows;

#[cfg(windows)]
pub mod windows;

#[cfg(not(windows))]
pub mod linux;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::{Child, Command};
use tokio::time::{timeout, Duration};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

use crate::installation::host::{HostProbe, SystemControl};
use crate::utils::settings::EngineSettings;

/// Control and probe implementations for the running host.
pub fn system_host(settings: &EngineSettings) -> (Arc<dyn SystemControl>, Arc<dyn HostProbe>) {
    #[cfg(windows)]
    {
        let host = Arc::new(windows::WindowsHost::new(settings.command_timeout()));
        (host.clone(), host)
    }

    #[cfg(not(windows))]
    {
        let _ = settings;
        let host = Arc::new(linux::LinuxHost);
        (host.clone(), host)
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

fn mask_arg_for_log(arg: &str) -> String {
    // Heuristic masking: treat anything that looks like a secret as sensitive.
    let lower = arg.to_ascii_lowercase();
    if lower.contains("password=")
        || lower.contains("pwd=")
        || lower.contains("secret")
        || lower.contains("token")
        || lower.contains("cryptokey")
    {
        return "***".to_string();
    }

    // Connection-string-like values: delegate to existing masker.
    if arg.contains(';') && lower.contains('=') {
        return crate::utils::logging::mask_connection_string(arg);
    }

    // Generic long values: partially mask.
    crate::utils::logging::mask_sensitive(arg)
}

/// Mask every argument; a bare `password=` (sc.exe style) also hides the argument after it.
fn mask_args_for_log(args: &[String]) -> String {
    let mut out = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for a in args {
        if hide_next {
            out.push("***".to_string());
            hide_next = false;
            continue;
        }
        hide_next = a.eq_ignore_ascii_case("password=");
        out.push(mask_arg_for_log(a));
    }
    out.join(", ")
}

/// Launch failures worth another try: the executable is still being written or scanned, or
/// the call was interrupted. Anything else, including a timeout, is final.
fn is_retryable_launch(e: &std::io::Error) -> bool {
    // ERROR_SHARING_VIOLATION on Windows, ETXTBSY elsewhere.
    #[cfg(windows)]
    const BUSY: i32 = 32;
    #[cfg(not(windows))]
    const BUSY: i32 = 26;

    matches!(
        e.kind(),
        std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
    ) || e.raw_os_error() == Some(BUSY)
}

async fn spawn_tool(program: &str, args: &[String]) -> std::io::Result<Child> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

/// Run a host tool with a timeout. The launch is retried a few times when the executable is
/// busy; a tool that started is never re-run.
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
        "[PHASE: installation] [STEP: cmd] {} started (program={}, args=[{}], timeout_ms={})",
        operation,
        program,
        mask_args_for_log(args),
        timeout_dur.as_millis()
    );

    let launches = FixedInterval::from_millis(250).take(2);
    let child = RetryIf::spawn(
        launches,
        || spawn_tool(program, args),
        |e: &std::io::Error| {
            let retry = is_retryable_launch(e);
            if retry {
                warn!(
                    "[PHASE: installation] [STEP: cmd] {} launch busy; retrying (program={}): {}",
                    operation, program, e
                );
            }
            retry
        },
    )
    .await
    .with_context(|| format!("Failed to start '{}' (operation={})", program, operation))?;

    // Dropping the child on timeout kills it.
    let output = match timeout(timeout_dur, child.wait_with_output()).await {
        Ok(res) => res.with_context(|| format!("'{}' failed (operation={})", program, operation))?,
        Err(_) => {
            error!(
                "[PHASE: installation] [STEP: cmd] {} timed out (program={}, timeout_ms={})",
                operation,
                program,
                timeout_dur.as_millis()
            );
            anyhow::bail!(
                "Command timed out after {}ms (operation={}, program={})",
                timeout_dur.as_millis(),
                operation,
                program
            );
        }
    };

    let out = CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };
    info!(
        "[PHASE: installation] [STEP: cmd] {} finished (program={}, exit_code={:?}, duration_ms={})",
        operation,
        program,
        out.exit_code,
        started.elapsed().as_millis()
    );
    if out.exit_code != Some(0) && !out.stderr.trim().is_empty() {
        debug!(
            "[PHASE: installation] [STEP: cmd] {} stderr: {}",
            operation,
            out.stderr.trim()
        );
    }
    Ok(out)
}
