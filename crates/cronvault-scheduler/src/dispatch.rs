//! Payload dispatch: runs one payload and reports its outcome.
//! Shell payloads go through `tokio::process`; function payloads get the
//! run's ExecutionContext.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::process::Output;

use cronvault_core::CronvaultError;
use futures::FutureExt;
use serde_json::Value;

use crate::context::{ExecutionContext, Reporter};
use crate::tasks::Payload;

/// Run the context's command once.
///
/// Success output goes to the warning queue, failures to the error queue;
/// nothing is propagated. A panicking payload is reported like any other
/// failure. Returns the private map so the caller can store it back on the
/// execution.
pub async fn execute(mut ctx: ExecutionContext, reporter: &Reporter) -> HashMap<String, Value> {
    let id = ctx.id.clone();
    let payload = ctx.command.payload.clone();
    tracing::debug!("▶️ Running {} payload of {id}", payload.kind());

    let result = match AssertUnwindSafe(run_payload(&payload, &mut ctx))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            tracing::error!("💥 {id} panicked");
            Err(format!("payload panicked: {}", panic_message(&*panic)))
        }
    };

    match result {
        Ok(Some(stdout)) => reporter.warn(format!("{id}: {stdout}")),
        Ok(None) => reporter.warn(format!("{id}: {} payload completed", payload.kind())),
        Err(message) => reporter.error(CronvaultError::Execution { id, message }),
    }
    ctx.into_context()
}

async fn run_payload(payload: &Payload, ctx: &mut ExecutionContext) -> Result<Option<String>, String> {
    match payload {
        Payload::Shell(line) => run_shell(line).await,
        Payload::ShellArgv(args) => run_argv(args).await,
        Payload::Computable(unit) => unit
            .compute(ctx)
            .await
            .map(|_| None)
            .map_err(|e| format!("{}: {e:#}", unit.name())),
        Payload::Callback(f) => f(ctx).map(|_| None).map_err(|e| format!("{e:#}")),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Run a command line through the platform shell.
async fn run_shell(line: &str) -> Result<Option<String>, String> {
    let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
    let output = tokio::process::Command::new(shell)
        .arg(flag)
        .arg(line)
        .output()
        .await
        .map_err(|e| format!("failed to spawn '{line}': {e}"))?;
    check_output(line, output)
}

/// Run a program with arguments, no shell involved.
async fn run_argv(args: &[String]) -> Result<Option<String>, String> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| "empty argv sequence".to_string())?;
    let output = tokio::process::Command::new(program)
        .args(rest)
        .output()
        .await
        .map_err(|e| format!("failed to spawn '{program}': {e}"))?;
    check_output(&args.join(" "), output)
}

fn check_output(label: &str, output: Output) -> Result<Option<String>, String> {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        let text = if stdout.is_empty() {
            format!("'{label}' exited 0")
        } else {
            stdout
        };
        return Ok(Some(text));
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(format!(
        "'{label}' exited with {}: {}",
        output.status.code().unwrap_or(-1),
        stderr.trim()
    ))
}
