//! Run command implementation

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::json;

use fci_client::{CallbackRegistry, OrchestrationClient, SessionSummary};
use fci_core::{RunContext, SessionConfig};
use fci_protocol::{ResultSet, TestBatch};

use crate::output::{format_summary, print_info, print_success, print_warning};

/// Options of `fast-ci run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Shell command that runs tests; batch ids are appended
    pub command: String,
    /// Inventory given on the command line
    pub tests: Vec<String>,
    /// File with one test id per line
    pub tests_from: Option<PathBuf>,
}

/// Execute the run command
pub async fn run_command(
    context: RunContext,
    config: SessionConfig,
    options: RunOptions,
) -> Result<SessionSummary> {
    let inventory = load_inventory(&options.tests, options.tests_from.as_deref())?;
    if inventory.is_empty() {
        print_warning("No tests given; an empty inventory is submitted if this node leads");
    }

    let mut callbacks = CallbackRegistry::new();
    callbacks.on_enq_request(move || inventory.into_iter().collect())?;

    let command = options.command;
    callbacks.on_deq(move |batch| run_batch(&command, &batch))?;

    print_info(&format!(
        "Joining {} on {}",
        context.topic(),
        context.endpoint(config.scheme())
    ));

    let started = Instant::now();
    let summary = OrchestrationClient::new(context, callbacks)
        .with_config(config)
        .run()
        .await
        .context("Test session failed")?;

    print_success(&format_summary(&summary, started.elapsed()));
    Ok(summary)
}

/// Collect the inventory from arguments and an optional file
///
/// Blank lines and lines starting with `#` are skipped.
pub fn load_inventory(tests: &[String], tests_from: Option<&Path>) -> Result<Vec<String>> {
    let mut inventory = tests.to_vec();

    if let Some(path) = tests_from {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read test list {}", path.display()))?;
        inventory.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }

    Ok(inventory)
}

/// Run one batch through the shell and report every test with the outcome
pub fn run_batch(command: &str, batch: &TestBatch) -> ResultSet {
    let ids = batch.ids();
    let script = shell_command(command, &ids);
    tracing::info!("Running {} tests: {}", ids.len(), script);

    let started = Instant::now();
    let status = Command::new("sh").arg("-c").arg(&script).status();
    let run_time = started.elapsed().as_secs_f64();

    let outcome = match status {
        Ok(status) if status.success() => json!({ "status": "passed", "run_time": run_time }),
        Ok(status) => {
            tracing::warn!("Batch command exited with {}", status);
            json!({ "status": "failed", "run_time": run_time, "exit_code": status.code() })
        }
        Err(e) => {
            tracing::error!("Failed to spawn batch command: {}", e);
            json!({ "status": "failed", "run_time": run_time, "error": e.to_string() })
        }
    };

    ids.into_iter().map(|id| (id, outcome.clone())).collect()
}

/// Append shell-quoted test ids to a command
pub fn shell_command(command: &str, ids: &[String]) -> String {
    let mut script = command.to_string();
    for id in ids {
        script.push(' ');
        script.push_str(&quote(id));
    }
    script
}

fn quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:=+,@".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
