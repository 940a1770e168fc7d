mod changeset;
mod cli;
mod config;
mod constants;
mod convert;
mod delivery;
mod git;
mod pipeline;
#[cfg(test)]
mod testutil;
mod ui;

use crate::cli::Cli;
use crate::config::RunConfig;
use crate::constants::{BODY_PREVIEW_CHARS, EXIT_CONFIG, EXIT_FAILURE};
use crate::delivery::UreqTransport;
use crate::git::Repo;
use crate::pipeline::{FileOutcome, Pipeline, RebaseOutcome, RunSummary};
use anyhow::{Context, Result};

fn main() {
    let cli = Cli::parse_args();

    // configuration errors exit before any git or network work
    let (config, transport) = match prepare(cli) {
        Ok(prepared) => prepared,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    match run(config, transport) {
        Ok(summary) if summary.is_success() => status!("all done successfully"),
        Ok(summary) => {
            error!("completed with {} failure(s)", summary.failure_count);
            std::process::exit(EXIT_FAILURE);
        }
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(EXIT_FAILURE);
        }
    }
}

fn prepare(cli: Cli) -> Result<(RunConfig, UreqTransport)> {
    let config = RunConfig::from_cli(cli).context("invalid configuration")?;
    let transport = UreqTransport::new(&config.verify, config.timeout)
        .context("failed to set up HTTP client")?;
    Ok((config, transport))
}

fn run(config: RunConfig, transport: UreqTransport) -> Result<RunSummary> {
    let repo = Repo::discover(&config.repo_dir, &config.remote)?;
    let show_body = config.show_body;
    let output_dir = config.output_dir.clone();

    let summary = Pipeline::new(config, repo, transport)
        .run()
        .context("change detection failed")?;

    if !summary.results.is_empty() {
        info!("JSON files written to {}", output_dir.display());
    }
    print_summary(&summary, show_body);
    Ok(summary)
}

/// print one line per file in detection order, hiding response bodies by default
fn print_summary(summary: &RunSummary, show_body: bool) {
    use colored::Colorize;

    info!();
    status!("===== summary =====");
    if let Some(base) = &summary.base {
        let note = if base.fell_back { " (fallback)" } else { "" };
        info!("base: {}{}", base.remote_ref(), note);
    }
    for result in &summary.results {
        let line = match &result.outcome {
            FileOutcome::DryRun => "dry-run".normal(),
            FileOutcome::Skipped(reason) => format!("skipped ({reason})").yellow(),
            FileOutcome::Error(detail) => format!("error: {detail}").red(),
            FileOutcome::Delivered(outcome) => {
                let attempts = format!(
                    "{} {}",
                    outcome.attempts,
                    if outcome.attempts == 1 { "attempt" } else { "attempts" }
                );
                match outcome.status {
                    Some(code) => {
                        let body = if show_body {
                            ui::preview(&outcome.body, BODY_PREVIEW_CHARS)
                        } else {
                            format!("(body hidden, {} bytes)", outcome.body.len())
                        };
                        let text = format!("HTTP {code} after {attempts} {body}");
                        if outcome.is_success() {
                            text.green()
                        } else {
                            text.red()
                        }
                    }
                    None => format!("no response after {attempts}: {}", outcome.body).red(),
                }
            }
        };
        info!("- {}: {}", result.source_path, line);
    }
    match &summary.rebase {
        Some(RebaseOutcome::Succeeded) => info!("- rebase: {}", "ok".green()),
        Some(RebaseOutcome::Failed(reason)) => info!("- rebase: {}", format!("failed ({reason})").red()),
        None => {}
    }
    status!("===================");
}
