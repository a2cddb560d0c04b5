//! mailshot - Command line entry point for batch email dispatch

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use mailshot::config::Settings;
use mailshot::domain::{Campaign, DispatchReport, RunStatus};
use mailshot::services::{spawn_dispatch, DispatchEvent, RawTable};

/// Failures listed in the end-of-run summary before truncating.
const SUMMARY_LIMIT: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "mailshot")]
#[command(version)]
#[command(about = "Send a personalized email to every row of a CSV file", long_about = None)]
struct Cli {
    /// CSV file with Email, First Name and Last Name columns
    #[arg(short, long)]
    recipients: PathBuf,

    /// Subject template, e.g. "News for {first_name}"
    #[arg(short, long)]
    subject: String,

    /// Body template
    #[arg(short, long, conflicts_with = "body_file", required_unless_present = "body_file")]
    body: Option<String>,

    /// Read the body template from a file
    #[arg(long)]
    body_file: Option<PathBuf>,

    /// Settings file (defaults to the user config directory)
    #[arg(short, long, env = "MAILSHOT_CONFIG")]
    config: Option<PathBuf>,

    /// Delay between sends in milliseconds (overrides settings)
    #[arg(long)]
    throttle_ms: Option<u64>,

    /// Prefix every body with "Dear {first_name} {last_name},"
    #[arg(long, default_value_t = false)]
    greeting: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = match cli.config {
        Some(path) => path,
        None => Settings::default_path()?,
    };
    let mut settings = Settings::load(&config_path)
        .with_context(|| format!("loading settings from {}", config_path.display()))?;
    if let Some(ms) = cli.throttle_ms {
        settings.dispatch.throttle = Duration::from_millis(ms);
    }

    let body = match (cli.body, cli.body_file) {
        (Some(body), _) => body,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading body template {}", path.display()))?,
        (None, None) => anyhow::bail!("either --body or --body-file is required"),
    };
    let campaign = Campaign::new(cli.subject, body).with_greeting(cli.greeting);

    let table = RawTable::from_csv_path(&cli.recipients)
        .with_context(|| format!("reading recipients from {}", cli.recipients.display()))?;

    tracing::info!(
        provider = ?settings.provider.kind(),
        rows = table.rows().len(),
        "Starting mailshot"
    );

    let mut handle = spawn_dispatch(campaign, table, settings.provider, settings.dispatch);

    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current message");
            token.cancel();
        }
    });

    while let Some(event) = handle.next_event().await {
        if let DispatchEvent::Progress {
            index,
            total,
            outcome,
        } = event
        {
            match &outcome.error_detail {
                None => tracing::info!("[{}/{}] sent to {}", index + 1, total, outcome.recipient.email()),
                Some(detail) => tracing::warn!(
                    "[{}/{}] failed for {}: {}",
                    index + 1,
                    total,
                    outcome.recipient.email(),
                    detail
                ),
            }
        }
    }

    match handle.join().await {
        Ok(report) => Ok(summarize(&report)),
        Err(reason) => {
            tracing::error!("Dispatch aborted: {}", reason);
            Ok(ExitCode::from(1))
        }
    }
}

fn summarize(report: &DispatchReport) -> ExitCode {
    tracing::info!(
        run_id = %report.run_id(),
        sent = report.success_count(),
        failed = report.failure_count(),
        skipped = report.skipped_rows().len(),
        not_attempted = report.unattempted_count(),
        "Dispatch {}",
        match report.status() {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
        }
    );

    for skip in report.skipped_rows() {
        tracing::warn!("Skipped row {}: {}", skip.row, skip.reason);
    }
    if let Some(summary) = report.failure_summary(SUMMARY_LIMIT) {
        tracing::warn!("{}", summary);
    }

    if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
