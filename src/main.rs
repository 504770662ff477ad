//! Daily news digest, binary entrypoint.
//! Parses the command line, loads config, and runs the scheduler or a one-off command.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use daily_news_digest::cli::{Cli, Command};
use daily_news_digest::config::{AppConfig, ValidatedConfig};
use daily_news_digest::error::ConfigError;
use daily_news_digest::keywords::normalize_rows;
use daily_news_digest::pipeline::OverallStatus;
use daily_news_digest::{app, schedule};

/// How long a cancelled run may take to wind down on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// `RUST_LOG` filter (default `info`); `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn load_config(cli: &Cli) -> Result<ValidatedConfig, ConfigError> {
    let mut cfg = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load_default()?,
    };
    cfg.apply_env_overrides()?;
    cfg.validate()
}

/// Flips the returned receiver to `true` on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            let _ = tx.send(true);
        }
        // keep the sender alive so receivers never see a closed channel
        std::future::pending::<()>().await;
    });
    rx
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = match load_config(&cli).and_then(|cfg| {
        cli.command().check_config(&cfg)?;
        Ok(cfg)
    }) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    let outcome = match cli.command() {
        Command::Run => run_scheduler(&cfg).await,
        Command::Once => run_once(&cfg).await,
        Command::DryRun => dry_run(&cfg).await,
        Command::Status => status(&cfg).await,
        Command::CheckSource => check_source(&cfg).await,
    };
    match outcome {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_scheduler(cfg: &ValidatedConfig) -> Result<ExitCode> {
    let scheduler = app::scheduler(cfg).await?;
    scheduler.run_until(shutdown_signal(), SHUTDOWN_GRACE).await?;
    Ok(ExitCode::SUCCESS)
}

async fn run_once(cfg: &ValidatedConfig) -> Result<ExitCode> {
    let resolver = app::keyword_resolver(cfg).await?;
    let orchestrator = app::orchestrator(cfg)?;
    let snapshot = resolver.resolve().await;
    let report = orchestrator
        .run_cancellable(snapshot, chrono::Utc::now(), shutdown_signal())
        .await?;

    println!(
        "{}: {}/{} keywords summarized, {} failed stages (keywords from {})",
        report.overall_status,
        report.succeeded_keywords(),
        report.keywords.len(),
        report.failed_stage_count(),
        report.keyword_snapshot.source()
    );
    if let Some(reference) = report.publish_reference() {
        println!("report: {reference}");
    }
    Ok(match report.overall_status {
        OverallStatus::Success | OverallStatus::Partial => ExitCode::SUCCESS,
        OverallStatus::Failed => ExitCode::FAILURE,
    })
}

async fn dry_run(cfg: &ValidatedConfig) -> Result<ExitCode> {
    let resolver = app::keyword_resolver(cfg).await?;
    let snapshot = resolver.resolve().await;
    println!(
        "{} keywords from {} (resolved {})",
        snapshot.len(),
        snapshot.source(),
        snapshot.resolved_at().to_rfc3339()
    );
    for (i, kw) in snapshot.keywords().iter().enumerate() {
        println!("{:>3}. [p{}] {:<24} {}", i + 1, kw.priority, kw.text, kw.category);
    }
    Ok(ExitCode::SUCCESS)
}

async fn status(cfg: &ValidatedConfig) -> Result<ExitCode> {
    let anchor = app::time_anchor(cfg)?;
    let state = app::state_store(cfg).load().await;
    print!(
        "{}",
        schedule::status_report(&anchor, &state, chrono::Utc::now())?
    );
    Ok(ExitCode::SUCCESS)
}

async fn check_source(cfg: &ValidatedConfig) -> Result<ExitCode> {
    let backend = app::keyword_backend(cfg)?
        .ok_or_else(|| anyhow!("no keyword source configured (keywords.source_url)"))?;
    let timeout = Duration::from_secs(cfg.config.keywords.fetch_timeout_secs);
    let rows = tokio::time::timeout(timeout, backend.fetch_rows())
        .await
        .map_err(|_| anyhow!("{} timed out after {timeout:?}", backend.name()))?
        .with_context(|| format!("fetching from {}", backend.name()))?;
    let total = rows.len();
    let keywords = normalize_rows(rows);
    println!(
        "{} OK: {total} rows, {} active keywords after validation",
        backend.name(),
        keywords.len()
    );
    Ok(ExitCode::SUCCESS)
}
