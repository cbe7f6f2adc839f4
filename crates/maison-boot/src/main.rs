use anyhow::{Context, Result};
use clap::Parser;
use maison_core::report::StepOutcome;
use rusqlite::Connection;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Prepares the maison database schema before the application starts
/// serving. Always exits successfully once the database could be opened:
/// failed steps are logged and left for the next boot.
#[derive(Parser)]
#[command(name = "maison-boot")]
struct Args {
    /// Path to the SQLite database file.
    #[arg(long, default_value = "maison.db")]
    db: PathBuf,
    /// Print the full heal report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let conn = Connection::open(&args.db)
        .with_context(|| format!("open database {}", args.db.display()))?;
    conn.execute_batch("PRAGMA foreign_keys = ON")
        .context("enable foreign key enforcement")?;

    let report = maison_schema::heal(&conn);
    for step in &report.steps {
        match &step.outcome {
            StepOutcome::Applied => {
                info!(step = %step.step, notes = ?step.notes, "schema step applied")
            }
            StepOutcome::Skipped => info!(step = %step.step, "schema step already satisfied"),
            StepOutcome::Failed { reason } => {
                error!(step = %step.step, %reason, notes = ?step.notes, "schema step failed")
            }
        }
    }
    if !report.fully_healthy() {
        warn!(
            failed = report.failures().count(),
            "schema heal finished with failures; the application starts anyway and the next boot retries"
        );
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn init_tracing() {
    let level = std::env::var("MAISON_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
