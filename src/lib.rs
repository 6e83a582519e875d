pub mod aggregate;
pub mod cards;
pub mod config;
pub mod dashboard;
pub mod degrade;
pub mod errors;
pub mod models;
pub mod probe;
pub mod redaction;
pub mod store;
pub mod temporal;

use crate::config::{resolve_api_key, ApiKeyStore, AppConfig, BackendKind};
use crate::dashboard::DashboardCore;
use crate::errors::{AppError, AppResult};
use crate::models::{DashboardSnapshot, MetricKind, MetricResult, MetricStatus};
use crate::probe::adapter::ProbeMode;
use crate::store::rest::RestStore;
use crate::store::sqlite::SqliteStore;
use crate::store::RecordStore;
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

#[derive(Parser)]
#[command(name = "club-dashboard", version)]
#[command(about = "Nightclub operations dashboard over a hosted relational store", long_about = None)]
struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh every card concurrently.
    Dashboard {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Compute a single card.
    Metric {
        /// revenue, guests-tonight, tables-booked or low-stock.
        metric: MetricKind,
    },
    /// Probe every table and report the detected columns.
    Probe,
    /// Guest list, most frequent visitors first.
    Guests {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Inventory list, lowest stock first.
    Inventory {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Create a local SQLite store filled with demo rows for today.
    SeedDemo {
        /// Defaults to the configured sqlitePath.
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Manage the API key stored in the OS keyring.
    ApiKey {
        #[command(subcommand)]
        action: ApiKeyCommand,
    },
}

#[derive(Subcommand)]
enum ApiKeyCommand {
    Set { key: String },
    Clear,
    Status,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("error: failed to start async runtime: {}", error);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(execute(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {:#}", error);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(config.log_dir.as_deref()).map_err(anyhow::Error::msg)?;

    match cli.command {
        Command::ApiKey { action } => {
            let keys = ApiKeyStore::open().map_err(to_client_error)?;
            let response = match action {
                ApiKeyCommand::Set { key } => keys.save(&key).await,
                ApiKeyCommand::Clear => keys.clear().await,
                ApiKeyCommand::Status => keys.has().await,
            }
            .map_err(to_client_error)?;
            print_json(&response)
        }
        Command::SeedDemo { path } => {
            let path = path.unwrap_or_else(|| config.sqlite_path.clone());
            let store = SqliteStore::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
            store
                .seed_demo(chrono::Local::now().date_naive())
                .map_err(to_client_error)?;
            println!("seeded demo data into {}", path.display());
            Ok(())
        }
        Command::Dashboard { json } => {
            let core = open_core(&config).await?;
            if config.probe_mode == ProbeMode::Startup {
                core.detect_schema().await;
            }
            let snapshot = core.dashboard().await;
            if json {
                print_json(&snapshot)
            } else {
                print!("{}", render_snapshot(&snapshot));
                Ok(())
            }
        }
        Command::Metric { metric } => print_json(&open_core(&config).await?.metric(metric).await),
        Command::Probe => print_json(&open_core(&config).await?.detect_schema().await),
        Command::Guests { limit } => {
            let core = open_core(&config).await?;
            print_json(&core.guest_list(limit.unwrap_or(config.list_limit)).await)
        }
        Command::Inventory { limit } => {
            let core = open_core(&config).await?;
            print_json(&core.inventory_list(limit.unwrap_or(config.list_limit)).await)
        }
    }
}

async fn open_core(config: &AppConfig) -> anyhow::Result<DashboardCore> {
    let store = build_store(config).await.context("failed to initialise the record store")?;
    Ok(DashboardCore::new(store, config))
}

/// Constructs the single store instance shared by every pipeline.
pub async fn build_store(config: &AppConfig) -> AppResult<Arc<dyn RecordStore>> {
    match config.backend {
        BackendKind::Sqlite => {
            let store = SqliteStore::open(&config.sqlite_path)?;
            tracing::info!(path = %config.sqlite_path.display(), "using sqlite store");
            Ok(Arc::new(store))
        }
        BackendKind::Rest => {
            let url = config
                .rest
                .url
                .as_deref()
                .ok_or_else(|| AppError::Config("rest.url is required for the rest backend".to_string()))?;
            let api_key = resolve_api_key(config, &ApiKeyStore::open()?).await?;
            let store = RestStore::new(url, &api_key, config.rest.schema.clone(), config.query_timeout())?;
            tracing::info!(url = %url, schema = ?config.rest.schema, "using rest store");
            Ok(Arc::new(store))
        }
    }
}

fn init_tracing(log_dir: Option<&Path>) -> Result<(), String> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "club-dashboard.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = LOG_GUARD.set(guard);

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_writer(non_blocking)
                .try_init()
                .map_err(|error| error.to_string())
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|error| error.to_string()),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn to_client_error(error: impl std::fmt::Display) -> anyhow::Error {
    anyhow::anyhow!("{}", error)
}

/// One text line per card. Degraded values carry a `~` marker and the
/// reason follows in parentheses.
pub fn render_card(card: &MetricResult) -> String {
    let value = match card.value {
        Some(value) => {
            let formatted = match card.metric {
                MetricKind::Revenue => format!("{:.2}", value),
                _ => format!("{:.0}", value),
            };
            if card.status == MetricStatus::Placeholder {
                format!("~{}", formatted)
            } else {
                formatted
            }
        }
        None => "n/a".to_string(),
    };

    let mut line = format!("{:<16} {:>12}", card.metric.label(), value);
    if let Some(change) = card.change_percent {
        line.push_str(&format!("  {:+.1}% vs last month", change));
    }
    if let Some(degradation) = &card.degradation {
        line.push_str(&format!("  ({}: {})", degradation.code, degradation.message));
    }
    line
}

pub fn render_snapshot(snapshot: &DashboardSnapshot) -> String {
    let mut output = String::new();
    for card in &snapshot.cards {
        output.push_str(&render_card(card));
        output.push('\n');
    }
    if !snapshot.setup_required.is_empty() {
        let tables = snapshot
            .setup_required
            .iter()
            .map(|table| table.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        output.push_str(&format!("setup required: missing tables {}\n", tables));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::{render_card, render_snapshot, Cli};
    use crate::models::{DashboardSnapshot, Degradation, MetricKind, MetricResult, MetricStatus, PipelineStage, TableRole};
    use chrono::Utc;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn live_revenue_shows_change() {
        let card = MetricResult::live(MetricKind::Revenue, 2000.5).with_prior(1600.0, 25.03125);
        let line = render_card(&card);
        assert!(line.starts_with("Revenue (month)"));
        assert!(line.contains("2000.50"));
        assert!(line.contains("+25.0% vs last month"));
        assert!(line.ends_with("+25.0% vs last month"));
        assert!(!line.contains("QUERY_"));
        assert!(!line.contains("SCHEMA_"));
    }

    #[test]
    fn degraded_cards_are_marked() {
        let degradation = Degradation {
            stage: PipelineStage::Probing,
            code: "SCHEMA_NOT_FOUND".to_string(),
            message: "no such table: reservations".to_string(),
            setup_required: true,
        };
        let placeholder = MetricResult {
            value: Some(12.0),
            status: MetricStatus::Placeholder,
            degradation: Some(degradation.clone()),
            ..MetricResult::live(MetricKind::TablesBooked, 0.0)
        };
        let line = render_card(&placeholder);
        assert!(line.contains("~12"));
        assert!(line.ends_with("(SCHEMA_NOT_FOUND: no such table: reservations)"));

        let unavailable = MetricResult {
            value: None,
            status: MetricStatus::Unavailable,
            degradation: Some(degradation),
            ..MetricResult::live(MetricKind::TablesBooked, 0.0)
        };
        assert!(render_card(&unavailable).contains("n/a"));

        let snapshot = DashboardSnapshot {
            refresh_id: "r1".to_string(),
            generated_at: Utc::now(),
            cards: vec![placeholder, unavailable],
            setup_required: vec![TableRole::Reservations],
        };
        let rendered = render_snapshot(&snapshot);
        assert_eq!(rendered.lines().count(), 3);
        assert!(rendered.ends_with("setup required: missing tables reservations\n"));
    }
}
