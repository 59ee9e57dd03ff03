use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use harvest_core::checkpoint::{checkpoint, combine, CheckpointError, CombineReport};
use harvest_core::collector::{
    ChromiumLauncher, CollectRequest, CollectionMetrics, CollectionTelemetry, Collector,
    CollectorConfig, FailureEntry, SourceError, SourceProfile, TelemetryError,
};
use harvest_core::{load_harvest_config, CsvCheckpointStore, HarvestConfig};

pub mod commands;

use commands::{CollectArgs, CombineArgs, FailuresArgs, RunsArgs};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] harvest_core::ConfigError),
    #[error("browser error: {0}")]
    Source(#[from] SourceError),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("collection ended with an error: {0}")]
    Collection(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Paced, checkpointed listing collector", long_about = None)]
pub struct Cli {
    /// Path to harvest.toml
    #[arg(long, default_value = "configs/harvest.toml")]
    pub config: PathBuf,
    /// Directory for checkpoint artifacts (replaces checkpoint.directory)
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,
    /// Telemetry database (replaces observability.metrics_db)
    #[arg(long)]
    pub metrics_db: Option<PathBuf>,
    /// JSON-lines failure log (replaces observability.failure_log)
    #[arg(long)]
    pub failure_log: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Walks the listing and checkpoints records as they arrive
    Collect(CollectArgs),
    /// Merges checkpoint artifacts, dropping duplicate items
    Combine(CombineArgs),
    /// Lists recent collection failures from the telemetry ledger
    Failures(FailuresArgs),
    /// Lists recent collection runs
    Runs(RunsArgs),
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Collect(args) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let report = runtime.block_on(context.collect(args))?;
            render(&report, cli.format)?;
            if let Some(error) = &report.error {
                return Err(AppError::Collection(error.clone()));
            }
        }
        Commands::Combine(args) => {
            let report = context.combine(args)?;
            render(&report, cli.format)?;
        }
        Commands::Failures(args) => {
            let failures = context.failures(args)?;
            render(&failures, cli.format)?;
        }
        Commands::Runs(args) => {
            let runs = context.runs(args)?;
            render(&runs, cli.format)?;
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: HarvestConfig,
    checkpoint_dir: PathBuf,
    failure_log: PathBuf,
    metrics_db: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_harvest_config(&cli.config)?;
        let checkpoint_dir = cli
            .checkpoint_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.checkpoint.directory));
        let failure_log = cli
            .failure_log
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.observability.failure_log));
        let metrics_db = cli
            .metrics_db
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.observability.metrics_db));

        Ok(Self {
            config,
            checkpoint_dir,
            failure_log,
            metrics_db,
        })
    }

    async fn collect(&self, args: &CollectArgs) -> Result<CollectReport> {
        let mut config = self.config.clone();
        args.apply(&mut config)?;

        let store = Arc::new(CsvCheckpointStore::new(&self.checkpoint_dir)?);
        let telemetry = Arc::new(CollectionTelemetry::new(
            &self.failure_log,
            &self.metrics_db,
        )?);
        let launcher = ChromiumLauncher::new(config.chromium.clone());
        let source = launcher
            .launch_with_overrides(args.launch_overrides())
            .await?;

        let request = CollectRequest::from_section(&config.collection);
        let profile = Arc::new(SourceProfile::new(config.selectors.clone()));
        let mut collector = Collector::new(
            Box::new(source),
            profile,
            CollectorConfig::from_harvest_config(&config),
        )
        .with_sink(store.clone())
        .with_telemetry(telemetry);

        let stop = collector.stop_signal();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current step");
                stop.raise();
            }
        });
        let outcome = collector.collect(request).await;
        interrupt.abort();

        let mut source = collector.into_source();
        if let Err(err) = source.shutdown().await {
            warn!(error = %err, "browser shutdown failed");
        }

        // Records past the last full checkpoint would otherwise only live in memory.
        let prefix = &config.checkpoint.checkpoint_prefix;
        if outcome.records.len() % config.collection.checkpoint_size != 0 {
            checkpoint(&*store, &outcome.records, &format!("{prefix}_final"))?;
        }

        let combined = if args.no_combine {
            None
        } else {
            match combine(&*store, prefix, &config.checkpoint.combined_prefix) {
                Ok((_, report)) => Some(report),
                Err(CheckpointError::NoArtifacts { .. }) => {
                    info!(prefix = %prefix, "nothing to combine");
                    None
                }
                Err(err) => return Err(err.into()),
            }
        };

        Ok(CollectReport {
            run_id: outcome.run_id.to_string(),
            termination: outcome.termination.as_str().to_string(),
            records: outcome.records.len(),
            last_page: outcome.pages,
            duration_ms: outcome.duration.as_millis() as u64,
            error: outcome.error().map(ToString::to_string),
            metrics: outcome.metrics,
            combined,
        })
    }

    fn combine(&self, args: &CombineArgs) -> Result<CombineReport> {
        let store = CsvCheckpointStore::new(&self.checkpoint_dir)?;
        let prefix = args
            .prefix
            .as_deref()
            .unwrap_or(&self.config.checkpoint.checkpoint_prefix);
        let output = args
            .output
            .as_deref()
            .unwrap_or(&self.config.checkpoint.combined_prefix);
        let (_, report) = combine(&store, prefix, output)?;
        Ok(report)
    }

    fn failures(&self, args: &FailuresArgs) -> Result<FailureList> {
        self.require_database()?;
        let telemetry = CollectionTelemetry::new(&self.failure_log, &self.metrics_db)?;
        let rows = telemetry.recent_failures(args.limit, args.run_id.as_deref())?;
        Ok(FailureList { rows })
    }

    fn runs(&self, args: &RunsArgs) -> Result<RunList> {
        let conn = self.open_database(&self.metrics_db)?;
        let mut stmt = conn.prepare(
            "SELECT run_id, ts, start_page, last_page, records, termination, success, \
             duration_ms, sponsored_skipped, retries, checkpoints \
             FROM collection_runs \
             WHERE (?1 = 0 OR success = 0) \
             ORDER BY ts DESC \
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map((args.failed, args.limit as i64), |row| {
                Ok(RunEntry {
                    run_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    start_page: row.get(2)?,
                    last_page: row.get(3)?,
                    records: row.get(4)?,
                    termination: row.get(5)?,
                    success: row.get(6)?,
                    duration_ms: row.get(7)?,
                    sponsored_skipped: row.get(8)?,
                    retries: row.get(9)?,
                    checkpoints: row.get(10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(RunList { rows })
    }

    fn require_database(&self) -> Result<()> {
        if self.metrics_db.exists() {
            Ok(())
        } else {
            Err(AppError::MissingResource(format!(
                "telemetry database missing: {}",
                self.metrics_db.display()
            )))
        }
    }

    fn open_database(&self, path: &Path) -> Result<Connection> {
        self.require_database()?;
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(conn)
    }
}

#[derive(Debug, Serialize)]
pub struct CollectReport {
    pub run_id: String,
    pub termination: String,
    pub records: usize,
    pub last_page: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: CollectionMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined: Option<CombineReport>,
}

impl DisplayFallback for CollectReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Run {} ended: {}", self.run_id, self.termination),
            format!(
                "  records: {} (last page {}, {:.1}s)",
                self.records,
                self.last_page,
                self.duration_ms as f64 / 1000.0
            ),
            format!(
                "  items seen: {} | sponsored skipped: {} | detail failures: {}",
                self.metrics.items_seen,
                self.metrics.sponsored_skipped,
                self.metrics.detail_failures
            ),
            format!(
                "  retries: {} | checkpoints: {}",
                self.metrics.retries, self.metrics.checkpoints_written
            ),
        ];
        if let Some(error) = &self.error {
            lines.push(format!("  error: {error}"));
        }
        match &self.combined {
            Some(report) => lines.push(format!("  {}", report.display())),
            None => lines.push("  combined: skipped".to_string()),
        }
        lines.join("\n")
    }
}

impl DisplayFallback for CombineReport {
    fn display(&self) -> String {
        format!(
            "combined {} of {} artifacts: {} read, {} duplicates removed, {} kept -> {}",
            self.artifacts_read,
            self.artifacts_found,
            self.total_read,
            self.duplicates_removed,
            self.final_count,
            self.output.display()
        )
    }
}

#[derive(Debug, Serialize)]
pub struct FailureList {
    pub rows: Vec<FailureEntry>,
}

impl DisplayFallback for FailureList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No failures recorded".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            let page = entry
                .page
                .map(|page| page.to_string())
                .unwrap_or_else(|| "-".to_string());
            lines.push(format!(
                "{ts} {op} page={page} [{category}/{remediation}] {message}",
                ts = entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                op = entry.operation,
                category = entry.category,
                remediation = entry.remediation,
                message = entry.error_message,
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct RunList {
    pub rows: Vec<RunEntry>,
}

#[derive(Debug, Serialize)]
pub struct RunEntry {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub start_page: u32,
    pub last_page: u32,
    pub records: i64,
    pub termination: String,
    pub success: bool,
    pub duration_ms: i64,
    pub sponsored_skipped: i64,
    pub retries: i64,
    pub checkpoints: i64,
}

impl DisplayFallback for RunList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No runs recorded".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            lines.push(format!(
                "{id} {ts} {termination} records={records} pages={start}..{last} retries={retries}",
                id = entry.run_id,
                ts = entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                termination = entry.termination,
                records = entry.records,
                start = entry.start_page,
                last = entry.last_page,
                retries = entry.retries,
            ));
        }
        lines.join("\n")
    }
}
