use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::sqlite::open_connection;

use super::error::{CollectError, SourceError};

const TELEMETRY_SCHEMA: &str = include_str!("../../../sql/telemetry.sql");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureCategory {
    ElementMissing,
    NavigationTimeout,
    ViewLost,
    BotDetection,
    Unexpected,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::ElementMissing => "element_missing",
            FailureCategory::NavigationTimeout => "navigation_timeout",
            FailureCategory::ViewLost => "view_lost",
            FailureCategory::BotDetection => "bot_detection",
            FailureCategory::Unexpected => "unexpected",
        }
    }
}

pub struct ErrorCategorizer;

impl ErrorCategorizer {
    pub fn categorize(error: &SourceError) -> FailureCategory {
        match error {
            SourceError::NotFound(_) | SourceError::StaleElement(_) => {
                FailureCategory::ElementMissing
            }
            SourceError::Timeout(message) => {
                if looks_like_bot_wall(message) {
                    FailureCategory::BotDetection
                } else {
                    FailureCategory::NavigationTimeout
                }
            }
            SourceError::InvalidView(_) => FailureCategory::ViewLost,
            SourceError::Cdp(err) => {
                let text = err.to_string().to_lowercase();
                if text.contains("timeout") {
                    FailureCategory::NavigationTimeout
                } else if looks_like_bot_wall(&text) {
                    FailureCategory::BotDetection
                } else {
                    FailureCategory::Unexpected
                }
            }
            SourceError::Launch(message)
            | SourceError::Configuration(message)
            | SourceError::Unexpected(message) => {
                if looks_like_bot_wall(message) {
                    FailureCategory::BotDetection
                } else {
                    FailureCategory::Unexpected
                }
            }
        }
    }

    pub fn categorize_run(error: &CollectError) -> FailureCategory {
        match error {
            CollectError::PageUnavailable { source, .. } => Self::categorize(source),
            CollectError::ResumeFailed { .. } => FailureCategory::ElementMissing,
            CollectError::LeakedView { .. } | CollectError::ViewLost(_) => {
                FailureCategory::ViewLost
            }
        }
    }
}

fn looks_like_bot_wall(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("captcha") || lowered.contains("robot") || lowered.contains("forbidden")
}

/// What the collector did about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Remediation {
    Retry,
    SkipItem,
    EndPage,
    Abort,
}

impl Remediation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Remediation::Retry => "retry",
            Remediation::SkipItem => "skip_item",
            Remediation::EndPage => "end_page",
            Remediation::Abort => "abort",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureContext {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub operation: String,
    pub page: Option<u32>,
    pub url: Option<String>,
    pub category: FailureCategory,
    pub error_message: String,
    pub attempt: u32,
    pub remediation: Remediation,
}

impl FailureContext {
    pub fn from_source_error(
        run_id: Uuid,
        operation: impl Into<String>,
        error: &SourceError,
        remediation: Remediation,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id,
            operation: operation.into(),
            page: None,
            url: None,
            category: ErrorCategorizer::categorize(error),
            error_message: error.to_string(),
            attempt: 0,
            remediation,
        }
    }

    /// A run-fatal failure; always remediated by aborting the run.
    pub fn from_collect_error(
        run_id: Uuid,
        operation: impl Into<String>,
        error: &CollectError,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id,
            operation: operation.into(),
            page: None,
            url: None,
            category: ErrorCategorizer::categorize_run(error),
            error_message: error.to_string(),
            attempt: 0,
            remediation: Remediation::Abort,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub start_url: Option<String>,
    pub start_page: u32,
    pub last_page: u32,
    pub records: usize,
    pub termination: String,
    pub success: bool,
    pub duration_ms: i64,
    pub sponsored_skipped: u64,
    pub retries: u64,
    pub checkpoints: u64,
}

/// A row of `collection_failures`, as listed by `harvestctl failures`.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub operation: String,
    pub page: Option<u32>,
    pub url: Option<String>,
    pub category: String,
    pub error_message: String,
    pub attempt: u32,
    pub remediation: String,
}

impl FailureEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            timestamp: row.get("ts")?,
            run_id: row.get("run_id")?,
            operation: row.get("operation")?,
            page: row.get("page")?,
            url: row.get("url")?,
            category: row.get("category")?,
            error_message: row.get("error_message")?,
            attempt: row.get("attempt")?,
            remediation: row.get("remediation")?,
        })
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure and run ledger: every failure is appended as a JSON line and
/// inserted into SQLite; every run adds one summary row.
#[derive(Debug)]
pub struct CollectionTelemetry {
    log: Mutex<File>,
    db_path: PathBuf,
    flags: OpenFlags,
}

impl CollectionTelemetry {
    pub fn new(
        log_path: impl AsRef<Path>,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, TelemetryError> {
        let log_path = log_path.as_ref();
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            create_dir_all(parent)?;
        }
        let telemetry = Self {
            log: Mutex::new(file),
            db_path,
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };
        telemetry.open_db()?.execute_batch(TELEMETRY_SCHEMA)?;
        Ok(telemetry)
    }

    fn open_db(&self) -> Result<Connection, TelemetryError> {
        Ok(open_connection(&self.db_path, self.flags)?)
    }

    pub fn record_failure(&self, failure: &FailureContext) -> Result<(), TelemetryError> {
        let json = serde_json::to_string(failure)?;
        if let Ok(mut guard) = self.log.lock() {
            writeln!(guard, "{json}")?;
            guard.flush()?;
        }
        let conn = self.open_db()?;
        conn.execute(
            "INSERT INTO collection_failures (
                ts, run_id, operation, page, url, category, error_message, attempt, remediation
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                failure.timestamp,
                failure.run_id.to_string(),
                failure.operation,
                failure.page,
                failure.url,
                failure.category.as_str(),
                failure.error_message,
                failure.attempt,
                failure.remediation.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn record_run(&self, run: &RunContext) -> Result<(), TelemetryError> {
        let conn = self.open_db()?;
        conn.execute(
            "INSERT OR REPLACE INTO collection_runs (
                run_id, ts, start_url, start_page, last_page, records, termination, success,
                duration_ms, sponsored_skipped, retries, checkpoints
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run.run_id.to_string(),
                run.timestamp,
                run.start_url,
                run.start_page,
                run.last_page,
                run.records as i64,
                run.termination,
                run.success,
                run.duration_ms,
                run.sponsored_skipped as i64,
                run.retries as i64,
                run.checkpoints as i64,
            ],
        )?;
        Ok(())
    }

    /// Most recent failures first, optionally limited to one run.
    pub fn recent_failures(
        &self,
        limit: usize,
        run_id: Option<&str>,
    ) -> Result<Vec<FailureEntry>, TelemetryError> {
        let conn = self.open_db()?;
        let mut stmt = conn.prepare(
            "SELECT ts, run_id, operation, page, url, category, error_message, attempt, remediation
             FROM collection_failures
             WHERE ?1 IS NULL OR run_id = ?1
             ORDER BY ts DESC, id DESC
             LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![run_id, limit as i64])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(FailureEntry::from_row(row)?);
        }
        Ok(entries)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ViewHandle;
    use tempfile::tempdir;

    #[test]
    fn categorize_by_error_shape() {
        assert_eq!(
            ErrorCategorizer::categorize(&SourceError::Timeout("captcha page".into())),
            FailureCategory::BotDetection
        );
        assert_eq!(
            ErrorCategorizer::categorize(&SourceError::Timeout("css:.next".into())),
            FailureCategory::NavigationTimeout
        );
        assert_eq!(
            ErrorCategorizer::categorize(&SourceError::InvalidView(ViewHandle::new("tab-2"))),
            FailureCategory::ViewLost
        );
        assert_eq!(
            ErrorCategorizer::categorize_run(&CollectError::LeakedView { live: 1 }),
            FailureCategory::ViewLost
        );
    }

    #[test]
    fn telemetry_persists_entries() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("logs/failures.log");
        let db_path = dir.path().join("metrics.sqlite");
        let telemetry = CollectionTelemetry::new(&log_path, &db_path).unwrap();
        let run_id = Uuid::new_v4();

        let error = SourceError::NotFound("css:.a-price".into());
        let failure = FailureContext::from_source_error(
            run_id,
            "product_process_1_2",
            &error,
            Remediation::SkipItem,
        )
        .with_page(1)
        .with_url("https://example.com/dp/2");
        telemetry.record_failure(&failure).unwrap();
        telemetry
            .record_run(&RunContext {
                run_id,
                timestamp: Utc::now(),
                start_url: Some("https://example.com/s?k=laptop".into()),
                start_page: 1,
                last_page: 3,
                records: 12,
                termination: "exhausted".into(),
                success: true,
                duration_ms: 1200,
                sponsored_skipped: 3,
                retries: 0,
                checkpoints: 3,
            })
            .unwrap();

        let log_contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(log_contents.contains("a-price"));

        let conn = Connection::open(&db_path).unwrap();
        let run_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM collection_runs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(run_count, 1);

        let recent = telemetry.recent_failures(10, None).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].category, "element_missing");
        assert_eq!(recent[0].remediation, "skip_item");
        assert_eq!(recent[0].page, Some(1));
        let other_run = telemetry.recent_failures(10, Some("nope")).unwrap();
        assert!(other_run.is_empty());
    }
}
