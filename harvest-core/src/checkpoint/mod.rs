mod csv;

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::collector::Record;

pub use csv::{
    parse_rows, write_row, Table, BASE_COLUMNS, DATE_FORMAT, PRICE_VALUE, SOURCE_FILE,
};

const EXTENSION: &str = "csv";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error on {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("malformed artifact {artifact}: {reason}")]
    Malformed { artifact: String, reason: String },
    #[error("no artifacts matching {prefix}*")]
    NoArtifacts { prefix: String },
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Persists record batches. Artifacts are never overwritten.
pub trait CheckpointSink: Send + Sync {
    fn write(&self, records: &[Record], name: &str) -> CheckpointResult<PathBuf>;

    /// Writes records with a parallel `source_file` provenance column and the
    /// normalised `price_value`.
    fn write_combined(
        &self,
        records: &[Record],
        sources: &[String],
        name: &str,
    ) -> CheckpointResult<PathBuf>;

    /// Artifacts whose file name starts with `prefix`, oldest first.
    fn list_artifacts(&self, prefix: &str) -> CheckpointResult<Vec<PathBuf>>;

    fn read(&self, location: &Path) -> CheckpointResult<Vec<Record>>;
}

/// CSV files in one directory.
#[derive(Debug, Clone)]
pub struct CsvCheckpointStore {
    directory: PathBuf,
}

impl CsvCheckpointStore {
    pub fn new(directory: impl AsRef<Path>) -> CheckpointResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|source| CheckpointError::Io {
            source,
            path: directory.clone(),
        })?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn free_path(&self, name: &str) -> PathBuf {
        let mut candidate = self.directory.join(format!("{name}.{EXTENSION}"));
        let mut suffix = 1usize;
        while candidate.exists() {
            candidate = self.directory.join(format!("{name}_{suffix}.{EXTENSION}"));
            suffix += 1;
        }
        candidate
    }

    fn persist(&self, table: &Table, name: &str) -> CheckpointResult<PathBuf> {
        let path = self.free_path(name);
        let io_err = |source| CheckpointError::Io {
            source,
            path: path.clone(),
        };
        let file = File::create(&path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        table.write_to(&mut writer).map_err(io_err)?;
        writer.flush().map_err(io_err)?;
        Ok(path)
    }
}

impl CheckpointSink for CsvCheckpointStore {
    fn write(&self, records: &[Record], name: &str) -> CheckpointResult<PathBuf> {
        self.persist(&Table::from_records(records, None), name)
    }

    fn write_combined(
        &self,
        records: &[Record],
        sources: &[String],
        name: &str,
    ) -> CheckpointResult<PathBuf> {
        self.persist(&Table::from_records(records, Some(sources)), name)
    }

    fn list_artifacts(&self, prefix: &str) -> CheckpointResult<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.directory).map_err(|source| CheckpointError::Io {
            source,
            path: self.directory.clone(),
        })?;
        let mut artifacts = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(EXTENSION)
                    && file_name(path).starts_with(prefix)
            })
            .collect::<Vec<_>>();
        artifacts.sort_by_cached_key(|path| artifact_order(path));
        Ok(artifacts)
    }

    fn read(&self, location: &Path) -> CheckpointResult<Vec<Record>> {
        let text = fs::read_to_string(location).map_err(|source| CheckpointError::Io {
            source,
            path: location.to_path_buf(),
        })?;
        match Table::parse(&text) {
            Some(table) => table.into_records(&file_name(location)),
            None => Ok(Vec::new()),
        }
    }
}

/// `<label>_<YYYYmmdd_HHMMSS_mmm>`; the store appends a suffix on collision.
pub fn artifact_name(label: &str) -> String {
    format!("{label}_{}", Utc::now().format("%Y%m%d_%H%M%S_%3f"))
}

/// Persists the full buffer as a new labelled, timestamped artifact.
pub fn checkpoint(
    sink: &dyn CheckpointSink,
    records: &[Record],
    label: &str,
) -> CheckpointResult<PathBuf> {
    let path = sink.write(records, &artifact_name(label))?;
    info!(path = %path.display(), records = records.len(), "checkpoint saved");
    Ok(path)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombineReport {
    pub artifacts_found: usize,
    pub artifacts_read: usize,
    pub total_read: usize,
    pub duplicates_removed: usize,
    pub final_count: usize,
    pub output: PathBuf,
}

/// Merges every artifact starting with `prefix`, keeping the first record
/// seen for each identity key, and writes one combined artifact labelled
/// `output_label`. Unreadable artifacts are skipped.
pub fn combine(
    sink: &dyn CheckpointSink,
    prefix: &str,
    output_label: &str,
) -> CheckpointResult<(Vec<Record>, CombineReport)> {
    let artifacts = sink.list_artifacts(prefix)?;
    if artifacts.is_empty() {
        return Err(CheckpointError::NoArtifacts {
            prefix: prefix.to_string(),
        });
    }

    let mut seen = HashSet::new();
    let mut combined = Vec::new();
    let mut sources = Vec::new();
    let mut total_read = 0usize;
    let mut artifacts_read = 0usize;

    for artifact in &artifacts {
        let records = match sink.read(artifact) {
            Ok(records) => records,
            Err(err) => {
                warn!(artifact = %artifact.display(), error = %err, "skipping unreadable artifact");
                continue;
            }
        };
        artifacts_read += 1;
        total_read += records.len();
        info!(artifact = %artifact.display(), rows = records.len(), "artifact read");
        let source = file_name(artifact);
        for record in records {
            if seen.insert(record.identity_key.clone()) {
                combined.push(record);
                sources.push(source.clone());
            }
        }
    }

    let output = sink.write_combined(&combined, &sources, &artifact_name(output_label))?;
    let report = CombineReport {
        artifacts_found: artifacts.len(),
        artifacts_read,
        total_read,
        duplicates_removed: total_read - combined.len(),
        final_count: combined.len(),
        output,
    };
    info!(
        total = report.total_read,
        duplicates = report.duplicates_removed,
        final_count = report.final_count,
        output = %report.output.display(),
        "combine complete"
    );
    Ok((combined, report))
}

/// Write order of an artifact: the `YYYYmmdd_HHMMSS_mmm` stamp added by
/// [`artifact_name`], then the collision suffix, then the name. Names without
/// a stamp come first, ordered by name.
fn artifact_order(path: &Path) -> (Option<String>, u32, String) {
    let name = file_name(path);
    let (stamp, suffix) = {
        let stem = name
            .strip_suffix(&format!(".{EXTENSION}"))
            .unwrap_or(&name);
        let parts: Vec<&str> = stem.split('_').collect();
        let start = (0..parts.len().saturating_sub(2)).rev().find(|&start| {
            [8, 6, 3]
                .iter()
                .zip(&parts[start..start + 3])
                .all(|(len, part)| {
                    part.len() == *len && part.bytes().all(|byte| byte.is_ascii_digit())
                })
        });
        match start {
            Some(start) => {
                let suffix = parts
                    .get(start + 3)
                    .and_then(|suffix| suffix.parse().ok())
                    .unwrap_or(0);
                (Some(parts[start..start + 3].concat()), suffix)
            }
            None => (None, 0),
        }
    };
    (stamp, suffix, name)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
