pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod error;
pub mod pacing;
pub mod sqlite;

pub use checkpoint::{
    checkpoint, combine, CheckpointError, CheckpointResult, CheckpointSink, CombineReport,
    CsvCheckpointStore,
};
pub use collector::{
    ChromiumLauncher, ChromiumSource, CollectError, CollectRequest, CollectionMetrics,
    CollectionOutcome, CollectionTelemetry, Collector, CollectorConfig, Locator,
    NavigableSource, Record, SourceError, SourceProfile, StopSignal, Termination,
};
pub use config::{load_harvest_config, HarvestConfig};
pub use error::{ConfigError, Result};
pub use pacing::{OperationKey, PacingController, Stage};
