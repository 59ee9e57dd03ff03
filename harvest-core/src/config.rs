use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::collector::Locator;
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HarvestConfig {
    #[serde(default)]
    pub pacing: PacingSection,
    #[serde(default)]
    pub collection: CollectionSection,
    #[serde(default)]
    pub checkpoint: CheckpointSection,
    #[serde(default)]
    pub chromium: ChromiumSection,
    pub selectors: SelectorSection,
    #[serde(default)]
    pub observability: ObservabilitySection,
}

impl HarvestConfig {
    pub fn validate(&self) -> Result<()> {
        self.pacing.validate()?;
        self.collection.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingSection {
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    pub jitter_factor: f64,
    pub backoff_factor: f64,
    pub max_retries: u32,
    pub min_request_interval_secs: f64,
    pub seed: Option<u64>,
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            base_delay_secs: 2.0,
            max_delay_secs: 5.0,
            jitter_factor: 0.3,
            backoff_factor: 2.0,
            max_retries: 3,
            min_request_interval_secs: 1.0,
            seed: None,
        }
    }
}

impl PacingSection {
    /// Zero delays everywhere; used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            base_delay_secs: 0.0,
            max_delay_secs: 0.0,
            jitter_factor: 0.0,
            min_request_interval_secs: 0.0,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        let non_negative = [
            ("pacing.base_delay_secs", self.base_delay_secs),
            ("pacing.max_delay_secs", self.max_delay_secs),
            ("pacing.min_request_interval_secs", self.min_request_interval_secs),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("expected a non-negative number, got {value}"),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::Invalid {
                field: "pacing.jitter_factor",
                reason: format!("must be within [0, 1], got {}", self.jitter_factor),
            });
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid {
                field: "pacing.backoff_factor",
                reason: format!("must be >= 1, got {}", self.backoff_factor),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionSection {
    pub start_url: Option<String>,
    pub checkpoint_size: usize,
    pub max_items: Option<usize>,
    pub start_page: u32,
    pub element_timeout_secs: u64,
    pub page_ready_timeout_secs: u64,
    pub detail_timeout_secs: u64,
    pub seek_attempts: u32,
}

impl Default for CollectionSection {
    fn default() -> Self {
        Self {
            start_url: None,
            checkpoint_size: 20,
            max_items: None,
            start_page: 1,
            element_timeout_secs: 10,
            page_ready_timeout_secs: 10,
            detail_timeout_secs: 3,
            seek_attempts: 3,
        }
    }
}

impl CollectionSection {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn page_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.page_ready_timeout_secs)
    }

    pub fn detail_timeout(&self) -> Duration {
        Duration::from_secs(self.detail_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.checkpoint_size == 0 {
            return Err(ConfigError::Invalid {
                field: "collection.checkpoint_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.start_page == 0 {
            return Err(ConfigError::Invalid {
                field: "collection.start_page",
                reason: "pages are 1-based".to_string(),
            });
        }
        if self.seek_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "collection.seek_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    pub directory: String,
    pub checkpoint_prefix: String,
    pub combined_prefix: String,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            directory: "data/raw".to_string(),
            checkpoint_prefix: "records_checkpoint".to_string(),
            combined_prefix: "raw_combined_data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub request_timeout_secs: Option<u64>,
    pub window: [u32; 2],
    pub user_agent: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: false,
            disable_gpu: true,
            request_timeout_secs: Some(30),
            window: [1366, 768],
            user_agent: None,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectorSection {
    pub item: Locator,
    #[serde(default)]
    pub sponsored: Vec<Locator>,
    pub title: Locator,
    pub link: Locator,
    #[serde(default = "default_link_attribute")]
    pub link_attribute: String,
    pub price: Locator,
    pub next_page: Vec<Locator>,
    pub page_ready: Locator,
    pub technical_table: Locator,
    pub additional_table: Locator,
    pub table_row: Locator,
    pub row_label: Locator,
    pub row_value: Locator,
}

fn default_link_attribute() -> String {
    "href".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilitySection {
    pub failure_log: String,
    pub metrics_db: String,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            failure_log: "logs/collection_failures.log".to_string(),
            metrics_db: "data/metrics.sqlite".to_string(),
        }
    }
}

pub fn load_harvest_config<P: AsRef<Path>>(path: P) -> Result<HarvestConfig> {
    let config: HarvestConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
