use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::PacingSection;

/// Logical step of a collection run that touches the remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    PageLoad,
    PageSeek,
    ProductProcess,
    Product,
    NewTab,
    TechDetails,
    AdditionalInfo,
    TabSwitchBack,
    Pagination,
    ScrollToNext,
    PageTransition,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PageLoad => "page_load",
            Stage::PageSeek => "page_seek",
            Stage::ProductProcess => "product_process",
            Stage::Product => "product",
            Stage::NewTab => "new_tab",
            Stage::TechDetails => "tech_details",
            Stage::AdditionalInfo => "additional_info",
            Stage::TabSwitchBack => "tab_switch_back",
            Stage::Pagination => "pagination",
            Stage::ScrollToNext => "scroll_to_next",
            Stage::PageTransition => "page_transition",
        }
    }
}

/// Retry and backoff scope. Two keys collide only when stage, page and item
/// all match, so `page_load` for page 11 never aliases item 1 of page 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationKey {
    stage: Stage,
    page: Option<u32>,
    item: Option<usize>,
}

impl OperationKey {
    pub fn stage(stage: Stage) -> Self {
        Self {
            stage,
            page: None,
            item: None,
        }
    }

    pub fn page(stage: Stage, page: u32) -> Self {
        Self {
            stage,
            page: Some(page),
            item: None,
        }
    }

    pub fn item(stage: Stage, page: u32, item: usize) -> Self {
        Self {
            stage,
            page: Some(page),
            item: Some(item),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stage.as_str())?;
        if let Some(page) = self.page {
            write!(f, "_{page}")?;
        }
        if let Some(item) = self.item {
            write!(f, "_{item}")?;
        }
        Ok(())
    }
}

/// Paces every remote interaction of one collection run.
///
/// Backoff is tracked per [`OperationKey`], so a flaky detail page does not
/// slow down unrelated pages. The minimum request interval is measured from a
/// single `last_request` shared by every key of this controller; controllers
/// of separate runs never share it.
#[derive(Debug)]
pub struct PacingController {
    config: PacingSection,
    retry_counts: HashMap<OperationKey, u32>,
    last_request: Option<Instant>,
    rng: ChaCha8Rng,
}

impl PacingController {
    pub fn new(config: PacingSection) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            config,
            retry_counts: HashMap::new(),
            last_request: None,
            rng,
        }
    }

    pub fn config(&self) -> &PacingSection {
        &self.config
    }

    /// Sleeps for the interval floor remainder, then for the jittered backoff
    /// delay of `key`. Returns the total time slept.
    pub async fn wait(&mut self, key: &OperationKey) -> Duration {
        let mut waited = Duration::ZERO;

        if let Some(last) = self.last_request {
            let floor = secs(self.config.min_request_interval_secs);
            let elapsed = last.elapsed();
            if elapsed < floor {
                let remainder = floor - elapsed;
                sleep(remainder).await;
                waited += remainder;
            }
        }

        let base = self.backoff_delay(key);
        let delay = self.jittered(base);
        debug!(operation = %key, delay_secs = delay, "pacing before next operation");
        let delay = secs(delay);
        if !delay.is_zero() {
            sleep(delay).await;
            waited += delay;
        }

        self.last_request = Some(Instant::now());
        waited
    }

    /// `min(max_delay, base_delay * backoff_factor ^ retry_count)` in seconds.
    pub fn backoff_delay(&self, key: &OperationKey) -> f64 {
        let retries = self.retry_count(key);
        let exponent = i32::try_from(retries).unwrap_or(i32::MAX);
        let delay = self.config.base_delay_secs * self.config.backoff_factor.powi(exponent);
        delay.min(self.config.max_delay_secs)
    }

    /// Applies symmetric jitter; never returns a negative delay.
    pub fn jittered(&mut self, delay: f64) -> f64 {
        let factor = self.config.jitter_factor;
        if factor <= 0.0 || delay <= 0.0 {
            return delay.max(0.0);
        }
        let jitter = self.rng.gen_range(-factor..=factor) * delay;
        (delay + jitter).max(0.0)
    }

    pub fn record_success(&mut self, key: &OperationKey) {
        self.retry_counts.remove(key);
    }

    /// Bumps the retry count of `key`. Returns `false` once the count exceeds
    /// `max_retries`; callers decide what to do with that.
    pub fn record_failure(&mut self, key: &OperationKey) -> bool {
        let count = self.retry_counts.entry(*key).or_insert(0);
        *count = count.saturating_add(1);
        if *count > self.config.max_retries {
            warn!(
                operation = %key,
                max_retries = self.config.max_retries,
                "max retries exceeded"
            );
            return false;
        }
        true
    }

    pub fn reset(&mut self, key: &OperationKey) {
        self.retry_counts.remove(key);
    }

    pub fn retry_count(&self, key: &OperationKey) -> u32 {
        self.retry_counts.get(key).copied().unwrap_or(0)
    }

    pub fn tracked(&self) -> usize {
        self.retry_counts.len()
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}
