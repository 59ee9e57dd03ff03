use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetrics {
    pub pages_visited: u64,
    pub items_seen: u64,
    pub sponsored_skipped: u64,
    pub summary_failures: u64,
    pub detail_views_opened: u64,
    pub detail_failures: u64,
    pub records_collected: u64,
    pub checkpoints_written: u64,
    pub checkpoint_failures: u64,
    pub retries: u64,
    pub total_wait_ms: u64,
}

impl CollectionMetrics {
    pub fn record_page(&mut self) {
        self.pages_visited = self.pages_visited.saturating_add(1);
    }

    pub fn record_item_seen(&mut self) {
        self.items_seen = self.items_seen.saturating_add(1);
    }

    pub fn record_sponsored(&mut self) {
        self.sponsored_skipped = self.sponsored_skipped.saturating_add(1);
    }

    pub fn record_summary_failure(&mut self) {
        self.summary_failures = self.summary_failures.saturating_add(1);
    }

    pub fn record_detail_open(&mut self) {
        self.detail_views_opened = self.detail_views_opened.saturating_add(1);
    }

    pub fn record_detail_failure(&mut self) {
        self.detail_failures = self.detail_failures.saturating_add(1);
    }

    pub fn record_collected(&mut self) {
        self.records_collected = self.records_collected.saturating_add(1);
    }

    pub fn record_checkpoint(&mut self, success: bool) {
        if success {
            self.checkpoints_written = self.checkpoints_written.saturating_add(1);
        } else {
            self.checkpoint_failures = self.checkpoint_failures.saturating_add(1);
        }
    }

    pub fn record_retry(&mut self) {
        self.retries = self.retries.saturating_add(1);
    }

    pub fn record_wait(&mut self, millis: u64) {
        self.total_wait_ms = self.total_wait_ms.saturating_add(millis);
    }

    pub fn sponsored_ratio(&self) -> f64 {
        if self.items_seen == 0 {
            0.0
        } else {
            (self.sponsored_skipped as f64 / self.items_seen as f64) * 100.0
        }
    }
}
