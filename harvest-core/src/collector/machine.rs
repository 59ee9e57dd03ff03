use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checkpoint::{checkpoint, CheckpointSink};
use crate::config::{CollectionSection, HarvestConfig, PacingSection};
use crate::pacing::{OperationKey, PacingController, Stage};

use super::error::{CollectError, SourceError, SourceResult};
use super::metrics::CollectionMetrics;
use super::profile::SourceProfile;
use super::record::{resolve_link, FieldGroup, ItemSummary, Record};
use super::session::{DetailView, SessionManager};
use super::source::{ElementRef, NavigableSource};
use super::telemetry::{CollectionTelemetry, FailureContext, Remediation, RunContext};

/// Cooperative cancellation flag, checked at the top of every page and item.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub collection: CollectionSection,
    pub pacing: PacingSection,
    pub checkpoint_prefix: String,
}

impl CollectorConfig {
    pub fn from_harvest_config(config: &HarvestConfig) -> Self {
        Self {
            collection: config.collection.clone(),
            pacing: config.pacing.clone(),
            checkpoint_prefix: config.checkpoint.checkpoint_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectRequest {
    pub max_items: Option<usize>,
    pub start_page: u32,
}

impl Default for CollectRequest {
    fn default() -> Self {
        Self {
            max_items: None,
            start_page: 1,
        }
    }
}

impl CollectRequest {
    pub fn from_section(section: &CollectionSection) -> Self {
        Self {
            max_items: section.max_items,
            start_page: section.start_page,
        }
    }
}

/// Why a run stopped.
#[derive(Debug)]
pub enum Termination {
    /// Pagination found no further page.
    Exhausted,
    CapReached,
    Cancelled,
    Failed(CollectError),
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Exhausted => "exhausted",
            Termination::CapReached => "cap_reached",
            Termination::Cancelled => "cancelled",
            Termination::Failed(_) => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Termination::Failed(_))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Failed(err) => write!(f, "failed: {err}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Records are always handed back, whatever the termination.
#[derive(Debug)]
pub struct CollectionOutcome {
    pub run_id: Uuid,
    pub records: Vec<Record>,
    pub termination: Termination,
    pub metrics: CollectionMetrics,
    /// Last page index reached.
    pub pages: u32,
    pub duration: Duration,
}

impl CollectionOutcome {
    pub fn error(&self) -> Option<&CollectError> {
        match &self.termination {
            Termination::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.termination.is_success()
    }
}

/// Walks a paginated listing on a [`NavigableSource`] and turns every
/// non-sponsored item into a [`Record`].
pub struct Collector {
    source: Box<dyn NavigableSource>,
    profile: Arc<SourceProfile>,
    config: CollectorConfig,
    sink: Option<Arc<dyn CheckpointSink>>,
    telemetry: Option<Arc<CollectionTelemetry>>,
    stop: StopSignal,
}

impl Collector {
    pub fn new(
        source: Box<dyn NavigableSource>,
        profile: Arc<SourceProfile>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            source,
            profile,
            config,
            sink: None,
            telemetry: None,
            stop: StopSignal::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn CheckpointSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<CollectionTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn into_source(self) -> Box<dyn NavigableSource> {
        self.source
    }

    pub async fn collect(&mut self, request: CollectRequest) -> CollectionOutcome {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            start_page = request.start_page,
            max_items = ?request.max_items,
            "collection run starting"
        );

        let mut run = CollectionRun {
            run_id,
            source: self.source.as_mut(),
            profile: self.profile.as_ref(),
            config: &self.config,
            sink: self.sink.as_deref(),
            telemetry: self.telemetry.as_deref(),
            stop: &self.stop,
            pacing: PacingController::new(self.config.pacing.clone()),
            session: None,
            cursor: 1,
            records: Vec::new(),
            metrics: CollectionMetrics::default(),
        };
        let termination = run.execute(request).await;
        let outcome = CollectionOutcome {
            run_id,
            pages: run.cursor,
            metrics: run.metrics,
            records: run.records,
            termination,
            duration: started.elapsed(),
        };

        info!(
            %run_id,
            records = outcome.records.len(),
            pages = outcome.pages,
            termination = %outcome.termination,
            sponsored = outcome.metrics.sponsored_skipped,
            checkpoints = outcome.metrics.checkpoints_written,
            duration_ms = outcome.duration.as_millis() as u64,
            "collection run finished"
        );
        self.report(&outcome, request);
        outcome
    }

    fn report(&self, outcome: &CollectionOutcome, request: CollectRequest) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        let run = RunContext {
            run_id: outcome.run_id,
            timestamp: chrono::Utc::now(),
            start_url: self.config.collection.start_url.clone(),
            start_page: request.start_page,
            last_page: outcome.pages,
            records: outcome.records.len(),
            termination: outcome.termination.as_str().to_string(),
            success: outcome.is_success(),
            duration_ms: i64::try_from(outcome.duration.as_millis()).unwrap_or(i64::MAX),
            sponsored_skipped: outcome.metrics.sponsored_skipped,
            retries: outcome.metrics.retries,
            checkpoints: outcome.metrics.checkpoints_written,
        };
        if let Err(err) = telemetry.record_run(&run) {
            warn!(error = %err, "failed to record collection run");
        }
    }
}

enum ItemOutcome {
    Collected(Record),
    Skipped,
    Fatal(CollectError),
}

enum PageAdvance {
    Advanced,
    /// No fallback locator matched.
    NoNext,
    /// The control lookup failed, or it could not be scrolled to or clicked.
    Stalled,
    /// Clicked, but the next listing never showed its first item.
    NotReady,
}

/// State owned by one `collect` invocation.
struct CollectionRun<'a> {
    run_id: Uuid,
    source: &'a mut dyn NavigableSource,
    profile: &'a SourceProfile,
    config: &'a CollectorConfig,
    sink: Option<&'a dyn CheckpointSink>,
    telemetry: Option<&'a CollectionTelemetry>,
    stop: &'a StopSignal,
    pacing: PacingController,
    session: Option<SessionManager>,
    cursor: u32,
    records: Vec<Record>,
    metrics: CollectionMetrics,
}

impl<'a> CollectionRun<'a> {
    async fn execute(&mut self, request: CollectRequest) -> Termination {
        if self.stop.is_raised() {
            info!("stop requested before the run started");
            return Termination::Cancelled;
        }
        if request.max_items == Some(0) {
            return Termination::CapReached;
        }

        match SessionManager::attach(&mut *self.source).await {
            Ok(session) => self.session = Some(session),
            Err(err) => return self.fail(CollectError::ViewLost(err)).await,
        }
        if let Err(err) = self.load_start().await {
            return self.fail(err).await;
        }
        if let Err(err) = self.seek(request.start_page.max(1)).await {
            return self.fail(err).await;
        }

        loop {
            if self.stop.is_raised() {
                info!(page = self.cursor, "stop requested");
                return Termination::Cancelled;
            }
            match self.walk_page(request.max_items).await {
                Ok(Some(termination)) => return termination,
                Ok(None) => {}
                Err(err) => return self.fail(err).await,
            }
            match self.advance().await {
                PageAdvance::Advanced => {}
                PageAdvance::NoNext => {
                    info!(page = self.cursor, "no next page control, results exhausted");
                    return Termination::Exhausted;
                }
                PageAdvance::Stalled => {
                    warn!(page = self.cursor, "next page control not actionable, ending run");
                    return Termination::Exhausted;
                }
                PageAdvance::NotReady => {
                    warn!(page = self.cursor, "next page never became ready, ending run");
                    return Termination::Exhausted;
                }
            }
        }
    }

    async fn load_start(&mut self) -> Result<(), CollectError> {
        let config = self.config;
        let Some(url) = config.collection.start_url.as_deref() else {
            return Ok(());
        };
        self.pace(&OperationKey::stage(Stage::PageLoad)).await;
        self.source
            .load(url)
            .await
            .map_err(|source| CollectError::PageUnavailable { page: 1, source })?;
        info!(url, "start page loaded");
        Ok(())
    }

    /// Clicks through to `target` before any item is processed.
    async fn seek(&mut self, target: u32) -> Result<(), CollectError> {
        if target > 1 {
            info!(target, "seeking to start page");
        }
        while self.cursor < target {
            let key = OperationKey::page(Stage::PageSeek, self.cursor);
            let mut attempts = 0u32;
            loop {
                self.pace(&key).await;
                match self.advance().await {
                    PageAdvance::Advanced => {
                        self.pacing.reset(&key);
                        debug!(page = self.cursor, target, "seek advanced");
                        break;
                    }
                    PageAdvance::NotReady => {
                        return Err(CollectError::ResumeFailed {
                            target,
                            reached: self.cursor,
                        });
                    }
                    PageAdvance::NoNext | PageAdvance::Stalled => {
                        attempts += 1;
                        if attempts >= self.config.collection.seek_attempts {
                            self.pacing.reset(&key);
                            return Err(CollectError::ResumeFailed {
                                target,
                                reached: self.cursor,
                            });
                        }
                        self.pacing.record_failure(&key);
                        self.metrics.record_retry();
                        warn!(page = self.cursor, attempts, "seek step failed, retrying");
                    }
                }
            }
        }
        Ok(())
    }

    /// Processes every item of the current page. `Some` ends the run.
    async fn walk_page(
        &mut self,
        max_items: Option<usize>,
    ) -> Result<Option<Termination>, CollectError> {
        let page = self.cursor;
        let profile = self.profile;
        self.source.forget_elements();
        self.metrics.record_page();
        let items = self.enumerate_items(page).await?;
        info!(page, items = items.len(), "processing page");

        for (position, item) in items.into_iter().enumerate() {
            let index = position + 1;
            if self.stop.is_raised() {
                info!(page, item = index, "stop requested");
                return Ok(Some(Termination::Cancelled));
            }
            let session = self.session()?;
            if session.live_detail_views() > 0 || !session.is_main_active() {
                return Err(CollectError::LeakedView {
                    live: session.live_detail_views(),
                });
            }

            self.metrics.record_item_seen();
            self.pace(&OperationKey::item(Stage::ProductProcess, page, index))
                .await;
            match profile.is_sponsored(&mut *self.source, item).await {
                Ok(true) => {
                    self.metrics.record_sponsored();
                    debug!(page, item = index, "skipping sponsored item");
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    debug!(page, item = index, error = %err, "sponsored check failed");
                }
            }

            match self.process_item(page, index, item).await {
                ItemOutcome::Collected(record) => {
                    debug!(page, item = index, url = %record.url, "record collected");
                    self.records.push(record);
                    self.metrics.record_collected();
                    self.maybe_checkpoint(page);
                    if max_items.is_some_and(|max| self.records.len() >= max) {
                        info!(records = self.records.len(), "item cap reached");
                        return Ok(Some(Termination::CapReached));
                    }
                }
                ItemOutcome::Skipped => {}
                ItemOutcome::Fatal(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Lists the page's items, retrying transient misses within the pacing
    /// budget of `page_load_<page>`.
    async fn enumerate_items(&mut self, page: u32) -> Result<Vec<ElementRef>, CollectError> {
        let key = OperationKey::page(Stage::PageLoad, page);
        let profile = self.profile;
        let locator = profile.item_locator();
        let timeout = self.config.collection.element_timeout();
        loop {
            self.pace(&key).await;
            match self.source.find_all(locator, timeout).await {
                Ok(items) => {
                    self.pacing.record_success(&key);
                    return Ok(items);
                }
                Err(err) if err.is_transient() && self.pacing.record_failure(&key) => {
                    self.metrics.record_retry();
                    warn!(page, error = %err, "item list not ready, retrying");
                    self.note_failure(&key, None, &err, Remediation::Retry);
                }
                Err(source) => return Err(CollectError::PageUnavailable { page, source }),
            }
        }
    }

    async fn process_item(&mut self, page: u32, index: usize, item: ElementRef) -> ItemOutcome {
        let product = OperationKey::item(Stage::Product, page, index);
        let summary = match self.profile.read_summary(&mut *self.source, item).await {
            Ok(mut summary) => {
                let base = self.config.collection.start_url.as_deref();
                summary.url = resolve_link(base, &summary.url);
                summary
            }
            Err(err) => {
                self.metrics.record_summary_failure();
                warn!(page, item = index, error = %err, "could not read item summary, skipping");
                self.note_failure(&product, None, &err, Remediation::SkipItem);
                return ItemOutcome::Skipped;
            }
        };

        match self.enrich(page, index, &summary).await {
            Ok((technical, additional)) => {
                ItemOutcome::Collected(Record::new(summary, technical, additional))
            }
            Err(err) => ItemOutcome::Fatal(err),
        }
    }

    /// Opens the detail view, reads both tables and always closes it again.
    /// Extraction failures leave the affected group empty; only a view that
    /// cannot be closed is an error.
    async fn enrich(
        &mut self,
        page: u32,
        index: usize,
        summary: &ItemSummary,
    ) -> Result<(FieldGroup, FieldGroup), CollectError> {
        let Some(view) = self.open_detail(page, index, &summary.url).await? else {
            return Ok((FieldGroup::new(), FieldGroup::new()));
        };
        self.metrics.record_detail_open();

        let profile = self.profile;
        let detail_timeout = self.config.collection.detail_timeout();
        let technical_key = OperationKey::item(Stage::TechDetails, page, index);
        self.pace(&technical_key).await;
        let technical = profile
            .read_table(&mut *self.source, profile.technical_table(), detail_timeout)
            .await;
        let additional_key = OperationKey::item(Stage::AdditionalInfo, page, index);
        self.pace(&additional_key).await;
        let additional = profile
            .read_table(&mut *self.source, profile.additional_table(), detail_timeout)
            .await;

        self.pace(&OperationKey::item(Stage::TabSwitchBack, page, index))
            .await;
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => return Err(detached()),
        };
        session
            .close_detail_view(&mut *self.source, view)
            .await
            .map_err(CollectError::ViewLost)?;

        let technical = self.settle_group(technical, &technical_key, &summary.url);
        let additional = self.settle_group(additional, &additional_key, &summary.url);
        Ok((technical, additional))
    }

    async fn open_detail(
        &mut self,
        page: u32,
        index: usize,
        url: &str,
    ) -> Result<Option<DetailView>, CollectError> {
        let key = OperationKey::item(Stage::NewTab, page, index);
        loop {
            self.pace(&key).await;
            let session = match self.session.as_mut() {
                Some(session) => session,
                None => return Err(detached()),
            };
            match session.open_detail_view(&mut *self.source, url).await {
                Ok(view) => {
                    self.pacing.record_success(&key);
                    return Ok(Some(view));
                }
                Err(err) if err.is_transient() && self.pacing.record_failure(&key) => {
                    self.metrics.record_retry();
                    warn!(page, item = index, error = %err, "detail view did not open, retrying");
                    self.note_failure(&key, Some(url), &err, Remediation::Retry);
                }
                Err(err) => {
                    self.metrics.record_detail_failure();
                    warn!(page, item = index, error = %err, "detail view unavailable");
                    self.note_failure(&key, Some(url), &err, Remediation::SkipItem);
                    self.pacing.reset(&key);
                    return Ok(None);
                }
            }
        }
    }

    fn settle_group(
        &mut self,
        group: SourceResult<FieldGroup>,
        key: &OperationKey,
        url: &str,
    ) -> FieldGroup {
        match group {
            Ok(group) => group,
            Err(err) => {
                self.metrics.record_detail_failure();
                warn!(operation = %key, url, error = %err, "detail extraction failed");
                self.note_failure(key, Some(url), &err, Remediation::SkipItem);
                FieldGroup::new()
            }
        }
    }

    /// Moves to the next listing page. Every failure here is page-local: it
    /// ends pagination and is logged with [`Remediation::EndPage`].
    async fn advance(&mut self) -> PageAdvance {
        let profile = self.profile;
        let element_timeout = self.config.collection.element_timeout();
        let pagination = OperationKey::stage(Stage::Pagination);
        self.pace(&pagination).await;
        let control = match profile
            .find_next_control(&mut *self.source, element_timeout)
            .await
        {
            Ok(Some(control)) => control,
            Ok(None) => return PageAdvance::NoNext,
            Err(err) => {
                debug!(page = self.cursor, error = %err, "next page lookup failed");
                self.note_failure(&pagination, None, &err, Remediation::EndPage);
                return PageAdvance::Stalled;
            }
        };

        let scroll = OperationKey::stage(Stage::ScrollToNext);
        self.pace(&scroll).await;
        let clicked = match self.source.scroll_into_view(control).await {
            Ok(()) => self.source.click(control).await,
            Err(err) => Err(err),
        };
        if let Err(err) = clicked {
            debug!(page = self.cursor, error = %err, "next page control not clickable");
            self.note_failure(&scroll, None, &err, Remediation::EndPage);
            return PageAdvance::Stalled;
        }

        let transition = OperationKey::stage(Stage::PageTransition);
        self.pace(&transition).await;
        let ready = profile.page_ready_locator();
        match self
            .source
            .find_one(ready, self.config.collection.page_ready_timeout())
            .await
        {
            Ok(_) => {
                self.cursor += 1;
                debug!(page = self.cursor, "advanced to next page");
                PageAdvance::Advanced
            }
            Err(err) => {
                debug!(page = self.cursor, error = %err, "next page not ready");
                self.note_failure(&transition, None, &err, Remediation::EndPage);
                PageAdvance::NotReady
            }
        }
    }

    fn maybe_checkpoint(&mut self, page: u32) {
        let size = self.config.collection.checkpoint_size;
        let Some(sink) = self.sink else {
            return;
        };
        if size == 0 || self.records.len() % size != 0 {
            return;
        }
        let label = format!("{}_p{page}", self.config.checkpoint_prefix);
        match checkpoint(sink, &self.records, &label) {
            Ok(_) => self.metrics.record_checkpoint(true),
            Err(err) => {
                self.metrics.record_checkpoint(false);
                warn!(label, error = %err, "checkpoint failed, continuing");
            }
        }
    }

    async fn pace(&mut self, key: &OperationKey) {
        let waited = self.pacing.wait(key).await;
        self.metrics
            .record_wait(u64::try_from(waited.as_millis()).unwrap_or(u64::MAX));
    }

    fn session(&self) -> Result<&SessionManager, CollectError> {
        self.session.as_ref().ok_or_else(detached)
    }

    /// Run-fatal exit: restore the main view if needed, then log the cause.
    async fn fail(&mut self, err: CollectError) -> Termination {
        if let Some(session) = self.session.as_mut() {
            if !session.is_main_active() || session.live_detail_views() > 0 {
                if let Err(cleanup) = session.force_main(&mut *self.source).await {
                    error!(error = %cleanup, "could not restore the main view");
                }
            }
        }
        error!(
            page = self.cursor,
            records = self.records.len(),
            error = %err,
            "collection run aborted"
        );
        if let Some(telemetry) = self.telemetry {
            let failure = FailureContext::from_collect_error(self.run_id, "collect", &err)
                .with_page(self.cursor);
            if let Err(record_err) = telemetry.record_failure(&failure) {
                warn!(error = %record_err, "failed to record collection failure");
            }
        }
        Termination::Failed(err)
    }

    fn note_failure(
        &self,
        key: &OperationKey,
        url: Option<&str>,
        err: &SourceError,
        remediation: Remediation,
    ) {
        let Some(telemetry) = self.telemetry else {
            return;
        };
        let mut failure =
            FailureContext::from_source_error(self.run_id, key.to_string(), err, remediation)
                .with_page(self.cursor)
                .with_attempt(self.pacing.retry_count(key));
        if let Some(url) = url {
            failure = failure.with_url(url);
        }
        if let Err(record_err) = telemetry.record_failure(&failure) {
            warn!(error = %record_err, "failed to record collection failure");
        }
    }
}

fn detached() -> CollectError {
    CollectError::ViewLost(SourceError::Unexpected(
        "session manager not attached".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::collector::source::{Locator, ViewHandle};
    use crate::config::load_harvest_config;

    /// Every item reads (or fails to read) the same summary and no detail
    /// view ever opens.
    struct MockSource {
        summary_ok: bool,
        opens: usize,
    }

    #[async_trait(?Send)]
    impl NavigableSource for MockSource {
        async fn load(&mut self, _target: &str) -> SourceResult<()> {
            Ok(())
        }

        async fn find_one(
            &mut self,
            locator: &Locator,
            _timeout: Duration,
        ) -> SourceResult<ElementRef> {
            Err(SourceError::Timeout(locator.to_string()))
        }

        async fn find_all(
            &mut self,
            _locator: &Locator,
            _timeout: Duration,
        ) -> SourceResult<Vec<ElementRef>> {
            Ok(vec![ElementRef(0)])
        }

        async fn find_within(
            &mut self,
            _parent: ElementRef,
            _locator: &Locator,
        ) -> SourceResult<Option<ElementRef>> {
            Ok(self.summary_ok.then_some(ElementRef(1)))
        }

        async fn find_all_within(
            &mut self,
            _parent: ElementRef,
            _locator: &Locator,
        ) -> SourceResult<Vec<ElementRef>> {
            Ok(Vec::new())
        }

        async fn text(&mut self, _element: ElementRef) -> SourceResult<String> {
            Ok("Laptop".to_string())
        }

        async fn attribute(
            &mut self,
            _element: ElementRef,
            _name: &str,
        ) -> SourceResult<Option<String>> {
            Ok(Some("https://shop.example/dp/B0001".to_string()))
        }

        async fn click(&mut self, _element: ElementRef) -> SourceResult<()> {
            Ok(())
        }

        async fn scroll_into_view(&mut self, _element: ElementRef) -> SourceResult<()> {
            Ok(())
        }

        async fn current_view_handle(&mut self) -> SourceResult<ViewHandle> {
            Ok(ViewHandle::new("main"))
        }

        async fn open_view(&mut self, url: &str) -> SourceResult<ViewHandle> {
            self.opens += 1;
            Err(SourceError::Timeout(url.to_string()))
        }

        async fn close_view(&mut self, _handle: &ViewHandle) -> SourceResult<()> {
            Ok(())
        }

        async fn switch_view(&mut self, _handle: &ViewHandle) -> SourceResult<()> {
            Ok(())
        }
    }

    /// Runs one item through `process_item`; returns whether it was
    /// collected and how many keys the pacing controller still tracks.
    async fn settle_item(source: &mut MockSource) -> (bool, usize) {
        let config = load_harvest_config("../configs/harvest.toml").unwrap();
        let profile = SourceProfile::new(config.selectors.clone());
        let mut collector_config = CollectorConfig::from_harvest_config(&config);
        collector_config.pacing = PacingSection::immediate();
        let stop = StopSignal::new();
        let mut run = CollectionRun {
            run_id: Uuid::new_v4(),
            source,
            profile: &profile,
            config: &collector_config,
            sink: None,
            telemetry: None,
            stop: &stop,
            pacing: PacingController::new(collector_config.pacing.clone()),
            session: None,
            cursor: 1,
            records: Vec::new(),
            metrics: CollectionMetrics::default(),
        };
        run.session = Some(SessionManager::attach(&mut *run.source).await.unwrap());

        let collected = matches!(
            run.process_item(1, 1, ElementRef(0)).await,
            ItemOutcome::Collected(_)
        );
        (collected, run.pacing.tracked())
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_summary_leaves_no_retry_state() {
        let mut source = MockSource {
            summary_ok: false,
            opens: 0,
        };
        let (collected, tracked) = settle_item(&mut source).await;
        assert!(!collected);
        assert_eq!(tracked, 0);
        assert_eq!(source.opens, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_detail_retries_are_released() {
        let mut source = MockSource {
            summary_ok: true,
            opens: 0,
        };
        let (collected, tracked) = settle_item(&mut source).await;
        assert!(collected);
        assert_eq!(tracked, 0);
        let max_retries = PacingSection::immediate().max_retries as usize;
        assert_eq!(source.opens, max_retries + 1);
    }
}
