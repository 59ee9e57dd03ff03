use tracing::{debug, warn};

use super::error::SourceResult;
use super::source::{NavigableSource, ViewHandle};

/// Single owner of "which view is active". Every switch, on the happy path
/// and on every recovery path, goes through here.
#[derive(Debug)]
pub struct SessionManager {
    main: ViewHandle,
    active: ViewHandle,
    detail: Vec<ViewHandle>,
}

/// A detail view scoped to one item. Must be handed back through
/// [`SessionManager::close_detail_view`].
#[derive(Debug)]
#[must_use = "detail views must be closed through the session manager"]
pub struct DetailView {
    handle: ViewHandle,
    released: bool,
}

impl DetailView {
    pub fn handle(&self) -> &ViewHandle {
        &self.handle
    }
}

impl Drop for DetailView {
    fn drop(&mut self) {
        if !self.released {
            warn!(view = %self.handle, "detail view dropped without being closed");
        }
    }
}

impl SessionManager {
    /// Adopts the source's currently active view as the main view.
    pub async fn attach(source: &mut dyn NavigableSource) -> SourceResult<Self> {
        let main = source.current_view_handle().await?;
        Ok(Self {
            active: main.clone(),
            main,
            detail: Vec::new(),
        })
    }

    pub fn main_view(&self) -> &ViewHandle {
        &self.main
    }

    pub fn active_view(&self) -> &ViewHandle {
        &self.active
    }

    pub fn is_main_active(&self) -> bool {
        self.active == self.main
    }

    pub fn live_detail_views(&self) -> usize {
        self.detail.len()
    }

    pub async fn open_detail_view(
        &mut self,
        source: &mut dyn NavigableSource,
        url: &str,
    ) -> SourceResult<DetailView> {
        let handle = source.open_view(url).await?;
        self.detail.push(handle.clone());
        if let Err(err) = source.switch_view(&handle).await {
            // Never activated, so the main view is still in front.
            self.discard(source, &handle).await;
            return Err(err);
        }
        self.active = handle.clone();
        debug!(view = %handle, url, "detail view opened");
        Ok(DetailView {
            handle,
            released: false,
        })
    }

    /// Closes the detail view and restores the main view. The main view is
    /// restored even when closing fails.
    pub async fn close_detail_view(
        &mut self,
        source: &mut dyn NavigableSource,
        mut view: DetailView,
    ) -> SourceResult<()> {
        view.released = true;
        let closed = source.close_view(&view.handle).await;
        if closed.is_ok() {
            self.detail.retain(|handle| handle != &view.handle);
        }
        let restored = self.activate_main(source).await;
        closed.and(restored)
    }

    /// Best-effort cleanup: closes every live detail view, then switches back
    /// to the main view. Views that refuse to close stay tracked.
    pub async fn force_main(&mut self, source: &mut dyn NavigableSource) -> SourceResult<()> {
        let mut leaked = Vec::new();
        for handle in std::mem::take(&mut self.detail) {
            if let Err(err) = source.close_view(&handle).await {
                warn!(view = %handle, error = %err, "failed to close detail view during cleanup");
                leaked.push(handle);
            }
        }
        self.detail = leaked;
        self.activate_main(source).await
    }

    async fn activate_main(&mut self, source: &mut dyn NavigableSource) -> SourceResult<()> {
        source.switch_view(&self.main).await?;
        self.active = self.main.clone();
        Ok(())
    }

    async fn discard(&mut self, source: &mut dyn NavigableSource, handle: &ViewHandle) {
        match source.close_view(handle).await {
            Ok(()) => self.detail.retain(|live| live != handle),
            Err(err) => warn!(view = %handle, error = %err, "failed to discard detail view"),
        }
    }
}
