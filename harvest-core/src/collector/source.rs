use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::SourceResult;

/// How an element is located on the remote view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Css(String),
    #[serde(rename = "xpath")]
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Locator::XPath(expression.into())
    }

    pub fn expression(&self) -> &str {
        match self {
            Locator::Css(value) | Locator::XPath(value) => value,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(value) => write!(f, "css:{value}"),
            Locator::XPath(value) => write!(f, "xpath:{value}"),
        }
    }
}

/// Opaque reference to an element the source handed out. Valid until the
/// next [`NavigableSource::forget_elements`] or until its view is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef(pub usize);

/// Identifies one remote-control view (a browser tab for the Chromium source).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewHandle(String);

impl ViewHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Drives and reads a remote interactive view.
///
/// Page-level lookups wait up to `timeout` for the locator to match; scoped
/// lookups (`find_within`, `find_all_within`) inspect the current state only.
/// Every call may fail with [`SourceError::Timeout`](super::SourceError) or
/// [`SourceError::NotFound`](super::SourceError).
#[async_trait(?Send)]
pub trait NavigableSource {
    async fn load(&mut self, target: &str) -> SourceResult<()>;

    async fn find_one(&mut self, locator: &Locator, timeout: Duration)
        -> SourceResult<ElementRef>;

    /// Waits until at least one element matches.
    async fn find_all(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> SourceResult<Vec<ElementRef>>;

    async fn find_within(
        &mut self,
        parent: ElementRef,
        locator: &Locator,
    ) -> SourceResult<Option<ElementRef>>;

    async fn find_all_within(
        &mut self,
        parent: ElementRef,
        locator: &Locator,
    ) -> SourceResult<Vec<ElementRef>>;

    async fn text(&mut self, element: ElementRef) -> SourceResult<String>;

    async fn attribute(&mut self, element: ElementRef, name: &str)
        -> SourceResult<Option<String>>;

    async fn click(&mut self, element: ElementRef) -> SourceResult<()>;

    async fn scroll_into_view(&mut self, element: ElementRef) -> SourceResult<()>;

    async fn current_view_handle(&mut self) -> SourceResult<ViewHandle>;

    /// Opens a new view at `url` without activating it.
    async fn open_view(&mut self, url: &str) -> SourceResult<ViewHandle>;

    async fn close_view(&mut self, handle: &ViewHandle) -> SourceResult<()>;

    async fn switch_view(&mut self, handle: &ViewHandle) -> SourceResult<()>;

    /// Drops element references handed out so far.
    fn forget_elements(&mut self) {}

    /// Releases the remote session; the source is unusable afterwards.
    async fn shutdown(&mut self) -> SourceResult<()> {
        Ok(())
    }
}
