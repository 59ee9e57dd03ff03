use thiserror::Error;

use super::source::ViewHandle;

pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("element not found: {0}")]
    NotFound(String),
    #[error("stale element reference {0}")]
    StaleElement(usize),
    #[error("unknown view {0}")]
    InvalidView(ViewHandle),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl SourceError {
    /// Conditions worth another paced attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Timeout(_) | SourceError::NotFound(_))
    }
}

/// Run-fatal conditions. The accumulated records always travel alongside.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("page {page} did not list any items: {source}")]
    PageUnavailable {
        page: u32,
        #[source]
        source: SourceError,
    },
    #[error("could not seek to page {target}: stuck on page {reached}")]
    ResumeFailed { target: u32, reached: u32 },
    #[error("{live} detail view(s) still open at the start of an item")]
    LeakedView { live: usize },
    #[error("main view lost: {0}")]
    ViewLost(#[source] SourceError),
}
