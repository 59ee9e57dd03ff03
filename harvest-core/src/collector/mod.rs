mod chromium;
mod error;
mod machine;
mod metrics;
mod profile;
mod record;
mod session;
mod source;
mod telemetry;

pub use chromium::{ChromiumLauncher, ChromiumSource, LaunchOverrides};
pub use error::{CollectError, SourceError, SourceResult};
pub use machine::{
    CollectRequest, CollectionOutcome, Collector, CollectorConfig, StopSignal, Termination,
};
pub use metrics::CollectionMetrics;
pub use profile::SourceProfile;
pub use record::{identity_key, price_value, resolve_link, FieldGroup, ItemSummary, Record};
pub use session::{DetailView, SessionManager};
pub use source::{ElementRef, Locator, NavigableSource, ViewHandle};
pub use telemetry::{
    CollectionTelemetry, ErrorCategorizer, FailureCategory, FailureContext, FailureEntry,
    Remediation, RunContext, TelemetryError,
};
