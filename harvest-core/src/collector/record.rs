use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use url::Url;

/// Ordered `label -> value` pairs scraped from one detail table.
pub type FieldGroup = IndexMap<String, String>;

/// One collected item. Immutable once appended to a run's buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub identity_key: String,
    pub title: String,
    pub price: String,
    pub url: String,
    pub technical: FieldGroup,
    pub additional: FieldGroup,
    pub collected_at: DateTime<Utc>,
}

impl Record {
    pub fn new(summary: ItemSummary, technical: FieldGroup, additional: FieldGroup) -> Self {
        Self {
            identity_key: identity_key(&summary.url),
            title: summary.title,
            price: summary.price,
            url: summary.url,
            technical,
            additional,
            collected_at: Utc::now(),
        }
    }

    pub fn has_details(&self) -> bool {
        !self.technical.is_empty() || !self.additional.is_empty()
    }

    pub fn price_value(&self) -> Option<f64> {
        price_value(&self.price)
    }
}

/// Fields read from the listing before the detail view is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSummary {
    pub title: String,
    pub url: String,
    pub price: String,
}

/// Canonical URL used for deduplication: scheme and host lowercased, query and
/// fragment dropped, trailing slash trimmed. Values that do not parse as URLs
/// are only trimmed.
pub fn identity_key(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            let canonical = parsed.to_string();
            match canonical.strip_suffix('/') {
                Some(stripped) if parsed.path() != "/" => stripped.to_string(),
                _ => canonical,
            }
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Numeric value of a listing price with digit grouping removed, so both
/// `1,82,990` and `182,990` read as `182990.0`. A leading currency sign and a
/// trailing decimal point are ignored; anything else that is not a number
/// yields `None`.
pub fn price_value(raw: &str) -> Option<f64> {
    let trimmed = raw
        .trim()
        .trim_start_matches(|ch: char| !ch.is_ascii_digit())
        .trim_end_matches('.');
    let digits: String = trimmed.chars().filter(|ch| *ch != ',').collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Absolute form of a listing link. Relative hrefs are joined onto `base`;
/// anything unresolvable is returned as-is.
pub fn resolve_link(base: Option<&str>, href: &str) -> String {
    let href = href.trim();
    if Url::parse(href).is_ok() {
        return href.to_string();
    }
    base.and_then(|base| Url::parse(base).ok())
        .and_then(|base| base.join(href).ok())
        .map(|joined| joined.to_string())
        .unwrap_or_else(|| href.to_string())
}
