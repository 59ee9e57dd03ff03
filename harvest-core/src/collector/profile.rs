use std::time::Duration;

use tracing::trace;

use crate::config::SelectorSection;

use super::error::{SourceError, SourceResult};
use super::record::{FieldGroup, ItemSummary};
use super::source::{ElementRef, Locator, NavigableSource};

/// Everything that ties the collector to one remote source's markup: the
/// sponsored predicate, summary field locators, the ordered "next page"
/// fallbacks and the detail tables.
#[derive(Debug, Clone)]
pub struct SourceProfile {
    selectors: SelectorSection,
}

impl SourceProfile {
    pub fn new(selectors: SelectorSection) -> Self {
        Self { selectors }
    }

    pub fn selectors(&self) -> &SelectorSection {
        &self.selectors
    }

    pub fn item_locator(&self) -> &Locator {
        &self.selectors.item
    }

    pub fn page_ready_locator(&self) -> &Locator {
        &self.selectors.page_ready
    }

    pub fn technical_table(&self) -> &Locator {
        &self.selectors.technical_table
    }

    pub fn additional_table(&self) -> &Locator {
        &self.selectors.additional_table
    }

    /// True when any sponsored marker is present inside `item`. Misses are
    /// tolerated; a real item carrying a marker would be dropped.
    pub async fn is_sponsored(
        &self,
        source: &mut dyn NavigableSource,
        item: ElementRef,
    ) -> SourceResult<bool> {
        for marker in &self.selectors.sponsored {
            if source.find_within(item, marker).await?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn read_summary(
        &self,
        source: &mut dyn NavigableSource,
        item: ElementRef,
    ) -> SourceResult<ItemSummary> {
        let title = self.required_text(source, item, &self.selectors.title).await?;
        let link = required(
            source.find_within(item, &self.selectors.link).await?,
            &self.selectors.link,
        )?;
        let url = source
            .attribute(link, &self.selectors.link_attribute)
            .await?
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                SourceError::NotFound(format!(
                    "attribute {} on {}",
                    self.selectors.link_attribute, self.selectors.link
                ))
            })?;
        let price = self.required_text(source, item, &self.selectors.price).await?;
        Ok(ItemSummary { title, url, price })
    }

    /// Reads a two-column `label | value` table. A missing table is an empty
    /// group, not an error.
    pub async fn read_table(
        &self,
        source: &mut dyn NavigableSource,
        table: &Locator,
        timeout: Duration,
    ) -> SourceResult<FieldGroup> {
        let mut group = FieldGroup::new();
        let table = match source.find_one(table, timeout).await {
            Ok(element) => element,
            Err(err) if err.is_transient() => {
                trace!(table = %table, "detail table absent");
                return Ok(group);
            }
            Err(err) => return Err(err),
        };
        let rows = source.find_all_within(table, &self.selectors.table_row).await?;
        for row in rows {
            let label = source.find_within(row, &self.selectors.row_label).await?;
            let value = source.find_within(row, &self.selectors.row_value).await?;
            let (Some(label), Some(value)) = (label, value) else {
                continue;
            };
            let label = source.text(label).await?.trim().to_string();
            let value = source.text(value).await?.trim().to_string();
            if !label.is_empty() {
                group.insert(label, value);
            }
        }
        Ok(group)
    }

    /// Tries each "next page" locator in order; the first match wins.
    /// `Ok(None)` means no locator matched.
    pub async fn find_next_control(
        &self,
        source: &mut dyn NavigableSource,
        timeout: Duration,
    ) -> SourceResult<Option<ElementRef>> {
        for locator in &self.selectors.next_page {
            match source.find_one(locator, timeout).await {
                Ok(element) => return Ok(Some(element)),
                Err(err) if err.is_transient() => {
                    trace!(locator = %locator, "next-page locator did not match");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    async fn required_text(
        &self,
        source: &mut dyn NavigableSource,
        item: ElementRef,
        locator: &Locator,
    ) -> SourceResult<String> {
        let element = required(source.find_within(item, locator).await?, locator)?;
        Ok(source.text(element).await?.trim().to_string())
    }
}

impl From<SelectorSection> for SourceProfile {
    fn from(selectors: SelectorSection) -> Self {
        Self::new(selectors)
    }
}

fn required(element: Option<ElementRef>, locator: &Locator) -> SourceResult<ElementRef> {
    element.ok_or_else(|| SourceError::NotFound(locator.to_string()))
}
