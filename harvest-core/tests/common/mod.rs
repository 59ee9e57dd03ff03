#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use harvest_core::collector::{
    CollectorConfig, ElementRef, Locator, NavigableSource, SourceError, SourceProfile,
    SourceResult, StopSignal, ViewHandle,
};
use harvest_core::config::{CollectionSection, PacingSection, SelectorSection};

pub const PREFIX: &str = "laptops";

#[derive(Debug, Clone, Default)]
pub struct FakeItem {
    pub title: String,
    pub url: String,
    pub price: String,
    pub sponsored: bool,
    pub technical: Vec<(String, String)>,
    pub additional: Vec<(String, String)>,
}

impl FakeItem {
    pub fn organic(page: usize, index: usize) -> Self {
        Self {
            title: format!("Laptop {page}-{index}"),
            url: format!("https://shop.example/dp/P{page}I{index}?ref=sr_{index}"),
            price: format!("{},990", 40 + index),
            sponsored: false,
            technical: vec![
                ("RAM".to_string(), format!("{} GB", 8 * index)),
                ("CPU".to_string(), "i5".to_string()),
            ],
            additional: vec![("ASIN".to_string(), format!("B0{page}{index}"))],
        }
    }

    pub fn sponsored(page: usize, index: usize) -> Self {
        Self {
            sponsored: true,
            title: format!("Sponsored {page}-{index}"),
            ..Self::organic(page, index)
        }
    }
}

#[derive(Debug, Clone)]
enum FakeElement {
    Item { page: usize, index: usize },
    Marker,
    Title(String),
    Link(String),
    Price(String),
    NextControl,
    PageReady,
    Table(Vec<(String, String)>),
    Row(String, String),
    Label(String),
    Value(String),
}

#[derive(Debug)]
pub struct FakeState {
    pub pages: Vec<Vec<FakeItem>>,
    pub current_page: usize,
    pub main: ViewHandle,
    pub active: ViewHandle,
    pub open_views: HashMap<ViewHandle, String>,
    pub loads: Vec<String>,
    pub detail_opens: Vec<String>,
    pub closes: usize,
    pub forgets: usize,
    pub enumerate_calls: usize,
    /// Transient misses served before the item list appears.
    pub enumerate_failures: usize,
    /// Detail URLs whose tables fail to read.
    pub broken_details: HashSet<String>,
    /// Close calls from this 1-based ordinal onwards fail.
    pub fail_close_from: Option<usize>,
    /// Clicks on the next-page control report a stale element.
    pub stale_next_control: bool,
    pub next_clicks: usize,
    /// Raised when the given number of detail views has been opened.
    pub stop_after_opens: Option<(usize, StopSignal)>,
    close_attempts: usize,
    next_view: usize,
    elements: Vec<FakeElement>,
}

impl FakeState {
    pub fn new(pages: Vec<Vec<FakeItem>>) -> Self {
        let main = ViewHandle::new("main");
        Self {
            pages,
            current_page: 1,
            active: main.clone(),
            main,
            open_views: HashMap::new(),
            loads: Vec::new(),
            detail_opens: Vec::new(),
            closes: 0,
            forgets: 0,
            enumerate_calls: 0,
            enumerate_failures: 0,
            broken_details: HashSet::new(),
            fail_close_from: None,
            stale_next_control: false,
            next_clicks: 0,
            stop_after_opens: None,
            close_attempts: 0,
            next_view: 0,
            elements: Vec::new(),
        }
    }

    pub fn main_active(&self) -> bool {
        self.active == self.main
    }

    fn register(&mut self, element: FakeElement) -> ElementRef {
        self.elements.push(element);
        ElementRef(self.elements.len() - 1)
    }

    fn element(&self, element: ElementRef) -> SourceResult<FakeElement> {
        self.elements
            .get(element.0)
            .cloned()
            .ok_or(SourceError::StaleElement(element.0))
    }

    fn item(&self, page: usize, index: usize) -> SourceResult<&FakeItem> {
        self.pages
            .get(page - 1)
            .and_then(|items| items.get(index))
            .ok_or_else(|| SourceError::NotFound(format!("item {page}/{index}")))
    }

    fn detail_item(&self) -> SourceResult<&FakeItem> {
        let url = self
            .open_views
            .get(&self.active)
            .ok_or_else(|| SourceError::InvalidView(self.active.clone()))?;
        self.pages
            .iter()
            .flatten()
            .find(|item| &item.url == url)
            .ok_or_else(|| SourceError::NotFound(url.clone()))
    }
}

/// Deterministic in-memory listing. Tests keep the shared state to assert on.
#[derive(Debug, Clone)]
pub struct FakeSource {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeSource {
    pub fn new(state: FakeState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_pages(pages: Vec<Vec<FakeItem>>) -> Self {
        Self::new(FakeState::new(pages))
    }
}

fn css(locator: &Locator) -> &str {
    locator.expression()
}

#[async_trait(?Send)]
impl NavigableSource for FakeSource {
    async fn load(&mut self, target: &str) -> SourceResult<()> {
        let mut state = self.state.lock().unwrap();
        state.loads.push(target.to_string());
        state.current_page = 1;
        Ok(())
    }

    async fn find_one(
        &mut self,
        locator: &Locator,
        _timeout: Duration,
    ) -> SourceResult<ElementRef> {
        let mut state = self.state.lock().unwrap();
        if !state.main_active() {
            let item = state.detail_item()?.clone();
            if state.broken_details.contains(&item.url) {
                return Err(SourceError::Unexpected("detail markup changed".into()));
            }
            let group = match css(locator) {
                "#tech" => item.technical,
                "#info" => item.additional,
                _ => return Err(SourceError::NotFound(locator.to_string())),
            };
            if group.is_empty() {
                return Err(SourceError::Timeout(locator.to_string()));
            }
            return Ok(state.register(FakeElement::Table(group)));
        }
        match css(locator) {
            ".next" if state.current_page < state.pages.len() => {
                Ok(state.register(FakeElement::NextControl))
            }
            ".item" => {
                let page = state.current_page;
                if state.pages.get(page - 1).is_some_and(|items| !items.is_empty()) {
                    Ok(state.register(FakeElement::PageReady))
                } else {
                    Err(SourceError::Timeout(locator.to_string()))
                }
            }
            _ => Err(SourceError::Timeout(locator.to_string())),
        }
    }

    async fn find_all(
        &mut self,
        locator: &Locator,
        _timeout: Duration,
    ) -> SourceResult<Vec<ElementRef>> {
        let mut state = self.state.lock().unwrap();
        state.enumerate_calls += 1;
        if css(locator) != ".item" || !state.main_active() {
            return Err(SourceError::NotFound(locator.to_string()));
        }
        if state.enumerate_failures > 0 {
            state.enumerate_failures -= 1;
            return Err(SourceError::Timeout(locator.to_string()));
        }
        let page = state.current_page;
        let count = state.pages.get(page - 1).map_or(0, Vec::len);
        if count == 0 {
            return Err(SourceError::Timeout(locator.to_string()));
        }
        Ok((0..count)
            .map(|index| state.register(FakeElement::Item { page, index }))
            .collect())
    }

    async fn find_within(
        &mut self,
        parent: ElementRef,
        locator: &Locator,
    ) -> SourceResult<Option<ElementRef>> {
        let mut state = self.state.lock().unwrap();
        let parent = state.element(parent)?;
        let found = match parent {
            FakeElement::Item { page, index } => {
                let item = state.item(page, index)?.clone();
                match css(locator) {
                    ".sponsored" => item.sponsored.then_some(FakeElement::Marker),
                    ".title" => (!item.title.is_empty()).then(|| FakeElement::Title(item.title)),
                    "a.link" => Some(FakeElement::Link(item.url)),
                    ".price" => Some(FakeElement::Price(item.price)),
                    _ => None,
                }
            }
            FakeElement::Row(label, value) => match css(locator) {
                "th" => Some(FakeElement::Label(label)),
                "td" => Some(FakeElement::Value(value)),
                _ => None,
            },
            _ => None,
        };
        Ok(found.map(|element| state.register(element)))
    }

    async fn find_all_within(
        &mut self,
        parent: ElementRef,
        locator: &Locator,
    ) -> SourceResult<Vec<ElementRef>> {
        let mut state = self.state.lock().unwrap();
        let parent = state.element(parent)?;
        match (parent, css(locator)) {
            (FakeElement::Table(rows), "tr") => Ok(rows
                .into_iter()
                .map(|(label, value)| state.register(FakeElement::Row(label, value)))
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn text(&mut self, element: ElementRef) -> SourceResult<String> {
        let state = self.state.lock().unwrap();
        match state.element(element)? {
            FakeElement::Title(text)
            | FakeElement::Price(text)
            | FakeElement::Label(text)
            | FakeElement::Value(text) => Ok(format!(" {text} ")),
            _ => Ok(String::new()),
        }
    }

    async fn attribute(
        &mut self,
        element: ElementRef,
        name: &str,
    ) -> SourceResult<Option<String>> {
        let state = self.state.lock().unwrap();
        match (state.element(element)?, name) {
            (FakeElement::Link(url), "href") => Ok(Some(url)),
            _ => Ok(None),
        }
    }

    async fn click(&mut self, element: ElementRef) -> SourceResult<()> {
        let mut state = self.state.lock().unwrap();
        let handle = element;
        let element = state.element(element)?;
        if let FakeElement::NextControl = element {
            if !state.main_active() {
                return Err(SourceError::InvalidView(state.active.clone()));
            }
            state.next_clicks += 1;
            if state.stale_next_control {
                return Err(SourceError::StaleElement(handle.0));
            }
            state.current_page += 1;
        }
        Ok(())
    }

    async fn scroll_into_view(&mut self, element: ElementRef) -> SourceResult<()> {
        let state = self.state.lock().unwrap();
        state.element(element).map(|_| ())
    }

    async fn current_view_handle(&mut self) -> SourceResult<ViewHandle> {
        Ok(self.state.lock().unwrap().active.clone())
    }

    async fn open_view(&mut self, url: &str) -> SourceResult<ViewHandle> {
        let mut state = self.state.lock().unwrap();
        state.next_view += 1;
        let handle = ViewHandle::new(format!("detail-{}", state.next_view));
        state.open_views.insert(handle.clone(), url.to_string());
        state.detail_opens.push(url.to_string());
        if let Some((after, stop)) = &state.stop_after_opens {
            if state.detail_opens.len() >= *after {
                stop.raise();
            }
        }
        Ok(handle)
    }

    async fn close_view(&mut self, handle: &ViewHandle) -> SourceResult<()> {
        let mut state = self.state.lock().unwrap();
        state.close_attempts += 1;
        if state
            .fail_close_from
            .is_some_and(|from| state.close_attempts >= from)
        {
            return Err(SourceError::Unexpected("tab crashed".into()));
        }
        state
            .open_views
            .remove(handle)
            .ok_or_else(|| SourceError::InvalidView(handle.clone()))?;
        state.closes += 1;
        Ok(())
    }

    async fn switch_view(&mut self, handle: &ViewHandle) -> SourceResult<()> {
        let mut state = self.state.lock().unwrap();
        if handle != &state.main && !state.open_views.contains_key(handle) {
            return Err(SourceError::InvalidView(handle.clone()));
        }
        state.active = handle.clone();
        Ok(())
    }

    fn forget_elements(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.elements.clear();
        state.forgets += 1;
    }
}

/// `pages` pages of `per_page` items; item `sponsored_at` (0-based) of every
/// page is sponsored when given.
pub fn listing(
    pages: usize,
    per_page: usize,
    sponsored_at: Option<usize>,
) -> Vec<Vec<FakeItem>> {
    (1..=pages)
        .map(|page| {
            (0..per_page)
                .map(|index| {
                    if Some(index) == sponsored_at {
                        FakeItem::sponsored(page, index)
                    } else {
                        FakeItem::organic(page, index)
                    }
                })
                .collect()
        })
        .collect()
}

pub fn selectors() -> SelectorSection {
    SelectorSection {
        item: Locator::css(".item"),
        sponsored: vec![Locator::css(".sponsored")],
        title: Locator::css(".title"),
        link: Locator::css("a.link"),
        link_attribute: "href".to_string(),
        price: Locator::css(".price"),
        next_page: vec![Locator::css(".next-legacy"), Locator::css(".next")],
        page_ready: Locator::css(".item"),
        technical_table: Locator::css("#tech"),
        additional_table: Locator::css("#info"),
        table_row: Locator::css("tr"),
        row_label: Locator::css("th"),
        row_value: Locator::css("td"),
    }
}

pub fn profile() -> Arc<SourceProfile> {
    Arc::new(SourceProfile::new(selectors()))
}

pub fn collector_config(checkpoint_size: usize) -> CollectorConfig {
    CollectorConfig {
        collection: CollectionSection {
            checkpoint_size,
            ..CollectionSection::default()
        },
        pacing: PacingSection {
            seed: Some(11),
            ..PacingSection::immediate()
        },
        checkpoint_prefix: PREFIX.to_string(),
    }
}
