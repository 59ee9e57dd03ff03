use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::ChromiumSection;

use super::error::{SourceError, SourceResult};
use super::source::{ElementRef, Locator, NavigableSource, ViewHandle};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub headless: Option<bool>,
}

/// Starts Chromium with the `[chromium]` section and hands back a ready
/// [`ChromiumSource`] positioned on a blank main tab.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: ChromiumSection,
}

impl ChromiumLauncher {
    pub fn new(config: ChromiumSection) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChromiumSection {
        &self.config
    }

    pub async fn launch_with_overrides(
        &self,
        overrides: LaunchOverrides,
    ) -> SourceResult<ChromiumSource> {
        let headless = overrides.headless.unwrap_or(self.config.headless);
        let chromium_config = self.build_chromium_config(headless)?;
        info!(
            headless,
            width = self.config.window[0],
            height = self.config.window[1],
            "launching chromium"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| SourceError::Launch(err.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let mut source = ChromiumSource {
            browser,
            handler_task: Some(handler_task),
            user_agent: self.config.user_agent.clone(),
            views: HashMap::new(),
            active: ViewHandle::new(""),
            elements: Vec::new(),
        };
        let main = source.new_view("about:blank").await?;
        source.active = main;
        Ok(source)
    }

    fn build_chromium_config(&self, headless: bool) -> SourceResult<ChromiumConfig> {
        let [width, height] = self.config.window;
        let mut builder = ChromiumConfig::builder().window_size(width, height);
        if let Some(path) = &self.config.executable_path {
            builder = builder.chrome_executable(path);
        }
        if !headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.config.request_timeout_secs {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = Vec::new();
        if self.config.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        if let Some(agent) = &self.config.user_agent {
            args.push(format!("--user-agent={agent}"));
        }
        args.push("--no-first-run".to_string());
        args.push("--disable-features=AutomationControlled".to_string());
        args.extend(self.config.extra_args.iter().cloned());
        builder = builder.args(args);

        builder.build().map_err(SourceError::Configuration)
    }
}

/// [`NavigableSource`] over Chromium tabs. Each view is a tab; element
/// references index a registry that [`NavigableSource::forget_elements`]
/// clears. XPath locators are only evaluated at page scope.
#[derive(Debug)]
pub struct ChromiumSource {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    user_agent: Option<String>,
    views: HashMap<ViewHandle, Page>,
    active: ViewHandle,
    elements: Vec<Element>,
}

impl ChromiumSource {
    async fn new_view(&mut self, url: &str) -> SourceResult<ViewHandle> {
        let page = self.browser.new_page(CreateTargetParams::new(url)).await?;
        if let Some(agent) = &self.user_agent {
            let params = SetUserAgentOverrideParams::builder()
                .user_agent(agent.clone())
                .build()
                .map_err(SourceError::Configuration)?;
            page.set_user_agent(params).await?;
        }
        let handle = ViewHandle::new(page.target_id().inner().clone());
        self.views.insert(handle.clone(), page);
        Ok(handle)
    }

    fn page(&self) -> SourceResult<&Page> {
        self.views
            .get(&self.active)
            .ok_or_else(|| SourceError::InvalidView(self.active.clone()))
    }

    fn element(&self, element: ElementRef) -> SourceResult<&Element> {
        self.elements
            .get(element.0)
            .ok_or(SourceError::StaleElement(element.0))
    }

    fn register(&mut self, found: Vec<Element>) -> Vec<ElementRef> {
        found
            .into_iter()
            .map(|element| {
                self.elements.push(element);
                ElementRef(self.elements.len() - 1)
            })
            .collect()
    }

    async fn query_page(&self, locator: &Locator) -> SourceResult<Vec<Element>> {
        let page = self.page()?;
        let found = match locator {
            Locator::Css(selector) => page.find_elements(selector.as_str()).await?,
            Locator::XPath(expression) => page.find_xpaths(expression.as_str()).await?,
        };
        Ok(found)
    }

    /// Polls until `locator` matches at least once or `timeout` elapses.
    async fn poll(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> SourceResult<Vec<ElementRef>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.query_page(locator).await {
                Ok(found) if !found.is_empty() => return Ok(self.register(found)),
                Ok(_) => {}
                Err(SourceError::Cdp(err)) => {
                    debug!(locator = %locator, error = %err, "lookup failed, polling again");
                }
                Err(err) => return Err(err),
            }
            if Instant::now() >= deadline {
                return Err(SourceError::Timeout(locator.to_string()));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn query_within(
        &self,
        parent: ElementRef,
        locator: &Locator,
    ) -> SourceResult<Vec<Element>> {
        let Locator::Css(selector) = locator else {
            return Err(SourceError::Configuration(format!(
                "scoped lookups support css only, got {locator}"
            )));
        };
        let parent = self.element(parent)?;
        Ok(parent.find_elements(selector.as_str()).await?)
    }
}

#[async_trait(?Send)]
impl NavigableSource for ChromiumSource {
    async fn load(&mut self, target: &str) -> SourceResult<()> {
        let params = NavigateParams::builder()
            .url(target)
            .build()
            .map_err(SourceError::Configuration)?;
        let page = self.page()?;
        page.goto(params).await?;
        page.wait_for_navigation().await?;
        Ok(())
    }

    async fn find_one(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> SourceResult<ElementRef> {
        let found = self.poll(locator, timeout).await?;
        found
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::NotFound(locator.to_string()))
    }

    async fn find_all(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> SourceResult<Vec<ElementRef>> {
        self.poll(locator, timeout).await
    }

    async fn find_within(
        &mut self,
        parent: ElementRef,
        locator: &Locator,
    ) -> SourceResult<Option<ElementRef>> {
        let mut found = self.query_within(parent, locator).await?;
        if found.is_empty() {
            return Ok(None);
        }
        found.truncate(1);
        Ok(self.register(found).into_iter().next())
    }

    async fn find_all_within(
        &mut self,
        parent: ElementRef,
        locator: &Locator,
    ) -> SourceResult<Vec<ElementRef>> {
        let found = self.query_within(parent, locator).await?;
        Ok(self.register(found))
    }

    async fn text(&mut self, element: ElementRef) -> SourceResult<String> {
        let text = self.element(element)?.inner_text().await?;
        Ok(text.unwrap_or_default())
    }

    async fn attribute(
        &mut self,
        element: ElementRef,
        name: &str,
    ) -> SourceResult<Option<String>> {
        Ok(self.element(element)?.attribute(name).await?)
    }

    async fn click(&mut self, element: ElementRef) -> SourceResult<()> {
        self.element(element)?.click().await?;
        Ok(())
    }

    async fn scroll_into_view(&mut self, element: ElementRef) -> SourceResult<()> {
        self.element(element)?.scroll_into_view().await?;
        Ok(())
    }

    async fn current_view_handle(&mut self) -> SourceResult<ViewHandle> {
        Ok(self.active.clone())
    }

    async fn open_view(&mut self, url: &str) -> SourceResult<ViewHandle> {
        let handle = self.new_view(url).await?;
        if let Some(page) = self.views.get(&handle) {
            page.wait_for_navigation().await?;
        }
        debug!(view = %handle, url, "tab opened");
        Ok(handle)
    }

    async fn close_view(&mut self, handle: &ViewHandle) -> SourceResult<()> {
        let page = self
            .views
            .remove(handle)
            .ok_or_else(|| SourceError::InvalidView(handle.clone()))?;
        page.close().await?;
        debug!(view = %handle, "tab closed");
        Ok(())
    }

    async fn switch_view(&mut self, handle: &ViewHandle) -> SourceResult<()> {
        let page = self
            .views
            .get(handle)
            .ok_or_else(|| SourceError::InvalidView(handle.clone()))?;
        page.bring_to_front().await?;
        self.active = handle.clone();
        Ok(())
    }

    fn forget_elements(&mut self) {
        self.elements.clear();
    }

    async fn shutdown(&mut self) -> SourceResult<()> {
        info!(views = self.views.len(), "shutting down chromium");
        self.elements.clear();
        self.views.clear();
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for ChromiumSource {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("ChromiumSource dropped without explicit shutdown");
            }
        }
    }
}
