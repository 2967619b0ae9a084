//! The trigger controller: the user-facing entry point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::capture::CaptureOptions;
use crate::error::{NodeshotError, Result};
use crate::injector::Injector;
use crate::page::{PageHandle, SessionEvent};
use crate::protocol::Command;
use crate::status::{StatusKind, StatusSink};

/// Schemes that belong to the browser itself and cannot be instrumented.
const PRIVILEGED_SCHEMES: &[&str] = &[
    "chrome",
    "chrome-extension",
    "chrome-untrusted",
    "devtools",
    "edge",
    "brave",
    "view-source",
];

/// A browser tab as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// Access to the browser's tabs.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// The tab the user is looking at.
    async fn active_tab(&self) -> Result<TabInfo>;

    /// Open (or reuse) the page context of `tab`.
    async fn attach(&self, tab: &TabInfo) -> Result<PageHandle>;
}

/// Whether a page at `url` may be instrumented.
pub fn is_eligible_url(url: &str) -> bool {
    let scheme = match url.split_once(':') {
        Some((scheme, _)) => scheme.trim().to_ascii_lowercase(),
        None => return true,
    };
    !PRIVILEGED_SCHEMES.contains(&scheme.as_str())
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerTimings {
    /// Pause between injection and the first command.
    pub settle: Duration,
    /// How long the controller stays open after starting interactive selection.
    pub close_delay: Duration,
}

impl Default for ControllerTimings {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(100),
            close_delay: Duration::from_millis(800),
        }
    }
}

/// A command accepted by a page. Selection continues on the page side.
#[derive(Debug)]
pub struct Dispatched {
    pub tab: TabInfo,
    pub page: PageHandle,
    pub events: broadcast::Receiver<SessionEvent>,
}

/// Clears the in-flight flag when dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct TriggerController<H> {
    host: H,
    injector: Injector,
    status: Arc<dyn StatusSink>,
    timings: ControllerTimings,
    in_flight: AtomicBool,
}

impl<H: TabHost> TriggerController<H> {
    pub fn new(host: H, status: Arc<dyn StatusSink>) -> Self {
        Self {
            host,
            injector: Injector::new(),
            status,
            timings: ControllerTimings::default(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_timings(mut self, timings: ControllerTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Start pointer-driven selection in the active tab.
    pub async fn request_interactive_capture(&self, options: CaptureOptions) -> Result<Dispatched> {
        let dispatched = self
            .guarded(Command::StartSelection { options })
            .await?;

        self.status
            .show("Select the element to capture in the page", StatusKind::Info);
        tokio::time::sleep(self.timings.close_delay).await;
        self.status.close();
        Ok(dispatched)
    }

    /// Capture the first element matching `selector` in the active tab.
    pub async fn request_selector_capture(
        &self,
        selector: &str,
        options: CaptureOptions,
    ) -> Result<Dispatched> {
        let selector = selector.trim();
        if selector.is_empty() {
            self.status
                .show("Please enter a CSS selector", StatusKind::Error);
            return Err(NodeshotError::Other("Please enter a CSS selector".to_string()));
        }

        let dispatched = self
            .guarded(Command::CaptureBySelector {
                selector: selector.to_string(),
                options,
            })
            .await?;

        self.status.show("Looking up element...", StatusKind::Info);
        Ok(dispatched)
    }

    /// Run one dispatch, rejecting overlapping ones and reporting every failure.
    async fn guarded(&self, command: Command) -> Result<Dispatched> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let err = NodeshotError::SessionBusy;
            self.status.show(&err.to_string(), StatusKind::Error);
            return Err(err);
        }
        let _in_flight = InFlight(&self.in_flight);

        match self.dispatch(command).await {
            Ok(dispatched) => Ok(dispatched),
            Err(e) => {
                tracing::warn!("Dispatch failed: {}", e);
                self.status.show(&e.to_string(), StatusKind::Error);
                Err(e)
            }
        }
    }

    async fn dispatch(&self, command: Command) -> Result<Dispatched> {
        let tab = self.host.active_tab().await?;
        if !is_eligible_url(&tab.url) {
            return Err(NodeshotError::IneligiblePage(tab.url));
        }

        self.status.show("Loading...", StatusKind::Info);
        let page = self.host.attach(&tab).await?;
        self.injector.ensure_capabilities_loaded(&page).await?;
        tokio::time::sleep(self.timings.settle).await;

        // Subscribe before sending so no event of this session is missed.
        let events = page.subscribe();
        tracing::info!("Sending {} to {}", command.action(), tab.url);
        page.send_command(&command).await?.into_result()?;

        Ok(Dispatched { tab, page, events })
    }
}
