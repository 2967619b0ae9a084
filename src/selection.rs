//! Interactive element selection, modelled as an explicit state machine.
//!
//! ```text
//! Idle --start--> Selecting --click--> Capturing --(result)--> Idle
//!                 Selecting --escape--> Idle
//! Idle --selector lookup--> Capturing (or stays Idle when the lookup fails)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::capture::{CaptureOptions, CaptureRequest, CaptureTarget};
use crate::error::{NodeshotError, Result};
use crate::page::{
    ElementRef, NoticeKind, Notifier, PageDom, SelectorMatch, HIGHLIGHT_CLASS,
};

const GUIDANCE: &str = "Move the pointer to choose an element, click to capture, Esc to cancel";
const CANCELLED: &str = "Selection cancelled";
const FOUND: &str = "Element found, capturing...";
const CAPTURING: &str = "Capturing...";
const SAVED: &str = "Screenshot saved!";

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identifies one machine across every process attached to the same document.
fn owner_id() -> String {
    format!(
        "nodeshot-{}-{}",
        std::process::id(),
        NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState {
    Idle,
    Selecting,
    Capturing,
}

/// Delays used by the page-side flow.
#[derive(Debug, Clone, Copy)]
pub struct SelectionTimings {
    /// How long a selector match stays highlighted before capture starts.
    pub selector_highlight: Duration,
    /// Lifetime of result and error notices.
    pub notice: Duration,
    /// Lifetime of the "cancelled" notice.
    pub cancel_notice: Duration,
}

impl Default for SelectionTimings {
    fn default() -> Self {
        Self {
            selector_highlight: Duration::from_millis(300),
            notice: Duration::from_millis(2000),
            cancel_notice: Duration::from_millis(1500),
        }
    }
}

enum State {
    Idle,
    Selecting { options: CaptureOptions },
    Capturing,
}

/// The currently highlighted element. Holds at most one reference.
#[derive(Debug, Default)]
struct Highlight {
    current: Option<ElementRef>,
}

impl Highlight {
    async fn set(&mut self, dom: &dyn PageDom, element: ElementRef) -> Result<()> {
        if self.current == Some(element) {
            return Ok(());
        }
        self.clear(dom).await;
        dom.add_class(element, HIGHLIGHT_CLASS).await?;
        self.current = Some(element);
        Ok(())
    }

    async fn clear(&mut self, dom: &dyn PageDom) {
        if let Some(previous) = self.current.take() {
            if let Err(e) = dom.remove_class(previous, HIGHLIGHT_CLASS).await {
                tracing::debug!("Could not un-highlight {}: {}", previous, e);
            }
        }
    }
}

pub struct SelectionMachine {
    dom: Arc<dyn PageDom>,
    owner: String,
    /// Whether this machine holds the document's session claim.
    claimed: bool,
    state: State,
    highlight: Highlight,
    notifier: Notifier,
    timings: SelectionTimings,
}

impl SelectionMachine {
    pub fn new(dom: Arc<dyn PageDom>, timings: SelectionTimings) -> Self {
        Self {
            notifier: Notifier::new(Arc::clone(&dom)),
            dom,
            owner: owner_id(),
            claimed: false,
            state: State::Idle,
            highlight: Highlight::default(),
            timings,
        }
    }

    pub fn state(&self) -> SelectionState {
        match self.state {
            State::Idle => SelectionState::Idle,
            State::Selecting { .. } => SelectionState::Selecting,
            State::Capturing => SelectionState::Capturing,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    pub fn highlighted(&self) -> Option<ElementRef> {
        self.highlight.current
    }

    pub fn notice_deadline(&self) -> Option<Instant> {
        self.notifier.deadline()
    }

    pub async fn dismiss_notice(&mut self) {
        self.notifier.dismiss().await;
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Claim the document's selection session ahead of a command.
    ///
    /// Fails with `SessionBusy` while a page context attached elsewhere is
    /// running a session on the same document.
    pub async fn reserve(&mut self) -> Result<()> {
        if self.claimed {
            return Ok(());
        }
        if !self.dom.claim_session(&self.owner).await? {
            tracing::debug!("Session claim refused for {}", self.owner);
            return Err(NodeshotError::SessionBusy);
        }
        self.claimed = true;
        Ok(())
    }

    /// Give the session claim back, if held.
    pub async fn release(&mut self) {
        if !std::mem::replace(&mut self.claimed, false) {
            return;
        }
        if let Err(e) = self.dom.release_session(&self.owner).await {
            tracing::debug!("Failed to release session claim: {}", e);
        }
    }

    /// `Idle -> Selecting`.
    pub async fn start(&mut self, options: CaptureOptions) -> Result<()> {
        if !self.is_idle() {
            return Err(NodeshotError::SessionBusy);
        }
        self.reserve().await?;

        if let Err(e) = self.dom.set_cursor(Some("crosshair")).await {
            self.release().await;
            return Err(e);
        }
        if let Err(e) = self.dom.attach_listeners().await {
            let _ = self.dom.set_cursor(None).await;
            self.release().await;
            return Err(e);
        }

        self.state = State::Selecting { options };
        self.notifier.persistent(GUIDANCE, NoticeKind::Info).await;
        tracing::info!(
            "Selection started ({}, quality {})",
            options.format(),
            options.quality()
        );
        Ok(())
    }

    /// Pointer moved over `target` while selecting.
    pub async fn pointer_move(&mut self, target: ElementRef) -> Result<()> {
        if !matches!(self.state, State::Selecting { .. }) {
            return Ok(());
        }
        if self.dom.is_notification(target).await? {
            return Ok(());
        }
        self.highlight.set(self.dom.as_ref(), target).await
    }

    /// `Selecting -> Capturing`. Returns the request to run, if selection was active.
    pub async fn click(&mut self, target: ElementRef) -> Option<CaptureRequest> {
        let State::Selecting { options } = self.state else {
            return None;
        };

        self.stop_selecting().await;
        self.state = State::Capturing;
        tracing::info!("Selected {}", target);
        Some(CaptureRequest {
            target: CaptureTarget::Element(target),
            options,
        })
    }

    /// Handle a key press. Returns true when the selection was cancelled.
    pub async fn key(&mut self, key: &str) -> bool {
        if key != "Escape" || !matches!(self.state, State::Selecting { .. }) {
            return false;
        }

        self.stop_selecting().await;
        self.state = State::Idle;
        self.release().await;
        self.notifier
            .transient(CANCELLED, NoticeKind::Info, self.timings.cancel_notice)
            .await;
        tracing::info!("Selection cancelled");
        true
    }

    /// Resolve a selector to the element to capture.
    ///
    /// On success the match is highlighted briefly and the machine moves to
    /// `Capturing`. Lookup failures leave it `Idle`.
    pub async fn resolve_selector(&mut self, selector: &str) -> Result<ElementRef> {
        if !self.is_idle() {
            return Err(NodeshotError::SessionBusy);
        }
        self.reserve().await?;

        let lookup = match self.dom.query_selector(selector).await {
            Ok(SelectorMatch::Found(element)) => Ok(element),
            Ok(SelectorMatch::NotFound) => {
                Err(NodeshotError::SelectorNotFound(selector.to_string()))
            }
            Ok(SelectorMatch::Invalid(message)) => Err(NodeshotError::SelectorSyntaxError {
                selector: selector.to_string(),
                message,
            }),
            Err(e) => Err(e),
        };
        let element = match lookup {
            Ok(element) => element,
            Err(e) => {
                self.release().await;
                self.report_error(&e).await;
                return Err(e);
            }
        };

        if let Err(e) = self.highlight.set(self.dom.as_ref(), element).await {
            tracing::debug!("Could not highlight {}: {}", element, e);
        }
        self.notifier.persistent(FOUND, NoticeKind::Info).await;

        tokio::time::sleep(self.timings.selector_highlight).await;

        self.highlight.clear(self.dom.as_ref()).await;
        self.state = State::Capturing;
        Ok(element)
    }

    /// Announce that the pipeline is running.
    pub async fn begin_capture(&mut self) {
        self.state = State::Capturing;
        self.notifier.persistent(CAPTURING, NoticeKind::Info).await;
    }

    /// `Capturing -> Idle`, whatever the outcome.
    pub async fn finish_capture<T>(&mut self, outcome: &Result<T>) {
        self.state = State::Idle;
        self.release().await;
        match outcome {
            Ok(_) => {
                self.notifier
                    .transient(SAVED, NoticeKind::Success, self.timings.notice)
                    .await
            }
            Err(e) => self.report_error(e).await,
        }
    }

    async fn report_error(&mut self, error: &NodeshotError) {
        self.notifier
            .transient(&error.to_string(), NoticeKind::Error, self.timings.notice)
            .await;
    }

    async fn stop_selecting(&mut self) {
        if let Err(e) = self.dom.detach_listeners().await {
            tracing::warn!("Failed to detach selection listeners: {}", e);
        }
        if let Err(e) = self.dom.set_cursor(None).await {
            tracing::debug!("Failed to restore cursor: {}", e);
        }
        self.highlight.clear(self.dom.as_ref()).await;
    }
}
