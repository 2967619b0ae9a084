use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::{NoticeKind, PageDom};

/// The single notification surface of a page context.
///
/// Transient notices record a dismissal deadline that the page loop honors;
/// any newer notice replaces the pending deadline.
pub struct Notifier {
    dom: Arc<dyn PageDom>,
    dismiss_at: Option<Instant>,
}

impl Notifier {
    pub fn new(dom: Arc<dyn PageDom>) -> Self {
        Self {
            dom,
            dismiss_at: None,
        }
    }

    /// Show a notice that stays until replaced.
    pub async fn persistent(&mut self, message: &str, kind: NoticeKind) {
        self.dismiss_at = None;
        self.show(message, kind).await;
    }

    /// Show a notice that hides itself after `ttl`.
    pub async fn transient(&mut self, message: &str, kind: NoticeKind, ttl: Duration) {
        self.dismiss_at = Some(Instant::now() + ttl);
        self.show(message, kind).await;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.dismiss_at
    }

    pub async fn dismiss(&mut self) {
        self.dismiss_at = None;
        if let Err(e) = self.dom.hide_notification().await {
            tracing::warn!("Failed to hide notification: {}", e);
        }
    }

    async fn show(&self, message: &str, kind: NoticeKind) {
        tracing::debug!("Notice [{}]: {}", kind.as_str(), message);
        if let Err(e) = self.dom.show_notification(message, kind).await {
            tracing::warn!("Failed to show notification: {}", e);
        }
    }
}
