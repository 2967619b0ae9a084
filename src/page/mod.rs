//! The page context: DOM surface, notification surface and the page-side runtime.

mod context;
mod notice;

pub use context::{InitToken, PageContext, PageHandle, Script, SessionEvent};
pub use notice::Notifier;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Class applied to the single highlighted element.
pub const HIGHLIGHT_CLASS: &str = "node-screenshot-highlight";

/// Class carried by the notification surface.
pub const NOTIFICATION_CLASS: &str = "node-screenshot-notification";

/// Styles for the highlight and notification classes.
pub const STYLESHEET: &str = include_str!("overlay.css");

/// Opaque reference to an element living in a page context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementRef(pub u64);

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

/// Visual tone of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::Info => "info",
            NoticeKind::Success => "success",
            NoticeKind::Error => "error",
        }
    }
}

/// Result of a `querySelector` lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorMatch {
    Found(ElementRef),
    NotFound,
    Invalid(String),
}

/// DOM input observed by the document-level listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PageInput {
    PointerMove { target: ElementRef },
    Click { target: ElementRef },
    Key { key: String },
}

/// Operations the page-side code performs on the document.
///
/// Implementations only touch the document; all selection state lives in
/// [`crate::selection::SelectionMachine`]. The session claim is the exception:
/// it is stored in the document and shared by every page context attached to it.
#[async_trait]
pub trait PageDom: Send + Sync {
    /// Insert the overlay stylesheet. Inserting twice must not duplicate it.
    async fn insert_stylesheet(&self, css: &str) -> Result<()>;

    /// Install the document-level input listeners (detached until `attach_listeners`).
    async fn install_input_bridge(&self) -> Result<()>;

    /// Take the document's single selection session for `owner`.
    ///
    /// Returns false while another page context holds it. Claiming again as
    /// the current owner succeeds.
    async fn claim_session(&self, owner: &str) -> Result<bool>;

    /// Give the session back. Does nothing unless `owner` holds it.
    async fn release_session(&self, owner: &str) -> Result<()>;

    async fn query_selector(&self, selector: &str) -> Result<SelectorMatch>;

    async fn add_class(&self, element: ElementRef, class: &str) -> Result<()>;

    async fn remove_class(&self, element: ElementRef, class: &str) -> Result<()>;

    /// True when `element` is the notification surface or one of its descendants.
    async fn is_notification(&self, element: ElementRef) -> Result<bool>;

    /// `None` restores the page's own cursor.
    async fn set_cursor(&self, cursor: Option<&str>) -> Result<()>;

    async fn attach_listeners(&self) -> Result<()>;

    async fn detach_listeners(&self) -> Result<()>;

    async fn show_notification(&self, message: &str, kind: NoticeKind) -> Result<()>;

    async fn hide_notification(&self) -> Result<()>;

    async fn device_pixel_ratio(&self) -> Result<f64>;
}
