//! In-memory stand-ins for the browser, used by unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};

use crate::capture::{RasterOptions, Rasterizer};
use crate::controller::{TabHost, TabInfo};
use crate::error::{NodeshotError, Result};
use crate::page::{
    ElementRef, NoticeKind, PageDom, PageHandle, SelectorMatch, HIGHLIGHT_CLASS,
    NOTIFICATION_CLASS,
};
use crate::relay::{SaveHost, SavedFile};
use crate::status::{StatusKind, StatusSink};

struct Node {
    tag: String,
    id: Option<String>,
    classes: BTreeSet<String>,
    parent: Option<ElementRef>,
}

struct DomState {
    nodes: BTreeMap<ElementRef, Node>,
    next_id: u64,
    notification: Option<ElementRef>,
    notices: Vec<(String, NoticeKind)>,
    notice_visible: bool,
    cursor: Option<String>,
    listeners_attached: bool,
    attach_calls: usize,
    bridge_installs: usize,
    session_owner: Option<String>,
    stylesheets: Vec<String>,
    stylesheet_error: Option<String>,
    highlight_history: Vec<ElementRef>,
    device_pixel_ratio: f64,
}

/// A tiny document supporting `#id`, `.class` and tag selectors.
pub struct MemoryDom {
    state: Mutex<DomState>,
}

impl MemoryDom {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DomState {
                nodes: BTreeMap::new(),
                next_id: 1,
                notification: None,
                notices: Vec::new(),
                notice_visible: false,
                cursor: None,
                listeners_attached: false,
                attach_calls: 0,
                bridge_installs: 0,
                session_owner: None,
                stylesheets: Vec::new(),
                stylesheet_error: None,
                highlight_history: Vec::new(),
                device_pixel_ratio: 1.0,
            }),
        }
    }

    pub fn add_element(&self, tag: &str, id: Option<&str>, parent: Option<ElementRef>) -> ElementRef {
        let mut s = self.state.lock().unwrap();
        insert_node(&mut s, tag, id, parent)
    }

    pub fn set_device_pixel_ratio(&self, ratio: f64) {
        self.state.lock().unwrap().device_pixel_ratio = ratio;
    }

    pub fn fail_stylesheet(&self, message: &str) {
        self.state.lock().unwrap().stylesheet_error = Some(message.to_string());
    }

    pub fn highlighted(&self) -> Vec<ElementRef> {
        let s = self.state.lock().unwrap();
        s.nodes
            .iter()
            .filter(|(_, node)| node.classes.contains(HIGHLIGHT_CLASS))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn highlight_history(&self) -> Vec<ElementRef> {
        self.state.lock().unwrap().highlight_history.clone()
    }

    pub fn notification_element(&self) -> Option<ElementRef> {
        self.state.lock().unwrap().notification
    }

    pub fn last_notice(&self) -> Option<(String, NoticeKind)> {
        self.state.lock().unwrap().notices.last().cloned()
    }

    pub fn notice_visible(&self) -> bool {
        self.state.lock().unwrap().notice_visible
    }

    pub fn cursor(&self) -> Option<String> {
        self.state.lock().unwrap().cursor.clone()
    }

    pub fn listeners_attached(&self) -> bool {
        self.state.lock().unwrap().listeners_attached
    }

    pub fn attach_calls(&self) -> usize {
        self.state.lock().unwrap().attach_calls
    }

    pub fn bridge_installs(&self) -> usize {
        self.state.lock().unwrap().bridge_installs
    }

    pub fn stylesheets(&self) -> Vec<String> {
        self.state.lock().unwrap().stylesheets.clone()
    }

    pub fn session_owner(&self) -> Option<String> {
        self.state.lock().unwrap().session_owner.clone()
    }
}

fn insert_node(s: &mut DomState, tag: &str, id: Option<&str>, parent: Option<ElementRef>) -> ElementRef {
    let element = ElementRef(s.next_id);
    s.next_id += 1;
    s.nodes.insert(
        element,
        Node {
            tag: tag.to_string(),
            id: id.map(str::to_string),
            classes: BTreeSet::new(),
            parent,
        },
    );
    element
}

fn is_valid_selector(selector: &str) -> bool {
    let s = selector.trim();
    if s.is_empty() || s.contains("##") || s.contains("..") {
        return false;
    }
    let combinator = |c: char| matches!(c, '>' | '+' | '~' | ',');
    if s.starts_with(combinator) || s.ends_with(combinator) {
        return false;
    }
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0
}

fn missing(element: ElementRef) -> NodeshotError {
    NodeshotError::JavaScriptError(format!("{} is not in the document", element))
}

#[async_trait]
impl PageDom for MemoryDom {
    async fn insert_stylesheet(&self, css: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if let Some(message) = &s.stylesheet_error {
            return Err(NodeshotError::JavaScriptError(message.clone()));
        }
        if !s.stylesheets.iter().any(|existing| existing == css) {
            s.stylesheets.push(css.to_string());
        }
        Ok(())
    }

    /// The bridge lives in the document, so only the first install counts.
    async fn install_input_bridge(&self) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if s.bridge_installs == 0 {
            s.bridge_installs = 1;
        }
        Ok(())
    }

    async fn claim_session(&self, owner: &str) -> Result<bool> {
        let mut s = self.state.lock().unwrap();
        match s.session_owner.as_deref() {
            Some(current) if current != owner => Ok(false),
            _ => {
                s.session_owner = Some(owner.to_string());
                Ok(true)
            }
        }
    }

    async fn release_session(&self, owner: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if s.session_owner.as_deref() == Some(owner) {
            s.session_owner = None;
        }
        Ok(())
    }

    async fn query_selector(&self, selector: &str) -> Result<SelectorMatch> {
        if !is_valid_selector(selector) {
            return Ok(SelectorMatch::Invalid(format!(
                "'{}' is not a valid selector",
                selector
            )));
        }
        let s = self.state.lock().unwrap();
        let selector = selector.trim();
        let found = s.nodes.iter().find(|(_, node)| {
            if let Some(id) = selector.strip_prefix('#') {
                node.id.as_deref() == Some(id)
            } else if let Some(class) = selector.strip_prefix('.') {
                node.classes.contains(class)
            } else {
                node.tag.eq_ignore_ascii_case(selector)
            }
        });
        Ok(match found {
            Some((element, _)) => SelectorMatch::Found(*element),
            None => SelectorMatch::NotFound,
        })
    }

    async fn add_class(&self, element: ElementRef, class: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let node = s.nodes.get_mut(&element).ok_or_else(|| missing(element))?;
        node.classes.insert(class.to_string());
        if class == HIGHLIGHT_CLASS {
            s.highlight_history.push(element);
        }
        Ok(())
    }

    async fn remove_class(&self, element: ElementRef, class: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let node = s.nodes.get_mut(&element).ok_or_else(|| missing(element))?;
        node.classes.remove(class);
        Ok(())
    }

    async fn is_notification(&self, element: ElementRef) -> Result<bool> {
        let s = self.state.lock().unwrap();
        let Some(notification) = s.notification else {
            return Ok(false);
        };
        let mut current = Some(element);
        while let Some(id) = current {
            if id == notification {
                return Ok(true);
            }
            current = s.nodes.get(&id).ok_or_else(|| missing(id))?.parent;
        }
        Ok(false)
    }

    async fn set_cursor(&self, cursor: Option<&str>) -> Result<()> {
        self.state.lock().unwrap().cursor = cursor.map(str::to_string);
        Ok(())
    }

    async fn attach_listeners(&self) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.listeners_attached = true;
        s.attach_calls += 1;
        Ok(())
    }

    async fn detach_listeners(&self) -> Result<()> {
        self.state.lock().unwrap().listeners_attached = false;
        Ok(())
    }

    async fn show_notification(&self, message: &str, kind: NoticeKind) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let element = match s.notification {
            Some(element) => element,
            None => {
                let element = insert_node(&mut s, "div", None, None);
                s.notification = Some(element);
                element
            }
        };
        if let Some(node) = s.nodes.get_mut(&element) {
            node.classes = [NOTIFICATION_CLASS, kind.as_str()]
                .into_iter()
                .map(str::to_string)
                .collect();
        }
        s.notices.push((message.to_string(), kind));
        s.notice_visible = true;
        Ok(())
    }

    async fn hide_notification(&self) -> Result<()> {
        self.state.lock().unwrap().notice_visible = false;
        Ok(())
    }

    async fn device_pixel_ratio(&self) -> Result<f64> {
        Ok(self.state.lock().unwrap().device_pixel_ratio)
    }
}

/// Rasterizer that records its calls and paints a small translucent surface.
pub struct RecordingRasterizer {
    calls: Mutex<Vec<(ElementRef, RasterOptions)>>,
    failure: Option<String>,
}

impl RecordingRasterizer {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failure: Some(message.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<(ElementRef, RasterOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Rasterizer for RecordingRasterizer {
    async fn rasterize(&self, element: ElementRef, options: &RasterOptions) -> Result<RgbaImage> {
        self.calls.lock().unwrap().push((element, *options));
        if let Some(message) = &self.failure {
            return Err(NodeshotError::JavaScriptError(message.clone()));
        }
        Ok(RgbaImage::from_fn(4, 3, |x, _| {
            Rgba([200, 40, 40, if x == 0 { 0 } else { 160 }])
        }))
    }
}

/// Save host that keeps files in memory.
pub struct MemorySaveHost {
    saves: Mutex<Vec<(String, Vec<u8>)>>,
    attempts: AtomicUsize,
    failure: Option<String>,
}

impl MemorySaveHost {
    pub fn new() -> Self {
        Self {
            saves: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            failure: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn saves(&self) -> Vec<(String, Vec<u8>)> {
        self.saves.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SaveHost for MemorySaveHost {
    async fn save(&self, bytes: &[u8], filename: &str) -> Result<SavedFile> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(NodeshotError::DownloadFailure(message.clone()));
        }
        let mut saves = self.saves.lock().unwrap();
        saves.push((filename.to_string(), bytes.to_vec()));
        Ok(SavedFile {
            id: saves.len() as u64,
            path: PathBuf::from("/downloads").join(filename),
        })
    }
}

/// Status sink that remembers what was shown.
pub struct RecordingStatus {
    lines: Mutex<Vec<(String, StatusKind)>>,
    closed: AtomicBool,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn last(&self) -> Option<(String, StatusKind)> {
        self.lines.lock().unwrap().last().cloned()
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl StatusSink for RecordingStatus {
    fn show(&self, message: &str, kind: StatusKind) {
        self.lines.lock().unwrap().push((message.to_string(), kind));
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A browser with exactly one tab.
pub struct MemoryTabHost {
    tab: TabInfo,
    page: PageHandle,
    attach_calls: AtomicUsize,
}

impl MemoryTabHost {
    pub fn new(url: &str, page: PageHandle) -> Self {
        Self {
            tab: TabInfo {
                id: page.id().to_string(),
                title: "Test page".to_string(),
                url: url.to_string(),
            },
            page,
            attach_calls: AtomicUsize::new(0),
        }
    }

    pub fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TabHost for MemoryTabHost {
    async fn active_tab(&self) -> Result<TabInfo> {
        Ok(self.tab.clone())
    }

    async fn attach(&self, _tab: &TabInfo) -> Result<PageHandle> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.page.clone())
    }
}
