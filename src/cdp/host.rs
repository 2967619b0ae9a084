use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use super::connection::{CdpConnection, CdpEvent};
use super::discovery::CdpEndpoint;
use super::page::{CdpPage, CdpRasterizer, BINDING};
use crate::controller::{TabHost, TabInfo};
use crate::error::{NodeshotError, Result};
use crate::page::{PageContext, PageHandle, PageInput};
use crate::relay::RelayHandle;
use crate::selection::SelectionTimings;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Binding name unique to one CDP session, across processes sharing a browser.
fn session_binding() -> String {
    format!(
        "{}_{}_{}",
        BINDING,
        std::process::id(),
        NEXT_SESSION.fetch_add(1, Ordering::Relaxed)
    )
}

/// A tab this host is attached to.
struct Attached {
    page: PageHandle,
    conn: Arc<CdpConnection>,
}

/// A Chromium instance reached through its remote debugging port.
///
/// Each tab is attached at most once per host; later `attach` calls reuse the
/// same page context until its WebSocket closes.
pub struct CdpHost {
    endpoint: CdpEndpoint,
    relay: RelayHandle,
    timings: SelectionTimings,
    attached: Mutex<HashMap<String, Attached>>,
}

impl CdpHost {
    pub fn new(endpoint: CdpEndpoint, relay: RelayHandle) -> Self {
        Self {
            endpoint,
            relay,
            timings: SelectionTimings::default(),
            attached: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timings(mut self, timings: SelectionTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn endpoint(&self) -> &CdpEndpoint {
        &self.endpoint
    }

    /// All page tabs, active first.
    pub async fn tabs(&self) -> Result<Vec<TabInfo>> {
        Ok(self
            .endpoint
            .list_targets()
            .await?
            .iter()
            .map(|t| t.tab())
            .collect())
    }
}

#[async_trait]
impl TabHost for CdpHost {
    async fn active_tab(&self) -> Result<TabInfo> {
        self.tabs().await?.into_iter().next().ok_or_else(|| {
            NodeshotError::CdpConnectionFailed(format!(
                "No open tabs at {}",
                self.endpoint.base_url()
            ))
        })
    }

    async fn attach(&self, tab: &TabInfo) -> Result<PageHandle> {
        let mut attached = self.attached.lock().await;
        if let Some(existing) = attached.get(&tab.id) {
            if !existing.conn.is_closed() {
                tracing::debug!("Reusing page context for tab {}", tab.id);
                return Ok(existing.page.clone());
            }
        }

        let target = self.endpoint.find_target(&tab.id).await?;
        let ws_url = target.web_socket_debugger_url.ok_or_else(|| {
            NodeshotError::CdpConnectionFailed(format!(
                "Tab {} has no WebSocket URL (another debugger may be attached)",
                tab.id
            ))
        })?;

        let conn = Arc::new(CdpConnection::connect(&ws_url).await?);
        let events = conn
            .take_events()
            .ok_or_else(|| NodeshotError::Other("CDP event stream already taken".to_string()))?;
        let binding = session_binding();
        conn.call("Runtime.enable", json!({})).await?;
        conn.call("Runtime.addBinding", json!({ "name": binding })).await?;

        let dom = Arc::new(CdpPage::new(conn.clone(), binding.clone()));
        let page = PageContext::new(dom, self.relay.clone())
            .with_rasterizer(Arc::new(CdpRasterizer::new(conn.clone())))
            .with_timings(self.timings)
            .spawn(tab.id.clone());

        tokio::spawn(pump_input(events, binding, page.clone()));
        tracing::info!("Attached to tab {} ({})", tab.id, tab.url);
        attached.insert(
            tab.id.clone(),
            Attached {
                page: page.clone(),
                conn,
            },
        );
        Ok(page)
    }
}

/// Forward DOM input reported through the binding into the page context.
async fn pump_input(
    mut events: mpsc::UnboundedReceiver<CdpEvent>,
    binding: String,
    page: PageHandle,
) {
    while let Some(event) = events.recv().await {
        let input = match input_from_event(&event, &binding) {
            Some(Ok(input)) => input,
            Some(Err(e)) => {
                tracing::warn!("Malformed input from page: {}", e);
                continue;
            }
            None => continue,
        };
        if page.dispatch_input(input).is_err() {
            break;
        }
    }
    tracing::debug!("Input pump for page {} stopped", page.id());
}

/// Map a CDP event to page input. Navigation counts as Escape so an open
/// selection never outlives its document.
fn input_from_event(event: &CdpEvent, binding: &str) -> Option<serde_json::Result<PageInput>> {
    match event.method.as_str() {
        "Runtime.bindingCalled" => {
            if event.params.get("name").and_then(|n| n.as_str()) != Some(binding) {
                return None;
            }
            let payload = event.params.get("payload").and_then(|p| p.as_str())?;
            Some(serde_json::from_str(payload))
        }
        "Runtime.executionContextsCleared" => Some(Ok(PageInput::Key {
            key: "Escape".to_string(),
        })),
        _ => None,
    }
}
