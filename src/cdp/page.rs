//! Page DOM and rasterizer backed by a live CDP session.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use image::RgbaImage;
use serde::Deserialize;
use serde_json::{json, Value};

use super::connection::CdpConnection;
use crate::capture::{RasterOptions, Rasterizer};
use crate::error::{NodeshotError, Result};
use crate::page::{ElementRef, NoticeKind, PageDom, SelectorMatch, NOTIFICATION_CLASS};

/// Prefix of the per-session binding the in-page shim reports DOM input through.
pub const BINDING: &str = "__nodeshotEmit";

const BRIDGE_PRESENT: &str = "Boolean(window[Symbol.for('nodeshot.bridge')])";

const BRIDGE_SCRIPT: &str = include_str!("bridge.js");

fn bridge_script() -> String {
    BRIDGE_SCRIPT.replace("__NOTIFICATION_CLASS__", NOTIFICATION_CLASS)
}

/// Wrap `body` so it runs with `bridge` bound to the installed shim.
fn with_bridge(body: &str) -> String {
    format!(
        "(() => {{ const bridge = window[Symbol.for('nodeshot.bridge')]; \
         if (!bridge) throw new Error('input bridge is not installed'); {} }})()",
        body
    )
}

/// JSON-encode a string for splicing into a script.
fn js_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

pub struct CdpPage {
    conn: Arc<CdpConnection>,
    /// Binding registered on this session; input is routed to it while we own the document.
    binding: String,
}

impl CdpPage {
    pub fn new(conn: Arc<CdpConnection>, binding: impl Into<String>) -> Self {
        Self {
            conn,
            binding: binding.into(),
        }
    }

    async fn bridge(&self, body: &str) -> Result<Value> {
        self.conn.evaluate(&with_bridge(body)).await
    }
}

#[derive(Deserialize)]
struct QueryReply {
    found: Option<u64>,
    invalid: Option<String>,
}

#[async_trait]
impl PageDom for CdpPage {
    async fn insert_stylesheet(&self, css: &str) -> Result<()> {
        let script = format!(
            "(() => {{ if (document.querySelector('style[data-nodeshot]')) return; \
             const style = document.createElement('style'); \
             style.dataset.nodeshot = ''; style.textContent = {}; \
             (document.head || document.documentElement).appendChild(style); }})()",
            js_string(css)
        );
        self.conn.evaluate(&script).await?;
        Ok(())
    }

    async fn install_input_bridge(&self) -> Result<()> {
        let installed = self.conn.evaluate(&bridge_script()).await?;
        if installed == Value::Bool(false) {
            tracing::debug!("Input bridge already present in the document");
        }
        Ok(())
    }

    async fn claim_session(&self, owner: &str) -> Result<bool> {
        let body = format!(
            "return bridge.claim({}, {});",
            js_string(owner),
            js_string(&self.binding)
        );
        Ok(self.bridge(&body).await?.as_bool().unwrap_or(false))
    }

    async fn release_session(&self, owner: &str) -> Result<()> {
        self.bridge(&format!("bridge.release({});", js_string(owner)))
            .await?;
        Ok(())
    }

    async fn query_selector(&self, selector: &str) -> Result<SelectorMatch> {
        let body = format!(
            "try {{ const el = document.querySelector({}); \
             return {{ found: el ? bridge.refOf(el) : null }}; }} \
             catch (e) {{ return {{ invalid: String(e && e.message || e) }}; }}",
            js_string(selector)
        );
        let reply: QueryReply = serde_json::from_value(self.bridge(&body).await?)?;
        Ok(match (reply.found, reply.invalid) {
            (_, Some(message)) => SelectorMatch::Invalid(message),
            (Some(id), None) => SelectorMatch::Found(ElementRef(id)),
            (None, None) => SelectorMatch::NotFound,
        })
    }

    async fn add_class(&self, element: ElementRef, class: &str) -> Result<()> {
        let body = format!("bridge.get({}).classList.add({});", element.0, js_string(class));
        self.bridge(&body).await?;
        Ok(())
    }

    async fn remove_class(&self, element: ElementRef, class: &str) -> Result<()> {
        let body = format!("bridge.get({}).classList.remove({});", element.0, js_string(class));
        self.bridge(&body).await?;
        Ok(())
    }

    async fn is_notification(&self, element: ElementRef) -> Result<bool> {
        let value = self.bridge(&format!("return bridge.isNotice({});", element.0)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn set_cursor(&self, cursor: Option<&str>) -> Result<()> {
        let script = format!(
            "(() => {{ if (document.body) document.body.style.cursor = {}; }})()",
            js_string(cursor.unwrap_or(""))
        );
        self.conn.evaluate(&script).await?;
        Ok(())
    }

    async fn attach_listeners(&self) -> Result<()> {
        self.bridge("bridge.attach();").await?;
        Ok(())
    }

    async fn detach_listeners(&self) -> Result<()> {
        self.bridge("bridge.detach();").await?;
        Ok(())
    }

    async fn show_notification(&self, message: &str, kind: NoticeKind) -> Result<()> {
        let body = format!(
            "bridge.notify({}, {});",
            js_string(message),
            js_string(kind.as_str())
        );
        self.bridge(&body).await?;
        Ok(())
    }

    async fn hide_notification(&self) -> Result<()> {
        self.bridge("bridge.hideNotice();").await?;
        Ok(())
    }

    async fn device_pixel_ratio(&self) -> Result<f64> {
        let value = self.conn.evaluate("window.devicePixelRatio").await?;
        value
            .as_f64()
            .ok_or_else(|| NodeshotError::JavaScriptError("devicePixelRatio is not a number".into()))
    }
}

#[derive(Debug, Deserialize)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    dpr: f64,
}

/// Rasterizes an element by clipping a compositor screenshot to its box.
pub struct CdpRasterizer {
    conn: Arc<CdpConnection>,
}

impl CdpRasterizer {
    pub fn new(conn: Arc<CdpConnection>) -> Self {
        Self { conn }
    }

    async fn element_rect(&self, element: ElementRef) -> Result<Rect> {
        let body = format!(
            "const r = bridge.get({}).getBoundingClientRect(); \
             return {{ x: r.left + window.scrollX, y: r.top + window.scrollY, \
             width: r.width, height: r.height, dpr: window.devicePixelRatio || 1 }};",
            element.0
        );
        let rect: Rect = serde_json::from_value(self.conn.evaluate(&with_bridge(&body)).await?)?;
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return Err(NodeshotError::EncodingFailure(format!(
                "{} has no visible area",
                element
            )));
        }
        Ok(rect)
    }

    async fn screenshot(&self, rect: &Rect, options: &RasterOptions) -> Result<RgbaImage> {
        let response = self
            .conn
            .call(
                "Page.captureScreenshot",
                json!({
                    "format": "png",
                    "fromSurface": true,
                    "captureBeyondViewport": true,
                    "clip": {
                        "x": rect.x,
                        "y": rect.y,
                        "width": rect.width,
                        "height": rect.height,
                        "scale": options.scale / rect.dpr,
                    },
                }),
            )
            .await?;

        let data = response
            .get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| NodeshotError::EncodingFailure("Screenshot returned no data".into()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| NodeshotError::EncodingFailure(e.to_string()))?;
        let image = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)
            .map_err(|e| NodeshotError::EncodingFailure(e.to_string()))?;
        Ok(image.to_rgba8())
    }
}

#[async_trait]
impl Rasterizer for CdpRasterizer {
    async fn rasterize(&self, element: ElementRef, options: &RasterOptions) -> Result<RgbaImage> {
        if self.conn.evaluate(BRIDGE_PRESENT).await? != Value::Bool(true) {
            return Err(NodeshotError::LibraryMissing);
        }
        let rect = self.element_rect(element).await?;

        let transparent = options.background.is_none();
        if transparent {
            self.conn
                .call(
                    "Emulation.setDefaultBackgroundColorOverride",
                    json!({ "color": { "r": 0, "g": 0, "b": 0, "a": 0 } }),
                )
                .await?;
        }
        self.conn.evaluate(&with_bridge("bridge.veil(true);")).await?;

        let result = self.screenshot(&rect, options).await;

        if let Err(e) = self.conn.evaluate(&with_bridge("bridge.veil(false);")).await {
            tracing::warn!("Failed to restore notification: {}", e);
        }
        if transparent {
            if let Err(e) = self
                .conn
                .call("Emulation.setDefaultBackgroundColorOverride", json!({}))
                .await
            {
                tracing::warn!("Failed to reset background override: {}", e);
            }
        }

        result
    }
}
