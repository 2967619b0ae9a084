use std::time::Duration;

use serde::Deserialize;

use crate::controller::TabInfo;
use crate::error::{NodeshotError, Result};

/// Target info from the CDP /json/list endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type")]
    pub target_type: String,
    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    pub fn tab(&self) -> TabInfo {
        TabInfo {
            id: self.id.clone(),
            title: self.title.clone(),
            url: self.url.clone(),
        }
    }
}

/// HTTP endpoint of a browser's remote debugging server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdpEndpoint {
    base_url: String,
}

impl CdpEndpoint {
    pub fn from_port(port: u16) -> Self {
        Self {
            base_url: format!("http://127.0.0.1:{}", port),
        }
    }

    /// Accepts a bare port (`9222`) or an HTTP URL (`http://host:9222`).
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if let Ok(port) = value.parse::<u16>() {
            return Ok(Self::from_port(port));
        }
        if value.starts_with("http://") || value.starts_with("https://") {
            return Ok(Self {
                base_url: value.trim_end_matches('/').to_string(),
            });
        }
        Err(NodeshotError::ConfigError(format!(
            "Invalid CDP endpoint '{}': expected a port or an http(s) URL",
            value
        )))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    }

    /// Page targets in the browser's order; the first one is the active tab.
    pub async fn list_targets(&self) -> Result<Vec<TargetInfo>> {
        let url = format!("{}/json/list", self.base_url);
        tracing::debug!("GET {}", url);

        let response = Self::client().get(&url).send().await.map_err(|e| {
            NodeshotError::CdpConnectionFailed(format!(
                "Failed to reach {}: {}",
                self.base_url, e
            ))
        })?;

        let targets: Vec<TargetInfo> = response.json().await.map_err(|e| {
            NodeshotError::CdpConnectionFailed(format!("Failed to parse targets: {}", e))
        })?;

        // Only real pages, not workers or extension backgrounds
        Ok(targets
            .into_iter()
            .filter(|t| t.target_type == "page")
            .collect())
    }

    pub async fn find_target(&self, id: &str) -> Result<TargetInfo> {
        self.list_targets()
            .await?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| NodeshotError::CdpConnectionFailed(format!("Tab {} is gone", id)))
    }
}
