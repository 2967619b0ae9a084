//! Messages exchanged between the controller, page and privileged contexts.
//!
//! Every message is a JSON object tagged by `action`; each request gets
//! exactly one response.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::capture::CaptureOptions;
use crate::error::{NodeshotError, Result};

/// Error string a page uses to refuse a command while a session is running.
pub const BUSY: &str = "busy";

/// Controller -> page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    StartSelection {
        #[serde(default)]
        options: CaptureOptions,
    },
    CaptureBySelector {
        selector: String,
        #[serde(default)]
        options: CaptureOptions,
    },
}

impl Command {
    pub fn action(&self) -> &'static str {
        match self {
            Command::StartSelection { .. } => "startSelection",
            Command::CaptureBySelector { .. } => "captureBySelector",
        }
    }
}

/// Page -> controller acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn busy() -> Self {
        Self::failed(BUSY)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<()> {
        if self.success {
            return Ok(());
        }
        match self.error.as_deref() {
            Some(BUSY) => Err(NodeshotError::SessionBusy),
            Some(other) => Err(NodeshotError::CommunicationFailure(other.to_string())),
            None => Err(NodeshotError::CommunicationFailure(
                "Page rejected the command".to_string(),
            )),
        }
    }
}

/// Page -> privileged context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RelayRequest {
    DownloadImage {
        #[serde(rename = "dataUrl")]
        data_url: String,
        filename: String,
    },
}

/// Result of the single save attempt for one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Saved { id: u64, path: Option<String> },
    Failed { error: String },
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Saved { .. })
    }
}

/// Wire form: `{ success, downloadId?, path?, error? }`.
#[derive(Debug, Serialize, Deserialize)]
struct DownloadReply {
    success: bool,
    #[serde(rename = "downloadId", default, skip_serializing_if = "Option::is_none")]
    download_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Serialize for DownloadOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let reply = match self {
            DownloadOutcome::Saved { id, path } => DownloadReply {
                success: true,
                download_id: Some(*id),
                path: path.clone(),
                error: None,
            },
            DownloadOutcome::Failed { error } => DownloadReply {
                success: false,
                download_id: None,
                path: None,
                error: Some(error.clone()),
            },
        };
        reply.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DownloadOutcome {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let reply = DownloadReply::deserialize(deserializer)?;
        match (reply.success, reply.download_id) {
            (true, Some(id)) => Ok(DownloadOutcome::Saved {
                id,
                path: reply.path,
            }),
            (true, None) => Err(serde::de::Error::missing_field("downloadId")),
            (false, _) => Ok(DownloadOutcome::Failed {
                error: reply.error.unwrap_or_else(|| "Unknown error".to_string()),
            }),
        }
    }
}

/// Split a `data:<mime>;base64,<payload>` URL into its MIME type and bytes.
pub fn parse_data_url(url: &str) -> std::result::Result<(String, Vec<u8>), String> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| "Not a data URL".to_string())?;
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| "Data URL has no payload".to_string())?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| "Data URL is not base64 encoded".to_string())?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| format!("Invalid base64 payload: {}", e))?;
    Ok((mime.to_string(), bytes))
}
