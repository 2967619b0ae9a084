use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeshotError {
    #[error("Cannot capture on this page: {0}")]
    IneligiblePage(String),

    #[error("Failed to load capture scripts: {0}")]
    InjectionFailure(String),

    #[error("Rasterizer is not loaded in the page")]
    LibraryMissing,

    #[error("Element not found: {0}")]
    SelectorNotFound(String),

    #[error("Selector syntax error in '{selector}': {message}")]
    SelectorSyntaxError { selector: String, message: String },

    #[error("Image encoding failed: {0}")]
    EncodingFailure(String),

    #[error("Save failed: {0}")]
    DownloadFailure(String),

    #[error("Communication failed: {0}")]
    CommunicationFailure(String),

    #[error("A capture is already in progress")]
    SessionBusy,

    #[error("CDP connection failed: {0}")]
    CdpConnectionFailed(String),

    #[error("JavaScript execution failed: {0}")]
    JavaScriptError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, NodeshotError>;

impl NodeshotError {
    /// Stable name of the error kind, used in status output and session events.
    pub fn code(&self) -> &'static str {
        match self {
            NodeshotError::IneligiblePage(_) => "IneligiblePage",
            NodeshotError::InjectionFailure(_) => "InjectionFailure",
            NodeshotError::LibraryMissing => "LibraryMissing",
            NodeshotError::SelectorNotFound(_) => "SelectorNotFound",
            NodeshotError::SelectorSyntaxError { .. } => "SelectorSyntaxError",
            NodeshotError::EncodingFailure(_) => "EncodingFailure",
            NodeshotError::DownloadFailure(_) => "DownloadFailure",
            NodeshotError::CommunicationFailure(_) => "CommunicationFailure",
            NodeshotError::SessionBusy => "SessionBusy",
            NodeshotError::CdpConnectionFailed(_) => "CdpConnectionFailed",
            NodeshotError::JavaScriptError(_) => "JavaScriptError",
            NodeshotError::ConfigError(_) => "ConfigError",
            NodeshotError::IoError(_) => "IoError",
            NodeshotError::NetworkError(_) => "NetworkError",
            NodeshotError::JsonError(_) => "JsonError",
            NodeshotError::Other(_) => "Other",
        }
    }
}
