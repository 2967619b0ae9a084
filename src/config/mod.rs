use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::capture::{CaptureOptions, ImageFormat};
use crate::controller::ControllerTimings;
use crate::error::{NodeshotError, Result};
use crate::selection::SelectionTimings;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default capture options
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Browser connection
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Where screenshots are written
    #[serde(default)]
    pub output: OutputConfig,

    /// Delays of the capture flow
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Output format (png or jpeg)
    #[serde(default)]
    pub format: ImageFormat,

    /// Quality percentage, only honored by jpeg
    #[serde(default = "default_quality")]
    pub quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            format: ImageFormat::default(),
            quality: default_quality(),
        }
    }
}

fn default_quality() -> u8 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Remote debugging port of the browser
    #[serde(default = "default_cdp_port")]
    pub cdp_port: u16,

    /// Full HTTP endpoint; takes precedence over `cdp_port`
    pub cdp_url: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            cdp_port: default_cdp_port(),
            cdp_url: None,
        }
    }
}

fn default_cdp_port() -> u16 {
    9222
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Download directory (`~` is expanded). Defaults to the user's downloads folder.
    pub download_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub settle_ms: u64,
    pub close_delay_ms: u64,
    pub selector_highlight_ms: u64,
    pub notice_ms: u64,
    pub cancel_notice_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: 100,
            close_delay_ms: 800,
            selector_highlight_ms: 300,
            notice_ms: 2000,
            cancel_notice_ms: 1500,
        }
    }
}

impl TimingConfig {
    pub fn controller(&self) -> ControllerTimings {
        ControllerTimings {
            settle: Duration::from_millis(self.settle_ms),
            close_delay: Duration::from_millis(self.close_delay_ms),
        }
    }

    pub fn selection(&self) -> SelectionTimings {
        SelectionTimings {
            selector_highlight: Duration::from_millis(self.selector_highlight_ms),
            notice: Duration::from_millis(self.notice_ms),
            cancel_notice: Duration::from_millis(self.cancel_notice_ms),
        }
    }
}

impl Config {
    /// Load configuration from all sources (file, env, defaults)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration using `path` as the config file
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::figment(path)
            // Merge environment variables (NODESHOT_OUTPUT__DOWNLOAD_DIR, ...)
            .merge(Env::prefixed("NODESHOT_").split("__"))
            .extract()
            .map_err(|e| NodeshotError::ConfigError(e.to_string()))
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nodeshot")
            .join("config.toml")
    }

    /// Render as TOML, the format of the config file
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| NodeshotError::ConfigError(e.to_string()))
    }

    /// Default capture options from the `capture` section
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions::new(self.capture.format, f64::from(self.capture.quality) / 100.0)
    }

    /// Resolve the directory screenshots are saved into
    pub fn download_dir(&self) -> PathBuf {
        if let Some(dir) = self.output.download_dir.as_deref().filter(|d| !d.trim().is_empty()) {
            return PathBuf::from(shellexpand::tilde(dir.trim()).into_owned());
        }
        dirs::download_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
