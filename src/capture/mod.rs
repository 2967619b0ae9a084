//! Capture data model and the encoding pipeline.

mod pipeline;

pub use pipeline::{CapturePipeline, RasterOptions, Rasterizer};

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::page::ElementRef;

/// Output image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    /// Lossy formats cannot carry transparency and honor the quality setting.
    pub fn is_lossy(self) -> bool {
        matches!(self, ImageFormat::Jpeg)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Png => f.write_str("png"),
            ImageFormat::Jpeg => f.write_str("jpeg"),
        }
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            other => Err(format!("unsupported format '{}' (expected png or jpeg)", other)),
        }
    }
}

const DEFAULT_QUALITY: f64 = 1.0;

fn clamp_quality(quality: f64) -> f64 {
    if quality.is_nan() {
        DEFAULT_QUALITY
    } else {
        quality.clamp(0.0, 1.0)
    }
}

/// Format and quality for one capture. Quality is always within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCaptureOptions")]
pub struct CaptureOptions {
    format: ImageFormat,
    quality: f64,
}

#[derive(Deserialize)]
struct RawCaptureOptions {
    #[serde(default)]
    format: ImageFormat,
    #[serde(default = "default_quality")]
    quality: f64,
}

fn default_quality() -> f64 {
    DEFAULT_QUALITY
}

impl From<RawCaptureOptions> for CaptureOptions {
    fn from(raw: RawCaptureOptions) -> Self {
        CaptureOptions::new(raw.format, raw.quality)
    }
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl CaptureOptions {
    pub fn new(format: ImageFormat, quality: f64) -> Self {
        Self {
            format,
            quality: clamp_quality(quality),
        }
    }

    pub fn png() -> Self {
        Self::default()
    }

    pub fn jpeg(quality: f64) -> Self {
        Self::new(ImageFormat::Jpeg, quality)
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn quality(&self) -> f64 {
        self.quality
    }

    /// Quality handed to the encoder; `None` for lossless formats.
    pub fn effective_quality(&self) -> Option<f64> {
        self.format.is_lossy().then_some(self.quality)
    }
}

/// What a capture request points at.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureTarget {
    Element(ElementRef),
    Selector(String),
}

/// One user action. Dropped once a result or an error has been produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub target: CaptureTarget,
    pub options: CaptureOptions,
}

/// An encoded image ready to be persisted.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub payload: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

impl CaptureResult {
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.payload)
        )
    }
}

/// `screenshot-<epoch-millis>.<ext>`
pub fn screenshot_filename(format: ImageFormat, epoch_millis: u128) -> String {
    format!("screenshot-{}.{}", epoch_millis, format.extension())
}

pub fn generate_filename(format: ImageFormat) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    screenshot_filename(format, millis)
}
