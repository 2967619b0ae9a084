use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};

use super::{generate_filename, CaptureOptions, CaptureResult};
use crate::error::{NodeshotError, Result};
use crate::page::{ElementRef, PageDom};

/// Fill used under lossy output, which cannot carry transparency.
const OPAQUE_BACKGROUND: [u8; 3] = [0xff, 0xff, 0xff];

/// Parameters handed to the rasterizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterOptions {
    /// Device pixels per CSS pixel.
    pub scale: f64,
    /// Opaque fill behind the element; `None` keeps transparency.
    pub background: Option<[u8; 3]>,
}

/// Renders one element of a page into pixels.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, element: ElementRef, options: &RasterOptions) -> Result<RgbaImage>;
}

/// Turns an element into an encoded image. One attempt per call.
pub struct CapturePipeline {
    dom: Arc<dyn PageDom>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
}

impl CapturePipeline {
    pub fn new(dom: Arc<dyn PageDom>, rasterizer: Option<Arc<dyn Rasterizer>>) -> Self {
        Self { dom, rasterizer }
    }

    pub async fn capture_element(
        &self,
        element: ElementRef,
        options: &CaptureOptions,
    ) -> Result<CaptureResult> {
        let rasterizer = self.rasterizer.as_ref().ok_or(NodeshotError::LibraryMissing)?;

        let scale = match self.dom.device_pixel_ratio().await {
            Ok(ratio) if ratio.is_finite() && ratio > 0.0 => ratio,
            _ => 1.0,
        };
        let raster_options = RasterOptions {
            scale,
            background: options.format().is_lossy().then_some(OPAQUE_BACKGROUND),
        };

        tracing::debug!("Rasterizing {} at scale {}", element, scale);
        let surface = rasterizer
            .rasterize(element, &raster_options)
            .await
            .map_err(|e| match e {
                NodeshotError::LibraryMissing => NodeshotError::LibraryMissing,
                NodeshotError::EncodingFailure(msg) => NodeshotError::EncodingFailure(msg),
                other => NodeshotError::EncodingFailure(other.to_string()),
            })?;

        let payload = encode_surface(&surface, options)?;
        tracing::info!(
            "Captured {} as {}x{} {} ({} bytes)",
            element,
            surface.width(),
            surface.height(),
            options.format(),
            payload.len()
        );

        Ok(CaptureResult {
            payload,
            mime_type: options.format().mime_type().to_string(),
            filename: generate_filename(options.format()),
        })
    }
}

/// Encode a rasterized surface. PNG ignores quality; JPEG is flattened onto white.
pub fn encode_surface(surface: &RgbaImage, options: &CaptureOptions) -> Result<Vec<u8>> {
    let (width, height) = surface.dimensions();
    if width == 0 || height == 0 {
        return Err(NodeshotError::EncodingFailure(
            "Rasterized surface is empty".to_string(),
        ));
    }

    let mut bytes = Vec::new();
    match options.effective_quality() {
        None => PngEncoder::new(Cursor::new(&mut bytes))
            .write_image(surface.as_raw(), width, height, ExtendedColorType::Rgba8)
            .map_err(|e| NodeshotError::EncodingFailure(e.to_string()))?,
        Some(quality) => {
            let rgb = flatten(surface, OPAQUE_BACKGROUND);
            JpegEncoder::new_with_quality(Cursor::new(&mut bytes), jpeg_quality(quality))
                .encode(&rgb, width, height, ExtendedColorType::Rgb8)
                .map_err(|e| NodeshotError::EncodingFailure(e.to_string()))?
        }
    }
    Ok(bytes)
}

/// Map `[0, 1]` onto the encoder's `1..=100` scale.
fn jpeg_quality(quality: f64) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Composite RGBA pixels over an opaque color, dropping alpha.
fn flatten(surface: &RgbaImage, background: [u8; 3]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(surface.as_raw().len() / 4 * 3);
    for pixel in surface.pixels() {
        let alpha = pixel[3] as u32;
        for channel in 0..3 {
            let fg = pixel[channel] as u32;
            let bg = background[channel] as u32;
            rgb.push(((fg * alpha + bg * (255 - alpha) + 127) / 255) as u8);
        }
    }
    rgb
}
