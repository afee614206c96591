//! In-place image optimization.
//!
//! Shrinks PNG and JPEG files to fit a byte and/or pixel budget, preserving
//! aspect ratio. The scale factor is computed against the original recorded
//! in the file (see [`metadata`]), so running the optimizer again with the
//! same budget leaves the file byte-identical, and a result that is not
//! smaller than the current file is discarded.

pub mod metadata;
pub mod postprocess;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::atomic::write_atomic;
use crate::Dimensions;

pub use metadata::OptimizationMetadata;
pub use postprocess::{BudgetPostProcess, FillPostProcess};

/// Default JPEG re-encode quality
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Errors raised by the optimizer
#[derive(Error, Debug)]
pub enum OptimizeError {
    /// Reading or replacing the file failed
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The file could not be decoded
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// The resized image could not be encoded
    #[error("Encode error: {0}")]
    EncodeError(String),

    /// The budget could not be computed
    #[error("Budget error: {0}")]
    BudgetError(String),
}

/// Limits an image must fit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeBudget {
    /// Target file size
    pub max_bytes: Option<u64>,
    /// Target width
    pub max_width: Option<u32>,
    /// Target height
    pub max_height: Option<u32>,
}

impl OptimizeBudget {
    /// Whether no limit is set
    pub fn is_unbounded(&self) -> bool {
        self.max_bytes.is_none() && self.max_width.is_none() && self.max_height.is_none()
    }

    /// Uniform scale factor in `(0, 1]` applied to the original.
    ///
    /// Byte budgets assume size grows with pixel area, hence the square root.
    pub fn scale_factor(&self, original: &OptimizationMetadata) -> f64 {
        let mut factor: f64 = 1.0;

        if let Some(max_bytes) = self.max_bytes {
            if original.original_byte_size > max_bytes && original.original_byte_size > 0 {
                factor = factor.min((max_bytes as f64 / original.original_byte_size as f64).sqrt());
            }
        }
        if let Some(max_width) = self.max_width {
            if original.original_width > 0 {
                factor = factor.min(max_width as f64 / original.original_width as f64);
            }
        }
        if let Some(max_height) = self.max_height {
            if original.original_height > 0 {
                factor = factor.min(max_height as f64 / original.original_height as f64);
            }
        }

        factor.clamp(0.0, 1.0)
    }

    /// Pixel size the original should be reduced to
    pub fn target_dimensions(&self, original: &OptimizationMetadata) -> Dimensions {
        let factor = self.scale_factor(original);
        let mut width = (original.original_width as f64 * factor).round() as u32;
        let mut height = (original.original_height as f64 * factor).round() as u32;
        if let Some(max_width) = self.max_width {
            width = width.min(max_width);
        }
        if let Some(max_height) = self.max_height {
            height = height.min(max_height);
        }
        Dimensions::new(width.max(1), height.max(1))
    }
}

/// Why a file was left as it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnchangedReason {
    /// Already at or below the target size
    WithinBudget,
    /// Re-encoding did not reduce the file size
    NotSmaller,
    /// Not a PNG or JPEG
    UnsupportedFormat,
}

/// Result of optimizing one file
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizeOutcome {
    /// File replaced with a smaller rendition
    Optimized {
        /// Size before
        before_bytes: u64,
        /// Size after
        after_bytes: u64,
        /// New pixel size
        dimensions: Dimensions,
        /// Original recorded in the file
        original: OptimizationMetadata,
    },
    /// File untouched
    Unchanged(UnchangedReason),
}

impl OptimizeOutcome {
    /// Bytes removed from the file
    pub fn bytes_saved(&self) -> u64 {
        match self {
            OptimizeOutcome::Optimized {
                before_bytes,
                after_bytes,
                ..
            } => before_bytes.saturating_sub(*after_bytes),
            OptimizeOutcome::Unchanged(_) => 0,
        }
    }
}

/// Resizes and re-encodes images in place
#[derive(Debug, Clone, Copy)]
pub struct ImageOptimizer {
    jpeg_quality: u8,
    filter: FilterType,
}

impl Default for ImageOptimizer {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            filter: FilterType::Lanczos3,
        }
    }
}

impl ImageOptimizer {
    /// Optimizer with default quality and Lanczos3 resampling
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `quality` (1-100) for JPEG output
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Fit the file at `path` into `budget`
    pub fn optimize(&self, path: &Path, budget: &OptimizeBudget) -> Result<OptimizeOutcome, OptimizeError> {
        let budget = *budget;
        self.optimize_with(path, move |_| Ok(budget))
    }

    /// Fit the file at `path` into the budget `budget_for` derives from its original
    pub fn optimize_with<F>(&self, path: &Path, budget_for: F) -> Result<OptimizeOutcome, OptimizeError>
    where
        F: FnOnce(&OptimizationMetadata) -> Result<OptimizeBudget, OptimizeError>,
    {
        let bytes = std::fs::read(path)?;
        let format = match image::guess_format(&bytes) {
            Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg)) => format,
            _ => return Ok(OptimizeOutcome::Unchanged(UnchangedReason::UnsupportedFormat)),
        };

        let image = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| OptimizeError::DecodeError(format!("{}: {}", path.display(), e)))?;
        let current = Dimensions::new(image.width(), image.height());
        let current_bytes = bytes.len() as u64;

        let original = metadata::read_metadata(&bytes, format).unwrap_or(OptimizationMetadata {
            original_width: current.width,
            original_height: current.height,
            original_byte_size: current_bytes,
        });

        let budget = budget_for(&original)?;
        if budget.is_unbounded() {
            return Ok(OptimizeOutcome::Unchanged(UnchangedReason::WithinBudget));
        }

        let target = budget.target_dimensions(&original);
        let target = Dimensions::new(
            target.width.min(current.width),
            target.height.min(current.height),
        );
        if target == current {
            return Ok(OptimizeOutcome::Unchanged(UnchangedReason::WithinBudget));
        }

        let resized = image.resize_exact(target.width, target.height, self.filter);
        let encoded = self.encode(&resized, format, &original)?;

        if encoded.len() as u64 >= current_bytes {
            debug!(
                path = %path.display(),
                current_bytes,
                candidate_bytes = encoded.len(),
                "Optimized rendition not smaller, keeping file"
            );
            return Ok(OptimizeOutcome::Unchanged(UnchangedReason::NotSmaller));
        }

        write_atomic(path, &encoded)?;
        debug!(
            path = %path.display(),
            from = %current,
            to = %target,
            before_bytes = current_bytes,
            after_bytes = encoded.len(),
            "Image optimized"
        );

        Ok(OptimizeOutcome::Optimized {
            before_bytes: current_bytes,
            after_bytes: encoded.len() as u64,
            dimensions: target,
            original,
        })
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: ImageFormat,
        original: &OptimizationMetadata,
    ) -> Result<Vec<u8>, OptimizeError> {
        match format {
            ImageFormat::Jpeg => {
                let mut out = Vec::new();
                let rgb = match image {
                    DynamicImage::ImageLuma8(_) => image.clone(),
                    _ => DynamicImage::ImageRgb8(image.to_rgb8()),
                };
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.jpeg_quality))
                    .map_err(|e| OptimizeError::EncodeError(e.to_string()))?;
                metadata::embed_jpeg_metadata(&out, original)
            }
            _ => encode_png(image, original),
        }
    }
}

fn encode_png(image: &DynamicImage, original: &OptimizationMetadata) -> Result<Vec<u8>, OptimizeError> {
    let (color, data) = match image {
        DynamicImage::ImageLuma8(buf) => (png::ColorType::Grayscale, buf.as_raw().clone()),
        DynamicImage::ImageLumaA8(buf) => (png::ColorType::GrayscaleAlpha, buf.as_raw().clone()),
        DynamicImage::ImageRgb8(buf) => (png::ColorType::Rgb, buf.as_raw().clone()),
        other if !other.color().has_alpha() => (png::ColorType::Rgb, other.to_rgb8().into_raw()),
        other => (png::ColorType::Rgba, other.to_rgba8().into_raw()),
    };

    let (keyword, text) = metadata::png_text_chunk(original)?;
    let encode_err = |e: png::EncodingError| OptimizeError::EncodeError(e.to_string());

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, image.width(), image.height());
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Default);
        encoder.add_text_chunk(keyword, text).map_err(encode_err)?;
        let mut writer = encoder.write_header().map_err(encode_err)?;
        writer.write_image_data(&data).map_err(encode_err)?;
        writer.finish().map_err(encode_err)?;
    }
    Ok(out)
}
