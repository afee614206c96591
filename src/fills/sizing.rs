//! Scale-mode aware sizing of image fills.
//!
//! For each way an image can be mapped into a node, computes the pixel size
//! at which the image must be kept so that the node still renders at full
//! quality. Sizes are unrounded here; callers take the ceiling once after
//! aggregating all usages.

use crate::document::{AffineTransform, Geometry, Paint};
use crate::Dimensions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How an image paint is mapped into its node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScaleMode {
    /// Letterboxed inside the node
    Fit,
    /// Cropped to cover the node
    Fill,
    /// Repeated at a fixed scale
    Tile,
    /// Mapped through an explicit image transform
    Stretch,
}

impl ScaleMode {
    /// Upstream default when a paint omits `scaleMode`
    pub const DEFAULT: ScaleMode = ScaleMode::Fill;

    /// Parse the mode of a paint, falling back to [`ScaleMode::DEFAULT`]
    pub fn of(paint: &Paint) -> Result<ScaleMode, String> {
        match paint.scale_mode.as_deref() {
            None => Ok(Self::DEFAULT),
            Some(mode) => mode.parse(),
        }
    }
}

impl fmt::Display for ScaleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScaleMode::Fit => "FIT",
            ScaleMode::Fill => "FILL",
            ScaleMode::Tile => "TILE",
            ScaleMode::Stretch => "STRETCH",
        };
        f.write_str(s)
    }
}

impl FromStr for ScaleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FIT" => Ok(ScaleMode::Fit),
            "FILL" => Ok(ScaleMode::Fill),
            "TILE" => Ok(ScaleMode::Tile),
            "STRETCH" => Ok(ScaleMode::Stretch),
            _ => Err(format!("Unsupported scale mode: {s}")),
        }
    }
}

/// Pixel size one usage needs, before rounding.
///
/// FIT and FILL scale the native image to the node and multiply by the
/// render density. TILE keeps the paint's scaling factor. STRETCH maps the
/// native size through the image transform, undoing the node's rotation.
pub fn required_size(
    mode: ScaleMode,
    paint: &Paint,
    node: &Geometry,
    image: Dimensions,
    density: f64,
) -> (f64, f64) {
    let (iw, ih) = (image.width as f64, image.height as f64);
    if iw <= 0.0 || ih <= 0.0 {
        return (0.0, 0.0);
    }

    match mode {
        ScaleMode::Fit => {
            let s = (node.width / iw).min(node.height / ih) * density;
            (iw * s, ih * s)
        }
        ScaleMode::Fill => {
            let s = (node.width / iw).max(node.height / ih) * density;
            (iw * s, ih * s)
        }
        ScaleMode::Tile => {
            let s = paint.scaling_factor.unwrap_or(1.0);
            (iw * s, ih * s)
        }
        ScaleMode::Stretch => stretch_size(paint.image_transform, node.rotation, iw, ih),
    }
}

fn stretch_size(transform: Option<[[f64; 3]; 2]>, rotation: f64, iw: f64, ih: f64) -> (f64, f64) {
    let transform = transform.map_or(AffineTransform::IDENTITY, AffineTransform::from);
    let composed = AffineTransform::rotation(-rotation).compose(&transform);
    let (w, h) = composed.apply_vector(iw, ih);
    (w.abs().ceil(), h.abs().ceil())
}
