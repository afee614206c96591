//! Design document model.
//!
//! Documents are cached locally as the JSON returned by the files endpoint.
//! A [`Node`] keeps the fields every node carries (`id`, `type`, `children`)
//! typed and collects everything type-specific into an open property map,
//! read through typed accessors.

pub mod geometry;
pub mod index;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;

pub use geometry::{resolve_geometry, AffineTransform, Geometry};
pub use index::{index_nodes, IndexOptions, NodeIndex};

/// Errors raised while loading or reading a document
#[derive(Error, Debug)]
pub enum DocumentError {
    /// Document file could not be read
    #[error("IO error: {0}")]
    IoError(String),

    /// Document is not valid JSON or lacks the required structure
    #[error("Malformed document: {0}")]
    Malformed(String),

    /// A node property has an unexpected shape
    #[error("Invalid field '{field}' on node {node_id}: {message}")]
    InvalidField {
        /// Offending node
        node_id: String,
        /// Property name
        field: String,
        /// Decoder message
        message: String,
    },
}

/// Result type for document operations
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Stack reserved for parsing one document
const PARSE_STACK_SIZE: usize = 64 << 20;

/// A cached design document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignDocument {
    /// Root of the node tree; its children are canvases
    pub document: Node,
    /// Name of the document
    #[serde(default)]
    pub name: Option<String>,
    /// Signed URL of the document thumbnail
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Upstream version identifier
    #[serde(default)]
    pub version: Option<String>,
    /// Upstream modification timestamp
    #[serde(default)]
    pub last_modified: Option<String>,
}

impl DesignDocument {
    /// Load and parse a document from disk.
    pub fn load(path: &Path) -> DocumentResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| DocumentError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_slice(&bytes)
    }

    /// Parse a document from raw JSON bytes.
    ///
    /// Nesting depth is unlimited; parsing runs on a dedicated stack so deep
    /// trees cannot overflow the caller's.
    pub fn from_slice(bytes: &[u8]) -> DocumentResult<Self> {
        stacker::grow(PARSE_STACK_SIZE, || {
            let mut de = serde_json::Deserializer::from_slice(bytes);
            de.disable_recursion_limit();
            let document = Self::deserialize(&mut de)?;
            de.end()?;
            Ok(document)
        })
        .map_err(|e: serde_json::Error| DocumentError::Malformed(e.to_string()))
    }

    /// Parse a document from a JSON string.
    pub fn from_json(json: &str) -> DocumentResult<Self> {
        Self::from_slice(json.as_bytes())
    }

    /// Top-level canvases (pages) of the document
    pub fn canvases(&self) -> &[Node] {
        &self.document.children
    }
}

/// A node in the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Opaque node identifier, e.g. `12:3`
    pub id: String,
    /// Node type, e.g. `FRAME`, `RECTANGLE`, `CANVAS`
    #[serde(rename = "type")]
    pub node_type: String,
    /// Child nodes in paint order
    #[serde(default)]
    pub children: Vec<Node>,
    /// Remaining type-specific properties
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

// Children are released with an explicit stack so dropping a deep tree does
// not recurse once per level.
impl Drop for Node {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Two-dimensional vector as used by `size`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    /// Horizontal component
    pub x: f64,
    /// Vertical component
    pub y: f64,
}

/// Axis-aligned rectangle in absolute document coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl Node {
    /// Image, solid and gradient paints applied to this node.
    ///
    /// A missing or null `fills` property yields no paints. Any other shape
    /// that does not decode as a paint list is an error.
    pub fn fills(&self) -> DocumentResult<Vec<Paint>> {
        match self.properties.get("fills") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => {
                Vec::<Paint>::deserialize(value).map_err(|e| DocumentError::InvalidField {
                    node_id: self.id.clone(),
                    field: "fills".to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Transform relative to the parent, if present and well formed
    pub fn relative_transform(&self) -> Option<AffineTransform> {
        self.typed_property::<[[f64; 3]; 2]>("relativeTransform")
            .map(AffineTransform::from)
    }

    /// Untransformed size, if present
    pub fn size(&self) -> Option<Vector> {
        self.typed_property("size")
    }

    /// Absolute bounding box; `None` when absent or null
    pub fn absolute_bounding_box(&self) -> Option<Rect> {
        self.typed_property("absoluteBoundingBox")
    }

    /// Rotation in radians as reported by the `rotation` property
    pub fn rotation(&self) -> f64 {
        self.properties
            .get("rotation")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    /// Human-readable node name
    pub fn name(&self) -> Option<&str> {
        self.properties.get("name").and_then(Value::as_str)
    }

    /// Whether this node is a page
    pub fn is_canvas(&self) -> bool {
        self.node_type == "CANVAS"
    }

    fn typed_property<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.properties.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => T::deserialize(value).ok(),
        }
    }
}

fn default_visible() -> bool {
    true
}

/// A paint entry from a node's `fills` list.
///
/// Only image paints carry an `imageRef`; other paint kinds decode with the
/// image fields empty and unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paint {
    /// Paint kind, e.g. `IMAGE`, `SOLID`
    #[serde(rename = "type")]
    pub paint_type: String,
    /// Content hash of the referenced image
    #[serde(default)]
    pub image_ref: Option<String>,
    /// How the image is mapped into the node
    #[serde(default)]
    pub scale_mode: Option<String>,
    /// Tile scale for `TILE` paints
    #[serde(default)]
    pub scaling_factor: Option<f64>,
    /// Image-space transform for `STRETCH` paints
    #[serde(default)]
    pub image_transform: Option<[[f64; 3]; 2]>,
    /// Whether the paint is rendered
    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl Paint {
    /// Content hash for image paints
    pub fn image_hash(&self) -> Option<&str> {
        self.image_ref.as_deref().filter(|hash| !hash.is_empty())
    }
}
