//! Archive manifests.
//!
//! `exports/meta.json` and `images/meta.json` describe what is actually on
//! disk. They are rebuilt from directory listings after every run rather than
//! maintained incrementally, so a crash between a download and a manifest
//! update can never leave them lying.

pub mod sync;

use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::atomic::write_atomic;
use crate::document::DocumentError;

pub use sync::{ManifestSynchronizer, SyncReport};

/// Errors raised while building or writing manifests
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Listing or writing failed
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Manifest could not be encoded or decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Source document could not be loaded
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// A `(depth, scale, format)` combination complete at one depth.
///
/// Serialized as a JSON triple with whole scales written as integers, e.g.
/// `[0, 1, "png"]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Index depth
    pub depth: usize,
    /// Render scale
    pub scale: f64,
    /// Format extension
    pub format: String,
}

impl Serialize for Resolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.depth)?;
        if self.scale.fract() == 0.0 && self.scale.abs() < 1e15 {
            tuple.serialize_element(&(self.scale as i64))?;
        } else {
            tuple.serialize_element(&self.scale)?;
        }
        tuple.serialize_element(&self.format)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (depth, scale, format) = <(usize, f64, String)>::deserialize(deserializer)?;
        Ok(Resolution {
            depth,
            scale,
            format,
        })
    }
}

/// Depth range of the index plus ids per depth
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthSummary {
    /// Shallowest depth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<usize>,
    /// Deepest depth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
    /// Depth (as a string key) to node ids
    #[serde(flatten)]
    pub levels: BTreeMap<String, Vec<String>>,
}

/// Contents of one `meta.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    /// Upstream document version
    #[serde(default)]
    pub document_version: Option<String>,
    /// Upstream modification timestamp
    #[serde(default)]
    pub last_modified: Option<String>,
    /// When the manifest was rebuilt
    pub archived_at: DateTime<Utc>,
    /// Combinations complete at each depth
    #[serde(default)]
    pub resolutions: Vec<Resolution>,
    /// Node id or image hash to on-disk file suffixes
    #[serde(default)]
    pub map: BTreeMap<String, Vec<String>>,
    /// Depth layout of the node index (renders only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depths: Option<DepthSummary>,
    /// Image hash to file name (fills only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<BTreeMap<String, String>>,
    /// Referenced hashes not on disk (fills only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

impl ArchiveManifest {
    /// Read a manifest
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| ManifestError::SerializationError(e.to_string()))
    }

    /// Write a manifest atomically
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| ManifestError::SerializationError(e.to_string()))?;
        write_atomic(path, &json)?;
        Ok(())
    }
}
