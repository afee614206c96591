//! Paint usage mapping.
//!
//! Walks a document once and records, for every image hash referenced by an
//! image paint, which nodes use it, how, and where those nodes sit. The
//! resulting [`PaintUsageMap`] answers the question the optimizer asks for
//! each downloaded fill: how large does this image actually need to be?

pub mod sizing;

use crate::document::{resolve_geometry, DocumentError, Geometry, Node, Paint};
use crate::Dimensions;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub use sizing::{required_size, ScaleMode};

/// Default render density multiplier applied to FIT and FILL usages
pub const DEFAULT_DENSITY: f64 = 2.5;

/// Errors raised while mapping or sizing fills
#[derive(Error, Debug)]
pub enum FillError {
    /// A paint uses a scale mode the sizing rules do not know
    #[error("Unsupported scale mode '{mode}' for image {hash} on node {node_id}")]
    UnsupportedScaleMode {
        /// Image hash
        hash: String,
        /// Node carrying the paint
        node_id: String,
        /// Raw mode string
        mode: String,
    },

    /// The document could not be read
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Every usage of one image hash.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaintUsageRecord {
    /// `(node id, paint)` for each use, in document order
    pub usage: Vec<(String, Paint)>,
    /// Resolved geometry of each using node; `None` when unknown
    pub nodes: BTreeMap<String, Option<Geometry>>,
}

impl PaintUsageRecord {
    /// Largest pixel size any usage needs, never exceeding `original`.
    ///
    /// A usage on a node with unknown geometry needs the full original.
    pub fn max_size(&self, original: Dimensions, density: f64) -> Result<Dimensions, FillError> {
        let mut width: f64 = 0.0;
        let mut height: f64 = 0.0;

        for (node_id, paint) in &self.usage {
            let mode = ScaleMode::of(paint).map_err(|_| FillError::UnsupportedScaleMode {
                hash: paint.image_hash().unwrap_or_default().to_string(),
                node_id: node_id.clone(),
                mode: paint.scale_mode.clone().unwrap_or_default(),
            })?;

            let Some(Some(geometry)) = self.nodes.get(node_id) else {
                return Ok(original);
            };

            let (w, h) = required_size(mode, paint, geometry, original, density);
            width = width.max(w);
            height = height.max(h);
        }

        Ok(Dimensions {
            width: clamp_side(width, original.width),
            height: clamp_side(height, original.height),
        })
    }
}

fn clamp_side(required: f64, original: u32) -> u32 {
    if !required.is_finite() {
        return original;
    }
    (required.ceil().max(1.0) as u32).min(original)
}

/// Image hash to usage record for one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaintUsageMap {
    records: BTreeMap<String, PaintUsageRecord>,
    density: f64,
}

impl PaintUsageMap {
    /// Usage record for `hash`
    pub fn get(&self, hash: &str) -> Option<&PaintUsageRecord> {
        self.records.get(hash)
    }

    /// All referenced hashes in sorted order
    pub fn hashes(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }

    /// Number of distinct hashes
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the document references no image fills
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum needed size of `hash`, or `None` if it is not referenced
    pub fn max_size(&self, hash: &str, original: Dimensions) -> Result<Option<Dimensions>, FillError> {
        self.records
            .get(hash)
            .map(|record| record.max_size(original, self.density))
            .transpose()
    }
}

/// Builds [`PaintUsageMap`]s.
#[derive(Debug, Clone, Copy)]
pub struct PaintUsageMapper {
    density: f64,
}

impl Default for PaintUsageMapper {
    fn default() -> Self {
        Self::new(DEFAULT_DENSITY)
    }
}

impl PaintUsageMapper {
    /// Create a mapper using `density` for FIT and FILL usages
    pub fn new(density: f64) -> Self {
        Self { density }
    }

    /// Map every image paint in the tree rooted at `root`.
    ///
    /// Fails on the first paint with an unsupported scale mode or a node whose
    /// `fills` cannot be decoded.
    pub fn map(&self, root: &Node) -> Result<PaintUsageMap, FillError> {
        let mut records: BTreeMap<String, PaintUsageRecord> = BTreeMap::new();
        let mut stack: Vec<(&Node, Option<&Node>)> = vec![(root, None)];

        while let Some((node, parent)) = stack.pop() {
            let fills = node.fills()?;
            let mut geometry = None;

            for paint in fills.iter() {
                let Some(hash) = paint.image_hash() else {
                    continue;
                };
                ScaleMode::of(paint).map_err(|_| FillError::UnsupportedScaleMode {
                    hash: hash.to_string(),
                    node_id: node.id.clone(),
                    mode: paint.scale_mode.clone().unwrap_or_default(),
                })?;

                let resolved = *geometry.get_or_insert_with(|| resolve_geometry(node, parent));
                let record = records.entry(hash.to_string()).or_default();
                record.usage.push((node.id.clone(), paint.clone()));
                record.nodes.insert(node.id.clone(), resolved);
            }

            for child in node.children.iter().rev() {
                stack.push((child, Some(node)));
            }
        }

        Ok(PaintUsageMap {
            records,
            density: self.density,
        })
    }
}

/// Every image hash referenced anywhere in the tree.
///
/// Unlike [`PaintUsageMapper::map`] this never fails on scale modes and skips
/// nodes whose fills cannot be decoded.
pub fn referenced_hashes(root: &Node) -> BTreeSet<String> {
    let mut hashes = BTreeSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if let Ok(fills) = node.fills() {
            hashes.extend(fills.iter().filter_map(Paint::image_hash).map(str::to_string));
        }
        stack.extend(node.children.iter());
    }
    hashes
}
