//! Manifest synchronization.
//!
//! Rebuilds both manifests of a document from its directory listings. A
//! render resolution is reported for a depth only when every node at that
//! depth has a file for it, so the manifest never promises more than the
//! archive holds.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::{ArchiveManifest, DepthSummary, ManifestError, Resolution};
use crate::archiver::layout::{fills_on_disk, list_file_names, parse_export_file_name, DocumentLayout};
use crate::document::{index_nodes, DesignDocument, IndexOptions};
use crate::fetcher::http::format_scale;
use crate::fills::referenced_hashes;

/// Manifests written for one document
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Renders manifest, when the renders directory exists
    pub exports: Option<ArchiveManifest>,
    /// Fills manifest, when the fills directory exists
    pub images: Option<ArchiveManifest>,
}

impl SyncReport {
    /// Number of manifests written
    pub fn written(&self) -> u64 {
        self.exports.is_some() as u64 + self.images.is_some() as u64
    }
}

/// Rebuilds manifests from disk
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestSynchronizer {
    include_canvas: bool,
}

impl ManifestSynchronizer {
    /// Index canvases at depth 0 when `include_canvas` is set
    pub fn new(include_canvas: bool) -> Self {
        Self { include_canvas }
    }

    /// Build the renders manifest from render file names
    pub fn exports_manifest(&self, document: &DesignDocument, files: &BTreeSet<String>) -> ArchiveManifest {
        let index = index_nodes(&document.document, &IndexOptions::unbounded(self.include_canvas));
        let indexed: BTreeSet<&str> = index.ids.iter().map(String::as_str).collect();

        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut variants: BTreeMap<String, BTreeSet<(String, String)>> = BTreeMap::new();

        for name in files {
            let Some(parsed) = parse_export_file_name(name) else {
                continue;
            };
            if !indexed.contains(parsed.node_id.as_str()) {
                continue;
            }
            let suffix = name[parsed.node_id.len()..].to_string();
            map.entry(parsed.node_id.clone()).or_default().push(suffix);
            variants
                .entry(parsed.node_id)
                .or_default()
                .insert((format_scale(parsed.scale), parsed.format));
        }

        let candidates: BTreeSet<&(String, String)> = variants.values().flatten().collect();
        let mut resolutions = Vec::new();
        for (depth, ids) in &index.depths {
            for candidate in &candidates {
                let complete = ids
                    .iter()
                    .all(|id| variants.get(id).is_some_and(|v| v.contains(*candidate)));
                if complete {
                    resolutions.push(Resolution {
                        depth: *depth,
                        scale: candidate.0.parse().unwrap_or(1.0),
                        format: candidate.1.clone(),
                    });
                }
            }
        }
        resolutions.sort_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then(a.scale.total_cmp(&b.scale))
                .then_with(|| a.format.cmp(&b.format))
        });

        let depths = DepthSummary {
            min: index.min_depth(),
            max: index.max_depth,
            levels: index
                .depths
                .iter()
                .map(|(depth, ids)| (depth.to_string(), ids.clone()))
                .collect(),
        };

        ArchiveManifest {
            document_version: document.version.clone(),
            last_modified: document.last_modified.clone(),
            archived_at: Utc::now(),
            resolutions,
            map,
            depths: Some(depths),
            images: None,
            missing: Vec::new(),
        }
    }

    /// Build the fills manifest from hash to file name
    pub fn images_manifest(&self, document: &DesignDocument, files: &BTreeMap<String, String>) -> ArchiveManifest {
        let referenced = referenced_hashes(&document.document);

        let map = files
            .iter()
            .filter(|(hash, _)| referenced.contains(*hash))
            .map(|(hash, name)| (hash.clone(), vec![name[hash.len()..].to_string()]))
            .collect();
        let missing = referenced
            .iter()
            .filter(|hash| !files.contains_key(*hash))
            .cloned()
            .collect();

        ArchiveManifest {
            document_version: document.version.clone(),
            last_modified: document.last_modified.clone(),
            archived_at: Utc::now(),
            resolutions: Vec::new(),
            map,
            depths: None,
            images: Some(files.clone()),
            missing,
        }
    }

    /// Rebuild and write both manifests of a document.
    ///
    /// Asset directories that do not exist are left alone.
    pub fn sync(&self, document: &DesignDocument, layout: &DocumentLayout) -> Result<SyncReport, ManifestError> {
        let mut report = SyncReport {
            exports: None,
            images: None,
        };

        let exports_dir = layout.exports_dir();
        if exports_dir.is_dir() {
            let manifest = self.exports_manifest(document, &list_file_names(&exports_dir)?);
            manifest.save(&layout.exports_manifest_path())?;
            report.exports = Some(manifest);
        }

        let images_dir = layout.images_dir();
        if images_dir.is_dir() {
            let manifest = self.images_manifest(document, &fills_on_disk(&images_dir)?);
            manifest.save(&layout.images_manifest_path())?;
            report.images = Some(manifest);
        }

        debug!(root = %layout.root().display(), written = report.written(), "Manifests synchronized");
        Ok(report)
    }
}
