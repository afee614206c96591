//! Output directory layout.
//!
//! Each document `<key>` gets `<output>/<key>/` containing `thumbnail.png`,
//! `images/` (fills named by content hash) and `exports/` (renders named
//! `{node_id}.{fmt}` at scale 1, `{node_id}@{scale}x.{fmt}` otherwise). Each
//! asset directory carries its own `meta.json` manifest. Everything in the
//! archive is derived from these names, so they are the resume state.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use crate::atomic::is_partial_file;
use crate::fetcher::http::format_scale;

/// Directory of image fills
pub const IMAGES_DIR: &str = "images";
/// Directory of node renders
pub const EXPORTS_DIR: &str = "exports";
/// Document thumbnail file
pub const THUMBNAIL_FILE: &str = "thumbnail.png";
/// Manifest file inside each asset directory
pub const MANIFEST_FILE: &str = "meta.json";
/// Placeholder for the document key in source patterns
pub const KEY_PLACEHOLDER: &str = "{key}";
/// Default source file pattern
pub const DEFAULT_SOURCE_PATTERN: &str = "{key}.json";

/// Paths of one document's archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLayout {
    root: PathBuf,
}

impl DocumentLayout {
    /// Layout for `file_key` under `output_dir`
    pub fn new(output_dir: &Path, file_key: &str) -> Self {
        Self {
            root: output_dir.join(file_key),
        }
    }

    /// Document directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fills directory
    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    /// Renders directory
    pub fn exports_dir(&self) -> PathBuf {
        self.root.join(EXPORTS_DIR)
    }

    /// Thumbnail path
    pub fn thumbnail_path(&self) -> PathBuf {
        self.root.join(THUMBNAIL_FILE)
    }

    /// Fills manifest path
    pub fn images_manifest_path(&self) -> PathBuf {
        self.images_dir().join(MANIFEST_FILE)
    }

    /// Renders manifest path
    pub fn exports_manifest_path(&self) -> PathBuf {
        self.exports_dir().join(MANIFEST_FILE)
    }

    /// Destination of a fill, without extension
    pub fn fill_path(&self, hash: &str) -> PathBuf {
        self.images_dir().join(hash)
    }

    /// Destination of a render
    pub fn export_path(&self, node_id: &str, scale: f64, format: &str) -> PathBuf {
        self.exports_dir().join(export_file_name(node_id, scale, format))
    }

    /// Create the document, fills and renders directories
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.images_dir())?;
        std::fs::create_dir_all(self.exports_dir())
    }
}

/// A cached document found in the source directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DocumentSource {
    /// Document key
    pub file_key: String,
    /// Path of the cached JSON
    pub path: PathBuf,
}

/// File name of a render: `{id}.{fmt}` at scale 1, `{id}@{scale}x.{fmt}` otherwise
pub fn export_file_name(node_id: &str, scale: f64, format: &str) -> String {
    if scale == 1.0 {
        format!("{node_id}.{format}")
    } else {
        format!("{node_id}@{}x.{format}", format_scale(scale))
    }
}

/// Components of a render file name
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFileName {
    /// Node id
    pub node_id: String,
    /// Render scale; 1 when the name carries none
    pub scale: f64,
    /// Format extension
    pub format: String,
}

/// Parse a render file name; manifests, dotfiles and partial writes yield `None`
pub fn parse_export_file_name(name: &str) -> Option<ExportFileName> {
    if name.starts_with('.') || name == MANIFEST_FILE {
        return None;
    }
    let (stem, format) = name.rsplit_once('.')?;
    if stem.is_empty() || format.is_empty() {
        return None;
    }

    if let Some((node_id, scale_part)) = stem.rsplit_once('@') {
        let scale = scale_part
            .strip_suffix('x')
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|s| s.is_finite() && *s > 0.0 && !node_id.is_empty());
        if let Some(scale) = scale {
            return Some(ExportFileName {
                node_id: node_id.to_string(),
                scale,
                format: format.to_string(),
            });
        }
    }

    Some(ExportFileName {
        node_id: stem.to_string(),
        scale: 1.0,
        format: format.to_string(),
    })
}

/// Regular file names in `dir`; a missing directory is empty
pub fn list_file_names(dir: &Path) -> io::Result<BTreeSet<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(e),
    };

    let mut names = BTreeSet::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || is_partial_file(&name) {
            continue;
        }
        names.insert(name);
    }
    Ok(names)
}

/// Fills on disk as hash to file name
pub fn fills_on_disk(dir: &Path) -> io::Result<BTreeMap<String, String>> {
    Ok(list_file_names(dir)?
        .into_iter()
        .filter(|name| name != MANIFEST_FILE)
        .filter_map(|name| {
            let hash = name.split('.').next()?.to_string();
            (!hash.is_empty()).then_some((hash, name))
        })
        .collect())
}

/// Find cached documents in `source_dir`.
///
/// Matches files named after `pattern` directly in the directory, and
/// `<dir>/<pattern>` inside subdirectories named after the key.
pub fn discover_documents(source_dir: &Path, pattern: &str) -> io::Result<Vec<DocumentSource>> {
    let (prefix, suffix) = pattern.split_once(KEY_PLACEHOLDER).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("source pattern '{pattern}' lacks {KEY_PLACEHOLDER}"),
        )
    })?;

    let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
    for entry in std::fs::read_dir(source_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let file_type = entry.file_type()?;

        if file_type.is_file() {
            if let Some(key) = name
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(suffix))
                .filter(|key| !key.is_empty())
            {
                found.entry(key.to_string()).or_insert_with(|| entry.path());
            }
        } else if file_type.is_dir() {
            let candidate = entry.path().join(pattern.replace(KEY_PLACEHOLDER, &name));
            if candidate.is_file() {
                found.entry(name).or_insert(candidate);
            }
        }
    }

    Ok(found
        .into_iter()
        .map(|(file_key, path)| DocumentSource { file_key, path })
        .collect())
}
