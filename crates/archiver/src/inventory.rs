use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::ArchiveConfig;
use crate::error::PreconditionError;
use crate::resolver::ExtensionSet;

/// One tracked source file, relative to the source root with `/` separators
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceFileRecord {
    pub relative_path: String,
}

impl SourceFileRecord {
    pub fn from_relative(rel: &Path) -> Self {
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Self { relative_path: parts.join("/") }
    }

    /// Relative path in native form
    pub fn relative(&self) -> PathBuf {
        self.relative_path.split('/').filter(|p| !p.is_empty()).collect()
    }

    /// Absolute path under `source_root`
    pub fn source_path(&self, source_root: &Path) -> PathBuf {
        source_root.join(self.relative())
    }
}

/// Rules deciding which walked files are tracked
#[derive(Debug, Clone)]
pub struct InventoryFilter {
    proxy_suffix: String,
    video_exts: ExtensionSet,
    raw_exts: ExtensionSet,
    exclude_dirs: HashSet<String>,
    skip_sidecars: bool,
}

impl InventoryFilter {
    pub fn from_config(cfg: &ArchiveConfig) -> Self {
        Self {
            proxy_suffix: cfg.proxy_suffix.to_lowercase(),
            video_exts: ExtensionSet::new(&cfg.video_extensions),
            raw_exts: ExtensionSet::new(&cfg.raw_extensions),
            exclude_dirs: cfg.exclude_dirs.iter().map(|d| d.to_lowercase()).collect(),
            skip_sidecars: cfg.skip_sidecars,
        }
    }

    /// Base name (without extension) ends with the proxy suffix
    pub fn is_proxy(&self, path: &Path) -> bool {
        if self.proxy_suffix.is_empty() {
            return false;
        }
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase().ends_with(&self.proxy_suffix))
            .unwrap_or(false)
    }

    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.exclude_dirs.contains(&name.to_lowercase())
    }

    pub fn is_raw(&self, path: &Path) -> bool {
        self.raw_exts.matches(path)
    }

    pub fn is_video(&self, path: &Path) -> bool {
        self.video_exts.matches(path)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct InventoryFile {
    source_root: PathBuf,
    created_at: DateTime<Utc>,
    files: Vec<SourceFileRecord>,
}

/// Tracked files for one source root
#[derive(Debug, Clone)]
pub struct Inventory {
    pub source_root: PathBuf,
    /// When the list was first built; nothing this tool staged predates it
    pub created_at: DateTime<Utc>,
    pub records: Vec<SourceFileRecord>,
}

/// File name of the persisted inventory for a source root
pub fn inventory_file_name(source_root: &Path) -> String {
    let sanitized: String = source_root
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let trimmed = sanitized.trim_matches('_');
    let name = if trimmed.is_empty() { "root" } else { trimmed };
    format!("{}.inventory.json", name)
}

pub fn inventory_path(state_dir: &Path, source_root: &Path) -> PathBuf {
    state_dir.join(inventory_file_name(source_root))
}

impl Inventory {
    /// Load the persisted inventory for `source_root`, or build and persist it.
    ///
    /// An existing list is returned unmodified. An unreadable root is fatal.
    pub fn load_or_build(source_root: &Path, state_dir: &Path, filter: &InventoryFilter) -> Result<Self> {
        let path = inventory_path(state_dir, source_root);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| PreconditionError::InventoryUnreadable {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            let file: InventoryFile =
                serde_json::from_str(&content).map_err(|e| PreconditionError::InventoryUnreadable {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            info!("Loaded inventory of {} file(s) from {}", file.files.len(), path.display());
            return Ok(Self {
                source_root: source_root.to_path_buf(),
                created_at: file.created_at,
                records: file.files,
            });
        }

        let records = scan_source(source_root, filter)?;
        let inventory = Self {
            source_root: source_root.to_path_buf(),
            created_at: Utc::now(),
            records,
        };
        inventory.persist(&path)?;
        info!(
            "Built inventory of {} file(s) for {} -> {}",
            inventory.records.len(),
            source_root.display(),
            path.display()
        );
        Ok(inventory)
    }

    fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
        }
        let file = InventoryFile {
            source_root: self.source_root.clone(),
            created_at: self.created_at,
            files: self.records.clone(),
        };
        let json = serde_json::to_string_pretty(&file).context("Failed to serialize inventory")?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write inventory: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move inventory into place: {}", path.display()))?;
        Ok(())
    }

    /// Records whose source file is no longer on disk
    pub fn find_missing(&self) -> Vec<&SourceFileRecord> {
        self.records
            .iter()
            .filter(|r| !r.source_path(&self.source_root).exists())
            .collect()
    }

    /// Log a warning per vanished record; drift is reported, not corrected
    pub fn warn_drift(&self) -> usize {
        let missing = self.find_missing();
        for record in &missing {
            warn!(
                "⚠️  Inventory entry has no file on disk: {}",
                record.source_path(&self.source_root).display()
            );
        }
        missing.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Walk `source_root` and collect tracked files in a stable order
pub fn scan_source(source_root: &Path, filter: &InventoryFilter) -> Result<Vec<SourceFileRecord>> {
    let meta = std::fs::metadata(source_root).map_err(|e| PreconditionError::SourceRootUnavailable {
        path: source_root.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !meta.is_dir() {
        return Err(PreconditionError::SourceRootUnavailable {
            path: source_root.to_path_buf(),
            reason: "not a directory".to_string(),
        }
        .into());
    }
    std::fs::read_dir(source_root).map_err(|e| PreconditionError::SourceRootUnavailable {
        path: source_root.to_path_buf(),
        reason: e.to_string(),
    })?;

    info!("Scanning source tree: {}", source_root.display());

    let walker = WalkDir::new(source_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() > 0 && entry.file_type().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if filter.is_excluded_dir(name) {
                        debug!("Skipping excluded directory: {}", entry.path().display());
                        return false;
                    }
                }
            }
            true
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    // stems of videos per directory, for side-car detection
    let mut video_stems: HashMap<PathBuf, HashSet<String>> = HashMap::new();
    for path in files.iter().filter(|p| filter.is_video(p) && !filter.is_proxy(p)) {
        if let (Some(parent), Some(stem)) = (path.parent(), path.file_stem().and_then(|s| s.to_str())) {
            video_stems
                .entry(parent.to_path_buf())
                .or_default()
                .insert(stem.to_lowercase());
        }
    }

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for path in &files {
        if filter.is_proxy(path) {
            debug!("Skipping proxy: {}", path.display());
            skipped += 1;
            continue;
        }
        if filter.is_raw(path) {
            debug!("Skipping raw image: {}", path.display());
            skipped += 1;
            continue;
        }
        if filter.skip_sidecars && !filter.is_video(path) {
            let is_sidecar = match (path.parent(), path.file_stem().and_then(|s| s.to_str())) {
                (Some(parent), Some(stem)) => video_stems
                    .get(parent)
                    .map(|stems| stems.contains(&stem.to_lowercase()))
                    .unwrap_or(false),
                _ => false,
            };
            if is_sidecar {
                debug!("Skipping side-car: {}", path.display());
                skipped += 1;
                continue;
            }
        }

        match path.strip_prefix(source_root) {
            Ok(rel) => records.push(SourceFileRecord::from_relative(rel)),
            Err(_) => warn!("File outside source root ignored: {}", path.display()),
        }
    }

    info!(
        "Scan complete: {} file(s) tracked, {} skipped",
        records.len(),
        skipped
    );
    Ok(records)
}
