use std::collections::HashMap;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::inventory::{Inventory, SourceFileRecord};
use crate::transfer::is_part_file;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Staged inputs moved back to their source path
    pub restored: usize,
    /// Staged copies deleted because an identical source still exists
    pub discarded: usize,
    pub parts_removed: usize,
    /// Encoder outputs for files that are still pending
    pub orphans_removed: usize,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Regular files directly inside `dir`
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }
    Ok(files)
}

fn lower_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_lowercase())
}

fn lower_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|n| n.to_string_lossy().to_lowercase())
}

fn file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

/// Whether `output` can be an artifact of the pending file with stem `pending`.
///
/// An exact stem is always ours. A longer stem only counts when the file was
/// written after the inventory existed, since nothing was staged before that.
fn is_orphan_of(output: &Path, stem: &str, pending: &str, inventory_created: DateTime<Utc>) -> bool {
    if stem == pending {
        return true;
    }
    if !stem.starts_with(pending) {
        return false;
    }
    std::fs::metadata(output)
        .and_then(|m| m.modified())
        .map(|t| DateTime::<Utc>::from(t) > inventory_created)
        .unwrap_or(false)
}

fn remove(path: &Path, what: &str) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!("🗑️  Deleted {}: {}", what, path.display());
            true
        }
        Err(e) => {
            warn!("Failed to delete {} {}: {}", what, path.display(), e);
            false
        }
    }
}

/// Undo whatever an interrupted run left behind.
pub async fn recover_interrupted(ctx: &RunContext, inventory: &Inventory) -> Result<RecoveryReport> {
    info!("🔄 Starting recovery checks...");
    let mut report = RecoveryReport::default();
    let source_root = &ctx.roots.source;

    let videos: Vec<&SourceFileRecord> = inventory
        .records
        .iter()
        .filter(|r| ctx.resolver.is_video(&r.relative()))
        .collect();

    let mut by_name: HashMap<String, Vec<&SourceFileRecord>> = HashMap::new();
    for &record in &videos {
        if let Some(name) = lower_name(&record.relative()) {
            by_name.entry(name).or_default().push(record);
        }
    }

    // Inputs left in the watch folder
    for staged in list_files(&ctx.roots.staging_input)? {
        if is_part_file(&staged) {
            if remove(&staged, "partial staged copy") {
                report.parts_removed += 1;
            }
            continue;
        }
        let Some(candidates) = lower_name(&staged).and_then(|n| by_name.get(&n)) else {
            debug!("Leaving unrelated file in input folder: {}", staged.display());
            continue;
        };

        // Prefer the record whose source slot is empty; that is the one that was moved
        let missing = candidates
            .iter()
            .map(|r| r.source_path(source_root))
            .find(|p| !p.exists());

        match missing {
            Some(original) => {
                if ctx.transfer.move_with_retry(&staged, &original).await {
                    info!("↩️  Returned staged input {} to {}", staged.display(), original.display());
                    report.restored += 1;
                } else {
                    warn!(
                        "Could not return staged input {} to {}",
                        staged.display(),
                        original.display()
                    );
                }
            }
            None => {
                // A copy we made has the source's size; anything else belongs to someone else
                let staged_len = file_len(&staged);
                let ours = candidates
                    .iter()
                    .any(|r| staged_len.is_some() && file_len(&r.source_path(source_root)) == staged_len);
                if !ours {
                    warn!(
                        "Leaving {} in input folder: size differs from every tracked source of that name",
                        staged.display()
                    );
                } else if remove(&staged, "staged copy") {
                    report.discarded += 1;
                }
            }
        }
    }

    // Artifacts of files whose backup never landed
    let pending_stems: Vec<String> = videos
        .iter()
        .filter(|r| !ctx.resolver.resolve_relative(&r.relative()).exists())
        .filter_map(|r| lower_stem(&r.relative()))
        .collect();

    for output in list_files(&ctx.roots.staging_output)? {
        if is_part_file(&output) {
            if remove(&output, "partial output") {
                report.parts_removed += 1;
            }
            continue;
        }
        let Some(stem) = lower_stem(&output) else { continue };
        if pending_stems.iter().any(|p| is_orphan_of(&output, &stem, p, inventory.created_at)) {
            if remove(&output, "orphaned output") {
                report.orphans_removed += 1;
            }
        }
    }

    // Interrupted copies into the backup tree
    let backup_root = ctx.roots.backup.clone();
    let parts = tokio::task::spawn_blocking(move || {
        walkdir::WalkDir::new(&backup_root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_part_file(e.path()))
            .map(|e| e.into_path())
            .collect::<Vec<_>>()
    })
    .await
    .context("Failed to scan backup tree for partial copies")?;

    for part in parts {
        if remove(&part, "partial backup copy") {
            report.parts_removed += 1;
        }
    }

    if report.is_clean() {
        info!("✅ Startup recovery complete: nothing to reconcile");
    } else {
        info!(
            "✅ Startup recovery complete: {} restored, {} discarded, {} partial, {} orphaned output(s)",
            report.restored, report.discarded, report.parts_removed, report.orphans_removed
        );
    }
    Ok(report)
}
