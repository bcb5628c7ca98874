use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use humansize::{format_size, DECIMAL};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{audit, MissingTarget};
use crate::cleanup::prune_empty_directories;
use crate::context::RunContext;
use crate::encoder::EncoderAdapter;
use crate::error::PreconditionError;
use crate::inventory::{Inventory, SourceFileRecord};
use crate::orchestrator::{process_file, FileOutcome};
use crate::progress::ProgressSnapshot;
use crate::recovery::{recover_interrupted, RecoveryReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbandonedFile {
    pub source: PathBuf,
    pub reason: String,
}

/// Summary of one run, persisted as JSON under the state directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub source_root: PathBuf,
    pub backup_root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Records in the inventory
    pub tracked: usize,
    /// Tracked files whose target already existed at selection time
    pub already_complete: usize,
    /// Inventory entries with nothing on disk
    pub drifted: usize,
    pub encoded: usize,
    pub copied: usize,
    pub abandoned: Vec<AbandonedFile>,
    pub recovery: RecoveryReport,
    pub pruned_directories: usize,
    pub missing: Vec<MissingTarget>,
    pub progress: ProgressSnapshot,
}

impl RunReport {
    /// Files that went through the per-file loop
    pub fn attempted(&self) -> usize {
        self.encoded + self.copied + self.abandoned.len()
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn save(&self, state_dir: &Path) -> Result<PathBuf> {
        let dir = state_dir.join("reports");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;
        let path = dir.join(format!("{}.json", self.run_id));
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write run report: {}", path.display()))?;
        Ok(path)
    }
}

/// Drives the whole pipeline for one source root
pub struct Archiver<E: EncoderAdapter> {
    ctx: RunContext,
    encoder: E,
}

impl<E: EncoderAdapter> Archiver<E> {
    pub fn new(ctx: RunContext, encoder: E) -> Self {
        Self { ctx, encoder }
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Execute one run and persist its report.
    ///
    /// Only precondition failures (see [`PreconditionError`]) and state-dir
    /// I/O are returned as errors; per-file problems land in the report.
    pub async fn run(&mut self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("🚀 Run {} starting for {}", run_id, self.ctx.roots.source.display());

        let inventory = Inventory::load_or_build(&self.ctx.roots.source, &self.ctx.config.state_dir, &self.ctx.filter)?;

        let recovery = match recover_interrupted(&self.ctx, &inventory).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Startup recovery incomplete: {:#}", e);
                RecoveryReport::default()
            }
        };

        let drifted = inventory.warn_drift();
        self.seed_progress(&inventory)?;

        let (pending, already_complete) = self.select_pending(&inventory);
        info!(
            "{} tracked, {} already backed up, {} pending",
            inventory.len(),
            already_complete,
            pending.len()
        );

        let mut encoded = 0;
        let mut copied = 0;
        let mut abandoned = Vec::new();
        let total = pending.len();

        for (i, record) in pending.iter().enumerate() {
            info!("[{}/{}] {}", i + 1, total, record.relative_path);
            match process_file(&mut self.ctx, &mut self.encoder, record).await {
                FileOutcome::Encoded { .. } => {
                    encoded += 1;
                    self.ctx.progress.log_progress();
                }
                FileOutcome::Copied { .. } => copied += 1,
                FileOutcome::Abandoned { source, reason, .. } => {
                    abandoned.push(AbandonedFile { source, reason });
                }
            }
        }

        let pruned_directories = self.prune();
        let missing = audit(&inventory.records, &self.ctx.resolver);

        let report = RunReport {
            run_id,
            source_root: self.ctx.roots.source.clone(),
            backup_root: self.ctx.roots.backup.clone(),
            started_at,
            finished_at: Utc::now(),
            tracked: inventory.len(),
            already_complete,
            drifted,
            encoded,
            copied,
            abandoned,
            recovery,
            pruned_directories,
            missing,
            progress: self.ctx.progress.snapshot(),
        };

        let path = report.save(&self.ctx.config.state_dir)?;
        info!(
            "🏁 Run {} finished: {} encoded, {} copied, {} abandoned, {} missing (report: {})",
            run_id,
            report.encoded,
            report.copied,
            report.abandoned.len(),
            report.missing.len(),
            path.display()
        );
        Ok(report)
    }

    /// Total up tracked video sizes and credit outputs that already exist
    fn seed_progress(&mut self, inventory: &Inventory) -> Result<()> {
        let source_root = &self.ctx.roots.source;
        let mut video_count = 0usize;
        let mut total = 0u64;
        let mut seeded_source = 0u64;
        let mut seeded_encoded = 0u64;

        for record in &inventory.records {
            let rel = record.relative();
            if !self.ctx.resolver.is_video(&rel) {
                continue;
            }
            let Ok(meta) = std::fs::metadata(record.source_path(source_root)) else {
                continue;
            };
            video_count += 1;
            total += meta.len();

            if let Ok(target) = std::fs::metadata(self.ctx.resolver.resolve_relative(&rel)) {
                seeded_source += meta.len();
                seeded_encoded += target.len();
            }
        }

        if video_count > 0 && total == 0 {
            return Err(PreconditionError::UndeterminableSourceSize { video_count }.into());
        }

        let progress = &mut self.ctx.progress;
        progress.set_total_video_source_bytes(total);
        if seeded_source > 0 {
            progress.update(seeded_source, seeded_encoded);
        }
        info!(
            "{} tracked video(s), {} of source video",
            video_count,
            format_size(total, DECIMAL)
        );
        progress.log_progress();
        Ok(())
    }

    /// Records still lacking a target whose source is present, plus the
    /// count of records already complete
    fn select_pending(&self, inventory: &Inventory) -> (Vec<SourceFileRecord>, usize) {
        let mut pending = Vec::new();
        let mut complete = 0;

        for record in &inventory.records {
            let target = self.ctx.resolver.resolve_relative(&record.relative());
            if target.exists() {
                complete += 1;
                continue;
            }
            if !record.source_path(&self.ctx.roots.source).exists() {
                debug!("Not selecting {}: source missing", record.relative_path);
                continue;
            }
            pending.push(record.clone());
        }
        (pending, complete)
    }

    /// Prune empty folders in the backup and staging roots; never the source
    fn prune(&self) -> usize {
        let roots = &self.ctx.roots;
        [&roots.backup, &roots.staging_input, &roots.staging_output]
            .into_iter()
            .map(|root| match prune_empty_directories(root) {
                Ok(n) => n,
                Err(e) => {
                    warn!("Cleanup of {} failed: {:#}", root.display(), e);
                    0
                }
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchiveConfig, TransferSettings};
    use crate::context::Roots;
    use crate::encoder::{StageHandle, StageMethod};
    use chrono::Local;
    use tempfile::TempDir;

    /// Copies the input straight to the output folder as `<stem>.mp4`
    struct PassthroughEncoder {
        input: PathBuf,
        output: PathBuf,
        staged: usize,
    }

    impl EncoderAdapter for PassthroughEncoder {
        async fn stage_input(&mut self, source: &Path) -> Result<StageHandle> {
            self.staged += 1;
            let staged = self.input.join(source.file_name().unwrap());
            std::fs::copy(source, &staged)?;
            let base_name = source.file_stem().unwrap().to_string_lossy().into_owned();
            std::fs::copy(&staged, self.output.join(format!("{}.mp4", base_name)))?;
            Ok(StageHandle {
                original: source.to_path_buf(),
                staged,
                method: StageMethod::Copied,
                base_name,
                output_extension: "mp4".to_string(),
                staged_at: Local::now().naive_local(),
                size: std::fs::metadata(source)?.len(),
                outputs_before: Vec::new(),
            })
        }

        async fn poll_output(&self, handle: &StageHandle) -> Result<Option<PathBuf>> {
            let p = self.output.join(format!("{}.mp4", handle.base_name));
            Ok(p.exists().then_some(p))
        }
    }

    fn archiver(dir: &Path) -> Archiver<PassthroughEncoder> {
        let src = dir.join("Shoot");
        std::fs::create_dir_all(&src).unwrap();
        let mut cfg = ArchiveConfig::default_config();
        cfg.state_dir = dir.join("state");
        cfg.staging_input_root = dir.join("in");
        cfg.staging_output_root = dir.join("out");
        cfg.poll_interval_ms = 5;
        cfg.output_stability_ms = 5;
        cfg.output_timeout_secs = 2;
        cfg.transfer = TransferSettings { max_attempts: 2, retry_delay_ms: 5, stability_wait_ms: 5 };
        let roots = Roots::prepare(&src, &dir.join("backups"), &cfg).unwrap();
        let encoder = PassthroughEncoder {
            input: roots.staging_input.clone(),
            output: roots.staging_output.clone(),
            staged: 0,
        };
        Archiver::new(RunContext::new(roots, cfg).unwrap(), encoder)
    }

    #[tokio::test]
    async fn test_second_run_processes_nothing() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("Shoot");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("A.mov"), vec![1u8; 64]).unwrap();
        std::fs::write(src.join("sub/notes.txt"), b"n").unwrap();

        let mut first = archiver(dir.path());
        let report = first.run().await.unwrap();
        assert_eq!(report.encoded, 1);
        assert_eq!(report.copied, 1);
        assert!(report.is_complete());

        let mut second = archiver(dir.path());
        let report = second.run().await.unwrap();
        assert_eq!(report.attempted(), 0);
        assert_eq!(report.already_complete, 2);
        assert_eq!(second.encoder().staged, 0);
    }

    #[tokio::test]
    async fn test_zero_byte_videos_are_fatal() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("Shoot");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("A.mov"), b"").unwrap();

        let err = archiver(dir.path()).run().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreconditionError>(),
            Some(PreconditionError::UndeterminableSourceSize { video_count: 1 })
        ));
    }

    #[tokio::test]
    async fn test_report_is_persisted() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("Shoot")).unwrap();
        std::fs::write(dir.path().join("Shoot/readme.txt"), b"r").unwrap();

        let report = archiver(dir.path()).run().await.unwrap();
        let path = dir.path().join("state/reports").join(format!("{}.json", report.run_id));
        let saved: RunReport = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(saved.run_id, report.run_id);
        assert_eq!(saved.copied, 1);
        assert_eq!(saved.missing, report.missing);
        assert_eq!(saved.progress.ledger, report.progress.ledger);
    }
}
