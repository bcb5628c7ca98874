use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::encoder::{EncoderAdapter, StageHandle, StageMethod};
use crate::inventory::SourceFileRecord;
use crate::stability::{check_output_stability, StabilityResult};
use crate::transfer::TransferEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagingState {
    Idle,
    Staged,
    WaitingForOutput,
    OutputStable,
    Restoring,
    Done,
    ErrorDetected,
    Abandoned,
}

impl fmt::Display for StagingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How one file ended up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FileOutcome {
    /// Non-video copied verbatim
    Copied { source: PathBuf, target: PathBuf },
    /// Video encoded and its artifact placed at the target
    Encoded {
        source: PathBuf,
        target: PathBuf,
        source_bytes: u64,
        encoded_bytes: u64,
    },
    /// Skipped for this run; a later run will pick it up again
    Abandoned {
        source: PathBuf,
        reason: String,
        last_state: StagingState,
    },
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, FileOutcome::Abandoned { .. })
    }
}

struct Machine<'a> {
    source: &'a Path,
    state: StagingState,
}

impl Machine<'_> {
    fn advance(&mut self, next: StagingState) {
        debug!("{}: {} -> {}", self.source.display(), self.state, next);
        self.state = next;
    }

    fn abandon(&mut self, reason: String) -> FileOutcome {
        let last_state = self.state;
        self.advance(StagingState::Abandoned);
        warn!("❌ Abandoned {} in state {}: {}", self.source.display(), last_state, reason);
        FileOutcome::Abandoned {
            source: self.source.to_path_buf(),
            reason,
            last_state,
        }
    }
}

/// Drive one tracked file to `Done` or `Abandoned`.
///
/// Never returns an error: every failure is folded into the outcome so the
/// caller can move on to the next file.
pub async fn process_file<E: EncoderAdapter>(
    ctx: &mut RunContext,
    encoder: &mut E,
    record: &SourceFileRecord,
) -> FileOutcome {
    let source = record.source_path(&ctx.roots.source);
    let target = ctx.resolver.resolve_relative(&record.relative());

    if ctx.resolver.is_video(&source) {
        process_video(ctx, encoder, &source, &target).await
    } else {
        copy_verbatim(&ctx.transfer, &source, &target).await
    }
}

async fn copy_verbatim(transfer: &TransferEngine, source: &Path, target: &Path) -> FileOutcome {
    let mut machine = Machine { source, state: StagingState::Idle };

    if transfer.copy_with_retry(source, target).await {
        machine.advance(StagingState::Done);
        info!("📄 Copied {} -> {}", source.display(), target.display());
        FileOutcome::Copied {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
        }
    } else {
        machine.abandon(format!("copy to {} failed", target.display()))
    }
}

async fn process_video<E: EncoderAdapter>(
    ctx: &mut RunContext,
    encoder: &mut E,
    source: &Path,
    target: &Path,
) -> FileOutcome {
    let mut machine = Machine { source, state: StagingState::Idle };
    info!("🎬 Processing {}", source.display());

    // Idle -> Staged
    let handle = match encoder.stage_input(source).await {
        Ok(h) => h,
        Err(e) => return machine.abandon(format!("staging failed: {:#}", e)),
    };
    machine.advance(StagingState::Staged);

    // Staged -> WaitingForOutput
    let started = Instant::now();
    machine.advance(StagingState::WaitingForOutput);

    let (artifact, encoded_bytes) = match wait_for_output(ctx, encoder, &handle, started).await {
        Ok(found) => {
            machine.advance(StagingState::OutputStable);
            found
        }
        Err(reason) => {
            machine.advance(StagingState::ErrorDetected);
            restore_original(&ctx.transfer, &handle).await;
            return machine.abandon(reason);
        }
    };

    // OutputStable -> Restoring
    machine.advance(StagingState::Restoring);
    let placed = ctx.transfer.move_with_retry(&artifact, target).await;
    restore_original(&ctx.transfer, &handle).await;

    if !placed {
        return machine.abandon(format!(
            "could not move output {} to {}",
            artifact.display(),
            target.display()
        ));
    }

    let encoded_bytes = std::fs::metadata(target).map(|m| m.len()).unwrap_or(encoded_bytes);
    ctx.progress.update(handle.size, encoded_bytes);
    machine.advance(StagingState::Done);
    info!(
        "✅ {} -> {} ({} -> {} bytes, {:.1}s)",
        source.display(),
        target.display(),
        handle.size,
        encoded_bytes,
        started.elapsed().as_secs_f64()
    );

    FileOutcome::Encoded {
        source: source.to_path_buf(),
        target: target.to_path_buf(),
        source_bytes: handle.size,
        encoded_bytes,
    }
}

/// Poll until a stable artifact appears, the encoder reports a failure, or
/// the timeout runs out. Guards are checked in that order on every round.
async fn wait_for_output<E: EncoderAdapter>(
    ctx: &RunContext,
    encoder: &E,
    handle: &StageHandle,
    started: Instant,
) -> Result<(PathBuf, u64), String> {
    let cfg = &ctx.config;
    let timeout = cfg.output_timeout();

    loop {
        match encoder.poll_error(handle).await {
            Ok(Some(entry)) => {
                error!(
                    "Encoder reported failure for {} at {}",
                    handle.staged.display(),
                    entry.timestamp
                );
                return Err(format!("encoder error logged at {}", entry.timestamp));
            }
            Ok(None) => {}
            Err(e) => warn!("Could not check encoder error log: {:#}", e),
        }

        match encoder.poll_output(handle).await {
            Ok(Some(candidate)) => {
                match check_output_stability(&candidate, cfg.output_stability_samples, cfg.output_stability_interval()).await {
                    Ok(StabilityResult::Stable { size }) => {
                        debug!("Output {} stable at {} bytes", candidate.display(), size);
                        return Ok((candidate, size));
                    }
                    Ok(StabilityResult::Unstable { initial_size, current_size }) => debug!(
                        "Output {} still growing ({} -> {} bytes)",
                        candidate.display(),
                        initial_size,
                        current_size
                    ),
                    Ok(StabilityResult::Empty) => debug!("Output {} is still empty", candidate.display()),
                    Err(e) => debug!("Output {} vanished while sampling: {}", candidate.display(), e),
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Could not poll encoder output: {:#}", e),
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(format!(
                "no stable output for {} after {}s",
                handle.base_name,
                elapsed.as_secs()
            ));
        }

        tokio::time::sleep(cfg.poll_interval()).await;
    }
}

/// Put the source tree back the way it was before staging.
///
/// Failures are logged only: by the time this runs the backup either exists
/// or the file is being abandoned anyway.
async fn restore_original(transfer: &TransferEngine, handle: &StageHandle) {
    match handle.method {
        StageMethod::Copied => match tokio::fs::remove_file(&handle.staged).await {
            Ok(()) => debug!("Removed staged copy {}", handle.staged.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Staged copy already gone: {}", handle.staged.display())
            }
            Err(e) => warn!("Failed to remove staged copy {}: {}", handle.staged.display(), e),
        },
        StageMethod::Moved => {
            if transfer.move_with_retry(&handle.staged, &handle.original).await {
                debug!("Returned {} to {}", handle.staged.display(), handle.original.display());
            } else {
                error!(
                    "Failed to return original to {}; it remains at {}",
                    handle.original.display(),
                    handle.staged.display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchiveConfig, TransferSettings};
    use crate::context::Roots;
    use crate::encoder::WatchFolderEncoder;
    use crate::error_log::ErrorEntry;
    use anyhow::Result;
    use chrono::Local;
    use tempfile::TempDir;

    /// Encoder double: stages by move and writes its output immediately
    struct InstantEncoder {
        output_root: PathBuf,
        fail: bool,
        produce: bool,
    }

    impl EncoderAdapter for InstantEncoder {
        async fn stage_input(&mut self, source: &Path) -> Result<StageHandle> {
            let staged = source.with_extension("staged");
            std::fs::rename(source, &staged)?;
            let base_name = source.file_stem().unwrap().to_string_lossy().into_owned();
            if self.produce {
                std::fs::write(self.output_root.join(format!("{}.mp4", base_name)), b"encoded")?;
            }
            Ok(StageHandle {
                original: source.to_path_buf(),
                staged,
                method: StageMethod::Moved,
                base_name,
                output_extension: "mp4".to_string(),
                staged_at: Local::now().naive_local(),
                size: 100,
                outputs_before: Vec::new(),
            })
        }

        async fn poll_output(&self, handle: &StageHandle) -> Result<Option<PathBuf>> {
            let p = self.output_root.join(format!("{}.mp4", handle.base_name));
            Ok(p.exists().then_some(p))
        }

        async fn poll_error(&self, handle: &StageHandle) -> Result<Option<ErrorEntry>> {
            Ok(self.fail.then(|| ErrorEntry {
                timestamp: handle.staged_at,
                text: "boom".to_string(),
            }))
        }
    }

    fn context(dir: &Path) -> RunContext {
        let src = dir.join("Shoot");
        std::fs::create_dir_all(&src).unwrap();
        let mut cfg = ArchiveConfig::default_config();
        cfg.state_dir = dir.join("state");
        cfg.staging_input_root = dir.join("in");
        cfg.staging_output_root = dir.join("out");
        cfg.poll_interval_ms = 5;
        cfg.output_stability_ms = 5;
        cfg.output_timeout_secs = 1;
        cfg.transfer = TransferSettings { max_attempts: 2, retry_delay_ms: 5, stability_wait_ms: 5 };
        let roots = Roots::prepare(&src, &dir.join("backups"), &cfg).unwrap();
        RunContext::new(roots, cfg).unwrap()
    }

    fn encoder(ctx: &RunContext, fail: bool, produce: bool) -> InstantEncoder {
        InstantEncoder { output_root: ctx.roots.staging_output.clone(), fail, produce }
    }

    fn record(name: &str) -> SourceFileRecord {
        SourceFileRecord { relative_path: name.to_string() }
    }

    #[tokio::test]
    async fn test_video_happy_path() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(dir.path());
        let src = ctx.roots.source.join("A.mov");
        std::fs::write(&src, vec![0u8; 100]).unwrap();
        let mut enc = encoder(&ctx, false, true);

        let outcome = process_file(&mut ctx, &mut enc, &record("A.mov")).await;

        let target = ctx.roots.backup.join("A.mp4");
        assert!(matches!(outcome, FileOutcome::Encoded { encoded_bytes: 7, .. }));
        assert_eq!(std::fs::read(&target).unwrap(), b"encoded");
        assert!(src.exists(), "original must be restored");
        assert_eq!(ctx.progress.ledger().cumulative_source_bytes_consumed, 100);
        assert_eq!(ctx.progress.ledger().cumulative_encoded_bytes_produced, 7);
    }

    #[tokio::test]
    async fn test_error_log_abandons_and_restores() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(dir.path());
        let src = ctx.roots.source.join("A.mov");
        std::fs::write(&src, b"x").unwrap();
        let mut enc = encoder(&ctx, true, false);

        let outcome = process_file(&mut ctx, &mut enc, &record("A.mov")).await;

        assert!(matches!(
            outcome,
            FileOutcome::Abandoned { last_state: StagingState::ErrorDetected, .. }
        ));
        assert!(src.exists());
        assert!(!ctx.roots.backup.join("A.mp4").exists());
    }

    #[tokio::test]
    async fn test_timeout_abandons() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(dir.path());
        let src = ctx.roots.source.join("A.mov");
        std::fs::write(&src, b"x").unwrap();
        let mut enc = encoder(&ctx, false, false);

        let outcome = process_file(&mut ctx, &mut enc, &record("A.mov")).await;

        match outcome {
            FileOutcome::Abandoned { reason, .. } => assert!(reason.contains("no stable output")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_stale_tagged_output_is_not_taken() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(dir.path());
        std::fs::write(ctx.roots.source.join("Clip.mov"), vec![0u8; 64]).unwrap();
        std::fs::write(ctx.roots.staging_output.join("Clip_2.mp4"), b"output of Clip_2").unwrap();
        let mut enc = WatchFolderEncoder::new(
            &ctx.roots.staging_input,
            &ctx.roots.staging_output,
            "mp4",
            None,
        );

        let outcome = process_file(&mut ctx, &mut enc, &record("Clip.mov")).await;

        assert!(matches!(
            outcome,
            FileOutcome::Abandoned { last_state: StagingState::ErrorDetected, .. }
        ));
        assert!(!ctx.roots.backup.join("Clip.mp4").exists());
        assert!(ctx.roots.staging_output.join("Clip_2.mp4").exists());
        assert!(ctx.roots.source.join("Clip.mov").exists());
    }

    #[tokio::test]
    async fn test_non_video_copied() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(dir.path());
        std::fs::create_dir_all(ctx.roots.source.join("docs")).unwrap();
        std::fs::write(ctx.roots.source.join("docs/notes.txt"), b"n").unwrap();
        let mut enc = encoder(&ctx, false, false);

        let outcome = process_file(&mut ctx, &mut enc, &record("docs/notes.txt")).await;

        assert!(matches!(outcome, FileOutcome::Copied { .. }));
        assert!(ctx.roots.backup.join("docs").join("notes.txt").exists());
        assert!(ctx.roots.source.join("docs/notes.txt").exists());
    }

    #[tokio::test]
    async fn test_stage_failure_abandons() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(dir.path());
        let mut enc = encoder(&ctx, false, true);

        // source never created, so staging fails
        let outcome = process_file(&mut ctx, &mut enc, &record("ghost.mov")).await;
        assert!(matches!(outcome, FileOutcome::Abandoned { last_state: StagingState::Idle, .. }));
    }
}
