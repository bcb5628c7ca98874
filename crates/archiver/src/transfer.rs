use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::config::TransferSettings;
use crate::platform;
use crate::stability::{check_stability, StabilityResult};

/// Suffix for in-flight copies; a file carrying it is never a finished artifact
pub const PART_SUFFIX: &str = ".part";

/// Whether the source survives the transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Move,
    Copy,
}

impl TransferMode {
    fn verb(self) -> &'static str {
        match self {
            TransferMode::Move => "move",
            TransferMode::Copy => "copy",
        }
    }
}

/// State of one in-flight transfer, dropped on success or exhaustion
#[derive(Debug, Clone)]
pub struct TransferAttempt {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub attempts_remaining: u32,
    pub last_observed_size: Option<u64>,
    pub last_observed_lock_state: Option<bool>,
}

impl TransferAttempt {
    fn new(source: &Path, destination: &Path, max_attempts: u32) -> Self {
        Self {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            attempts_remaining: max_attempts,
            last_observed_size: None,
            last_observed_lock_state: None,
        }
    }
}

/// Why a single attempt did not go through
#[derive(Debug)]
enum AttemptBlocked {
    /// Source vanished; nothing left to retry
    SourceMissing,
    Locked,
    Unstable { initial_size: u64, current_size: u64 },
    Failed(anyhow::Error),
}

/// `<dest>.part`, the staging name used by atomic copies
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

pub fn is_part_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(PART_SUFFIX))
        .unwrap_or(false)
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Copy `src` to `dest` through `<dest>.part` so a crash never leaves a
/// truncated file at `dest`
pub async fn copy_atomic(src: &Path, dest: &Path) -> Result<u64> {
    ensure_parent(dest).await?;
    let part = part_path(dest);

    let copied = match tokio::fs::copy(src, &part).await {
        Ok(n) => n,
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e).with_context(|| {
                format!("Failed to copy {} to {}", src.display(), part.display())
            });
        }
    };

    if let Err(e) = tokio::fs::rename(&part, dest).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e).with_context(|| {
            format!("Failed to rename {} into place at {}", part.display(), dest.display())
        });
    }

    Ok(copied)
}

/// Rename `src` to `dest`, falling back to copy + remove across volumes.
///
/// Once the copy has landed the move counts as done, even if the source
/// cannot be removed afterwards.
pub async fn move_file(src: &Path, dest: &Path) -> Result<()> {
    ensure_parent(dest).await?;

    match tokio::fs::rename(src, dest).await {
        Ok(()) => Ok(()),
        Err(e) if platform::is_cross_device_rename_error(&e) => {
            debug!(
                "{} and {} are on different volumes, copying instead",
                src.display(),
                dest.display()
            );
            copy_atomic(src, dest).await?;
            if let Err(e) = tokio::fs::remove_file(src).await {
                warn!(
                    "Copied {} to {} but the source is still there: {}",
                    src.display(),
                    dest.display(),
                    e
                );
            }
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to rename {} to {}", src.display(), dest.display())),
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Moves and copies single files under a retry policy
#[derive(Debug, Clone)]
pub struct TransferEngine {
    settings: TransferSettings,
}

impl TransferEngine {
    pub fn new(settings: TransferSettings) -> Self {
        Self { settings }
    }

    /// Move `source` to `destination`, retrying transient failures.
    ///
    /// Returns `false` if the source disappears or all attempts are spent;
    /// the caller is expected to carry on with other files.
    pub async fn move_with_retry(&self, source: &Path, destination: &Path) -> bool {
        self.transfer_with_retry(source, destination, TransferMode::Move).await
    }

    /// Copy `source` to `destination` under the same preconditions as a move
    pub async fn copy_with_retry(&self, source: &Path, destination: &Path) -> bool {
        self.transfer_with_retry(source, destination, TransferMode::Copy).await
    }

    async fn transfer_with_retry(&self, source: &Path, destination: &Path, mode: TransferMode) -> bool {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = TransferAttempt::new(source, destination, max_attempts);
        let retry_delay = Duration::from_millis(self.settings.retry_delay_ms);

        while attempt.attempts_remaining > 0 {
            let attempt_no = max_attempts - attempt.attempts_remaining + 1;
            attempt.attempts_remaining -= 1;

            match self.try_once(&mut attempt, mode).await {
                Ok(()) => {
                    if exists(destination).await {
                        debug!(
                            "Transfer ({}) {} -> {} succeeded on attempt {}",
                            mode.verb(),
                            source.display(),
                            destination.display(),
                            attempt_no
                        );
                        return true;
                    }
                    warn!(
                        "Transfer ({}) reported success but {} is absent (attempt {}/{})",
                        mode.verb(),
                        destination.display(),
                        attempt_no,
                        max_attempts
                    );
                }
                Err(AttemptBlocked::SourceMissing) => {
                    warn!(
                        "Source {} no longer exists, giving up {} (attempt {}/{})",
                        source.display(),
                        mode.verb(),
                        attempt_no,
                        max_attempts
                    );
                    return false;
                }
                Err(AttemptBlocked::Locked) => {
                    info!(
                        "Source {} is locked by another process (attempt {}/{})",
                        source.display(),
                        attempt_no,
                        max_attempts
                    );
                }
                Err(AttemptBlocked::Unstable { initial_size, current_size }) => {
                    info!(
                        "Source {} still changing: {} -> {} bytes (attempt {}/{})",
                        source.display(),
                        initial_size,
                        current_size,
                        attempt_no,
                        max_attempts
                    );
                }
                Err(AttemptBlocked::Failed(e)) => {
                    warn!(
                        "Transfer ({}) {} -> {} failed (attempt {}/{}, last size {:?}): {:#}",
                        mode.verb(),
                        source.display(),
                        destination.display(),
                        attempt_no,
                        max_attempts,
                        attempt.last_observed_size,
                        e
                    );
                }
            }

            if attempt.attempts_remaining > 0 {
                tokio::time::sleep(retry_delay).await;
            }
        }

        warn!(
            "❌ Giving up on {} after {} attempts (last size {:?}, locked {:?})",
            source.display(),
            max_attempts,
            attempt.last_observed_size,
            attempt.last_observed_lock_state
        );
        false
    }

    async fn try_once(&self, attempt: &mut TransferAttempt, mode: TransferMode) -> Result<(), AttemptBlocked> {
        if !exists(&attempt.source).await {
            return Err(AttemptBlocked::SourceMissing);
        }

        let locked = platform::is_locked(&attempt.source);
        attempt.last_observed_lock_state = Some(locked);
        if locked {
            return Err(AttemptBlocked::Locked);
        }

        let wait = Duration::from_millis(self.settings.stability_wait_ms);
        match check_stability(&attempt.source, wait).await {
            Ok(StabilityResult::Stable { size }) => attempt.last_observed_size = Some(size),
            Ok(StabilityResult::Unstable { initial_size, current_size }) => {
                attempt.last_observed_size = Some(current_size);
                return Err(AttemptBlocked::Unstable { initial_size, current_size });
            }
            Ok(StabilityResult::Empty) => attempt.last_observed_size = Some(0),
            Err(e) => {
                if !exists(&attempt.source).await {
                    return Err(AttemptBlocked::SourceMissing);
                }
                return Err(AttemptBlocked::Failed(anyhow::Error::new(e).context(format!(
                    "Failed to stat {}",
                    attempt.source.display()
                ))));
            }
        }

        let result = match mode {
            TransferMode::Move => move_file(&attempt.source, &attempt.destination).await,
            TransferMode::Copy => copy_atomic(&attempt.source, &attempt.destination).await.map(|_| ()),
        };
        result.map_err(AttemptBlocked::Failed)
    }
}
