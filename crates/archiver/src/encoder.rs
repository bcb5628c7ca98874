use std::path::{Path, PathBuf};
use std::time::SystemTime;
use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use log::{debug, info};

use crate::error_log::{ErrorEntry, ErrorLog};
use crate::platform;
use crate::resolver::normalize_extension;
use crate::transfer::{copy_atomic, is_part_file};

/// How the input reached the encoder's watch folder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMethod {
    /// Renamed on the same volume; the source path is now empty
    Moved,
    /// Copied across volumes; the source is untouched
    Copied,
}

/// Everything needed to find the output of one staged file and to undo the staging
#[derive(Debug, Clone)]
pub struct StageHandle {
    /// Where the file lived before staging
    pub original: PathBuf,
    /// Where the encoder sees it
    pub staged: PathBuf,
    pub method: StageMethod,
    /// File stem the output is expected to carry
    pub base_name: String,
    pub output_extension: String,
    /// Wall-clock stage time, comparable with error-log timestamps
    pub staged_at: NaiveDateTime,
    pub size: u64,
    /// Output folder contents just before staging, with modification times
    pub outputs_before: Vec<(PathBuf, SystemTime)>,
}

/// Operations the pipeline needs from an encoder
#[allow(async_fn_in_trait)]
pub trait EncoderAdapter {
    /// Hand `source` to the encoder
    async fn stage_input(&mut self, source: &Path) -> Result<StageHandle>;

    /// Path of the output artifact for `handle`, if one has appeared
    async fn poll_output(&self, handle: &StageHandle) -> Result<Option<PathBuf>>;

    /// A failure reported by the encoder for `handle` since it was staged
    async fn poll_error(&self, _handle: &StageHandle) -> Result<Option<ErrorEntry>> {
        Ok(None)
    }
}

/// Encoder driven through a pair of watch folders and an optional error log
#[derive(Debug, Clone)]
pub struct WatchFolderEncoder {
    input_root: PathBuf,
    output_root: PathBuf,
    output_extension: String,
    error_log: Option<ErrorLog>,
}

impl WatchFolderEncoder {
    pub fn new(
        input_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        output_extension: &str,
        error_log: Option<ErrorLog>,
    ) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            output_extension: normalize_extension(output_extension),
            error_log,
        }
    }
}

impl EncoderAdapter for WatchFolderEncoder {
    async fn stage_input(&mut self, source: &Path) -> Result<StageHandle> {
        let file_name = source
            .file_name()
            .with_context(|| format!("Source has no file name: {}", source.display()))?;
        let base_name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .with_context(|| format!("Source has no file stem: {}", source.display()))?;
        let size = tokio::fs::metadata(source)
            .await
            .with_context(|| format!("Failed to stat {}", source.display()))?
            .len();

        tokio::fs::create_dir_all(&self.input_root)
            .await
            .with_context(|| format!("Failed to create input folder: {}", self.input_root.display()))?;
        let staged = self.input_root.join(file_name);
        let outputs_before = self.list_outputs().await?;

        let staged_at = Local::now().naive_local();
        let method = if platform::same_volume(source, &self.input_root) {
            match tokio::fs::rename(source, &staged).await {
                Ok(()) => StageMethod::Moved,
                Err(e) => {
                    debug!("Rename into input folder failed ({}), copying instead", e);
                    copy_atomic(source, &staged).await?;
                    StageMethod::Copied
                }
            }
        } else {
            copy_atomic(source, &staged).await?;
            StageMethod::Copied
        };

        info!(
            "📥 Staged {} -> {} ({:?})",
            source.display(),
            staged.display(),
            method
        );

        Ok(StageHandle {
            original: source.to_path_buf(),
            staged,
            method,
            base_name,
            output_extension: self.output_extension.clone(),
            staged_at,
            size,
            outputs_before,
        })
    }

    async fn poll_output(&self, handle: &StageHandle) -> Result<Option<PathBuf>> {
        let candidates = self.list_outputs().await?;
        Ok(select_output(
            &candidates,
            &handle.outputs_before,
            &handle.base_name,
            &handle.output_extension,
        ))
    }

    async fn poll_error(&self, handle: &StageHandle) -> Result<Option<ErrorEntry>> {
        match &self.error_log {
            Some(log) => log.find_failure(&handle.staged, handle.staged_at),
            None => Ok(None),
        }
    }
}

impl WatchFolderEncoder {
    /// Regular files in the output folder with their modification times
    async fn list_outputs(&self) -> Result<Vec<(PathBuf, SystemTime)>> {
        let mut entries = match tokio::fs::read_dir(&self.output_root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to list output folder: {}", self.output_root.display()))
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to list output folder: {}", self.output_root.display()))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            names.push((entry.path(), modified));
        }
        Ok(names)
    }
}

/// Pick the output for `base_name` among `candidates`.
///
/// An exact stem match wins; otherwise the newest file whose stem starts
/// with `base_name` (encoders may append a preset tag). Extensions compare
/// case-insensitively and in-flight `.part` files are never chosen. A file
/// listed in `outputs_before` with the same modification time predates the
/// staging and is skipped.
pub fn select_output(
    candidates: &[(PathBuf, SystemTime)],
    outputs_before: &[(PathBuf, SystemTime)],
    base_name: &str,
    output_extension: &str,
) -> Option<PathBuf> {
    let base = base_name.to_lowercase();
    let ext = normalize_extension(output_extension);

    let matching: Vec<&(PathBuf, SystemTime)> = candidates
        .iter()
        .filter(|(p, _)| !is_part_file(p))
        .filter(|(p, modified)| !outputs_before.iter().any(|(bp, bm)| bp == p && bm == modified))
        .filter(|(p, _)| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| normalize_extension(e) == ext)
                .unwrap_or(false)
        })
        .collect();

    let stem = |p: &Path| p.file_stem().map(|s| s.to_string_lossy().to_lowercase());

    if let Some((p, _)) = matching.iter().find(|(p, _)| stem(p.as_path()).as_deref() == Some(base.as_str())) {
        return Some(p.clone());
    }

    matching
        .iter()
        .filter(|(p, _)| stem(p.as_path()).map(|s| s.starts_with(&base)).unwrap_or(false))
        .max_by_key(|(_, modified)| *modified)
        .map(|(p, _)| p.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn t(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_select_exact_match_first() {
        let c = vec![
            (PathBuf::from("/out/A_h265.mp4"), t(20)),
            (PathBuf::from("/out/A.MP4"), t(10)),
        ];
        assert_eq!(select_output(&c, &[], "A", "mp4"), Some(PathBuf::from("/out/A.MP4")));
    }

    #[test]
    fn test_select_prefix_newest() {
        let c = vec![
            (PathBuf::from("/out/A_1.mp4"), t(10)),
            (PathBuf::from("/out/A_2.mp4"), t(30)),
            (PathBuf::from("/out/B.mp4"), t(40)),
        ];
        assert_eq!(select_output(&c, &[], "a", ".mp4"), Some(PathBuf::from("/out/A_2.mp4")));
    }

    #[test]
    fn test_select_ignores_wrong_extension_and_parts() {
        let c = vec![
            (PathBuf::from("/out/A.mov"), t(10)),
            (PathBuf::from("/out/A.mp4.part"), t(10)),
        ];
        assert_eq!(select_output(&c, &[], "A", "mp4"), None);
    }

    #[test]
    fn test_select_skips_outputs_present_before_staging() {
        let before = vec![(PathBuf::from("/out/Clip_2.mp4"), t(10))];
        let c = vec![(PathBuf::from("/out/Clip_2.mp4"), t(10))];
        assert_eq!(select_output(&c, &before, "Clip", "mp4"), None);

        // rewritten after staging
        let c = vec![(PathBuf::from("/out/Clip_2.mp4"), t(50))];
        assert_eq!(select_output(&c, &before, "Clip", "mp4"), Some(PathBuf::from("/out/Clip_2.mp4")));
    }

    #[tokio::test]
    async fn test_poll_output_ignores_stale_artifacts() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("Clip.mov");
        std::fs::write(&src, b"video").unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("Clip_2.mp4"), b"left over from another file").unwrap();
        std::fs::write(out.join("Clip.mp4"), b"left over from an older run").unwrap();

        let mut enc = WatchFolderEncoder::new(dir.path().join("in"), &out, "mp4", None);
        let handle = enc.stage_input(&src).await.unwrap();
        assert_eq!(handle.outputs_before.len(), 2);
        assert_eq!(enc.poll_output(&handle).await.unwrap(), None);

        std::fs::write(out.join("Clip.mp4"), b"fresh").unwrap();
        std::fs::File::options()
            .write(true)
            .open(out.join("Clip.mp4"))
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();
        assert_eq!(enc.poll_output(&handle).await.unwrap(), Some(out.join("Clip.mp4")));
    }

    #[tokio::test]
    async fn test_stage_same_volume_moves() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src").join("A.mov");
        std::fs::create_dir_all(src.parent().unwrap()).unwrap();
        std::fs::write(&src, b"video").unwrap();

        let mut enc = WatchFolderEncoder::new(dir.path().join("in"), dir.path().join("out"), "mp4", None);
        let handle = enc.stage_input(&src).await.unwrap();

        assert_eq!(handle.method, StageMethod::Moved);
        assert_eq!(handle.base_name, "A");
        assert_eq!(handle.size, 5);
        assert!(!src.exists());
        assert!(handle.staged.exists());
    }

    #[tokio::test]
    async fn test_poll_output_finds_artifact() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("A.mov");
        std::fs::write(&src, b"video").unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();

        let mut enc = WatchFolderEncoder::new(dir.path().join("in"), &out, "mp4", None);
        let handle = enc.stage_input(&src).await.unwrap();
        assert_eq!(enc.poll_output(&handle).await.unwrap(), None);

        std::fs::write(out.join("A.mp4"), b"enc").unwrap();
        assert_eq!(enc.poll_output(&handle).await.unwrap(), Some(out.join("A.mp4")));
        assert!(enc.poll_error(&handle).await.unwrap().is_none());
    }
}
