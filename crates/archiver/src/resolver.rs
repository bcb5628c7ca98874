use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Normalize an extension for comparison: trimmed, lowercase, no leading dot
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').trim().to_lowercase()
}

/// Case-insensitive set of file extensions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    exts: HashSet<String>,
}

impl ExtensionSet {
    pub fn new<I, S>(exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let exts = exts
            .into_iter()
            .map(|e| normalize_extension(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        Self { exts }
    }

    pub fn contains(&self, ext: &str) -> bool {
        self.exts.contains(&normalize_extension(ext))
    }

    /// Check whether a path's extension is in the set
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.contains(e))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.exts.is_empty()
    }
}

/// Backup root for a source tree: `<dest_parent>/<source folder name><suffix>`
pub fn backup_root_for(dest_parent: &Path, source_root: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = source_root
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("source"));
    name.push(suffix);
    dest_parent.join(name)
}

/// Path of `file` relative to `root`, falling back to the bare file name
/// when the file does not live under the root
pub fn relative_to(file: &Path, root: &Path) -> PathBuf {
    match file.strip_prefix(root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
        _ => file
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| file.to_path_buf()),
    }
}

/// Maps source files onto backup targets
#[derive(Debug, Clone)]
pub struct TargetResolver {
    pub(crate) source_root: PathBuf,
    backup_root: PathBuf,
    video_exts: ExtensionSet,
    output_ext: String,
}

impl TargetResolver {
    pub fn new(
        source_root: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
        video_exts: ExtensionSet,
        output_ext: &str,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            backup_root: backup_root.into(),
            video_exts,
            output_ext: normalize_extension(output_ext),
        }
    }

    pub fn is_video(&self, path: &Path) -> bool {
        self.video_exts.matches(path)
    }

    /// Expected backup path for an absolute source file
    pub fn resolve(&self, file: &Path) -> PathBuf {
        self.resolve_relative(&relative_to(file, &self.source_root))
    }

    /// Expected backup path for a path already relative to the source root
    pub fn resolve_relative(&self, relative: &Path) -> PathBuf {
        let mut rel = relative.to_path_buf();
        if self.video_exts.matches(&rel) {
            rel.set_extension(&self.output_ext);
        }
        self.backup_root.join(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn resolver() -> TargetResolver {
        TargetResolver::new(
            "/src/Shoot",
            "/dst/Shoot-265",
            ExtensionSet::new(["mov", ".MP4", " mxf "]),
            "mp4",
        )
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension(" .MOV "), "mov");
        assert_eq!(normalize_extension("mxf"), "mxf");
        assert_eq!(normalize_extension("."), "");
    }

    #[test]
    fn test_video_extension_rewritten() {
        let r = resolver();
        assert_eq!(
            r.resolve(Path::new("/src/Shoot/day1/A.MOV")),
            PathBuf::from("/dst/Shoot-265/day1/A.mp4")
        );
        assert_eq!(
            r.resolve(Path::new("/src/Shoot/clip.mxf")),
            PathBuf::from("/dst/Shoot-265/clip.mp4")
        );
    }

    #[test]
    fn test_non_video_preserved() {
        let r = resolver();
        assert_eq!(
            r.resolve(Path::new("/src/Shoot/notes.txt")),
            PathBuf::from("/dst/Shoot-265/notes.txt")
        );
        assert_eq!(
            r.resolve(Path::new("/src/Shoot/README")),
            PathBuf::from("/dst/Shoot-265/README")
        );
    }

    #[test]
    fn test_file_outside_root_uses_file_name() {
        let r = resolver();
        assert_eq!(
            r.resolve(Path::new("/elsewhere/B.mov")),
            PathBuf::from("/dst/Shoot-265/B.mp4")
        );
    }

    #[test]
    fn test_backup_root_for() {
        assert_eq!(
            backup_root_for(Path::new("/backups"), Path::new("/cards/Wedding"), "-265"),
            PathBuf::from("/backups/Wedding-265")
        );
    }

    // **Property: target resolution is deterministic and rewrites only video extensions**
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_resolve_deterministic(
            dir in "[a-zA-Z0-9_]{1,10}",
            stem in "[a-zA-Z0-9_]{1,12}",
            ext in prop_oneof![
                Just("mov"), Just("MOV"), Just("mp4"), Just("Mxf"),
                Just("txt"), Just("xml"), Just("wav"), Just("jpg"),
            ],
        ) {
            let r = resolver();
            let file = PathBuf::from(format!("/src/Shoot/{}/{}.{}", dir, stem, ext));
            let first = r.resolve(&file);
            let second = r.resolve(&file);
            prop_assert_eq!(&first, &second);

            let is_video = matches!(ext.to_lowercase().as_str(), "mov" | "mp4" | "mxf");
            let expected_ext = if is_video { "mp4".to_string() } else { ext.to_string() };
            let expected = PathBuf::from(format!("/dst/Shoot-265/{}/{}.{}", dir, stem, expected_ext));
            prop_assert_eq!(first, expected);
        }
    }
}
