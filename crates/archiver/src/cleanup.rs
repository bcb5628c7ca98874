use std::path::{Path, PathBuf};
use anyhow::Result;
use log::{debug, info, warn};
use walkdir::WalkDir;

/// Remove every empty directory strictly below `root`, deepest first.
///
/// A directory is removed only if it has no entries at the moment of
/// removal, so anything still holding a file survives. The root itself is
/// never removed. Returns how many directories were removed.
pub fn prune_empty_directories(root: &Path) -> Result<usize> {
    if !root.is_dir() {
        debug!("Prune skipped, not a directory: {}", root.display());
        return Ok(0);
    }

    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Error reading directory entry during prune: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();

    // Deepest first, so emptied children let their parents go in the same pass
    dirs.sort_by_key(|d| std::cmp::Reverse(d.as_os_str().len()));

    let mut removed = 0;
    for dir in dirs {
        let is_empty = match std::fs::read_dir(&dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) => {
                warn!("Cannot list {}: {}", dir.display(), e);
                continue;
            }
        };
        if !is_empty {
            continue;
        }
        match std::fs::remove_dir(&dir) {
            Ok(()) => {
                debug!("Removed empty directory: {}", dir.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove empty directory {}: {}", dir.display(), e),
        }
    }

    if removed > 0 {
        info!("🧹 Pruned {} empty director(ies) under {}", removed, root.display());
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_prunes_nested_empty_chain() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        fs::create_dir_all(dir.path().join("keep/x")).unwrap();
        fs::write(dir.path().join("keep/x/file.mp4"), b"1").unwrap();

        let removed = prune_empty_directories(dir.path()).unwrap();
        assert_eq!(removed, 3);
        assert!(!dir.path().join("a").exists());
        assert!(dir.path().join("keep/x/file.mp4").exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn test_idempotent() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        assert_eq!(prune_empty_directories(dir.path()).unwrap(), 2);
        assert_eq!(prune_empty_directories(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_missing_root_is_noop() {
        let dir = TempDir::new().unwrap();
        assert_eq!(prune_empty_directories(&dir.path().join("absent")).unwrap(), 0);
    }

    // **Property: a directory that transitively contains a file is never removed**
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_cleanup_safety(
            layout in proptest::collection::vec(
                (proptest::collection::vec("[a-c]", 1..4), any::<bool>()),
                1..8,
            ),
        ) {
            let dir = TempDir::new().unwrap();
            let mut files = Vec::new();
            for (segments, with_file) in &layout {
                let path = segments.iter().fold(dir.path().to_path_buf(), |p, s| p.join(s));
                fs::create_dir_all(&path).unwrap();
                if *with_file {
                    let f = path.join("keep.bin");
                    fs::write(&f, b"k").unwrap();
                    files.push(f);
                }
            }

            prune_empty_directories(dir.path()).unwrap();

            for f in &files {
                prop_assert!(f.exists(), "file removed: {:?}", f);
            }
            prop_assert!(dir.path().exists());
        }
    }
}
