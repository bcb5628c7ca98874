use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use log::debug;

/// Best-effort check whether another process holds `path` open.
///
/// Any failure to open is reported as locked, never as an error. This only
/// detects locks held by other processes; it says nothing about intent.
#[cfg(windows)]
pub fn is_locked(path: &Path) -> bool {
    use std::os::windows::fs::OpenOptionsExt;

    match OpenOptions::new().read(true).write(true).share_mode(0).open(path) {
        Ok(_) => false,
        Err(e) => {
            debug!("Lock probe failed for {}: {}", path.display(), e);
            true
        }
    }
}

/// Best-effort check whether another process holds `path` open.
///
/// Unix has no mandatory share modes, so this reduces to "can it be opened
/// for read-write right now". Read-only files fall back to a read open.
#[cfg(not(windows))]
pub fn is_locked(path: &Path) -> bool {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(_) => false,
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            match OpenOptions::new().read(true).open(path) {
                Ok(_) => false,
                Err(e) => {
                    debug!("Lock probe (read) failed for {}: {}", path.display(), e);
                    true
                }
            }
        }
        Err(e) => {
            debug!("Lock probe failed for {}: {}", path.display(), e);
            true
        }
    }
}

/// Whether a rename failed only because source and destination are on different volumes
pub fn is_cross_device_rename_error(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(18) // EXDEV
    }
    #[cfg(windows)]
    {
        e.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = e;
        false
    }
}

/// Closest ancestor of `path` (or itself) that exists
fn existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors().find(|p| !p.as_os_str().is_empty() && p.exists()).map(Path::to_path_buf)
}

/// Whether two paths live on the same volume, so a rename between them is atomic.
///
/// Paths that don't exist yet are judged by their nearest existing ancestor.
/// Unknown is answered with `false`, which makes callers copy instead of move.
#[cfg(unix)]
pub fn same_volume(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let dev = |p: &Path| -> io::Result<u64> {
        let existing = existing_ancestor(p)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no existing ancestor"))?;
        Ok(std::fs::metadata(existing)?.dev())
    };

    match (dev(a), dev(b)) {
        (Ok(da), Ok(db)) => da == db,
        _ => false,
    }
}

#[cfg(windows)]
pub fn same_volume(a: &Path, b: &Path) -> bool {
    use std::path::Component;

    let prefix = |p: &Path| -> Option<String> {
        let abs = existing_ancestor(p).and_then(|e| e.canonicalize().ok())?;
        match abs.components().next() {
            Some(Component::Prefix(prefix)) => {
                Some(prefix.as_os_str().to_string_lossy().to_lowercase())
            }
            _ => None,
        }
    };

    match (prefix(a), prefix(b)) {
        (Some(pa), Some(pb)) => pa == pb,
        _ => false,
    }
}

#[cfg(not(any(unix, windows)))]
pub fn same_volume(_a: &Path, _b: &Path) -> bool {
    false
}
