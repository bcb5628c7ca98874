use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreconditionError {
    /// The source root is missing, unreadable, or not a directory
    #[error("Source root unavailable: {path}: {reason}")]
    SourceRootUnavailable { path: PathBuf, reason: String },

    /// Videos are tracked but their total size could not be determined or is zero
    #[error("Could not determine a nonzero total size for {video_count} tracked video file(s)")]
    UndeterminableSourceSize { video_count: usize },

    /// A persisted inventory exists but cannot be parsed
    #[error("Inventory file unreadable: {path}: {reason}")]
    InventoryUnreadable { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_path() {
        let err = PreconditionError::SourceRootUnavailable {
            path: PathBuf::from("/mnt/card"),
            reason: "not found".to_string(),
        };
        assert!(err.to_string().contains("/mnt/card"));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = PreconditionError::UndeterminableSourceSize { video_count: 3 }.into();
        assert!(matches!(
            err.downcast_ref::<PreconditionError>(),
            Some(PreconditionError::UndeterminableSourceSize { video_count: 3 })
        ));
    }
}
