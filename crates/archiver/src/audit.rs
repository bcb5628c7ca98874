use std::path::PathBuf;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::inventory::SourceFileRecord;
use crate::resolver::TargetResolver;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingTarget {
    pub source: PathBuf,
    pub expected_target: PathBuf,
}

/// Every record whose resolved target is absent from disk
pub fn audit(records: &[SourceFileRecord], resolver: &TargetResolver) -> Vec<MissingTarget> {
    let missing: Vec<MissingTarget> = records
        .iter()
        .filter_map(|record| {
            let expected_target = resolver.resolve_relative(&record.relative());
            if expected_target.exists() {
                None
            } else {
                Some(MissingTarget {
                    source: record.source_path(&resolver.source_root),
                    expected_target,
                })
            }
        })
        .collect();

    if missing.is_empty() {
        info!("✅ Audit: all {} tracked file(s) have a backup target", records.len());
    } else {
        for m in &missing {
            warn!(
                "Audit: missing backup for {} (expected {})",
                m.source.display(),
                m.expected_target.display()
            );
        }
        warn!("⚠️  Audit: {} of {} tracked file(s) missing a backup", missing.len(), records.len());
    }
    missing
}
