use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::info;

use crate::config::ArchiveConfig;
use crate::error::PreconditionError;
use crate::inventory::InventoryFilter;
use crate::progress::ProgressEstimator;
use crate::resolver::{backup_root_for, ExtensionSet, TargetResolver};
use crate::transfer::TransferEngine;

/// The four folders a run works between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roots {
    pub source: PathBuf,
    pub backup: PathBuf,
    pub staging_input: PathBuf,
    pub staging_output: PathBuf,
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

impl Roots {
    /// Resolve the source root, derive the backup root under `dest_parent`
    /// and make sure every writable root exists.
    ///
    /// Fails with a [`PreconditionError`] if the source cannot be used.
    pub fn prepare(source: &Path, dest_parent: &Path, cfg: &ArchiveConfig) -> Result<Self> {
        let source = source.canonicalize().map_err(|e| PreconditionError::SourceRootUnavailable {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !source.is_dir() {
            return Err(PreconditionError::SourceRootUnavailable {
                path: source,
                reason: "not a directory".to_string(),
            }
            .into());
        }

        create_dir(dest_parent)?;
        let dest_parent = dest_parent
            .canonicalize()
            .with_context(|| format!("Failed to resolve destination: {}", dest_parent.display()))?;
        let backup = backup_root_for(&dest_parent, &source, &cfg.backup_suffix);
        if backup.starts_with(&source) {
            return Err(PreconditionError::InvalidConfig(format!(
                "backup root {} lies inside source root {}",
                backup.display(),
                source.display()
            ))
            .into());
        }

        let roots = Self {
            source,
            backup,
            staging_input: cfg.staging_input_root.clone(),
            staging_output: cfg.staging_output_root.clone(),
        };
        create_dir(&roots.backup)?;
        create_dir(&roots.staging_input)?;
        create_dir(&roots.staging_output)?;
        create_dir(&cfg.state_dir)?;

        info!("Source root:    {}", roots.source.display());
        info!("Backup root:    {}", roots.backup.display());
        info!("Staging input:  {}", roots.staging_input.display());
        info!("Staging output: {}", roots.staging_output.display());
        Ok(roots)
    }
}

/// Everything a run needs, passed explicitly instead of living in globals
#[derive(Debug)]
pub struct RunContext {
    pub roots: Roots,
    pub config: ArchiveConfig,
    pub resolver: TargetResolver,
    pub filter: InventoryFilter,
    pub transfer: TransferEngine,
    pub progress: ProgressEstimator,
}

impl RunContext {
    pub fn new(roots: Roots, config: ArchiveConfig) -> Result<Self> {
        config.validate()?;

        let resolver = TargetResolver::new(
            &roots.source,
            &roots.backup,
            ExtensionSet::new(&config.video_extensions),
            &config.output_extension,
        );
        let filter = InventoryFilter::from_config(&config);
        let transfer = TransferEngine::new(config.transfer.clone());
        let progress = ProgressEstimator::new(0, config.default_compression_ratio);

        Ok(Self {
            roots,
            config,
            resolver,
            filter,
            transfer,
            progress,
        })
    }
}
