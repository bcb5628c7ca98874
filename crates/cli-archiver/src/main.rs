use std::path::PathBuf;
use std::process::ExitCode;
use anyhow::{Context, Result};
use archiver::{
    config::ArchiveConfig,
    context::{Roots, RunContext},
    encoder::WatchFolderEncoder,
    error_log::ErrorLog,
    pipeline::Archiver,
    PreconditionError,
};
use clap::Parser;
use humansize::{format_size, DECIMAL};
use log::{error, info, warn};

/// Back up a source tree, routing video through an external watch-folder encoder
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source folder to back up
    #[arg(short, long)]
    source: PathBuf,

    /// Folder the backup root is created in
    #[arg(short, long)]
    dest: PathBuf,

    /// Encoder watch folder (overrides config)
    #[arg(long)]
    staging_input: Option<PathBuf>,

    /// Encoder output folder (overrides config)
    #[arg(long)]
    staging_output: Option<PathBuf>,

    /// Encoder error log to watch (overrides config)
    #[arg(long)]
    error_log: Option<PathBuf>,

    /// Directory for inventories and run reports (overrides config)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Seconds to wait for encoder output before abandoning a file (overrides config)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

fn build_config(args: &Args) -> Result<ArchiveConfig> {
    let mut cfg = ArchiveConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(p) = &args.staging_input {
        cfg.staging_input_root = p.clone();
    }
    if let Some(p) = &args.staging_output {
        cfg.staging_output_root = p.clone();
    }
    if let Some(p) = &args.error_log {
        cfg.encoder_error_log = Some(p.clone());
    }
    if let Some(p) = &args.state_dir {
        cfg.state_dir = p.clone();
    }
    if let Some(t) = args.timeout_secs {
        cfg.output_timeout_secs = t;
    }
    Ok(cfg)
}

async fn run(args: Args) -> Result<bool> {
    let cfg = build_config(&args)?;

    info!("Archiver starting");
    info!("Configuration loaded:");
    info!("  Video extensions: {:?}", cfg.video_extensions);
    info!("  Output extension: {}", cfg.output_extension);
    info!("  State dir: {}", cfg.state_dir.display());
    info!("  Output timeout: {}s", cfg.output_timeout_secs);
    match &cfg.encoder_error_log {
        Some(p) => info!("  Encoder error log: {}", p.display()),
        None => warn!("  No encoder error log configured; failures surface only as timeouts"),
    }

    let roots = Roots::prepare(&args.source, &args.dest, &cfg)?;
    let encoder = WatchFolderEncoder::new(
        &roots.staging_input,
        &roots.staging_output,
        &cfg.output_extension,
        cfg.encoder_error_log.clone().map(ErrorLog::new),
    );
    let ctx = RunContext::new(roots, cfg)?;

    let report = Archiver::new(ctx, encoder).run().await?;

    info!(
        "Backed up {} file(s) this run ({} encoded, {} copied); {} already complete",
        report.encoded + report.copied,
        report.encoded,
        report.copied,
        report.already_complete
    );
    info!(
        "Encoded so far: {} (ratio {:.3}, {:.1}% of projected {})",
        format_size(report.progress.ledger.cumulative_encoded_bytes_produced, DECIMAL),
        report.progress.ratio,
        report.progress.percent,
        format_size(report.progress.projected_final_bytes as u64, DECIMAL)
    );
    for a in &report.abandoned {
        warn!("Abandoned: {} ({})", a.source.display(), a.reason);
    }
    if !report.is_complete() {
        warn!(
            "⚠️  {} file(s) still lack a backup; run again to retry them",
            report.missing.len()
        );
    }

    Ok(report.is_complete())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(args.verbose);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            if let Some(pre) = e.downcast_ref::<PreconditionError>() {
                error!("❌ Precondition failed, nothing was processed: {}", pre);
            } else {
                error!("❌ Run failed: {:#}", e);
            }
            ExitCode::from(2)
        }
    }
}
