pub mod config;
pub mod error;
pub mod resolver;
pub mod platform;
pub mod stability;
pub mod transfer;
pub mod inventory;
pub mod error_log;
pub mod encoder;
pub mod progress;
pub mod cleanup;
pub mod audit;
pub mod context;
pub mod orchestrator;
pub mod recovery;
pub mod pipeline;

pub use config::{ArchiveConfig, TransferSettings};
pub use error::PreconditionError;
pub use resolver::{ExtensionSet, TargetResolver};
pub use transfer::{TransferAttempt, TransferEngine};
pub use inventory::{Inventory, SourceFileRecord};
pub use encoder::{EncoderAdapter, StageHandle, StageMethod, WatchFolderEncoder};
pub use error_log::ErrorLog;
pub use progress::{ProgressEstimator, ProgressLedger};
pub use context::{Roots, RunContext};
pub use orchestrator::{FileOutcome, StagingState};
pub use pipeline::{Archiver, RunReport};
