use humansize::{format_size, DECIMAL};
use log::info;
use serde::{Deserialize, Serialize};

/// Running totals for the current process; never persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressLedger {
    pub cumulative_source_bytes_consumed: u64,
    pub cumulative_encoded_bytes_produced: u64,
}

/// Point-in-time view of the estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub ratio: f64,
    pub projected_final_bytes: f64,
    pub percent: f64,
    pub ledger: ProgressLedger,
}

#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    ledger: ProgressLedger,
    total_video_source_bytes: u64,
    default_ratio: f64,
}

impl ProgressEstimator {
    pub fn new(total_video_source_bytes: u64, default_ratio: f64) -> Self {
        Self {
            ledger: ProgressLedger::default(),
            total_video_source_bytes,
            default_ratio,
        }
    }

    /// Record one completed file
    pub fn update(&mut self, source_bytes: u64, encoded_bytes: u64) {
        self.ledger.cumulative_source_bytes_consumed =
            self.ledger.cumulative_source_bytes_consumed.saturating_add(source_bytes);
        self.ledger.cumulative_encoded_bytes_produced =
            self.ledger.cumulative_encoded_bytes_produced.saturating_add(encoded_bytes);
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    pub fn set_total_video_source_bytes(&mut self, total: u64) {
        self.total_video_source_bytes = total;
    }

    /// Encoded / consumed, or the default before any data exists
    pub fn ratio(&self) -> f64 {
        if self.ledger.cumulative_source_bytes_consumed == 0 {
            return self.default_ratio;
        }
        self.ledger.cumulative_encoded_bytes_produced as f64
            / self.ledger.cumulative_source_bytes_consumed as f64
    }

    pub fn projected_final(&self) -> f64 {
        self.total_video_source_bytes as f64 * self.ratio()
    }

    /// Share of the projected backup already produced, clamped to 0..=100
    pub fn percent(&self) -> f64 {
        let projected = self.projected_final();
        if projected <= 0.0 {
            return 0.0;
        }
        (self.ledger.cumulative_encoded_bytes_produced as f64 / projected * 100.0).clamp(0.0, 100.0)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            ratio: self.ratio(),
            projected_final_bytes: self.projected_final(),
            percent: self.percent(),
            ledger: self.ledger.clone(),
        }
    }

    pub fn log_progress(&self) {
        info!(
            "📊 Progress: {:.1}% ({} of ~{} projected, ratio {:.3})",
            self.percent(),
            format_size(self.ledger.cumulative_encoded_bytes_produced, DECIMAL),
            format_size(self.projected_final() as u64, DECIMAL),
            self.ratio()
        );
    }
}
