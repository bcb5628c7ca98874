use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;

/// Result of a stability check on a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityResult {
    /// File size remained unchanged across every sample.
    Stable {
        size: u64,
    },
    /// File size changed between two samples.
    Unstable {
        /// Size at the earlier sample.
        initial_size: u64,
        /// Size at the later sample.
        current_size: u64,
    },
    /// File exists but is still empty.
    Empty,
}

impl StabilityResult {
    pub fn is_stable(&self) -> bool {
        matches!(self, StabilityResult::Stable { .. })
    }
}

/// Compare two file sizes and return the appropriate StabilityResult.
///
/// This is a pure function extracted for property testing.
#[inline]
pub fn compare_sizes(initial_size: u64, current_size: u64) -> StabilityResult {
    if initial_size == current_size {
        StabilityResult::Stable { size: current_size }
    } else {
        StabilityResult::Unstable {
            initial_size,
            current_size,
        }
    }
}

/// Fold a series of size samples into one verdict.
///
/// Every sample must equal the first; if `require_nonzero` is set an
/// all-zero series is reported as `Empty`.
pub fn evaluate_samples(samples: &[u64], require_nonzero: bool) -> StabilityResult {
    let Some(&first) = samples.first() else {
        return StabilityResult::Empty;
    };

    for window in samples.windows(2) {
        if let StabilityResult::Unstable { initial_size, current_size } = compare_sizes(window[0], window[1]) {
            return StabilityResult::Unstable { initial_size, current_size };
        }
    }

    if require_nonzero && first == 0 {
        StabilityResult::Empty
    } else {
        StabilityResult::Stable { size: first }
    }
}

async fn file_size(path: &Path) -> std::io::Result<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}

/// Sample the size of `path`, wait `wait`, sample again and compare.
///
/// Used on transfer sources, where an empty file is a legitimate input.
pub async fn check_stability(path: &Path, wait: Duration) -> std::io::Result<StabilityResult> {
    let initial_size = file_size(path).await?;
    sleep(wait).await;
    let current_size = file_size(path).await?;
    Ok(compare_sizes(initial_size, current_size))
}

/// Take `samples` size samples separated by `interval` and require them all
/// equal and nonzero.
///
/// Used on encoder output, where a zero-byte file is a placeholder rather than
/// a finished artifact. Returns early as soon as a change is observed.
pub async fn check_output_stability(
    path: &Path,
    samples: u32,
    interval: Duration,
) -> std::io::Result<StabilityResult> {
    let samples = samples.max(2);
    let mut observed = Vec::with_capacity(samples as usize);
    observed.push(file_size(path).await?);

    for _ in 1..samples {
        sleep(interval).await;
        observed.push(file_size(path).await?);
        if let result @ StabilityResult::Unstable { .. } = evaluate_samples(&observed, true) {
            return Ok(result);
        }
    }

    Ok(evaluate_samples(&observed, true))
}
