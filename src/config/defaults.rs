//! System-wide default constants, grouped by subsystem.
//!
//! The original prototype hardcoded 5s/20s/100s aggregation windows for
//! testing while its comments claimed 1h/24h/7d (`original_source/stages/typing/typing.py`).
//! spec.md §9 leaves the real horizons configurable; these are the
//! production defaults, overridable through [`crate::config::PipelineSettings`].

use std::time::Duration;

// ============================================================================
// Typing — timestamp horizons
// ============================================================================

/// Short-term horizon: observations are kept as exact timestamps for this long.
pub const SHORT_TERM_HORIZON: Duration = Duration::from_secs(3_600);

/// Medium-term horizon: short-term entries aggregate into buckets up to this age.
pub const MEDIUM_TERM_HORIZON: Duration = Duration::from_secs(86_400);

/// Long-term horizon: medium-term buckets aggregate further, then drop past this age.
pub const LONG_TERM_HORIZON: Duration = Duration::from_secs(604_800);

/// Below this path reliability, the typing stage raises an alert and stops
/// the request. spec.md §8 scenario 3: `0.2` passes, strictly below fails.
pub const RELIABILITY_THRESHOLD: f64 = 0.2;

// ============================================================================
// Extraction — n-gram pool
// ============================================================================

/// Orders of character n-grams computed per side (query/body).
pub const NGRAM_ORDERS: [usize; 3] = [1, 2, 6];

/// Keys whose normalized pool weight falls below this are pruned.
pub const NGRAM_RETENTION_THRESHOLD: f64 = 1e-4;

// ============================================================================
// Model — training gate
// ============================================================================

/// Minimum total labelled rows for a type before (re)training is attempted.
pub const MIN_TRAINING_ROWS: usize = 5;

/// Minimum rows of each label required before (re)training is attempted.
pub const MIN_ROWS_PER_LABEL: usize = 3;

/// Fraction of rows held out for validation during training.
pub const VALIDATION_SPLIT: f64 = 0.2;

/// Number of clusters used by the k-means model plugin.
pub const KMEANS_CLUSTERS: usize = 6;

// ============================================================================
// Filter — IP blocklist
// ============================================================================

/// Default refresh interval for the IP blocklist background worker.
pub const IP_BLOCKLIST_REFRESH_INTERVAL: Duration = Duration::from_secs(600);

pub const IP_BLOCKLIST_URL: &str =
    "https://feodotracker.abuse.ch/downloads/ipblocklist_aggressive.csv";

// ============================================================================
// Persistence
// ============================================================================

/// Capacity of the bounded write queue feeding the single writer thread.
pub const WRITE_QUEUE_CAPACITY: usize = 4_096;
