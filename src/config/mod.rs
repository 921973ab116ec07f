//! Pipeline configuration.
//!
//! ## Loading order
//!
//! CLI flags (`--host`, `--mode`, `--logging`/`--no-logging`) populate
//! [`PipelineSettings`]; the typing stage separately loads its own JSON
//! document (`--typing-config`, defaulting to `typing.json`) describing the
//! "core" topology.
//!
//! ## Usage
//!
//! Call [`init`] once at startup, then [`get`] anywhere:
//!
//! ```ignore
//! config::init(PipelineSettings::from_cli(&cli));
//! let mode = config::get().mode;
//! ```

pub mod defaults;
mod typing_config;

pub use typing_config::{CorePathEntry, TypingConfig};

use std::sync::OnceLock;

/// Whether training-mode side effects (pool persistence, labelled-row
/// ingestion, retraining calls) are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Test,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Mode::Train),
            "test" => Ok(Mode::Test),
            other => Err(format!("unknown mode '{other}', expected 'train' or 'test'")),
        }
    }
}

/// Process-wide settings derived from the CLI.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub upstream_host: String,
    pub mode: Mode,
    pub logging_enabled: bool,
    pub reliability_threshold: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            upstream_host: "127.0.0.1:8080".to_string(),
            mode: Mode::Test,
            logging_enabled: false,
            reliability_threshold: defaults::RELIABILITY_THRESHOLD,
        }
    }
}

static SETTINGS: OnceLock<PipelineSettings> = OnceLock::new();

/// Initialize the global settings. Must be called exactly once before any
/// call to [`get`].
pub fn init(settings: PipelineSettings) {
    if SETTINGS.set(settings).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get the global settings.
///
/// Panics if [`init`] has not been called — a missing config is a fatal
/// startup error, not a recoverable condition.
pub fn get() -> &'static PipelineSettings {
    SETTINGS
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

pub fn is_initialized() -> bool {
    SETTINGS.get().is_some()
}
