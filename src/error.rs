//! Error taxonomy for the detection pipeline.
//!
//! Mirrors the propagation policy in the spec: a contract violation is
//! fatal to the process, an upstream failure is surfaced to the client as
//! a gateway error, and persistence/plugin failures are logged and
//! swallowed so the request path keeps moving.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage received a DTO variant it does not accept. The pipeline is
    /// mis-wired; the caller should abort rather than recover.
    #[error("pipeline contract violated: {0}")]
    Contract(String),

    /// A mandatory plug-in directory was empty at startup.
    #[error("no {stage} plugin installed: {detail}")]
    ConfigMissing { stage: &'static str, detail: String },

    /// The upstream origin could not be reached or returned a transport error.
    #[error("upstream proxy failure: {0}")]
    Upstream(String),

    /// A store read/write failed. Logged only; never surfaced to the caller.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// A filter/extraction/model plug-in failed — either an explicit `Err`
/// return or a caught unwind. spec.md §7 "Plug-in runtime error": logged
/// via the alert bus as a non-verdict event, "equivalent to `reject=false`"
/// — the stage treats it as no opinion and continues to the next plug-in.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PluginError(pub String);

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Converts a caught `catch_unwind` payload into a displayable message.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "plugin panicked".to_string());
        Self(message)
    }
}
