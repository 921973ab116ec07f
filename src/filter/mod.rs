//! Filter stage: fast per-request rejection before typing/extraction/ML.
//!
//! Grounded on `original_source/stages/filter/filter.py` (`Filter.run`),
//! spec.md §4.3.

mod double_encoding;
mod ip_blocklist;

pub use double_encoding::DoubleEncodingFilterPlugin;
pub use ip_blocklist::IpBlocklistFilterPlugin;

use crate::alerting::{Alert, ObserverBus};
use crate::dto::{expect_variant, FilterTypingDto, StageInput};
use crate::error::{PipelineResult, PluginError};
use crate::message::HttpMessage;
use crate::pipeline::StageOutcome;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A filter plug-in. Returns `Ok(Some((reason, source)))` to reject,
/// `Ok(None)` for "no opinion" (spec.md §4.3). `Err` is a plug-in runtime
/// failure; the stage also catches an unwinding panic and treats both the
/// same way — logged via the alert bus, "equivalent to `reject=false`"
/// (spec.md §7).
pub trait FilterPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn filter_request(&self, message: &HttpMessage) -> Result<Option<(String, String)>, PluginError>;
}

fn invoke(plugin: &Arc<dyn FilterPlugin>, message: &HttpMessage) -> Result<Option<(String, String)>, PluginError> {
    match catch_unwind(AssertUnwindSafe(|| plugin.filter_request(message))) {
        Ok(result) => result,
        Err(payload) => Err(PluginError::from_panic(payload)),
    }
}

pub struct FilterStage {
    plugins: Vec<Arc<dyn FilterPlugin>>,
    observers: ObserverBus,
}

impl FilterStage {
    pub fn new(plugins: Vec<Arc<dyn FilterPlugin>>) -> Self {
        Self {
            plugins,
            observers: ObserverBus::new(),
        }
    }

    pub fn observers(&self) -> &ObserverBus {
        &self.observers
    }

    /// Runs plug-ins in registration order; the first rejection
    /// short-circuits (spec.md §4.3). A plug-in that errors or panics is
    /// logged as a non-verdict alert and treated as no opinion — the loop
    /// continues to the remaining plug-ins (spec.md §7).
    pub fn run(&self, input: StageInput) -> PipelineResult<StageOutcome<FilterTypingDto>> {
        let dto = expect_variant!(input, AcquisitionFilter, "Filter Stage");
        for plugin in &self.plugins {
            match invoke(plugin, &dto.message) {
                Ok(Some((reason, source))) => {
                    let alert = Alert::new(reason, source);
                    self.observers.notify(&alert);
                    return Ok(StageOutcome::Stopped(alert));
                }
                Ok(None) => continue,
                Err(err) => {
                    let alert = Alert::new(
                        format!("Plugin runtime error: {err}"),
                        format!("{} (no opinion)", plugin.name()),
                    );
                    self.observers.notify(&alert);
                    continue;
                }
            }
        }
        Ok(StageOutcome::Forward(FilterTypingDto { message: dto.message }))
    }
}
