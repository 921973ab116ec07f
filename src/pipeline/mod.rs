//! Pipeline scaffold: the outcome type shared by every stage and the
//! top-level orchestrator wiring acquisition's output through
//! filter → typing → extraction → model.
//!
//! Grounded on spec.md §2/§4.1 ("each stage conforms to a uniform
//! contract: `run(input)` either forwards a stage-specific value to the
//! successor or short-circuits by emitting an alert"). The teacher's
//! `src/pipeline/coordinator.rs` (removed) modeled a similar
//! forward-or-stop shape for its own sensor pipeline; this is the same
//! idea generalized to a generic `StageOutcome<T>`.

use crate::alerting::{Alert, ObserverBus};
use crate::dto::StageInput;
use crate::error::PipelineResult;
use crate::extraction::ExtractionStage;
use crate::filter::FilterStage;
use crate::model::ModelStage;
use crate::typing::TypingStage;
use std::sync::Arc;

/// What a stage did with its input: either it produced a value for its
/// successor, or it emitted an alert and the request stops here.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Forward(T),
    Stopped(Alert),
}

/// Composes the four in-process stages (filter, typing, extraction,
/// model) behind acquisition. Each stage owns its own observer bus;
/// `Pipeline` does not intercept alerts itself — callers attach an
/// observer to each stage at construction time.
pub struct Pipeline {
    pub filter: Arc<FilterStage>,
    pub typing: Arc<TypingStage>,
    pub extraction: Arc<ExtractionStage>,
    pub model: Arc<ModelStage>,
    /// Raises a `pipeline-contract` alert when a stage rejects a DTO
    /// variant — distinct from each stage's own bus, since a contract
    /// violation is the pipeline's own wiring failing, not any one
    /// stage's verdict (spec.md §4.1).
    observers: ObserverBus,
}

impl Pipeline {
    pub fn new(
        filter: Arc<FilterStage>,
        typing: Arc<TypingStage>,
        extraction: Arc<ExtractionStage>,
        model: Arc<ModelStage>,
    ) -> Self {
        Self {
            filter,
            typing,
            extraction,
            model,
            observers: ObserverBus::new(),
        }
    }

    pub fn observers(&self) -> &ObserverBus {
        &self.observers
    }

    /// Runs one request through filter → typing → extraction → model.
    /// Returns `Ok(true)` if the request should be forwarded upstream,
    /// `Ok(false)` if a stage alerted and stopped it. A `PipelineError`
    /// here is a protocol-contract or config violation — both fatal per
    /// spec.md §7; it is also raised as an alert of kind `pipeline-contract`
    /// before being returned to the caller (main).
    pub fn run(&self, input: StageInput) -> PipelineResult<bool> {
        self.run_inner(input).inspect_err(|err| {
            let alert = Alert::new(format!("{err}"), "pipeline-contract");
            self.observers.notify(&alert);
        })
    }

    fn run_inner(&self, input: StageInput) -> PipelineResult<bool> {
        let input = match self.filter.run(input)? {
            StageOutcome::Forward(dto) => StageInput::FilterTyping(dto),
            StageOutcome::Stopped(_) => return Ok(false),
        };
        let input = match self.typing.run(input)? {
            StageOutcome::Forward(dto) => StageInput::TypingExtraction(dto),
            StageOutcome::Stopped(_) => return Ok(false),
        };
        let input = match self.extraction.run(input)? {
            StageOutcome::Forward(dto) => StageInput::ExtractionModel(dto),
            StageOutcome::Stopped(_) => return Ok(false),
        };
        match self.model.run(input)? {
            StageOutcome::Forward(()) => Ok(true),
            StageOutcome::Stopped(_) => Ok(false),
        }
    }
}
