//! Stage-to-stage data transfer objects.
//!
//! Each pipeline edge carries exactly one DTO shape. The original prototype
//! dispatched on these at runtime with `isinstance(dto, ExpectedDTO)` and
//! `sys.exit(...)` on mismatch (`original_source/dtos/DTOs.py`,
//! `stages/typing/typing.py::run`). spec.md §9 asks for this to become a
//! tagged variant matched once at each stage's entry; [`StageInput`] is that
//! variant, and [`PipelineError::Contract`](crate::error::PipelineError::Contract)
//! is raised — fatally, per spec.md §7 — on a mismatch.

use crate::message::HttpMessage;
use crate::type_descriptor::TypeDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct AcquisitionFilterDto {
    pub message: HttpMessage,
}

#[derive(Debug, Clone)]
pub struct FilterTypingDto {
    pub message: HttpMessage,
}

#[derive(Debug, Clone)]
pub struct TypingExtractionDto {
    pub message: HttpMessage,
    pub request_type: TypeDescriptor,
}

/// A feature value. `Number` covers the quantitative features consumed by
/// model plugins; `Text`/`Count` cover metadata features extraction also
/// produces (header names, method, path) for completeness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FeatureValue {
    Number(f64),
    Count(u64),
    Text(String),
}

impl FeatureValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(v) => Some(*v),
            FeatureValue::Count(v) => Some(*v as f64),
            FeatureValue::Text(_) => None,
        }
    }
}

pub type FeatureMap = BTreeMap<String, FeatureValue>;

#[derive(Debug, Clone)]
pub struct ExtractionModelDto {
    pub features: FeatureMap,
    pub request_type: TypeDescriptor,
    pub message: HttpMessage,
}

/// A labelled feature row persisted under the `data` namespace in training
/// mode (spec.md §3 "Training data row"). `label` defaults to `1`; the
/// extraction stage exposes a way to override it so tests can build
/// labelled corpora (spec.md §8 scenario 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingDataRow {
    pub features: FeatureMap,
    pub message: HttpMessage,
    pub request_type: TypeDescriptor,
    pub label: u8,
}

/// Tagged variant over every edge's DTO shape.
#[derive(Debug, Clone)]
pub enum StageInput {
    AcquisitionFilter(AcquisitionFilterDto),
    FilterTyping(FilterTypingDto),
    TypingExtraction(TypingExtractionDto),
    ExtractionModel(ExtractionModelDto),
}

macro_rules! expect_variant {
    ($input:expr, $variant:ident, $stage:literal) => {
        match $input {
            StageInput::$variant(dto) => dto,
            other => {
                return Err(crate::error::PipelineError::Contract(format!(
                    "{}: expected {} DTO, got {:?}",
                    $stage,
                    stringify!($variant),
                    other
                )))
            }
        }
    };
}

pub(crate) use expect_variant;
