//! Extraction stage: per-request feature computation and, in training
//! mode, persistence of labelled rows and n-gram pool growth.
//!
//! Grounded on spec.md §4.5 directly; `original_source/stages/extraction/extraction.py`'s
//! surviving revision only persists pre-computed Counters via
//! `Extraction.run()`, so the scoring algorithm in `ngram.rs` is
//! reconstructed from the spec's description rather than carried over from
//! source.

mod ngram;

pub use ngram::{NgramEngine, Side};

use crate::alerting::{Alert, ObserverBus};
use crate::config::Mode;
use crate::dto::{expect_variant, ExtractionModelDto, FeatureMap, FeatureValue, StageInput, TrainingDataRow};
use crate::error::{PipelineError, PipelineResult, PluginError};
use crate::message::HttpMessage;
use crate::persistence::{PersistenceHandle, TrainingRowStrategy, WriteStrategy};
use crate::pipeline::StageOutcome;
use crate::type_descriptor::TypeDescriptor;
use chrono::Utc;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// A feature-extraction plug-in. Implementations must be cheap and
/// side-effect-free beyond the n-gram pool itself (spec.md §4.5.3: "At
/// least one plug-in must be configured or the stage fails startup"). An
/// `Err` (or a caught panic) is logged via the alert bus as a non-verdict
/// event and contributes no features; the stage continues to the
/// remaining plug-ins (spec.md §7).
pub trait ExtractionPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn extract(
        &self,
        message: &HttpMessage,
        request_type: &TypeDescriptor,
        mode: Mode,
    ) -> Result<FeatureMap, PluginError>;
}

fn invoke(
    plugin: &Arc<dyn ExtractionPlugin>,
    message: &HttpMessage,
    request_type: &TypeDescriptor,
    mode: Mode,
) -> Result<FeatureMap, PluginError> {
    match catch_unwind(AssertUnwindSafe(|| plugin.extract(message, request_type, mode))) {
        Ok(result) => result,
        Err(payload) => Err(PluginError::from_panic(payload)),
    }
}

fn char_class_tally(prefix: &str, text: &str, features: &mut FeatureMap) {
    let (mut lower, mut upper, mut numeric, mut whitespace, mut special) = (0u64, 0u64, 0u64, 0u64, 0u64);
    for c in text.chars() {
        if c.is_ascii_lowercase() {
            lower += 1;
        } else if c.is_ascii_uppercase() {
            upper += 1;
        } else if c.is_ascii_digit() {
            numeric += 1;
        } else if c.is_whitespace() {
            whitespace += 1;
        } else {
            special += 1;
        }
    }
    features.insert(format!("{prefix}_lowercase"), FeatureValue::Count(lower));
    features.insert(format!("{prefix}_uppercase"), FeatureValue::Count(upper));
    features.insert(format!("{prefix}_numeric"), FeatureValue::Count(numeric));
    features.insert(format!("{prefix}_whitespace"), FeatureValue::Count(whitespace));
    features.insert(format!("{prefix}_special"), FeatureValue::Count(special));
}

/// The stock plug-in: basic request metadata, character-class tallies for
/// query/body, and rolling n-gram scores. spec.md §4.5.1–§4.5.2.
pub struct DefaultExtractionPlugin {
    ngrams: Arc<NgramEngine>,
}

impl DefaultExtractionPlugin {
    pub fn new(ngrams: Arc<NgramEngine>) -> Self {
        Self { ngrams }
    }
}

impl ExtractionPlugin for DefaultExtractionPlugin {
    fn name(&self) -> &str {
        "Default Extraction Plugin"
    }

    fn extract(
        &self,
        message: &HttpMessage,
        request_type: &TypeDescriptor,
        mode: Mode,
    ) -> Result<FeatureMap, PluginError> {
        let mut features = FeatureMap::new();
        features.insert("source_address".into(), FeatureValue::Text(message.source_address.clone()));
        features.insert("method".into(), FeatureValue::Text(message.method.clone()));
        features.insert("path".into(), FeatureValue::Text(message.path.clone()));
        features.insert(
            "protocol_version".into(),
            FeatureValue::Text(message.protocol_version.clone()),
        );
        features.insert("length".into(), FeatureValue::Number(message.length() as f64));
        features.insert(
            "header_count".into(),
            FeatureValue::Count(message.header_count() as u64),
        );
        for (name, value) in &message.headers {
            features.insert(format!("header_{name}"), FeatureValue::Text(value.clone()));
        }

        if message.has_query() {
            features.insert("query".into(), FeatureValue::Text(message.query.clone()));
            features.insert(
                "query_field_count".into(),
                FeatureValue::Count(message.query.split('&').count() as u64),
            );
            char_class_tally("query", &message.query, &mut features);
            for (n, score) in self.ngrams.score(request_type, Side::Query, &message.query, mode) {
                features.insert(format!("query_{n}grams"), FeatureValue::Number(score));
            }
        }

        if message.has_body() {
            let body = message.body_as_str().into_owned();
            char_class_tally("body", &body, &mut features);
            for (n, score) in self.ngrams.score(request_type, Side::Body, &body, mode) {
                features.insert(format!("body_{n}grams"), FeatureValue::Number(score));
            }
        }

        Ok(features)
    }
}

pub struct ExtractionStage {
    plugins: Vec<Arc<dyn ExtractionPlugin>>,
    persistence: Arc<PersistenceHandle>,
    mode: Mode,
    /// Label attached to persisted training rows; defaults to 1
    /// (spec.md §4.5.2: "label is 1 by default; tests inject 0/1 to
    /// produce labelled corpora").
    default_label: AtomicU8,
    observers: ObserverBus,
}

impl ExtractionStage {
    pub fn new(
        plugins: Vec<Arc<dyn ExtractionPlugin>>,
        persistence: Arc<PersistenceHandle>,
        mode: Mode,
    ) -> PipelineResult<Self> {
        if plugins.is_empty() {
            return Err(PipelineError::ConfigMissing {
                stage: "extraction",
                detail: "at least one extraction plugin must be configured".to_string(),
            });
        }
        Ok(Self {
            plugins,
            persistence,
            mode,
            default_label: AtomicU8::new(1),
            observers: ObserverBus::new(),
        })
    }

    /// Overrides the label attached to subsequently persisted training
    /// rows. Exists for building labelled corpora in tests; production
    /// traffic always uses the default `1`.
    pub fn set_default_label(&self, label: u8) {
        self.default_label.store(label, Ordering::SeqCst);
    }

    pub fn observers(&self) -> &ObserverBus {
        &self.observers
    }

    pub fn run(&self, input: StageInput) -> PipelineResult<StageOutcome<ExtractionModelDto>> {
        let dto = expect_variant!(input, TypingExtraction, "Extraction Stage");
        let message = dto.message;
        let request_type = dto.request_type;

        let mut features = FeatureMap::new();
        for plugin in &self.plugins {
            match invoke(plugin, &message, &request_type, self.mode) {
                Ok(produced) => features.extend(produced),
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

        if self.mode == Mode::Train {
            let row = TrainingDataRow {
                features: features.clone(),
                message: message.clone(),
                request_type: request_type.clone(),
                label: self.default_label.load(Ordering::SeqCst),
            };
            let key = format!("{:020}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
            if let Err(err) = self.persistence.write(
                Arc::new(TrainingRowStrategy) as Arc<dyn WriteStrategy>,
                "data",
                Some(key),
                &row,
            ) {
                tracing::error!(error = %err, "failed to enqueue training row");
            }
        }

        Ok(StageOutcome::Forward(ExtractionModelDto {
            features,
            request_type,
            message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::TypingExtractionDto;

    fn msg(has_query: bool, has_body: bool) -> HttpMessage {
        HttpMessage {
            source_address: "127.0.0.1".into(),
            method: "POST".into(),
            path: "/upload".into(),
            query: if has_query { "q=1".into() } else { String::new() },
            protocol_version: "HTTP/1.1".into(),
            headers: vec![("Host".into(), "example.com".into())],
            body: if has_body { b"abcdef".to_vec() } else { Vec::new() },
        }
    }

    fn stage(mode: Mode) -> ExtractionStage {
        let persistence = Arc::new(PersistenceHandle::open_temporary().unwrap());
        let ngrams = Arc::new(NgramEngine::new(persistence.clone()));
        let plugins: Vec<Arc<dyn ExtractionPlugin>> = vec![Arc::new(DefaultExtractionPlugin::new(ngrams))];
        ExtractionStage::new(plugins, persistence, mode).unwrap()
    }

    #[test]
    fn empty_body_omits_body_side_features() {
        let stage = stage(Mode::Test);
        let message = msg(false, false);
        let request_type = TypeDescriptor::new("POST", "/upload", false, false);
        let outcome = stage
            .run(StageInput::TypingExtraction(TypingExtractionDto { message, request_type }))
            .unwrap();
        let StageOutcome::Forward(dto) = outcome else {
            panic!("expected forward");
        };
        assert!(!dto.features.contains_key("body_lowercase"));
    }

    #[test]
    fn body_present_emits_ngram_features_at_cold_start() {
        let stage = stage(Mode::Test);
        let message = msg(false, true);
        let request_type = TypeDescriptor::new("POST", "/upload", false, true);
        let outcome = stage
            .run(StageInput::TypingExtraction(TypingExtractionDto { message, request_type }))
            .unwrap();
        let StageOutcome::Forward(dto) = outcome else {
            panic!("expected forward");
        };
        assert_eq!(dto.features.get("body_1grams").unwrap().as_f64(), Some(1.0));
        assert_eq!(dto.features.get("body_6grams").unwrap().as_f64(), Some(1.0));
    }

    #[test]
    fn wrong_dto_variant_is_a_contract_error() {
        let stage = stage(Mode::Test);
        let message = msg(false, false);
        let wrong = StageInput::AcquisitionFilter(crate::dto::AcquisitionFilterDto { message });
        assert!(stage.run(wrong).is_err());
    }

    struct Panics;
    impl ExtractionPlugin for Panics {
        fn name(&self) -> &str {
            "Panics"
        }
        fn extract(&self, _message: &HttpMessage, _request_type: &TypeDescriptor, _mode: Mode) -> Result<FeatureMap, PluginError> {
            panic!("boom");
        }
    }

    struct Errors;
    impl ExtractionPlugin for Errors {
        fn name(&self) -> &str {
            "Errors"
        }
        fn extract(&self, _message: &HttpMessage, _request_type: &TypeDescriptor, _mode: Mode) -> Result<FeatureMap, PluginError> {
            Err(PluginError::new("transient failure"))
        }
    }

    #[test]
    fn panicking_plugin_is_caught_and_remaining_plugins_still_run() {
        let persistence = Arc::new(PersistenceHandle::open_temporary().unwrap());
        let ngrams = Arc::new(NgramEngine::new(persistence.clone()));
        let plugins: Vec<Arc<dyn ExtractionPlugin>> = vec![
            Arc::new(Panics),
            Arc::new(DefaultExtractionPlugin::new(ngrams)),
        ];
        let stage = ExtractionStage::new(plugins, persistence, Mode::Test).unwrap();
        let message = msg(false, false);
        let request_type = TypeDescriptor::new("POST", "/upload", false, false);
        let outcome = stage
            .run(StageInput::TypingExtraction(TypingExtractionDto { message, request_type }))
            .unwrap();
        let StageOutcome::Forward(dto) = outcome else {
            panic!("expected forward");
        };
        assert!(dto.features.contains_key("method"));
    }

    #[test]
    fn erroring_plugin_does_not_abort_the_request() {
        let persistence = Arc::new(PersistenceHandle::open_temporary().unwrap());
        let plugins: Vec<Arc<dyn ExtractionPlugin>> = vec![Arc::new(Errors)];
        let stage = ExtractionStage::new(plugins, persistence, Mode::Test).unwrap();
        let message = msg(false, false);
        let request_type = TypeDescriptor::new("POST", "/upload", false, false);
        let outcome = stage
            .run(StageInput::TypingExtraction(TypingExtractionDto { message, request_type }))
            .unwrap();
        assert!(matches!(outcome, StageOutcome::Forward(_)));
    }
}
