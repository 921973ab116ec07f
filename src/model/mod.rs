//! Model stage: per-type trained classifiers deciding attack/no-attack.
//!
//! Grounded on `original_source/stages/model/model.py` (`Model.run`) and its
//! two plug-ins (`modelPluginDefault.py`, `modelPluginClustering.py`).
//! spec.md §4.6: each plug-in keeps a `type → trained-model instance` map,
//! reloads it from the store at startup, retrains only on strict held-out
//! improvement, and denies by default `(1, 1.0)` for an untrained type.

mod clustering;
mod logistic;

pub use clustering::ClusteringModel;
pub use logistic::LogisticModel;

use crate::alerting::{Alert, ObserverBus};
use crate::config::defaults::{MIN_ROWS_PER_LABEL, MIN_TRAINING_ROWS, VALIDATION_SPLIT};
use crate::config::Mode;
use crate::dto::{expect_variant, FeatureMap, StageInput, TrainingDataRow};
use crate::error::{PipelineError, PipelineResult, PluginError};
use crate::persistence::{DefaultStrategy, PersistenceHandle};
use crate::pipeline::StageOutcome;
use crate::type_descriptor::TypeDescriptor;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A labelled feature row scoped to a single request type, ready for a
/// model plug-in's `train`. Distinct from [`TrainingDataRow`]: that one is
/// the persisted wire shape (includes the raw message); this one is the
/// in-memory shape plug-ins actually train against.
#[derive(Debug, Clone)]
pub struct TrainingExample {
    pub features: FeatureMap,
    pub request_type: TypeDescriptor,
    pub label: u8,
}

/// A single trained-model instance. Implementations are not type-aware —
/// [`ModelPluginFactory`] is what keeps the `type → instance` map spec.md
/// §4.6 describes; each instance here only ever sees the rows/features for
/// the one type it has been handed.
pub trait ModelPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn is_trained(&self) -> bool;
    /// Retrains against `rows`, splitting `split` fraction off for
    /// validation. Returns the new held-out score only if it strictly
    /// improved and was therefore retained; `None` otherwise.
    fn train(&mut self, rows: &[TrainingExample], split: f64) -> Option<f64>;
    /// `Ok((1, 1.0))` is the untrained answer: deny by default. `Err` is a
    /// plug-in runtime failure; the stage also catches an unwinding panic
    /// and treats both as no opinion — logged via the alert bus, the
    /// pipeline continues to the next plug-in (spec.md §7).
    fn predict(&self, features: &FeatureMap) -> Result<(u8, f64), PluginError>;
}

/// Per-stage, type-erased view of a [`ModelPluginFactory`] so [`ModelStage`]
/// can hold a heterogeneous list of them the way [`crate::filter::FilterStage`]
/// holds `Vec<Arc<dyn FilterPlugin>>`.
trait ModelPluginHost: Send + Sync {
    fn name(&self) -> &str;
    fn maybe_train(&self, request_type: &TypeDescriptor, rows: &[TrainingExample]);
    fn predict(&self, request_type: &TypeDescriptor, features: &FeatureMap) -> Result<(u8, f64), PluginError>;
}

/// Owns the `type → instance` map for one model plug-in kind, and the
/// plug-in-specific persisted namespace backing it (spec.md §4.7:
/// `lr_model_dict`, `kMeans_model_dict`).
pub struct ModelPluginFactory<M> {
    display_name: String,
    namespace: &'static str,
    instances: DashMap<TypeDescriptor, M>,
    persistence: Arc<PersistenceHandle>,
}

impl<M> ModelPluginFactory<M>
where
    M: ModelPlugin + Default + Clone + Serialize + DeserializeOwned + 'static,
{
    /// Loads any persisted registry eagerly — spec.md §5: "model plug-ins
    /// re-load `lr_model_dict` at startup" to reconstruct in-memory state
    /// lost on crash.
    pub fn new(namespace: &'static str, persistence: Arc<PersistenceHandle>) -> Self {
        let instances = DashMap::new();
        match persistence.read::<HashMap<TypeDescriptor, M>>(namespace, None) {
            Ok(Some(loaded)) => {
                for (request_type, model) in loaded {
                    instances.insert(request_type, model);
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(namespace, error = %err, "failed to load persisted model registry");
            }
        }
        let display_name = M::default().name().to_string();
        Self {
            display_name,
            namespace,
            instances,
            persistence,
        }
    }

    fn persist(&self) {
        let snapshot: HashMap<TypeDescriptor, M> = self
            .instances
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        if let Err(err) =
            self.persistence
                .write(Arc::new(DefaultStrategy), self.namespace, None, &snapshot)
        {
            tracing::error!(namespace = self.namespace, error = %err, "failed to enqueue model registry write");
        }
    }
}

impl<M> ModelPluginHost for ModelPluginFactory<M>
where
    M: ModelPlugin + Default + Clone + Serialize + DeserializeOwned + 'static,
{
    fn name(&self) -> &str {
        &self.display_name
    }

    /// Requires ≥ `MIN_TRAINING_ROWS` total with ≥ `MIN_ROWS_PER_LABEL` of
    /// each label before attempting anything (spec.md §4.6).
    fn maybe_train(&self, request_type: &TypeDescriptor, rows: &[TrainingExample]) {
        if rows.len() < MIN_TRAINING_ROWS {
            return;
        }
        let positives = rows.iter().filter(|r| r.label == 1).count();
        let negatives = rows.len() - positives;
        if positives < MIN_ROWS_PER_LABEL || negatives < MIN_ROWS_PER_LABEL {
            return;
        }
        let improved = {
            let mut instance = self.instances.entry(request_type.clone()).or_default();
            instance.train(rows, VALIDATION_SPLIT).is_some()
        };
        if improved {
            self.persist();
        }
    }

    fn predict(&self, request_type: &TypeDescriptor, features: &FeatureMap) -> Result<(u8, f64), PluginError> {
        match self.instances.get(request_type) {
            Some(instance) => match catch_unwind(AssertUnwindSafe(|| instance.predict(features))) {
                Ok(result) => result,
                Err(payload) => Err(PluginError::from_panic(payload)),
            },
            None => Ok((1, 1.0)),
        }
    }
}

pub struct ModelStage {
    plugins: Vec<Arc<dyn ModelPluginHost>>,
    persistence: Arc<PersistenceHandle>,
    mode: Mode,
    observers: ObserverBus,
}

impl ModelStage {
    fn new(
        plugins: Vec<Arc<dyn ModelPluginHost>>,
        persistence: Arc<PersistenceHandle>,
        mode: Mode,
    ) -> PipelineResult<Self> {
        if plugins.is_empty() {
            return Err(PipelineError::ConfigMissing {
                stage: "model",
                detail: "no model plugin installed".into(),
            });
        }
        Ok(Self {
            plugins,
            persistence,
            mode,
            observers: ObserverBus::new(),
        })
    }

    /// The two plug-ins grounded on the original prototype's two model
    /// plugin files, registered logistic-first to match their on-disk
    /// namespace order in spec.md §4.7 (`lr_model_dict`, `kMeans_model_dict`).
    pub fn with_default_plugins(persistence: Arc<PersistenceHandle>, mode: Mode) -> PipelineResult<Self> {
        let plugins: Vec<Arc<dyn ModelPluginHost>> = vec![
            Arc::new(ModelPluginFactory::<LogisticModel>::new(
                "lr_model_dict",
                persistence.clone(),
            )),
            Arc::new(ModelPluginFactory::<ClusteringModel>::new(
                "kMeans_model_dict",
                persistence.clone(),
            )),
        ];
        Self::new(plugins, persistence, mode)
    }

    pub fn observers(&self) -> &ObserverBus {
        &self.observers
    }

    pub fn run(&self, input: StageInput) -> PipelineResult<StageOutcome<()>> {
        let dto = expect_variant!(input, ExtractionModel, "Model Stage");
        let features = dto.features;
        let request_type = dto.request_type;

        if self.mode == Mode::Train {
            self.retrain_for(&request_type);
        }

        for plugin in &self.plugins {
            match plugin.predict(&request_type, &features) {
                Ok((label, score)) => {
                    if label == 1 {
                        let alert = Alert::new(
                            format!("Attack detected with accuracy({score})"),
                            format!("Model Stage Plugin {}", plugin.name()),
                        );
                        self.observers.notify(&alert);
                        return Ok(StageOutcome::Stopped(alert));
                    }
                }
                Err(err) => {
                    let alert = Alert::new(
                        format!("Plugin runtime error: {err}"),
                        format!("Model Stage Plugin {} (no opinion)", plugin.name()),
                    );
                    self.observers.notify(&alert);
                    continue;
                }
            }
        }
        Ok(StageOutcome::Forward(()))
    }

    fn retrain_for(&self, request_type: &TypeDescriptor) {
        let rows: Vec<TrainingDataRow> = match self.persistence.scan("data") {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, "failed to scan training rows");
                return;
            }
        };
        let examples: Vec<TrainingExample> = rows
            .into_iter()
            .filter(|row| &row.request_type == request_type)
            .map(|row| TrainingExample {
                features: row.features,
                request_type: row.request_type,
                label: row.label,
            })
            .collect();
        for plugin in &self.plugins {
            plugin.maybe_train(request_type, &examples);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::{ExtractionModelDto, FeatureValue};
    use crate::message::HttpMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn msg() -> HttpMessage {
        HttpMessage {
            source_address: "127.0.0.1".into(),
            method: "GET".into(),
            path: "/a".into(),
            query: String::new(),
            protocol_version: "HTTP/1.1".into(),
            headers: vec![],
            body: vec![],
        }
    }

    fn input(request_type: TypeDescriptor) -> StageInput {
        let mut features = FeatureMap::new();
        features.insert("x".into(), FeatureValue::Number(1.0));
        StageInput::ExtractionModel(ExtractionModelDto {
            features,
            request_type,
            message: msg(),
        })
    }

    struct FixedVerdict {
        label: u8,
        calls: AtomicUsize,
    }
    impl ModelPluginHost for FixedVerdict {
        fn name(&self) -> &str {
            "Fixed Verdict Plugin"
        }
        fn maybe_train(&self, _request_type: &TypeDescriptor, _rows: &[TrainingExample]) {}
        fn predict(&self, _request_type: &TypeDescriptor, _features: &FeatureMap) -> Result<(u8, f64), PluginError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((self.label, 0.9))
        }
    }

    struct ErroringPlugin;
    impl ModelPluginHost for ErroringPlugin {
        fn name(&self) -> &str {
            "Erroring Plugin"
        }
        fn maybe_train(&self, _request_type: &TypeDescriptor, _rows: &[TrainingExample]) {}
        fn predict(&self, _request_type: &TypeDescriptor, _features: &FeatureMap) -> Result<(u8, f64), PluginError> {
            Err(PluginError::new("transient failure"))
        }
    }

    struct PanickingPlugin;
    impl ModelPluginHost for PanickingPlugin {
        fn name(&self) -> &str {
            "Panicking Plugin"
        }
        fn maybe_train(&self, _request_type: &TypeDescriptor, _rows: &[TrainingExample]) {}
        fn predict(&self, _request_type: &TypeDescriptor, _features: &FeatureMap) -> Result<(u8, f64), PluginError> {
            panic!("boom");
        }
    }

    #[test]
    fn erroring_plugin_is_treated_as_no_opinion_and_remaining_plugins_run() {
        let persistence = Arc::new(PersistenceHandle::open_temporary().unwrap());
        let clean = Arc::new(FixedVerdict {
            label: 0,
            calls: AtomicUsize::new(0),
        });
        let stage = ModelStage::new(
            vec![Arc::new(ErroringPlugin), clean.clone()],
            persistence,
            Mode::Test,
        )
        .unwrap();
        let outcome = stage.run(input(TypeDescriptor::new("GET", "/a", false, false))).unwrap();
        assert!(matches!(outcome, StageOutcome::Forward(())));
        assert_eq!(clean.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_plugin_is_caught_and_does_not_abort_the_request() {
        let persistence = Arc::new(PersistenceHandle::open_temporary().unwrap());
        let clean = Arc::new(FixedVerdict {
            label: 0,
            calls: AtomicUsize::new(0),
        });
        let stage = ModelStage::new(
            vec![Arc::new(PanickingPlugin), clean.clone()],
            persistence,
            Mode::Test,
        )
        .unwrap();
        let outcome = stage.run(input(TypeDescriptor::new("GET", "/a", false, false))).unwrap();
        assert!(matches!(outcome, StageOutcome::Forward(())));
        assert_eq!(clean.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn untrained_default_plugins_deny_by_default() {
        let persistence = Arc::new(PersistenceHandle::open_temporary().unwrap());
        let stage = ModelStage::with_default_plugins(persistence, Mode::Test).unwrap();
        let outcome = stage.run(input(TypeDescriptor::new("GET", "/a", false, false))).unwrap();
        assert!(matches!(outcome, StageOutcome::Stopped(_)));
    }

    #[test]
    fn first_attacking_plugin_short_circuits_the_rest() {
        let persistence = Arc::new(PersistenceHandle::open_temporary().unwrap());
        let attacker = Arc::new(FixedVerdict {
            label: 1,
            calls: AtomicUsize::new(0),
        });
        let clean = Arc::new(FixedVerdict {
            label: 0,
            calls: AtomicUsize::new(0),
        });
        let stage = ModelStage::new(
            vec![attacker.clone(), clean.clone()],
            persistence,
            Mode::Test,
        )
        .unwrap();
        let outcome = stage.run(input(TypeDescriptor::new("GET", "/a", false, false))).unwrap();
        assert!(matches!(outcome, StageOutcome::Stopped(_)));
        assert_eq!(attacker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(clean.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn all_plugins_clean_forwards_unit() {
        let persistence = Arc::new(PersistenceHandle::open_temporary().unwrap());
        let clean = Arc::new(FixedVerdict {
            label: 0,
            calls: AtomicUsize::new(0),
        });
        let stage = ModelStage::new(vec![clean], persistence, Mode::Test).unwrap();
        let outcome = stage.run(input(TypeDescriptor::new("GET", "/a", false, false))).unwrap();
        assert!(matches!(outcome, StageOutcome::Forward(())));
    }

    #[test]
    fn no_plugins_fails_construction() {
        let persistence = Arc::new(PersistenceHandle::open_temporary().unwrap());
        assert!(ModelStage::new(Vec::new(), persistence, Mode::Test).is_err());
    }

    #[test]
    fn wrong_dto_variant_is_a_contract_error() {
        let persistence = Arc::new(PersistenceHandle::open_temporary().unwrap());
        let clean = Arc::new(FixedVerdict {
            label: 0,
            calls: AtomicUsize::new(0),
        });
        let stage = ModelStage::new(vec![clean], persistence, Mode::Test).unwrap();
        let wrong = StageInput::FilterTyping(crate::dto::FilterTypingDto { message: msg() });
        assert!(stage.run(wrong).is_err());
    }

    #[test]
    fn train_mode_learns_from_persisted_rows_then_allows_clean_traffic() {
        let persistence = Arc::new(PersistenceHandle::open_temporary().unwrap());
        let request_type = TypeDescriptor::new("GET", "/a", false, false);

        for i in 0..6 {
            let label = if i % 2 == 0 { 0u8 } else { 1u8 };
            let value = if label == 0 { -5.0 } else { 5.0 };
            let mut features = FeatureMap::new();
            features.insert("x".into(), FeatureValue::Number(value));
            let row = TrainingDataRow {
                features,
                message: msg(),
                request_type: request_type.clone(),
                label,
            };
            persistence
                .write(
                    Arc::new(crate::persistence::TrainingRowStrategy),
                    "data",
                    Some(format!("{i:020}")),
                    &row,
                )
                .unwrap();
        }

        for _ in 0..50 {
            if persistence.scan::<TrainingDataRow>("data").unwrap().len() == 6 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        let stage = ModelStage::with_default_plugins(persistence, Mode::Train).unwrap();

        let mut positive = FeatureMap::new();
        positive.insert("x".into(), FeatureValue::Number(5.0));
        let outcome = stage
            .run(StageInput::ExtractionModel(ExtractionModelDto {
                features: positive,
                request_type: request_type.clone(),
                message: msg(),
            }))
            .unwrap();
        assert!(matches!(outcome, StageOutcome::Stopped(_)));

        let mut negative = FeatureMap::new();
        negative.insert("x".into(), FeatureValue::Number(-5.0));
        let outcome = stage
            .run(StageInput::ExtractionModel(ExtractionModelDto {
                features: negative,
                request_type,
                message: msg(),
            }))
            .unwrap();
        assert!(matches!(outcome, StageOutcome::Forward(())));
    }
}
