//! Typing stage: the path-reliability trie.
//!
//! Grounded on `original_source/stages/typing/typing.py` (`Typing.run`,
//! `init_core`), spec.md §4.4.

pub mod horizon;
pub mod node;

use crate::alerting::{Alert, ObserverBus};
use crate::config::TypingConfig;
use crate::dto::{expect_variant, StageInput, TypingExtractionDto};
use crate::error::PipelineResult;
use crate::pipeline::StageOutcome;
use crate::type_descriptor::TypeDescriptor;
use chrono::{DateTime, Utc};
use node::{DirNode, Horizons, Node, ResourceNode};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// The nine method lists the root holds (spec.md §3). Only GET/POST/HEAD
/// are ever populated by the acquisition contract (spec.md §4.2); the
/// remaining six stay empty but exist, matching spec.md §3 literally
/// (see SPEC_FULL.md §4.4's expansion note).
const METHODS: [&str; 9] = [
    "GET", "POST", "HEAD", "PUT", "DELETE", "OPTIONS", "PATCH", "CONNECT", "TRACE",
];

/// Root of the trie: a single shared horizon (one short/medium/long
/// timestamp sequence regardless of method) plus nine independent
/// per-method child lists.
struct RootNode {
    init_time: DateTime<Utc>,
    horizon: horizon::TimestampHorizon,
    children_by_method: HashMap<&'static str, Vec<Node>>,
}

impl RootNode {
    fn new(now: DateTime<Utc>) -> Self {
        let mut children_by_method = HashMap::new();
        for method in METHODS {
            children_by_method.insert(method, Vec::new());
        }
        Self {
            init_time: now,
            horizon: horizon::TimestampHorizon::new(),
            children_by_method,
        }
    }

    fn bootstrap_core(&mut self, config: &TypingConfig) {
        for entry in &config.paths {
            let components = split_path(&entry.path);
            for method in &entry.methods {
                let method = normalize_method(method);
                let Some(children) = self.children_by_method.get_mut(method) else {
                    tracing::warn!(method, "core path configured for an unsupported method, skipping");
                    continue;
                };
                insert_core(children, components.clone(), self.init_time);
            }
        }
    }

    fn insert(&mut self, method: &str, path: &str, ts: DateTime<Utc>) {
        self.horizon.append(ts);
        let method = normalize_method(method);
        let children = self.children_by_method.entry(method).or_default();
        node::insert(children, split_path(path), ts);
    }

    fn aggregate(&mut self, now: DateTime<Utc>, horizons: &Horizons) {
        self.horizon
            .aggregate(now, horizons.short, horizons.medium, horizons.long);
        for children in self.children_by_method.values_mut() {
            node::aggregate(children, now, horizons);
        }
    }

    fn update_reliability(&mut self, now: DateTime<Utc>) {
        let parent_short = self.horizon.short_len();
        for children in self.children_by_method.values_mut() {
            node::update_reliability(children, now, parent_short, 0, 0, 1.0);
        }
    }

    fn path_reliability(&self, method: &str, path: &str) -> Option<f64> {
        let method = normalize_method(method);
        let children = self.children_by_method.get(method)?;
        node::lookup_path_reliability(children, &split_path(path))
    }
}

fn normalize_method(method: &str) -> &'static str {
    METHODS
        .iter()
        .find(|m| m.eq_ignore_ascii_case(method))
        .copied()
        .unwrap_or("GET")
}

/// spec.md §4.4.3: leading "/" becomes an empty first component that is
/// dropped; the empty path means "/" (an empty component list).
fn split_path(path: &str) -> Vec<String> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').map(str::to_string).collect()
    }
}

fn insert_core(children: &mut Vec<Node>, mut components: Vec<String>, init_time: DateTime<Utc>) {
    if components.len() <= 1 {
        let name = if components.is_empty() {
            "/".to_string()
        } else {
            components.remove(0)
        };
        if !children.iter().any(|c| matches!(c, Node::Resource(r) if r.name == name)) {
            children.push(Node::Resource(ResourceNode::new_core(name, init_time)));
        }
    } else {
        let name = components.remove(0);
        let idx = children.iter().position(|c| matches!(c, Node::Dir(d) if d.name == name));
        let idx = idx.unwrap_or_else(|| {
            children.push(Node::Dir(DirNode::new_core(name, init_time)));
            children.len() - 1
        });
        if let Node::Dir(d) = &mut children[idx] {
            insert_core(&mut d.children, components, init_time);
        }
    }
}

pub struct TypingStage {
    root: Mutex<RootNode>,
    horizons: Horizons,
    reliability_threshold: f64,
    observers: ObserverBus,
}

impl TypingStage {
    pub fn new(config: TypingConfig, reliability_threshold: f64) -> Self {
        Self::with_horizons(
            config,
            reliability_threshold,
            Horizons {
                short: Duration::from_secs(3_600),
                medium: Duration::from_secs(86_400),
                long: Duration::from_secs(604_800),
            },
        )
    }

    pub fn with_horizons(config: TypingConfig, reliability_threshold: f64, horizons: Horizons) -> Self {
        let now = Utc::now();
        let mut root = RootNode::new(now);
        root.bootstrap_core(&config);
        Self {
            root: Mutex::new(root),
            horizons,
            reliability_threshold,
            observers: ObserverBus::new(),
        }
    }

    pub fn observers(&self) -> &ObserverBus {
        &self.observers
    }

    pub fn run(&self, input: StageInput) -> PipelineResult<StageOutcome<TypingExtractionDto>> {
        let dto = expect_variant!(input, FilterTyping, "Typing Stage");
        let now = Utc::now();
        let message = dto.message;

        let path_reliability = {
            let mut root = self.root.lock().unwrap_or_else(|e| e.into_inner());
            root.insert(&message.method, &message.path, now);
            root.aggregate(now, &self.horizons);
            root.update_reliability(now);
            root.path_reliability(&message.method, &message.path)
                .unwrap_or(0.0)
        };

        if path_reliability < self.reliability_threshold {
            let alert = Alert::new(
                format!("Path unreliable ({path_reliability})"),
                "Typing Stage",
            );
            self.observers.notify(&alert);
            return Ok(StageOutcome::Stopped(alert));
        }

        let request_type = TypeDescriptor::new(
            message.method.clone(),
            message.path.clone(),
            message.has_query(),
            message.has_body(),
        );
        Ok(StageOutcome::Forward(TypingExtractionDto {
            message,
            request_type,
        }))
    }
}
