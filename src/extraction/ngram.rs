//! Rolling n-gram "fraction of common vocabulary" score.
//!
//! Grounded on spec.md §4.5.2's description of the scoring algorithm
//! (Counter-union-then-normalize), cross-checked against
//! `original_source/database.py`'s `query_ngrams`/`body_ngrams` persisted
//! namespaces, which this pool's load/append cycle mirrors.

use crate::config::defaults::{NGRAM_ORDERS, NGRAM_RETENTION_THRESHOLD};
use crate::config::Mode;
use crate::persistence::{NgramStrategy, PersistenceHandle, WriteStrategy};
use crate::type_descriptor::TypeDescriptor;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Query,
    Body,
}

impl Side {
    fn namespace_prefix(self) -> &'static str {
        match self {
            Side::Query => "query_ngrams",
            Side::Body => "body_ngrams",
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    request_type: TypeDescriptor,
    side: Side,
    order: usize,
}

fn order_subkey(order: usize) -> &'static str {
    match order {
        1 => "monograms",
        2 => "bigrams",
        6 => "hexagrams",
        _ => "ngrams",
    }
}

/// Character n-grams of `text`. Empty if `text` has fewer than `n` chars —
/// spec.md §8: "N-gram scoring on a side shorter than n emits 0.0".
fn char_ngrams(text: &str, n: usize) -> HashMap<String, u64> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < n {
        return HashMap::new();
    }
    let mut counts = HashMap::new();
    for window in chars.windows(n) {
        let key: String = window.iter().collect();
        *counts.entry(key).or_insert(0u64) += 1;
    }
    counts
}

/// Appends `current` to `pool`, unions every counter in the (now updated)
/// pool, normalizes, prunes below [`NGRAM_RETENTION_THRESHOLD`], and
/// returns the fraction of `current`'s own n-grams that survive pruning.
/// spec.md §4.5.2 steps 2–8.
fn score_and_update(pool: &mut Vec<HashMap<String, u64>>, current: &HashMap<String, u64>) -> f64 {
    pool.push(current.clone());

    let mut union: HashMap<&str, u64> = HashMap::new();
    let mut total: u64 = 0;
    for counter in pool.iter() {
        for (k, v) in counter {
            *union.entry(k.as_str()).or_insert(0) += v;
            total += v;
        }
    }
    if total == 0 {
        return 0.0;
    }

    let retained: std::collections::HashSet<&str> = union
        .iter()
        .filter(|(_, v)| (**v as f64 / total as f64) >= NGRAM_RETENTION_THRESHOLD)
        .map(|(k, _)| *k)
        .collect();

    let current_total: u64 = current.values().sum();
    if current_total == 0 {
        return 0.0;
    }
    let occurrence: u64 = current
        .iter()
        .filter(|(k, _)| retained.contains(k.as_str()))
        .map(|(_, v)| v)
        .sum();
    occurrence as f64 / current_total as f64
}

/// Owns every (type, side, order) pool in memory, hydrating each lazily
/// from the persistence layer on first access and, in training mode,
/// enqueueing the freshly appended counter back to the store.
pub struct NgramEngine {
    pools: DashMap<PoolKey, Vec<HashMap<String, u64>>>,
    persistence: Arc<PersistenceHandle>,
}

impl NgramEngine {
    pub fn new(persistence: Arc<PersistenceHandle>) -> Self {
        Self {
            pools: DashMap::new(),
            persistence,
        }
    }

    /// Scores `text` for every configured n-gram order, updating the
    /// in-memory pool unconditionally and, in [`Mode::Train`], enqueuing
    /// the fresh counter to the persistent pool. Returns `order -> score`.
    pub fn score(
        &self,
        request_type: &TypeDescriptor,
        side: Side,
        text: &str,
        mode: Mode,
    ) -> HashMap<usize, f64> {
        let mut scores = HashMap::new();
        for &n in &NGRAM_ORDERS {
            let current = char_ngrams(text, n);
            if current.is_empty() {
                scores.insert(n, 0.0);
                continue;
            }

            let key = PoolKey {
                request_type: request_type.clone(),
                side,
                order: n,
            };
            let namespace = format!("{}:{}", side.namespace_prefix(), request_type);
            let subkey = order_subkey(n);

            let mut pool = self
                .pools
                .entry(key)
                .or_insert_with(|| self.hydrate(&namespace, subkey));
            let value = score_and_update(&mut pool, &current);
            scores.insert(n, value);

            if mode == Mode::Train {
                if let Err(err) = self.persistence.write(
                    Arc::new(NgramStrategy) as Arc<dyn WriteStrategy>,
                    namespace,
                    Some(subkey.to_string()),
                    &current,
                ) {
                    tracing::error!(error = %err, "failed to enqueue n-gram pool append");
                }
            }
        }
        scores
    }

    fn hydrate(&self, namespace: &str, subkey: &str) -> Vec<HashMap<String, u64>> {
        match self.persistence.read_appended(namespace, subkey) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!(error = %err, namespace, subkey, "failed to hydrate n-gram pool");
                Vec::new()
            }
        }
    }
}
