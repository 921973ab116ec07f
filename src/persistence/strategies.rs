//! Pluggable write strategies.
//!
//! Grounded on `original_source/storage/database.py`'s three write shapes
//! (`WriteModel`/`WriteNgrams`/default `set`), spec.md §4.7. Each strategy
//! receives an open store connection and the already-`bincode`-encoded
//! payload produced by [`super::PersistenceHandle::write`]; it decides how
//! that payload composes with whatever is already at `(namespace, key)`.

use crate::error::PipelineError;

fn tree(db: &sled::Db, namespace: &str) -> Result<sled::Tree, PipelineError> {
    db.open_tree(namespace)
        .map_err(|e| PipelineError::Persistence(format!("open_tree({namespace}): {e}")))
}

fn flush(tree: &sled::Tree) -> Result<(), PipelineError> {
    tree.flush()
        .map_err(|e| PipelineError::Persistence(format!("flush: {e}")))?;
    Ok(())
}

/// How a single queued write item is applied to the store.
pub trait WriteStrategy: Send + Sync {
    fn apply(&self, db: &sled::Db, namespace: &str, key: Option<&str>, payload: Vec<u8>)
        -> Result<(), PipelineError>;
}

/// Last-writer-wins named slot. Used for model registries
/// (`lr_model_dict`, `kMeans_model_dict`): the whole registry is
/// re-serialized and overwrites the previous one.
pub struct DefaultStrategy;

const DEFAULT_SLOT: &[u8] = b"__default__";

impl WriteStrategy for DefaultStrategy {
    fn apply(
        &self,
        db: &sled::Db,
        namespace: &str,
        _key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<(), PipelineError> {
        let t = tree(db, namespace)?;
        t.insert(DEFAULT_SLOT, payload)
            .map_err(|e| PipelineError::Persistence(format!("insert: {e}")))?;
        flush(&t)
    }
}

/// Appends one labelled feature row under its insertion-timestamp key.
/// Creates the ordered map on first use (a sled tree is already an
/// ordered map keyed by byte-lexicographic order; an RFC3339 key sorts
/// in arrival order).
pub struct TrainingRowStrategy;

impl WriteStrategy for TrainingRowStrategy {
    fn apply(
        &self,
        db: &sled::Db,
        namespace: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<(), PipelineError> {
        let key = key.ok_or_else(|| {
            PipelineError::Persistence("training-row write requires an insertion-timestamp key".into())
        })?;
        let t = tree(db, namespace)?;
        t.insert(key.as_bytes(), payload)
            .map_err(|e| PipelineError::Persistence(format!("insert: {e}")))?;
        flush(&t)
    }
}

/// Appends one n-gram Counter onto the append-only list stored under
/// `(namespace, key)` — `key` identifies the sub-list (`monograms`,
/// `bigrams`, `hexagrams`). The stored value is a `Vec<Vec<u8>>` of
/// already-encoded entries; readers decode each element themselves.
pub struct NgramStrategy;

impl WriteStrategy for NgramStrategy {
    fn apply(
        &self,
        db: &sled::Db,
        namespace: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<(), PipelineError> {
        let key = key.ok_or_else(|| {
            PipelineError::Persistence("n-gram append requires a sub-list key".into())
        })?;
        let t = tree(db, namespace)?;
        let mut entries: Vec<Vec<u8>> = match t
            .get(key.as_bytes())
            .map_err(|e| PipelineError::Persistence(format!("get: {e}")))?
        {
            Some(bytes) => bincode::deserialize(&bytes)
                .map_err(|e| PipelineError::Persistence(format!("decode: {e}")))?,
            None => Vec::new(),
        };
        entries.push(payload);
        let encoded = bincode::serialize(&entries)
            .map_err(|e| PipelineError::Persistence(format!("encode: {e}")))?;
        t.insert(key.as_bytes(), encoded)
            .map_err(|e| PipelineError::Persistence(format!("insert: {e}")))?;
        flush(&t)
    }
}
