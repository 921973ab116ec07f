//! Queued single-writer persistence layer.
//!
//! Grounded on `original_source/storage/database.py` (the ZODB-backed
//! `WriteQueue`/`Database` pair) and the teacher's own `sled` usage
//! (`src/storage/mod.rs::AnalysisStorage`, before this rewrite). `sled`
//! replaces ZODB as the embedded object store; values are `bincode`-encoded
//! the way the `knhk` example repo pairs `sled` with `bincode`.
//!
//! One [`PersistenceHandle`] owns the database and a bounded queue drained
//! by a single dedicated OS thread (spec.md §5: "a single dedicated worker
//! thread draining a thread-safe FIFO queue" — blocking I/O, not a tokio
//! task). [`PersistenceHandle::write`] only enqueues; callers never block on
//! completion. [`PersistenceHandle::set_maintenance_mode`] pauses the worker
//! between items for snapshotting/backups (spec.md §9: compaction moves off
//! the per-write hot path and becomes a maintenance task).

pub mod strategies;

pub use strategies::{DefaultStrategy, NgramStrategy, TrainingRowStrategy, WriteStrategy};

use crate::error::{PipelineError, PipelineResult};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct WriteItem {
    strategy: Arc<dyn WriteStrategy>,
    namespace: String,
    key: Option<String>,
    payload: Vec<u8>,
}

/// Handle to the process-wide store. Cheaply `Clone`-able; every clone
/// shares the same underlying `sled::Db` and write queue.
#[derive(Clone)]
pub struct PersistenceHandle {
    db: sled::Db,
    sender: SyncSender<WriteItem>,
    maintenance_mode: Arc<AtomicBool>,
}

impl PersistenceHandle {
    /// Opens (or creates) the on-disk store at `path`.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory store for tests — never touches disk.
    pub fn open_temporary() -> anyhow::Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> anyhow::Result<Self> {
        let (sender, receiver) = sync_channel(crate::config::defaults::WRITE_QUEUE_CAPACITY);
        let maintenance_mode = Arc::new(AtomicBool::new(false));
        let worker_db = db.clone();
        let worker_flag = maintenance_mode.clone();
        thread::Builder::new()
            .name("persistence-writer".into())
            .spawn(move || run_writer(worker_db, receiver, worker_flag))?;
        Ok(Self {
            db,
            sender,
            maintenance_mode,
        })
    }

    /// Pauses (or resumes) the writer thread between queue items. Items
    /// already enqueued stay queued; the queue itself may fill up and start
    /// blocking writers while paused, which is the intended backpressure.
    pub fn set_maintenance_mode(&self, on: bool) {
        self.maintenance_mode.store(on, Ordering::SeqCst);
        tracing::info!(maintenance_mode = on, "persistence maintenance mode changed");
    }

    /// Encodes `payload` and enqueues it for `strategy` to apply under
    /// `(namespace, key)`. Returns once the item is queued, not once it is
    /// written — per spec.md §5, a handler never blocks on persistence
    /// completion.
    pub fn write<T: serde::Serialize>(
        &self,
        strategy: Arc<dyn WriteStrategy>,
        namespace: impl Into<String>,
        key: Option<String>,
        payload: &T,
    ) -> PipelineResult<()> {
        let payload = bincode::serialize(payload)
            .map_err(|e| PipelineError::Persistence(format!("encode: {e}")))?;
        let item = WriteItem {
            strategy,
            namespace: namespace.into(),
            key,
            payload,
        };
        self.sender.try_send(item).map_err(|e| {
            PipelineError::Persistence(format!("write queue full or closed: {e}"))
        })
    }

    /// Deep-copy snapshot read of a [`DefaultStrategy`]/[`TrainingRowStrategy`]
    /// slot: decodes the raw bytes stored at `(namespace, key)` as `T`.
    pub fn read<T: serde::de::DeserializeOwned>(
        &self,
        namespace: &str,
        key: Option<&str>,
    ) -> PipelineResult<Option<T>> {
        let tree = self
            .db
            .open_tree(namespace)
            .map_err(|e| PipelineError::Persistence(format!("open_tree: {e}")))?;
        let raw = match key {
            Some(k) => tree.get(k.as_bytes()),
            None => tree.get(b"__default__"),
        }
        .map_err(|e| PipelineError::Persistence(format!("get: {e}")))?;
        raw.map(|bytes| {
            bincode::deserialize(&bytes)
                .map_err(|e| PipelineError::Persistence(format!("decode: {e}")))
        })
        .transpose()
    }

    /// Deep-copy snapshot of every row in a [`TrainingRowStrategy`]-backed
    /// namespace, in key order (insertion-timestamp order, since keys are
    /// zero-padded decimal nanosecond timestamps).
    pub fn scan<T: serde::de::DeserializeOwned>(&self, namespace: &str) -> PipelineResult<Vec<T>> {
        let tree = self
            .db
            .open_tree(namespace)
            .map_err(|e| PipelineError::Persistence(format!("open_tree: {e}")))?;
        tree.iter()
            .values()
            .map(|res| {
                let bytes = res.map_err(|e| PipelineError::Persistence(format!("iter: {e}")))?;
                bincode::deserialize(&bytes).map_err(|e| PipelineError::Persistence(format!("decode: {e}")))
            })
            .collect()
    }

    /// Deep-copy snapshot read of every entry appended under
    /// `(namespace, key)` by [`NgramStrategy`], in arrival order.
    pub fn read_appended<T: serde::de::DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> PipelineResult<Vec<T>> {
        let tree = self
            .db
            .open_tree(namespace)
            .map_err(|e| PipelineError::Persistence(format!("open_tree: {e}")))?;
        let raw = tree
            .get(key.as_bytes())
            .map_err(|e| PipelineError::Persistence(format!("get: {e}")))?;
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };
        let blobs: Vec<Vec<u8>> = bincode::deserialize(&raw)
            .map_err(|e| PipelineError::Persistence(format!("decode outer: {e}")))?;
        blobs
            .iter()
            .map(|blob| {
                bincode::deserialize(blob)
                    .map_err(|e| PipelineError::Persistence(format!("decode entry: {e}")))
            })
            .collect()
    }
}

fn run_writer(db: sled::Db, receiver: Receiver<WriteItem>, maintenance_mode: Arc<AtomicBool>) {
    loop {
        while maintenance_mode.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(50));
        }
        match receiver.recv_timeout(Duration::from_millis(200)) {
            Ok(item) => {
                if let Err(err) = item
                    .strategy
                    .apply(&db, &item.namespace, item.key.as_deref(), item.payload)
                {
                    tracing::error!(namespace = %item.namespace, error = %err, "persistence write failed");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        label: u8,
    }

    fn wait_for<T, F: Fn() -> PipelineResult<Option<T>>>(f: F) -> Option<T> {
        for _ in 0..50 {
            if let Ok(Some(v)) = f() {
                return Some(v);
            }
            thread::sleep(Duration::from_millis(20));
        }
        None
    }

    #[test]
    fn default_strategy_write_then_read_round_trips() {
        let handle = PersistenceHandle::open_temporary().unwrap();
        handle
            .write(Arc::new(DefaultStrategy), "lr_model_dict", None, &Row { label: 1 })
            .unwrap();
        let got: Row = wait_for(|| handle.read("lr_model_dict", None)).unwrap();
        assert_eq!(got, Row { label: 1 });
    }

    #[test]
    fn training_rows_are_each_kept_under_their_own_key() {
        let handle = PersistenceHandle::open_temporary().unwrap();
        handle
            .write(
                Arc::new(TrainingRowStrategy),
                "data",
                Some("t1".into()),
                &Row { label: 0 },
            )
            .unwrap();
        handle
            .write(
                Arc::new(TrainingRowStrategy),
                "data",
                Some("t2".into()),
                &Row { label: 1 },
            )
            .unwrap();
        let first: Row = wait_for(|| handle.read("data", Some("t1"))).unwrap();
        let second: Row = wait_for(|| handle.read("data", Some("t2"))).unwrap();
        assert_eq!(first, Row { label: 0 });
        assert_eq!(second, Row { label: 1 });
    }

    #[test]
    fn ngram_appends_are_readable_in_arrival_order() {
        let handle = PersistenceHandle::open_temporary().unwrap();
        handle
            .write(
                Arc::new(NgramStrategy),
                "query_ngrams:GET:/",
                Some("monograms".into()),
                &Row { label: 1 },
            )
            .unwrap();
        handle
            .write(
                Arc::new(NgramStrategy),
                "query_ngrams:GET:/",
                Some("monograms".into()),
                &Row { label: 2 },
            )
            .unwrap();
        let entries: Vec<Row> = loop {
            let got = handle
                .read_appended("query_ngrams:GET:/", "monograms")
                .unwrap();
            if got.len() == 2 {
                break got;
            }
            thread::sleep(Duration::from_millis(20));
        };
        assert_eq!(entries, vec![Row { label: 1 }, Row { label: 2 }]);
    }

    #[test]
    fn maintenance_mode_pauses_the_writer() {
        let handle = PersistenceHandle::open_temporary().unwrap();
        handle.set_maintenance_mode(true);
        handle
            .write(Arc::new(DefaultStrategy), "lr_model_dict", None, &Row { label: 9 })
            .unwrap();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(handle.read::<Row>("lr_model_dict", None).unwrap(), None);
        handle.set_maintenance_mode(false);
        let got: Row = wait_for(|| handle.read("lr_model_dict", None)).unwrap();
        assert_eq!(got, Row { label: 9 });
    }
}
