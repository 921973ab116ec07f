//! Alert bus — each stage is observable; observers receive `{message, source}`
//! alerts. Observers are expected to be non-blocking (§4.1): they append to a
//! stream, they do not do long work.

mod sink;

pub use sink::AlertSink;

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// A value-typed, log-only alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub message: String,
    pub source: String,
}

impl Alert {
    pub fn new(message: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: source.into(),
        }
    }
}

/// Receives alerts raised by any observable stage.
///
/// `update` may be called from any handler thread; implementations must be
/// internally thread-safe and must not block the caller for long.
pub trait Observer: Send + Sync {
    fn update(&self, alert: &Alert);
}

/// Per-instance owned container of observer references.
///
/// The original prototype stored `_observers` as a mutable *class*
/// attribute shared across all instances of a stage — every stage shared
/// one list. That is flagged for redesign in spec.md §9: each stage here
/// owns its own bus.
#[derive(Clone, Default)]
pub struct ObserverBus {
    observers: Arc<RwLock<Vec<Arc<dyn Observer>>>>,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, observer: Arc<dyn Observer>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    pub fn detach(&self, observer: &Arc<dyn Observer>) {
        let mut guard = self.observers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = guard.iter().position(|o| Arc::ptr_eq(o, observer)) {
            guard.remove(pos);
        }
    }

    pub fn notify(&self, alert: &Alert) {
        let observers = self.observers.read().unwrap_or_else(|e| e.into_inner());
        for observer in observers.iter() {
            observer.update(alert);
        }
    }
}
