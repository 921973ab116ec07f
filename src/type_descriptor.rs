//! The `(method, path, has_query, has_body)` key shared by every per-type
//! subsystem (n-gram pools, model factories).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Identifies the "shape" of a request class.
///
/// Hashable and totally ordered by method, then path, then the two flags —
/// `original_source/type.py`'s `Type` dataclass hashes on the same tuple.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub method: String,
    pub path: String,
    pub has_query: bool,
    pub has_body: bool,
}

impl TypeDescriptor {
    pub fn new(method: impl Into<String>, path: impl Into<String>, has_query: bool, has_body: bool) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            has_query,
            has_body,
        }
    }

    fn sort_key(&self) -> (&str, &str, bool, bool) {
        (&self.method, &self.path, self.has_query, self.has_body)
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl std::hash::Hash for TypeDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.method.hash(state);
        self.path.hash(state);
        self.has_query.hash(state);
        self.has_body.hash(state);
    }
}

impl PartialOrd for TypeDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl std::fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} (query={}, body={})",
            self.method, self.path, self.has_query, self.has_body
        )
    }
}
