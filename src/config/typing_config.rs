//! Typing stage configuration: the a-priori "core" topology.
//!
//! Shape (spec.md §6, grounded on `original_source/stages/typing/config.json`
//! consumers in `typing.py::init_core`):
//!
//! ```json
//! { "paths": [ { "path": "/", "methods": ["GET"] }, ... ] }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorePathEntry {
    pub path: String,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TypingConfig {
    pub paths: Vec<CorePathEntry>,
}

impl TypingConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: TypingConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn empty() -> Self {
        Self::default()
    }
}
