//! The immutable HTTP message value that flows through the pipeline.

use serde::{Deserialize, Serialize};

/// An acquired HTTP request, immutable after construction.
///
/// `header` preserves wire order and duplicate header names, matching how
/// `original_source/message.py`'s `IDSHTTPMessage` carries the raw header
/// multimap straight through to its `__str__` rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpMessage {
    pub source_address: String,
    pub method: String,
    pub path: String,
    pub query: String,
    pub protocol_version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpMessage {
    pub fn has_query(&self) -> bool {
        !self.query.is_empty()
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Octet count of the method-line + headers + body, per the data model.
    pub fn length(&self) -> usize {
        let method_line = self.method.len()
            + 1
            + self.path.len()
            + if self.has_query() { 1 + self.query.len() } else { 0 }
            + 1
            + self.protocol_version.len();
        let headers: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + 2 + v.len() + 2)
            .sum();
        method_line + headers + self.body.len()
    }

    pub fn body_as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn header_count(&self) -> usize {
        self.headers.len()
    }
}
