//! Sentinel IDS: an inline HTTP intrusion-detection reverse proxy.
//!
//! Five stages composed as a linear chain on the acquisition server's
//! handling thread — acquisition → filter → typing → extraction → model —
//! each either forwarding to its successor or short-circuiting with an
//! alert. See `DESIGN.md` for how each module grounds in the prototype
//! this was rebuilt from.
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod acquisition;
pub mod alerting;
pub mod config;
pub mod dto;
pub mod error;
pub mod extraction;
pub mod filter;
pub mod message;
pub mod model;
pub mod persistence;
pub mod pipeline;
pub mod type_descriptor;
pub mod typing;

pub use error::{PipelineError, PipelineResult};
pub use message::HttpMessage;
pub use pipeline::Pipeline;
pub use type_descriptor::TypeDescriptor;
