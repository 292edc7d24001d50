//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper, typed parsing of `/history` entries,
//! workflow template loading with node bindings, and the
//! [`GenerationBackend`](backend::GenerationBackend) seam the pipeline
//! talks to.

pub mod api;
pub mod backend;
pub mod history;
pub mod workflow;
