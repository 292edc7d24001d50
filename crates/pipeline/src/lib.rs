//! Generation pipeline: turns a planned request into ComfyUI jobs,
//! waits for them, chains long-video segments through their last frames
//! and stitches the results together.
//!
//! - [`request::RequestPlanner`] resolves orientation and builds the
//!   request/segment list from a caption and optional upload.
//! - [`submitter::JobSubmitter`] renders a template and queues it.
//! - [`poller::JobPoller`] waits for a job and retrieves its output.
//! - [`orchestrator::SegmentOrchestrator`] runs the whole chain.

pub mod config;
pub mod error;
pub mod events;
pub mod ffmpeg;
pub mod job;
pub mod media;
pub mod orchestrator;
pub mod poller;
pub mod request;
pub mod submitter;

pub use error::PipelineError;
