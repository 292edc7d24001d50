//! Domain types and pure logic for the media generation bot.
//!
//! Nothing in this crate performs I/O: orientation resolution, caption
//! parsing, request validation and the strategy capability seam all live
//! here so the pipeline crate can stay focused on talking to ComfyUI and
//! ffmpeg.

pub mod error;
pub mod orientation;
pub mod segment;
pub mod strategy;
pub mod types;
