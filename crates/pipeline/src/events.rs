//! Progress events published by the orchestrator.
//!
//! Delivered over a `tokio::sync::broadcast` channel. Publishing with no
//! subscribers is not an error; slow subscribers see `RecvError::Lagged`.

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Channel capacity; progress is low-volume.
pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GenerationEvent {
    SegmentStarted {
        request_id: Uuid,
        segment: usize,
        total: usize,
    },
    SegmentSubmitted {
        request_id: Uuid,
        segment: usize,
        job_id: String,
    },
    SegmentCompleted {
        request_id: Uuid,
        segment: usize,
        elapsed_ms: u64,
    },
    Concatenating {
        request_id: Uuid,
        segments: usize,
    },
    Completed {
        request_id: Uuid,
        path: PathBuf,
    },
    Failed {
        request_id: Uuid,
        segment: Option<usize>,
        message: String,
    },
}

impl GenerationEvent {
    pub fn request_id(&self) -> Uuid {
        match self {
            GenerationEvent::SegmentStarted { request_id, .. }
            | GenerationEvent::SegmentSubmitted { request_id, .. }
            | GenerationEvent::SegmentCompleted { request_id, .. }
            | GenerationEvent::Concatenating { request_id, .. }
            | GenerationEvent::Completed { request_id, .. }
            | GenerationEvent::Failed { request_id, .. } => *request_id,
        }
    }
}

/// Fan-out publisher for [`GenerationEvent`]s.
#[derive(Debug, Clone)]
pub struct ProgressBus {
    sender: broadcast::Sender<GenerationEvent>,
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: GenerationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.sender.subscribe()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
