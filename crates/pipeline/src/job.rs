//! A single ComfyUI prompt tracked from submission to a terminal state.

use std::path::PathBuf;

use mediabot_core::types::Timestamp;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut
        )
    }
}

/// Owns its staged input: a job dropped before [`Job::release_input`]
/// (e.g. an abandoned request) still removes the file.
#[derive(Debug, Serialize)]
pub struct Job {
    /// ComfyUI prompt id.
    pub id: String,
    pub status: JobStatus,
    pub submitted_at: Timestamp,
    /// Set only once the job has succeeded and its output was retrieved.
    pub result_path: Option<PathBuf>,
    /// Copy of the source image placed in ComfyUI's input directory.
    #[serde(skip)]
    pub staged_input: Option<PathBuf>,
}

impl Job {
    pub fn queued(id: impl Into<String>, staged_input: Option<PathBuf>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            submitted_at: chrono::Utc::now(),
            result_path: None,
            staged_input,
        }
    }

    pub(crate) fn finish(&mut self, status: JobStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
    }

    /// Delete the staged input, if any. Safe to call more than once.
    pub async fn release_input(&mut self) {
        if let Some(path) = self.staged_input.take() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        job_id = %self.id,
                        path = %path.display(),
                        error = %e,
                        "Failed to remove staged input",
                    );
                }
            }
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if let Some(path) = self.staged_input.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        job_id = %self.id,
                        path = %path.display(),
                        error = %e,
                        "Failed to remove staged input",
                    );
                }
            }
        }
    }
}
