//! The seam between the generation pipeline and a ComfyUI server.
//!
//! The pipeline only ever needs three calls: queue a graph, look up its
//! history entry, and fetch an output file. [`ComfyUIApi`] implements them
//! over HTTP; tests substitute in-memory fakes.

use async_trait::async_trait;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::{HistoryEntry, OutputFile};

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Queue a rendered workflow graph and return the server's prompt id.
    async fn submit(&self, workflow: &serde_json::Value) -> Result<String, ComfyUIApiError>;

    /// History entry for `prompt_id`, or `None` while it has not finished.
    async fn history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError>;

    /// Raw bytes of an output file.
    async fn download(&self, file: &OutputFile) -> Result<Vec<u8>, ComfyUIApiError>;
}

#[async_trait]
impl GenerationBackend for ComfyUIApi {
    async fn submit(&self, workflow: &serde_json::Value) -> Result<String, ComfyUIApiError> {
        let response = self.submit_workflow(workflow).await?;
        tracing::debug!(
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Workflow queued",
        );
        Ok(response.prompt_id)
    }

    async fn history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        self.get_history(prompt_id).await
    }

    async fn download(&self, file: &OutputFile) -> Result<Vec<u8>, ComfyUIApiError> {
        self.view(file).await
    }
}
