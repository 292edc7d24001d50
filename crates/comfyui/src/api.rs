//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (workflow submission, history retrieval,
//! output download and a health probe) using [`reqwest`].

use serde::Deserialize;

use crate::history::{HistoryEntry, OutputFile};

/// HTTP client for a single ComfyUI instance.
///
/// Construct one per process and pass it (or an `Arc` of it) to whatever
/// needs to talk to the server; the inner [`reqwest::Client`] pools
/// connections.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    client_id: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
    /// Per-node validation errors; empty when the graph was accepted.
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The body was JSON but not in the shape we expected.
    #[error("Unexpected ComfyUI response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url`   - Base HTTP URL, e.g. `http://host:8188`.
    /// * `client_id` - Identifier sent with every submission.
    pub fn new(api_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, client_id)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        let api_url: String = api_url.into();
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            client_id: client_id.into(),
        }
    }

    /// HTTP API base URL (e.g. `http://host:8188`).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID.  Returns the server-assigned `prompt_id` and queue
    /// position.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": self.client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve the history entry for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. ComfyUI answers with an
    /// empty object until the prompt has finished, so `Ok(None)` means
    /// "still queued or running".
    pub async fn get_history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        let body: serde_json::Value = Self::parse_response(response).await?;
        Ok(crate::history::entry_for(&body, prompt_id)?)
    }

    /// Download an output file through `GET /view`.
    pub async fn view(&self, file: &OutputFile) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[
                ("filename", file.filename.as_str()),
                ("subfolder", file.subfolder.as_str()),
                ("type", file.kind.as_str()),
            ])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Fetch `GET /system_stats`; used as a reachability probe.
    pub async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_trimmed_from_base_url() {
        let api = ComfyUIApi::new("http://localhost:8188/", "bot");
        assert_eq!(api.api_url(), "http://localhost:8188");
        assert_eq!(api.client_id(), "bot");
    }

    #[test]
    fn submit_response_tolerates_missing_optional_fields() {
        let resp: SubmitResponse = serde_json::from_str(r#"{"prompt_id":"abc"}"#).unwrap();
        assert_eq!(resp.prompt_id, "abc");
        assert_eq!(resp.number, 0);
        assert!(resp.node_errors.is_null());
    }
}
