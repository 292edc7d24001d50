//! Typed view of ComfyUI `/history` entries.
//!
//! `GET /history/{prompt_id}` answers `{}` while a prompt is queued or
//! running and `{"<prompt_id>": {...}}` once it has finished. The entry
//! carries a status block and per-node outputs:
//!
//! ```json
//! {"status": {"status_str": "success", "completed": true, "messages": []},
//!  "outputs": {"9": {"gifs": [{"filename": "out_0001.mp4", "subfolder": "", "type": "output"}]}}}
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// One finished prompt as reported by ComfyUI.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: Option<HistoryStatus>,
    /// Outputs keyed by node id.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
}

/// Execution status block of a history entry.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStatus {
    /// `"success"` or `"error"`.
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, payload]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// Files written by one output node.
///
/// Video-combine nodes report their files under `gifs` for historical
/// reasons; newer save nodes use `videos`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub gifs: Vec<OutputFile>,
    #[serde(default)]
    pub videos: Vec<OutputFile>,
    #[serde(default)]
    pub images: Vec<OutputFile>,
}

/// Reference to a file in one of ComfyUI's storage folders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage folder: `output`, `temp` or `input`.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "output".to_string()
}

impl OutputFile {
    /// Location of this file under a local mirror of ComfyUI's output dir.
    pub fn local_path(&self, output_dir: &Path) -> PathBuf {
        let mut path = output_dir.to_path_buf();
        if !self.subfolder.is_empty() {
            path.push(&self.subfolder);
        }
        path.push(&self.filename);
        path
    }

    fn is_preview(&self) -> bool {
        self.kind == "temp"
    }
}

/// Interpretation of a history lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// No history entry yet.
    Pending,
    /// Finished; files ordered videos first, then images.
    Succeeded(Vec<OutputFile>),
    /// ComfyUI reported an execution error.
    Failed(String),
}

/// Pull the entry for `prompt_id` out of a `/history` response body.
pub fn entry_for(
    body: &serde_json::Value,
    prompt_id: &str,
) -> Result<Option<HistoryEntry>, serde_json::Error> {
    match body.get(prompt_id) {
        Some(entry) => serde_json::from_value(entry.clone()).map(Some),
        None => Ok(None),
    }
}

/// Classify an optional history entry.
pub fn job_state(entry: Option<&HistoryEntry>) -> JobState {
    match entry {
        None => JobState::Pending,
        Some(entry) => entry.state(),
    }
}

impl HistoryEntry {
    pub fn state(&self) -> JobState {
        if let Some(status) = &self.status {
            if status.status_str == "error" {
                return JobState::Failed(self.error_message());
            }
        }

        let files = self.output_files();
        if files.is_empty() {
            return JobState::Failed("Prompt finished without producing any output files".into());
        }
        JobState::Succeeded(files)
    }

    /// All persisted output files, video outputs before images.
    pub fn output_files(&self) -> Vec<OutputFile> {
        let videos = self
            .outputs
            .values()
            .flat_map(|o| o.gifs.iter().chain(o.videos.iter()));
        let images = self.outputs.values().flat_map(|o| o.images.iter());

        videos
            .chain(images)
            .filter(|f| !f.is_preview())
            .cloned()
            .collect()
    }

    /// Best-effort error text from the `execution_error` message.
    fn error_message(&self) -> String {
        let messages = self
            .status
            .as_ref()
            .map(|s| s.messages.as_slice())
            .unwrap_or_default();

        messages
            .iter()
            .filter_map(|m| m.as_array())
            .filter(|pair| pair.first().and_then(|n| n.as_str()) == Some("execution_error"))
            .filter_map(|pair| pair.get(1))
            .map(|data| {
                let node = data.get("node_id").and_then(|v| v.as_str()).unwrap_or("?");
                let kind = data
                    .get("exception_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("error");
                let text = data
                    .get("exception_message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .trim();
                format!("node {node}: {kind}: {text}")
            })
            .next()
            .unwrap_or_else(|| "ComfyUI reported an execution error".to_string())
    }
}
