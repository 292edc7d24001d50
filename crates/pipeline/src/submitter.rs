//! Render a workflow template and queue it on ComfyUI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mediabot_comfyui::backend::GenerationBackend;
use mediabot_comfyui::workflow::{RenderParams, WorkflowTemplate};
use mediabot_core::segment::{validate_frame_count, validate_prompt};
use mediabot_core::types::Resolution;

use crate::error::PipelineError;
use crate::job::Job;

/// Everything needed to queue one job.
#[derive(Debug, Clone)]
pub struct Submission<'a> {
    pub template: &'a WorkflowTemplate,
    pub prompt: &'a str,
    pub resolution: Resolution,
    /// Required by video templates, ignored by still-image ones.
    pub frame_count: Option<u32>,
    pub source_image: Option<&'a Path>,
}

pub struct JobSubmitter {
    backend: Arc<dyn GenerationBackend>,
    input_dir: PathBuf,
}

impl JobSubmitter {
    pub fn new(backend: Arc<dyn GenerationBackend>, input_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            input_dir: input_dir.into(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    /// Validate, stage the source image, render and submit.
    ///
    /// Returns a `Queued` job. Nothing is staged or sent when validation
    /// fails, and the staged copy is removed again if submission fails.
    pub async fn submit(&self, submission: &Submission<'_>) -> Result<Job, PipelineError> {
        let template = submission.template;
        validate_prompt(submission.prompt)?;

        let frames = if template.takes_frames() {
            let frames = submission.frame_count.ok_or_else(|| {
                PipelineError::validation(format!(
                    "Workflow '{}' needs a frame count",
                    template.name()
                ))
            })?;
            validate_frame_count(frames)?;
            Some(frames)
        } else {
            None
        };

        if template.takes_image() && submission.source_image.is_none() {
            return Err(PipelineError::validation(format!(
                "Workflow '{}' needs a source image",
                template.name()
            )));
        }

        let staged = match submission.source_image {
            Some(source) if template.takes_image() => Some(self.stage(source).await?),
            _ => None,
        };
        let staged_name = staged
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string());

        let mut job = Job::queued(String::new(), staged);
        let result = self
            .render_and_queue(submission, frames, staged_name.as_deref())
            .await;

        match result {
            Ok(prompt_id) => {
                job.id = prompt_id;
                tracing::info!(
                    job_id = %job.id,
                    template = template.name(),
                    resolution = %submission.resolution,
                    frames = ?frames,
                    "Job submitted",
                );
                Ok(job)
            }
            Err(e) => {
                job.release_input().await;
                Err(e)
            }
        }
    }

    async fn render_and_queue(
        &self,
        submission: &Submission<'_>,
        frames: Option<u32>,
        image: Option<&str>,
    ) -> Result<String, PipelineError> {
        let graph = submission.template.render(&RenderParams {
            prompt: submission.prompt,
            resolution: submission.resolution,
            frames,
            image,
        })?;

        self.backend
            .submit(&graph)
            .await
            .map_err(|source| PipelineError::Submission {
                segment: None,
                source,
            })
    }

    /// Copy `source` into the ComfyUI input dir as `<uuid>_<name>`.
    async fn stage(&self, source: &Path) -> Result<PathBuf, PipelineError> {
        let original = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                PipelineError::validation(format!(
                    "Source image has no file name: {}",
                    source.display()
                ))
            })?;

        tokio::fs::create_dir_all(&self.input_dir).await?;
        let staged = self.input_dir.join(staged_name(&original));
        tokio::fs::copy(source, &staged).await?;
        tracing::debug!(
            source = %source.display(),
            staged = %staged.display(),
            "Staged source image",
        );
        Ok(staged)
    }
}

fn staged_name(original: &str) -> String {
    format!("{}_{original}", uuid::Uuid::new_v4().simple())
}
