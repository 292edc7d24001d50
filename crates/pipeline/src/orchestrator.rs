//! Multi-segment generation.
//!
//! A request runs as a strict chain: segment N+1 is submitted only after
//! segment N has succeeded and its last frame has been extracted. Finished
//! segments are concatenated in order. Every request works inside its own
//! `req_<uuid>` directory, which is removed when the request ends either way
//! (including when the `generate` future is dropped); only the final file
//! survives, next to it as `final_<uuid>.<ext>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mediabot_comfyui::workflow::WorkflowTemplate;
use mediabot_core::segment::{validate_frame_count, validate_prompt, GenerationRequest, Segment};
use mediabot_core::types::Resolution;
use tokio::sync::broadcast;
use uuid::Uuid;
use validator::Validate;

use crate::error::PipelineError;
use crate::events::{GenerationEvent, ProgressBus};
use crate::media::MediaTools;
use crate::poller::{move_file, JobPoller};
use crate::submitter::{JobSubmitter, Submission};

pub struct SegmentOrchestrator {
    submitter: JobSubmitter,
    poller: JobPoller,
    media: Arc<dyn MediaTools>,
    video_template: WorkflowTemplate,
    image_template: Option<WorkflowTemplate>,
    work_dir: PathBuf,
    timeout: Duration,
    events: ProgressBus,
}

impl SegmentOrchestrator {
    pub fn new(
        submitter: JobSubmitter,
        poller: JobPoller,
        media: Arc<dyn MediaTools>,
        video_template: WorkflowTemplate,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            submitter,
            poller,
            media,
            video_template,
            image_template: None,
            work_dir: Self::absolute(work_dir.into()),
            timeout,
            events: ProgressBus::default(),
        }
    }

    /// Enable [`generate_image`](Self::generate_image).
    pub fn with_image_template(mut self, template: WorkflowTemplate) -> Self {
        self.image_template = Some(template);
        self
    }

    pub fn with_events(mut self, events: ProgressBus) -> Self {
        self.events = events;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.events.subscribe()
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Relative work dirs are resolved against the current directory once,
    /// so every path handed to ffmpeg is absolute.
    fn absolute(path: PathBuf) -> PathBuf {
        std::path::absolute(&path).unwrap_or(path)
    }

    /// Generate every segment in order and return the final media file.
    ///
    /// All segments are validated before the first submission. The first
    /// failure aborts the chain, removes partial outputs and is returned
    /// with its 1-based segment position.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        segments: Vec<Segment>,
    ) -> Result<PathBuf, PipelineError> {
        let request_id = Uuid::new_v4();
        if let Err(e) = self.validate(request, &segments) {
            return Err(self.failed(request_id, e));
        }
        let req_dir = RequestDir::create(&self.work_dir, request_id)
            .await
            .map_err(|e| self.failed(request_id, e.into()))?;

        tracing::info!(
            %request_id,
            segments = segments.len(),
            resolution = %request.resolution,
            "Starting generation",
        );

        let result = self
            .run_chain(request_id, request, segments, req_dir.path())
            .await;
        self.finish(request_id, result, req_dir).await
    }

    /// Text-to-image: one job on the image template, no source image.
    pub async fn generate_image(
        &self,
        prompt: &str,
        resolution: Resolution,
    ) -> Result<PathBuf, PipelineError> {
        let request_id = Uuid::new_v4();
        let checked = match &self.image_template {
            None => Err(PipelineError::validation(
                "No text-to-image workflow is configured",
            )),
            Some(template) => validate_prompt(prompt)
                .map(|()| template)
                .map_err(PipelineError::from),
        };
        let template = checked.map_err(|e| self.failed(request_id, e))?;

        let req_dir = RequestDir::create(&self.work_dir, request_id)
            .await
            .map_err(|e| self.failed(request_id, e.into()))?;
        tracing::info!(%request_id, %resolution, "Starting image generation");

        let submission = Submission {
            template,
            prompt,
            resolution,
            frame_count: None,
            source_image: None,
        };
        let result = self
            .run_job(request_id, 1, &submission, req_dir.path())
            .await;
        self.finish(request_id, result, req_dir).await
    }

    fn validate(
        &self,
        request: &GenerationRequest,
        segments: &[Segment],
    ) -> Result<(), PipelineError> {
        if segments.is_empty() {
            return Err(PipelineError::validation("Request has no segments"));
        }
        request.validate()?;

        for segment in segments {
            let position = segment.position();
            let at = |e: PipelineError| e.at_segment(position);
            validate_prompt(&segment.prompt).map_err(|e| at(e.into()))?;
            validate_frame_count(segment.frame_count).map_err(|e| at(e.into()))?;
            segment.validate().map_err(|e| at(e.into()))?;
        }

        if self.video_template.takes_image() && request.input_media.is_none() {
            return Err(PipelineError::validation(format!(
                "Workflow '{}' needs a starting image",
                self.video_template.name()
            )));
        }
        Ok(())
    }

    async fn run_chain(
        &self,
        request_id: Uuid,
        request: &GenerationRequest,
        segments: Vec<Segment>,
        req_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let total = segments.len();
        let mut outputs: Vec<PathBuf> = Vec::with_capacity(total);

        for mut segment in segments {
            let position = segment.position();

            segment.source_frame = match outputs.last() {
                None => request.input_media.clone(),
                Some(previous) => {
                    let frame = req_dir.join(format!("seg_{position:03}_start.png"));
                    self.media
                        .extract_last_frame(previous, &frame)
                        .await
                        .map_err(|source| PipelineError::SegmentChain {
                            segment: position,
                            source,
                        })?;
                    Some(frame)
                }
            };

            self.events.publish(GenerationEvent::SegmentStarted {
                request_id,
                segment: position,
                total,
            });
            tracing::info!(%request_id, segment = position, total, "Starting segment");

            let submission = Submission {
                template: &self.video_template,
                prompt: &segment.prompt,
                resolution: request.resolution,
                frame_count: Some(segment.frame_count),
                source_image: segment.source_frame.as_deref(),
            };
            let seg_dir = req_dir.join(format!("seg_{position:03}"));
            let output = self
                .run_job(request_id, position, &submission, &seg_dir)
                .await
                .map_err(|e| e.at_segment(position))?;
            outputs.push(output);
        }

        if total == 1 {
            return outputs.pop().ok_or_else(|| PipelineError::validation("Request has no segments"));
        }

        self.events.publish(GenerationEvent::Concatenating {
            request_id,
            segments: total,
        });
        tracing::info!(%request_id, segments = total, "Concatenating segments");

        let combined = req_dir.join(format!("combined.{}", extension_of(&outputs[0])));
        self.media
            .concat(&outputs, &combined)
            .await
            .map_err(|source| PipelineError::Media {
                segment: None,
                source,
            })?;
        Ok(combined)
    }

    /// Submit one job, wait for it and release its staged input.
    async fn run_job(
        &self,
        request_id: Uuid,
        position: usize,
        submission: &Submission<'_>,
        dest_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let started = Instant::now();
        let mut job = self.submitter.submit(submission).await?;

        self.events.publish(GenerationEvent::SegmentSubmitted {
            request_id,
            segment: position,
            job_id: job.id.clone(),
        });

        let result = self
            .poller
            .await_completion(&mut job, self.timeout, dest_dir)
            .await;
        job.release_input().await;

        let output = result?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.events.publish(GenerationEvent::SegmentCompleted {
            request_id,
            segment: position,
            elapsed_ms,
        });
        tracing::info!(
            %request_id,
            segment = position,
            job_id = %job.id,
            elapsed_ms,
            "Segment completed",
        );
        Ok(output)
    }

    /// Move a successful result out of the request dir, then drop the dir.
    async fn finish(
        &self,
        request_id: Uuid,
        result: Result<PathBuf, PipelineError>,
        req_dir: RequestDir,
    ) -> Result<PathBuf, PipelineError> {
        let result = match result {
            Ok(output) => {
                let final_path = self.work_dir.join(format!(
                    "final_{}.{}",
                    request_id.simple(),
                    extension_of(&output)
                ));
                move_file(&output, &final_path)
                    .await
                    .map(|()| final_path)
                    .map_err(PipelineError::from)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_dir_all(req_dir.path()).await {
            tracing::warn!(path = %req_dir.path().display(), error = %e, "Failed to remove request directory");
        }
        drop(req_dir);

        match result {
            Ok(path) => {
                tracing::info!(%request_id, path = %path.display(), "Generation completed");
                self.events.publish(GenerationEvent::Completed {
                    request_id,
                    path: path.clone(),
                });
                Ok(path)
            }
            Err(e) => Err(self.failed(request_id, e)),
        }
    }

    /// Log and publish a failed request, including local rejections.
    fn failed(&self, request_id: Uuid, error: PipelineError) -> PipelineError {
        tracing::error!(%request_id, segment = ?error.segment(), error = %error, "Generation failed");
        self.events.publish(GenerationEvent::Failed {
            request_id,
            segment: error.segment(),
            message: error.to_string(),
        });
        error
    }
}

/// Scratch directory of one request. Removed on drop as well, so a
/// request whose future is abandoned mid-chain leaves nothing behind.
struct RequestDir(PathBuf);

impl RequestDir {
    async fn create(work_dir: &Path, request_id: Uuid) -> std::io::Result<Self> {
        let path = work_dir.join(format!("req_{}", request_id.simple()));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for RequestDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.0.display(), error = %e, "Failed to remove request directory");
            }
        }
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".to_string())
}
