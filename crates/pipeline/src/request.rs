//! Turn a user caption and optional upload into a validated request.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mediabot_core::orientation::OrientationResolver;
use mediabot_core::segment::{parse_caption, validate_prompt, Caption, GenerationRequest, Segment};
use uuid::Uuid;
use validator::Validate;

use crate::error::PipelineError;
use crate::media::{media_kind, MediaKind, MediaTools};

/// A request ready for [`SegmentOrchestrator::generate`](crate::orchestrator::SegmentOrchestrator::generate).
#[derive(Debug, Clone)]
pub struct PlannedRequest {
    pub request: GenerationRequest,
    pub segments: Vec<Segment>,
    /// Planner-owned directory holding a derived input frame, if any.
    pub scratch: Option<PathBuf>,
}

pub struct RequestPlanner {
    resolver: OrientationResolver,
    media: Arc<dyn MediaTools>,
    work_dir: PathBuf,
}

impl RequestPlanner {
    pub fn new(
        resolver: OrientationResolver,
        media: Arc<dyn MediaTools>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolver,
            media,
            work_dir: work_dir.into(),
        }
    }

    pub fn resolver(&self) -> &OrientationResolver {
        &self.resolver
    }

    /// Parse `caption`, fix the orientation and prepare the input frame.
    ///
    /// An uploaded video contributes its last frame, cropped to the target
    /// resolution. An uploaded image is used as-is.
    pub async fn plan(
        &self,
        caption: &str,
        media: Option<&Path>,
        default_frames: u32,
    ) -> Result<PlannedRequest, PipelineError> {
        let plans: Vec<(String, u32)> = match parse_caption(caption)? {
            Caption::Single(prompt) => vec![(prompt, default_frames)],
            Caption::Segments(plans) => plans
                .into_iter()
                .map(|p| (p.prompt, p.frame_count))
                .collect(),
        };

        let kind = match media {
            Some(path) => Some(
                media_kind(path)
                    .ok_or_else(|| PipelineError::validation(format!(
                        "Unsupported media type: {}",
                        path.display()
                    )))?,
            ),
            None => None,
        };

        let dimensions = match media {
            Some(path) => Some(self.media.dimensions(path).await.map_err(media_err)?),
            None => None,
        };

        let joined = plans
            .iter()
            .map(|(p, _)| p.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let resolution = self.resolver.resolve(&joined, dimensions).resolution;

        let mut segments = Vec::with_capacity(plans.len());
        for (index, (prompt, frames)) in plans.into_iter().enumerate() {
            let segment = Segment::new(index, self.resolver.strip(&prompt), frames);
            validate_prompt(&segment.prompt)
                .map_err(|e| PipelineError::from(e).at_segment(segment.position()))?;
            segment
                .validate()
                .map_err(|e| PipelineError::from(e).at_segment(segment.position()))?;
            segments.push(segment);
        }

        let (input_media, scratch) = match (media, kind) {
            (Some(path), Some(MediaKind::Video)) => {
                let scratch = self.work_dir.join(format!("upload_{}", Uuid::new_v4().simple()));
                match self.frame_from_video(path, &scratch, resolution).await {
                    Ok(frame) => (Some(frame), Some(scratch)),
                    Err(e) => {
                        remove_dir(&scratch).await;
                        return Err(e);
                    }
                }
            }
            (Some(path), _) => (Some(path.to_path_buf()), None),
            (None, _) => (None, None),
        };

        let first = &segments[0];
        let request = GenerationRequest {
            prompt: first.prompt.clone(),
            input_media,
            frame_count: first.frame_count,
            resolution,
        };
        request.validate()?;

        tracing::info!(
            segments = segments.len(),
            resolution = %resolution,
            has_media = request.input_media.is_some(),
            "Planned generation request",
        );

        Ok(PlannedRequest {
            request,
            segments,
            scratch,
        })
    }

    async fn frame_from_video(
        &self,
        video: &Path,
        scratch: &Path,
        resolution: mediabot_core::types::Resolution,
    ) -> Result<PathBuf, PipelineError> {
        tokio::fs::create_dir_all(scratch).await?;
        let last = scratch.join("upload_last_frame.png");
        let cropped = scratch.join("input_frame.png");

        self.media
            .extract_last_frame(video, &last)
            .await
            .map_err(media_err)?;
        self.media
            .crop_to(&last, &cropped, resolution)
            .await
            .map_err(media_err)?;
        Ok(cropped)
    }
}

impl PlannedRequest {
    /// Remove the planner's scratch directory once the request is done.
    pub async fn discard_scratch(&mut self) {
        if let Some(dir) = self.scratch.take() {
            remove_dir(&dir).await;
        }
    }
}

fn media_err(source: crate::media::MediaError) -> PipelineError {
    PipelineError::Media {
        segment: None,
        source,
    }
}

async fn remove_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %dir.display(), error = %e, "Failed to remove scratch directory");
        }
    }
}
