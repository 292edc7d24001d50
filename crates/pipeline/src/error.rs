use mediabot_comfyui::api::ComfyUIApiError;
use mediabot_comfyui::workflow::TemplateError;
use mediabot_core::error::CoreError;

use crate::media::MediaError;

/// Everything that can stop a generation request.
///
/// `segment` is the 1-based position of the failing segment when the
/// failure belongs to one; request-level failures leave it `None`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Rejected locally before any network call.
    #[error("Validation failed{}: {message}", at(.segment))]
    Validation {
        segment: Option<usize>,
        message: String,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),

    /// ComfyUI refused the job.
    #[error("Submission rejected{}: {source}", at(.segment))]
    Submission {
        segment: Option<usize>,
        #[source]
        source: ComfyUIApiError,
    },

    /// ComfyUI accepted the job but reported that it failed.
    #[error("Generation failed{} (job {job_id}): {message}", at(.segment))]
    Generation {
        segment: Option<usize>,
        job_id: String,
        message: String,
    },

    /// No terminal status within the configured window.
    #[error("Timed out{} after {waited_secs}s waiting for job {job_id}", at(.segment))]
    Timeout {
        segment: Option<usize>,
        job_id: String,
        waited_secs: u64,
    },

    /// The previous segment's output could not seed this segment.
    #[error("Segment {segment} could not continue from segment {}: {source}", .segment.saturating_sub(1))]
    SegmentChain {
        segment: usize,
        #[source]
        source: MediaError,
    },

    #[error("Media processing failed{}: {source}", at(.segment))]
    Media {
        segment: Option<usize>,
        #[source]
        source: MediaError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn at(segment: &Option<usize>) -> String {
    match segment {
        Some(n) => format!(" at segment {n}"),
        None => String::new(),
    }
}

impl PipelineError {
    /// 1-based segment position this error refers to, if any.
    pub fn segment(&self) -> Option<usize> {
        match self {
            PipelineError::Validation { segment, .. }
            | PipelineError::Submission { segment, .. }
            | PipelineError::Generation { segment, .. }
            | PipelineError::Timeout { segment, .. }
            | PipelineError::Media { segment, .. } => *segment,
            PipelineError::SegmentChain { segment, .. } => Some(*segment),
            PipelineError::Template(_) | PipelineError::Io(_) => None,
        }
    }

    /// Attach a segment position unless one is already set.
    pub fn at_segment(mut self, position: usize) -> Self {
        match &mut self {
            PipelineError::Validation { segment, .. }
            | PipelineError::Submission { segment, .. }
            | PipelineError::Generation { segment, .. }
            | PipelineError::Timeout { segment, .. }
            | PipelineError::Media { segment, .. } => {
                segment.get_or_insert(position);
            }
            PipelineError::SegmentChain { .. }
            | PipelineError::Template(_)
            | PipelineError::Io(_) => {}
        }
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        PipelineError::Validation {
            segment: None,
            message: message.into(),
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(message) => PipelineError::Validation {
                segment: None,
                message,
            },
        }
    }
}

impl From<validator::ValidationErrors> for PipelineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        PipelineError::validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_segment_position() {
        let err = PipelineError::Generation {
            segment: Some(2),
            job_id: "abc".into(),
            message: "out of memory".into(),
        };
        assert_eq!(
            err.to_string(),
            "Generation failed at segment 2 (job abc): out of memory"
        );
    }

    #[test]
    fn display_without_segment() {
        let err = PipelineError::validation("Caption is empty");
        assert_eq!(err.to_string(), "Validation failed: Caption is empty");
    }

    #[test]
    fn at_segment_does_not_overwrite() {
        let err = PipelineError::Timeout {
            segment: Some(1),
            job_id: "x".into(),
            waited_secs: 5,
        }
        .at_segment(3);
        assert_eq!(err.segment(), Some(1));

        let err = PipelineError::validation("bad").at_segment(3);
        assert_eq!(err.segment(), Some(3));
    }

    #[test]
    fn chain_error_names_both_segments() {
        let err = PipelineError::SegmentChain {
            segment: 3,
            source: MediaError::Unsupported("seg2.mp4".into()),
        };
        assert!(err.to_string().starts_with("Segment 3 could not continue from segment 2"));
        assert_eq!(err.segment(), Some(3));
    }
}
