//! Generation requests, segments and the multi-prompt caption format.
//!
//! A long video is described by a caption that alternates prompt lines and
//! frame-count lines:
//!
//! ```text
//! a fox trots through snow
//! 81
//! the fox leaps over a log
//! 65
//! 40
//! ```
//!
//! A frame-count line with no prompt before it continues the previous
//! segment's prompt (the trailing `40` above).

use std::path::PathBuf;

use serde::Serialize;
use validator::{Validate, ValidationError};

use crate::error::CoreError;
use crate::types::Resolution;

/// Smallest frame count the video model accepts per segment.
pub const MIN_FRAMES: u32 = 2;

/// Largest frame count the video model accepts per segment.
pub const MAX_FRAMES: u32 = 125;

/// One user submission. Immutable once handed to the orchestrator.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct GenerationRequest {
    #[validate(custom(function = "not_blank"))]
    pub prompt: String,
    /// Image fed to the first segment, already staged on local disk.
    pub input_media: Option<PathBuf>,
    #[validate(range(min = 2, max = 125))]
    pub frame_count: u32,
    /// Shared by every segment of the request.
    pub resolution: Resolution,
}

/// One link of a long-video chain. `sequence_index` is 0-based playback order.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct Segment {
    pub sequence_index: usize,
    #[validate(custom(function = "not_blank"))]
    pub prompt: String,
    #[validate(range(min = 2, max = 125))]
    pub frame_count: u32,
    /// Last frame of the previous segment, filled in by the orchestrator.
    pub source_frame: Option<PathBuf>,
}

impl Segment {
    pub fn new(sequence_index: usize, prompt: impl Into<String>, frame_count: u32) -> Self {
        Self {
            sequence_index,
            prompt: prompt.into(),
            frame_count,
            source_frame: None,
        }
    }

    /// 1-based position used in user-facing messages and errors.
    pub fn position(&self) -> usize {
        self.sequence_index + 1
    }
}

impl GenerationRequest {
    /// The one-segment chain for a plain (non-caption) request.
    pub fn single_segment(&self) -> Vec<Segment> {
        vec![Segment::new(0, self.prompt.clone(), self.frame_count)]
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message("must not be empty".into()));
    }
    Ok(())
}

/// Check a frame count against the model bounds.
pub fn validate_frame_count(frames: u32) -> Result<(), CoreError> {
    if !(MIN_FRAMES..=MAX_FRAMES).contains(&frames) {
        return Err(CoreError::Validation(format!(
            "Frame count must be between {MIN_FRAMES} and {MAX_FRAMES} (got {frames})"
        )));
    }
    Ok(())
}

/// Check that a prompt still has text after marker stripping.
pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation(
            "Prompt must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Prompt and frame count for one segment, before indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    pub prompt: String,
    pub frame_count: u32,
}

/// Result of parsing a user caption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caption {
    /// No frame-count lines: the whole caption is one prompt.
    Single(String),
    /// Alternating prompt / frame-count lines.
    Segments(Vec<SegmentPlan>),
}

/// Parse a caption into a single prompt or an ordered list of segments.
pub fn parse_caption(caption: &str) -> Result<Caption, CoreError> {
    let lines: Vec<&str> = caption
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if lines.is_empty() {
        return Err(CoreError::Validation("Caption is empty".to_string()));
    }

    if !lines.iter().any(|l| is_frame_line(l)) {
        return Ok(Caption::Single(lines.join(" ")));
    }

    let mut plans: Vec<SegmentPlan> = Vec::new();
    let mut pending: Option<&str> = None;

    for (line_no, line) in lines.iter().enumerate() {
        if is_frame_line(line) {
            let frames: i64 = line.parse().map_err(|_| {
                CoreError::Validation(format!("Line {}: invalid frame count '{line}'", line_no + 1))
            })?;
            let frames = u32::try_from(frames).map_err(|_| {
                CoreError::Validation(format!(
                    "Line {}: frame count must be between {MIN_FRAMES} and {MAX_FRAMES} (got {frames})",
                    line_no + 1
                ))
            })?;
            validate_frame_count(frames)
                .map_err(|e| CoreError::Validation(format!("Line {}: {e}", line_no + 1)))?;

            let prompt = match pending.take() {
                Some(p) => p.to_string(),
                None => match plans.last() {
                    Some(previous) => previous.prompt.clone(),
                    None => {
                        return Err(CoreError::Validation(format!(
                            "Line {}: frame count without a preceding prompt",
                            line_no + 1
                        )))
                    }
                },
            };
            plans.push(SegmentPlan {
                prompt,
                frame_count: frames,
            });
        } else {
            if pending.is_some() {
                return Err(CoreError::Validation(format!(
                    "Line {}: expected a frame count after the previous prompt",
                    line_no + 1
                )));
            }
            pending = Some(line);
        }
    }

    if pending.is_some() {
        return Err(CoreError::Validation(
            "Last prompt is missing its frame count".to_string(),
        ));
    }

    Ok(Caption::Segments(plans))
}

fn is_frame_line(line: &str) -> bool {
    let digits = line.strip_prefix('-').unwrap_or(line);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn request(prompt: &str, frames: u32) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.into(),
            input_media: None,
            frame_count: frames,
            resolution: Resolution::PORTRAIT,
        }
    }

    // -- frame bounds --

    #[test]
    fn frame_bounds_inclusive() {
        assert!(validate_frame_count(2).is_ok());
        assert!(validate_frame_count(125).is_ok());
    }

    #[test]
    fn frame_bounds_reject_outside() {
        assert_matches!(validate_frame_count(1), Err(CoreError::Validation(_)));
        assert_matches!(validate_frame_count(126), Err(CoreError::Validation(_)));
        assert_matches!(validate_frame_count(0), Err(CoreError::Validation(_)));
    }

    #[test]
    fn request_validation_uses_same_bounds() {
        assert!(request("a cat", 2).validate().is_ok());
        assert!(request("a cat", 125).validate().is_ok());
        assert!(request("a cat", 1).validate().is_err());
        assert!(request("a cat", 126).validate().is_err());
    }

    #[test]
    fn blank_prompt_rejected() {
        assert!(request("   ", 50).validate().is_err());
        assert!(validate_prompt("").is_err());
        let err: CoreError = request("", 50).validate().unwrap_err().into();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn single_segment_mirrors_request() {
        let segments = request("a cat", 81).single_segment();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].sequence_index, 0);
        assert_eq!(segments[0].prompt, "a cat");
        assert_eq!(segments[0].frame_count, 81);
        assert!(segments[0].source_frame.is_none());
        assert_eq!(segments[0].position(), 1);
    }

    // -- caption parsing --

    #[test]
    fn caption_without_numbers_is_single_prompt() {
        let caption = parse_caption("a dog\nrunning in a park\n").unwrap();
        assert_eq!(caption, Caption::Single("a dog running in a park".into()));
    }

    #[test]
    fn caption_alternating_lines() {
        let caption = parse_caption("a fox\n81\n\n  a fox jumps  \n65\n").unwrap();
        assert_eq!(
            caption,
            Caption::Segments(vec![
                SegmentPlan {
                    prompt: "a fox".into(),
                    frame_count: 81
                },
                SegmentPlan {
                    prompt: "a fox jumps".into(),
                    frame_count: 65
                },
            ])
        );
    }

    #[test]
    fn caption_bare_frame_line_reuses_previous_prompt() {
        let caption = parse_caption("waves\n50\n40").unwrap();
        let Caption::Segments(plans) = caption else {
            panic!("expected segments");
        };
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[1].prompt, "waves");
        assert_eq!(plans[1].frame_count, 40);
    }

    #[test]
    fn caption_leading_number_rejected() {
        assert!(parse_caption("81\na fox").is_err());
    }

    #[test]
    fn caption_two_prompts_in_a_row_rejected() {
        assert!(parse_caption("a fox\na bear\n81").is_err());
    }

    #[test]
    fn caption_trailing_prompt_rejected() {
        let err = parse_caption("a fox\n81\na bear").unwrap_err();
        assert!(err.to_string().contains("missing its frame count"));
    }

    #[test]
    fn caption_out_of_range_frames_rejected() {
        assert!(parse_caption("a fox\n126").is_err());
        assert!(parse_caption("a fox\n1").is_err());
        assert!(parse_caption("a fox\n-5").is_err());
    }

    #[test]
    fn empty_caption_rejected() {
        assert!(parse_caption("  \n \n").is_err());
    }
}
