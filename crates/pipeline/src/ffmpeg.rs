//! FFmpeg/FFprobe command wrappers used by the generation pipeline:
//! probing dimensions, grabbing the final frame of a segment,
//! center-cropping a frame into the target box, and stream-copy
//! concatenation of finished segments.

use std::path::{Path, PathBuf};

use mediabot_core::orientation::{center_crop, CropRect};
use mediabot_core::types::Resolution;
use serde::Deserialize;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("video file not found: {0}")]
    VideoNotFound(String),

    #[error("no frame could be decoded from {0}")]
    NoFrame(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub index: i32,
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub nb_frames: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
    pub format_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run `ffprobe` on a media file and return the parsed JSON output.
pub async fn probe_video(path: &Path) -> Result<FfprobeOutput, FfmpegError> {
    ensure_exists(path)?;

    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<FfprobeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
}

/// Probe a file and return its first video stream's `(width, height)`.
pub async fn probe_dimensions(path: &Path) -> Result<(u32, u32), FfmpegError> {
    let probe = probe_video(path).await?;
    parse_resolution(&probe).ok_or_else(|| {
        FfmpegError::ParseError(format!(
            "no video stream with dimensions in {}",
            path.display()
        ))
    })
}

/// Decode the final frame of `video_path` into `output_path` (PNG).
///
/// Seeks to one second before the end and keeps overwriting the output
/// with every decoded frame, so the file left behind is the last one.
pub async fn extract_last_frame(video_path: &Path, output_path: &Path) -> Result<(), FfmpegError> {
    ensure_exists(video_path)?;
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    run_ffmpeg(last_frame_args(video_path, output_path)).await?;

    if !output_path.exists() {
        return Err(FfmpegError::NoFrame(
            video_path.to_string_lossy().to_string(),
        ));
    }
    Ok(())
}

/// Center-crop an image to the aspect ratio of `target` and scale it to
/// exactly `target`.
pub async fn crop_to_resolution(
    input_path: &Path,
    output_path: &Path,
    target: Resolution,
) -> Result<(), FfmpegError> {
    let (width, height) = probe_dimensions(input_path).await?;
    let crop = center_crop(width, height, target);

    run_ffmpeg(vec![
        "-y".into(),
        "-i".into(),
        input_path.as_os_str().to_owned(),
        "-vf".into(),
        crop_filter(&crop, target).into(),
        "-frames:v".into(),
        "1".into(),
        output_path.as_os_str().to_owned(),
    ])
    .await
}

/// Concatenate segment files in order with the concat demuxer and
/// stream copy (no re-encode).
pub async fn concat_videos(inputs: &[PathBuf], output_path: &Path) -> Result<(), FfmpegError> {
    for input in inputs {
        ensure_exists(input)?;
    }

    let inputs = absolute_paths(inputs).await?;
    let list_path = output_path.with_extension("concat.txt");
    tokio::fs::write(&list_path, concat_list(&inputs)).await?;

    let result = run_ffmpeg(vec![
        "-y".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list_path.as_os_str().to_owned(),
        "-c".into(),
        "copy".into(),
        output_path.as_os_str().to_owned(),
    ])
    .await;

    if let Err(e) = tokio::fs::remove_file(&list_path).await {
        tracing::warn!(path = %list_path.display(), error = %e, "Failed to remove concat list");
    }
    result
}

// ---------------------------------------------------------------------------
// Argument builders
// ---------------------------------------------------------------------------

fn last_frame_args(video_path: &Path, output_path: &Path) -> Vec<std::ffi::OsString> {
    vec![
        "-y".into(),
        "-sseof".into(),
        "-1".into(),
        "-i".into(),
        video_path.as_os_str().to_owned(),
        "-update".into(),
        "1".into(),
        "-q:v".into(),
        "2".into(),
        output_path.as_os_str().to_owned(),
    ]
}

/// `crop=w:h:x:y,scale=W:H` filter for a center crop into `target`.
pub fn crop_filter(crop: &CropRect, target: Resolution) -> String {
    format!(
        "crop={}:{}:{}:{},scale={}:{}",
        crop.width, crop.height, crop.x, crop.y, target.width, target.height
    )
}

/// The concat demuxer resolves relative entries against the list file's
/// directory, not the working directory.
async fn absolute_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>, FfmpegError> {
    let mut absolute = Vec::with_capacity(paths.len());
    for path in paths {
        absolute.push(tokio::fs::canonicalize(path).await?);
    }
    Ok(absolute)
}

/// Concat-demuxer list file body; single quotes in paths are escaped.
pub fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| {
            let escaped = p.to_string_lossy().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Find the first video stream in the ffprobe output.
fn first_video_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Find the first video stream's resolution.
pub fn parse_resolution(probe: &FfprobeOutput) -> Option<(u32, u32)> {
    first_video_stream(probe).and_then(|s| match (s.width, s.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
        _ => None,
    })
}

fn ensure_exists(path: &Path) -> Result<(), FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::VideoNotFound(
            path.to_string_lossy().to_string(),
        ));
    }
    Ok(())
}

async fn run_ffmpeg(args: Vec<std::ffi::OsString>) -> Result<(), FfmpegError> {
    tracing::debug!(?args, "Running ffmpeg");

    let output = tokio::process::Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error"])
        .args(&args)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(())
}
