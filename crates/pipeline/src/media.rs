//! Media tooling seam.
//!
//! The orchestrator and planner only need four operations on local media
//! files. [`Ffmpeg`] implements them with the ffmpeg/ffprobe binaries and
//! the `image` crate; tests swap in fakes that write marker files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mediabot_core::types::Resolution;

use crate::ffmpeg::{self, FfmpegError};

/// Extensions accepted as still images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Extensions accepted as videos.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "avi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// Classify a file by extension.
pub fn media_kind(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error(transparent)]
    Ffmpeg(#[from] FfmpegError),

    #[error("failed to read image header: {0}")]
    Image(#[from] image::ImageError),

    #[error("unsupported media file: {0}")]
    Unsupported(PathBuf),

    #[error("media task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Pixel `(width, height)` of an image or the first video stream.
    async fn dimensions(&self, path: &Path) -> Result<(u32, u32), MediaError>;

    /// Write the final frame of `video` to `output` as PNG.
    async fn extract_last_frame(&self, video: &Path, output: &Path) -> Result<(), MediaError>;

    /// Center-crop `input` to the aspect of `target` and scale it to fit.
    async fn crop_to(&self, input: &Path, output: &Path, target: Resolution)
        -> Result<(), MediaError>;

    /// Join `inputs` in order into `output`.
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError>;
}

/// Production [`MediaTools`] backed by ffmpeg/ffprobe.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ffmpeg;

#[async_trait]
impl MediaTools for Ffmpeg {
    async fn dimensions(&self, path: &Path) -> Result<(u32, u32), MediaError> {
        match media_kind(path) {
            Some(MediaKind::Image) => {
                let path = path.to_path_buf();
                let dims = tokio::task::spawn_blocking(move || image::image_dimensions(&path))
                    .await??;
                Ok(dims)
            }
            Some(MediaKind::Video) => Ok(ffmpeg::probe_dimensions(path).await?),
            None => Err(MediaError::Unsupported(path.to_path_buf())),
        }
    }

    async fn extract_last_frame(&self, video: &Path, output: &Path) -> Result<(), MediaError> {
        Ok(ffmpeg::extract_last_frame(video, output).await?)
    }

    async fn crop_to(
        &self,
        input: &Path,
        output: &Path,
        target: Resolution,
    ) -> Result<(), MediaError> {
        Ok(ffmpeg::crop_to_resolution(input, output, target).await?)
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
        Ok(ffmpeg::concat_videos(inputs, output).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_by_extension() {
        assert_eq!(media_kind(Path::new("a.PNG")), Some(MediaKind::Image));
        assert_eq!(media_kind(Path::new("dir/b.jpeg")), Some(MediaKind::Image));
        assert_eq!(media_kind(Path::new("c.mp4")), Some(MediaKind::Video));
        assert_eq!(media_kind(Path::new("d.MOV")), Some(MediaKind::Video));
        assert_eq!(media_kind(Path::new("e.gif")), None);
        assert_eq!(media_kind(Path::new("noext")), None);
    }

    #[tokio::test]
    async fn image_dimensions_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        image::RgbImage::new(64, 36).save(&path).unwrap();

        let dims = Ffmpeg.dimensions(&path).await.unwrap();
        assert_eq!(dims, (64, 36));
    }

    #[tokio::test]
    async fn unsupported_extension_rejected() {
        let err = Ffmpeg.dimensions(Path::new("notes.txt")).await.unwrap_err();
        assert!(matches!(err, MediaError::Unsupported(_)));
    }
}
