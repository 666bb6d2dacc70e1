//! The media tool seam.
//!
//! Extraction, swap post-processing and stitching shell out to ffmpeg and
//! ffprobe. Going through [`MediaTool`] keeps that behind one trait so the
//! pipeline can run against a fake in tests.

use std::path::Path;

use async_trait::async_trait;
use reelswap_core::ffmpeg::{self, FfmpegError};

/// ffmpeg `-q:v` used when compressing images.
const COMPRESSED_QUALITY: u8 = 3;

#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Duration of a media file in seconds, if the container reports one.
    async fn probe_duration(&self, video: &Path) -> Result<Option<f64>, FfmpegError>;

    /// Write the frame at `timestamp_secs` to `output` as PNG.
    async fn extract_png(
        &self,
        video: &Path,
        output: &Path,
        timestamp_secs: f64,
    ) -> Result<(), FfmpegError>;

    /// Stream-copy concatenate the files listed in a concat manifest.
    async fn concat(&self, manifest: &Path, output: &Path) -> Result<(), FfmpegError>;

    /// Re-encode an image as PNG.
    async fn to_png(&self, input: &Path, output: &Path) -> Result<(), FfmpegError>;

    /// Re-encode an image as a JPEG bounded to `max_dimension` per side.
    async fn compress_image(
        &self,
        input: &Path,
        output: &Path,
        max_dimension: u32,
    ) -> Result<(), FfmpegError>;
}

/// [`MediaTool`] backed by the `ffmpeg` and `ffprobe` binaries on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegTool;

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn probe_duration(&self, video: &Path) -> Result<Option<f64>, FfmpegError> {
        let probe = ffmpeg::probe_video(video).await?;
        Ok(ffmpeg::parse_duration(&probe))
    }

    async fn extract_png(
        &self,
        video: &Path,
        output: &Path,
        timestamp_secs: f64,
    ) -> Result<(), FfmpegError> {
        ffmpeg::extract_frame_png(video, output, timestamp_secs).await
    }

    async fn concat(&self, manifest: &Path, output: &Path) -> Result<(), FfmpegError> {
        ffmpeg::concat_copy(manifest, output).await
    }

    async fn to_png(&self, input: &Path, output: &Path) -> Result<(), FfmpegError> {
        ffmpeg::convert_to_png(input, output).await
    }

    async fn compress_image(
        &self,
        input: &Path,
        output: &Path,
        max_dimension: u32,
    ) -> Result<(), FfmpegError> {
        ffmpeg::compress_image(input, output, max_dimension, COMPRESSED_QUALITY).await
    }
}
