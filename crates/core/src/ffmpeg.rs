//! FFmpeg/FFprobe shared command utilities.
//!
//! Thin async wrappers around the `ffprobe` and `ffmpeg` binaries. Every
//! function spawns the tool through `tokio::process`, so callers only ever
//! suspend their task while a subprocess runs.

use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;

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

    #[error("input file not found: {0}")]
    InputNotFound(String),

    #[error("ffmpeg produced no output at {0}")]
    NoOutput(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub index: i32,
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub duration: Option<String>,
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

    let output = Command::new("ffprobe")
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

    check_status(&output)?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<FfprobeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
}

/// Extract a single frame as PNG at `timestamp_secs`.
///
/// Succeeds only if ffmpeg exits cleanly *and* wrote a non-empty file; a seek
/// past the last decodable frame exits 0 without output.
pub async fn extract_frame_png(
    video_path: &Path,
    output_path: &Path,
    timestamp_secs: f64,
) -> Result<(), FfmpegError> {
    ensure_exists(video_path)?;

    let output = Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-ss", &format!("{timestamp_secs:.3}"), "-i"])
        .arg(video_path)
        .args(["-frames:v", "1", "-f", "image2", "-c:v", "png"])
        .arg(output_path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    check_status(&output)?;
    ensure_non_empty(output_path).await
}

/// Concatenate the inputs listed in a concat manifest without re-encoding.
///
/// Inputs with mismatched codecs or parameters make ffmpeg fail; no
/// transcoding fallback is attempted.
pub async fn concat_copy(manifest_path: &Path, output_path: &Path) -> Result<(), FfmpegError> {
    ensure_exists(manifest_path)?;

    let output = Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-f", "concat", "-safe", "0", "-i"])
        .arg(manifest_path)
        .args(["-c", "copy"])
        .arg(output_path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    check_status(&output)?;
    ensure_non_empty(output_path).await
}

/// Re-encode an image as a JPEG no larger than `max_dimension` on either side.
///
/// `quality` is the ffmpeg `-q:v` scale (2 = best, 31 = worst).
pub async fn compress_image(
    input_path: &Path,
    output_path: &Path,
    max_dimension: u32,
    quality: u8,
) -> Result<(), FfmpegError> {
    ensure_exists(input_path)?;

    let scale = format!(
        "scale='min({max_dimension},iw)':'min({max_dimension},ih)':force_original_aspect_ratio=decrease"
    );
    let output = Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-i"])
        .arg(input_path)
        .args(["-vf", &scale, "-q:v", &quality.clamp(2, 31).to_string()])
        .arg(output_path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    check_status(&output)?;
    ensure_non_empty(output_path).await
}

/// Re-encode any single image ffmpeg can decode as PNG.
pub async fn convert_to_png(input_path: &Path, output_path: &Path) -> Result<(), FfmpegError> {
    ensure_exists(input_path)?;

    let output = Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-i"])
        .arg(input_path)
        .args(["-frames:v", "1", "-f", "image2", "-c:v", "png"])
        .arg(output_path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    check_status(&output)?;
    ensure_non_empty(output_path).await
}

// ---------------------------------------------------------------------------
// Concat manifest
// ---------------------------------------------------------------------------

/// Quote a path for a concat-demuxer `file` directive.
///
/// Every `'` becomes `'\''` (close quote, escaped quote, reopen quote).
pub fn escape_manifest_path(path: &str) -> String {
    path.replace('\'', r"'\''")
}

/// Build the concat-demuxer manifest for `paths`, one `file '<path>'` line each.
pub fn build_concat_manifest<P: AsRef<Path>>(paths: &[P]) -> String {
    paths
        .iter()
        .map(|p| {
            let escaped = escape_manifest_path(&p.as_ref().to_string_lossy());
            format!("file '{escaped}'")
        })
        .collect::<Vec<_>>()
        .join("\n")
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

/// Parse the media duration in seconds from ffprobe output.
///
/// Prefers the container duration, then the first video stream's. Returns
/// `None` when neither parses.
pub fn parse_duration(probe: &FfprobeOutput) -> Option<f64> {
    let from_format = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok());
    from_format.or_else(|| {
        first_video_stream(probe)
            .and_then(|s| s.duration.as_deref())
            .and_then(|d| d.parse::<f64>().ok())
    })
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn ensure_exists(path: &Path) -> Result<(), FfmpegError> {
    if path.exists() {
        Ok(())
    } else {
        Err(FfmpegError::InputNotFound(path.to_string_lossy().to_string()))
    }
}

fn check_status(output: &std::process::Output) -> Result<(), FfmpegError> {
    if output.status.success() {
        return Ok(());
    }
    Err(FfmpegError::ExecutionFailed {
        exit_code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

async fn ensure_non_empty(path: &Path) -> Result<(), FfmpegError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(FfmpegError::NoOutput(path.to_string_lossy().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use assert_matches::assert_matches;

    use super::*;

    fn probe(format_duration: Option<&str>, stream_duration: Option<&str>) -> FfprobeOutput {
        FfprobeOutput {
            streams: vec![FfprobeStream {
                index: 0,
                codec_name: Some("h264".into()),
                codec_type: Some("video".into()),
                duration: stream_duration.map(Into::into),
            }],
            format: FfprobeFormat {
                duration: format_duration.map(Into::into),
                format_name: Some("mov,mp4,m4a,3gp,3g2,mj2".into()),
            },
        }
    }

    #[test]
    fn test_parse_duration_from_format() {
        let d = parse_duration(&probe(Some("12.480000"), Some("12.0"))).unwrap();
        assert!((d - 12.48).abs() < 0.001);
    }

    #[test]
    fn test_parse_duration_from_stream() {
        let d = parse_duration(&probe(None, Some("6.0"))).unwrap();
        assert!((d - 6.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_duration_missing() {
        assert_eq!(parse_duration(&probe(Some("N/A"), None)), None);
    }

    #[test]
    fn test_probe_json_without_streams() {
        let json = r#"{"format": {"duration": "3.5"}}"#;
        let parsed: FfprobeOutput = serde_json::from_str(json).unwrap();
        assert!(parsed.streams.is_empty());
        assert_eq!(parse_duration(&parsed), Some(3.5));
    }

    #[test]
    fn test_escape_manifest_path() {
        assert_eq!(escape_manifest_path("/tmp/it's.mp4"), r"/tmp/it'\''s.mp4");
        assert_eq!(escape_manifest_path("/tmp/plain.mp4"), "/tmp/plain.mp4");
    }

    #[test]
    fn test_build_concat_manifest_keeps_order() {
        let paths = [PathBuf::from("/w/localA.mp4"), PathBuf::from("/w/clip_1.mp4")];
        assert_eq!(
            build_concat_manifest(&paths),
            "file '/w/localA.mp4'\nfile '/w/clip_1.mp4'"
        );
    }

    #[tokio::test]
    async fn test_missing_input_is_reported_before_spawning() {
        let result = probe_video(Path::new("/definitely/not/here.mp4")).await;
        assert_matches!(result, Err(FfmpegError::InputNotFound(_)));

        let result = concat_copy(
            Path::new("/definitely/not/here.txt"),
            Path::new("/tmp/out.mp4"),
        )
        .await;
        assert_matches!(result, Err(FfmpegError::InputNotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.png");
        tokio::fs::write(&empty, b"").await.unwrap();
        assert_matches!(ensure_non_empty(&empty).await, Err(FfmpegError::NoOutput(_)));

        let missing = dir.path().join("missing.png");
        assert_matches!(ensure_non_empty(&missing).await, Err(FfmpegError::NoOutput(_)));
    }
}
