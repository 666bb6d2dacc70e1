use crate::rate_limit::ServiceKey;
use crate::types::{ClipKey, FrameKey};

/// Failure of a pipeline stage.
///
/// Stage errors carry the frame or clip they concern (when known) so the
/// caller can retry that stage alone. The orchestrator passes them through
/// unchanged.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Could not resolve a playable video: {0}")]
    ResolutionFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Frame extraction failed for {frame} frame: {reason}")]
    FrameExtractionFailed { frame: FrameKey, reason: String },

    #[error("Face swap failed{}: {reason}", key_suffix(.frame))]
    SwapFailed {
        frame: Option<FrameKey>,
        reason: String,
    },

    #[error("Face swap timed out{} after {attempts} polls", key_suffix(.frame))]
    SwapTimeout {
        frame: Option<FrameKey>,
        attempts: u32,
    },

    #[error("Video generation failed{}: {reason}", key_suffix(.clip))]
    GenerationFailed {
        clip: Option<ClipKey>,
        reason: String,
    },

    #[error("Video generation timed out{} after {attempts} polls", key_suffix(.clip))]
    GenerationTimeout {
        clip: Option<ClipKey>,
        attempts: u32,
    },

    #[error("Stitching failed: {0}")]
    StitchFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Rate limited by {service} service")]
    RateLimited { service: ServiceKey },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Run {0} not found")]
    RunNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn key_suffix<K: std::fmt::Display>(key: &Option<K>) -> String {
    match key {
        Some(k) => format!(" for {k}"),
        None => String::new(),
    }
}

impl PipelineError {
    /// Stable machine-readable code for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ResolutionFailed(_) => "RESOLUTION_FAILED",
            PipelineError::DownloadFailed(_) => "DOWNLOAD_FAILED",
            PipelineError::FrameExtractionFailed { .. } => "FRAME_EXTRACTION_FAILED",
            PipelineError::SwapFailed { .. } => "SWAP_FAILED",
            PipelineError::SwapTimeout { .. } => "SWAP_TIMEOUT",
            PipelineError::GenerationFailed { .. } => "GENERATION_FAILED",
            PipelineError::GenerationTimeout { .. } => "GENERATION_TIMEOUT",
            PipelineError::StitchFailed(_) => "STITCH_FAILED",
            PipelineError::UploadFailed(_) => "UPLOAD_FAILED",
            PipelineError::RateLimited { .. } => "RATE_LIMITED",
            PipelineError::Unauthorized(_) => "UNAUTHORIZED",
            PipelineError::InvalidInput(_) => "INVALID_INPUT",
            PipelineError::RunNotFound(_) => "NOT_FOUND",
            PipelineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PipelineError::RateLimited { .. })
    }

    /// Attach a frame key to a face-swap error that does not carry one yet.
    pub fn for_frame(self, key: FrameKey) -> Self {
        match self {
            PipelineError::SwapFailed {
                frame: None,
                reason,
            } => PipelineError::SwapFailed {
                frame: Some(key),
                reason,
            },
            PipelineError::SwapTimeout {
                frame: None,
                attempts,
            } => PipelineError::SwapTimeout {
                frame: Some(key),
                attempts,
            },
            other => other,
        }
    }

    /// Attach a clip key to a generation error that does not carry one yet.
    pub fn for_clip(self, key: ClipKey) -> Self {
        match self {
            PipelineError::GenerationFailed { clip: None, reason } => {
                PipelineError::GenerationFailed {
                    clip: Some(key),
                    reason,
                }
            }
            PipelineError::GenerationTimeout {
                clip: None,
                attempts,
            } => PipelineError::GenerationTimeout {
                clip: Some(key),
                attempts,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_include_keys_when_present() {
        let err = PipelineError::SwapTimeout {
            frame: Some(FrameKey::Middle),
            attempts: 15,
        };
        assert_eq!(err.to_string(), "Face swap timed out for middle after 15 polls");

        let err = PipelineError::GenerationFailed {
            clip: None,
            reason: "nsfw".into(),
        };
        assert_eq!(err.to_string(), "Video generation failed: nsfw");
    }

    #[test]
    fn for_frame_fills_missing_key_only() {
        let err = PipelineError::SwapFailed {
            frame: None,
            reason: "no face".into(),
        }
        .for_frame(FrameKey::End);
        assert!(matches!(
            err,
            PipelineError::SwapFailed {
                frame: Some(FrameKey::End),
                ..
            }
        ));

        let err = PipelineError::SwapFailed {
            frame: Some(FrameKey::Start),
            reason: "no face".into(),
        }
        .for_frame(FrameKey::End);
        assert!(matches!(
            err,
            PipelineError::SwapFailed {
                frame: Some(FrameKey::Start),
                ..
            }
        ));
    }

    #[test]
    fn for_clip_leaves_unrelated_errors_alone() {
        let err = PipelineError::UploadFailed("413".into()).for_clip(ClipKey::Clip2);
        assert_eq!(err.kind(), "UPLOAD_FAILED");
    }

    #[test]
    fn rate_limited_is_detected() {
        let err = PipelineError::RateLimited {
            service: ServiceKey::FaceSwap,
        };
        assert!(err.is_rate_limited());
        assert_eq!(err.kind(), "RATE_LIMITED");
    }
}
