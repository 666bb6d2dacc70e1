//! Face-swap task providers.
//!
//! A swap takes a target frame and a face image and produces the frame with
//! the face replaced. Two interchangeable backends implement
//! [`TaskProvider<Request = SwapRequest>`](crate::task::TaskProvider):
//!
//! - [`PiApiFaceSwap`]: hosted asynchronous task API.
//! - [`FaceFusionProvider`]: self-hosted FaceFusion microservice.

mod facefusion;
mod piapi;

use std::fmt;
use std::str::FromStr;

pub use facefusion::{FaceFusionProvider, DEFAULT_FACEFUSION_URL};
pub use piapi::{PiApiFaceSwap, PIAPI_FACESWAP_BASE_URL};

use reelswap_core::error::PipelineError;

/// Images above this size must be re-encoded before submission.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// One face-swap task: put `face` onto `target`.
#[derive(Clone)]
pub struct SwapRequest {
    /// The frame to modify (PNG).
    pub target: Vec<u8>,
    /// The user's face image.
    pub face: Vec<u8>,
}

impl fmt::Debug for SwapRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapRequest")
            .field("target_bytes", &self.target.len())
            .field("face_bytes", &self.face.len())
            .finish()
    }
}

impl SwapRequest {
    pub fn new(target: Vec<u8>, face: Vec<u8>) -> Result<Self, PipelineError> {
        if target.is_empty() {
            return Err(PipelineError::InvalidInput("target image is empty".into()));
        }
        if face.is_empty() {
            return Err(PipelineError::InvalidInput("face image is empty".into()));
        }
        Ok(Self { target, face })
    }
}

/// Which face-swap backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceSwapBackend {
    PiApi,
    FaceFusion,
}

impl fmt::Display for FaceSwapBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaceSwapBackend::PiApi => f.write_str("piapi"),
            FaceSwapBackend::FaceFusion => f.write_str("facefusion"),
        }
    }
}

impl FromStr for FaceSwapBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "piapi" => Ok(FaceSwapBackend::PiApi),
            "facefusion" => Ok(FaceSwapBackend::FaceFusion),
            other => Err(format!(
                "unknown face-swap provider '{other}' (expected piapi or facefusion)"
            )),
        }
    }
}
