//! Image-to-video generation task providers.
//!
//! A generation request interpolates a clip between a head and a tail image,
//! guided by a text prompt. Both images must be public URLs.

mod kling;
mod piapi;
mod token;

use std::fmt;
use std::str::FromStr;

pub use kling::{KlingProvider, DEFAULT_KLING_BASE_URL};
pub use piapi::{PiApiGeneration, PIAPI_KLING_BASE_URL};
pub use token::{KlingTokenSigner, TOKEN_REFRESH_MARGIN_SECS, TOKEN_TTL_SECS};

use reelswap_core::error::PipelineError;
use reelswap_core::types::is_remote_url;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DURATION_SECS: u32 = 5;
pub const DEFAULT_ASPECT_RATIO: &str = "9:16";
pub const DEFAULT_SAMPLE_COUNT: u32 = 2;

/// Rendering quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Standard,
    Pro,
}

/// One image-to-video task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub head_image_url: String,
    pub tail_image_url: String,
    pub duration_secs: u32,
    pub aspect_ratio: String,
    pub sample_count: u32,
    pub quality: Quality,
}

impl GenerationRequest {
    /// Build a request with the default duration, aspect ratio, sample count
    /// and quality.
    ///
    /// Fails with `InvalidInput` if the prompt is blank or either image is
    /// not an `http(s)` URL.
    pub fn new(
        prompt: impl Into<String>,
        head_image_url: impl Into<String>,
        tail_image_url: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let prompt = prompt.into();
        let head_image_url = head_image_url.into();
        let tail_image_url = tail_image_url.into();

        if prompt.trim().is_empty() {
            return Err(PipelineError::InvalidInput("prompt must not be empty".into()));
        }
        for (label, url) in [("head", &head_image_url), ("tail", &tail_image_url)] {
            if !is_remote_url(url) {
                return Err(PipelineError::InvalidInput(format!(
                    "{label} image must be a public http(s) URL, got '{url}'"
                )));
            }
        }

        Ok(Self {
            prompt,
            head_image_url,
            tail_image_url,
            duration_secs: DEFAULT_DURATION_SECS,
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            sample_count: DEFAULT_SAMPLE_COUNT,
            quality: Quality::Standard,
        })
    }

    pub fn with_duration(mut self, secs: u32) -> Self {
        self.duration_secs = secs.max(1);
        self
    }

    pub fn with_aspect_ratio(mut self, ratio: impl Into<String>) -> Self {
        self.aspect_ratio = ratio.into();
        self
    }

    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count.max(1);
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }
}

/// Which generation backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationBackend {
    PiApi,
    Kling,
}

impl fmt::Display for GenerationBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationBackend::PiApi => f.write_str("piapi"),
            GenerationBackend::Kling => f.write_str("kling"),
        }
    }
}

impl FromStr for GenerationBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "piapi" => Ok(GenerationBackend::PiApi),
            "kling" => Ok(GenerationBackend::Kling),
            other => Err(format!(
                "unknown generation provider '{other}' (expected piapi or kling)"
            )),
        }
    }
}
