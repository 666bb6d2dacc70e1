//! Shared HTTP response handling for provider clients.
//!
//! Every provider funnels its responses through [`ensure_success`] and
//! [`parse_json`], then converts failures with [`HttpError::into_pipeline`],
//! which is where HTTP 429 becomes [`PipelineError::RateLimited`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reelswap_core::error::PipelineError;
use reelswap_core::rate_limit::ServiceKey;
use serde::de::DeserializeOwned;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Errors from the HTTP layer of a provider client.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated, for debugging.
        body: String,
    },

    /// A 2xx response whose body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Payload(String),
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Api { status, .. } => Some(*status),
            HttpError::Request(e) => e.status().map(|s| s.as_u16()),
            HttpError::Payload(_) => None,
        }
    }

    /// Classify into the pipeline taxonomy.
    ///
    /// 429 maps to `RateLimited { service }`, 401/403 to `Unauthorized`, and
    /// everything else goes through `wrap` with the error text.
    pub fn into_pipeline(
        self,
        service: ServiceKey,
        wrap: impl FnOnce(String) -> PipelineError,
    ) -> PipelineError {
        match self.status() {
            Some(429) => PipelineError::RateLimited { service },
            Some(401) | Some(403) => PipelineError::Unauthorized(self.to_string()),
            _ => wrap(self.to_string()),
        }
    }
}

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or an [`HttpError::Api`] with the status and body
/// text on failure.
pub async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, HttpError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(HttpError::Api {
            status: status.as_u16(),
            body: truncate(body),
        });
    }
    Ok(response)
}

/// Parse a successful JSON response body into the expected type.
pub async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, HttpError> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        HttpError::Payload(format!(
            "{e}: {}",
            truncate(String::from_utf8_lossy(&bytes).into_owned())
        ))
    })
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

/// Guess an image MIME type from its leading bytes. Defaults to PNG.
pub fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/png"
    }
}

/// Encode image bytes as a `data:` URL.
pub fn image_data_url(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", sniff_image_mime(bytes), STANDARD.encode(bytes))
}
