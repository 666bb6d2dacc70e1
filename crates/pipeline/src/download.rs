//! HTTP downloads into a run's work directory.

use std::path::Path;

use reelswap_core::error::PipelineError;
use tokio::io::AsyncWriteExt;

/// What a download must declare in its `Content-Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// `video/*` or `application/octet-stream`.
    Video,
    Any,
}

fn content_type_accepted(content_type: Option<&str>, expect: Expect) -> bool {
    match expect {
        Expect::Any => true,
        Expect::Video => content_type
            .map(|ct| ct.contains("video") || ct.contains("octet-stream"))
            .unwrap_or(false),
    }
}

/// Stream `url` into `dest`, returning the number of bytes written.
///
/// Non-success statuses and rejected content types are `DownloadFailed`;
/// a partially written file is removed.
pub async fn download_to_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    expect: Expect,
) -> Result<u64, PipelineError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PipelineError::DownloadFailed(format!("GET {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::DownloadFailed(format!(
            "GET {url} returned {status}"
        )));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if !content_type_accepted(content_type.as_deref(), expect) {
        return Err(PipelineError::DownloadFailed(format!(
            "{url} is not a video (content type {})",
            content_type.as_deref().unwrap_or("missing")
        )));
    }

    let file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| write_error(dest, e))?;
    match stream_body(response, file, url, dest).await {
        Ok(written) => {
            tracing::debug!(url, path = %dest.display(), bytes = written, "Downloaded file");
            Ok(written)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(dest).await;
            Err(e)
        }
    }
}

fn write_error(dest: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::DownloadFailed(format!("write {}: {e}", dest.display()))
}

async fn stream_body(
    mut response: reqwest::Response,
    mut file: tokio::fs::File,
    url: &str,
    dest: &Path,
) -> Result<u64, PipelineError> {
    let mut written = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| PipelineError::DownloadFailed(format!("reading body of {url}: {e}")))?
    {
        file.write_all(&chunk).await.map_err(|e| write_error(dest, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| write_error(dest, e))?;
    Ok(written)
}

/// Fetch `url` fully into memory.
pub async fn download_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, PipelineError> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| PipelineError::DownloadFailed(format!("GET {url}: {e}")))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| PipelineError::DownloadFailed(format!("reading body of {url}: {e}")))?;
    Ok(bytes.to_vec())
}
