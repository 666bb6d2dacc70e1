//! Resolution of share links to directly downloadable video URLs.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reelswap_core::error::PipelineError;
use reelswap_core::types::is_remote_url;
use serde::Deserialize;

/// Turns a user-supplied source URL into a URL that serves video bytes.
#[async_trait]
pub trait VideoResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<String, PipelineError>;
}

pub const TIKWM_BASE_URL: &str = "https://api.tikwm.com";
pub const TIKTOK_MOBILE_BASE_URL: &str = "https://m.tiktok.com";

const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 13_2_3 like Mac OS X) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.0.3 Mobile/15E148 Safari/604.1";

const DIRECT_VIDEO_EXTENSIONS: [&str; 3] = [".mp4", ".mov", ".webm"];

static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/video/(\d+)").expect("valid regex"));

/// Extract the numeric id from a `/video/<digits>` URL.
pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether the URL path already names a video file.
pub fn is_direct_video_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    DIRECT_VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Resolver for short-video share links.
///
/// Strategies, in order: the tikwm public API, then the mobile item-detail
/// API. Direct video URLs pass through untouched.
pub struct TikTokResolver {
    client: reqwest::Client,
    tikwm_base: String,
    mobile_base: String,
}

#[derive(Debug, Deserialize)]
struct TikwmResponse {
    data: Option<TikwmData>,
}

#[derive(Debug, Deserialize)]
struct TikwmData {
    play: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemDetail {
    item_info: Option<ItemInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemInfo {
    item_struct: Option<ItemStruct>,
}

#[derive(Debug, Deserialize)]
struct ItemStruct {
    video: Option<ItemVideo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemVideo {
    play_addr: Option<String>,
}

impl TikTokResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_endpoints(client, TIKWM_BASE_URL, TIKTOK_MOBILE_BASE_URL)
    }

    pub fn with_endpoints(
        client: reqwest::Client,
        tikwm_base: impl Into<String>,
        mobile_base: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tikwm_base: tikwm_base.into().trim_end_matches('/').to_string(),
            mobile_base: mobile_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Find the video id, following redirects for short links.
    async fn video_id(&self, url: &str) -> Result<String, PipelineError> {
        if let Some(id) = extract_video_id(url) {
            return Ok(id);
        }

        tracing::debug!(url, "No video id in URL, following redirects");
        let final_url = match self.client.head(url).send().await {
            Ok(response) => response.url().to_string(),
            Err(e) => {
                tracing::warn!(url, error = %e, "Redirect lookup failed");
                String::new()
            }
        };

        extract_video_id(&final_url).ok_or_else(|| {
            PipelineError::ResolutionFailed(format!("could not extract a video id from {url}"))
        })
    }

    async fn via_tikwm(&self, id: &str) -> Result<Option<String>, reqwest::Error> {
        let response: TikwmResponse = self
            .client
            .get(format!("{}/video/data", self.tikwm_base))
            .query(&[("id", id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.data.and_then(|d| d.play).filter(|u| !u.is_empty()))
    }

    async fn via_mobile_api(&self, id: &str) -> Result<Option<String>, reqwest::Error> {
        let response: ItemDetail = self
            .client
            .get(format!("{}/api/item/detail/", self.mobile_base))
            .query(&[("itemId", id)])
            .header(reqwest::header::USER_AGENT, MOBILE_USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response
            .item_info
            .and_then(|i| i.item_struct)
            .and_then(|s| s.video)
            .and_then(|v| v.play_addr)
            .filter(|u| !u.is_empty()))
    }
}

#[async_trait]
impl VideoResolver for TikTokResolver {
    async fn resolve(&self, url: &str) -> Result<String, PipelineError> {
        let url = url.trim();
        if !is_remote_url(url) {
            return Err(PipelineError::InvalidInput(format!(
                "source must be an http(s) URL, got '{url}'"
            )));
        }
        if is_direct_video_url(url) {
            return Ok(url.to_string());
        }

        let id = self.video_id(url).await?;

        match self.via_tikwm(&id).await {
            Ok(Some(play)) => {
                tracing::info!(video_id = %id, strategy = "tikwm", "Resolved video");
                return Ok(play);
            }
            Ok(None) => tracing::debug!(video_id = %id, "tikwm returned no playable URL"),
            Err(e) => tracing::warn!(video_id = %id, error = %e, "tikwm lookup failed"),
        }

        match self.via_mobile_api(&id).await {
            Ok(Some(play)) => {
                tracing::info!(video_id = %id, strategy = "mobile_api", "Resolved video");
                return Ok(play);
            }
            Ok(None) => tracing::debug!(video_id = %id, "Mobile API returned no playable URL"),
            Err(e) => tracing::warn!(video_id = %id, error = %e, "Mobile API lookup failed"),
        }

        Err(PipelineError::ResolutionFailed(format!(
            "every strategy failed for video {id}"
        )))
    }
}
