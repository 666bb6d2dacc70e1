//! Frame extraction: source URL to three PNG anchor frames.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reelswap_core::error::PipelineError;
use reelswap_core::timing::{self, FrameTimestamps, DEFAULT_DURATION_SECS};
use reelswap_core::types::{FrameAsset, FrameKey};
use reelswap_providers::resolver::VideoResolver;
use serde::Serialize;

use crate::download::{self, Expect};
use crate::media::MediaTool;

/// The start, middle and end frames of one video. Always complete.
#[derive(Debug, Clone)]
pub struct FrameSet {
    frames: BTreeMap<FrameKey, FrameAsset>,
}

impl FrameSet {
    pub fn get(&self, key: FrameKey) -> &FrameAsset {
        // Construction guarantees every key is present.
        &self.frames[&key]
    }

    pub fn iter(&self) -> impl Iterator<Item = (FrameKey, &FrameAsset)> {
        self.frames.iter().map(|(k, v)| (*k, v))
    }

    pub(crate) fn get_mut(&mut self, key: FrameKey) -> Option<&mut FrameAsset> {
        self.frames.get_mut(&key)
    }
}

/// Result of a successful extraction.
#[derive(Debug, Clone)]
pub struct ExtractedVideo {
    pub video_path: PathBuf,
    /// Duration used for the timestamps (probed, or the fallback).
    pub duration_secs: f64,
    pub timestamps: FrameTimestamps,
    pub frames: FrameSet,
}

/// Serializable summary of an extraction.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionSummary {
    pub video_path: PathBuf,
    pub duration_secs: f64,
    pub timestamps: FrameTimestamps,
}

impl ExtractedVideo {
    pub fn summary(&self) -> ExtractionSummary {
        ExtractionSummary {
            video_path: self.video_path.clone(),
            duration_secs: self.duration_secs,
            timestamps: self.timestamps,
        }
    }
}

pub struct FrameExtractor {
    client: reqwest::Client,
    resolver: Arc<dyn VideoResolver>,
    media: Arc<dyn MediaTool>,
}

impl FrameExtractor {
    pub fn new(
        client: reqwest::Client,
        resolver: Arc<dyn VideoResolver>,
        media: Arc<dyn MediaTool>,
    ) -> Self {
        Self {
            client,
            resolver,
            media,
        }
    }

    /// Resolve, download and probe `source_url`, then extract its anchor
    /// frames under a fresh directory inside `workdir`.
    ///
    /// Either all three frames are returned or none: on failure the
    /// extraction directory is removed.
    pub async fn extract(
        &self,
        source_url: &str,
        workdir: &Path,
    ) -> Result<ExtractedVideo, PipelineError> {
        let dir = workdir.join(format!("extract-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::Internal(format!("create {}: {e}", dir.display())))?;

        let result = self.extract_into(source_url, &dir).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to clean up extraction directory");
            }
        }
        result
    }

    async fn extract_into(&self, source_url: &str, dir: &Path) -> Result<ExtractedVideo, PipelineError> {
        let locator = self.resolver.resolve(source_url).await?;
        tracing::info!(source_url, locator = %locator, "Resolved source video");

        let video_path = dir.join("source.mp4");
        download::download_to_file(&self.client, &locator, &video_path, Expect::Video).await?;

        let probed = match self.media.probe_duration(&video_path).await {
            Ok(duration) => duration,
            Err(e) => {
                tracing::warn!(error = %e, "ffprobe failed");
                None
            }
        };
        let duration_secs = timing::effective_duration(probed);
        if probed != Some(duration_secs) {
            tracing::warn!(
                probed = ?probed,
                fallback = DEFAULT_DURATION_SECS,
                "Could not determine video duration, using fallback",
            );
        }

        let timestamps = timing::frame_timestamps(duration_secs);
        let frames = self
            .extract_frames(&video_path, dir, duration_secs, &timestamps)
            .await?;

        tracing::info!(
            duration_secs,
            start = timestamps.start,
            middle = timestamps.middle,
            end = timestamps.end,
            "Extracted anchor frames",
        );
        Ok(ExtractedVideo {
            video_path,
            duration_secs,
            timestamps,
            frames,
        })
    }

    async fn extract_frames(
        &self,
        video: &Path,
        dir: &Path,
        duration_secs: f64,
        timestamps: &FrameTimestamps,
    ) -> Result<FrameSet, PipelineError> {
        let jobs = FrameKey::ALL.map(|key| {
            let output = dir.join(format!("{key}.png"));
            let seek = timing::seek_position(timestamps.get(key), duration_secs);
            async move {
                let asset = self.extract_one(video, output, seek).await;
                (key, asset)
            }
        });

        // Let every extraction settle before reporting the first failure.
        let mut frames = BTreeMap::new();
        for (key, asset) in futures::future::join_all(jobs).await {
            let asset = asset.map_err(|reason| PipelineError::FrameExtractionFailed {
                frame: key,
                reason,
            })?;
            frames.insert(key, asset);
        }
        Ok(FrameSet { frames })
    }

    async fn extract_one(&self, video: &Path, output: PathBuf, seek: f64) -> Result<FrameAsset, String> {
        self.media
            .extract_png(video, &output, seek)
            .await
            .map_err(|e| e.to_string())?;
        let content = tokio::fs::read(&output).await.map_err(|e| e.to_string())?;
        FrameAsset::from_png(output, content).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::http::header;
    use axum::routing::get;
    use axum::Router;

    use super::*;
    use crate::test_support::spawn_server;
    use crate::testing::{FakeMedia, PassthroughResolver};

    async fn video_server() -> String {
        let router = Router::new()
            .route(
                "/clip.mp4",
                get(|| async { ([(header::CONTENT_TYPE, "video/mp4")], b"video".to_vec()) }),
            )
            .route(
                "/page",
                get(|| async { ([(header::CONTENT_TYPE, "text/html")], "nope") }),
            );
        spawn_server(router).await
    }

    fn extractor(media: Arc<FakeMedia>) -> FrameExtractor {
        FrameExtractor::new(reqwest::Client::new(), Arc::new(PassthroughResolver), media)
    }

    #[tokio::test]
    async fn twelve_second_video_yields_three_frames() {
        let base = video_server().await;
        let media = Arc::new(FakeMedia::with_duration(Some(12.0)));
        let dir = tempfile::tempdir().unwrap();

        let extracted = extractor(Arc::clone(&media))
            .extract(&format!("{base}/clip.mp4"), dir.path())
            .await
            .unwrap();

        assert_eq!(extracted.duration_secs, 12.0);
        assert_eq!(
            (extracted.timestamps.start, extracted.timestamps.middle, extracted.timestamps.end),
            (0.0, 5.0, 10.0)
        );
        for (key, frame) in extracted.frames.iter() {
            assert!(frame.path().starts_with(dir.path()));
            assert!(frame.path().ends_with(format!("{key}.png")));
            assert_eq!(tokio::fs::read(frame.path()).await.unwrap(), frame.content());
        }
        assert_eq!(media.seeks(), vec![0.0, 5.0, 10.0]);
    }

    #[tokio::test]
    async fn unknown_duration_falls_back_to_ten_seconds() {
        let base = video_server().await;
        let media = Arc::new(FakeMedia::with_duration(None));
        let dir = tempfile::tempdir().unwrap();

        let extracted = extractor(Arc::clone(&media))
            .extract(&format!("{base}/clip.mp4"), dir.path())
            .await
            .unwrap();

        assert_eq!(extracted.duration_secs, 10.0);
        // The end frame is pulled back from the very last instant.
        assert_eq!(media.seeks(), vec![0.0, 5.0, 9.9]);
    }

    #[tokio::test]
    async fn one_failing_frame_fails_the_whole_triple() {
        let base = video_server().await;
        let media = Arc::new(FakeMedia::with_duration(Some(6.0)).failing_extract_at(3.0));
        let dir = tempfile::tempdir().unwrap();

        let result = extractor(media)
            .extract(&format!("{base}/clip.mp4"), dir.path())
            .await;

        assert_matches!(
            result,
            Err(PipelineError::FrameExtractionFailed { frame: FrameKey::Middle, .. })
        );
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn non_video_download_is_rejected() {
        let base = video_server().await;
        let dir = tempfile::tempdir().unwrap();

        let result = extractor(Arc::new(FakeMedia::default()))
            .extract(&format!("{base}/page"), dir.path())
            .await;

        assert_matches!(result, Err(PipelineError::DownloadFailed(_)));
    }
}
