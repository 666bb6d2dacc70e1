//! Joining generated clips into the final video.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reelswap_core::error::PipelineError;
use reelswap_core::ffmpeg::build_concat_manifest;
use reelswap_core::types::{Artifact, MediaRef};
use reelswap_providers::temp_host::PublicHost;
use serde::Deserialize;

use crate::download::{self, Expect};
use crate::media::MediaTool;

/// How the stitched video is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Keep the file on disk; the caller streams it.
    #[default]
    Local,
    /// Also upload it and return a public URL.
    Public,
}

impl Delivery {
    pub fn from_publish_flag(publish: bool) -> Self {
        if publish {
            Delivery::Public
        } else {
            Delivery::Local
        }
    }
}

pub struct ClipStitcher {
    client: reqwest::Client,
    media: Arc<dyn MediaTool>,
    host: Arc<dyn PublicHost>,
}

impl ClipStitcher {
    pub fn new(client: reqwest::Client, media: Arc<dyn MediaTool>, host: Arc<dyn PublicHost>) -> Self {
        Self {
            client,
            media,
            host,
        }
    }

    /// Concatenate `clips` in the given order into `final.mp4` under a
    /// fresh directory in `workdir`.
    pub async fn stitch(
        &self,
        clips: &[MediaRef],
        workdir: &Path,
        delivery: Delivery,
    ) -> Result<Artifact, PipelineError> {
        if clips.is_empty() {
            return Err(PipelineError::InvalidInput("no clips to stitch".into()));
        }

        // Manifest entries must be absolute: ffmpeg resolves relative ones
        // against the manifest's directory.
        let dir = workdir.join(format!("stitch-{}", uuid::Uuid::new_v4().simple()));
        let dir = std::path::absolute(&dir)
            .map_err(|e| PipelineError::Internal(format!("resolve {}: {e}", dir.display())))?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PipelineError::Internal(format!("create {}: {e}", dir.display())))?;

        let inputs = self.materialize(clips, &dir).await?;

        let manifest = dir.join("concat.txt");
        tokio::fs::write(&manifest, build_concat_manifest(&inputs))
            .await
            .map_err(|e| PipelineError::StitchFailed(format!("write manifest: {e}")))?;

        let output = dir.join("final.mp4");
        self.media
            .concat(&manifest, &output)
            .await
            .map_err(|e| PipelineError::StitchFailed(e.to_string()))?;
        tracing::info!(clips = inputs.len(), path = %output.display(), "Stitched final video");

        match delivery {
            Delivery::Local => Ok(Artifact::local(output)),
            Delivery::Public => {
                let url = self.host.upload(&output).await?;
                Ok(Artifact::published(Some(output), url))
            }
        }
    }

    /// Local paths for every clip, in input order.
    ///
    /// Remote clips download concurrently to `clip_<index>.mp4`; results are
    /// placed by index, never by completion order.
    async fn materialize(&self, clips: &[MediaRef], dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        let fetches = clips.iter().enumerate().map(|(index, clip)| async move {
            match clip {
                MediaRef::Local(path) => {
                    if tokio::fs::try_exists(path).await.unwrap_or(false) {
                        std::path::absolute(path).map_err(|e| {
                            PipelineError::InvalidInput(format!("clip {}: {e}", path.display()))
                        })
                    } else {
                        Err(PipelineError::InvalidInput(format!(
                            "clip {} does not exist",
                            path.display()
                        )))
                    }
                }
                MediaRef::Remote(url) => {
                    let dest = dir.join(format!("clip_{index}.mp4"));
                    download::download_to_file(&self.client, url, &dest, Expect::Any).await?;
                    Ok(dest)
                }
            }
        });

        futures::future::join_all(fetches).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use axum::extract::Path as UrlPath;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    use super::*;
    use crate::test_support::spawn_server;
    use crate::testing::{FakeHost, FakeMedia};

    /// Serves `/slow/<name>` after 200 ms and `/fast/<name>` immediately.
    async fn clip_server() -> String {
        let router = Router::new()
            .route(
                "/slow/{name}",
                get(|UrlPath(name): UrlPath<String>| async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    format!("<{name}>")
                }),
            )
            .route(
                "/fast/{name}",
                get(|UrlPath(name): UrlPath<String>| async move { format!("<{name}>") }),
            )
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }));
        spawn_server(router).await
    }

    fn stitcher(media: Arc<FakeMedia>, host: Arc<FakeHost>) -> ClipStitcher {
        ClipStitcher::new(reqwest::Client::new(), media, host)
    }

    #[tokio::test]
    async fn local_and_remote_clips_keep_input_order() {
        let base = clip_server().await;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("localA.mp4");
        tokio::fs::write(&local, b"<a>").await.unwrap();
        let clips = vec![
            MediaRef::Local(local.clone()),
            MediaRef::Remote(format!("{base}/fast/b")),
        ];

        let artifact = stitcher(Arc::new(FakeMedia::default()), Arc::new(FakeHost::default()))
            .stitch(&clips, dir.path(), Delivery::Local)
            .await
            .unwrap();

        let output = artifact.local_path().unwrap();
        assert_eq!(tokio::fs::read(output).await.unwrap(), b"<a><b>");
        assert_eq!(artifact.public_url(), None);

        let manifest = tokio::fs::read_to_string(output.with_file_name("concat.txt"))
            .await
            .unwrap();
        let lines: Vec<&str> = manifest.lines().collect();
        assert_eq!(lines[0], format!("file '{}'", local.display()));
        assert!(lines[1].ends_with("clip_1.mp4'"));
    }

    #[tokio::test]
    async fn relative_workdir_yields_absolute_manifest_entries() {
        let base = clip_server().await;
        let dir = tempfile::Builder::new()
            .prefix("stitch-rel-")
            .tempdir_in(".")
            .unwrap();
        let workdir = Path::new(".").join(dir.path().file_name().unwrap());
        assert!(workdir.is_relative());

        let artifact = stitcher(Arc::new(FakeMedia::default()), Arc::new(FakeHost::default()))
            .stitch(&[MediaRef::Remote(format!("{base}/fast/r"))], &workdir, Delivery::Local)
            .await
            .unwrap();

        let output = artifact.local_path().unwrap();
        assert!(output.is_absolute());
        let manifest = tokio::fs::read_to_string(output.with_file_name("concat.txt"))
            .await
            .unwrap();
        for line in manifest.lines() {
            let entry = line.trim_start_matches("file '").trim_end_matches('\'');
            assert!(Path::new(entry).is_absolute(), "relative entry {entry}");
            assert!(Path::new(entry).exists());
        }
        assert_eq!(tokio::fs::read(output).await.unwrap(), b"<r>");
    }

    #[tokio::test]
    async fn order_survives_out_of_order_downloads() {
        let base = clip_server().await;
        let dir = tempfile::tempdir().unwrap();
        let clips = vec![
            MediaRef::Remote(format!("{base}/slow/one")),
            MediaRef::Remote(format!("{base}/fast/two")),
        ];

        let artifact = stitcher(Arc::new(FakeMedia::default()), Arc::new(FakeHost::default()))
            .stitch(&clips, dir.path(), Delivery::Local)
            .await
            .unwrap();

        let bytes = tokio::fs::read(artifact.local_path().unwrap()).await.unwrap();
        assert_eq!(bytes, b"<one><two>");
    }

    #[tokio::test]
    async fn public_delivery_uploads_the_result() {
        let base = clip_server().await;
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost::default());

        let artifact = stitcher(Arc::new(FakeMedia::default()), Arc::clone(&host))
            .stitch(&[MediaRef::Remote(format!("{base}/fast/x"))], dir.path(), Delivery::Public)
            .await
            .unwrap();

        assert_eq!(artifact.public_url(), Some("https://public.test/final.mp4"));
        assert!(artifact.local_path().is_some());
        assert_eq!(host.uploads(), 1);
    }

    #[tokio::test]
    async fn failures_map_to_their_stage() {
        let base = clip_server().await;
        let dir = tempfile::tempdir().unwrap();
        let ok = stitcher(Arc::new(FakeMedia::default()), Arc::new(FakeHost::default()));

        assert_matches!(
            ok.stitch(&[], dir.path(), Delivery::Local).await,
            Err(PipelineError::InvalidInput(_))
        );
        assert_matches!(
            ok.stitch(&[MediaRef::Remote(format!("{base}/missing"))], dir.path(), Delivery::Local)
                .await,
            Err(PipelineError::DownloadFailed(_))
        );

        let broken = stitcher(
            Arc::new(FakeMedia::default().failing_concat()),
            Arc::new(FakeHost::default()),
        );
        assert_matches!(
            broken
                .stitch(&[MediaRef::Remote(format!("{base}/fast/x"))], dir.path(), Delivery::Local)
                .await,
            Err(PipelineError::StitchFailed(_))
        );
    }
}
