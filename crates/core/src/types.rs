//! Domain types shared by every pipeline stage.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Frame and clip keys
// ---------------------------------------------------------------------------

/// Anchor position of an extracted frame within the source video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKey {
    Start,
    Middle,
    End,
}

impl FrameKey {
    /// All frame keys in playback order.
    pub const ALL: [FrameKey; 3] = [FrameKey::Start, FrameKey::Middle, FrameKey::End];

    pub fn as_str(self) -> &'static str {
        match self {
            FrameKey::Start => "start",
            FrameKey::Middle => "middle",
            FrameKey::End => "end",
        }
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameKey {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(FrameKey::Start),
            "middle" => Ok(FrameKey::Middle),
            "end" => Ok(FrameKey::End),
            other => Err(PipelineError::InvalidInput(format!(
                "Unknown frame key '{other}'. Valid keys: start, middle, end"
            ))),
        }
    }
}

/// One of the two generated clips of a run.
///
/// `clip1` spans start→middle, `clip2` spans middle→end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipKey {
    Clip1,
    Clip2,
}

impl ClipKey {
    /// All clip keys in playback order.
    pub const ALL: [ClipKey; 2] = [ClipKey::Clip1, ClipKey::Clip2];

    pub fn as_str(self) -> &'static str {
        match self {
            ClipKey::Clip1 => "clip1",
            ClipKey::Clip2 => "clip2",
        }
    }

    /// The `(head, tail)` frames this clip interpolates between.
    pub fn anchors(self) -> (FrameKey, FrameKey) {
        match self {
            ClipKey::Clip1 => (FrameKey::Start, FrameKey::Middle),
            ClipKey::Clip2 => (FrameKey::Middle, FrameKey::End),
        }
    }
}

impl fmt::Display for ClipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClipKey {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clip1" => Ok(ClipKey::Clip1),
            "clip2" => Ok(ClipKey::Clip2),
            other => Err(PipelineError::InvalidInput(format!(
                "Unknown clip key '{other}'. Valid keys: clip1, clip2"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Media references
// ---------------------------------------------------------------------------

/// A media file that is either on local disk or reachable over HTTP(S).
///
/// Serialized as a plain string: anything starting with `http://` or
/// `https://` is remote, everything else is a local path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MediaRef {
    Local(PathBuf),
    Remote(String),
}

impl MediaRef {
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        if is_remote_url(trimmed) {
            MediaRef::Remote(trimmed.to_string())
        } else {
            MediaRef::Local(PathBuf::from(trimmed))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, MediaRef::Remote(_))
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            MediaRef::Local(path) => Some(path),
            MediaRef::Remote(_) => None,
        }
    }
}

impl From<String> for MediaRef {
    fn from(s: String) -> Self {
        MediaRef::parse(&s)
    }
}

impl From<MediaRef> for String {
    fn from(r: MediaRef) -> Self {
        match r {
            MediaRef::Local(path) => path.to_string_lossy().into_owned(),
            MediaRef::Remote(url) => url,
        }
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaRef::Local(path) => write!(f, "{}", path.display()),
            MediaRef::Remote(url) => f.write_str(url),
        }
    }
}

/// Whether `s` is an `http://` or `https://` URL.
pub fn is_remote_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

// ---------------------------------------------------------------------------
// Frames and artifacts
// ---------------------------------------------------------------------------

/// The 8-byte signature every PNG file starts with.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Whether `bytes` start with the PNG signature.
pub fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(&PNG_SIGNATURE)
}

/// Returned when image bytes are not a PNG payload.
#[derive(Debug, thiserror::Error)]
#[error("image payload is not a PNG ({len} bytes)")]
pub struct NotPng {
    pub len: usize,
}

/// A still image owned by a run.
///
/// `content` is always valid PNG bytes; `path` points at the same bytes on
/// disk inside the owning run's work directory.
#[derive(Debug, Clone)]
pub struct FrameAsset {
    path: PathBuf,
    content: Vec<u8>,
    remote_url: Option<String>,
}

impl FrameAsset {
    pub fn from_png(path: PathBuf, content: Vec<u8>) -> Result<Self, NotPng> {
        if !is_png(&content) {
            return Err(NotPng { len: content.len() });
        }
        Ok(Self {
            path,
            content,
            remote_url: None,
        })
    }

    /// Record a public URL already serving this image.
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }
}

/// The output of a stitch: a local file, a public URL, or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    local_path: Option<PathBuf>,
    public_url: Option<String>,
}

impl Artifact {
    pub fn local(path: PathBuf) -> Self {
        Self {
            local_path: Some(path),
            public_url: None,
        }
    }

    pub fn published(path: Option<PathBuf>, url: String) -> Self {
        Self {
            local_path: path,
            public_url: Some(url),
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Which family of external task a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    FaceSwap,
    Generation,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::FaceSwap => f.write_str("face_swap"),
            JobKind::Generation => f.write_str("generation"),
        }
    }
}

/// Lifecycle status of an external job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// `Completed` and `Failed` are terminal; nothing transitions out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }
}

/// One observation of a job returned by a provider poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobProgress {
    Pending,
    Running,
    Completed(Vec<MediaRef>),
    Failed(String),
}

impl JobProgress {
    pub fn status(&self) -> JobStatus {
        match self {
            JobProgress::Pending => JobStatus::Pending,
            JobProgress::Running => JobStatus::Running,
            JobProgress::Completed(_) => JobStatus::Completed,
            JobProgress::Failed(_) => JobStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// Handle for an asynchronous task running on an external service.
///
/// `result_urls` is present iff `status` is `Completed`. Status only moves
/// forward (`Pending -> Running -> Completed|Failed`) and never leaves a
/// terminal state; see [`Job::advance`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    id: String,
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    result_urls: Option<Vec<MediaRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Job {
    /// A freshly submitted job.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            result_urls: None,
            error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn result_urls(&self) -> Option<&[MediaRef]> {
        self.result_urls.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Apply a poll observation. Returns `true` if the job changed.
    ///
    /// Observations that would move the job backwards, or out of a terminal
    /// state, are ignored. A completion without any result is recorded as a
    /// failure.
    pub fn advance(&mut self, progress: &JobProgress) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let next = progress.status();
        if next.rank() < self.status.rank() || next == self.status {
            return false;
        }
        match progress {
            JobProgress::Pending | JobProgress::Running => {
                self.status = next;
            }
            JobProgress::Completed(urls) if urls.is_empty() => {
                self.status = JobStatus::Failed;
                self.error = Some("job completed without any result".to_string());
            }
            JobProgress::Completed(urls) => {
                self.status = JobStatus::Completed;
                self.result_urls = Some(urls.clone());
            }
            JobProgress::Failed(reason) => {
                self.status = JobStatus::Failed;
                self.error = Some(reason.clone());
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(url: &str) -> MediaRef {
        MediaRef::Remote(url.to_string())
    }

    #[test]
    fn frame_key_round_trips_through_str() {
        for key in FrameKey::ALL {
            assert_eq!(key.as_str().parse::<FrameKey>().unwrap(), key);
        }
        assert!("first".parse::<FrameKey>().is_err());
    }

    #[test]
    fn clip_anchors_overlap_on_middle() {
        assert_eq!(ClipKey::Clip1.anchors(), (FrameKey::Start, FrameKey::Middle));
        assert_eq!(ClipKey::Clip2.anchors(), (FrameKey::Middle, FrameKey::End));
    }

    #[test]
    fn media_ref_parses_remote_and_local() {
        assert_eq!(
            MediaRef::parse("https://host/b.mp4"),
            remote("https://host/b.mp4")
        );
        assert_eq!(
            MediaRef::parse("/tmp/a.mp4"),
            MediaRef::Local(PathBuf::from("/tmp/a.mp4"))
        );
        // Scheme check is prefix based, not substring based.
        assert!(!MediaRef::parse("/tmp/http://x.mp4").is_remote());
    }

    #[test]
    fn media_ref_serializes_as_plain_string() {
        let json = serde_json::to_string(&remote("https://host/b.mp4")).unwrap();
        assert_eq!(json, "\"https://host/b.mp4\"");
        let parsed: MediaRef = serde_json::from_str("\"clips/a.mp4\"").unwrap();
        assert_eq!(parsed, MediaRef::Local(PathBuf::from("clips/a.mp4")));
    }

    #[test]
    fn frame_asset_rejects_non_png() {
        let err = FrameAsset::from_png(PathBuf::from("a.png"), b"GIF89a".to_vec()).unwrap_err();
        assert_eq!(err.len, 6);

        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(b"rest");
        let asset = FrameAsset::from_png(PathBuf::from("a.png"), png).unwrap();
        assert!(asset.remote_url().is_none());
    }

    #[test]
    fn job_moves_forward_only() {
        let mut job = Job::new("task-1");
        assert!(job.advance(&JobProgress::Running));
        assert!(!job.advance(&JobProgress::Pending));
        assert_eq!(job.status(), JobStatus::Running);

        assert!(job.advance(&JobProgress::Completed(vec![remote("https://v/1.mp4")])));
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.result_urls().unwrap().len(), 1);
    }

    #[test]
    fn terminal_job_never_changes() {
        let mut job = Job::new("task-1");
        job.advance(&JobProgress::Failed("boom".into()));
        assert_eq!(job.status(), JobStatus::Failed);

        assert!(!job.advance(&JobProgress::Completed(vec![remote("https://v/1.mp4")])));
        assert!(!job.advance(&JobProgress::Running));
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.result_urls().is_none());
        assert_eq!(job.error(), Some("boom"));
    }

    #[test]
    fn result_urls_present_iff_completed() {
        let observations = [
            JobProgress::Pending,
            JobProgress::Running,
            JobProgress::Completed(vec![]),
            JobProgress::Completed(vec![remote("https://v/1.mp4")]),
            JobProgress::Failed("x".into()),
        ];
        for first in &observations {
            for second in &observations {
                let mut job = Job::new("t");
                job.advance(first);
                job.advance(second);
                assert_eq!(
                    job.result_urls().is_some(),
                    job.status() == JobStatus::Completed,
                    "after {first:?} then {second:?}"
                );
            }
        }
    }

    #[test]
    fn empty_completion_is_recorded_as_failure() {
        let mut job = Job::new("t");
        job.advance(&JobProgress::Completed(vec![]));
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error().is_some());
    }
}
