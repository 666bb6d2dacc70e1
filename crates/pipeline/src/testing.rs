//! In-memory stand-ins for the pipeline's external collaborators.
//!
//! Enabled for this crate's tests and, through the `testing` feature, for
//! downstream integration tests. Nothing here touches the network or spawns
//! ffmpeg.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use reelswap_core::error::PipelineError;
use reelswap_core::ffmpeg::FfmpegError;
use reelswap_core::polling::PollConfig;
use reelswap_core::rate_limit::RateLimiter;
use reelswap_core::retry::RetryPolicy;
use reelswap_core::types::{JobKind, JobProgress, MediaRef, PNG_SIGNATURE};
use reelswap_providers::faceswap::SwapRequest;
use reelswap_providers::generation::GenerationRequest;
use reelswap_providers::resolver::VideoResolver;
use reelswap_providers::task::{TaskClient, TaskClientConfig, TaskProvider};
use reelswap_providers::temp_host::PublicHost;

use crate::events::EventBus;
use crate::media::MediaTool;
use crate::services::PipelineServices;

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn io_error(e: std::io::Error) -> FfmpegError {
    FfmpegError::IoError(e)
}

/// Holds polls back until [`Gate::open`] is called.
struct Gate(watch::Sender<bool>);

impl Default for Gate {
    fn default() -> Self {
        Self(watch::channel(false).0)
    }
}

impl Gate {
    fn open(&self) {
        self.0.send_replace(true);
    }

    async fn pass(&self) {
        let mut open = self.0.subscribe();
        loop {
            if *open.borrow_and_update() {
                return;
            }
            if open.changed().await.is_err() {
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Media tool
// ---------------------------------------------------------------------------

/// Fake ffmpeg. Frames are `PNG signature + "frame@<ts>"`; concatenation
/// joins the listed files byte for byte.
#[derive(Default)]
pub struct FakeMedia {
    duration: Option<f64>,
    fail_extract_at: Option<f64>,
    fail_concat: bool,
    seeks: Mutex<Vec<f64>>,
}

impl FakeMedia {
    pub fn with_duration(duration: Option<f64>) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    /// Fail extraction of the frame at `timestamp_secs`.
    pub fn failing_extract_at(mut self, timestamp_secs: f64) -> Self {
        self.fail_extract_at = Some(timestamp_secs);
        self
    }

    pub fn failing_concat(mut self) -> Self {
        self.fail_concat = true;
        self
    }

    /// Every seek position requested so far, ascending.
    pub fn seeks(&self) -> Vec<f64> {
        let mut seeks = self.seeks.lock().unwrap().clone();
        seeks.sort_by(f64::total_cmp);
        seeks
    }
}

#[async_trait]
impl MediaTool for FakeMedia {
    async fn probe_duration(&self, video: &Path) -> Result<Option<f64>, FfmpegError> {
        if !video.exists() {
            return Err(FfmpegError::InputNotFound(video.display().to_string()));
        }
        Ok(self.duration)
    }

    async fn extract_png(
        &self,
        _video: &Path,
        output: &Path,
        timestamp_secs: f64,
    ) -> Result<(), FfmpegError> {
        self.seeks.lock().unwrap().push(timestamp_secs);
        if self
            .fail_extract_at
            .is_some_and(|at| (at - timestamp_secs).abs() < 1e-9)
        {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: Some(1),
                stderr: "decoder error".into(),
            });
        }
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(format!("frame@{timestamp_secs:.3}").as_bytes());
        tokio::fs::write(output, bytes).await.map_err(io_error)
    }

    async fn concat(&self, manifest: &Path, output: &Path) -> Result<(), FfmpegError> {
        if self.fail_concat {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: Some(1),
                stderr: "codec parameters differ".into(),
            });
        }
        let listing = tokio::fs::read_to_string(manifest).await.map_err(io_error)?;
        let mut joined = Vec::new();
        for line in listing.lines() {
            let quoted = line
                .strip_prefix("file '")
                .and_then(|rest| rest.strip_suffix('\''))
                .ok_or_else(|| FfmpegError::ParseError(format!("bad manifest line: {line}")))?;
            let path = quoted.replace(r"'\''", "'");
            joined.extend(tokio::fs::read(&path).await.map_err(io_error)?);
        }
        tokio::fs::write(output, joined).await.map_err(io_error)
    }

    async fn to_png(&self, input: &Path, output: &Path) -> Result<(), FfmpegError> {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend(tokio::fs::read(input).await.map_err(io_error)?);
        tokio::fs::write(output, bytes).await.map_err(io_error)
    }

    /// Writes `compressed:<original length>`.
    async fn compress_image(
        &self,
        input: &Path,
        output: &Path,
        _max_dimension: u32,
    ) -> Result<(), FfmpegError> {
        let original = tokio::fs::metadata(input).await.map_err(io_error)?.len();
        tokio::fs::write(output, format!("compressed:{original}"))
            .await
            .map_err(io_error)
    }
}

// ---------------------------------------------------------------------------
// Resolver and public host
// ---------------------------------------------------------------------------

/// Treats every source URL as directly downloadable.
pub struct PassthroughResolver;

#[async_trait]
impl VideoResolver for PassthroughResolver {
    async fn resolve(&self, url: &str) -> Result<String, PipelineError> {
        Ok(url.trim().to_string())
    }
}

/// Hands out `https://public.test/<file name>` without uploading anything.
#[derive(Default)]
pub struct FakeHost {
    uploads: AtomicUsize,
}

impl FakeHost {
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublicHost for FakeHost {
    async fn upload(&self, path: &Path) -> Result<String, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::UploadFailed(format!(
                "{} does not exist",
                path.display()
            )));
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(format!("https://public.test/{name}"))
    }
}

// ---------------------------------------------------------------------------
// Task providers
// ---------------------------------------------------------------------------

/// Face swap that completes on the first poll with a local PNG whose
/// payload is `"swapped:" + <target payload>`.
pub struct FakeFaceSwap {
    out_dir: PathBuf,
    fail_marker: Option<Vec<u8>>,
    next_id: AtomicUsize,
    results: Mutex<HashMap<String, Result<PathBuf, String>>>,
    held: bool,
    gate: Gate,
}

impl FakeFaceSwap {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            fail_marker: None,
            next_id: AtomicUsize::new(0),
            results: Mutex::new(HashMap::new()),
            held: false,
            gate: Gate::default(),
        }
    }

    /// Block every poll until [`release`](Self::release) is called.
    pub fn holding_polls(mut self) -> Self {
        self.held = true;
        self
    }

    pub fn release(&self) {
        self.gate.open();
    }

    /// Fail every task whose target image contains `marker`.
    pub fn failing_when_target_contains(mut self, marker: impl Into<Vec<u8>>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    pub fn submissions(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskProvider for FakeFaceSwap {
    type Request = SwapRequest;

    fn name(&self) -> &str {
        "fake-swap"
    }

    async fn submit(&self, request: &SwapRequest) -> Result<String, PipelineError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("swap-{n}");

        let outcome = match &self.fail_marker {
            Some(marker) if contains(&request.target, marker) => Err("no face detected".to_string()),
            _ => {
                tokio::fs::create_dir_all(&self.out_dir)
                    .await
                    .map_err(|e| PipelineError::Internal(e.to_string()))?;
                let payload = request
                    .target
                    .strip_prefix(PNG_SIGNATURE.as_slice())
                    .unwrap_or(&request.target);
                let mut bytes = PNG_SIGNATURE.to_vec();
                bytes.extend_from_slice(b"swapped:");
                bytes.extend_from_slice(payload);
                let path = self.out_dir.join(format!("{id}.png"));
                tokio::fs::write(&path, bytes)
                    .await
                    .map_err(|e| PipelineError::Internal(e.to_string()))?;
                Ok(path)
            }
        };
        self.results.lock().unwrap().insert(id.clone(), outcome);
        Ok(id)
    }

    async fn poll(&self, task_id: &str) -> Result<JobProgress, PipelineError> {
        if self.held {
            self.gate.pass().await;
        }
        Ok(match self.results.lock().unwrap().get(task_id) {
            Some(Ok(path)) => JobProgress::Completed(vec![MediaRef::Local(path.clone())]),
            Some(Err(reason)) => JobProgress::Failed(reason.clone()),
            None => JobProgress::Failed(format!("unknown task {task_id}")),
        })
    }
}

struct FakeTask {
    number: usize,
    polls: u32,
    fail: bool,
}

/// Generation that reports `Running` for a few polls, then completes with a
/// local clip containing `<task id>`.
pub struct FakeGeneration {
    out_dir: PathBuf,
    running_polls: u32,
    fail_tail_marker: Option<String>,
    next_id: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
    tasks: Mutex<HashMap<String, FakeTask>>,
    held_tasks: usize,
    gate: Gate,
}

impl FakeGeneration {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            running_polls: 1,
            fail_tail_marker: None,
            next_id: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            tasks: Mutex::new(HashMap::new()),
            held_tasks: 0,
            gate: Gate::default(),
        }
    }

    /// Block polls of the first `count` submitted tasks until
    /// [`release`](Self::release) is called.
    pub fn holding_first(mut self, count: usize) -> Self {
        self.held_tasks = count;
        self
    }

    pub fn release(&self) {
        self.gate.open();
    }

    /// Polls answered with `Running` before the task settles.
    pub fn with_running_polls(mut self, polls: u32) -> Self {
        self.running_polls = polls;
        self
    }

    /// Fail every task whose tail image URL contains `marker`.
    pub fn failing_when_tail_contains(mut self, marker: impl Into<String>) -> Self {
        self.fail_tail_marker = Some(marker.into());
        self
    }

    /// Submitted requests, in submission order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskProvider for FakeGeneration {
    type Request = GenerationRequest;

    fn name(&self) -> &str {
        "fake-generation"
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("gen-{n}");
        let fail = self
            .fail_tail_marker
            .as_deref()
            .is_some_and(|m| request.tail_image_url.contains(m));
        self.requests.lock().unwrap().push(request.clone());
        self.tasks
            .lock()
            .unwrap()
            .insert(id.clone(), FakeTask { number: n, polls: 0, fail });
        Ok(id)
    }

    async fn poll(&self, task_id: &str) -> Result<JobProgress, PipelineError> {
        let held = self
            .tasks
            .lock()
            .unwrap()
            .get(task_id)
            .is_some_and(|task| task.number <= self.held_tasks);
        if held {
            self.gate.pass().await;
        }

        let (polls, fail) = {
            let mut tasks = self.tasks.lock().unwrap();
            let Some(task) = tasks.get_mut(task_id) else {
                return Ok(JobProgress::Failed(format!("unknown task {task_id}")));
            };
            task.polls += 1;
            (task.polls, task.fail)
        };

        if polls <= self.running_polls {
            return Ok(JobProgress::Running);
        }
        if fail {
            return Ok(JobProgress::Failed("rejected by content filter".into()));
        }

        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|e| PipelineError::Internal(e.to_string()))?;
        let path = self.out_dir.join(format!("{task_id}.mp4"));
        tokio::fs::write(&path, format!("<{task_id}>"))
            .await
            .map_err(|e| PipelineError::Internal(e.to_string()))?;
        Ok(JobProgress::Completed(vec![MediaRef::Local(path)]))
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// [`PipelineServices`] over fakes, plus handles to inspect them.
pub struct FakeServices {
    pub services: PipelineServices,
    pub media: Arc<FakeMedia>,
    pub face_swap: Arc<FakeFaceSwap>,
    pub generation: Arc<FakeGeneration>,
    pub host: Arc<FakeHost>,
}

/// Millisecond-scale retry and polling so tests finish quickly.
pub fn fast_client_config() -> TaskClientConfig {
    TaskClientConfig {
        retry: RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
        },
        poll: PollConfig {
            max_attempts: 20,
            interval: Duration::from_millis(1),
            rate_limit_backoff: Duration::from_millis(1),
            max_rate_limit_waits: 3,
        },
        submit_delay: Duration::ZERO,
    }
}

/// Default fakes: a 12 s video, swaps and generations that always succeed.
pub fn fake_services(work_dir: &Path) -> FakeServices {
    fake_services_with(
        work_dir,
        FakeMedia::with_duration(Some(12.0)),
        FakeFaceSwap::new(work_dir.join("fake-swap")),
        FakeGeneration::new(work_dir.join("fake-generation")),
    )
}

pub fn fake_services_with(
    work_dir: &Path,
    media: FakeMedia,
    face_swap: FakeFaceSwap,
    generation: FakeGeneration,
) -> FakeServices {
    let media = Arc::new(media);
    let face_swap = Arc::new(face_swap);
    let generation = Arc::new(generation);
    let host = Arc::new(FakeHost::default());
    let limiter = Arc::new(RateLimiter::default());

    let services = PipelineServices {
        http: reqwest::Client::new(),
        media: Arc::clone(&media) as Arc<dyn MediaTool>,
        resolver: Arc::new(PassthroughResolver),
        face_swap: TaskClient::new(
            Arc::clone(&face_swap) as Arc<dyn TaskProvider<Request = SwapRequest>>,
            JobKind::FaceSwap,
            Arc::clone(&limiter),
            fast_client_config(),
        ),
        generation: TaskClient::new(
            Arc::clone(&generation) as Arc<dyn TaskProvider<Request = GenerationRequest>>,
            JobKind::Generation,
            limiter,
            fast_client_config(),
        ),
        host: Arc::clone(&host) as Arc<dyn PublicHost>,
        events: Arc::new(EventBus::default()),
        work_dir: work_dir.to_path_buf(),
    };

    FakeServices {
        services,
        media,
        face_swap,
        generation,
        host,
    }
}
