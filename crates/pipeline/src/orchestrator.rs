//! Run orchestration.
//!
//! A run carries one source video through extraction, face swaps,
//! generation and stitching. Each action validates its preconditions up
//! front, releases the run lock for every external call and records results
//! as they arrive, so partial progress survives a failing stage.
//!
//! Results computed against data that has since been replaced (frames
//! re-extracted, generation restarted) are dropped: every run keeps epoch
//! counters and late writers compare against the epoch they started from.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use reelswap_core::error::PipelineError;
use reelswap_core::types::{Artifact, ClipKey, FrameAsset, FrameKey, Job, JobProgress, JobStatus, MediaRef};
use reelswap_providers::generation::GenerationRequest;
use serde::Serialize;
use tempfile::TempDir;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use crate::events::{EventBus, Stage, StageEvent};
use crate::extractor::{ExtractedVideo, ExtractionSummary};
use crate::services::PipelineServices;
use crate::stitcher::Delivery;

// ---------------------------------------------------------------------------
// Identifiers and stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = PipelineError;

    /// Anything that is not a UUID cannot name a run.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(RunId)
            .map_err(|_| PipelineError::RunNotFound(s.to_string()))
    }
}

/// Where a run stands, derived from what it has recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum RunStage {
    Created,
    FramesExtracted,
    /// `complete` once every selected frame (all three if none are
    /// selected) has been swapped.
    FacesSwapped { complete: bool },
    GenerationSubmitted,
    GenerationPolling,
    ReadyToStitch,
    Stitched,
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

struct Generation {
    prompt: String,
    jobs: BTreeMap<ClipKey, Job>,
}

struct Run {
    id: RunId,
    source_url: String,
    created_at: DateTime<Utc>,
    workdir: TempDir,
    discarded: bool,
    frames_epoch: u64,
    extraction: Option<ExtractedVideo>,
    selected_frames: BTreeSet<FrameKey>,
    face: Option<Vec<u8>>,
    swapped: BTreeMap<FrameKey, FrameAsset>,
    generation_epoch: u64,
    generation: Option<Generation>,
    selected_clips: BTreeSet<ClipKey>,
    final_video: Option<Artifact>,
    /// Bumped on every job update; waiters subscribe to it.
    progress: watch::Sender<u64>,
}

impl Run {
    fn new(id: RunId, source_url: String, workdir: TempDir) -> Self {
        Self {
            id,
            source_url,
            created_at: Utc::now(),
            workdir,
            discarded: false,
            frames_epoch: 0,
            extraction: None,
            selected_frames: BTreeSet::new(),
            face: None,
            swapped: BTreeMap::new(),
            generation_epoch: 0,
            generation: None,
            selected_clips: BTreeSet::new(),
            final_video: None,
            progress: watch::channel(0).0,
        }
    }

    fn notify(&self) {
        self.progress.send_modify(|version| *version += 1);
    }

    fn extraction(&self) -> Result<&ExtractedVideo, PipelineError> {
        self.extraction.as_ref().ok_or_else(|| {
            PipelineError::InvalidInput("frames have not been extracted yet".into())
        })
    }

    fn generation(&self) -> Result<&Generation, PipelineError> {
        self.generation.as_ref().ok_or_else(|| {
            PipelineError::InvalidInput("generation has not been started".into())
        })
    }

    /// Install a new frame triple and drop everything derived from the old
    /// one.
    fn install_frames(&mut self, extracted: ExtractedVideo) {
        self.extraction = Some(extracted);
        self.frames_epoch += 1;
        self.selected_frames.clear();
        self.swapped.clear();
        self.generation_epoch += 1;
        self.generation = None;
        self.selected_clips.clear();
        self.final_video = None;
        self.notify();
    }

    /// The image each frame key contributes to generation.
    fn anchor(&self, key: FrameKey) -> Option<&FrameAsset> {
        self.swapped
            .get(&key)
            .or_else(|| self.extraction.as_ref().map(|e| e.frames.get(key)))
    }

    /// Remember a public URL for whichever stored asset lives at `path`.
    fn record_published(&mut self, key: FrameKey, path: &std::path::Path, url: &str) {
        if let Some(asset) = self.swapped.get_mut(&key) {
            if asset.path() == path && asset.remote_url().is_none() {
                *asset = asset.clone().with_remote_url(url);
                return;
            }
        }
        if let Some(asset) = self
            .extraction
            .as_mut()
            .and_then(|e| e.frames.get_mut(key))
        {
            if asset.path() == path && asset.remote_url().is_none() {
                *asset = asset.clone().with_remote_url(url);
            }
        }
    }

    fn stage(&self) -> RunStage {
        if self.final_video.is_some() {
            return RunStage::Stitched;
        }

        if let Some(generation) = &self.generation {
            let statuses: Vec<JobStatus> = generation.jobs.values().map(Job::status).collect();
            let all_terminal = statuses.iter().all(|s| s.is_terminal());
            if all_terminal && statuses.contains(&JobStatus::Completed) {
                return RunStage::ReadyToStitch;
            }
            if statuses.iter().all(|s| *s == JobStatus::Pending) {
                return RunStage::GenerationSubmitted;
            }
            if !all_terminal {
                return RunStage::GenerationPolling;
            }
            // Every job failed: the run is back to its swap results.
        }

        if !self.swapped.is_empty() {
            let complete = if self.selected_frames.is_empty() {
                FrameKey::ALL.iter().all(|k| self.swapped.contains_key(k))
            } else {
                self.selected_frames.iter().all(|k| self.swapped.contains_key(k))
            };
            return RunStage::FacesSwapped { complete };
        }

        if self.extraction.is_some() {
            RunStage::FramesExtracted
        } else {
            RunStage::Created
        }
    }

    fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            id: self.id,
            source_url: self.source_url.clone(),
            created_at: self.created_at,
            stage: self.stage(),
            workdir: self.workdir.path().to_path_buf(),
            video: self.extraction.as_ref().map(ExtractedVideo::summary),
            frames: self
                .extraction
                .as_ref()
                .map(|e| e.frames.iter().map(|(k, a)| (k, FrameView::from(a))).collect())
                .unwrap_or_default(),
            selected_frames: self.selected_frames.iter().copied().collect(),
            has_face: self.face.is_some(),
            swapped_frames: self
                .swapped
                .iter()
                .map(|(k, a)| (*k, FrameView::from(a)))
                .collect(),
            prompt: self.generation.as_ref().map(|g| g.prompt.clone()),
            generation_jobs: self
                .generation
                .as_ref()
                .map(|g| g.jobs.clone())
                .unwrap_or_default(),
            selected_clips: self.selected_clips.iter().copied().collect(),
            final_video: self.final_video.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FrameView {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    pub size_bytes: usize,
}

impl From<&FrameAsset> for FrameView {
    fn from(asset: &FrameAsset) -> Self {
        Self {
            path: asset.path().to_path_buf(),
            remote_url: asset.remote_url().map(str::to_string),
            size_bytes: asset.content().len(),
        }
    }
}

/// Serializable point-in-time view of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub id: RunId,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
    pub stage: RunStage,
    pub workdir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<ExtractionSummary>,
    pub frames: BTreeMap<FrameKey, FrameView>,
    pub selected_frames: Vec<FrameKey>,
    pub has_face: bool,
    pub swapped_frames: BTreeMap<FrameKey, FrameView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub generation_jobs: BTreeMap<ClipKey, Job>,
    pub selected_clips: Vec<ClipKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_video: Option<Artifact>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

type SharedRun = Arc<Mutex<Run>>;

/// Registry of runs and the actions that drive them.
pub struct Orchestrator {
    services: PipelineServices,
    runs: RwLock<HashMap<RunId, SharedRun>>,
}

impl Orchestrator {
    pub fn new(services: PipelineServices) -> Self {
        Self {
            services,
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &PipelineServices {
        &self.services
    }

    pub fn events(&self) -> &EventBus {
        &self.services.events
    }

    async fn run(&self, id: RunId) -> Result<SharedRun, PipelineError> {
        self.runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| PipelineError::RunNotFound(id.to_string()))
    }

    pub async fn create_run(&self, source_url: &str) -> Result<RunSnapshot, PipelineError> {
        let source_url = source_url.trim();
        if source_url.is_empty() {
            return Err(PipelineError::InvalidInput("source URL must not be empty".into()));
        }

        let work_dir = &self.services.work_dir;
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(|e| PipelineError::Internal(format!("create {}: {e}", work_dir.display())))?;
        let workdir = tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(work_dir)
            .map_err(|e| PipelineError::Internal(format!("create run directory: {e}")))?;

        let id = RunId::new();
        let run = Run::new(id, source_url.to_string(), workdir);
        let snapshot = run.snapshot();
        self.runs.write().await.insert(id, Arc::new(Mutex::new(run)));

        tracing::info!(run_id = %id, source_url, "Run created");
        Ok(snapshot)
    }

    pub async fn snapshot(&self, id: RunId) -> Result<RunSnapshot, PipelineError> {
        let run = self.run(id).await?;
        let snapshot = run.lock().await.snapshot();
        Ok(snapshot)
    }

    /// Remove the run and delete its work directory.
    ///
    /// Background pollers keep running to their own bound; their updates
    /// no longer reach anything. Waiters are woken and see `RunNotFound`.
    pub async fn discard(&self, id: RunId) -> Result<(), PipelineError> {
        let run = self
            .runs
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| PipelineError::RunNotFound(id.to_string()))?;

        let mut run = run.lock().await;
        run.discarded = true;
        run.notify();
        if let Err(e) = tokio::fs::remove_dir_all(run.workdir.path()).await {
            tracing::warn!(run_id = %id, error = %e, "Failed to delete run directory");
        }
        tracing::info!(run_id = %id, "Run discarded");
        Ok(())
    }

    /// Extract the anchor frames, replacing any earlier extraction and
    /// everything derived from it.
    pub async fn extract(&self, id: RunId) -> Result<RunSnapshot, PipelineError> {
        let run = self.run(id).await?;
        let (source_url, workdir) = {
            let run = run.lock().await;
            (run.source_url.clone(), run.workdir.path().to_path_buf())
        };

        self.events().publish(StageEvent::started(id, Stage::Extract));
        let extracted = match self.services.extractor().extract(&source_url, &workdir).await {
            Ok(extracted) => extracted,
            Err(e) => {
                self.events()
                    .publish(StageEvent::failed(id, Stage::Extract, e.to_string()));
                return Err(e);
            }
        };

        let message = format!("duration {:.2}s", extracted.duration_secs);
        let mut run = run.lock().await;
        run.install_frames(extracted);
        self.events()
            .publish(StageEvent::succeeded(id, Stage::Extract).with_message(message));
        Ok(run.snapshot())
    }

    pub async fn select_frames(
        &self,
        id: RunId,
        keys: impl IntoIterator<Item = FrameKey>,
    ) -> Result<RunSnapshot, PipelineError> {
        let run = self.run(id).await?;
        let mut run = run.lock().await;
        run.extraction()?;
        run.selected_frames = keys.into_iter().collect();
        Ok(run.snapshot())
    }

    pub async fn set_face(&self, id: RunId, image: Vec<u8>) -> Result<RunSnapshot, PipelineError> {
        if image.is_empty() {
            return Err(PipelineError::InvalidInput("face image is empty".into()));
        }
        let run = self.run(id).await?;
        let mut run = run.lock().await;
        run.face = Some(image);
        Ok(run.snapshot())
    }

    /// Swap the face onto each requested frame concurrently.
    ///
    /// Every success is recorded as soon as it lands. After all swaps have
    /// settled, the first failure (in frame order) is returned.
    pub async fn swap(&self, id: RunId, keys: &[FrameKey]) -> Result<RunSnapshot, PipelineError> {
        if keys.is_empty() {
            return Err(PipelineError::InvalidInput("select at least one frame to swap".into()));
        }
        let keys: BTreeSet<FrameKey> = keys.iter().copied().collect();

        let run = self.run(id).await?;
        let (targets, face, epoch, out_dir) = {
            let run = run.lock().await;
            let extraction = run.extraction()?;
            let face = run
                .face
                .clone()
                .ok_or_else(|| PipelineError::InvalidInput("no face image has been set".into()))?;
            let targets: Vec<(FrameKey, Vec<u8>)> = keys
                .iter()
                .map(|k| (*k, extraction.frames.get(*k).content().to_vec()))
                .collect();
            (targets, face, run.frames_epoch, run.workdir.path().join("swaps"))
        };
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| PipelineError::Internal(format!("create {}: {e}", out_dir.display())))?;

        let swaps = targets.into_iter().map(|(key, target)| {
            let run = Arc::clone(&run);
            let face = face.clone();
            let out_dir = &out_dir;
            async move {
                self.events()
                    .publish(StageEvent::started(id, Stage::Swap).with_key(key));
                let stem = format!("{key}-{}", Uuid::new_v4().simple());
                match self.services.swap_frame(target, face, out_dir, &stem).await {
                    Ok(asset) => {
                        let mut run = run.lock().await;
                        if run.frames_epoch == epoch {
                            run.swapped.insert(key, asset);
                        } else {
                            tracing::debug!(run_id = %id, frame = %key, "Frames replaced during swap, dropping result");
                        }
                        self.events()
                            .publish(StageEvent::succeeded(id, Stage::Swap).with_key(key));
                        Ok(())
                    }
                    Err(e) => {
                        let e = e.for_frame(key);
                        self.events()
                            .publish(StageEvent::failed(id, Stage::Swap, e.to_string()).with_key(key));
                        Err(e)
                    }
                }
            }
        });

        let outcomes = futures::future::join_all(swaps).await;
        if let Some(err) = outcomes.into_iter().find_map(Result::err) {
            return Err(err);
        }
        let snapshot = run.lock().await.snapshot();
        Ok(snapshot)
    }

    /// Publish the anchors and submit both generation jobs, then poll them
    /// in the background.
    pub async fn generate(&self, id: RunId, prompt: &str) -> Result<RunSnapshot, PipelineError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(PipelineError::InvalidInput("prompt must not be empty".into()));
        }

        let run = self.run(id).await?;
        let (anchors, frames_epoch) = {
            let run = run.lock().await;
            run.extraction()?;
            if run.swapped.is_empty() {
                return Err(PipelineError::InvalidInput(
                    "at least one frame must be swapped before generating".into(),
                ));
            }
            let mut anchors = BTreeMap::new();
            for key in FrameKey::ALL {
                if let Some(asset) = run.anchor(key) {
                    anchors.insert(key, asset.clone());
                }
            }
            (anchors, run.frames_epoch)
        };

        let urls = self.publish_anchors(id, &run, &anchors, frames_epoch).await?;

        self.events().publish(StageEvent::started(id, Stage::Generate));
        let mut requests = Vec::with_capacity(ClipKey::ALL.len());
        for clip in ClipKey::ALL {
            let (head, tail) = clip.anchors();
            let request = GenerationRequest::new(prompt, url_for(&urls, head)?, url_for(&urls, tail)?)?;
            requests.push((clip, request));
        }

        let submissions = requests.iter().map(|(clip, request)| async move {
            let submitted = self.services.generation.submit(request).await;
            (*clip, submitted.map_err(|e| e.for_clip(*clip)))
        });
        let mut jobs = BTreeMap::new();
        let mut failure = None;
        for (clip, submitted) in futures::future::join_all(submissions).await {
            match submitted {
                Ok(task_id) => {
                    jobs.insert(clip, Job::new(task_id));
                }
                Err(e) => failure = failure.or(Some(e)),
            }
        }
        if let Some(e) = failure {
            for (clip, job) in &jobs {
                tracing::warn!(run_id = %id, clip = %clip, task_id = job.id(), "Abandoning submitted job after sibling failed");
            }
            self.events()
                .publish(StageEvent::failed(id, Stage::Generate, e.to_string()));
            return Err(e);
        }

        let mut guard = run.lock().await;
        if guard.frames_epoch != frames_epoch {
            return Err(PipelineError::InvalidInput(
                "frames were re-extracted while generation was being submitted".into(),
            ));
        }
        guard.generation_epoch += 1;
        let epoch = guard.generation_epoch;
        let task_ids: Vec<(ClipKey, String)> =
            jobs.iter().map(|(k, j)| (*k, j.id().to_string())).collect();
        guard.generation = Some(Generation {
            prompt: prompt.to_string(),
            jobs,
        });
        guard.selected_clips.clear();
        guard.final_video = None;
        guard.notify();

        for (clip, task_id) in task_ids {
            self.spawn_poller(&run, id, epoch, clip, task_id);
        }
        self.events().publish(StageEvent::succeeded(id, Stage::Generate));
        Ok(guard.snapshot())
    }

    /// Public URLs for every anchor, uploading only what is not hosted yet.
    async fn publish_anchors(
        &self,
        id: RunId,
        run: &SharedRun,
        anchors: &BTreeMap<FrameKey, FrameAsset>,
        frames_epoch: u64,
    ) -> Result<BTreeMap<FrameKey, String>, PipelineError> {
        self.events().publish(StageEvent::started(id, Stage::Publish));
        let uploads = anchors.iter().map(|(key, asset)| async move {
            (*key, self.services.publish_frame(asset).await)
        });

        let mut urls = BTreeMap::new();
        for (key, published) in futures::future::join_all(uploads).await {
            match published {
                Ok(url) => {
                    urls.insert(key, url);
                }
                Err(e) => {
                    self.events()
                        .publish(StageEvent::failed(id, Stage::Publish, e.to_string()).with_key(key));
                    return Err(e);
                }
            }
        }

        let mut run = run.lock().await;
        if run.frames_epoch == frames_epoch {
            for (key, url) in &urls {
                run.record_published(*key, anchors[key].path(), url);
            }
        }
        self.events().publish(StageEvent::succeeded(id, Stage::Publish));
        Ok(urls)
    }

    fn spawn_poller(&self, run: &SharedRun, id: RunId, epoch: u64, clip: ClipKey, task_id: String) {
        let run = Arc::downgrade(run);
        let client = self.services.generation.clone();
        let events = Arc::clone(&self.services.events);

        tokio::spawn(async move {
            events.publish(StageEvent::started(id, Stage::Poll).with_key(clip));
            let observe = |progress: JobProgress| {
                let run = run.clone();
                async move { apply_progress(&run, epoch, clip, &progress).await }
            };

            match client.wait_with(&task_id, observe).await {
                Ok(_) => {
                    events.publish(StageEvent::succeeded(id, Stage::Poll).with_key(clip));
                }
                Err(e) => {
                    let e = e.for_clip(clip);
                    apply_progress(&run, epoch, clip, &JobProgress::Failed(e.to_string())).await;
                    events.publish(StageEvent::failed(id, Stage::Poll, e.to_string()).with_key(clip));
                }
            }
        });
    }

    /// Wait until both generation jobs are terminal.
    pub async fn await_generation(&self, id: RunId) -> Result<RunSnapshot, PipelineError> {
        let run = self.run(id).await?;
        loop {
            let mut changes = {
                let run = run.lock().await;
                if run.discarded {
                    return Err(PipelineError::RunNotFound(id.to_string()));
                }
                let generation = run.generation()?;
                if generation.jobs.values().all(|j| j.status().is_terminal()) {
                    return Ok(run.snapshot());
                }
                run.progress.subscribe()
            };
            if changes.changed().await.is_err() {
                return Err(PipelineError::Internal("run closed while waiting".into()));
            }
        }
    }

    pub async fn select_clips(
        &self,
        id: RunId,
        keys: impl IntoIterator<Item = ClipKey>,
    ) -> Result<RunSnapshot, PipelineError> {
        let run = self.run(id).await?;
        let mut run = run.lock().await;
        run.generation()?;
        run.selected_clips = keys.into_iter().collect();
        Ok(run.snapshot())
    }

    /// Stitch the chosen clips in canonical order (clip1, clip2).
    ///
    /// `keys` defaults to the stored clip selection and becomes the new
    /// selection.
    pub async fn stitch(
        &self,
        id: RunId,
        keys: Option<&[ClipKey]>,
        delivery: Delivery,
    ) -> Result<RunSnapshot, PipelineError> {
        let run = self.run(id).await?;
        let (clips, workdir, epoch) = {
            let mut run = run.lock().await;
            let generation = run.generation()?;
            let keys: BTreeSet<ClipKey> = match keys {
                Some(keys) => keys.iter().copied().collect(),
                None => run.selected_clips.clone(),
            };
            if keys.is_empty() {
                return Err(PipelineError::InvalidInput("select at least one clip to stitch".into()));
            }

            let mut clips: Vec<MediaRef> = Vec::with_capacity(keys.len());
            for key in &keys {
                let job = generation
                    .jobs
                    .get(key)
                    .ok_or_else(|| PipelineError::InvalidInput(format!("no job for {key}")))?;
                let first = job
                    .result_urls()
                    .and_then(|urls| urls.first())
                    .ok_or_else(|| {
                        PipelineError::InvalidInput(format!(
                            "{key} is not completed (status {:?})",
                            job.status()
                        ))
                    })?;
                clips.push(first.clone());
            }

            run.selected_clips = keys;
            (clips, run.workdir.path().to_path_buf(), run.generation_epoch)
        };

        self.events().publish(StageEvent::started(id, Stage::Stitch));
        let artifact = match self.services.stitcher().stitch(&clips, &workdir, delivery).await {
            Ok(artifact) => artifact,
            Err(e) => {
                self.events()
                    .publish(StageEvent::failed(id, Stage::Stitch, e.to_string()));
                return Err(e);
            }
        };

        let mut run = run.lock().await;
        if run.generation_epoch == epoch {
            run.final_video = Some(artifact);
            run.notify();
        }
        self.events().publish(StageEvent::succeeded(id, Stage::Stitch));
        Ok(run.snapshot())
    }

    /// The stitched video of a run.
    pub async fn final_video(&self, id: RunId) -> Result<Artifact, PipelineError> {
        let run = self.run(id).await?;
        let run = run.lock().await;
        run.final_video
            .clone()
            .ok_or_else(|| PipelineError::InvalidInput("run has not been stitched yet".into()))
    }
}

fn url_for(urls: &BTreeMap<FrameKey, String>, key: FrameKey) -> Result<&str, PipelineError> {
    urls.get(&key)
        .map(String::as_str)
        .ok_or_else(|| PipelineError::Internal(format!("no published anchor for {key}")))
}

/// Apply one poll observation to a run that may since have been discarded
/// or regenerated.
async fn apply_progress(run: &Weak<Mutex<Run>>, epoch: u64, clip: ClipKey, progress: &JobProgress) {
    let Some(run) = run.upgrade() else {
        return;
    };
    let mut run = run.lock().await;
    if run.discarded || run.generation_epoch != epoch {
        return;
    }
    let changed = run
        .generation
        .as_mut()
        .and_then(|g| g.jobs.get_mut(&clip))
        .map(|job| job.advance(progress))
        .unwrap_or(false);
    if changed {
        run.notify();
    }
}
