//! Stage events published while runs progress.
//!
//! Every orchestrator action announces when a stage starts, succeeds or
//! fails. Events are logged through `tracing` and fanned out on an
//! in-process [`EventBus`] so observers (a progress UI, tests) can follow
//! a run without polling snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::orchestrator::RunId;

// ---------------------------------------------------------------------------
// StageEvent
// ---------------------------------------------------------------------------

/// Pipeline stage an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Swap,
    Publish,
    Generate,
    Poll,
    Stitch,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Swap => "swap",
            Stage::Publish => "publish",
            Stage::Generate => "generate",
            Stage::Poll => "poll",
            Stage::Stitch => "stitch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Started,
    Succeeded,
    Failed,
}

/// Something that happened to one run.
///
/// Built with [`StageEvent::started`], [`StageEvent::succeeded`] or
/// [`StageEvent::failed`], optionally narrowed to a frame or clip with
/// [`with_key`](StageEvent::with_key).
#[derive(Debug, Clone, Serialize)]
pub struct StageEvent {
    pub run_id: RunId,
    pub stage: Stage,
    pub status: StageStatus,
    /// Frame or clip key the event concerns, e.g. `"middle"` or `"clip2"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StageEvent {
    fn new(run_id: RunId, stage: Stage, status: StageStatus) -> Self {
        Self {
            run_id,
            stage,
            status,
            key: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn started(run_id: RunId, stage: Stage) -> Self {
        Self::new(run_id, stage, StageStatus::Started)
    }

    pub fn succeeded(run_id: RunId, stage: Stage) -> Self {
        Self::new(run_id, stage, StageStatus::Succeeded)
    }

    pub fn failed(run_id: RunId, stage: Stage, message: impl Into<String>) -> Self {
        let mut event = Self::new(run_id, stage, StageStatus::Failed);
        event.message = Some(message.into());
        event
    }

    pub fn with_key(mut self, key: impl ToString) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out of [`StageEvent`]s.
///
/// Slow receivers observe `RecvError::Lagged` once the buffer overflows;
/// publishing never blocks.
pub struct EventBus {
    sender: broadcast::Sender<StageEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Log the event and hand it to every current subscriber.
    pub fn publish(&self, event: StageEvent) {
        let key = event.key.as_deref().unwrap_or("");
        let message = event.message.as_deref().unwrap_or("");
        match event.status {
            StageStatus::Failed => tracing::warn!(
                run_id = %event.run_id,
                stage = event.stage.as_str(),
                key,
                message,
                "Stage failed",
            ),
            StageStatus::Started => tracing::debug!(
                run_id = %event.run_id,
                stage = event.stage.as_str(),
                key,
                "Stage started",
            ),
            StageStatus::Succeeded => tracing::info!(
                run_id = %event.run_id,
                stage = event.stage.as_str(),
                key,
                message,
                "Stage succeeded",
            ),
        }

        // A send error only means nobody is subscribed.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
