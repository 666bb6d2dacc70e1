//! Frame timestamp selection.

use serde::Serialize;

use crate::types::FrameKey;

/// Duration assumed when the source video cannot be probed.
pub const DEFAULT_DURATION_SECS: f64 = 10.0;

/// Upper bound on the middle frame position.
pub const MAX_MIDDLE_SECS: f64 = 5.0;

/// Upper bound on the end frame position.
pub const MAX_END_SECS: f64 = 10.0;

/// Distance kept from the end of the stream when seeking. Decoders emit no
/// frame for a seek that lands exactly on the last timestamp.
pub const END_SEEK_MARGIN_SECS: f64 = 0.1;

/// Positions (in seconds) of the three anchor frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameTimestamps {
    pub start: f64,
    pub middle: f64,
    pub end: f64,
}

impl FrameTimestamps {
    pub fn get(&self, key: FrameKey) -> f64 {
        match key {
            FrameKey::Start => self.start,
            FrameKey::Middle => self.middle,
            FrameKey::End => self.end,
        }
    }
}

/// Normalize a probed duration: non-finite or non-positive values fall back
/// to [`DEFAULT_DURATION_SECS`].
pub fn effective_duration(probed: Option<f64>) -> f64 {
    match probed {
        Some(d) if d.is_finite() && d > 0.0 => d,
        _ => DEFAULT_DURATION_SECS,
    }
}

/// Compute `start = 0`, `middle = min(5, d/2)`, `end = min(10, d)`.
pub fn frame_timestamps(duration: f64) -> FrameTimestamps {
    let d = effective_duration(Some(duration));
    FrameTimestamps {
        start: 0.0,
        middle: MAX_MIDDLE_SECS.min(d / 2.0),
        end: MAX_END_SECS.min(d),
    }
}

/// Seek position actually handed to the decoder for `timestamp`.
///
/// Pulls positions at the very end of the stream back by
/// [`END_SEEK_MARGIN_SECS`], never below zero.
pub fn seek_position(timestamp: f64, duration: f64) -> f64 {
    let latest = (duration - END_SEEK_MARGIN_SECS).max(0.0);
    timestamp.min(latest).max(0.0)
}
