//! Shared building blocks for the reelswap media pipeline.
//!
//! Domain types for runs, frames, clips and jobs, the pipeline error
//! taxonomy, ffmpeg/ffprobe command utilities, and the three flow-control
//! primitives every external call goes through: the process-wide
//! [`rate_limit::RateLimiter`], the rate-limit [`retry`] executor and the
//! bounded job [`polling`] loop.

pub mod error;
pub mod ffmpeg;
pub mod polling;
pub mod rate_limit;
pub mod retry;
pub mod timing;
pub mod types;
