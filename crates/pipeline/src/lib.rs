//! Pipeline stages and the run orchestrator built on them.

pub mod config;
pub mod download;
pub mod events;
pub mod extractor;
pub mod media;
pub mod orchestrator;
pub mod services;
pub mod stitcher;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod test_support;
