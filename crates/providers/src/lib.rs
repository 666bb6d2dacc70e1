//! HTTP clients for the external services the pipeline delegates to.
//!
//! - [`faceswap`] and [`generation`]: asynchronous task APIs behind the
//!   shared [`task::TaskProvider`] contract, driven by [`task::TaskClient`].
//! - [`resolver`]: turns share links into downloadable video URLs.
//! - [`temp_host`]: publishes local files at a public URL.

pub mod faceswap;
pub mod generation;
pub mod http;
pub mod resolver;
pub mod task;
pub mod temp_host;

#[cfg(test)]
pub(crate) mod test_support;
