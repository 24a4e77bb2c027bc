//! Scenario synthesis and end-to-end driver for the `doacore` beamformer.
//!
//! Builds transmit replicas and multi-channel echo scenes for a linear
//! array, runs them through the core and reduces the DOA output to a list of
//! detections.

pub mod generator;
pub mod workflow;

pub use generator::{scene::Target, waveform::Waveform};
pub use workflow::{config::ScenarioConfig, runner::Runner};
