//! Spatial-processing core for multi-channel acoustic arrays.
//!
//! The transform engine feeds the block convolver, which in turn carries the
//! per-channel steering and matched-filter kernels of the beamformer. The
//! beamformer turns per-channel complex samples into one direction-of-arrival
//! record per range sample.

pub mod interface;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod telemetry;

pub use interface::{ArrayGeometry, ChannelGroup, DoaRecord};
pub use math::{allowed_size, Direction, TransformEngine, TransformKind};
pub use prelude::{ComplexSample, CoreError, CoreResult};
pub use processing::{Beamformer, BlockConvolver, Interferometer, KernelDomain};
