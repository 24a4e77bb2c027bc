pub mod beamforming;
pub mod beamset;
pub mod convolution;
pub mod interferometer;
pub mod scratch;

pub use beamforming::{Beamformer, DEFAULT_STEERING_SIZE};
pub use beamset::{BeamSet, SubApertures, MAX_BEAMS};
pub use convolution::{BlockConvolver, KernelDomain};
pub use interferometer::Interferometer;
pub use scratch::{ConvolutionScratch, ScratchBuffer};
