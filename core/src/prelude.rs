use num_complex::Complex32;

/// Sample unit used by every engine in the crate.
pub type ComplexSample = Complex32;

/// Common error type for the transform, convolution and beamforming engines.
///
/// Every variant is a deterministic, input-driven failure. Engines report
/// it synchronously and leave their previous state untouched.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("transform size {requested} exceeds supported maximum {max}")]
    UnsupportedSize { requested: usize, max: usize },
    #[error("no kernel registered at index {0}")]
    MissingKernel(usize),
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("engine is not configured")]
    NotConfigured,
    #[error("empty input")]
    EmptyInput,
    #[error("transform failure: {0}")]
    Transform(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
