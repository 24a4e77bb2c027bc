pub mod fft;
pub mod sizes;

pub use fft::{ComplexPlans, Direction, FrequencyAlignment, TransformEngine, TransformKind};
pub use sizes::{allowed_size, MAX_TRANSFORM_SIZE, MIN_TRANSFORM_SIZE};
