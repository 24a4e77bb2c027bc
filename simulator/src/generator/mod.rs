pub mod scene;
pub mod waveform;
