use std::f64::consts::PI;

use anyhow::{ensure, Context};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// Transmit pulse, described at baseband relative to the reference
/// frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Waveform {
    Tone {
        frequency: f64,
        duration: f64,
    },
    /// Linear frequency sweep from `start_frequency` to `end_frequency`.
    Chirp {
        start_frequency: f64,
        end_frequency: f64,
        duration: f64,
    },
}

impl Waveform {
    pub fn duration(&self) -> f64 {
        match *self {
            Waveform::Tone { duration, .. } | Waveform::Chirp { duration, .. } => duration,
        }
    }

    /// Number of samples the pulse occupies at `sample_rate`.
    pub fn len(&self, sample_rate: f64) -> anyhow::Result<usize> {
        let duration = self.duration();
        ensure!(
            duration.is_finite() && duration > 0.0,
            "waveform duration must be positive, got {}",
            duration
        );
        ensure!(
            sample_rate.is_finite() && sample_rate > 0.0,
            "sample rate must be positive, got {}",
            sample_rate
        );
        let samples = (duration * sample_rate).round() as usize;
        ensure!(samples > 0, "waveform of {} s is shorter than one sample", duration);
        Ok(samples)
    }

    /// Unit-amplitude complex samples of the pulse.
    pub fn samples(&self, sample_rate: f64) -> anyhow::Result<Vec<Complex32>> {
        let n_samples = self
            .len(sample_rate)
            .context("sizing transmit waveform")?;

        let samples = (0..n_samples)
            .map(|i| {
                let t = i as f64 / sample_rate;
                let phase = match *self {
                    Waveform::Tone { frequency, .. } => 2.0 * PI * frequency * t,
                    Waveform::Chirp {
                        start_frequency,
                        end_frequency,
                        duration,
                    } => {
                        let bandwidth = end_frequency - start_frequency;
                        2.0 * PI * start_frequency * t + PI * bandwidth * t * t / duration
                    }
                };
                Complex32::from_polar(1.0, phase as f32)
            })
            .collect();

        Ok(samples)
    }
}

impl Default for Waveform {
    fn default() -> Self {
        Waveform::Chirp {
            start_frequency: -10_000.0,
            end_frequency: 10_000.0,
            duration: 0.001,
        }
    }
}
