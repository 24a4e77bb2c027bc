use std::f64::consts::PI;

use anyhow::{bail, ensure, Context};
use doacore::math::{allowed_size, Direction, TransformEngine};
use doacore::ArrayGeometry;
use ndarray::Array2;
use num_complex::Complex32;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Point reflector seen by the array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Degrees from broadside, positive towards increasing channel offset.
    pub angle_deg: f64,
    /// Meters from the array origin.
    pub range: f64,
    #[serde(default = "unit_amplitude")]
    pub amplitude: f64,
}

fn unit_amplitude() -> f64 {
    1.0
}

impl Target {
    pub fn new(angle_deg: f64, range: f64) -> Self {
        Self {
            angle_deg,
            range,
            amplitude: 1.0,
        }
    }

    /// Two-way travel time from a transmitter at the array origin to the
    /// channel at `offset`.
    pub fn echo_delay(&self, offset: f64, sound_velocity: f64) -> f64 {
        let sine = self.angle_deg.to_radians().sin();
        let back = (self.range * self.range + offset * offset - 2.0 * self.range * offset * sine)
            .max(0.0)
            .sqrt();
        (self.range + back) / sound_velocity
    }
}

/// Synthesizes per-channel baseband echoes of a transmit replica.
///
/// Delays are applied as phase ramps on the replica spectrum, so echoes land
/// at fractional sample positions and carry the correct carrier phase per
/// channel.
pub struct SceneGenerator {
    engine: TransformEngine,
    rng: StdRng,
    noise: f32,
}

impl SceneGenerator {
    pub fn new(seed: u64, noise: f64) -> Self {
        Self {
            engine: TransformEngine::new(),
            rng: StdRng::seed_from_u64(seed),
            noise: noise.max(0.0) as f32,
        }
    }

    /// Returns a `channels × n_points` matrix of received samples.
    pub fn synthesize(
        &mut self,
        geometry: &ArrayGeometry,
        replica: &[Complex32],
        targets: &[Target],
        n_points: usize,
    ) -> anyhow::Result<Array2<Complex32>> {
        ensure!(!replica.is_empty(), "empty transmit replica");
        ensure!(
            replica.len() <= n_points,
            "replica of {} samples does not fit a {} sample window",
            replica.len(),
            n_points
        );
        let size = allowed_size(n_points).context("sizing scene transform")?;
        let fs = geometry.sample_rate;

        for target in targets {
            let latest = geometry
                .offsets
                .iter()
                .map(|&offset| target.echo_delay(offset, geometry.sound_velocity))
                .fold(0.0, f64::max);
            if (latest * fs).ceil() as usize + replica.len() > n_points {
                bail!(
                    "target at {:.2} m falls outside the {} sample window",
                    target.range,
                    n_points
                );
            }
        }

        let mut spectrum = vec![Complex32::new(0.0, 0.0); size];
        spectrum[..replica.len()].copy_from_slice(replica);
        self.engine
            .transform_complex(Direction::Forward, &mut spectrum, size)
            .context("transforming replica")?;

        let df = fs / size as f64;
        let frequencies: Vec<f64> = (0..size)
            .map(|bin| {
                let signed = if bin < size / 2 {
                    bin as f64
                } else {
                    bin as f64 - size as f64
                };
                geometry.reference_frequency + signed * df
            })
            .collect();

        let mut data = Array2::zeros((geometry.n_channels(), n_points));
        let mut echo = vec![Complex32::new(0.0, 0.0); size];
        for (channel, mut row) in data.outer_iter_mut().enumerate() {
            let offset = geometry.offsets[channel];
            echo.fill(Complex32::new(0.0, 0.0));

            for target in targets {
                let delay = target.echo_delay(offset, geometry.sound_velocity);
                for ((value, source), frequency) in
                    echo.iter_mut().zip(spectrum.iter()).zip(&frequencies)
                {
                    let cycles = (frequency * delay).fract();
                    let shift = Complex32::from_polar(
                        target.amplitude as f32,
                        (-2.0 * PI * cycles) as f32,
                    );
                    *value += *source * shift;
                }
            }

            self.engine
                .transform_complex(Direction::Backward, &mut echo, size)
                .context("transforming echo")?;

            let polarity: f32 = if geometry.is_inverted(channel) { -1.0 } else { 1.0 };
            for (sample, value) in row.iter_mut().zip(echo.iter()) {
                *sample = *value * polarity + self.jitter();
            }
        }

        Ok(data)
    }

    fn jitter(&mut self) -> Complex32 {
        if self.noise > 0.0 {
            Complex32::new(
                self.rng.gen_range(-self.noise..self.noise),
                self.rng.gen_range(-self.noise..self.noise),
            )
        } else {
            Complex32::new(0.0, 0.0)
        }
    }
}
