use std::f64::consts::PI;

use num_complex::Complex32;
use rayon::prelude::*;

use crate::interface::doa::DoaRecord;
use crate::prelude::{CoreError, CoreResult};
use crate::telemetry::log::LogManager;

#[derive(Debug, Clone, Copy)]
struct Settings {
    phase_range: f64,
    distance_step: f64,
    alpha: f64,
}

/// Angle estimation from the phase difference of two receive channels.
#[derive(Debug, Clone)]
pub struct Interferometer {
    settings: Option<Settings>,
    logger: LogManager,
}

impl Interferometer {
    pub fn new() -> Self {
        Self {
            settings: None,
            logger: LogManager::new("interferometer"),
        }
    }

    pub fn configure(
        &mut self,
        carrier_frequency: f64,
        baseline: f64,
        sample_rate: f64,
        sound_velocity: f64,
    ) -> CoreResult<()> {
        for (name, value) in [
            ("carrier frequency", carrier_frequency),
            ("baseline", baseline),
            ("sample rate", sample_rate),
            ("sound velocity", sound_velocity),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(CoreError::InvalidConfiguration(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        let wavelength = sound_velocity / carrier_frequency;
        let phase_range = wavelength / (2.0 * PI * baseline);
        let alpha = (PI * phase_range).min(1.0).asin().abs();

        self.settings = Some(Settings {
            phase_range,
            distance_step: sound_velocity / (2.0 * sample_rate),
            alpha,
        });
        self.logger.detail(&format!(
            "baseline {:.4} m covers ±{:.2}°",
            baseline,
            alpha.to_degrees()
        ));
        Ok(())
    }

    /// Half-width of the unambiguous angular sector, radians.
    pub fn alpha(&self) -> Option<f64> {
        self.settings.map(|settings| settings.alpha)
    }

    /// Fills `output` from the per-sample phase difference of two channels.
    pub fn get(
        &self,
        output: &mut [DoaRecord],
        first: &[Complex32],
        second: &[Complex32],
    ) -> CoreResult<()> {
        let settings = self.settings.ok_or(CoreError::NotConfigured)?;
        for channel in [first, second] {
            if channel.len() != output.len() {
                return Err(CoreError::LengthMismatch {
                    expected: output.len(),
                    actual: channel.len(),
                });
            }
        }

        output
            .par_iter_mut()
            .zip(first.par_iter().zip(second.par_iter()))
            .enumerate()
            .for_each(|(i, (record, (a, b)))| {
                let product = a * b.conj();
                let phase = f64::from(product.im).atan2(f64::from(product.re));
                let sine = (phase * settings.phase_range).clamp(-1.0, 1.0);
                *record = DoaRecord {
                    angle: sine.asin() as f32,
                    distance: (i as f64 * settings.distance_step) as f32,
                    amplitude: a.norm() * b.norm(),
                };
            });

        Ok(())
    }
}

impl Default for Interferometer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_wavelength_baseline_covers_quarter_turn() {
        let mut interferometer = Interferometer::new();
        assert_eq!(interferometer.alpha(), None);
        interferometer
            .configure(100_000.0, 0.0075, 80_000.0, 1_500.0)
            .unwrap();
        assert!((interferometer.alpha().unwrap() - PI / 2.0).abs() < 1e-6);

        interferometer
            .configure(100_000.0, 0.03, 80_000.0, 1_500.0)
            .unwrap();
        assert!((interferometer.alpha().unwrap() - 0.25f64.asin()).abs() < 1e-9);
    }

    #[test]
    fn recovers_arrival_angle() {
        let mut interferometer = Interferometer::new();
        let (carrier, baseline, rate, velocity) = (100_000.0, 0.0075, 80_000.0, 1_500.0);
        interferometer
            .configure(carrier, baseline, rate, velocity)
            .unwrap();

        let theta: f64 = 0.2;
        let k = 2.0 * PI * carrier / velocity;
        let shift = (k * baseline * theta.sin()) as f32;
        let first: Vec<Complex32> = (0..64)
            .map(|i| Complex32::from_polar(2.0, 0.1 * i as f32 + shift))
            .collect();
        let second: Vec<Complex32> = (0..64)
            .map(|i| Complex32::from_polar(0.5, 0.1 * i as f32))
            .collect();

        let mut output = vec![DoaRecord::default(); 64];
        interferometer.get(&mut output, &first, &second).unwrap();
        for (i, record) in output.iter().enumerate() {
            assert!((record.angle as f64 - theta).abs() < 1e-4);
            assert!((record.amplitude - 1.0).abs() < 1e-5);
            assert!((record.distance as f64 - i as f64 * velocity / (2.0 * rate)).abs() < 1e-6);
        }
    }

    #[test]
    fn rejects_bad_parameters_and_lengths() {
        let mut interferometer = Interferometer::new();
        let mut output = vec![DoaRecord::default(); 4];
        let data = vec![Complex32::new(1.0, 0.0); 4];
        assert_eq!(
            interferometer.get(&mut output, &data, &data),
            Err(CoreError::NotConfigured)
        );
        assert!(interferometer
            .configure(100_000.0, 0.0, 80_000.0, 1_500.0)
            .is_err());

        interferometer
            .configure(100_000.0, 0.01, 80_000.0, 1_500.0)
            .unwrap();
        assert_eq!(
            interferometer.get(&mut output, &data[..3], &data),
            Err(CoreError::LengthMismatch {
                expected: 4,
                actual: 3
            })
        );
    }
}
