use std::f64::consts::PI;

use crate::interface::geometry::ArrayGeometry;
use crate::prelude::{CoreError, CoreResult};

pub const MAX_BEAMS: usize = 1024;
/// Smallest baseline, in meters, treated as non-degenerate.
pub const NEAR_ZERO: f64 = 1e-5;

/// Phase centres of the two interferometric sub-apertures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubApertures {
    pub first_center: f64,
    pub second_center: f64,
    /// `second_center - first_center`.
    pub baseline: f64,
}

impl SubApertures {
    pub fn from_geometry(geometry: &ArrayGeometry) -> CoreResult<Self> {
        let first_center = mean_offset(geometry, |channel| geometry.groups[channel].in_first())?;
        let second_center =
            mean_offset(geometry, |channel| geometry.groups[channel].in_second())?;
        let baseline = second_center - first_center;

        if baseline.abs() <= NEAR_ZERO {
            return Err(CoreError::InvalidConfiguration(format!(
                "sub-aperture baseline {:.3e} m is degenerate",
                baseline
            )));
        }

        Ok(Self {
            first_center,
            second_center,
            baseline,
        })
    }
}

fn mean_offset(geometry: &ArrayGeometry, member: impl Fn(usize) -> bool) -> CoreResult<f64> {
    let (sum, count) = geometry
        .offsets
        .iter()
        .enumerate()
        .filter(|(channel, _)| member(*channel))
        .fold((0.0f64, 0usize), |(sum, count), (_, offset)| (sum + offset, count + 1));

    if count == 0 {
        return Err(CoreError::InvalidConfiguration(
            "empty sub-aperture".into(),
        ));
    }
    Ok(sum / count as f64)
}

/// Number of beams needed to cover the field of view at the array's
/// angular resolution, clamped to `[n_channels, MAX_BEAMS]`.
pub fn beam_count(geometry: &ArrayGeometry) -> usize {
    let wavelength = geometry.wavelength();
    let (min, max) = geometry
        .offsets
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &offset| {
            (lo.min(offset), hi.max(offset))
        });
    let span = (max - min).max(0.0);

    let resolution = (wavelength / (span + wavelength)).asin();
    let estimate = 8.0 * (geometry.field_of_view / resolution).ceil();
    let n_beams = if estimate.is_finite() {
        estimate.min(MAX_BEAMS as f64) as usize
    } else {
        MAX_BEAMS
    };

    n_beams.clamp(geometry.n_channels().min(MAX_BEAMS), MAX_BEAMS)
}

/// Steering directions and their phase-to-angle coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamSet {
    pub angles: Vec<f64>,
    pub sines: Vec<f64>,
    /// `c / (2π·f·baseline·cos(angle))` per beam.
    pub phase_coefficients: Vec<f64>,
}

impl BeamSet {
    pub fn derive(geometry: &ArrayGeometry, apertures: &SubApertures) -> Self {
        let n_beams = beam_count(geometry);
        let fov = geometry.field_of_view;
        let last = (n_beams - 1).max(1) as f64;

        let angles: Vec<f64> = (0..n_beams)
            .map(|beam| -fov / 2.0 + fov * beam as f64 / last)
            .collect();
        let sines = angles.iter().map(|angle| angle.sin()).collect();
        let phase_coefficients = angles
            .iter()
            .map(|angle| {
                geometry.sound_velocity
                    / (2.0 * PI * geometry.carrier_frequency * apertures.baseline * angle.cos())
            })
            .collect();

        Self {
            angles,
            sines,
            phase_coefficients,
        }
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }
}
