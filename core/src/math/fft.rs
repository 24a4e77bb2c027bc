//! Fixed-length real/complex transforms with lazy plan rebuilds.
//!
//! Transform lengths come from [`allowed_size`]; callers hand in buffers of
//! at least that length and the number of significant samples they hold.
//! Forward results are divided by that sample count, so spectra are
//! normalised to the caller's nominal input length independently of the
//! internal zero padding.

use std::sync::Arc;

use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::{num_traits::Zero, Fft, FftPlanner};

use crate::math::sizes::allowed_size;
use crate::prelude::{CoreError, CoreResult};
use crate::telemetry::log::LogManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Real,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Spectrum rotation that maps output bins onto a linear frequency axis
/// centred on the carrier.
///
/// After alignment bin 0 holds `carrier - sample_rate / 2` and the bins
/// ascend in steps of `sample_rate / size`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyAlignment {
    pub carrier_frequency: f64,
    pub reference_frequency: f64,
    pub sample_rate: f64,
}

impl FrequencyAlignment {
    /// Position that the unrotated bin 0 takes after alignment.
    pub fn origin_index(&self, size: usize) -> usize {
        let half_rate = self.sample_rate / 2.0;
        let df = self.sample_rate / size as f64;
        let reference = self
            .reference_frequency
            .max(self.carrier_frequency - half_rate)
            .min(self.carrier_frequency + half_rate - df);

        let offset = (self.carrier_frequency - reference) % self.sample_rate;
        let shift = (size as f64 * offset / self.sample_rate) as i64;
        (size as i64 / 2 - shift).rem_euclid(size as i64) as usize
    }

    /// Frequency in hertz of an aligned bin.
    pub fn bin_frequency(&self, size: usize, index: usize) -> f64 {
        let df = self.sample_rate / size as f64;
        self.carrier_frequency - self.sample_rate / 2.0 + index as f64 * df
    }

    pub fn apply(&self, spectrum: &mut [Complex32]) {
        let origin = self.origin_index(spectrum.len());
        spectrum.rotate_right(origin);
    }
}

/// Forward/inverse complex plans of one length, shareable across threads.
#[derive(Clone)]
pub struct ComplexPlans {
    pub forward: Arc<dyn Fft<f32>>,
    pub inverse: Arc<dyn Fft<f32>>,
    size: usize,
}

impl ComplexPlans {
    /// Plans for exactly `size` points, which must be a supported length.
    pub fn new(size: usize) -> CoreResult<Self> {
        if size == 0 {
            return Err(CoreError::EmptyInput);
        }
        let rounded = allowed_size(size)?;
        if rounded != size {
            return Err(CoreError::LengthMismatch {
                expected: rounded,
                actual: size,
            });
        }
        Ok(Self::with_planner(&mut FftPlanner::new(), size))
    }

    fn with_planner(planner: &mut FftPlanner<f32>, size: usize) -> Self {
        Self {
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Scratch length sufficient for in-place processing in either direction.
    pub fn scratch_len(&self) -> usize {
        self.forward
            .get_inplace_scratch_len()
            .max(self.inverse.get_inplace_scratch_len())
    }
}

enum Plan {
    Real {
        forward: Arc<dyn RealToComplex<f32>>,
        inverse: Arc<dyn ComplexToReal<f32>>,
    },
    Complex(ComplexPlans),
}

/// Transform engine that keeps its plan and work buffers between calls.
///
/// The plan is rebuilt only when the data kind or the rounded transform
/// length changes. Not safe for concurrent use; see [`ComplexPlans`] for
/// sharing a plan between workers.
pub struct TransformEngine {
    complex_planner: FftPlanner<f32>,
    real_planner: RealFftPlanner<f32>,
    plan: Option<Plan>,
    kind: Option<TransformKind>,
    size: usize,
    alignment: Option<FrequencyAlignment>,
    spectrum: Vec<Complex32>,
    real_work: Vec<f32>,
    scratch: Vec<Complex32>,
    staged_real: Vec<f32>,
    staged_complex: Vec<Complex32>,
    logger: LogManager,
}

impl TransformEngine {
    pub fn new() -> Self {
        Self {
            complex_planner: FftPlanner::new(),
            real_planner: RealFftPlanner::new(),
            plan: None,
            kind: None,
            size: 0,
            alignment: None,
            spectrum: Vec::new(),
            real_work: Vec::new(),
            scratch: Vec::new(),
            staged_real: Vec::new(),
            staged_complex: Vec::new(),
            logger: LogManager::new("transform"),
        }
    }

    /// Current plan length, if a plan has been built.
    pub fn transform_size(&self) -> Option<usize> {
        self.plan.as_ref().map(|_| self.size)
    }

    pub fn kind(&self) -> Option<TransformKind> {
        self.kind
    }

    pub fn alignment(&self) -> Option<FrequencyAlignment> {
        self.alignment
    }

    /// Enables or disables spectrum alignment for forward complex transforms.
    pub fn set_frequency_alignment(
        &mut self,
        enabled: bool,
        carrier_frequency: f64,
        reference_frequency: f64,
        sample_rate: f64,
    ) -> CoreResult<()> {
        if !enabled {
            self.alignment = None;
            return Ok(());
        }

        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(CoreError::InvalidConfiguration(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }
        if !(carrier_frequency.is_finite() && reference_frequency.is_finite()) {
            return Err(CoreError::InvalidConfiguration(
                "carrier and reference frequencies must be finite".into(),
            ));
        }

        self.alignment = Some(FrequencyAlignment {
            carrier_frequency,
            reference_frequency,
            sample_rate,
        });
        Ok(())
    }

    /// In-place transform of real data.
    ///
    /// `data` must hold at least `allowed_size(n_points)` floats. The
    /// spectrum is packed as `[X0, X(N/2), re1, im1, re2, im2, ...]`; only
    /// the first half of the bins is informative for real input.
    pub fn transform_real(
        &mut self,
        direction: Direction,
        data: &mut [f32],
        n_points: usize,
    ) -> CoreResult<()> {
        let size = checked_size(data.len(), n_points)?;
        self.prepare(TransformKind::Real, size)?;

        let Some(Plan::Real { forward, inverse }) = &self.plan else {
            return Err(CoreError::NotConfigured);
        };
        let buffer = &mut data[..size];

        match direction {
            Direction::Forward => {
                self.real_work.copy_from_slice(buffer);
                let scratch_len = forward.get_scratch_len();
                forward
                    .process_with_scratch(
                        &mut self.real_work,
                        &mut self.spectrum,
                        &mut self.scratch[..scratch_len],
                    )
                    .map_err(|err| CoreError::Transform(err.to_string()))?;
                pack_real_spectrum(&self.spectrum, buffer, 1.0 / n_points as f32);
            }
            Direction::Backward => {
                unpack_real_spectrum(buffer, &mut self.spectrum);
                let scratch_len = inverse.get_scratch_len();
                inverse
                    .process_with_scratch(
                        &mut self.spectrum,
                        &mut self.real_work,
                        &mut self.scratch[..scratch_len],
                    )
                    .map_err(|err| CoreError::Transform(err.to_string()))?;
                let gain = n_points as f32 / size as f32;
                for (dst, src) in buffer.iter_mut().zip(self.real_work.iter()) {
                    *dst = src * gain;
                }
            }
        }

        Ok(())
    }

    /// In-place transform of complex data.
    ///
    /// `data` must hold at least `allowed_size(n_points)` samples. Forward
    /// results are rotated when frequency alignment is enabled.
    pub fn transform_complex(
        &mut self,
        direction: Direction,
        data: &mut [Complex32],
        n_points: usize,
    ) -> CoreResult<()> {
        let size = checked_size(data.len(), n_points)?;
        self.prepare(TransformKind::Complex, size)?;

        let Some(Plan::Complex(plans)) = &self.plan else {
            return Err(CoreError::NotConfigured);
        };
        let buffer = &mut data[..size];

        match direction {
            Direction::Forward => {
                let scratch_len = plans.forward.get_inplace_scratch_len();
                plans
                    .forward
                    .process_with_scratch(buffer, &mut self.scratch[..scratch_len]);
                if let Some(alignment) = &self.alignment {
                    alignment.apply(buffer);
                }
                scale(buffer, 1.0 / n_points as f32);
            }
            Direction::Backward => {
                let scratch_len = plans.inverse.get_inplace_scratch_len();
                plans
                    .inverse
                    .process_with_scratch(buffer, &mut self.scratch[..scratch_len]);
                scale(buffer, n_points as f32 / size as f32);
            }
        }

        Ok(())
    }

    /// Transforms a copy of `data`, leaving the input untouched.
    ///
    /// The returned view has `allowed_size(data.len())` entries and stays
    /// valid until the next call on this engine.
    pub fn transform_const_real(&mut self, direction: Direction, data: &[f32]) -> CoreResult<&[f32]> {
        let size = allowed_size(data.len())?;

        let mut staged = std::mem::take(&mut self.staged_real);
        staged.clear();
        staged.extend_from_slice(data);
        staged.resize(size, 0.0);

        let result = self.transform_real(direction, &mut staged, data.len());
        self.staged_real = staged;
        result?;
        Ok(&self.staged_real)
    }

    /// Complex counterpart of [`TransformEngine::transform_const_real`].
    pub fn transform_const_complex(
        &mut self,
        direction: Direction,
        data: &[Complex32],
    ) -> CoreResult<&[Complex32]> {
        let size = allowed_size(data.len())?;

        let mut staged = std::mem::take(&mut self.staged_complex);
        staged.clear();
        staged.extend_from_slice(data);
        staged.resize(size, Complex32::zero());

        let result = self.transform_complex(direction, &mut staged, data.len());
        self.staged_complex = staged;
        result?;
        Ok(&self.staged_complex)
    }

    /// Complex plans for `allowed_size(n_points)`, reusing the current plan
    /// when it already matches.
    pub fn complex_plans(&mut self, n_points: usize) -> CoreResult<ComplexPlans> {
        if n_points == 0 {
            return Err(CoreError::EmptyInput);
        }
        let size = allowed_size(n_points)?;
        self.prepare(TransformKind::Complex, size)?;

        match &self.plan {
            Some(Plan::Complex(plans)) => Ok(plans.clone()),
            _ => Err(CoreError::NotConfigured),
        }
    }

    fn prepare(&mut self, kind: TransformKind, size: usize) -> CoreResult<()> {
        if self.plan.is_some() && self.kind == Some(kind) && self.size == size {
            return Ok(());
        }

        let (plan, scratch_len, spectrum_len) = match kind {
            TransformKind::Real => {
                let forward = self.real_planner.plan_fft_forward(size);
                let inverse = self.real_planner.plan_fft_inverse(size);
                let scratch_len = forward.get_scratch_len().max(inverse.get_scratch_len());
                (Plan::Real { forward, inverse }, scratch_len, size / 2 + 1)
            }
            TransformKind::Complex => {
                let plans = ComplexPlans::with_planner(&mut self.complex_planner, size);
                let scratch_len = plans.scratch_len();
                (Plan::Complex(plans), scratch_len, 0)
            }
        };

        self.plan = Some(plan);
        self.kind = Some(kind);
        self.size = size;
        self.spectrum = vec![Complex32::zero(); spectrum_len];
        self.real_work = match kind {
            TransformKind::Real => vec![0.0; size],
            TransformKind::Complex => Vec::new(),
        };
        self.scratch = vec![Complex32::zero(); scratch_len];

        self.logger
            .detail(&format!("rebuilt {:?} plan for {} points", kind, size));
        Ok(())
    }
}

impl Default for TransformEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn checked_size(buffer_len: usize, n_points: usize) -> CoreResult<usize> {
    if n_points == 0 {
        return Err(CoreError::EmptyInput);
    }
    let size = allowed_size(n_points)?;
    if buffer_len < size {
        return Err(CoreError::LengthMismatch {
            expected: size,
            actual: buffer_len,
        });
    }
    Ok(size)
}

fn scale(buffer: &mut [Complex32], factor: f32) {
    for value in buffer.iter_mut() {
        *value *= factor;
    }
}

fn pack_real_spectrum(spectrum: &[Complex32], packed: &mut [f32], factor: f32) {
    let half = packed.len() / 2;
    packed[0] = spectrum[0].re * factor;
    packed[1] = spectrum[half].re * factor;
    for bin in 1..half {
        packed[2 * bin] = spectrum[bin].re * factor;
        packed[2 * bin + 1] = spectrum[bin].im * factor;
    }
}

fn unpack_real_spectrum(packed: &[f32], spectrum: &mut [Complex32]) {
    let half = packed.len() / 2;
    spectrum[0] = Complex32::new(packed[0], 0.0);
    spectrum[half] = Complex32::new(packed[1], 0.0);
    for bin in 1..half {
        spectrum[bin] = Complex32::new(packed[2 * bin], packed[2 * bin + 1]);
    }
}
