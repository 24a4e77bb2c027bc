//! Block convolution against indexed, pre-transformed kernels.
//!
//! The input is split into blocks of `N` samples stepped by `N/2`. Each
//! block is transformed, multiplied by the conjugated kernel spectrum and
//! transformed back; only the first `N/2` samples of every block are kept.
//! Kernels never exceed `N/2` taps, so the kept half is free of circular
//! wrap-around and blocks are independent of one another.

use std::collections::BTreeMap;

use num_complex::Complex32;
use rayon::prelude::*;
use rustfft::num_traits::Zero;

use crate::math::fft::ComplexPlans;
use crate::math::sizes::{allowed_size, is_allowed};
use crate::prelude::{CoreError, CoreResult};
use crate::processing::scratch::ConvolutionScratch;
use crate::telemetry::log::LogManager;

/// Domain in which a kernel image is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelDomain {
    /// Time samples; transformed and conjugated on registration.
    Time,
    /// A spectrum of exactly the engine's transform length, in native bin
    /// order, used as given.
    Frequency,
}

struct KernelImage {
    spectrum: Vec<Complex32>,
    norm: f32,
}

/// Overlap-save style block convolver with a sparse kernel table.
///
/// All kernels share the transform length fixed by the kernel at index 0.
/// Registering a new index-0 kernel re-establishes that length and drops
/// every other kernel.
pub struct BlockConvolver {
    kernels: BTreeMap<usize, KernelImage>,
    plans: Option<ComplexPlans>,
    scratch: ConvolutionScratch,
    logger: LogManager,
}

impl BlockConvolver {
    pub fn new() -> Self {
        Self {
            kernels: BTreeMap::new(),
            plans: None,
            scratch: ConvolutionScratch::new(),
            logger: LogManager::new("convolution"),
        }
    }

    /// Transform length a time-domain kernel of `n_points` taps would use.
    pub fn convolution_size(n_points: usize) -> CoreResult<usize> {
        if n_points == 0 {
            return Err(CoreError::EmptyInput);
        }
        allowed_size(2 * n_points)
    }

    /// Transform length fixed by the index-0 kernel.
    pub fn transform_size(&self) -> Option<usize> {
        self.plans.as_ref().map(ComplexPlans::size)
    }

    pub fn has_kernel(&self, index: usize) -> bool {
        self.kernels.contains_key(&index)
    }

    pub fn kernel_count(&self) -> usize {
        self.kernels.len()
    }

    /// Registers, replaces or clears the kernel at `index`.
    ///
    /// `None` clears that index only, except at index 0 where it clears the
    /// whole table. On error the table is left as it was.
    pub fn register_kernel(
        &mut self,
        index: usize,
        image: Option<&[Complex32]>,
        domain: KernelDomain,
    ) -> CoreResult<()> {
        let Some(image) = image else {
            if index == 0 {
                self.clear();
            } else {
                self.kernels.remove(&index);
            }
            return Ok(());
        };

        if image.is_empty() {
            return Err(CoreError::EmptyInput);
        }

        let size = if index == 0 {
            match domain {
                KernelDomain::Time => Self::convolution_size(image.len())?,
                KernelDomain::Frequency => {
                    if !is_allowed(image.len()) {
                        return Err(CoreError::LengthMismatch {
                            expected: allowed_size(image.len())?,
                            actual: image.len(),
                        });
                    }
                    image.len()
                }
            }
        } else {
            let size = self.transform_size().ok_or(CoreError::MissingKernel(0))?;
            let fits = match domain {
                KernelDomain::Time => 2 * image.len() <= size,
                KernelDomain::Frequency => image.len() == size,
            };
            if !fits {
                return Err(CoreError::LengthMismatch {
                    expected: size,
                    actual: image.len(),
                });
            }
            size
        };

        let plans = if index == 0 {
            match &self.plans {
                Some(current) if current.size() == size => current.clone(),
                _ => ComplexPlans::new(size)?,
            }
        } else {
            self.plans.clone().ok_or(CoreError::MissingKernel(0))?
        };

        let kernel = match domain {
            KernelDomain::Time => {
                let mut spectrum = vec![Complex32::zero(); size];
                spectrum[..image.len()].copy_from_slice(image);
                let mut work = vec![Complex32::zero(); plans.scratch_len()];
                plans.forward.process_with_scratch(&mut spectrum, &mut work);
                for value in spectrum.iter_mut() {
                    *value = value.conj();
                }
                KernelImage {
                    spectrum,
                    norm: 1.0 / (size as f32 * image.len() as f32),
                }
            }
            KernelDomain::Frequency => KernelImage {
                spectrum: image.to_vec(),
                norm: 1.0 / size as f32,
            },
        };

        if index == 0 {
            if self.kernels.len() > 1 {
                self.logger.detail(&format!(
                    "index 0 re-registered, dropping {} kernels",
                    self.kernels.len() - 1
                ));
            }
            self.kernels.clear();
            self.plans = Some(plans);
        }
        self.kernels.insert(index, kernel);
        Ok(())
    }

    /// Drops every kernel and the transform length they shared.
    pub fn clear(&mut self) {
        self.kernels.clear();
        self.plans = None;
    }

    /// Convolves `data` in place with the kernel at `index`, using the
    /// engine's own scratch.
    pub fn convolve(&mut self, index: usize, data: &mut [Complex32], scale: f32) -> CoreResult<()> {
        let mut scratch = std::mem::take(&mut self.scratch);
        let result = self.convolve_with(index, data, scale, &mut scratch);
        self.scratch = scratch;
        result
    }

    /// Convolves `data` in place with the kernel at `index`, using
    /// caller-owned scratch, so several callers can share one kernel table.
    ///
    /// On error `data` is not modified.
    pub fn convolve_with(
        &self,
        index: usize,
        data: &mut [Complex32],
        scale: f32,
        scratch: &mut ConvolutionScratch,
    ) -> CoreResult<()> {
        let kernel = self
            .kernels
            .get(&index)
            .ok_or(CoreError::MissingKernel(index))?;
        let plans = self.plans.as_ref().ok_or(CoreError::MissingKernel(0))?;
        if data.is_empty() {
            return Err(CoreError::EmptyInput);
        }

        let size = plans.size();
        let half = size / 2;
        let n_points = data.len();
        let n_blocks = (n_points + half - 1) / half;
        let factor = scale * kernel.norm;
        let scratch_len = plans.scratch_len();

        let input = scratch.input.prepare((n_blocks + 1) * half);
        input[..n_points].copy_from_slice(data);
        let input: &[Complex32] = input;
        let blocks = scratch.blocks.prepare(n_blocks * size);

        blocks.par_chunks_mut(size).enumerate().for_each_init(
            || vec![Complex32::zero(); scratch_len],
            |work, (block_index, block)| {
                let start = block_index * half;
                block.copy_from_slice(&input[start..start + size]);
                plans.forward.process_with_scratch(block, work);
            },
        );

        data.par_chunks_mut(half)
            .zip(blocks.par_chunks_mut(size))
            .for_each_init(
                || vec![Complex32::zero(); scratch_len],
                |work, (output, block)| {
                    for (value, weight) in block.iter_mut().zip(kernel.spectrum.iter()) {
                        *value *= *weight * factor;
                    }
                    plans.inverse.process_with_scratch(block, work);
                    output.copy_from_slice(&block[..output.len()]);
                },
            );

        Ok(())
    }
}

impl Default for BlockConvolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(n: usize, cycles_per_sample: f32) -> Vec<Complex32> {
        (0..n)
            .map(|i| Complex32::from_polar(1.0, 2.0 * PI * cycles_per_sample * i as f32))
            .collect()
    }

    #[test]
    fn impulse_reproduces_normalised_kernel() {
        let mut convolver = BlockConvolver::new();
        let kernel: Vec<Complex32> = (0..20)
            .map(|k| Complex32::new(1.0 + k as f32, 0.5 * k as f32 - 2.0))
            .collect();
        convolver
            .register_kernel(0, Some(kernel.as_slice()), KernelDomain::Time)
            .unwrap();
        assert_eq!(convolver.transform_size(), Some(64));

        let position = 150;
        let mut data = vec![Complex32::zero(); 300];
        data[position] = Complex32::new(1.0, 0.0);
        convolver.convolve(0, &mut data, 1.0).unwrap();

        let m = kernel.len() as f32;
        for (i, value) in data.iter().enumerate() {
            let expected = if i <= position && position - i < kernel.len() {
                kernel[position - i].conj() / m
            } else {
                Complex32::zero()
            };
            assert!((value - expected).norm() < 1e-4, "sample {}: {} vs {}", i, value, expected);
        }
    }

    #[test]
    fn matched_tone_gives_triangular_envelope() {
        let mut convolver = BlockConvolver::new();
        let duration = 64;
        let replica = tone(duration, 0.1);
        convolver
            .register_kernel(0, Some(replica.as_slice()), KernelDomain::Time)
            .unwrap();

        let offset = 2 * duration;
        let mut data = vec![Complex32::zero(); 1280];
        data[offset..offset + duration].copy_from_slice(&replica);
        convolver.convolve(0, &mut data, 1.0).unwrap();

        for (i, value) in data.iter().enumerate() {
            let lag = i as f32 - offset as f32;
            let expected = (1.0 - lag.abs() / duration as f32).max(0.0);
            assert!((value.norm() - expected).abs() < 1e-3, "sample {}", i);
        }
        let peak = data
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, offset);
    }

    #[test]
    fn scale_multiplies_output() {
        let mut convolver = BlockConvolver::new();
        let replica = tone(32, 0.05);
        convolver
            .register_kernel(0, Some(replica.as_slice()), KernelDomain::Time)
            .unwrap();

        let mut data = vec![Complex32::zero(); 100];
        data[10..42].copy_from_slice(&replica);
        convolver.convolve(0, &mut data, 3.0).unwrap();
        assert!((data[10].norm() - 3.0).abs() < 1e-3);
    }

    #[test]
    fn missing_kernel_leaves_data_untouched() {
        let mut convolver = BlockConvolver::new();
        let mut data = tone(50, 0.2);
        let original = data.clone();
        assert_eq!(
            convolver.convolve(0, &mut data, 1.0),
            Err(CoreError::MissingKernel(0))
        );

        convolver
            .register_kernel(0, Some(tone(16, 0.1).as_slice()), KernelDomain::Time)
            .unwrap();
        assert_eq!(
            convolver.convolve(3, &mut data, 1.0),
            Err(CoreError::MissingKernel(3))
        );
        assert_eq!(data, original);
    }

    #[test]
    fn secondary_kernels_follow_index_zero_size() {
        let mut convolver = BlockConvolver::new();
        assert_eq!(
            convolver.register_kernel(1, Some(tone(16, 0.1).as_slice()), KernelDomain::Time),
            Err(CoreError::MissingKernel(0))
        );

        convolver
            .register_kernel(0, Some(tone(16, 0.1).as_slice()), KernelDomain::Time)
            .unwrap();
        let size = convolver.transform_size().unwrap();
        assert_eq!(size, 32);

        assert_eq!(
            convolver.register_kernel(1, Some(vec![Complex32::zero(); 31].as_slice()), KernelDomain::Frequency),
            Err(CoreError::LengthMismatch {
                expected: 32,
                actual: 31
            })
        );
        assert!(!convolver.has_kernel(1));

        convolver
            .register_kernel(1, Some(vec![Complex32::new(1.0, 0.0); size].as_slice()), KernelDomain::Frequency)
            .unwrap();
        convolver
            .register_kernel(2, Some(tone(8, 0.3).as_slice()), KernelDomain::Time)
            .unwrap();
        assert_eq!(convolver.kernel_count(), 3);

        convolver.register_kernel(2, None, KernelDomain::Time).unwrap();
        assert!(!convolver.has_kernel(2));
        assert!(convolver.has_kernel(1));

        convolver
            .register_kernel(0, Some(tone(40, 0.1).as_slice()), KernelDomain::Time)
            .unwrap();
        assert_eq!(convolver.transform_size(), Some(96));
        assert_eq!(convolver.kernel_count(), 1);

        convolver.register_kernel(0, None, KernelDomain::Time).unwrap();
        assert_eq!(convolver.kernel_count(), 0);
        assert_eq!(convolver.transform_size(), None);
    }

    #[test]
    fn flat_frequency_kernel_is_identity() {
        let mut convolver = BlockConvolver::new();
        let flat = vec![Complex32::new(1.0, 0.0); 64];
        convolver
            .register_kernel(0, Some(flat.as_slice()), KernelDomain::Frequency)
            .unwrap();

        let original = tone(200, 0.13);
        let mut data = original.clone();
        convolver.convolve(0, &mut data, 1.0).unwrap();
        for (a, b) in original.iter().zip(data.iter()) {
            assert!((a - b).norm() < 1e-4);
        }
    }

    #[test]
    fn shared_table_with_external_scratch() {
        let mut convolver = BlockConvolver::new();
        let replica = tone(32, 0.07);
        convolver
            .register_kernel(0, Some(replica.as_slice()), KernelDomain::Time)
            .unwrap();

        let mut first = vec![Complex32::zero(); 256];
        first[64..96].copy_from_slice(&replica);
        let mut second = first.clone();

        let mut scratch = ConvolutionScratch::new();
        convolver
            .convolve_with(0, &mut first, 1.0, &mut scratch)
            .unwrap();
        assert!(scratch.capacity() > 0);
        convolver.convolve(0, &mut second, 1.0).unwrap();
        assert_eq!(first, second);
    }
}
