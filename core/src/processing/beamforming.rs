//! Beamforming and two-stage direction-of-arrival estimation.
//!
//! Every (channel, beam) pair owns a frequency-domain kernel in the block
//! convolver that steers the channel towards the beam angle and, once
//! transmit replicas are set, matched-filters it as well. A DOA frame sums
//! the convolved channels per beam, picks the strongest beam per range
//! sample and refines its angle from the phase difference between the two
//! sub-apertures.

use std::f64::consts::PI;

use ndarray::ArrayView2;
use num_complex::Complex32;
use rayon::prelude::*;
use rustfft::num_traits::Zero;

use crate::interface::doa::DoaRecord;
use crate::interface::geometry::ArrayGeometry;
use crate::math::fft::{FrequencyAlignment, TransformEngine};
use crate::prelude::{CoreError, CoreResult};
use crate::processing::beamset::{BeamSet, SubApertures};
use crate::processing::convolution::{BlockConvolver, KernelDomain};
use crate::processing::scratch::ConvolutionScratch;
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::{MetricsRecorder, MetricsSnapshot};

/// Transform length of the steering-only kernels registered by `configure`.
pub const DEFAULT_STEERING_SIZE: usize = 256;

struct Configured {
    geometry: ArrayGeometry,
    apertures: SubApertures,
    beams: BeamSet,
    distance_step: f64,
    replica_points: Option<usize>,
}

/// Per-beam synthesis buffers, reused across frames.
#[derive(Default)]
struct BeamLane {
    channel: Vec<Complex32>,
    total: Vec<Complex32>,
    first: Vec<Complex32>,
    second: Vec<Complex32>,
    scratch: ConvolutionScratch,
}

impl BeamLane {
    fn synthesize(
        &mut self,
        convolver: &BlockConvolver,
        geometry: &ArrayGeometry,
        beam: usize,
        n_beams: usize,
        data: &ArrayView2<Complex32>,
    ) -> CoreResult<()> {
        let n_points = data.ncols();
        for series in [&mut self.total, &mut self.first, &mut self.second] {
            series.clear();
            series.resize(n_points, Complex32::zero());
        }

        for (channel, row) in data.outer_iter().enumerate() {
            self.channel.clear();
            if geometry.is_inverted(channel) {
                self.channel.extend(row.iter().map(|sample| -sample));
            } else {
                self.channel.extend(row.iter().copied());
            }

            convolver.convolve_with(
                channel * n_beams + beam,
                &mut self.channel,
                1.0,
                &mut self.scratch,
            )?;

            let group = geometry.groups[channel];
            accumulate(&mut self.total, &self.channel);
            if group.in_first() {
                accumulate(&mut self.first, &self.channel);
            }
            if group.in_second() {
                accumulate(&mut self.second, &self.channel);
            }
        }

        Ok(())
    }
}

fn accumulate(sum: &mut [Complex32], values: &[Complex32]) {
    for (acc, value) in sum.iter_mut().zip(values.iter()) {
        *acc += value;
    }
}

/// Phased-array beamformer with coarse beam search and interferometric
/// angle refinement.
///
/// `configure` must succeed before DOA frames can be computed. A failed
/// `configure` or `set_signals` leaves the previous working state intact.
pub struct Beamformer {
    state: Option<Configured>,
    convolver: BlockConvolver,
    transform: TransformEngine,
    lanes: Vec<BeamLane>,
    metrics: MetricsRecorder,
    logger: LogManager,
}

impl Beamformer {
    pub fn new() -> Self {
        Self {
            state: None,
            convolver: BlockConvolver::new(),
            transform: TransformEngine::new(),
            lanes: Vec::new(),
            metrics: MetricsRecorder::new(),
            logger: LogManager::new("beamformer"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.state.is_some()
    }

    pub fn geometry(&self) -> Option<&ArrayGeometry> {
        self.state.as_ref().map(|state| &state.geometry)
    }

    pub fn sub_apertures(&self) -> Option<SubApertures> {
        self.state.as_ref().map(|state| state.apertures)
    }

    pub fn n_beams(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.beams.len())
    }

    pub fn beam_angles(&self) -> &[f64] {
        self.state
            .as_ref()
            .map_or(&[][..], |state| state.beams.angles.as_slice())
    }

    /// Range covered by one sample, meters.
    pub fn distance_step(&self) -> Option<f64> {
        self.state.as_ref().map(|state| state.distance_step)
    }

    /// Length of the replicas currently used for matched filtering.
    pub fn replica_points(&self) -> Option<usize> {
        self.state.as_ref().and_then(|state| state.replica_points)
    }

    /// Transform length of the registered kernels.
    pub fn transform_size(&self) -> Option<usize> {
        self.convolver.transform_size()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Validates `geometry`, derives the beam set and registers
    /// steering-only kernels.
    pub fn configure(&mut self, geometry: ArrayGeometry) -> CoreResult<()> {
        let result = self.build_configuration(geometry);
        match result {
            Ok((state, convolver)) => {
                self.logger.record(&format!(
                    "configured {} channels, {} beams, baseline {:.4} m",
                    state.geometry.n_channels(),
                    state.beams.len(),
                    state.apertures.baseline
                ));
                self.state = Some(state);
                self.convolver = convolver;
                self.lanes.clear();
                Ok(())
            }
            Err(err) => {
                self.logger.warn(&format!("configuration rejected: {}", err));
                self.metrics.record_error();
                Err(err)
            }
        }
    }

    fn build_configuration(
        &mut self,
        geometry: ArrayGeometry,
    ) -> CoreResult<(Configured, BlockConvolver)> {
        geometry.validate()?;
        let apertures = SubApertures::from_geometry(&geometry)?;
        let beams = BeamSet::derive(&geometry, &apertures);
        let distance_step = geometry.sound_velocity / (2.0 * geometry.sample_rate);

        let mut convolver = BlockConvolver::new();
        register_steering(
            &mut convolver,
            &mut self.transform,
            &geometry,
            &beams,
            DEFAULT_STEERING_SIZE,
            None,
        )?;

        let state = Configured {
            geometry,
            apertures,
            beams,
            distance_step,
            replica_points: None,
        };
        Ok((state, convolver))
    }

    /// Sets one transmit replica per channel (rows = channels), or `None`
    /// to fall back to steering-only kernels.
    pub fn set_signals(&mut self, images: Option<ArrayView2<Complex32>>) -> CoreResult<()> {
        let Some(state) = self.state.as_ref() else {
            return Err(CoreError::NotConfigured);
        };

        let mut convolver = BlockConvolver::new();
        let replica_points = match &images {
            Some(images) => {
                let n_channels = state.geometry.n_channels();
                if images.nrows() != n_channels {
                    return Err(CoreError::LengthMismatch {
                        expected: n_channels,
                        actual: images.nrows(),
                    });
                }
                if images.ncols() == 0 {
                    return Err(CoreError::EmptyInput);
                }
                let size = BlockConvolver::convolution_size(images.ncols())?;
                register_steering(
                    &mut convolver,
                    &mut self.transform,
                    &state.geometry,
                    &state.beams,
                    size,
                    Some(images),
                )?;
                Some(images.ncols())
            }
            None => {
                register_steering(
                    &mut convolver,
                    &mut self.transform,
                    &state.geometry,
                    &state.beams,
                    DEFAULT_STEERING_SIZE,
                    None,
                )?;
                None
            }
        };

        self.logger.detail(&format!(
            "registered {} kernels of {} bins",
            convolver.kernel_count(),
            convolver.transform_size().unwrap_or(0)
        ));
        self.convolver = convolver;
        if let Some(state) = self.state.as_mut() {
            state.replica_points = replica_points;
        }
        Ok(())
    }

    /// Computes one DOA record per range sample into `output`.
    ///
    /// `data` holds one row of samples per channel; `output` must have one
    /// entry per column.
    pub fn get_doa(
        &mut self,
        data: ArrayView2<Complex32>,
        output: &mut [DoaRecord],
    ) -> CoreResult<()> {
        let result = self.process_frame(&data, output);
        match &result {
            Ok(()) => self.metrics.record_frame(output.len()),
            Err(err) => {
                self.logger.warn(&format!("DOA frame failed: {}", err));
                self.metrics.record_error();
            }
        }
        result
    }

    /// Convenience wrapper around [`Beamformer::get_doa`] that allocates
    /// the output.
    pub fn compute_doa(&mut self, data: ArrayView2<Complex32>) -> CoreResult<Vec<DoaRecord>> {
        let mut output = vec![DoaRecord::default(); data.ncols()];
        self.get_doa(data, &mut output)?;
        Ok(output)
    }

    fn process_frame(
        &mut self,
        data: &ArrayView2<Complex32>,
        output: &mut [DoaRecord],
    ) -> CoreResult<()> {
        let state = self.state.as_ref().ok_or(CoreError::NotConfigured)?;
        let n_channels = state.geometry.n_channels();
        if data.nrows() != n_channels {
            return Err(CoreError::LengthMismatch {
                expected: n_channels,
                actual: data.nrows(),
            });
        }
        if data.ncols() == 0 {
            return Err(CoreError::EmptyInput);
        }
        if output.len() != data.ncols() {
            return Err(CoreError::LengthMismatch {
                expected: data.ncols(),
                actual: output.len(),
            });
        }

        let n_beams = state.beams.len();
        self.lanes.resize_with(n_beams, BeamLane::default);

        let convolver = &self.convolver;
        let geometry = &state.geometry;
        self.lanes
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(beam, lane)| {
                lane.synthesize(convolver, geometry, beam, n_beams, data)
            })?;

        let lanes = &self.lanes;
        let beams = &state.beams;
        let step = state.distance_step;
        output
            .par_iter_mut()
            .enumerate()
            .for_each(|(sample, record)| {
                *record = locate(lanes, beams, sample, step);
            });

        Ok(())
    }
}

impl Default for Beamformer {
    fn default() -> Self {
        Self::new()
    }
}

/// Coarse beam search followed by sub-aperture phase refinement for one
/// range sample.
fn locate(lanes: &[BeamLane], beams: &BeamSet, sample: usize, step: f64) -> DoaRecord {
    let mut winner = 0;
    let mut amplitude = lanes[0].total[sample].norm();
    for (beam, lane) in lanes.iter().enumerate().skip(1) {
        let magnitude = lane.total[sample].norm();
        if magnitude > amplitude {
            amplitude = magnitude;
            winner = beam;
        }
    }

    let lane = &lanes[winner];
    let product = lane.first[sample] * lane.second[sample].conj();
    let phase = f64::from(product.im).atan2(f64::from(product.re));
    let correction = (phase * beams.phase_coefficients[winner]).clamp(-1.0, 1.0).asin();

    DoaRecord {
        angle: (beams.angles[winner] - correction) as f32,
        distance: (sample as f64 * step) as f32,
        amplitude,
    }
}

/// Registers a kernel for every (channel, beam) pair at index
/// `channel * n_beams + beam`.
///
/// Each kernel is the steering phase ramp `exp(-i·offset·sin(angle)·k)`
/// over the transform bins, multiplied by the conjugated replica spectrum
/// when replicas are given. Replica spectra are scaled by `1 / n_points` so
/// a perfectly matched echo peaks at unit amplitude per channel.
fn register_steering(
    convolver: &mut BlockConvolver,
    transform: &mut TransformEngine,
    geometry: &ArrayGeometry,
    beams: &BeamSet,
    size: usize,
    replicas: Option<&ArrayView2<Complex32>>,
) -> CoreResult<()> {
    let plans = transform.complex_plans(size)?;
    let size = plans.size();
    let wavenumbers = bin_wavenumbers(geometry, size);
    let n_beams = beams.len();

    let mut spectrum = vec![Complex32::zero(); size];
    let mut kernel = vec![Complex32::zero(); size];
    let mut work = vec![Complex32::zero(); plans.scratch_len()];

    for channel in 0..geometry.n_channels() {
        match replicas {
            Some(replicas) => {
                let row = replicas.row(channel);
                let n_points = row.len();
                spectrum.fill(Complex32::zero());
                for (dst, src) in spectrum.iter_mut().zip(row.iter()) {
                    *dst = *src;
                }
                plans.forward.process_with_scratch(&mut spectrum, &mut work);
                let gain = 1.0 / n_points as f32;
                for value in spectrum.iter_mut() {
                    *value = value.conj() * gain;
                }
            }
            None => spectrum.fill(Complex32::new(1.0, 0.0)),
        }

        let offset = geometry.offsets[channel];
        for (beam, sine) in beams.sines.iter().enumerate() {
            for ((dst, weight), k) in kernel.iter_mut().zip(spectrum.iter()).zip(&wavenumbers) {
                let phase = -offset * sine * k;
                *dst = *weight * Complex32::from_polar(1.0, phase as f32);
            }
            convolver.register_kernel(
                channel * n_beams + beam,
                Some(kernel.as_slice()),
                KernelDomain::Frequency,
            )?;
        }
    }

    Ok(())
}

/// Acoustic wavenumber of every native transform bin.
///
/// Bins are mapped to physical frequencies within `carrier ± rate/2`,
/// accounting for the demodulation by the reference frequency.
fn bin_wavenumbers(geometry: &ArrayGeometry, size: usize) -> Vec<f64> {
    let alignment = FrequencyAlignment {
        carrier_frequency: geometry.carrier_frequency,
        reference_frequency: geometry.reference_frequency,
        sample_rate: geometry.sample_rate,
    };
    let origin = alignment.origin_index(size);

    (0..size)
        .map(|bin| {
            let aligned = (bin + origin) % size;
            let frequency = alignment.bin_frequency(size, aligned);
            2.0 * PI * frequency / geometry.sound_velocity
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::geometry::tests::line_array;
    use crate::interface::geometry::ChannelGroup;
    use crate::processing::beamset::MAX_BEAMS;
    use ndarray::Array2;

    /// Narrowband plane wave from `angle` with a fixed complex envelope,
    /// sampled at baseband relative to the reference frequency.
    fn plane_wave(geometry: &ArrayGeometry, angle: f64, n_points: usize) -> Array2<Complex32> {
        let k = 2.0 * PI * geometry.carrier_frequency / geometry.sound_velocity;
        Array2::from_shape_fn((geometry.n_channels(), n_points), |(channel, _)| {
            let phase = k * geometry.offsets[channel] * angle.sin();
            let sample = Complex32::from_polar(1.0, phase as f32);
            if geometry.is_inverted(channel) {
                -sample
            } else {
                sample
            }
        })
    }

    #[test]
    fn beam_count_within_bounds_after_configure() {
        for n in [2, 8, 16, 32] {
            let mut beamformer = Beamformer::new();
            beamformer.configure(line_array(n, 0.0075)).unwrap();
            assert!(beamformer.n_beams() >= n && beamformer.n_beams() <= MAX_BEAMS);
            assert_eq!(beamformer.beam_angles().len(), beamformer.n_beams());
            assert_eq!(beamformer.transform_size(), Some(DEFAULT_STEERING_SIZE));
        }
    }

    #[test]
    fn doa_requires_configuration() {
        let mut beamformer = Beamformer::new();
        let data = Array2::<Complex32>::zeros((4, 64));
        assert_eq!(
            beamformer.compute_doa(data.view()).unwrap_err(),
            CoreError::NotConfigured
        );
        assert_eq!(beamformer.set_signals(None), Err(CoreError::NotConfigured));
        assert_eq!(beamformer.metrics().errors, 1);
    }

    #[test]
    fn failed_reconfigure_keeps_previous_state() {
        let mut beamformer = Beamformer::new();
        let geometry = line_array(16, 0.0075);
        beamformer.configure(geometry.clone()).unwrap();
        let n_beams = beamformer.n_beams();

        let mut broken = geometry.clone();
        broken.offsets.clear();
        broken.groups.clear();
        assert!(matches!(
            beamformer.configure(broken),
            Err(CoreError::InvalidConfiguration(_))
        ));

        assert!(beamformer.is_configured());
        assert_eq!(beamformer.geometry(), Some(&geometry));
        assert_eq!(beamformer.n_beams(), n_beams);

        let data = plane_wave(&geometry, 0.1, 128);
        let records = beamformer.compute_doa(data.view()).unwrap();
        assert_eq!(records.len(), 128);
    }

    #[test]
    fn steering_only_localises_plane_wave() {
        let geometry = line_array(16, 0.0075);
        let mut beamformer = Beamformer::new();
        beamformer.configure(geometry.clone()).unwrap();

        let target = 20f64.to_radians();
        let n_points = 512;
        let data = plane_wave(&geometry, target, n_points);
        let records = beamformer.compute_doa(data.view()).unwrap();

        let step = beamformer.distance_step().unwrap();
        for (i, record) in records.iter().enumerate().skip(192).take(128) {
            let error = (record.angle as f64 - target).abs();
            assert!(error < 0.1f64.to_radians(), "sample {}: {} rad", i, record.angle);
            assert!((record.amplitude - 16.0).abs() < 0.05 * 16.0);
            assert!((record.distance as f64 - i as f64 * step).abs() < 1e-3);
        }
        assert_eq!(beamformer.metrics().frames, 1);
    }

    #[test]
    fn polarity_flag_compensates_inverted_channel() {
        let mut geometry = line_array(16, 0.0075);
        geometry.inverted = vec![false; 16];
        geometry.inverted[1] = true;
        let mut beamformer = Beamformer::new();
        beamformer.configure(geometry.clone()).unwrap();

        let target = -15f64.to_radians();
        let data = plane_wave(&geometry, target, 512);
        let records = beamformer.compute_doa(data.view()).unwrap();
        for record in &records[192..320] {
            assert!((record.angle as f64 - target).abs() < 0.1f64.to_radians());
            assert!((record.amplitude - 16.0).abs() < 0.05 * 16.0);
        }
    }

    #[test]
    fn shared_channels_feed_both_sub_apertures() {
        let mut geometry = line_array(16, 0.0075);
        geometry.groups[7] = ChannelGroup::Both;
        geometry.groups[8] = ChannelGroup::Both;
        let mut beamformer = Beamformer::new();
        beamformer.configure(geometry.clone()).unwrap();

        let target = 5f64.to_radians();
        let data = plane_wave(&geometry, target, 512);
        let records = beamformer.compute_doa(data.view()).unwrap();
        for record in &records[192..320] {
            assert!((record.angle as f64 - target).abs() < 0.1f64.to_radians());
        }
    }

    #[test]
    fn rejects_mismatched_frames() {
        let geometry = line_array(8, 0.0075);
        let mut beamformer = Beamformer::new();
        beamformer.configure(geometry).unwrap();

        let data = Array2::<Complex32>::zeros((7, 64));
        assert_eq!(
            beamformer.compute_doa(data.view()).unwrap_err(),
            CoreError::LengthMismatch {
                expected: 8,
                actual: 7
            }
        );

        let data = Array2::<Complex32>::zeros((8, 64));
        let mut output = vec![DoaRecord::default(); 32];
        assert_eq!(
            beamformer.get_doa(data.view(), &mut output),
            Err(CoreError::LengthMismatch {
                expected: 64,
                actual: 32
            })
        );
        assert_eq!(beamformer.metrics().errors, 2);
    }

    #[test]
    fn replicas_set_matched_filter_size() {
        let geometry = line_array(4, 0.0075);
        let mut beamformer = Beamformer::new();
        beamformer.configure(geometry).unwrap();

        let replicas = Array2::from_elem((4, 80), Complex32::new(1.0, 0.0));
        beamformer.set_signals(Some(replicas.view())).unwrap();
        assert_eq!(beamformer.replica_points(), Some(80));
        assert_eq!(beamformer.transform_size(), Some(160));

        let wrong = Array2::from_elem((3, 80), Complex32::new(1.0, 0.0));
        assert!(beamformer.set_signals(Some(wrong.view())).is_err());
        assert_eq!(beamformer.transform_size(), Some(160));

        beamformer.set_signals(None).unwrap();
        assert_eq!(beamformer.replica_points(), None);
        assert_eq!(beamformer.transform_size(), Some(DEFAULT_STEERING_SIZE));
    }

    #[test]
    fn matched_replica_peaks_at_echo_offset() {
        let geometry = line_array(4, 0.0075);
        let mut beamformer = Beamformer::new();
        beamformer.configure(geometry.clone()).unwrap();

        let duration = 40;
        let replica: Vec<Complex32> = (0..duration)
            .map(|i| Complex32::from_polar(1.0, 0.02 * (i * i) as f32))
            .collect();
        let replicas = Array2::from_shape_fn((4, duration), |(_, i)| replica[i]);
        beamformer.set_signals(Some(replicas.view())).unwrap();

        let offset = 100;
        let data = Array2::from_shape_fn((4, 256), |(_, i)| {
            if i >= offset && i < offset + duration {
                replica[i - offset]
            } else {
                Complex32::zero()
            }
        });
        let records = beamformer.compute_doa(data.view()).unwrap();
        let peak = records
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.amplitude.total_cmp(&b.1.amplitude))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, offset);
        assert!((records[offset].amplitude - 4.0).abs() < 0.1);
        assert!(records[offset].angle.abs() < 1f32.to_radians());
    }
}
