use anyhow::{ensure, Context};
use doacore::{Beamformer, DoaRecord};
use log::info;
use ndarray::{Array2, ArrayView2};
use num_complex::Complex32;

use crate::generator::scene::SceneGenerator;
use crate::workflow::config::ScenarioConfig;

/// Peak of one above-threshold run of DOA records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub sample: usize,
    pub angle_deg: f64,
    pub range: f64,
    /// Amplitude relative to the strongest record of the frame.
    pub amplitude: f64,
}

pub struct ScenarioResult {
    pub records: Vec<DoaRecord>,
    pub detections: Vec<Detection>,
    pub distance_step: f64,
}

/// Drives a scenario through the beamformer.
pub struct Runner {
    config: ScenarioConfig,
    beamformer: Beamformer,
}

impl Runner {
    /// Configures the beamformer for the scenario's array and sets the
    /// transmit replica on every channel.
    pub fn new(config: ScenarioConfig) -> anyhow::Result<Self> {
        let mut beamformer = Beamformer::new();
        beamformer
            .configure(config.geometry())
            .context("configuring beamformer")?;

        let replica = config
            .waveform
            .samples(config.sample_rate)
            .context("building transmit replica")?;
        let images = Array2::from_shape_fn((config.channels, replica.len()), |(_, i)| replica[i]);
        beamformer
            .set_signals(Some(images.view()))
            .context("setting matched-filter replicas")?;

        Ok(Self { config, beamformer })
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn beamformer(&self) -> &Beamformer {
        &self.beamformer
    }

    /// Synthesizes the scenario's echoes and processes them.
    pub fn execute(&mut self) -> anyhow::Result<ScenarioResult> {
        let replica = self
            .config
            .waveform
            .samples(self.config.sample_rate)
            .context("building transmit replica")?;
        let mut generator = SceneGenerator::new(self.config.seed, self.config.noise);
        let data = generator
            .synthesize(
                &self.config.geometry(),
                &replica,
                &self.config.targets,
                self.config.n_points,
            )
            .context("synthesizing scene")?;

        self.process(data.view())
    }

    /// Computes DOA records for externally supplied channel data.
    pub fn process(&mut self, data: ArrayView2<Complex32>) -> anyhow::Result<ScenarioResult> {
        let records = self
            .beamformer
            .compute_doa(data)
            .context("computing DOA")?;
        let detections = extract_detections(&records, self.config.threshold)?;
        let distance_step = self.beamformer.distance_step().unwrap_or_default();

        info!(
            "processed {} samples, {} detections",
            records.len(),
            detections.len()
        );

        Ok(ScenarioResult {
            records,
            detections,
            distance_step,
        })
    }
}

/// One detection per run of records whose amplitude, relative to the
/// strongest record, reaches `threshold`. Each detection takes the record
/// at the run's peak.
pub fn extract_detections(records: &[DoaRecord], threshold: f64) -> anyhow::Result<Vec<Detection>> {
    ensure!(
        threshold > 0.0 && threshold <= 1.0,
        "detection threshold {} outside (0, 1]",
        threshold
    );

    let peak = records
        .iter()
        .map(|record| record.amplitude)
        .fold(0.0f32, f32::max);
    if peak <= 0.0 {
        return Ok(Vec::new());
    }

    let mut detections = Vec::new();
    let mut best: Option<usize> = None;
    for (sample, record) in records.iter().enumerate() {
        let relative = f64::from(record.amplitude / peak);
        if relative >= threshold {
            best = match best {
                Some(index) if records[index].amplitude >= record.amplitude => Some(index),
                _ => Some(sample),
            };
        } else if let Some(index) = best.take() {
            detections.push(detection(records, index, peak));
        }
    }
    if let Some(index) = best {
        detections.push(detection(records, index, peak));
    }

    Ok(detections)
}

fn detection(records: &[DoaRecord], index: usize, peak: f32) -> Detection {
    let record = records[index];
    Detection {
        sample: index,
        angle_deg: f64::from(record.angle).to_degrees(),
        range: f64::from(record.distance),
        amplitude: f64::from(record.amplitude / peak),
    }
}
