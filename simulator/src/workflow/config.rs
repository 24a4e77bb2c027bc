use std::fs;
use std::path::Path;

use anyhow::Context;
use doacore::{ArrayGeometry, ChannelGroup};
use serde::{Deserialize, Serialize};

use crate::generator::scene::Target;
use crate::generator::waveform::Waveform;

/// Linear-array scenario: array, transmit pulse, reflectors and detection
/// settings. Missing YAML keys fall back to [`ScenarioConfig::default`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub sample_rate: f64,
    pub carrier_frequency: f64,
    /// Defaults to the carrier frequency.
    pub reference_frequency: Option<f64>,
    pub sound_velocity: f64,
    pub field_of_view_deg: f64,
    pub channels: usize,
    /// Element spacing in meters; half a carrier wavelength when omitted.
    pub spacing: Option<f64>,
    /// Channels whose polarity is reversed by the receiver wiring.
    pub inverted_channels: Vec<usize>,
    pub waveform: Waveform,
    pub targets: Vec<Target>,
    pub n_points: usize,
    pub noise: f64,
    pub seed: u64,
    /// Detection threshold relative to the strongest return.
    pub threshold: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 80_000.0,
            carrier_frequency: 100_000.0,
            reference_frequency: None,
            sound_velocity: 1_500.0,
            field_of_view_deg: 90.0,
            channels: 32,
            spacing: None,
            inverted_channels: Vec::new(),
            waveform: Waveform::default(),
            targets: vec![
                Target::new(-30.0, 2.0),
                Target::new(0.0, 4.0),
                Target::new(25.0, 6.5),
            ],
            n_points: 1024,
            noise: 0.05,
            seed: 0,
            threshold: 0.5,
        }
    }
}

impl ScenarioConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading scenario config {}", path_ref.display()))?;
        let config: ScenarioConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing scenario config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(channels: usize, n_points: usize, targets: Vec<Target>) -> Self {
        Self {
            channels,
            n_points,
            targets,
            ..Default::default()
        }
    }

    pub fn wavelength(&self) -> f64 {
        self.sound_velocity / self.carrier_frequency
    }

    pub fn element_spacing(&self) -> f64 {
        self.spacing.unwrap_or_else(|| self.wavelength() / 2.0)
    }

    /// Uniform line array centred on the origin. The lower half of the
    /// channels forms the first sub-aperture, the upper half the second.
    pub fn geometry(&self) -> ArrayGeometry {
        let n = self.channels;
        let spacing = self.element_spacing();
        let centre = (n as f64 - 1.0) / 2.0;

        let inverted = if self.inverted_channels.is_empty() {
            Vec::new()
        } else {
            (0..n)
                .map(|channel| self.inverted_channels.contains(&channel))
                .collect()
        };

        ArrayGeometry {
            sample_rate: self.sample_rate,
            carrier_frequency: self.carrier_frequency,
            reference_frequency: self.reference_frequency.unwrap_or(self.carrier_frequency),
            sound_velocity: self.sound_velocity,
            field_of_view: self.field_of_view_deg.to_radians(),
            offsets: (0..n).map(|i| (i as f64 - centre) * spacing).collect(),
            groups: (0..n)
                .map(|i| {
                    if i < n / 2 {
                        ChannelGroup::First
                    } else {
                        ChannelGroup::Second
                    }
                })
                .collect(),
            inverted,
        }
    }
}
