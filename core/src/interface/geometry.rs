use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::prelude::{CoreError, CoreResult};

pub const MAX_CHANNELS: usize = 128;
/// Largest accepted channel offset from the array origin, meters.
pub const MAX_OFFSET: f64 = 1.0;

/// Sub-aperture membership of a channel.
///
/// Serialized as the integer tags 1, 2 and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ChannelGroup {
    First,
    Second,
    Both,
}

impl ChannelGroup {
    pub fn in_first(self) -> bool {
        matches!(self, ChannelGroup::First | ChannelGroup::Both)
    }

    pub fn in_second(self) -> bool {
        matches!(self, ChannelGroup::Second | ChannelGroup::Both)
    }
}

impl TryFrom<u8> for ChannelGroup {
    type Error = CoreError;

    fn try_from(tag: u8) -> CoreResult<Self> {
        match tag {
            1 => Ok(ChannelGroup::First),
            2 => Ok(ChannelGroup::Second),
            3 => Ok(ChannelGroup::Both),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown channel group tag {}",
                other
            ))),
        }
    }
}

impl From<ChannelGroup> for u8 {
    fn from(group: ChannelGroup) -> Self {
        match group {
            ChannelGroup::First => 1,
            ChannelGroup::Second => 2,
            ChannelGroup::Both => 3,
        }
    }
}

/// Physical description of a linear receive array.
///
/// Frequencies in hertz, offsets in meters along the baseline, field of view
/// in radians, sound velocity in meters per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayGeometry {
    pub sample_rate: f64,
    pub carrier_frequency: f64,
    /// Heterodyne frequency the complex samples are demodulated with.
    pub reference_frequency: f64,
    pub sound_velocity: f64,
    pub field_of_view: f64,
    pub offsets: Vec<f64>,
    pub groups: Vec<ChannelGroup>,
    /// Per-channel polarity calibration; empty means no channel is inverted.
    #[serde(default)]
    pub inverted: Vec<bool>,
}

impl ArrayGeometry {
    pub fn n_channels(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_inverted(&self, channel: usize) -> bool {
        self.inverted.get(channel).copied().unwrap_or(false)
    }

    pub fn wavelength(&self) -> f64 {
        self.sound_velocity / self.carrier_frequency
    }

    /// Checks every geometry invariant without touching any engine state.
    pub fn validate(&self) -> CoreResult<()> {
        let n_channels = self.n_channels();
        if n_channels == 0 || n_channels > MAX_CHANNELS {
            return Err(invalid(format!(
                "channel count {} outside 1..={}",
                n_channels, MAX_CHANNELS
            )));
        }
        if self.groups.len() != n_channels {
            return Err(invalid(format!(
                "{} group tags for {} channels",
                self.groups.len(),
                n_channels
            )));
        }
        if !self.inverted.is_empty() && self.inverted.len() != n_channels {
            return Err(invalid(format!(
                "{} polarity flags for {} channels",
                self.inverted.len(),
                n_channels
            )));
        }
        if let Some((channel, offset)) = self
            .offsets
            .iter()
            .enumerate()
            .find(|(_, offset)| !offset.is_finite() || offset.abs() > MAX_OFFSET)
        {
            return Err(invalid(format!(
                "channel {} offset {} outside ±{} m",
                channel, offset, MAX_OFFSET
            )));
        }
        if !self.groups.iter().any(|group| group.in_first()) {
            return Err(invalid("no channel in the first sub-aperture".into()));
        }
        if !self.groups.iter().any(|group| group.in_second()) {
            return Err(invalid("no channel in the second sub-aperture".into()));
        }

        for (name, value) in [
            ("sample rate", self.sample_rate),
            ("carrier frequency", self.carrier_frequency),
            ("sound velocity", self.sound_velocity),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(format!("{} must be positive, got {}", name, value)));
            }
        }
        if !self.reference_frequency.is_finite() {
            return Err(invalid("reference frequency must be finite".into()));
        }
        if !(self.field_of_view > 0.0 && self.field_of_view < PI) {
            return Err(invalid(format!(
                "field of view {} outside (0, π)",
                self.field_of_view
            )));
        }

        Ok(())
    }
}

fn invalid(message: String) -> CoreError {
    CoreError::InvalidConfiguration(message)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Uniform line array with `n` channels at `spacing` meters, centred on
    /// the origin; the lower half forms the first sub-aperture.
    pub(crate) fn line_array(n: usize, spacing: f64) -> ArrayGeometry {
        let centre = (n as f64 - 1.0) / 2.0;
        ArrayGeometry {
            sample_rate: 80_000.0,
            carrier_frequency: 100_000.0,
            reference_frequency: 100_000.0,
            sound_velocity: 1_500.0,
            field_of_view: 90f64.to_radians(),
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
            inverted: Vec::new(),
        }
    }

    #[test]
    fn line_array_is_valid() {
        let geometry = line_array(16, 0.0075);
        assert!(geometry.validate().is_ok());
        assert_eq!(geometry.n_channels(), 16);
        assert!(!geometry.is_inverted(3));
        assert!((geometry.wavelength() - 0.015).abs() < 1e-12);
    }

    #[test]
    fn rejects_invalid_geometries() {
        let base = line_array(8, 0.0075);

        let mut empty = base.clone();
        empty.offsets.clear();
        empty.groups.clear();
        assert!(matches!(
            empty.validate(),
            Err(CoreError::InvalidConfiguration(_))
        ));

        let mut far = base.clone();
        far.offsets[0] = -1.5;
        assert!(far.validate().is_err());

        let mut one_sided = base.clone();
        one_sided.groups.fill(ChannelGroup::First);
        assert!(one_sided.validate().is_err());

        let mut shared = one_sided.clone();
        shared.groups[7] = ChannelGroup::Both;
        assert!(shared.validate().is_ok());

        let mut silent = base.clone();
        silent.sound_velocity = 0.0;
        assert!(silent.validate().is_err());

        let mut wide = base.clone();
        wide.field_of_view = PI;
        assert!(wide.validate().is_err());

        let mut flags = base;
        flags.inverted = vec![true; 3];
        assert!(flags.validate().is_err());
    }

    #[test]
    fn deserializes_numeric_group_tags() {
        let json = r#"{
            "sample_rate": 80000.0,
            "carrier_frequency": 100000.0,
            "reference_frequency": 100000.0,
            "sound_velocity": 1500.0,
            "field_of_view": 1.0,
            "offsets": [-0.01, 0.0, 0.01],
            "groups": [1, 3, 2]
        }"#;
        let geometry: ArrayGeometry = serde_json::from_str(json).unwrap();
        assert_eq!(
            geometry.groups,
            vec![ChannelGroup::First, ChannelGroup::Both, ChannelGroup::Second]
        );
        assert!(geometry.inverted.is_empty());
        assert!(geometry.validate().is_ok());

        let bad = json.replace("[1, 3, 2]", "[1, 4, 2]");
        assert!(serde_json::from_str::<ArrayGeometry>(&bad).is_err());
    }
}
