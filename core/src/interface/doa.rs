use serde::{Deserialize, Serialize};

/// Direction-of-arrival estimate for one range sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DoaRecord {
    /// Radians from broadside, positive towards increasing channel offset.
    pub angle: f32,
    /// Meters.
    pub distance: f32,
    pub amplitude: f32,
}

impl DoaRecord {
    pub fn new(angle: f32, distance: f32, amplitude: f32) -> Self {
        Self {
            angle,
            distance,
            amplitude,
        }
    }
}
