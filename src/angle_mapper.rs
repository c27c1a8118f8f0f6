//! Maps smoothed readings onto target joint angles.

use crate::smoother::Smoothed;
use crate::telemetry::{Channel, Degree};
use std::collections::HashMap;

/// How a smoothed reading becomes an angle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MappingPolicy {
    /// `|value - offset| * sensitivity`, clamped to `[0, max_angle]`.
    LinearAbsolute { sensitivity: f64, max_angle: Degree },

    /// Signed deviation from the channel's baseline, scaled so that a
    /// deviation of `center` reaches `max_bend`, clamped to
    /// `[-max_bend, max_bend]`. The baseline is the calibration offset once
    /// the channel has been calibrated and `center` before that.
    PerChannelDeviation { center: f64, max_bend: Degree },
}

impl MappingPolicy {
    /// `offset` is `None` for a channel that was never calibrated.
    pub fn map(&self, value: i32, offset: Option<f64>) -> Degree {
        let value = value as f64;
        match *self {
            MappingPolicy::LinearAbsolute {
                sensitivity,
                max_angle,
            } => {
                let diff = value - offset.unwrap_or(0.0);
                (diff * sensitivity).abs().clamp(0.0, max_angle)
            }
            MappingPolicy::PerChannelDeviation { center, max_bend } => {
                let baseline = offset.unwrap_or(center);
                let deviation = value - baseline;
                (deviation / center * max_bend).clamp(-max_bend, max_bend)
            }
        }
    }
}

/// Per-channel calibration offsets. Offsets are only ever replaced
/// wholesale, and only affect readings mapped after the change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    offsets: HashMap<Channel, f64>,
}

impl Calibration {
    pub fn new() -> Self {
        Self::default()
    }

    /// The offset for `channel`, or 0 if it has never been set.
    pub fn offset(&self, channel: Channel) -> f64 {
        self.offsets.get(&channel).copied().unwrap_or(0.0)
    }

    pub fn get(&self, channel: Channel) -> Option<f64> {
        self.offsets.get(&channel).copied()
    }

    pub fn set(&mut self, channel: Channel, offset: f64) {
        self.offsets.insert(channel, offset);
    }
}

/// A [`MappingPolicy`] together with the calibration it is applied against.
#[derive(Debug, Clone)]
pub struct AngleMapper {
    policy: MappingPolicy,
    calibration: Calibration,
}

impl AngleMapper {
    pub fn new(policy: MappingPolicy) -> Self {
        Self {
            policy,
            calibration: Calibration::new(),
        }
    }

    pub fn policy(&self) -> MappingPolicy {
        self.policy
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn map(&self, smoothed: Smoothed) -> Degree {
        self.policy
            .map(smoothed.value, self.calibration.get(smoothed.channel))
    }

    /// Zeroes `channel` at its latest smoothed reading.
    pub fn calibrate(&mut self, channel: Channel, last_smoothed: i32) {
        self.calibration.set(channel, last_smoothed as f64);
    }

    /// Installs an offset that was decided elsewhere (a relayed update).
    pub fn set_offset(&mut self, channel: Channel, offset: f64) {
        self.calibration.set(channel, offset);
    }
}
