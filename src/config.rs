//! Rig configuration: which figure is being driven, its joint table, and the
//! tuning constants of the pipeline.
//!
//! Configurations are stored as [ron]. A finger rig looks like this:
//!
//! ```text
//! (
//!     rig: Finger((
//!         sensitivity: 0.3,
//!         max_angle: 180.0,
//!         joints: [
//!             (max_angle: 80.0, exponent: 1.0, length: 80.0),
//!             (max_angle: 100.0, exponent: 1.2, length: 70.0),
//!             (max_angle: 100.0, exponent: 1.5, length: 60.0),
//!         ],
//!     )),
//!     alpha: 0.1,
//!     thresholds: (warning: 30.0, danger: 45.0),
//!     snap_epsilon: None,
//! )
//! ```

use crate::angle_mapper::MappingPolicy;
use crate::kinematics::Severity;
use crate::telemetry::Degree;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt,
    fs::File,
    io::{Read, Write},
    path::Path,
};

/// One link of a finger: how far its joint can bend, how sharply it curls as
/// flexion grows, and how long the segment after it is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointSpec {
    pub max_angle: Degree,
    pub exponent: f64,
    pub length: f64,
}

/// A single-sensor finger with a chain of joints driven by one flexion value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerSpec {
    /// Degrees of flexion per unit of raw deviation from the offset.
    pub sensitivity: f64,
    /// Upper bound of the mapped flexion angle.
    pub max_angle: Degree,
    pub joints: Vec<JointSpec>,
}

/// A multi-sensor spine, one channel per segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpineSpec {
    pub channels: usize,
    /// Raw value of a straight, uncalibrated segment.
    pub center: f64,
    /// Largest bend a single segment can take, either way.
    pub max_bend: Degree,
    /// Multiplier applied to each segment's bend as it is added to the
    /// running heading.
    pub damping: f64,
    pub segment_length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RigKind {
    Finger(FingerSpec),
    Spine(SpineSpec),
}

/// Angle boundaries between the nominal, warning and danger colours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorThresholds {
    pub warning: Degree,
    pub danger: Degree,
}

impl ColorThresholds {
    pub fn classify(&self, angle: Degree) -> Severity {
        if angle < self.warning {
            Severity::Nominal
        } else if angle < self.danger {
            Severity::Warning
        } else {
            Severity::Danger
        }
    }
}

impl Default for ColorThresholds {
    fn default() -> Self {
        Self {
            warning: 30.0,
            danger: 45.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    pub rig: RigKind,
    /// Fraction of the remaining distance to the target covered per tick.
    pub alpha: f64,
    pub thresholds: ColorThresholds,
    /// When set, the interpolator snaps to the target once within this many
    /// degrees of it.
    #[serde(default)]
    pub snap_epsilon: Option<Degree>,
}

/// Rejects zero, negative and non-finite values.
fn positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} must be positive, got {}", name, value)))
    }
}

impl RigConfig {
    /// Three-joint finger, flexion bounded at 180 degrees.
    pub fn finger() -> Self {
        Self {
            rig: RigKind::Finger(FingerSpec {
                sensitivity: 0.3,
                max_angle: 180.0,
                joints: vec![
                    JointSpec {
                        max_angle: 80.0,
                        exponent: 1.0,
                        length: 80.0,
                    },
                    JointSpec {
                        max_angle: 100.0,
                        exponent: 1.2,
                        length: 70.0,
                    },
                    JointSpec {
                        max_angle: 100.0,
                        exponent: 1.5,
                        length: 60.0,
                    },
                ],
            }),
            alpha: 0.1,
            thresholds: ColorThresholds::default(),
            snap_epsilon: None,
        }
    }

    /// The finger tuning with a 90 degree bound and wider warning band.
    pub fn finger_90() -> Self {
        let mut config = Self::finger();
        if let RigKind::Finger(spec) = &mut config.rig {
            spec.max_angle = 90.0;
        }
        config.thresholds = ColorThresholds {
            warning: 30.0,
            danger: 60.0,
        };
        config
    }

    /// Five-channel spine centred on a raw value of 128.
    pub fn spine() -> Self {
        Self {
            rig: RigKind::Spine(SpineSpec {
                channels: 5,
                center: 128.0,
                max_bend: 60.0,
                damping: 0.8,
                segment_length: 50.0,
            }),
            alpha: 0.1,
            thresholds: ColorThresholds::default(),
            snap_epsilon: None,
        }
    }

    /// Number of sensor channels the rig consumes.
    pub fn channels(&self) -> usize {
        match &self.rig {
            RigKind::Finger(_) => 1,
            RigKind::Spine(spec) => spec.channels,
        }
    }

    pub fn mapping_policy(&self) -> MappingPolicy {
        match &self.rig {
            RigKind::Finger(spec) => MappingPolicy::LinearAbsolute {
                sensitivity: spec.sensitivity,
                max_angle: spec.max_angle,
            },
            RigKind::Spine(spec) => MappingPolicy::PerChannelDeviation {
                center: spec.center,
                max_bend: spec.max_bend,
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        use ConfigError::Invalid;

        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(Invalid(format!("alpha {} is outside (0, 1]", self.alpha)));
        }
        if !(self.thresholds.warning <= self.thresholds.danger) {
            return Err(Invalid("warning threshold is above danger".to_owned()));
        }
        if let Some(eps) = self.snap_epsilon {
            if !(eps >= 0.0 && eps.is_finite()) {
                return Err(Invalid(format!("snap epsilon {} is not usable", eps)));
            }
        }
        match &self.rig {
            RigKind::Finger(spec) => {
                positive("finger sensitivity", spec.sensitivity)?;
                positive("finger max angle", spec.max_angle)?;
                for joint in &spec.joints {
                    positive("joint max angle", joint.max_angle)?;
                    positive("joint exponent", joint.exponent)?;
                    positive("joint length", joint.length)?;
                }
            }
            RigKind::Spine(spec) => {
                if spec.channels == 0 {
                    return Err(Invalid("spine needs at least one channel".to_owned()));
                }
                positive("spine center", spec.center)?;
                positive("spine max bend", spec.max_bend)?;
                if !(spec.damping > 0.0 && spec.damping <= 1.0) {
                    return Err(Invalid(format!(
                        "damping {} is outside (0, 1]",
                        spec.damping
                    )));
                }
                positive("segment length", spec.segment_length)?;
            }
        }
        Ok(())
    }

    /// Reads and validates a RON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut text = String::new();
        File::open(path)?.read_to_string(&mut text)?;
        let config: RigConfig = ron::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        File::create(path)?.write_all(text.as_bytes())?;
        Ok(())
    }
}

impl Default for RigConfig {
    fn default() -> Self {
        Self::finger()
    }
}

/// Errors from reading, writing or validating a [RigConfig].
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read or written.
    IoError(std::io::Error),

    /// Serialization failed.
    RonError(ron::Error),

    /// The file is not valid RON for a [RigConfig].
    RonSpannedError(ron::de::SpannedError),

    /// The values parsed but make no sense together.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConfigError as CE;
        let msg = match self {
            CE::IoError(error) => Cow::from(format!("io error: {}", error)),
            CE::RonError(error) => Cow::from(format!("ron error: {}", error)),
            CE::RonSpannedError(error) => Cow::from(format!("ron parse error: {}", error)),
            CE::Invalid(reason) => Cow::from(format!("invalid config: {}", reason)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

impl From<ron::Error> for ConfigError {
    fn from(value: ron::Error) -> Self {
        Self::RonError(value)
    }
}

impl From<ron::de::SpannedError> for ConfigError {
    fn from(value: ron::de::SpannedError) -> Self {
        Self::RonSpannedError(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn presets_are_valid() {
        for config in [RigConfig::finger(), RigConfig::finger_90(), RigConfig::spine()] {
            assert!(config.validate().is_ok(), "{:?}", config);
        }
    }

    #[test]
    fn thresholds_classify() {
        let t = RigConfig::finger().thresholds;
        assert_eq!(t.classify(0.0), Severity::Nominal);
        assert_eq!(t.classify(29.9), Severity::Nominal);
        assert_eq!(t.classify(30.0), Severity::Warning);
        assert_eq!(t.classify(50.0), Severity::Danger);

        let t = RigConfig::finger_90().thresholds;
        assert_eq!(t.classify(50.0), Severity::Warning);
        assert_eq!(t.classify(60.0), Severity::Danger);
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spine.ron");

        let config = RigConfig::spine();
        config.save(&path).unwrap();
        assert_eq!(RigConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn load_handwritten_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("finger.ron");
        std::fs::write(
            &path,
            "(rig: Finger((sensitivity: 0.5, max_angle: 90.0, joints: [\
             (max_angle: 45.0, exponent: 1.0, length: 10.0)])), \
             alpha: 0.2, thresholds: (warning: 20.0, danger: 40.0))",
        )
        .unwrap();

        let config = RigConfig::load(&path).unwrap();
        assert_eq!(config.alpha, 0.2);
        assert_eq!(config.snap_epsilon, None);
        assert_eq!(config.channels(), 1);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = RigConfig::finger();
        config.alpha = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = RigConfig::finger();
        config.alpha = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let finger_edits: [fn(&mut FingerSpec); 5] = [
            |s| s.sensitivity = f64::INFINITY,
            |s| s.max_angle = f64::NAN,
            |s| s.joints[0].max_angle = -10.0,
            |s| s.joints[1].exponent = f64::NAN,
            |s| s.joints[2].length = 0.0,
        ];
        for edit in finger_edits {
            let mut config = RigConfig::finger();
            if let RigKind::Finger(spec) = &mut config.rig {
                edit(spec);
            }
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }

        let spine_edits: [fn(&mut SpineSpec); 6] = [
            |s| s.damping = 1.5,
            |s| s.damping = f64::NAN,
            |s| s.center = 0.0,
            |s| s.max_bend = -60.0,
            |s| s.max_bend = f64::NAN,
            |s| s.segment_length = f64::INFINITY,
        ];
        for edit in spine_edits {
            let mut config = RigConfig::spine();
            if let RigKind::Spine(spec) = &mut config.rig {
                edit(spec);
            }
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let res = RigConfig::load(dir.path().join("nope.ron"));
        assert!(matches!(res, Err(ConfigError::IoError(_))));
    }
}
