//! Eases the rendered pose toward the latest target, one animation tick at a
//! time.

use crate::telemetry::Degree;

/// One angle per joint or channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pose {
    pub angles: Vec<Degree>,
}

impl Pose {
    pub fn new(angles: Vec<Degree>) -> Self {
        Self { angles }
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            angles: vec![0.0; len],
        }
    }

    /// The first angle, which is the whole pose for a single-sensor rig.
    pub fn primary(&self) -> Degree {
        self.angles.first().copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    /// Sets `index`, growing the pose with zeros if needed.
    pub fn set(&mut self, index: usize, angle: Degree) {
        if index >= self.angles.len() {
            self.angles.resize(index + 1, 0.0);
        }
        self.angles[index] = angle;
    }
}

/// Exponential smoothing of `current` toward `target`. Every tick covers the
/// fraction `alpha` of the remaining distance, whatever time has passed since
/// the previous one.
#[derive(Debug, Clone)]
pub struct PoseInterpolator {
    alpha: f64,
    snap_epsilon: Option<Degree>,
    current: Pose,
    target: Pose,
}

impl PoseInterpolator {
    pub fn new(alpha: f64, joints: usize) -> Self {
        Self {
            alpha,
            snap_epsilon: None,
            current: Pose::zeros(joints),
            target: Pose::zeros(joints),
        }
    }

    pub fn with_snap(mut self, snap_epsilon: Option<Degree>) -> Self {
        self.snap_epsilon = snap_epsilon;
        self
    }

    pub fn current(&self) -> &Pose {
        &self.current
    }

    pub fn target(&self) -> &Pose {
        &self.target
    }

    pub fn set_target(&mut self, target: Pose) {
        self.target = target;
    }

    pub fn set_target_angle(&mut self, index: usize, angle: Degree) {
        self.target.set(index, angle);
    }

    /// Advances `current` one step and returns it.
    pub fn tick(&mut self) -> &Pose {
        if self.current.len() != self.target.len() {
            self.current.angles.resize(self.target.len(), 0.0);
        }

        let alpha = self.alpha;
        let snap = self.snap_epsilon;
        for (cur, &tgt) in self.current.angles.iter_mut().zip(&self.target.angles) {
            *cur += (tgt - *cur) * alpha;
            if let Some(eps) = snap {
                if (tgt - *cur).abs() <= eps {
                    *cur = tgt;
                }
            }
        }

        &self.current
    }
}
