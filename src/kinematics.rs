//! Planar forward kinematics for the two supported figures.
//!
//! All joints rotate in the same plane, so a chain is walked by adding
//! rotations together and stepping along the resulting heading, rather than
//! by multiplying transforms.

use crate::config::{JointSpec, RigKind, SpineSpec};
use crate::interpolator::Pose;
use crate::telemetry::{Degree, Radian};
use crate::Point;

/// Full flexion of a finger, in degrees.
pub const FULL_FLEXION: Degree = 180.0;

/// The spine grows straight up from its root when unbent.
const SPINE_BASE_HEADING: Degree = 90.0;

/// Which colour the render surface should use for the current pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Nominal,
    Warning,
    Danger,
}

/// A point of the chain. `rotation` is the accumulated heading of the segment
/// that ends here, `local` is the bend this joint itself contributed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Joint {
    pub position: Point,
    pub rotation: Radian,
    pub local: Radian,
}

/// Root first, then one entry per segment end.
pub type JointChain = Vec<Joint>;

fn root() -> Joint {
    Joint {
        position: Point { x: 0.0, y: 0.0 },
        rotation: 0.0,
        local: 0.0,
    }
}

fn step(from: Point, heading: Radian, length: f64) -> Point {
    Point {
        x: from.x + heading.cos() * length,
        y: from.y + heading.sin() * length,
    }
}

/// `angle / 180` clamped to `[0, 1]`. Anything that is not a number reads as
/// no flexion, so a power law applied to the result is always defined.
pub fn normalized_flexion(angle: Degree) -> f64 {
    if angle.is_nan() {
        return 0.0;
    }
    (angle / FULL_FLEXION).clamp(0.0, 1.0)
}

/// Curls a finger: each joint bends `max_angle * norm^exponent`, so distal
/// joints with larger exponents lag at small flexion and catch up near full
/// flexion.
pub fn finger_chain(angle: Degree, joints: &[JointSpec]) -> JointChain {
    let norm = normalized_flexion(angle);

    let mut chain = Vec::with_capacity(joints.len() + 1);
    chain.push(root());

    let mut heading = 0.0;
    let mut position = chain[0].position;
    for spec in joints {
        let local = (spec.max_angle * norm.powf(spec.exponent)).to_radians();
        heading += local;
        position = step(position, heading, spec.length);
        chain.push(Joint {
            position,
            rotation: heading,
            local,
        });
    }
    chain
}

/// Stacks spine segments: each channel's bend, damped, is added to the
/// running heading before stepping one segment length.
pub fn spine_chain(bends: &[Degree], spec: &SpineSpec) -> JointChain {
    let mut chain = Vec::with_capacity(bends.len() + 1);
    let base = SPINE_BASE_HEADING.to_radians();
    chain.push(Joint {
        rotation: base,
        ..root()
    });

    let mut heading = base;
    let mut position = chain[0].position;
    for &bend in bends.iter().take(spec.channels) {
        let bend = if bend.is_finite() { bend } else { 0.0 };
        let local = (bend * spec.damping).to_radians();
        heading += local;
        position = step(position, heading, spec.segment_length);
        chain.push(Joint {
            position,
            rotation: heading,
            local,
        });
    }
    chain
}

/// Builds the joint chain for whichever rig is configured.
#[derive(Debug, Clone)]
pub struct KinematicModel {
    rig: RigKind,
}

impl KinematicModel {
    pub fn new(rig: RigKind) -> Self {
        Self { rig }
    }

    pub fn chain(&self, pose: &Pose) -> JointChain {
        match &self.rig {
            RigKind::Finger(spec) => finger_chain(pose.primary(), &spec.joints),
            RigKind::Spine(spec) => spine_chain(&pose.angles, spec),
        }
    }

    /// The single angle the colour thresholds are checked against: the
    /// flexion of a finger, or the largest bend magnitude along a spine.
    pub fn headline_angle(&self, pose: &Pose) -> Degree {
        match &self.rig {
            RigKind::Finger(_) => pose.primary(),
            RigKind::Spine(_) => pose.angles.iter().fold(0.0, |m: f64, a| m.max(a.abs())),
        }
    }
}
