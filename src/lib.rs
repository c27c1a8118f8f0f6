//! FlexMirror turns the readings of flex sensors worn on the body into an
//! animated figure, either a single finger or a spine, and lets other
//! machines watch the same figure live.
//!
//! A device streams readings over a serial port. Each reading is smoothed
//! ([smoother]), mapped to a joint angle against a calibration offset
//! ([angle_mapper]), and becomes the target the rendered pose eases toward on
//! every tick of the animation clock ([interpolator]). The eased pose is
//! walked through a fixed joint table ([kinematics]) to get the points that
//! are drawn ([gui]). Every new target is also pushed to connected mirrors
//! ([relay]), which show the same figure without a sensor of their own.
//!
//! All of that state lives in one [session::Session], which is driven by
//! [session::Event]s from a single loop.

pub mod angle_mapper;
pub mod args;
pub mod config;
pub mod dummy_source;
pub mod frame_decoder;
pub mod gui;
pub mod interpolator;
pub mod kinematics;
pub mod relay;
pub mod serial_source;
pub mod session;
pub mod smoother;
pub mod telemetry;

use std::fmt::Display;

/// A position in the plane of the figure.
#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn abs_dist(&self, other: &Self) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_and_display() {
        let a = Point { x: 0.0, y: 0.0 };
        let b = Point { x: 3.0, y: 4.0 };
        assert_eq!(a.abs_dist(&b), 5.0);
        assert_eq!(b.to_string(), "(3.000, 4.000)");
    }
}
