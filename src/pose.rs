//! Pose and pivot value types shared across the driver
//!
//! A hexapod pose is six ordered scalars: X/Y/Z linear offsets in millimeters
//! and U/V/W rotational offsets in degrees, relative to the stage's configured
//! reference frame. The axis ordering is fixed end-to-end; every controller
//! command and reply uses it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed axis identifier list for 6-axis commands.
pub const AXIS_IDS: [&str; 6] = ["X", "Y", "Z", "U", "V", "W"];

/// Reduced axis list used for pivot-point commands.
pub const PIVOT_AXIS_IDS: [&str; 3] = ["X", "Y", "Z"];

/// Six-axis stage pose: linear offsets in mm, rotations in degrees.
///
/// Immutable value type. Equality is exact; use [`Pose::within`] for
/// tolerance-based proximity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub u: f64,
    pub v: f64,
    pub w: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, z: f64, u: f64, v: f64, w: f64) -> Self {
        Self { x, y, z, u, v, w }
    }

    /// Axis values in the fixed X Y Z U V W order.
    pub fn to_array(&self) -> [f64; 6] {
        [self.x, self.y, self.z, self.u, self.v, self.w]
    }

    pub fn from_array(values: [f64; 6]) -> Self {
        Self {
            x: values[0],
            y: values[1],
            z: values[2],
            u: values[3],
            v: values[4],
            w: values[5],
        }
    }

    /// True when every axis difference is strictly less than `tolerance`.
    ///
    /// Strict comparison is deliberate: a pose exactly `tolerance` away on any
    /// axis does not match.
    pub fn within(&self, other: &Pose, tolerance: f64) -> bool {
        self.to_array()
            .iter()
            .zip(other.to_array().iter())
            .all(|(a, b)| (a - b).abs() < tolerance)
    }
}

impl From<[f64; 6]> for Pose {
    fn from(values: [f64; 6]) -> Self {
        Self::from_array(values)
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X={:.4} Y={:.4} Z={:.4} U={:.4} V={:.4} W={:.4}",
            self.x, self.y, self.z, self.u, self.v, self.w
        )
    }
}

/// Rotation center used by the controller's internal kinematics, in mm.
///
/// Lives in the controller's volatile memory: it is not persisted across power
/// cycles and must be re-set after a reconnect if a non-default pivot is
/// required.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PivotPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PivotPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for PivotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X={:.4} Y={:.4} Z={:.4}", self.x, self.y, self.z)
    }
}

/// One pose sample captured by the telemetry stream.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySample {
    pub pose: Pose,
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySample {
    pub fn now(pose: Pose) -> Self {
        Self {
            pose,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_is_strict() {
        let a = Pose::default();
        let b = Pose::new(0.001, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert!(a.within(&b, 0.002));
        // Exactly at tolerance on one axis must not match.
        let c = Pose::new(0.002, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert!(!a.within(&c, 0.002));
    }

    #[test]
    fn within_checks_every_axis() {
        let a = Pose::default();
        let b = Pose::new(0.001, 0.001, 0.001, 0.001, 0.001, 5.0);
        assert!(!a.within(&b, 0.002));
    }

    #[test]
    fn display_uses_fixed_axis_order() {
        let pose = Pose::new(1.0, 2.0, 3.0, 0.5, -0.5, 0.0);
        assert_eq!(
            pose.to_string(),
            "X=1.0000 Y=2.0000 Z=3.0000 U=0.5000 V=-0.5000 W=0.0000"
        );
    }

    #[test]
    fn array_round_trip_preserves_order() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(Pose::from_array(values).to_array(), values);
    }
}
