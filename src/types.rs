//! Core types for balance telemetry
//!
//! This module defines the data that flows into the measurement engine each
//! tick (agent snapshots and actions) and the rows written to durable storage
//! (raw samples and reaction-time samples).

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// Single-precision 3-D vector for kinematic state (positions, velocities, angles)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance between two points
    pub fn distance(self, other: Vec3) -> f32 {
        (self - other).length()
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Component-wise absolute value
    pub fn abs(self) -> Vec3 {
        Vec3::new(self.x.abs(), self.y.abs(), self.z.abs())
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Double-precision 3-D vector used by the online accumulators
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3d {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Component-wise square
    pub fn squared(self) -> Vec3d {
        Vec3d::new(self.x * self.x, self.y * self.y, self.z * self.z)
    }

    /// Component-wise addition that fails when any component stops being finite
    pub fn checked_add(self, rhs: Vec3d) -> Option<Vec3d> {
        let sum = Vec3d::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z);
        sum.is_finite().then_some(sum)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Divide every component by `count`, narrowing to single precision
    pub fn mean(self, count: u64) -> Vec3 {
        let n = count.max(1) as f64;
        Vec3::new((self.x / n) as f32, (self.y / n) as f32, (self.z / n) as f32)
    }
}

impl From<Vec3> for Vec3d {
    fn from(v: Vec3) -> Self {
        Vec3d::new(v.x as f64, v.y as f64, v.z as f64)
    }
}

/// Continuous 2-D steering action applied to a platform
///
/// The first component tilts around the z axis, the second around the x axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Action {
    pub z: f32,
    pub x: f32,
}

impl Action {
    pub const fn new(z: f32, x: f32) -> Self {
        Self { z, x }
    }

    /// Action embedded in the (x, 0, z) plane used for action binning
    pub fn as_vec3(self) -> Vec3 {
        Vec3::new(self.x, 0.0, self.z)
    }
}

/// Kinematic state of one balancing task at a single tick
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentSnapshot {
    /// Stable identifier of the agent (hash code in recorded data)
    pub id: i32,
    /// Ball position relative to the platform center
    pub position: Vec3,
    /// Ball velocity
    pub velocity: Vec3,
    /// Platform euler angles in degrees
    pub angle: Vec3,
}

/// Agent state supplied to the engine each tick
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AgentState {
    /// Agent currently being controlled
    pub active: AgentSnapshot,
    /// Agent that was active before the last task switch, if any
    pub previous: Option<AgentSnapshot>,
}

impl AgentState {
    pub fn new(active: AgentSnapshot, previous: Option<AgentSnapshot>) -> Self {
        Self { active, previous }
    }
}

/// One captured tick of raw data
///
/// Column names follow the recorded CSV schema so previously captured files
/// can be replayed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawSample {
    pub action_z: f32,
    pub action_x: f32,
    pub target_ball_agent_hash_code: i32,
    pub target_ball_local_position_x: f32,
    pub target_ball_local_position_y: f32,
    pub target_ball_local_position_z: f32,
    pub target_ball_velocity_x: f32,
    pub target_ball_velocity_y: f32,
    pub target_ball_velocity_z: f32,
    pub target_platform_angle_x: f32,
    pub target_platform_angle_y: f32,
    pub target_platform_angle_z: f32,
    pub source_ball_agent_hash_code: i32,
    pub source_ball_local_position_x: f32,
    pub source_ball_local_position_y: f32,
    pub source_ball_local_position_z: f32,
    pub source_ball_velocity_x: f32,
    pub source_ball_velocity_y: f32,
    pub source_ball_velocity_z: f32,
    pub source_platform_angle_x: f32,
    pub source_platform_angle_y: f32,
    pub source_platform_angle_z: f32,
    pub time_since_last_switch: f64,
    pub time_between_switches: f64,
}

impl RawSample {
    /// Build a row from the active agent and, when present, the source agent
    pub fn capture(
        action: Action,
        target: &AgentSnapshot,
        source: Option<&AgentSnapshot>,
        time_since_last_switch: f64,
        time_between_switches: f64,
    ) -> Self {
        let source = source.copied().unwrap_or_default();

        Self {
            action_z: action.z,
            action_x: action.x,
            target_ball_agent_hash_code: target.id,
            target_ball_local_position_x: target.position.x,
            target_ball_local_position_y: target.position.y,
            target_ball_local_position_z: target.position.z,
            target_ball_velocity_x: target.velocity.x,
            target_ball_velocity_y: target.velocity.y,
            target_ball_velocity_z: target.velocity.z,
            target_platform_angle_x: target.angle.x,
            target_platform_angle_y: target.angle.y,
            target_platform_angle_z: target.angle.z,
            source_ball_agent_hash_code: source.id,
            source_ball_local_position_x: source.position.x,
            source_ball_local_position_y: source.position.y,
            source_ball_local_position_z: source.position.z,
            source_ball_velocity_x: source.velocity.x,
            source_ball_velocity_y: source.velocity.y,
            source_ball_velocity_z: source.velocity.z,
            source_platform_angle_x: source.angle.x,
            source_platform_angle_y: source.angle.y,
            source_platform_angle_z: source.angle.z,
            time_since_last_switch,
            time_between_switches,
        }
    }

    pub fn action(&self) -> Action {
        Action::new(self.action_z, self.action_x)
    }

    /// Kinematic state of the agent the row was recorded for
    pub fn target(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.target_ball_agent_hash_code,
            position: Vec3::new(
                self.target_ball_local_position_x,
                self.target_ball_local_position_y,
                self.target_ball_local_position_z,
            ),
            velocity: Vec3::new(
                self.target_ball_velocity_x,
                self.target_ball_velocity_y,
                self.target_ball_velocity_z,
            ),
            angle: Vec3::new(
                self.target_platform_angle_x,
                self.target_platform_angle_y,
                self.target_platform_angle_z,
            ),
        }
    }

    /// Kinematic state of the agent that was active before the last switch
    pub fn source(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.source_ball_agent_hash_code,
            position: Vec3::new(
                self.source_ball_local_position_x,
                self.source_ball_local_position_y,
                self.source_ball_local_position_z,
            ),
            velocity: Vec3::new(
                self.source_ball_velocity_x,
                self.source_ball_velocity_y,
                self.source_ball_velocity_z,
            ),
            angle: Vec3::new(
                self.source_platform_angle_x,
                self.source_platform_angle_y,
                self.source_platform_angle_z,
            ),
        }
    }
}

/// A single resolved reaction-time measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReactionTimeSample {
    pub time: f64,
    pub suspended_reaction_time_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_snapshot(id: i32, base: f32) -> AgentSnapshot {
        AgentSnapshot {
            id,
            position: Vec3::new(base, base + 1.0, base + 2.0),
            velocity: Vec3::new(base + 3.0, base + 4.0, base + 5.0),
            angle: Vec3::new(base + 6.0, base + 7.0, base + 8.0),
        }
    }

    #[test]
    fn test_vec3_distance() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(3.0, 4.0, 0.0);
        assert!((a.distance(b) - 5.0).abs() < 0.0001);
    }

    #[test]
    fn test_checked_add_rejects_overflow() {
        let big = Vec3d::new(f64::MAX, 0.0, 0.0);
        assert!(big.checked_add(big).is_none());
        assert_eq!(
            Vec3d::new(1.0, 2.0, 3.0).checked_add(Vec3d::new(1.0, 1.0, 1.0)),
            Some(Vec3d::new(2.0, 3.0, 4.0))
        );
    }

    #[test]
    fn test_raw_sample_capture_without_source() {
        let target = make_snapshot(7, 1.0);
        let row = RawSample::capture(Action::new(0.5, -0.25), &target, None, 12.0, 3000.0);

        assert_eq!(row.target(), target);
        assert_eq!(row.source(), AgentSnapshot::default());
        assert_eq!(row.action(), Action::new(0.5, -0.25));
        assert_eq!(row.time_between_switches, 3000.0);
    }

    #[test]
    fn test_raw_sample_capture_with_source() {
        let target = make_snapshot(1, 0.0);
        let source = make_snapshot(2, 10.0);
        let row = RawSample::capture(Action::default(), &target, Some(&source), 0.0, 0.0);

        assert_eq!(row.source(), source);
        assert_eq!(row.source_ball_agent_hash_code, 2);
    }

    #[test]
    fn test_action_plane_embedding() {
        let v = Action::new(0.2, -0.7).as_vec3();
        assert_eq!(v, Vec3::new(-0.7, 0.0, 0.2));
    }
}
