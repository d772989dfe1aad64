// THEORY:
// The `config` module owns the tunable parameters of the detectors and the
// simulator, and the slot through which the calibrator publishes new values.
//
// Key architectural principles:
// 1.  **Immutable snapshots**: `ConfigSnapshot` bundles a `DetectionConfig`, a
//     `PhysicsConfig` and the optional table template. A snapshot is never
//     edited in place once published; the calibrator builds a new one and
//     swaps it in.
// 2.  **Single writer, many readers**: `ConfigStore` hands readers a cloned
//     `Arc` of the current snapshot. A detection cycle grabs one at its start
//     and keeps it to the end, so a publish that lands mid-cycle only takes
//     effect on the next cycle.
// 3.  **Validated boundaries**: anything loaded from the persistence
//     collaborator passes through `validate`, and a snapshot that fails
//     validation is never published.

use crate::core_modules::ball::{MAX_BALL_RADIUS, MIN_BALL_RADIUS, POCKET_RADIUS_FACTOR};
use crate::core_modules::frame::ColorProfile;
use crate::core_modules::geometry::{Point, Region};
use crate::error::ConfigError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const FRICTION_RANGE: (f64, f64) = (0.95, 0.995);
pub const RESTITUTION_RANGE: (f64, f64) = (0.7, 0.95);
pub const MAX_COLOR_TOLERANCE: u8 = 50;

/// Parameters of the region detector and object locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Per-channel tolerance when growing the table felt region.
    pub table_color_tolerance: u8,
    /// Per-channel tolerance for balls, guide lines and pockets.
    pub color_tolerance: u8,
    /// Sobel magnitude above which a pixel belongs to an edge.
    pub edge_threshold: f32,
    /// Local 3x3 max-min luminance spread above which a pixel is high-contrast.
    pub contrast_threshold: f32,
    pub ball_radius: f64,
    pub pocket_radius: f64,
    /// Learned correction added to every detected ball position.
    pub ball_offset: Point,
    /// Learned correction added to every detected pocket position.
    pub pocket_offset: Point,
    /// Learned correction added to the inferred cue direction (radians).
    pub direction_offset: f64,
    /// How many table detectors must succeed before a consensus is reported.
    pub min_detector_agreement: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            table_color_tolerance: 40,
            color_tolerance: 30,
            edge_threshold: 100.0,
            contrast_threshold: 30.0,
            ball_radius: 12.0,
            pocket_radius: 12.0 * POCKET_RADIUS_FACTOR,
            ball_offset: Point::ZERO,
            pocket_offset: Point::ZERO,
            direction_offset: 0.0,
            min_detector_agreement: 1,
        }
    }
}

/// Parameters of the trajectory simulator. Velocities are in frame units per
/// second, `friction` is the fraction of speed kept per step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub friction: f64,
    pub restitution: f64,
    /// Initial speed at power 1.0.
    pub velocity_scale: f64,
    /// Speed below which a ball is considered at rest.
    pub min_velocity: f64,
    pub max_trajectory_steps: usize,
    pub time_step: f64,
    /// Hard cap on simulated seconds per path.
    pub max_simulation_time: f64,
    /// Extra distance at which two balls are treated as touching.
    pub collision_margin: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            friction: 0.985,
            restitution: 0.8,
            velocity_scale: 480.0,
            min_velocity: 6.0,
            max_trajectory_steps: 1000,
            time_step: 1.0 / 60.0,
            max_simulation_time: 10.0,
            collision_margin: 0.5,
        }
    }
}

/// Table bounds and felt signature from a high-confidence history sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableTemplate {
    pub bounds: Region,
    pub profile: ColorProfile,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSnapshot {
    pub detection: DetectionConfig,
    pub physics: PhysicsConfig,
    pub table_template: Option<TableTemplate>,
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, min, max })
    }
}

impl ConfigSnapshot {
    /// Parses and validates a snapshot written by `to_json`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let snapshot: ConfigSnapshot = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        let p = &self.physics;
        check_range("detection.color_tolerance", d.color_tolerance as f64, 0.0, MAX_COLOR_TOLERANCE as f64)?;
        check_range("detection.ball_radius", d.ball_radius, MIN_BALL_RADIUS, MAX_BALL_RADIUS)?;
        check_range("detection.pocket_radius", d.pocket_radius, MIN_BALL_RADIUS, MAX_BALL_RADIUS * 3.0)?;
        check_range("detection.min_detector_agreement", d.min_detector_agreement as f64, 1.0, 4.0)?;
        check_range("detection.ball_offset.x", d.ball_offset.x, -100.0, 100.0)?;
        check_range("detection.ball_offset.y", d.ball_offset.y, -100.0, 100.0)?;
        check_range("detection.pocket_offset.x", d.pocket_offset.x, -100.0, 100.0)?;
        check_range("detection.pocket_offset.y", d.pocket_offset.y, -100.0, 100.0)?;
        check_range("physics.friction", p.friction, FRICTION_RANGE.0, FRICTION_RANGE.1)?;
        check_range("physics.restitution", p.restitution, RESTITUTION_RANGE.0, RESTITUTION_RANGE.1)?;
        check_range("physics.velocity_scale", p.velocity_scale, 1.0, 1e5)?;
        check_range("physics.min_velocity", p.min_velocity, 0.0, p.velocity_scale)?;
        check_range("physics.time_step", p.time_step, 1e-4, 1.0)?;
        check_range("physics.max_simulation_time", p.max_simulation_time, p.time_step, 600.0)?;
        check_range("physics.collision_margin", p.collision_margin, 0.0, 10.0)?;
        Ok(())
    }
}

/// The shared slot holding the active snapshot.
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigStore {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self { current: RwLock::new(Arc::new(snapshot)) }
    }

    /// The active snapshot. Holding it does not block writers.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Validates and swaps in a new snapshot. On error the active snapshot is
    /// left untouched.
    pub fn publish(&self, snapshot: ConfigSnapshot) -> Result<(), ConfigError> {
        snapshot.validate()?;
        *self.current.write() = Arc::new(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ConfigSnapshot::default().validate().expect("defaults validate");
    }

    #[test]
    fn json_snapshot_loads_with_missing_fields_defaulted() {
        let json = r#"{ "physics": { "friction": 0.97 } }"#;
        let snapshot = ConfigSnapshot::from_json(json).expect("valid snapshot");
        assert_eq!(snapshot.physics.friction, 0.97);
        assert_eq!(snapshot.physics.restitution, PhysicsConfig::default().restitution);
        assert_eq!(snapshot.detection, DetectionConfig::default());

        let written = snapshot.to_json().expect("serializes");
        let reloaded = ConfigSnapshot::from_json(&written).expect("reloads");
        assert_eq!(reloaded.physics.friction, 0.97);
        assert_eq!(reloaded.detection.color_tolerance, snapshot.detection.color_tolerance);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let json = r#"{ "physics": { "restitution": 1.2 } }"#;
        let err = ConfigSnapshot::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "physics.restitution", .. }));
        assert!(matches!(ConfigSnapshot::from_json("{ nope"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejected_publish_keeps_active_snapshot() {
        let store = ConfigStore::new(ConfigSnapshot::default());
        let held = store.snapshot();

        let mut bad = ConfigSnapshot::default();
        bad.physics.friction = 0.5;
        assert!(store.publish(bad).is_err());
        assert_eq!(*store.snapshot(), ConfigSnapshot::default());

        let mut good = ConfigSnapshot::default();
        good.physics.friction = 0.99;
        store.publish(good).expect("valid publish");
        assert_eq!(store.snapshot().physics.friction, 0.99);
        assert_eq!(held.physics.friction, 0.985);
    }
}
