// THEORY:
// The `calibrator` is the learning layer. Where the detectors and the
// simulator are stateless, the calibrator is the one component with memory: it
// keeps a short, quality-ranked history of past detections and turns it into
// better parameters for the next cycle.
//
// Key architectural principles:
// 1.  **Ranked, bounded memory**: only confident samples are kept, the history
//     is ordered by confidence and never grows beyond `HISTORY_CAPACITY`; the
//     weakest sample is the first to go.
// 2.  **Derived, not accumulated**: radii, color tolerance, friction and
//     restitution are recomputed from the whole history every time it
//     changes, so one odd sample cannot drift the parameters permanently.
// 3.  **Corrections are nudges**: a manual correction moves a persistent
//     offset by a fixed fraction of the observed error instead of jumping to
//     the corrected value.
// 4.  **Snapshot output**: the calibrator never hands out references to its
//     state. Consumers get a `ConfigSnapshot` value, published through the
//     `ConfigStore` by whoever owns the calibrator.

use crate::config::{
    ConfigSnapshot, DetectionConfig, FRICTION_RANGE, MAX_COLOR_TOLERANCE, PhysicsConfig, RESTITUTION_RANGE,
    TableTemplate,
};
use crate::core_modules::ball::{MAX_BALL_RADIUS, MIN_BALL_RADIUS, POCKET_RADIUS_FACTOR};
use crate::core_modules::frame::ColorProfile;
use crate::core_modules::geometry::{Point, Region, normalize_angle};
use crate::core_modules::shot_evaluator::{ShotOutcome, ShotSuggestion};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const HISTORY_CAPACITY: usize = 50;
/// Samples at or below this confidence are not kept.
pub const MIN_SAMPLE_CONFIDENCE: f64 = 0.6;
/// Outcomes above this confidence feed the physics estimate.
const MIN_OUTCOME_CONFIDENCE: f64 = 0.7;
/// Samples above this confidence may serve as the table template.
const MIN_TEMPLATE_CONFIDENCE: f64 = 0.8;
pub const LEARNING_RATE: f64 = 0.1;
/// Correction error (per axis) above which color tolerance is widened.
const LARGE_CORRECTION: f64 = 10.0;
const TOLERANCE_STEP: u8 = 2;
/// Ball radius as a fraction of table width.
const TABLE_WIDTHS_PER_BALL_RADIUS: f64 = 40.0;
/// Color tolerance before any variance is observed.
const BASE_COLOR_TOLERANCE: f64 = 30.0;
/// Tolerance added per unit of observed felt standard deviation.
const VARIANCE_GAIN: f64 = 0.2;
const MAX_OFFSET: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenMetadata {
    pub width: u32,
    pub height: u32,
}

/// Physics parameters a shot was played with and how it went.
///
/// Outcomes built with `from_shot` carry the coefficients the shot was
/// simulated with, so on their own they hold the physics estimate steady. A
/// source that measures real ball travel reports its fitted coefficients
/// with `observed`, and those move the estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryOutcome {
    pub friction: f64,
    pub restitution: f64,
    pub confidence: f64,
    pub pocketed: bool,
}

impl TrajectoryOutcome {
    pub fn from_shot(shot: &ShotSuggestion, physics: &PhysicsConfig) -> Self {
        Self {
            friction: physics.friction,
            restitution: physics.restitution,
            confidence: shot.score,
            pocketed: shot.outcome == ShotOutcome::Pocketed,
        }
    }

    pub fn observed(friction: f64, restitution: f64, confidence: f64, pocketed: bool) -> Self {
        Self { friction, restitution, confidence, pocketed }
    }
}

/// One detection cycle as remembered by the calibrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub table: Region,
    pub ball_radius: f64,
    pub pocket_radius: f64,
    pub color_profile: ColorProfile,
    pub screen: ScreenMetadata,
    pub confidence: f64,
    pub outcomes: Vec<TrajectoryOutcome>,
}

/// A user-supplied fix for something the detectors got wrong.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManualCorrection {
    BallPosition { detected: Point, corrected: Point },
    PocketPosition { detected: Point, corrected: Point },
    TableBounds { detected: Region, corrected: Region },
    /// Directions in radians.
    CueDirection { detected: f64, corrected: f64 },
}

/// Owner of the calibration history and the parameters derived from it.
#[derive(Debug, Clone)]
pub struct Calibrator {
    history: Vec<CalibrationSample>,
    detection: DetectionConfig,
    physics: PhysicsConfig,
    table_template: Option<TableTemplate>,
    /// Accumulated widening from large manual corrections.
    tolerance_widening: u8,
}

impl Calibrator {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        // A persisted tolerance above the base is widening earned in an
        // earlier session.
        let tolerance_widening = snapshot
            .detection
            .color_tolerance
            .saturating_sub(BASE_COLOR_TOLERANCE as u8);
        Self {
            history: Vec::with_capacity(HISTORY_CAPACITY + 1),
            detection: snapshot.detection,
            physics: snapshot.physics,
            table_template: snapshot.table_template,
            tolerance_widening,
        }
    }

    /// Highest confidence first.
    pub fn history(&self) -> &[CalibrationSample] {
        &self.history
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            detection: self.detection.clone(),
            physics: self.physics.clone(),
            table_template: self.table_template.clone(),
        }
    }

    /// Adds a sample if it is confident enough and recomputes the derived
    /// parameters. Returns whether the sample was kept.
    pub fn record(&mut self, sample: CalibrationSample) -> bool {
        if sample.confidence.is_nan() || sample.confidence <= MIN_SAMPLE_CONFIDENCE {
            debug!("Calibration sample rejected, confidence {:.2}", sample.confidence);
            return false;
        }
        self.insert(sample);
        self.recompute();
        true
    }

    fn insert(&mut self, sample: CalibrationSample) {
        self.history.push(sample);
        // Stable: among equal confidences the older sample ranks first.
        self.history.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        if self.history.len() > HISTORY_CAPACITY {
            self.history.truncate(HISTORY_CAPACITY);
        }
    }

    /// Re-derives every learned parameter from the current history.
    pub fn recompute(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let n = self.history.len() as f64;

        let mean_width = self.history.iter().map(|s| s.table.width()).sum::<f64>() / n;
        let ball_radius = (mean_width / TABLE_WIDTHS_PER_BALL_RADIUS).clamp(MIN_BALL_RADIUS, MAX_BALL_RADIUS);
        self.detection.ball_radius = ball_radius;
        self.detection.pocket_radius = ball_radius * POCKET_RADIUS_FACTOR;

        let mean_std_dev = self.history.iter().map(|s| s.color_profile.mean_std_dev()).sum::<f64>() / n;
        let derived = (BASE_COLOR_TOLERANCE + VARIANCE_GAIN * mean_std_dev).round() + self.tolerance_widening as f64;
        self.detection.color_tolerance = derived.clamp(0.0, MAX_COLOR_TOLERANCE as f64) as u8;

        let successful: Vec<&TrajectoryOutcome> = self
            .history
            .iter()
            .flat_map(|s| s.outcomes.iter())
            .filter(|o| o.confidence > MIN_OUTCOME_CONFIDENCE)
            .collect();
        if !successful.is_empty() {
            let m = successful.len() as f64;
            let friction = successful.iter().map(|o| o.friction).sum::<f64>() / m;
            let restitution = successful.iter().map(|o| o.restitution).sum::<f64>() / m;
            self.physics.friction = friction.clamp(FRICTION_RANGE.0, FRICTION_RANGE.1);
            self.physics.restitution = restitution.clamp(RESTITUTION_RANGE.0, RESTITUTION_RANGE.1);
        }

        self.table_template = self
            .history
            .iter()
            .find(|s| s.confidence > MIN_TEMPLATE_CONFIDENCE)
            .map(|s| TableTemplate { bounds: s.table, profile: s.color_profile.clone() })
            .or_else(|| self.table_template.take());

        debug!(
            "Recalibrated from {} samples: ball radius {:.1}, tolerance {}, friction {:.3}, restitution {:.2}",
            self.history.len(),
            ball_radius,
            self.detection.color_tolerance,
            self.physics.friction,
            self.physics.restitution
        );
    }

    pub fn apply_correction(&mut self, correction: ManualCorrection) {
        match correction {
            ManualCorrection::BallPosition { detected, corrected } => {
                let error = corrected - detected;
                self.detection.ball_offset = nudge(self.detection.ball_offset, error);
                self.widen_if_large(error);
            }
            ManualCorrection::PocketPosition { detected, corrected } => {
                let error = corrected - detected;
                self.detection.pocket_offset = nudge(self.detection.pocket_offset, error);
                self.widen_if_large(error);
            }
            ManualCorrection::TableBounds { detected, corrected } => {
                let Some(best) = self.history.first() else {
                    warn!("Table correction {:?} -> {:?} ignored, no history yet", detected, corrected);
                    return;
                };
                let verified = CalibrationSample { table: corrected, confidence: 1.0, outcomes: Vec::new(), ..best.clone() };
                self.insert(verified);
                self.recompute();
            }
            ManualCorrection::CueDirection { detected, corrected } => {
                let error = normalize_angle(corrected - detected);
                self.detection.direction_offset = normalize_angle(self.detection.direction_offset + error * LEARNING_RATE);
            }
        }
        info!("Applied manual correction: {:?}", correction);
    }

    fn widen_if_large(&mut self, error: Point) {
        if error.x.abs() > LARGE_CORRECTION || error.y.abs() > LARGE_CORRECTION {
            self.tolerance_widening = self.tolerance_widening.saturating_add(TOLERANCE_STEP);
            self.detection.color_tolerance = self
                .detection
                .color_tolerance
                .saturating_add(TOLERANCE_STEP)
                .min(MAX_COLOR_TOLERANCE);
        }
    }
}

fn nudge(offset: Point, error: Point) -> Point {
    let moved = offset + error.scale(LEARNING_RATE);
    Point::new(moved.x.clamp(-MAX_OFFSET, MAX_OFFSET), moved.y.clamp(-MAX_OFFSET, MAX_OFFSET))
}
