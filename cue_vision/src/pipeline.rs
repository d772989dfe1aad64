// THEORY:
// The `pipeline` module is the top-level, synchronous API of the engine. It
// wires the analysis layers into one detection cycle and owns the little state
// that must survive between cycles: how many cycles in a row failed, and the
// last game state that was accepted.
//
// Key architectural principles:
// 1.  **One snapshot per cycle**: a cycle reads the `ConfigStore` exactly once,
//     at its start. A calibration publish that lands while a frame is being
//     analysed only affects the next frame.
// 2.  **Atomic cycles**: `detect_game_state` is a pure function of the frame
//     and the snapshot. The cycle bookkeeping is only touched after it has
//     returned, so a failed cycle never leaves a half-updated state behind.
// 3.  **Escalation, not errors**: a missing table or a low-confidence result is
//     a normal outcome reported as such. Only after
//     `calibration_failure_threshold` consecutive misses does the report turn
//     into `NeedsCalibration`.
// 4.  **Change significance**: a successful detection that barely differs from
//     the accepted state is reported as `Unchanged`, so consumers only redraw
//     and re-plan when something actually moved.

use crate::config::{ConfigSnapshot, ConfigStore};
use crate::core_modules::ball::{GameState, SignificanceThresholds};
use crate::core_modules::calibrator::{CalibrationSample, ScreenMetadata, TrajectoryOutcome};
use crate::core_modules::frame::{ColorProfile, Frame};
use crate::core_modules::object_locator::locate_objects;
use crate::core_modules::region_detector::{RegionEstimate, detect_table};
use crate::core_modules::shot_evaluator::{GameMode, ShotEvaluator, ShotSuggestion};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Number of pockets on a standard table.
const POCKET_COUNT: f64 = 6.0;

/// Cadence and escalation settings of a detection pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Target interval between detection cycles.
    pub cycle_interval_ms: u64,
    /// Consecutive failed cycles after which calibration is requested.
    pub calibration_failure_threshold: u32,
    /// Detections below this confidence count as failed cycles.
    pub min_confidence: f64,
    /// Consecutive capture failures tolerated before the source is given up.
    pub max_capture_retries: u32,
    pub significance: SignificanceThresholds,
    pub game_mode: GameMode,
    /// Detection workers; `0` means one per CPU.
    pub worker_count: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 100,
            calibration_failure_threshold: 5,
            min_confidence: 0.4,
            max_capture_retries: 3,
            significance: SignificanceThresholds::default(),
            game_mode: GameMode::default(),
            worker_count: 0,
        }
    }
}

/// The outcome of one detection cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Report {
    /// A new state that differs significantly from the last accepted one.
    Detected(GameState),
    /// Detection succeeded but nothing moved enough to matter.
    Unchanged,
    NoTable { consecutive_failures: u32 },
    LowConfidence { confidence: f64, consecutive_failures: u32 },
    /// Too many failed cycles in a row; the user should recalibrate.
    NeedsCalibration { consecutive_failures: u32 },
}

/// Runs region detection and object location on one frame. The resulting
/// state carries the combined detection confidence.
pub fn detect_game_state(frame: &Frame, snapshot: &ConfigSnapshot) -> Option<GameState> {
    let estimate = detect_table(frame, &snapshot.detection, snapshot.table_template.as_ref())?;
    let mut state = locate_objects(frame, &estimate.region, &snapshot.detection);
    state.confidence = detection_confidence(&estimate, &state);
    Some(state)
}

/// `0.6 x region + 0.2 x cue found + 0.2 x share of pockets found`.
pub fn detection_confidence(estimate: &RegionEstimate, state: &GameState) -> f64 {
    let cue = if state.cue_ball.is_some() { 1.0 } else { 0.0 };
    let pockets = (state.pockets.len() as f64 / POCKET_COUNT).min(1.0);
    (0.6 * estimate.confidence + 0.2 * cue + 0.2 * pockets).clamp(0.0, 1.0)
}

/// Builds the calibration record of a successful cycle. `None` when the state
/// has no table or the table does not overlap the frame.
pub fn calibration_sample(
    frame: &Frame,
    state: &GameState,
    shots: &[ShotSuggestion],
    snapshot: &ConfigSnapshot,
) -> Option<CalibrationSample> {
    let table = state.table?;
    let color_profile = ColorProfile::from_region(frame, &table)?;
    let timestamp_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    Some(CalibrationSample {
        timestamp_ms,
        table,
        ball_radius: state.cue_ball.map_or(snapshot.detection.ball_radius, |b| b.radius),
        pocket_radius: snapshot.detection.pocket_radius,
        color_profile,
        screen: ScreenMetadata { width: frame.width(), height: frame.height() },
        confidence: state.confidence,
        outcomes: shots
            .iter()
            .map(|shot| TrajectoryOutcome::from_shot(shot, &snapshot.physics))
            .collect(),
    })
}

/// Failure counting and change significance shared by both pipelines.
#[derive(Debug, Clone)]
pub struct CycleTracker {
    failure_threshold: u32,
    min_confidence: f64,
    significance: SignificanceThresholds,
    consecutive_failures: u32,
    last_accepted: Option<GameState>,
}

impl CycleTracker {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            failure_threshold: config.calibration_failure_threshold,
            min_confidence: config.min_confidence,
            significance: config.significance,
            consecutive_failures: 0,
            last_accepted: None,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_accepted(&self) -> Option<&GameState> {
        self.last_accepted.as_ref()
    }

    /// Folds one cycle's detection result into the bookkeeping.
    pub fn observe(&mut self, detection: Option<GameState>) -> Report {
        let state = match detection {
            None => {
                self.consecutive_failures += 1;
                return self.escalate(Report::NoTable { consecutive_failures: self.consecutive_failures });
            }
            Some(state) if state.confidence < self.min_confidence => {
                self.consecutive_failures += 1;
                return self.escalate(Report::LowConfidence {
                    confidence: state.confidence,
                    consecutive_failures: self.consecutive_failures,
                });
            }
            Some(state) => state,
        };

        self.consecutive_failures = 0;
        let significant = self
            .last_accepted
            .as_ref()
            .is_none_or(|last| state.differs_significantly(last, &self.significance));
        if !significant {
            return Report::Unchanged;
        }
        debug!("Accepted new game state with confidence {:.2}", state.confidence);
        self.last_accepted = Some(state.clone());
        Report::Detected(state)
    }

    fn escalate(&self, report: Report) -> Report {
        if self.consecutive_failures >= self.failure_threshold {
            warn!("{} consecutive failed cycles, calibration required", self.consecutive_failures);
            Report::NeedsCalibration { consecutive_failures: self.consecutive_failures }
        } else {
            report
        }
    }
}

/// Frame-at-a-time pipeline for callers that drive their own loop.
pub struct ShotPipeline {
    config: PipelineConfig,
    store: Arc<ConfigStore>,
    tracker: CycleTracker,
}

impl ShotPipeline {
    pub fn new(config: PipelineConfig, store: Arc<ConfigStore>) -> Self {
        let tracker = CycleTracker::new(&config);
        Self { config, store, tracker }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn process_frame(&mut self, frame: &Frame) -> Report {
        let snapshot = self.store.snapshot();
        let detection = detect_game_state(frame, &snapshot);
        self.tracker.observe(detection)
    }

    pub fn last_state(&self) -> Option<&GameState> {
        self.tracker.last_accepted()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.tracker.consecutive_failures()
    }

    /// Ranked suggestions for `state` under the configured game mode.
    pub fn suggest_shots(&self, state: &GameState) -> Vec<ShotSuggestion> {
        let snapshot = self.store.snapshot();
        ShotEvaluator::new(snapshot.physics.clone()).rank_shots(state, self.config.game_mode)
    }
}
