// THEORY:
// The `shot_evaluator` is the decision layer. It answers one question: given
// the current `GameState`, which (target ball, pocket) shot is most promising?
//
// Key architectural principles & algorithm steps:
// 1.  **Rules as data**: the game mode is a plain enum. It only decides which
//     object balls are legal targets; everything after that is mode-agnostic.
// 2.  **Ghost-ball aiming**: to send a target towards a pocket, the cue ball
//     must arrive at the point one ball-diameter behind the target on the
//     pocket line. The cue angle is the direction to that point.
// 3.  **Simulate, then score**: every candidate is played out with the
//     `TrajectorySimulator` (including the paths of struck balls), and the
//     score is derived from what the simulation says happened, adjusted by
//     distance, obstruction, cut angle and power.
// 4.  **Stable ranking**: candidates are enumerated in a fixed order (targets
//     by type, pockets as listed) and ties always go to the earlier one, so
//     the same state always produces the same suggestion.

use crate::config::PhysicsConfig;
use crate::core_modules::ball::{Ball, BallType, GameState, Pocket, PocketName};
use crate::core_modules::geometry::{Point, Region, angle_between, distance_to_segment};
use crate::core_modules::trajectory::{TrajectoryPath, TrajectorySimulator};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Suggestions scoring below this are dropped.
pub const MIN_SHOT_SCORE: f64 = 0.3;
const BASE_POWER: f64 = 0.35;
const POWER_PER_OBSTACLE: f64 = 0.1;
const MIN_POWER: f64 = 0.1;
const MAX_POWER: f64 = 1.0;
/// Power above which the high-power penalty applies.
const SOFT_POWER_LIMIT: f64 = 0.8;

const POCKET_REWARD: f64 = 1.0;
const CONTACT_REWARD: f64 = 0.3;
const SCRATCH_PENALTY: f64 = 0.5;
const DISTANCE_BONUS: f64 = 0.2;
const OBSTACLE_PENALTY: f64 = 0.1;
const ANGLE_BONUS: f64 = 0.1;
const POWER_PENALTY: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Group {
    Solids,
    Stripes,
}

/// Target-selection rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameMode {
    /// `group` is `None` while the table is open.
    EightBall { group: Option<Group> },
    /// Only the lowest-numbered ball on the table may be targeted.
    NineBall,
    /// Every object ball is a target.
    Practice,
}

impl Default for GameMode {
    fn default() -> Self {
        GameMode::EightBall { group: None }
    }
}

impl GameMode {
    /// The balls that may be aimed at, in the order given.
    pub fn legal_targets(&self, balls: &[Ball]) -> Vec<Ball> {
        match self {
            GameMode::Practice => balls.to_vec(),
            GameMode::NineBall => balls
                .iter()
                .min_by_key(|b| b.ball_type.number())
                .copied()
                .into_iter()
                .collect(),
            GameMode::EightBall { group } => {
                let in_group = |t: &BallType| match group {
                    Some(Group::Solids) => t.is_solid(),
                    Some(Group::Stripes) => t.is_stripe(),
                    None => t.is_solid() || t.is_stripe(),
                };
                let targets: Vec<Ball> = balls.iter().filter(|b| in_group(&b.ball_type)).copied().collect();
                if targets.is_empty() {
                    balls.iter().filter(|b| b.ball_type == BallType::Eight).copied().collect()
                } else {
                    targets
                }
            }
        }
    }
}

/// Classification of what the simulated shot did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShotOutcome {
    Pocketed,
    Contact,
    Miss,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotSuggestion {
    pub target: BallType,
    pub pocket: PocketName,
    /// Where the cue ball's center must be at contact.
    pub ghost_point: Point,
    pub cue_angle: f64,
    pub power: f64,
    pub score: f64,
    pub outcome: ShotOutcome,
    pub scratch: bool,
    /// Cue path first, then the struck balls' paths.
    pub trajectories: Vec<TrajectoryPath>,
}

/// Everything a shot evaluation reads from a `GameState`, owned so it can be
/// shared with worker tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct ShotContext {
    pub cue: Ball,
    pub balls: Vec<Ball>,
    /// Cushion rectangle (the table bounds).
    pub table: Region,
    pub pockets: Vec<Pocket>,
}

impl ShotContext {
    /// `None` without a table or cue ball.
    pub fn from_state(state: &GameState) -> Option<Self> {
        Some(Self {
            cue: state.cue_ball?,
            balls: state.object_balls().to_vec(),
            table: state.table?,
            pockets: state.pockets.clone(),
        })
    }

    /// The (target, pocket) pairs worth simulating, in evaluation order.
    pub fn candidates(&self, mode: GameMode) -> Vec<(Ball, Pocket)> {
        mode.legal_targets(&self.balls)
            .into_iter()
            .flat_map(|target| self.pockets.iter().map(move |pocket| (target, *pocket)))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShotEvaluator {
    simulator: TrajectorySimulator,
}

impl ShotEvaluator {
    pub fn new(physics: PhysicsConfig) -> Self {
        Self { simulator: TrajectorySimulator::new(physics) }
    }

    pub fn simulator(&self) -> &TrajectorySimulator {
        &self.simulator
    }

    /// Power in `[0.1, 1.0]` for a shot whose cue travel plus target travel
    /// is `distance` on a table of diagonal `diagonal`, plus a fixed increment
    /// per obstructing ball.
    pub fn optimal_power(distance: f64, diagonal: f64, obstacles: usize) -> f64 {
        let normalized = if diagonal > 0.0 { distance / diagonal } else { 1.0 };
        (BASE_POWER + normalized + POWER_PER_OBSTACLE * obstacles as f64).clamp(MIN_POWER, MAX_POWER)
    }

    /// Simulates and scores one (target, pocket) pair. `None` when the pair
    /// is geometrically meaningless or scores below `MIN_SHOT_SCORE`.
    pub fn evaluate(&self, context: &ShotContext, target: &Ball, pocket: &Pocket) -> Option<ShotSuggestion> {
        let cue = &context.cue;
        let pocket_line = (pocket.position - target.position).normalized()?;
        let ghost_point = target.position - pocket_line.scale(target.radius + cue.radius);
        let cue_angle = cue.position.angle_to(ghost_point);

        let margin = self.simulator.physics().collision_margin;
        let obstacles = context
            .balls
            .iter()
            .filter(|b| b.ball_type != target.ball_type)
            .filter(|b| {
                let clearance = b.radius + cue.radius + margin;
                distance_to_segment(b.position, cue.position, ghost_point) < clearance
                    || distance_to_segment(b.position, target.position, pocket.position) < clearance
            })
            .count();

        let distance = cue.position.distance_to(ghost_point) + target.position.distance_to(pocket.position);
        let diagonal = context.table.diagonal();
        let power = Self::optimal_power(distance, diagonal, obstacles);

        let center_bounds = context.table.inset(cue.radius);
        let trajectories =
            self.simulator
                .simulate_multiple(cue, cue_angle, power, &center_bounds, &context.balls, &context.pockets);

        let primary = trajectories.first()?;
        let scratch = primary.is_pocketed();
        let pocketed = trajectories
            .iter()
            .any(|p| p.ball_type == target.ball_type && p.is_pocketed());
        let outcome = if pocketed {
            ShotOutcome::Pocketed
        } else if primary.first_struck() == Some(target.ball_type) {
            ShotOutcome::Contact
        } else {
            ShotOutcome::Miss
        };

        let mut score = match outcome {
            ShotOutcome::Pocketed => POCKET_REWARD,
            ShotOutcome::Contact => CONTACT_REWARD,
            ShotOutcome::Miss => 0.0,
        };
        if scratch {
            score -= SCRATCH_PENALTY;
        }
        let normalized = if diagonal > 0.0 { (distance / diagonal).min(1.0) } else { 1.0 };
        score += DISTANCE_BONUS * (1.0 - normalized);
        score -= OBSTACLE_PENALTY * obstacles as f64;
        score += ANGLE_BONUS * angle_between(target.position, cue.position, pocket.position).sin();
        if power > SOFT_POWER_LIMIT {
            score -= (power - SOFT_POWER_LIMIT) * POWER_PENALTY;
        }
        let score = score.clamp(0.0, 1.0);

        debug!(
            "Shot {} -> {}: {:?} power {:.2} score {:.3}",
            target.ball_type, pocket.name, outcome, power, score
        );
        (score >= MIN_SHOT_SCORE).then_some(ShotSuggestion {
            target: target.ball_type,
            pocket: pocket.name,
            ghost_point,
            cue_angle,
            power,
            score,
            outcome,
            scratch,
            trajectories,
        })
    }

    /// Every surviving suggestion, best first. Equal scores keep evaluation
    /// order.
    pub fn rank_shots(&self, state: &GameState, mode: GameMode) -> Vec<ShotSuggestion> {
        let Some(context) = ShotContext::from_state(state) else {
            return Vec::new();
        };
        let suggestions = context
            .candidates(mode)
            .iter()
            .filter_map(|(target, pocket)| self.evaluate(&context, target, pocket))
            .collect();
        rank(suggestions)
    }

    /// The highest-scoring suggestion; the first evaluated wins a tie.
    pub fn best_shot(&self, state: &GameState, mode: GameMode) -> Option<ShotSuggestion> {
        self.rank_shots(state, mode).into_iter().next()
    }
}

/// Stable sort by descending score.
pub fn rank(mut suggestions: Vec<ShotSuggestion>) -> Vec<ShotSuggestion> {
    suggestions.sort_by(|a, b| b.score.total_cmp(&a.score));
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::trajectory::CollisionKind;

    fn ball(ball_type: BallType, x: f64, y: f64) -> Ball {
        Ball::new(ball_type, Point::new(x, y), 12.0)
    }

    fn straight_shot_state(pockets: &[(PocketName, f64, f64)]) -> GameState {
        let mut state = GameState::new(Some(Region::new(0.0, 0.0, 800.0, 400.0)));
        state.cue_ball = Some(ball(BallType::Cue, 200.0, 200.0));
        state.insert_object_ball(ball(BallType::Solid(1), 400.0, 200.0));
        state.pockets = pockets
            .iter()
            .map(|(name, x, y)| Pocket::new(*name, Point::new(*x, *y), 26.0))
            .collect();
        state
    }

    #[test]
    fn straight_shot_into_pocket_scores_highest() {
        let state = straight_shot_state(&[(PocketName::TopRight, 540.0, 200.0)]);
        let evaluator = ShotEvaluator::default();
        let best = evaluator.best_shot(&state, GameMode::Practice).expect("a shot");

        assert_eq!(best.target, BallType::Solid(1));
        assert_eq!(best.pocket, PocketName::TopRight);
        assert_eq!(best.outcome, ShotOutcome::Pocketed);
        assert!(!best.scratch);
        assert_eq!(best.score, 1.0);
        assert_eq!(best.ghost_point, Point::new(376.0, 200.0));
        assert!(best.power > 0.6 && best.power < 0.8);

        let target_path = &best.trajectories[1];
        assert_eq!(target_path.ball_type, BallType::Solid(1));
        assert!(matches!(
            target_path.collisions.last().map(|e| e.kind),
            Some(CollisionKind::Pocket { pocket: PocketName::TopRight })
        ));
    }

    #[test]
    fn ties_go_to_the_first_pocket() {
        let state = straight_shot_state(&[
            (PocketName::TopRight, 540.0, 200.0),
            (PocketName::BottomRight, 540.0, 200.0),
        ]);
        let evaluator = ShotEvaluator::default();
        let ranked = evaluator.rank_shots(&state, GameMode::Practice);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].score, ranked[1].score);
        assert_eq!(ranked[0].pocket, PocketName::TopRight);
        assert_eq!(
            evaluator.best_shot(&state, GameMode::Practice).map(|s| s.pocket),
            Some(PocketName::TopRight)
        );
    }

    #[test]
    fn no_cue_ball_means_no_suggestion() {
        let mut state = straight_shot_state(&[(PocketName::TopRight, 540.0, 200.0)]);
        state.cue_ball = None;
        assert!(ShotEvaluator::default().best_shot(&state, GameMode::Practice).is_none());
    }

    #[test]
    fn power_grows_with_distance_and_obstacles() {
        let near = ShotEvaluator::optimal_power(100.0, 1000.0, 0);
        let far = ShotEvaluator::optimal_power(400.0, 1000.0, 0);
        let blocked = ShotEvaluator::optimal_power(100.0, 1000.0, 2);
        assert!(near < far);
        assert!((blocked - near - 0.2).abs() < 1e-12);
        assert_eq!(ShotEvaluator::optimal_power(5000.0, 1000.0, 3), 1.0);
    }

    #[test]
    fn game_modes_filter_targets() {
        let balls = vec![
            ball(BallType::Solid(3), 0.0, 0.0),
            ball(BallType::Eight, 0.0, 0.0),
            ball(BallType::Stripe(10), 0.0, 0.0),
        ];
        let types = |mode: GameMode, balls: &[Ball]| -> Vec<BallType> {
            mode.legal_targets(balls).iter().map(|b| b.ball_type).collect()
        };

        assert_eq!(
            types(GameMode::EightBall { group: Some(Group::Solids) }, &balls),
            vec![BallType::Solid(3)]
        );
        assert_eq!(
            types(GameMode::EightBall { group: None }, &balls),
            vec![BallType::Solid(3), BallType::Stripe(10)]
        );
        assert_eq!(types(GameMode::NineBall, &balls), vec![BallType::Solid(3)]);
        assert_eq!(types(GameMode::Practice, &balls).len(), 3);

        let only_stripes_cleared = vec![ball(BallType::Solid(3), 0.0, 0.0), ball(BallType::Eight, 0.0, 0.0)];
        assert_eq!(
            types(GameMode::EightBall { group: Some(Group::Stripes) }, &only_stripes_cleared),
            vec![BallType::Eight]
        );
    }
}
