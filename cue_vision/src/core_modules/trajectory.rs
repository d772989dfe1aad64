// THEORY:
// The `trajectory` module is the physics layer. It predicts where a struck
// ball goes with a fixed-step explicit integrator over ball centers: the table
// bounds it receives are the rectangle a ball center may occupy, so callers
// that start from the cushion rectangle inset it by the ball radius first.
//
// Key architectural principles:
// 1.  **Pure and deterministic**: a simulation is a function of its inputs and
//     the `PhysicsConfig`. There is no shared state, no randomness and no
//     dependence on wall-clock time, so identical inputs give bit-identical
//     paths and any number of simulations may run in parallel.
// 2.  **Collision priority**: within one step, ball contact is resolved
//     first, then cushions, then pockets. A ball contact ends the path; the
//     struck ball gets its own, separately simulated path.
// 3.  **Bounded work**: every path stops at `max_trajectory_steps`, at the
//     simulation-time cap, or as soon as friction brings the speed under
//     `min_velocity`, whichever comes first.

use crate::config::PhysicsConfig;
use crate::core_modules::ball::{Ball, BallType, Pocket, PocketName};
use crate::core_modules::geometry::{Point, Region};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Fraction of the impact speed handed to a struck ball.
pub const TRANSFER_FACTOR: f64 = 0.7;
/// How many generations of struck balls `simulate_multiple` follows.
pub const MAX_CHAIN_DEPTH: usize = 3;

const WALL_PENALTY: f64 = 0.1;
const BALL_PENALTY: f64 = 0.2;
const STEP_PENALTY: f64 = 0.001;
/// Steps that come free before the per-step penalty applies.
const FREE_STEPS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WallSide {
    Left,
    Right,
    Top,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollisionKind {
    Wall {
        side: WallSide,
        speed_before: f64,
        speed_after: f64,
    },
    Ball {
        ball_type: BallType,
        ball_position: Point,
        /// Direction from the contact point to the struck ball's center.
        impact_angle: f64,
        impact_speed: f64,
    },
    Pocket {
        pocket: PocketName,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionEvent {
    pub point: Point,
    /// Seconds since the start of the path.
    pub time: f64,
    pub kind: CollisionKind,
}

/// The predicted motion of one ball.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPath {
    pub ball_type: BallType,
    pub waypoints: Vec<Point>,
    pub collisions: Vec<CollisionEvent>,
    pub pocket_prediction: Option<Pocket>,
    pub confidence: f64,
    pub steps: usize,
}

impl TrajectoryPath {
    fn start(ball_type: BallType, position: Point) -> Self {
        Self {
            ball_type,
            waypoints: vec![position],
            collisions: Vec::new(),
            pocket_prediction: None,
            confidence: 1.0,
            steps: 0,
        }
    }

    pub fn end_point(&self) -> Option<Point> {
        self.waypoints.last().copied()
    }

    pub fn wall_hits(&self) -> usize {
        self.collisions
            .iter()
            .filter(|e| matches!(e.kind, CollisionKind::Wall { .. }))
            .count()
    }

    pub fn ball_hits(&self) -> impl Iterator<Item = &CollisionEvent> {
        self.collisions
            .iter()
            .filter(|e| matches!(e.kind, CollisionKind::Ball { .. }))
    }

    /// The first ball this path ran into.
    pub fn first_struck(&self) -> Option<BallType> {
        self.ball_hits().find_map(|e| match e.kind {
            CollisionKind::Ball { ball_type, .. } => Some(ball_type),
            _ => None,
        })
    }

    pub fn is_pocketed(&self) -> bool {
        self.pocket_prediction.is_some()
    }

    fn finish(mut self) -> Self {
        let walls = self.wall_hits() as f64;
        let balls = self.ball_hits().count() as f64;
        let extra_steps = self.steps.saturating_sub(FREE_STEPS) as f64;
        self.confidence =
            (1.0 - WALL_PENALTY * walls - BALL_PENALTY * balls - STEP_PENALTY * extra_steps).clamp(0.0, 1.0);
        self
    }
}

/// Step and time limits of one integration run.
#[derive(Debug, Clone, Copy)]
struct Budget {
    max_steps: usize,
    max_time: f64,
}

/// Runs simulations under one `PhysicsConfig`.
#[derive(Debug, Clone, Default)]
pub struct TrajectorySimulator {
    physics: PhysicsConfig,
}

impl TrajectorySimulator {
    pub fn new(physics: PhysicsConfig) -> Self {
        Self { physics }
    }

    pub fn physics(&self) -> &PhysicsConfig {
        &self.physics
    }

    /// Simulates `ball` struck towards `direction` (radians) with `power`
    /// (1.0 = `velocity_scale`). `bounds` confines the ball's center.
    pub fn simulate(
        &self,
        ball: &Ball,
        direction: f64,
        power: f64,
        bounds: &Region,
        obstacles: &[Ball],
        pockets: &[Pocket],
    ) -> TrajectoryPath {
        let velocity = Point::from_angle(direction).scale(power.max(0.0) * self.physics.velocity_scale);
        let budget = Budget {
            max_steps: self.physics.max_trajectory_steps,
            max_time: self.physics.max_simulation_time,
        };
        self.integrate(ball, velocity, budget, bounds, obstacles, pockets)
    }

    /// Simulates a ball struck at `impact_angle` by a ball moving at
    /// `impact_speed`, with half the primary step and time budget.
    pub fn simulate_secondary(
        &self,
        struck: &Ball,
        impact_angle: f64,
        impact_speed: f64,
        bounds: &Region,
        obstacles: &[Ball],
        pockets: &[Pocket],
    ) -> TrajectoryPath {
        let velocity = Point::from_angle(impact_angle).scale(impact_speed * TRANSFER_FACTOR);
        let budget = Budget {
            max_steps: self.physics.max_trajectory_steps / 2,
            max_time: self.physics.max_simulation_time / 2.0,
        };
        self.integrate(struck, velocity, budget, bounds, obstacles, pockets)
    }

    /// The primary path followed by the paths of every ball it sets in
    /// motion, depth first, up to `MAX_CHAIN_DEPTH` generations.
    pub fn simulate_multiple(
        &self,
        ball: &Ball,
        direction: f64,
        power: f64,
        bounds: &Region,
        obstacles: &[Ball],
        pockets: &[Pocket],
    ) -> Vec<TrajectoryPath> {
        let primary = self.simulate(ball, direction, power, bounds, obstacles, pockets);
        let mut paths = Vec::new();
        self.follow_collisions(&primary, obstacles, bounds, pockets, 1, &mut paths);
        paths.insert(0, primary);
        paths
    }

    fn follow_collisions(
        &self,
        path: &TrajectoryPath,
        obstacles: &[Ball],
        bounds: &Region,
        pockets: &[Pocket],
        depth: usize,
        out: &mut Vec<TrajectoryPath>,
    ) {
        for event in path.ball_hits() {
            out.extend(self.follow_struck(event, obstacles, bounds, pockets, depth));
        }
    }

    /// The path of the ball struck in `event`, followed by the paths it sets
    /// in motion in turn. `depth` is the generation of the struck ball
    /// (1 for a ball hit by the primary path); empty past `MAX_CHAIN_DEPTH`
    /// or for non-ball events.
    pub fn follow_struck(
        &self,
        event: &CollisionEvent,
        obstacles: &[Ball],
        bounds: &Region,
        pockets: &[Pocket],
        depth: usize,
    ) -> Vec<TrajectoryPath> {
        let CollisionKind::Ball { ball_type, impact_angle, impact_speed, .. } = event.kind else {
            return Vec::new();
        };
        if depth > MAX_CHAIN_DEPTH {
            return Vec::new();
        }
        let Some(struck) = obstacles.iter().find(|b| b.ball_type == ball_type) else {
            return Vec::new();
        };
        let remaining: Vec<Ball> = obstacles.iter().filter(|b| b.ball_type != ball_type).copied().collect();
        let secondary = self.simulate_secondary(struck, impact_angle, impact_speed, bounds, &remaining, pockets);

        let mut chain = Vec::new();
        self.follow_collisions(&secondary, &remaining, bounds, pockets, depth + 1, &mut chain);
        chain.insert(0, secondary);
        chain
    }

    fn integrate(
        &self,
        ball: &Ball,
        initial_velocity: Point,
        budget: Budget,
        bounds: &Region,
        obstacles: &[Ball],
        pockets: &[Pocket],
    ) -> TrajectoryPath {
        let p = &self.physics;
        let dt = p.time_step;
        let max_steps = budget.max_steps.min((budget.max_time / dt + 1e-9).floor() as usize);

        let mut path = TrajectoryPath::start(ball.ball_type, ball.position);
        let mut position = ball.position;
        let mut velocity = initial_velocity;

        while path.steps < max_steps {
            let speed = velocity.length();
            if speed < p.min_velocity {
                break;
            }
            let step_start = path.steps as f64 * dt;
            path.steps += 1;
            let tentative = position + velocity.scale(dt);

            // 1. Ball contact ends the path.
            if let Some((t, struck)) = earliest_contact(position, tentative, ball.radius, obstacles, p.collision_margin) {
                let contact = position + (tentative - position).scale(t);
                path.waypoints.push(contact);
                path.collisions.push(CollisionEvent {
                    point: contact,
                    time: step_start + t * dt,
                    kind: CollisionKind::Ball {
                        ball_type: struck.ball_type,
                        ball_position: struck.position,
                        impact_angle: contact.angle_to(struck.position),
                        impact_speed: speed,
                    },
                });
                trace!("{} hit {} at {:?}", ball.ball_type, struck.ball_type, contact);
                return path.finish();
            }

            // 2. Cushions.
            let mut next = tentative;
            let time = step_start + dt;
            if next.x < bounds.left || next.x > bounds.right {
                let side = if next.x < bounds.left { WallSide::Left } else { WallSide::Right };
                next.x = next.x.clamp(bounds.left, bounds.right);
                let before = velocity.length();
                velocity.x = -velocity.x * p.restitution;
                path.collisions.push(wall_event(next, time, side, before, velocity.length()));
            }
            if next.y < bounds.top || next.y > bounds.bottom {
                let side = if next.y < bounds.top { WallSide::Top } else { WallSide::Bottom };
                next.y = next.y.clamp(bounds.top, bounds.bottom);
                let before = velocity.length();
                velocity.y = -velocity.y * p.restitution;
                path.collisions.push(wall_event(next, time, side, before, velocity.length()));
            }

            position = next;
            path.waypoints.push(position);

            // 3. Pockets.
            if let Some(pocket) = pockets.iter().find(|pk| pk.captures(position)) {
                path.collisions.push(CollisionEvent {
                    point: position,
                    time,
                    kind: CollisionKind::Pocket { pocket: pocket.name },
                });
                path.pocket_prediction = Some(*pocket);
                return path.finish();
            }

            velocity = velocity.scale(p.friction);
        }

        path.finish()
    }
}

fn wall_event(point: Point, time: f64, side: WallSide, speed_before: f64, speed_after: f64) -> CollisionEvent {
    CollisionEvent {
        point,
        time,
        kind: CollisionKind::Wall { side, speed_before, speed_after },
    }
}

/// Earliest fraction `t` of the segment `from -> to` at which a ball of
/// `radius` touches an obstacle. Ties keep the first obstacle in the list.
fn earliest_contact<'a>(
    from: Point,
    to: Point,
    radius: f64,
    obstacles: &'a [Ball],
    margin: f64,
) -> Option<(f64, &'a Ball)> {
    let travel = to - from;
    let a = travel.dot(travel);
    let mut best: Option<(f64, &Ball)> = None;

    for obstacle in obstacles {
        let reach = radius + obstacle.radius + margin;
        let offset = from - obstacle.position;
        let b = 2.0 * offset.dot(travel);
        let c = offset.dot(offset) - reach * reach;

        let t = if c <= 0.0 {
            // Already touching: only a contact if still closing in.
            if b < 0.0 { Some(0.0) } else { None }
        } else if a <= f64::EPSILON {
            None
        } else {
            let discriminant = b * b - 4.0 * a * c;
            if discriminant < 0.0 {
                None
            } else {
                let t = (-b - discriminant.sqrt()) / (2.0 * a);
                (0.0..=1.0).contains(&t).then_some(t)
            }
        };

        if let Some(t) = t {
            if best.is_none_or(|(bt, _)| t < bt) {
                best = Some((t, obstacle));
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_4;

    fn cue_at(x: f64, y: f64) -> Ball {
        Ball::new(BallType::Cue, Point::new(x, y), 12.0)
    }

    fn simulator() -> TrajectorySimulator {
        TrajectorySimulator::new(PhysicsConfig::default())
    }

    #[test]
    fn single_right_wall_bounce_then_rest() {
        let bounds = Region::new(0.0, 0.0, 500.0, 500.0);
        let path = simulator().simulate(&cue_at(100.0, 100.0), 0.0, 1.0, &bounds, &[], &[]);

        assert_eq!(path.collisions.len(), 1);
        let event = path.collisions[0];
        assert_abs_diff_eq!(event.point.x, 500.0);
        assert!(matches!(event.kind, CollisionKind::Wall { side: WallSide::Right, .. }));

        let end = path.end_point().expect("waypoints");
        assert!(end.x > 350.0 && end.x < 450.0, "stopped at {end:?}");
        assert_abs_diff_eq!(end.y, 100.0);
        assert!(path.steps < PhysicsConfig::default().max_trajectory_steps);
        assert!(path.confidence < 0.9 && path.confidence > 0.5);
    }

    #[test]
    fn pocket_capture_ends_the_path() {
        let bounds = Region::new(0.0, 0.0, 600.0, 600.0);
        let pocket = Pocket::new(PocketName::BottomRight, Point::new(500.0, 500.0), 25.0);
        let path = simulator().simulate(&cue_at(300.0, 300.0), FRAC_PI_4, 1.0, &bounds, &[], &[pocket]);

        assert_eq!(path.pocket_prediction, Some(pocket));
        let last = path.end_point().expect("waypoints");
        assert!(pocket.captures(last));
        // Only the final waypoint is inside the capture radius.
        let inside = path.waypoints.iter().filter(|p| pocket.captures(**p)).count();
        assert_eq!(inside, 1);
        assert!(matches!(
            path.collisions.last().map(|e| e.kind),
            Some(CollisionKind::Pocket { pocket: PocketName::BottomRight })
        ));
    }

    #[test]
    fn zero_power_stays_put() {
        let bounds = Region::new(0.0, 0.0, 500.0, 500.0);
        let path = simulator().simulate(&cue_at(100.0, 100.0), 1.0, 0.0, &bounds, &[], &[]);
        assert_eq!(path.waypoints, vec![Point::new(100.0, 100.0)]);
        assert!(path.collisions.is_empty());
        assert_eq!(path.steps, 0);
        assert_eq!(path.confidence, 1.0);
    }

    #[test]
    fn launch_slower_than_min_velocity_stays_put() {
        let bounds = Region::new(0.0, 0.0, 500.0, 500.0);
        let physics = PhysicsConfig::default();
        let power = 0.01;
        assert!(power * physics.velocity_scale < physics.min_velocity);
        let path = simulator().simulate(&cue_at(100.0, 100.0), 0.3, power, &bounds, &[], &[]);
        assert_eq!(path.waypoints, vec![Point::new(100.0, 100.0)]);
        assert!(path.collisions.is_empty());
        assert!(path.pocket_prediction.is_none());
        assert_eq!(path.steps, 0);
    }

    #[test]
    fn identical_inputs_give_identical_paths() {
        let bounds = Region::new(0.0, 0.0, 400.0, 300.0);
        let obstacles = [Ball::new(BallType::Solid(5), Point::new(320.0, 90.0), 12.0)];
        let pockets = [Pocket::new(PocketName::TopLeft, Point::new(0.0, 0.0), 26.0)];
        let sim = simulator();
        let a = sim.simulate(&cue_at(50.0, 200.0), -0.7, 0.9, &bounds, &obstacles, &pockets);
        let b = sim.simulate(&cue_at(50.0, 200.0), -0.7, 0.9, &bounds, &obstacles, &pockets);
        assert_eq!(a, b);
    }

    #[test]
    fn wall_bounces_never_gain_speed() {
        let bounds = Region::new(0.0, 0.0, 200.0, 120.0);
        let path = simulator().simulate(&cue_at(30.0, 40.0), 0.6, 1.0, &bounds, &[], &[]);
        assert!(path.wall_hits() >= 2);
        for event in &path.collisions {
            if let CollisionKind::Wall { speed_before, speed_after, .. } = event.kind {
                assert!(speed_after <= speed_before);
            }
        }
    }

    #[test]
    fn ball_contact_is_resolved_on_the_travel_segment() {
        let bounds = Region::new(0.0, 0.0, 800.0, 400.0);
        let target = Ball::new(BallType::Solid(1), Point::new(300.0, 200.0), 12.0);
        let path = simulator().simulate(&cue_at(100.0, 200.0), 0.0, 1.0, &bounds, &[target], &[]);

        let event = path.ball_hits().next().copied().expect("ball contact");
        assert_abs_diff_eq!(event.point.x, 300.0 - 24.5, epsilon = 1e-9);
        assert_eq!(path.end_point(), Some(event.point));
        match event.kind {
            CollisionKind::Ball { ball_type, impact_angle, .. } => {
                assert_eq!(ball_type, BallType::Solid(1));
                assert_abs_diff_eq!(impact_angle, 0.0, epsilon = 1e-12);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_abs_diff_eq!(path.confidence, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn multiple_trajectories_follow_struck_balls() {
        let bounds = Region::new(0.0, 0.0, 800.0, 400.0);
        let obstacles = [
            Ball::new(BallType::Solid(1), Point::new(300.0, 200.0), 12.0),
            Ball::new(BallType::Stripe(9), Point::new(380.0, 200.0), 12.0),
        ];
        let paths = simulator().simulate_multiple(&cue_at(100.0, 200.0), 0.0, 1.0, &bounds, &obstacles, &[]);

        let owners: Vec<BallType> = paths.iter().map(|p| p.ball_type).collect();
        assert_eq!(owners, vec![BallType::Cue, BallType::Solid(1), BallType::Stripe(9)]);
        assert_eq!(paths[0].first_struck(), Some(BallType::Solid(1)));
        assert_eq!(paths[1].first_struck(), Some(BallType::Stripe(9)));
        assert!(paths[2].first_struck().is_none());
    }

    #[test]
    fn secondary_path_uses_transferred_speed_and_half_budget() {
        let physics = PhysicsConfig { max_trajectory_steps: 40, ..PhysicsConfig::default() };
        let sim = TrajectorySimulator::new(physics);
        let bounds = Region::new(0.0, 0.0, 2000.0, 400.0);
        let struck = Ball::new(BallType::Eight, Point::new(100.0, 200.0), 12.0);
        let path = sim.simulate_secondary(&struck, 0.0, 400.0, &bounds, &[], &[]);

        assert_eq!(path.ball_type, BallType::Eight);
        assert_eq!(path.steps, 20);
        let first = path.waypoints[1];
        assert_abs_diff_eq!(first.x - 100.0, 400.0 * TRANSFER_FACTOR / 60.0, epsilon = 1e-9);
    }
}
