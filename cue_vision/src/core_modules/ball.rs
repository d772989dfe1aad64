// THEORY:
// The `ball` module holds the "dumb" data containers every layer above the
// detectors exchanges: balls, pockets and the `GameState` snapshot built once
// per detection cycle.
//
// Key principles:
// 1.  **Identity by type**: object balls are identified by their `BallType`.
//     `GameState` refuses a second ball of an already present type and keeps
//     object balls ordered by type, so iteration order never depends on the
//     order in which clusters happened to be found.
// 2.  **Whole snapshots**: a `GameState` is never patched across frames. Each
//     cycle builds a new one; `differs_significantly` is the test a caller uses
//     to decide whether the new snapshot replaces the one it holds.

use crate::core_modules::geometry::{Point, Region, angle_difference};
use image::Rgb;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_BALL_RADIUS: f64 = 8.0;
pub const MAX_BALL_RADIUS: f64 = 25.0;
/// Pocket capture radius relative to the ball radius.
pub const POCKET_RADIUS_FACTOR: f64 = 2.2;

/// Ball identity. Solids carry 1..=7, stripes 9..=15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BallType {
    Cue,
    Solid(u8),
    Eight,
    Stripe(u8),
}

impl BallType {
    /// Maps a ball number (0 = cue) to its type.
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            0 => Some(BallType::Cue),
            1..=7 => Some(BallType::Solid(number)),
            8 => Some(BallType::Eight),
            9..=15 => Some(BallType::Stripe(number)),
            _ => None,
        }
    }

    pub fn number(&self) -> u8 {
        match *self {
            BallType::Cue => 0,
            BallType::Solid(n) | BallType::Stripe(n) => n,
            BallType::Eight => 8,
        }
    }

    pub fn is_solid(&self) -> bool {
        matches!(self, BallType::Solid(_))
    }

    pub fn is_stripe(&self) -> bool {
        matches!(self, BallType::Stripe(_))
    }

    /// The stripe for a solid and vice versa. Same base color.
    pub fn sibling(&self) -> Option<Self> {
        match *self {
            BallType::Solid(n) => Some(BallType::Stripe(n + 8)),
            BallType::Stripe(n) => Some(BallType::Solid(n - 8)),
            _ => None,
        }
    }

    /// Base color of the ball's face as it appears in a frame.
    pub fn color(&self) -> Rgb<u8> {
        match self.number() {
            0 => Rgb([255, 255, 255]),
            1 | 9 => Rgb([255, 214, 0]),
            2 | 10 => Rgb([0, 0, 179]),
            3 | 11 => Rgb([219, 0, 0]),
            4 | 12 => Rgb([99, 0, 140]),
            5 | 13 => Rgb([255, 99, 0]),
            6 | 14 => Rgb([0, 120, 0]),
            7 | 15 => Rgb([130, 31, 31]),
            _ => Rgb([10, 10, 10]),
        }
    }
}

impl fmt::Display for BallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BallType::Cue => write!(f, "cue"),
            BallType::Solid(n) => write!(f, "solid-{n}"),
            BallType::Eight => write!(f, "eight"),
            BallType::Stripe(n) => write!(f, "stripe-{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    pub position: Point,
    pub radius: f64,
    pub ball_type: BallType,
    pub velocity: Option<Point>,
}

impl Ball {
    pub fn new(ball_type: BallType, position: Point, radius: f64) -> Self {
        Self {
            position,
            radius: radius.clamp(MIN_BALL_RADIUS, MAX_BALL_RADIUS),
            ball_type,
            velocity: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PocketName {
    TopLeft,
    TopMiddle,
    TopRight,
    BottomLeft,
    BottomMiddle,
    BottomRight,
}

impl PocketName {
    pub const ALL: [PocketName; 6] = [
        PocketName::TopLeft,
        PocketName::TopMiddle,
        PocketName::TopRight,
        PocketName::BottomLeft,
        PocketName::BottomMiddle,
        PocketName::BottomRight,
    ];

    /// Where this pocket sits on a table with the given bounds.
    pub fn position_on(&self, table: &Region) -> Point {
        let mid_x = (table.left + table.right) / 2.0;
        match self {
            PocketName::TopLeft => Point::new(table.left, table.top),
            PocketName::TopMiddle => Point::new(mid_x, table.top),
            PocketName::TopRight => Point::new(table.right, table.top),
            PocketName::BottomLeft => Point::new(table.left, table.bottom),
            PocketName::BottomMiddle => Point::new(mid_x, table.bottom),
            PocketName::BottomRight => Point::new(table.right, table.bottom),
        }
    }
}

impl fmt::Display for PocketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PocketName::TopLeft => "top-left",
            PocketName::TopMiddle => "top-middle",
            PocketName::TopRight => "top-right",
            PocketName::BottomLeft => "bottom-left",
            PocketName::BottomMiddle => "bottom-middle",
            PocketName::BottomRight => "bottom-right",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pocket {
    pub position: Point,
    pub radius: f64,
    pub name: PocketName,
}

impl Pocket {
    pub fn new(name: PocketName, position: Point, radius: f64) -> Self {
        Self { position, radius, name }
    }

    /// A point is captured once it is within the pocket's capture radius.
    pub fn captures(&self, point: Point) -> bool {
        self.position.distance_to(point) <= self.radius
    }
}

/// Thresholds for `GameState::differs_significantly`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignificanceThresholds {
    /// Movement (frame units) of a ball or table edge that counts as a change.
    pub position: f64,
    /// Rotation (radians) of the cue direction that counts as a change.
    pub direction: f64,
}

impl Default for SignificanceThresholds {
    fn default() -> Self {
        Self { position: 5.0, direction: 0.05 }
    }
}

/// The complete result of one detection cycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GameState {
    pub table: Option<Region>,
    pub cue_ball: Option<Ball>,
    object_balls: Vec<Ball>,
    pub pockets: Vec<Pocket>,
    pub cue_direction: Option<f64>,
    pub aim_target: Option<Point>,
    /// Overall detection confidence in `[0, 1]`.
    pub confidence: f64,
}

impl GameState {
    pub fn new(table: Option<Region>) -> Self {
        Self { table, ..Self::default() }
    }

    /// Adds an object ball. Returns `false` (and keeps the existing ball) if
    /// a ball of that type is already present or the ball is a cue ball.
    pub fn insert_object_ball(&mut self, ball: Ball) -> bool {
        if ball.ball_type == BallType::Cue {
            return false;
        }
        match self.object_balls.binary_search_by(|b| b.ball_type.cmp(&ball.ball_type)) {
            Ok(_) => false,
            Err(idx) => {
                self.object_balls.insert(idx, ball);
                true
            }
        }
    }

    pub fn object_balls(&self) -> &[Ball] {
        &self.object_balls
    }

    pub fn object_ball(&self, ball_type: BallType) -> Option<&Ball> {
        self.object_balls.iter().find(|b| b.ball_type == ball_type)
    }

    pub fn has_type(&self, ball_type: BallType) -> bool {
        self.object_ball(ball_type).is_some()
    }

    /// Change-significance test between two snapshots.
    pub fn differs_significantly(&self, other: &GameState, thresholds: &SignificanceThresholds) -> bool {
        match (&self.table, &other.table) {
            (Some(a), Some(b)) if a.max_edge_delta(b) > thresholds.position => return true,
            (Some(_), None) | (None, Some(_)) => return true,
            _ => {}
        }

        match (&self.cue_ball, &other.cue_ball) {
            (Some(a), Some(b)) if a.position.distance_to(b.position) > thresholds.position => return true,
            (Some(_), None) | (None, Some(_)) => return true,
            _ => {}
        }

        if self.object_balls.len() != other.object_balls.len() {
            return true;
        }
        for (a, b) in self.object_balls.iter().zip(other.object_balls.iter()) {
            if a.ball_type != b.ball_type || a.position.distance_to(b.position) > thresholds.position {
                return true;
            }
        }

        match (self.cue_direction, other.cue_direction) {
            (Some(a), Some(b)) => angle_difference(a, b) > thresholds.direction,
            (None, None) => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ball(ball_type: BallType, x: f64, y: f64) -> Ball {
        Ball::new(ball_type, Point::new(x, y), 12.0)
    }

    #[test]
    fn ball_at_pocket_center_is_always_captured() {
        for radius in [0.0, 1.0, 26.4, 55.0] {
            for (x, y) in [(0.0, 0.0), (500.0, 500.0), (-3.5, 1e6)] {
                let pocket = Pocket::new(PocketName::TopLeft, Point::new(x, y), radius);
                let b = ball(BallType::Cue, x, y);
                assert!(pocket.captures(b.position));
            }
        }
    }

    #[test]
    fn object_balls_are_unique_by_type_and_ordered() {
        let mut state = GameState::new(None);
        assert!(state.insert_object_ball(ball(BallType::Stripe(9), 1.0, 1.0)));
        assert!(state.insert_object_ball(ball(BallType::Solid(3), 2.0, 2.0)));
        assert!(state.insert_object_ball(ball(BallType::Eight, 3.0, 3.0)));
        assert!(!state.insert_object_ball(ball(BallType::Solid(3), 9.0, 9.0)));
        assert!(!state.insert_object_ball(ball(BallType::Cue, 9.0, 9.0)));

        let types: Vec<_> = state.object_balls().iter().map(|b| b.ball_type).collect();
        assert_eq!(types, vec![BallType::Solid(3), BallType::Eight, BallType::Stripe(9)]);
        assert_eq!(state.object_ball(BallType::Solid(3)).map(|b| b.position.x), Some(2.0));
    }

    #[test]
    fn radius_is_clamped_to_ball_range() {
        assert_eq!(ball(BallType::Eight, 0.0, 0.0).radius, 12.0);
        assert_eq!(Ball::new(BallType::Eight, Point::ZERO, 3.0).radius, MIN_BALL_RADIUS);
        assert_eq!(Ball::new(BallType::Eight, Point::ZERO, 40.0).radius, MAX_BALL_RADIUS);
    }

    #[test]
    fn small_jitter_is_not_significant() {
        let thresholds = SignificanceThresholds::default();
        let mut a = GameState::new(Some(Region::new(0.0, 0.0, 800.0, 400.0)));
        a.cue_ball = Some(ball(BallType::Cue, 100.0, 100.0));
        a.insert_object_ball(ball(BallType::Solid(1), 300.0, 200.0));
        a.cue_direction = Some(0.5);

        let mut b = a.clone();
        b.cue_ball = Some(ball(BallType::Cue, 102.0, 101.0));
        b.cue_direction = Some(0.52);
        assert!(!a.differs_significantly(&b, &thresholds));

        b.cue_direction = None;
        assert!(a.differs_significantly(&b, &thresholds));

        let mut c = a.clone();
        c.insert_object_ball(ball(BallType::Solid(2), 400.0, 200.0));
        assert!(a.differs_significantly(&c, &thresholds));
    }

    #[test]
    fn ball_numbers_round_trip_through_types() {
        for n in 0..=15u8 {
            let t = BallType::from_number(n).expect("valid number");
            assert_eq!(t.number(), n);
        }
        assert_eq!(BallType::from_number(16), None);
        assert_eq!(BallType::Solid(4).sibling(), Some(BallType::Stripe(12)));
    }
}
