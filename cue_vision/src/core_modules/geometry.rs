// THEORY:
// The `geometry` module is the shared vocabulary of every other layer. Pixel
// scans, clustering, the simulator and the evaluator all speak in `Point`s
// and `Region`s measured in frame units (pixels), so these types are plain
// `Copy` values with no knowledge of images or physics.
//
// A `Region` is always normalized: `left <= right` and `top <= bottom`. The
// constructor swaps inverted edges instead of rejecting them, so any two
// corners describe a valid rectangle.

use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// A 2D point (or vector) in frame units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Unit vector pointing along `angle` (radians, 0 = +x, counter-clockwise
    /// towards +y in frame coordinates).
    pub fn from_angle(angle: f64) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    pub fn distance_to(&self, other: Point) -> f64 {
        (*self - other).length()
    }

    pub fn length(&self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn dot(&self, other: Point) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Angle of the vector from `self` to `other`.
    pub fn angle_to(&self, other: Point) -> f64 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    /// Returns the unit vector, or `None` for a (near) zero vector.
    pub fn normalized(&self) -> Option<Point> {
        let len = self.length();
        if len < f64::EPSILON {
            None
        } else {
            Some(Point::new(self.x / len, self.y / len))
        }
    }

    pub fn scale(&self, factor: f64) -> Point {
        Point::new(self.x * factor, self.y * factor)
    }

    /// Mean of a set of points. `None` for an empty set.
    pub fn centroid(points: &[Point]) -> Option<Point> {
        if points.is_empty() {
            return None;
        }
        let sum = points.iter().fold(Point::ZERO, |acc, p| acc + *p);
        Some(sum.scale(1.0 / points.len() as f64))
    }
}

impl std::ops::Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::AddAssign for Point {
    fn add_assign(&mut self, rhs: Point) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

/// An axis-aligned rectangle. Table bounds and scan windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Region {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn diagonal(&self) -> f64 {
        self.width().hypot(self.height())
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left && point.x <= self.right && point.y >= self.top && point.y <= self.bottom
    }

    /// Shrinks every edge by `amount`. Collapses to the center line instead of
    /// inverting when the rectangle is too small.
    pub fn inset(&self, amount: f64) -> Region {
        let center = self.center();
        let half_w = (self.width() / 2.0 - amount).max(0.0);
        let half_h = (self.height() / 2.0 - amount).max(0.0);
        Region::new(
            center.x - half_w,
            center.y - half_h,
            center.x + half_w,
            center.y + half_h,
        )
    }

    pub fn intersection(&self, other: &Region) -> Option<Region> {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right.min(other.right);
        let bottom = self.bottom.min(other.bottom);
        if left > right || top > bottom {
            None
        } else {
            Some(Region { left, top, right, bottom })
        }
    }

    /// Intersection over union, 0 for disjoint or degenerate rectangles.
    pub fn iou(&self, other: &Region) -> f64 {
        let inter = self.intersection(other).map_or(0.0, |r| r.area());
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }

    /// Largest absolute difference between corresponding edges.
    pub fn max_edge_delta(&self, other: &Region) -> f64 {
        (self.left - other.left)
            .abs()
            .max((self.top - other.top).abs())
            .max((self.right - other.right).abs())
            .max((self.bottom - other.bottom).abs())
    }
}

/// Perpendicular distance from `point` to the infinite line through `a` and
/// `b`. Falls back to the point distance when `a == b`.
pub fn distance_to_line(point: Point, a: Point, b: Point) -> f64 {
    let dir = b - a;
    let len = dir.length();
    if len < f64::EPSILON {
        return point.distance_to(a);
    }
    ((point.x - a.x) * dir.y - (point.y - a.y) * dir.x).abs() / len
}

/// Distance from `point` to the segment `a`–`b`.
pub fn distance_to_segment(point: Point, a: Point, b: Point) -> f64 {
    let dir = b - a;
    let len_sq = dir.dot(dir);
    if len_sq < f64::EPSILON {
        return point.distance_to(a);
    }
    let t = ((point - a).dot(dir) / len_sq).clamp(0.0, 1.0);
    point.distance_to(a + dir.scale(t))
}

/// Wraps an angle into `(-PI, PI]`.
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle.rem_euclid(TAU);
    if a > PI {
        a -= TAU;
    }
    a
}

/// Smallest absolute difference between two angles, in `[0, PI]`.
pub fn angle_difference(a: f64, b: f64) -> f64 {
    normalize_angle(a - b).abs()
}

/// Unsigned angle at `vertex` between the rays towards `a` and `b`, in
/// `[0, PI]`.
pub fn angle_between(vertex: Point, a: Point, b: Point) -> f64 {
    angle_difference(vertex.angle_to(a), vertex.angle_to(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn region_normalizes_inverted_corners() {
        let r = Region::new(10.0, 50.0, 0.0, 20.0);
        assert_eq!(r, Region { left: 0.0, top: 20.0, right: 10.0, bottom: 50.0 });
        assert_abs_diff_eq!(r.area(), 300.0);
    }

    #[test]
    fn line_distance_covers_both_directions() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, 0.0);
        assert_abs_diff_eq!(distance_to_line(Point::new(-20.0, 3.0), a, b), 3.0);
        assert_abs_diff_eq!(distance_to_segment(Point::new(-20.0, 3.0), a, b), 409f64.sqrt());
    }

    #[test]
    fn angle_helpers_wrap() {
        assert_abs_diff_eq!(normalize_angle(3.0 * PI), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(angle_difference(0.1, TAU - 0.1), 0.2, epsilon = 1e-12);
        let vertex = Point::new(0.0, 0.0);
        assert_abs_diff_eq!(
            angle_between(vertex, Point::new(1.0, 0.0), Point::new(0.0, 5.0)),
            PI / 2.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn iou_of_identical_and_disjoint_regions() {
        let r = Region::new(0.0, 0.0, 10.0, 10.0);
        assert_abs_diff_eq!(r.iou(&r), 1.0);
        assert_eq!(r.iou(&Region::new(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn inset_never_inverts() {
        let r = Region::new(0.0, 0.0, 10.0, 100.0).inset(8.0);
        assert_eq!(r, Region::new(5.0, 8.0, 5.0, 92.0));
    }
}
