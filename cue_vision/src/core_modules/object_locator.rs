// THEORY:
// The `object_locator` turns a frame plus known table bounds into the objects
// on the table. It is the Object Grouping Layer: pixels are first classified by
// color, then grouped into spatially coherent clusters, and only clusters with
// a ball-like shape survive.
//
// Key architectural principles & algorithm steps:
// 1.  **Pockets first**: the six pocket positions are fixed by the table
//     bounds, so each is confirmed by sampling a local window for the pocket
//     color. Confirmed pockets are masked out of the ball scan; a dark pocket
//     would otherwise look exactly like the eight ball.
// 2.  **One pass, many colors**: the table is sampled once on a stride-2 grid
//     and every sample is tested against each candidate ball color.
// 3.  **Clustering**: samples of one color are linked when closer than the
//     link distance. A spatial hash keeps each lookup local, and clusters are
//     grown breadth-first in scan order so the output never depends on hash
//     iteration order.
// 4.  **Shape from the outline**: a cluster's radius is the mean distance of
//     its boundary samples from the centroid, and circularity measures how
//     tightly those boundary distances agree. Interior samples carry no shape
//     information and would drag both numbers towards the center.
// 5.  **Direction from guide pixels**: the aiming guide is a line of
//     yellow/white pixels. Points that have at least two companions on their
//     own line through the cue ball are "aligned"; their mean is the aim
//     target.

use crate::config::DetectionConfig;
use crate::core_modules::ball::{
    Ball, BallType, GameState, MAX_BALL_RADIUS, MIN_BALL_RADIUS, Pocket, PocketName,
};
use crate::core_modules::frame::{ColorMatchCache, Frame};
use crate::core_modules::geometry::{Point, Region, distance_to_line, normalize_angle};
use image::Rgb;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

/// Pixel stride of the ball and pocket scans.
pub const BALL_SAMPLE_STRIDE: u32 = 2;
/// Samples closer than this belong to the same cluster.
const CLUSTER_LINK_DISTANCE: f64 = 3.0;
const MIN_CLUSTER_POINTS: usize = 12;
const MIN_CUE_CIRCULARITY: f64 = 0.7;
/// Share of white samples inside a colored ball that marks it as a stripe.
const STRIPE_WHITE_FRACTION: f64 = 0.2;

pub const POCKET_COLOR: Rgb<u8> = Rgb([10, 10, 10]);
const MIN_POCKET_FRACTION: f64 = 0.25;

const GUIDE_COLORS: [Rgb<u8>; 3] = [Rgb([255, 255, 0]), Rgb([255, 255, 160]), Rgb([255, 255, 255])];
const GUIDE_SAMPLE_STRIDE: u32 = 3;
/// Guide pixels must lie in `(MIN, MAX]` from the cue ball.
const GUIDE_MIN_DISTANCE: f64 = 50.0;
const GUIDE_MAX_DISTANCE: f64 = 200.0;
const GUIDE_LINE_TOLERANCE: f64 = 15.0;
const MIN_ALIGNED_COMPANIONS: usize = 2;
const MIN_ALIGNED_POINTS: usize = 3;
/// Upper bound on guide candidates, taken in scan order.
const MAX_GUIDE_CANDIDATES: usize = 2_000;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
/// One representative per object-ball color; stripes share the solid's color.
const OBJECT_COLORS: [BallType; 8] = [
    BallType::Solid(1),
    BallType::Solid(2),
    BallType::Solid(3),
    BallType::Solid(4),
    BallType::Solid(5),
    BallType::Solid(6),
    BallType::Solid(7),
    BallType::Eight,
];

/// Centroid, radius and circularity of one color cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobShape {
    pub center: Point,
    pub radius: f64,
    /// `1 - mean|d - radius| / radius` over boundary samples, in `[0, 1]`.
    pub circularity: f64,
}

/// Finds pockets, balls and the cue direction inside `table`. The returned
/// state carries `table` as its bounds and a zero confidence; scoring the
/// detection is the caller's concern.
pub fn locate_objects(frame: &Frame, table: &Region, config: &DetectionConfig) -> GameState {
    let mut cache = ColorMatchCache::new();
    let mut state = GameState::new(Some(*table));

    let pockets = detect_pockets(frame, table, config, &mut cache);
    // Mask with the raw positions, widened by one sample step.
    let masks: Vec<(Point, f64)> = pockets
        .iter()
        .map(|p| (p.position - config.pocket_offset, p.radius + BALL_SAMPLE_STRIDE as f64))
        .collect();

    let samples = collect_ball_samples(frame, table, config, &masks, &mut cache);

    let cue = samples
        .get(&WHITE.0)
        .map(|points| cluster_points(points, CLUSTER_LINK_DISTANCE, MIN_CLUSTER_POINTS))
        .unwrap_or_default()
        .iter()
        .filter_map(|cluster| measure_blob(cluster, BALL_SAMPLE_STRIDE as f64))
        .filter(|shape| is_ball_sized(shape) && shape.circularity > MIN_CUE_CIRCULARITY)
        .fold(None::<BlobShape>, |best, shape| match best {
            Some(b) if b.circularity >= shape.circularity => Some(b),
            _ => Some(shape),
        });

    if let Some(shape) = cue {
        state.cue_ball = Some(Ball::new(BallType::Cue, shape.center + config.ball_offset, shape.radius));
        if let Some((direction, aim)) = infer_cue_direction(frame, table, shape.center, config, &mut cache) {
            state.cue_direction = Some(direction);
            state.aim_target = Some(aim);
        }
    }

    for base in OBJECT_COLORS {
        let Some(points) = samples.get(&base.color().0) else {
            continue;
        };
        for cluster in cluster_points(points, CLUSTER_LINK_DISTANCE, MIN_CLUSTER_POINTS) {
            let Some(shape) = measure_blob(&cluster, BALL_SAMPLE_STRIDE as f64) else {
                continue;
            };
            if !is_ball_sized(&shape) {
                trace!("Rejected {} cluster with radius {:.1}", base, shape.radius);
                continue;
            }
            let Some(ball_type) = classify(frame, &shape, base, &state, config, &mut cache) else {
                debug!("No free type left for a {} cluster at {:?}", base, shape.center);
                continue;
            };
            state.insert_object_ball(Ball::new(ball_type, shape.center + config.ball_offset, shape.radius));
        }
    }

    state.pockets = pockets;
    debug!(
        "Located cue={} objects={} pockets={} direction={:?}",
        state.cue_ball.is_some(),
        state.object_balls().len(),
        state.pockets.len(),
        state.cue_direction
    );
    state
}

/// Confirms each of the six standard pocket positions by sampling a window of
/// half-size `pocket_radius` around it.
pub fn detect_pockets(
    frame: &Frame,
    table: &Region,
    config: &DetectionConfig,
    cache: &mut ColorMatchCache,
) -> Vec<Pocket> {
    let half = config.pocket_radius;
    PocketName::ALL
        .iter()
        .filter_map(|name| {
            let center = name.position_on(table);
            let window = Region::new(center.x - half, center.y - half, center.x + half, center.y + half);
            let (x0, y0, x1, y1) = frame.pixel_window(&window)?;

            let mut total = 0usize;
            let mut matched = 0usize;
            for y in (y0..y1).step_by(BALL_SAMPLE_STRIDE as usize) {
                for x in (x0..x1).step_by(BALL_SAMPLE_STRIDE as usize) {
                    total += 1;
                    if cache.matches(frame.pixel(x, y), POCKET_COLOR, config.color_tolerance) {
                        matched += 1;
                    }
                }
            }

            let fraction = matched as f64 / total.max(1) as f64;
            trace!("Pocket {} window match {:.2}", name, fraction);
            (fraction >= MIN_POCKET_FRACTION)
                .then(|| Pocket::new(*name, center + config.pocket_offset, config.pocket_radius))
        })
        .collect()
}

/// Samples the table once and buckets every sample by the candidate color it
/// matches (white plus each object-ball base color).
fn collect_ball_samples(
    frame: &Frame,
    table: &Region,
    config: &DetectionConfig,
    masks: &[(Point, f64)],
    cache: &mut ColorMatchCache,
) -> HashMap<[u8; 3], Vec<Point>> {
    let mut samples: HashMap<[u8; 3], Vec<Point>> = HashMap::new();
    let Some((x0, y0, x1, y1)) = frame.pixel_window(table) else {
        return samples;
    };
    let candidates: Vec<Rgb<u8>> = std::iter::once(WHITE)
        .chain(OBJECT_COLORS.iter().map(|t| t.color()))
        .collect();

    for y in (y0..y1).step_by(BALL_SAMPLE_STRIDE as usize) {
        for x in (x0..x1).step_by(BALL_SAMPLE_STRIDE as usize) {
            let point = Point::new(x as f64, y as f64);
            if masks.iter().any(|(c, r)| c.distance_to(point) <= *r) {
                continue;
            }
            let px = frame.pixel(x, y);
            if let Some(color) = candidates.iter().find(|c| cache.matches(px, **c, config.color_tolerance)) {
                samples.entry(color.0).or_default().push(point);
            }
        }
    }
    samples
}

/// Groups points whose chain of pairwise distances stays within `link`.
/// Clusters come out in the scan order of their first point.
pub fn cluster_points(points: &[Point], link: f64, min_size: usize) -> Vec<Vec<Point>> {
    let cell = |p: &Point| ((p.x / link).floor() as i64, (p.y / link).floor() as i64);
    let mut buckets: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (i, p) in points.iter().enumerate() {
        buckets.entry(cell(p)).or_default().push(i);
    }

    let mut assigned = vec![false; points.len()];
    let mut clusters = Vec::new();
    for start in 0..points.len() {
        if assigned[start] {
            continue;
        }
        assigned[start] = true;
        let mut queue = VecDeque::from([start]);
        let mut members = Vec::new();

        while let Some(i) = queue.pop_front() {
            let current = points[i];
            members.push(current);
            let (cx, cy) = cell(&current);
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let Some(bucket) = buckets.get(&(cx + dx, cy + dy)) else {
                        continue;
                    };
                    for &j in bucket {
                        if !assigned[j] && current.distance_to(points[j]) <= link {
                            assigned[j] = true;
                            queue.push_back(j);
                        }
                    }
                }
            }
        }

        if members.len() >= min_size {
            clusters.push(members);
        }
    }
    clusters
}

/// Measures a cluster sampled on a `stride` grid. Boundary samples are the
/// ones missing at least one 4-neighbor.
pub fn measure_blob(members: &[Point], stride: f64) -> Option<BlobShape> {
    let center = Point::centroid(members)?;
    let key = |p: Point| ((p.x / stride).round() as i64, (p.y / stride).round() as i64);
    let occupied: HashSet<(i64, i64)> = members.iter().map(|p| key(*p)).collect();

    let distances: Vec<f64> = members
        .iter()
        .filter(|p| {
            let (x, y) = key(**p);
            [(1, 0), (-1, 0), (0, 1), (0, -1)]
                .iter()
                .any(|(dx, dy)| !occupied.contains(&(x + dx, y + dy)))
        })
        .map(|p| p.distance_to(center))
        .collect();
    if distances.is_empty() {
        return None;
    }

    let mean = distances.iter().sum::<f64>() / distances.len() as f64;
    if mean <= 0.0 {
        return None;
    }
    let deviation = distances.iter().map(|d| (d - mean).abs()).sum::<f64>() / distances.len() as f64;
    Some(BlobShape {
        center,
        // Boundary samples sit up to one stride inside the true edge.
        radius: mean + stride / 2.0,
        circularity: (1.0 - deviation / mean).clamp(0.0, 1.0),
    })
}

fn is_ball_sized(shape: &BlobShape) -> bool {
    (MIN_BALL_RADIUS..=MAX_BALL_RADIUS).contains(&shape.radius)
}

/// Chooses the type for a cluster of `base` color: stripe when enough of the
/// disk is white, falling back to the sibling when the type is taken.
fn classify(
    frame: &Frame,
    shape: &BlobShape,
    base: BallType,
    state: &GameState,
    config: &DetectionConfig,
    cache: &mut ColorMatchCache,
) -> Option<BallType> {
    let preferred = match base {
        BallType::Solid(n) if white_fraction(frame, shape, config, cache) >= STRIPE_WHITE_FRACTION => {
            BallType::Stripe(n + 8)
        }
        other => other,
    };
    [Some(preferred), preferred.sibling()]
        .into_iter()
        .flatten()
        .find(|t| !state.has_type(*t))
}

fn white_fraction(frame: &Frame, shape: &BlobShape, config: &DetectionConfig, cache: &mut ColorMatchCache) -> f64 {
    let r = shape.radius;
    let disk = Region::new(shape.center.x - r, shape.center.y - r, shape.center.x + r, shape.center.y + r);
    let Some((x0, y0, x1, y1)) = frame.pixel_window(&disk) else {
        return 0.0;
    };
    let mut total = 0usize;
    let mut white = 0usize;
    for y in (y0..y1).step_by(BALL_SAMPLE_STRIDE as usize) {
        for x in (x0..x1).step_by(BALL_SAMPLE_STRIDE as usize) {
            if Point::new(x as f64, y as f64).distance_to(shape.center) > r {
                continue;
            }
            total += 1;
            if cache.matches(frame.pixel(x, y), WHITE, config.color_tolerance) {
                white += 1;
            }
        }
    }
    white as f64 / total.max(1) as f64
}

/// Infers the aim from guide-colored pixels around `cue`. Returns the
/// direction (with the learned offset applied) and the aim target, or `None`
/// when fewer than three aligned points exist.
pub fn infer_cue_direction(
    frame: &Frame,
    table: &Region,
    cue: Point,
    config: &DetectionConfig,
    cache: &mut ColorMatchCache,
) -> Option<(f64, Point)> {
    let (x0, y0, x1, y1) = frame.pixel_window(table)?;
    let mut candidates = Vec::new();
    'scan: for y in (y0..y1).step_by(GUIDE_SAMPLE_STRIDE as usize) {
        for x in (x0..x1).step_by(GUIDE_SAMPLE_STRIDE as usize) {
            let point = Point::new(x as f64, y as f64);
            let distance = point.distance_to(cue);
            if distance <= GUIDE_MIN_DISTANCE || distance > GUIDE_MAX_DISTANCE {
                continue;
            }
            let px = frame.pixel(x, y);
            if GUIDE_COLORS.iter().any(|c| cache.matches(px, *c, config.color_tolerance)) {
                candidates.push(point);
                if candidates.len() >= MAX_GUIDE_CANDIDATES {
                    break 'scan;
                }
            }
        }
    }

    let aligned: Vec<Point> = candidates
        .iter()
        .enumerate()
        .filter(|(i, p)| {
            candidates
                .iter()
                .enumerate()
                .filter(|(j, q)| j != i && distance_to_line(**q, cue, **p) <= GUIDE_LINE_TOLERANCE)
                .nth(MIN_ALIGNED_COMPANIONS - 1)
                .is_some()
        })
        .map(|(_, p)| *p)
        .collect();

    if aligned.len() < MIN_ALIGNED_POINTS {
        trace!("Cue direction: {} candidates, {} aligned", candidates.len(), aligned.len());
        return None;
    }
    let aim = Point::centroid(&aligned)?;
    Some((normalize_angle(cue.angle_to(aim) + config.direction_offset), aim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::test_support::{self, FELT, FRAME_H, FRAME_W, GUIDE, SceneBuilder, table_region};
    use approx::assert_abs_diff_eq;

    fn felt_scene() -> SceneBuilder {
        SceneBuilder::new(FRAME_W, FRAME_H).rect(table_region(), FELT)
    }

    fn dot(scene: SceneBuilder, x: f64, y: f64) -> SceneBuilder {
        scene.rect(Region::new(x, y, x, y), GUIDE)
    }

    #[test]
    fn guide_points_behind_the_cue_ball_count_as_companions() {
        let cue = Point::new(250.0, 250.0);
        let config = DetectionConfig::default();
        let ahead = || dot(dot(felt_scene(), 310.0, 250.0), 370.0, 250.0);

        let frame = dot(ahead(), 190.0, 250.0).build();
        let (direction, aim) = infer_cue_direction(&frame, &table_region(), cue, &config, &mut ColorMatchCache::new())
            .expect("line through the cue ball");
        assert_abs_diff_eq!(direction, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(aim.x, 290.0, epsilon = 1e-9);
        assert_abs_diff_eq!(aim.y, 250.0, epsilon = 1e-9);

        let frame = ahead().build();
        assert!(infer_cue_direction(&frame, &table_region(), cue, &config, &mut ColorMatchCache::new()).is_none());
    }

    #[test]
    fn full_scene_yields_every_object() {
        let frame = test_support::full_scene_frame();
        let state = locate_objects(&frame, &table_region(), &DetectionConfig::default());

        let cue = state.cue_ball.expect("cue ball");
        assert_abs_diff_eq!(cue.position.x, 250.0, epsilon = 1.0);
        assert_abs_diff_eq!(cue.position.y, 250.0, epsilon = 1.0);
        assert!((10.0..=14.0).contains(&cue.radius), "radius {}", cue.radius);

        let types: Vec<BallType> = state.object_balls().iter().map(|b| b.ball_type).collect();
        assert_eq!(types, vec![BallType::Solid(1), BallType::Solid(3)]);
        let one = state.object_ball(BallType::Solid(1)).expect("1-ball");
        assert_abs_diff_eq!(one.position.x, 450.0, epsilon = 1.0);
        assert_abs_diff_eq!(one.position.y, 330.0, epsilon = 1.0);

        assert_eq!(state.pockets.len(), 6);
        let direction = state.cue_direction.expect("direction");
        assert_abs_diff_eq!(direction, 0.0, epsilon = 0.05);
        let aim = state.aim_target.expect("aim");
        assert!(aim.x > 300.0 && aim.x < 440.0);
    }

    #[test]
    fn location_is_deterministic() {
        let frame = test_support::full_scene_frame();
        let config = DetectionConfig::default();
        assert_eq!(
            locate_objects(&frame, &table_region(), &config),
            locate_objects(&frame, &table_region(), &config)
        );
    }

    #[test]
    fn missing_guide_means_no_direction() {
        let frame = felt_scene()
            .ball(BallType::Cue, Point::new(300.0, 250.0), 12.0)
            .build();
        let state = locate_objects(&frame, &table_region(), &DetectionConfig::default());
        assert!(state.cue_ball.is_some());
        assert_eq!(state.cue_direction, None);
        assert_eq!(state.aim_target, None);
        assert!(state.pockets.is_empty());
    }

    #[test]
    fn elongated_white_shape_is_not_a_cue_ball() {
        let frame = felt_scene()
            .rect(Region::new(300.0, 200.0, 359.0, 207.0), WHITE)
            .build();
        let state = locate_objects(&frame, &table_region(), &DetectionConfig::default());
        assert_eq!(state.cue_ball, None);
    }

    #[test]
    fn white_center_marks_a_stripe_and_duplicates_use_the_sibling() {
        let frame = felt_scene()
            .ball(BallType::Solid(2), Point::new(300.0, 200.0), 12.0)
            .disk(Point::new(300.0, 200.0), 6.0, WHITE)
            .ball(BallType::Solid(1), Point::new(400.0, 300.0), 12.0)
            .ball(BallType::Solid(1), Point::new(500.0, 300.0), 12.0)
            .build();
        let state = locate_objects(&frame, &table_region(), &DetectionConfig::default());
        let types: Vec<BallType> = state.object_balls().iter().map(|b| b.ball_type).collect();
        assert_eq!(types, vec![BallType::Solid(1), BallType::Stripe(9), BallType::Stripe(10)]);
        assert_eq!(state.cue_ball, None);
    }

    #[test]
    fn eight_ball_colored_pocket_is_masked() {
        let frame = test_support::full_scene_frame();
        let state = locate_objects(&frame, &table_region(), &DetectionConfig::default());
        assert!(!state.has_type(BallType::Eight));
    }

    #[test]
    fn offsets_shift_reported_positions() {
        let frame = test_support::full_scene_frame();
        let config = DetectionConfig {
            ball_offset: Point::new(2.0, -1.0),
            pocket_offset: Point::new(0.0, 3.0),
            ..DetectionConfig::default()
        };
        let plain = locate_objects(&frame, &table_region(), &DetectionConfig::default());
        let shifted = locate_objects(&frame, &table_region(), &config);

        let a = plain.cue_ball.expect("cue").position;
        let b = shifted.cue_ball.expect("cue").position;
        assert_abs_diff_eq!(b.x - a.x, 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(b.y - a.y, -1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(shifted.pockets[0].position.y - plain.pockets[0].position.y, 3.0);
    }

    #[test]
    fn clusters_split_on_gaps() {
        let row = |y: f64, xs: std::ops::Range<i32>| xs.map(move |x| Point::new(x as f64 * 2.0, y)).collect::<Vec<_>>();
        let mut points = row(0.0, 0..10);
        points.extend(row(0.0, 20..30));
        let clusters = cluster_points(&points, 3.0, 5);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0][0], Point::new(0.0, 0.0));
        assert!(cluster_points(&points, 3.0, 11).is_empty());
    }
}
