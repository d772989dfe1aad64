// THEORY:
// The `region_detector` is the first analysis layer. Its only job is to find
// the playing surface: an axis-aligned rectangle that every later stage
// confines its search to.
//
// No single heuristic is reliable on every table skin, so four independent
// strategies run on the same frame and their answers are merged:
// 1.  **Color histogram + flood fill**: the felt is the dominant green. The
//     green channel is histogrammed on a stride-4 grid, the peak is taken as
//     the felt color, and the largest connected felt region is grown with a
//     bounded, worklist-driven flood fill over that grid.
// 2.  **Edge lines**: a Sobel magnitude map is scanned row by row and column
//     by column for long contiguous edge runs. The outermost runs are the
//     cushions.
// 3.  **Contrast rectangle**: a 3x3 max-min contrast map; candidate
//     rectangles are scored by how much of their border is high-contrast.
// 4.  **Template match**: once the calibrator has a trusted template, windows
//     around its bounds are compared against its color signature.
//
// Every strategy is a soft detector: it returns `None` instead of failing, and
// a `None` simply drops out of the consensus. If nothing survives, the answer
// is "no table", never a guessed rectangle.

use crate::config::{DetectionConfig, TableTemplate};
use crate::core_modules::frame::{ColorProfile, Frame, color_matches};
use crate::core_modules::geometry::Region;
use image::Rgb;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use tracing::{debug, trace};

/// Sampling stride of the histogram and of the flood-fill grid.
pub const HISTOGRAM_STRIDE: u32 = 4;
/// Green-channel bins the felt peak is searched in.
const PEAK_BIN_RANGE: RangeInclusive<usize> = 100..=180;
/// Minimum share of samples the felt peak must hold.
const MIN_PEAK_FRACTION: f64 = 0.10;
/// Pixel stride of the flood-fill seed scan.
const SEED_STRIDE: u32 = 10;
/// Upper bound on grid cells visited by one flood fill.
pub const MAX_FLOOD_FILL_CELLS: usize = 10_000;
/// An edge run must span this share of its row or column.
const MIN_LINE_FRACTION: f64 = 0.30;
/// Rows/columns considered per side by the contrast search.
const CONTRAST_CANDIDATES_PER_SIDE: usize = 16;
const MIN_CONTRAST_SCORE: f64 = 0.5;
const MIN_TEMPLATE_SIMILARITY: f64 = 0.7;
/// Ordered so the unscaled, unshifted window is tried first.
const TEMPLATE_SCALES: [f64; 5] = [1.0, 0.95, 1.05, 0.9, 1.1];
const TEMPLATE_SHIFTS: [f64; 5] = [0.0, -0.05, 0.05, -0.1, 0.1];
/// A table narrower or shorter than this share of the frame is rejected.
const MIN_TABLE_FRACTION: f64 = 0.10;
/// A detector agrees with the consensus when their IoU reaches this.
const AGREEMENT_IOU: f64 = 0.8;

/// The table-bounds strategies, dispatched at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableDetector {
    ColorHistogram,
    EdgeLines,
    ContrastRectangle,
    TemplateMatch,
}

impl TableDetector {
    pub const ALL: [TableDetector; 4] = [
        TableDetector::ColorHistogram,
        TableDetector::EdgeLines,
        TableDetector::ContrastRectangle,
        TableDetector::TemplateMatch,
    ];

    /// Runs this strategy. Implausibly small rectangles count as no result.
    pub fn detect(
        &self,
        frame: &Frame,
        config: &DetectionConfig,
        template: Option<&TableTemplate>,
    ) -> Option<Region> {
        let region = match self {
            TableDetector::ColorHistogram => detect_by_color_histogram(frame, config),
            TableDetector::EdgeLines => detect_by_edge_lines(frame, config),
            TableDetector::ContrastRectangle => detect_by_contrast(frame, config),
            TableDetector::TemplateMatch => template.and_then(|t| detect_by_template(frame, t)),
        }?;
        is_plausible_table(frame, &region).then_some(region)
    }
}

/// The merged table bounds with the strategies that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionEstimate {
    pub region: Region,
    /// `0.5` for a lone detector, rising to `1.0` when all four agree.
    pub confidence: f64,
    pub contributors: Vec<TableDetector>,
}

/// Runs every strategy and merges the survivors.
pub fn detect_table(
    frame: &Frame,
    config: &DetectionConfig,
    template: Option<&TableTemplate>,
) -> Option<RegionEstimate> {
    let results: Vec<(TableDetector, Region)> = TableDetector::ALL
        .iter()
        .filter_map(|detector| {
            let found = detector.detect(frame, config, template);
            debug!("{:?} detector -> {:?}", detector, found);
            found.map(|region| (*detector, region))
        })
        .collect();

    let regions: Vec<Region> = results.iter().map(|(_, r)| *r).collect();
    let agreeing = majority(&regions);
    if agreeing.len() < config.min_detector_agreement.max(1) {
        debug!(
            "Table detection: {} of {} detector(s) agree, {} required",
            agreeing.len(),
            results.len(),
            config.min_detector_agreement
        );
        return None;
    }

    let kept: Vec<Region> = agreeing.iter().map(|&i| regions[i]).collect();
    let region = consensus(&kept)?;
    Some(RegionEstimate {
        region,
        confidence: 0.5 + 0.5 * (kept.len() - 1) as f64 / 3.0,
        contributors: agreeing.iter().map(|&i| results[i].0).collect(),
    })
}

/// Indices of the largest group of mutually agreeing rectangles: the one with
/// the most support (IoU of at least `AGREEMENT_IOU`) anchors the group, the
/// earliest anchor winning ties.
fn majority(regions: &[Region]) -> Vec<usize> {
    let agreeing_with = |anchor: &Region| -> Vec<usize> {
        regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.iou(anchor) >= AGREEMENT_IOU)
            .map(|(i, _)| i)
            .collect()
    };
    regions
        .iter()
        .map(agreeing_with)
        .fold(Vec::new(), |best, group| if group.len() > best.len() { group } else { best })
}

/// Averages each edge of the input rectangles weighted by `sqrt(area)`.
pub fn consensus(regions: &[Region]) -> Option<Region> {
    let mut total = 0.0;
    let mut edges = [0.0f64; 4];
    for region in regions {
        let weight = region.area().max(0.0).sqrt();
        total += weight;
        edges[0] += region.left * weight;
        edges[1] += region.top * weight;
        edges[2] += region.right * weight;
        edges[3] += region.bottom * weight;
    }
    if total <= 0.0 {
        return None;
    }
    Some(Region::new(edges[0] / total, edges[1] / total, edges[2] / total, edges[3] / total))
}

fn is_plausible_table(frame: &Frame, region: &Region) -> bool {
    region.width() >= frame.width() as f64 * MIN_TABLE_FRACTION
        && region.height() >= frame.height() as f64 * MIN_TABLE_FRACTION
}

// --- 1. Color histogram + flood fill ---

/// Cells and bounding box covered by a flood fill over the sampled grid.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FloodFill {
    cells: usize,
    min: (u32, u32),
    max: (u32, u32),
}

fn detect_by_color_histogram(frame: &Frame, config: &DetectionConfig) -> Option<Region> {
    let (width, height) = (frame.width(), frame.height());
    if width == 0 || height == 0 {
        return None;
    }

    let mut histogram = [0usize; 256];
    let mut color_sums = [[0u64; 3]; 256];
    let mut samples = 0usize;
    for y in (0..height).step_by(HISTOGRAM_STRIDE as usize) {
        for x in (0..width).step_by(HISTOGRAM_STRIDE as usize) {
            let px = frame.pixel(x, y);
            let bin = px.0[1] as usize;
            histogram[bin] += 1;
            for c in 0..3 {
                color_sums[bin][c] += px.0[c] as u64;
            }
            samples += 1;
        }
    }

    let (peak_bin, peak_count) = PEAK_BIN_RANGE.fold((0, 0), |best, bin| {
        if histogram[bin] > best.1 { (bin, histogram[bin]) } else { best }
    });
    if peak_count == 0 || (peak_count as f64) < MIN_PEAK_FRACTION * samples as f64 {
        trace!("Felt peak too weak: {} of {} samples", peak_count, samples);
        return None;
    }
    let n = peak_count as u64;
    let peak_color = Rgb(color_sums[peak_bin].map(|s| (s / n) as u8));

    // Felt mask over the stride grid; each cell is represented by its
    // top-left sample.
    let grid_w = width.div_ceil(HISTOGRAM_STRIDE);
    let grid_h = height.div_ceil(HISTOGRAM_STRIDE);
    let mut mask = vec![false; (grid_w * grid_h) as usize];
    for cy in 0..grid_h {
        for cx in 0..grid_w {
            let px = frame.pixel(cx * HISTOGRAM_STRIDE, cy * HISTOGRAM_STRIDE);
            mask[(cy * grid_w + cx) as usize] = color_matches(px, peak_color, config.table_color_tolerance);
        }
    }

    let mut visited = vec![false; mask.len()];
    let mut largest: Option<FloodFill> = None;
    for sy in (0..height).step_by(SEED_STRIDE as usize) {
        for sx in (0..width).step_by(SEED_STRIDE as usize) {
            let seed = (sx / HISTOGRAM_STRIDE, sy / HISTOGRAM_STRIDE);
            let idx = (seed.1 * grid_w + seed.0) as usize;
            if visited[idx] || !mask[idx] {
                continue;
            }
            let fill = fill_component(&mask, &mut visited, grid_w, grid_h, seed);
            if largest.as_ref().is_none_or(|best| fill.cells > best.cells) {
                largest = Some(fill);
            }
        }
    }

    let fill = largest?;
    let s = HISTOGRAM_STRIDE;
    Some(Region::new(
        (fill.min.0 * s) as f64,
        (fill.min.1 * s) as f64,
        (fill.max.0 * s + s - 1).min(width - 1) as f64,
        (fill.max.1 * s + s - 1).min(height - 1) as f64,
    ))
}

impl FloodFill {
    fn merge(self, other: FloodFill) -> FloodFill {
        FloodFill {
            cells: self.cells + other.cells,
            min: (self.min.0.min(other.min.0), self.min.1.min(other.min.1)),
            max: (self.max.0.max(other.max.0), self.max.1.max(other.max.1)),
        }
    }
}

/// The whole connected component of `seed`, grown in bounded slices: each
/// `flood_fill` call resumes from the frontier the previous one left behind.
fn fill_component(mask: &[bool], visited: &mut [bool], grid_w: u32, grid_h: u32, seed: (u32, u32)) -> FloodFill {
    visited[(seed.1 * grid_w + seed.0) as usize] = true;
    let mut frontier = VecDeque::from([seed]);
    let mut component = FloodFill { cells: 0, min: seed, max: seed };
    while !frontier.is_empty() {
        component = component.merge(flood_fill(mask, visited, grid_w, grid_h, &mut frontier));
    }
    component
}

/// Queue-based 4-connected fill over `frontier`, stopping after
/// `MAX_FLOOD_FILL_CELLS`. Unprocessed cells stay in `frontier`.
fn flood_fill(
    mask: &[bool],
    visited: &mut [bool],
    grid_w: u32,
    grid_h: u32,
    frontier: &mut VecDeque<(u32, u32)>,
) -> FloodFill {
    let Some(&start) = frontier.front() else {
        return FloodFill { cells: 0, min: (u32::MAX, u32::MAX), max: (0, 0) };
    };
    let mut fill = FloodFill { cells: 0, min: start, max: start };
    while fill.cells < MAX_FLOOD_FILL_CELLS {
        let Some((x, y)) = frontier.pop_front() else {
            break;
        };
        fill.cells += 1;
        fill.min = (fill.min.0.min(x), fill.min.1.min(y));
        fill.max = (fill.max.0.max(x), fill.max.1.max(y));

        for (dx, dy) in [(0i64, 1i64), (0, -1), (1, 0), (-1, 0)] {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 || nx >= grid_w as i64 || ny >= grid_h as i64 {
                continue;
            }
            let idx = (ny as u32 * grid_w + nx as u32) as usize;
            if !visited[idx] && mask[idx] {
                visited[idx] = true;
                frontier.push_back((nx as u32, ny as u32));
            }
        }
    }
    fill
}

// --- 2. Edge lines ---

const SOBEL_GX: [[f32; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_GY: [[f32; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Sobel gradient magnitude of a luminance map. Border pixels are zero.
pub fn sobel_magnitude(luminance: &[f32], width: usize, height: usize) -> Vec<f32> {
    let mut magnitude = vec![0.0; width * height];
    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            let mut gx = 0.0;
            let mut gy = 0.0;
            for ky in 0..3 {
                for kx in 0..3 {
                    let v = luminance[(y + ky - 1) * width + (x + kx - 1)];
                    gx += v * SOBEL_GX[ky][kx];
                    gy += v * SOBEL_GY[ky][kx];
                }
            }
            magnitude[y * width + x] = (gx * gx + gy * gy).sqrt();
        }
    }
    magnitude
}

/// Longest run of consecutive `true` values.
fn longest_run(values: impl Iterator<Item = bool>) -> usize {
    let mut best = 0;
    let mut current = 0;
    for v in values {
        current = if v { current + 1 } else { 0 };
        best = best.max(current);
    }
    best
}

fn detect_by_edge_lines(frame: &Frame, config: &DetectionConfig) -> Option<Region> {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    if width < 3 || height < 3 {
        return None;
    }
    let magnitude = sobel_magnitude(&frame.luminance_map(), width, height);
    let strong = |x: usize, y: usize| magnitude[y * width + x] > config.edge_threshold;

    let min_row_run = (width as f64 * MIN_LINE_FRACTION).ceil() as usize;
    let rows: Vec<usize> = (0..height)
        .filter(|&y| longest_run((0..width).map(|x| strong(x, y))) >= min_row_run)
        .collect();

    let min_col_run = (height as f64 * MIN_LINE_FRACTION).ceil() as usize;
    let cols: Vec<usize> = (0..width)
        .filter(|&x| longest_run((0..height).map(|y| strong(x, y))) >= min_col_run)
        .collect();

    let (top, bottom) = (*rows.first()?, *rows.last()?);
    let (left, right) = (*cols.first()?, *cols.last()?);
    if top >= bottom || left >= right {
        return None;
    }
    Some(Region::new(left as f64, top as f64, right as f64, bottom as f64))
}

// --- 3. Contrast rectangle ---

/// Max-min luminance over each pixel's 3x3 neighborhood (clipped at borders).
pub fn contrast_map(luminance: &[f32], width: usize, height: usize) -> Vec<f32> {
    let mut contrast = vec![0.0; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut lo = f32::MAX;
            let mut hi = f32::MIN;
            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    let v = luminance[ny * width + nx];
                    lo = lo.min(v);
                    hi = hi.max(v);
                }
            }
            contrast[y * width + x] = hi - lo;
        }
    }
    contrast
}

/// Prefix sums of high-contrast pixels along rows and along columns.
struct ContrastSums {
    width: usize,
    height: usize,
    rows: Vec<u32>,
    cols: Vec<u32>,
}

impl ContrastSums {
    fn new(high: &[bool], width: usize, height: usize) -> Self {
        let mut rows = vec![0u32; height * (width + 1)];
        let mut cols = vec![0u32; width * (height + 1)];
        for y in 0..height {
            for x in 0..width {
                let v = high[y * width + x] as u32;
                rows[y * (width + 1) + x + 1] = rows[y * (width + 1) + x] + v;
                cols[x * (height + 1) + y + 1] = cols[x * (height + 1) + y] + v;
            }
        }
        Self { width, height, rows, cols }
    }

    /// High pixels in row `y` over `x0..=x1`.
    fn row(&self, y: usize, x0: usize, x1: usize) -> u32 {
        let base = y * (self.width + 1);
        self.rows[base + x1 + 1] - self.rows[base + x0]
    }

    /// High pixels in column `x` over `y0..=y1` (empty when `y0 > y1`).
    fn col(&self, x: usize, y0: usize, y1: usize) -> u32 {
        if y0 > y1 {
            return 0;
        }
        let base = x * (self.height + 1);
        self.cols[base + y1 + 1] - self.cols[base + y0]
    }
}

/// The strongest rows (or columns) in `range`, returned in ascending order.
fn candidate_lines(counts: &[u32], range: std::ops::Range<usize>, min_count: u32) -> Vec<usize> {
    let mut lines: Vec<usize> = range.filter(|&i| counts[i] >= min_count).collect();
    lines.sort_by(|a, b| counts[*b].cmp(&counts[*a]).then(a.cmp(b)));
    lines.truncate(CONTRAST_CANDIDATES_PER_SIDE);
    lines.sort_unstable();
    lines
}

fn detect_by_contrast(frame: &Frame, config: &DetectionConfig) -> Option<Region> {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    if width < 3 || height < 3 {
        return None;
    }
    let contrast = contrast_map(&frame.luminance_map(), width, height);
    let high: Vec<bool> = contrast.iter().map(|c| *c > config.contrast_threshold).collect();
    let sums = ContrastSums::new(&high, width, height);

    let row_counts: Vec<u32> = (0..height).map(|y| sums.row(y, 0, width - 1)).collect();
    let col_counts: Vec<u32> = (0..width).map(|x| sums.col(x, 0, height - 1)).collect();
    let min_row = (width as f64 * MIN_LINE_FRACTION) as u32;
    let min_col = (height as f64 * MIN_LINE_FRACTION) as u32;

    let tops = candidate_lines(&row_counts, 0..height / 2, min_row);
    let bottoms = candidate_lines(&row_counts, height / 2..height, min_row);
    let lefts = candidate_lines(&col_counts, 0..width / 2, min_col);
    let rights = candidate_lines(&col_counts, width / 2..width, min_col);

    let mut best: Option<(f64, Region)> = None;
    for &top in &tops {
        for &left in &lefts {
            for &bottom in &bottoms {
                for &right in &rights {
                    let border = 2 * (right - left + 1) + 2 * (bottom - top).saturating_sub(1);
                    let hits = sums.row(top, left, right)
                        + sums.row(bottom, left, right)
                        + sums.col(left, top + 1, bottom - 1)
                        + sums.col(right, top + 1, bottom - 1);
                    let score = hits as f64 / border as f64;
                    if best.is_none_or(|(s, _)| score > s) {
                        best = Some((score, Region::new(left as f64, top as f64, right as f64, bottom as f64)));
                    }
                }
            }
        }
    }

    best.filter(|(score, _)| *score > MIN_CONTRAST_SCORE).map(|(score, region)| {
        trace!("Contrast rectangle score {:.2}", score);
        region
    })
}

// --- 4. Template match ---

fn detect_by_template(frame: &Frame, template: &TableTemplate) -> Option<Region> {
    let bounds = template.bounds;
    let center = bounds.center();
    let max_x = frame.width().saturating_sub(1) as f64;
    let max_y = frame.height().saturating_sub(1) as f64;

    let mut best: Option<(f64, Region)> = None;
    for scale in TEMPLATE_SCALES {
        let half_w = bounds.width() * scale / 2.0;
        let half_h = bounds.height() * scale / 2.0;
        for shift_y in TEMPLATE_SHIFTS {
            for shift_x in TEMPLATE_SHIFTS {
                let cx = center.x + shift_x * bounds.width();
                let cy = center.y + shift_y * bounds.height();
                let window = Region::new(cx - half_w, cy - half_h, cx + half_w, cy + half_h);
                if window.left < 0.0 || window.top < 0.0 || window.right > max_x || window.bottom > max_y {
                    continue;
                }
                let Some(profile) = ColorProfile::from_region(frame, &window) else {
                    continue;
                };
                let similarity = template.profile.similarity(&profile);
                if best.is_none_or(|(s, _)| similarity > s) {
                    best = Some((similarity, window));
                }
            }
        }
    }

    best.filter(|(similarity, _)| *similarity > MIN_TEMPLATE_SIMILARITY)
        .map(|(_, region)| region)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::test_support::{self, FELT, RAIL, SceneBuilder, table_region};
    use image::RgbImage;

    fn within_stride(found: &Region, expected: &Region) {
        assert!(
            found.max_edge_delta(expected) <= HISTOGRAM_STRIDE as f64,
            "{found:?} is not within {HISTOGRAM_STRIDE}px of {expected:?}"
        );
    }

    #[test]
    fn uniform_table_rectangle_is_recovered() {
        let frame = test_support::plain_table_frame();
        let estimate = detect_table(&frame, &DetectionConfig::default(), None).expect("table found");
        within_stride(&estimate.region, &table_region());
        assert!(estimate.contributors.contains(&TableDetector::ColorHistogram));
        assert!(estimate.confidence >= 0.5);
    }

    #[test]
    fn each_detector_finds_the_plain_table() {
        let frame = test_support::plain_table_frame();
        let config = DetectionConfig::default();
        for detector in [
            TableDetector::ColorHistogram,
            TableDetector::EdgeLines,
            TableDetector::ContrastRectangle,
        ] {
            let region = detector.detect(&frame, &config, None).unwrap_or_else(|| panic!("{detector:?} failed"));
            within_stride(&region, &table_region());
        }
    }

    #[test]
    fn table_with_pockets_and_balls_is_recovered() {
        let frame = test_support::full_scene_frame();
        let estimate = detect_table(&frame, &DetectionConfig::default(), None).expect("table found");
        within_stride(&estimate.region, &table_region());
    }

    #[test]
    fn frame_without_felt_has_no_table() {
        let frame = Frame::new(RgbImage::from_pixel(300, 200, RAIL));
        assert_eq!(detect_table(&frame, &DetectionConfig::default(), None), None);
    }

    #[test]
    fn small_felt_patch_is_below_the_histogram_peak_share() {
        let frame = SceneBuilder::new(400, 400)
            .rect(Region::new(10.0, 10.0, 40.0, 40.0), FELT)
            .build();
        let config = DetectionConfig::default();
        assert_eq!(detect_by_color_histogram(&frame, &config), None);
    }

    #[test]
    fn flood_fill_stops_at_the_cell_cap_and_keeps_its_frontier() {
        let (w, h) = (200u32, 200u32);
        let mask = vec![true; (w * h) as usize];
        let mut visited = vec![false; mask.len()];
        visited[(100 * w + 100) as usize] = true;
        let mut frontier = VecDeque::from([(100, 100)]);
        let fill = flood_fill(&mask, &mut visited, w, h, &mut frontier);
        assert_eq!(fill.cells, MAX_FLOOD_FILL_CELLS);
        assert!(!frontier.is_empty());
    }

    #[test]
    fn component_larger_than_the_cap_is_filled_completely() {
        let (w, h) = (200u32, 200u32);
        let mut mask = vec![true; (w * h) as usize];
        // A wall splitting off the last ten columns.
        for y in 0..h {
            mask[(y * w + 189) as usize] = false;
        }
        let mut visited = vec![false; mask.len()];
        let fill = fill_component(&mask, &mut visited, w, h, (0, 0));
        assert_eq!(fill.cells, 189 * 200);
        assert_eq!((fill.min, fill.max), ((0, 0), (188, 199)));
    }

    #[test]
    fn full_hd_table_is_recovered_by_every_detector() {
        let table = Region::new(160.0, 140.0, 1759.0, 939.0);
        let frame = SceneBuilder::new(1920, 1080).rect(table, FELT).build();
        let config = DetectionConfig::default();
        for detector in [
            TableDetector::ColorHistogram,
            TableDetector::EdgeLines,
            TableDetector::ContrastRectangle,
        ] {
            let region = detector.detect(&frame, &config, None).unwrap_or_else(|| panic!("{detector:?} failed"));
            within_stride(&region, &table);
        }
        let estimate = detect_table(&frame, &config, None).expect("table found");
        within_stride(&estimate.region, &table);
        assert_eq!(estimate.contributors.len(), 3);
    }

    #[test]
    fn outlying_rectangle_is_left_out_of_the_consensus() {
        let table = Region::new(160.0, 140.0, 1759.0, 939.0);
        let regions = [
            Region::new(160.0, 140.0, 719.0, 703.0),
            Region::new(159.0, 139.0, 1760.0, 940.0),
            table,
        ];
        let agreeing = majority(&regions);
        assert_eq!(agreeing, vec![1, 2]);
        let kept: Vec<Region> = agreeing.iter().map(|&i| regions[i]).collect();
        let merged = consensus(&kept).expect("merged");
        assert!(merged.max_edge_delta(&table) <= 1.0);
    }

    #[test]
    fn template_matches_its_own_bounds() {
        let frame = test_support::plain_table_frame();
        let profile = ColorProfile::from_region(&frame, &table_region()).expect("profile");
        let template = TableTemplate { bounds: table_region(), profile };
        let region = TableDetector::TemplateMatch
            .detect(&frame, &DetectionConfig::default(), Some(&template))
            .expect("template matched");
        assert_eq!(region, table_region());
        assert_eq!(
            TableDetector::TemplateMatch.detect(&frame, &DetectionConfig::default(), None),
            None
        );
    }

    #[test]
    fn consensus_weights_larger_rectangles_more() {
        let small = Region::new(0.0, 0.0, 10.0, 10.0);
        let large = Region::new(0.0, 0.0, 40.0, 40.0);
        let merged = consensus(&[small, large]).expect("merged");
        // weights 10 and 40
        assert!((merged.right - 34.0).abs() < 1e-9);
        assert_eq!(consensus(&[]), None);
    }

    #[test]
    fn agreement_threshold_gates_the_result() {
        let frame = test_support::plain_table_frame();
        let config = DetectionConfig { min_detector_agreement: 4, ..DetectionConfig::default() };
        assert_eq!(detect_table(&frame, &config, None), None);
    }
}
