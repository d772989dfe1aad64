// THEORY:
// The `frame` module is the most fundamental unit of the detection layers. A
// `Frame` is a read-only raster handed over by the capture collaborator; no
// detector ever writes into it. It is backed by an `image::RgbImage` so that
// callers holding an image can pass it straight through, while raw RGB/RGBA
// byte buffers from a screen grabber are validated and repacked once.
//
// Everything that compares colors lives here too:
// - channel-tolerance matching (the rule every color detector uses),
// - Rec. 601 luminance (the gray value the edge and contrast maps are built on),
// - `ColorProfile`, the coarse color signature the calibrator stores and the
//   template detector compares against,
// - `ColorMatchCache`, a bounded memo of positive match results.

use crate::error::VisionError;
use crate::core_modules::geometry::Region;
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Upper bound on the number of remembered positive color matches.
pub const COLOR_CACHE_CAPACITY: usize = 1_000;

/// Number of levels per channel in a `ColorProfile` histogram (4 → 64 bins).
const PROFILE_LEVELS: usize = 4;
const PROFILE_BINS: usize = PROFILE_LEVELS * PROFILE_LEVELS * PROFILE_LEVELS;
const PROFILE_STRIDE: u32 = 4;

/// An immutable RGB raster.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Builds a frame from a packed RGB buffer.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, VisionError> {
        let len = data.len();
        RgbImage::from_raw(width, height, data)
            .map(Self::new)
            .ok_or(VisionError::InvalidFrame { width, height, channels: 3, len })
    }

    /// Builds a frame from a packed RGBA buffer, dropping alpha.
    pub fn from_rgba(width: u32, height: u32, data: &[u8]) -> Result<Self, VisionError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(VisionError::InvalidFrame { width, height, channels: 4, len: data.len() });
        }
        let rgb: Vec<u8> = data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();
        Self::from_rgb(width, height, rgb)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Pixel at `(x, y)`. Callers guarantee the coordinate is in bounds.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Rgb<u8> {
        *self.image.get_pixel(x, y)
    }

    /// The whole frame as a region.
    pub fn bounds(&self) -> Region {
        Region::new(0.0, 0.0, self.width() as f64, self.height() as f64)
    }

    /// Integer pixel window covered by `region`, clipped to the frame.
    /// Returns `(x0, y0, x1, y1)` with exclusive upper bounds.
    pub fn pixel_window(&self, region: &Region) -> Option<(u32, u32, u32, u32)> {
        let x0 = region.left.max(0.0).floor() as u32;
        let y0 = region.top.max(0.0).floor() as u32;
        let x1 = (region.right.ceil().max(0.0) as u32 + 1).min(self.width());
        let y1 = (region.bottom.ceil().max(0.0) as u32 + 1).min(self.height());
        if x0 >= x1 || y0 >= y1 { None } else { Some((x0, y0, x1, y1)) }
    }

    /// Rec. 601 luminance of every pixel, row-major.
    pub fn luminance_map(&self) -> Vec<f32> {
        self.image.pixels().map(|p| luminance(*p)).collect()
    }
}

/// Rec. 601 luminance in `0.0..=255.0`.
#[inline]
pub fn luminance(color: Rgb<u8>) -> f32 {
    let [r, g, b] = color.0;
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// True when every channel differs by at most `tolerance`.
#[inline]
pub fn color_matches(color: Rgb<u8>, target: Rgb<u8>, tolerance: u8) -> bool {
    color
        .0
        .iter()
        .zip(target.0.iter())
        .all(|(a, b)| a.abs_diff(*b) <= tolerance)
}

/// Remembers colors already known to match a target at a tolerance.
///
/// Only positive results are stored; a miss is recomputed every time. When
/// the cache is full it is cleared rather than evicting piecemeal.
#[derive(Debug, Default)]
pub struct ColorMatchCache {
    hits: HashSet<([u8; 3], [u8; 3], u8)>,
}

impl ColorMatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matches(&mut self, color: Rgb<u8>, target: Rgb<u8>, tolerance: u8) -> bool {
        let key = (color.0, target.0, tolerance);
        if self.hits.contains(&key) {
            return true;
        }
        let hit = color_matches(color, target, tolerance);
        if hit {
            if self.hits.len() >= COLOR_CACHE_CAPACITY {
                self.hits.clear();
            }
            self.hits.insert(key);
        }
        hit
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Coarse color signature of a region: per-channel mean/variance and a
/// normalized 64-bin RGB histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorProfile {
    pub mean: [f64; 3],
    pub variance: [f64; 3],
    pub histogram: Vec<f64>,
}

impl ColorProfile {
    /// Samples `region` of `frame` on a stride-4 grid. `None` when the region
    /// does not overlap the frame.
    pub fn from_region(frame: &Frame, region: &Region) -> Option<Self> {
        let (x0, y0, x1, y1) = frame.pixel_window(region)?;
        let mut histogram = vec![0.0; PROFILE_BINS];
        let mut sum = [0.0f64; 3];
        let mut sum_sq = [0.0f64; 3];
        let mut count = 0usize;

        for y in (y0..y1).step_by(PROFILE_STRIDE as usize) {
            for x in (x0..x1).step_by(PROFILE_STRIDE as usize) {
                let px = frame.pixel(x, y);
                histogram[profile_bin(px)] += 1.0;
                for c in 0..3 {
                    let v = px.0[c] as f64;
                    sum[c] += v;
                    sum_sq[c] += v * v;
                }
                count += 1;
            }
        }

        if count == 0 {
            return None;
        }
        let n = count as f64;
        let mean = [sum[0] / n, sum[1] / n, sum[2] / n];
        let variance = [
            (sum_sq[0] / n - mean[0] * mean[0]).max(0.0),
            (sum_sq[1] / n - mean[1] * mean[1]).max(0.0),
            (sum_sq[2] / n - mean[2] * mean[2]).max(0.0),
        ];
        histogram.iter_mut().for_each(|h| *h /= n);

        Some(Self { mean, variance, histogram })
    }

    /// Histogram intersection in `[0, 1]`.
    pub fn similarity(&self, other: &ColorProfile) -> f64 {
        self.histogram
            .iter()
            .zip(other.histogram.iter())
            .map(|(a, b)| a.min(*b))
            .sum()
    }

    /// Mean per-channel standard deviation.
    pub fn mean_std_dev(&self) -> f64 {
        self.variance.iter().map(|v| v.sqrt()).sum::<f64>() / 3.0
    }
}

#[inline]
fn profile_bin(color: Rgb<u8>) -> usize {
    let shift = 8 - PROFILE_LEVELS.trailing_zeros();
    let [r, g, b] = color.0.map(|c| (c >> shift) as usize);
    (r * PROFILE_LEVELS + g) * PROFILE_LEVELS + b
}
