//! Synthetic frames for detector and pipeline tests.

use crate::core_modules::ball::BallType;
use crate::core_modules::frame::Frame;
use crate::core_modules::geometry::{Point, Region};
use image::{Rgb, RgbImage};

pub const RAIL: Rgb<u8> = Rgb([60, 40, 30]);
pub const FELT: Rgb<u8> = Rgb([30, 120, 70]);
pub const POCKET: Rgb<u8> = Rgb([10, 10, 10]);
pub const GUIDE: Rgb<u8> = Rgb([255, 255, 0]);

pub const FRAME_W: u32 = 800;
pub const FRAME_H: u32 = 500;

/// Table rectangle used by the scene builders (inclusive pixel edges).
pub fn table_region() -> Region {
    Region::new(100.0, 100.0, 699.0, 399.0)
}

pub struct SceneBuilder {
    image: RgbImage,
}

impl SceneBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self { image: RgbImage::from_pixel(width, height, RAIL) }
    }

    pub fn rect(mut self, region: Region, color: Rgb<u8>) -> Self {
        for y in region.top as u32..=region.bottom as u32 {
            for x in region.left as u32..=region.right as u32 {
                if x < self.image.width() && y < self.image.height() {
                    self.image.put_pixel(x, y, color);
                }
            }
        }
        self
    }

    pub fn disk(mut self, center: Point, radius: f64, color: Rgb<u8>) -> Self {
        let r = radius.ceil() as i64;
        for dy in -r..=r {
            for dx in -r..=r {
                if ((dx * dx + dy * dy) as f64) > radius * radius {
                    continue;
                }
                let x = center.x.round() as i64 + dx;
                let y = center.y.round() as i64 + dy;
                if x >= 0 && y >= 0 && (x as u32) < self.image.width() && (y as u32) < self.image.height() {
                    self.image.put_pixel(x as u32, y as u32, color);
                }
            }
        }
        self
    }

    pub fn ball(self, ball_type: BallType, center: Point, radius: f64) -> Self {
        self.disk(center, radius, ball_type.color())
    }

    /// Thick line from `from` towards `angle`, covering distances `start..=end`.
    pub fn ray(mut self, from: Point, angle: f64, start: f64, end: f64, color: Rgb<u8>) -> Self {
        let dir = Point::from_angle(angle);
        let mut d = start;
        while d <= end {
            let p = from + dir.scale(d);
            for off in -1..=1 {
                let x = p.x.round() as i64 - dir.y.round() as i64 * off;
                let y = p.y.round() as i64 + dir.x.round() as i64 * off;
                if x >= 0 && y >= 0 && (x as u32) < self.image.width() && (y as u32) < self.image.height() {
                    self.image.put_pixel(x as u32, y as u32, color);
                }
            }
            d += 0.5;
        }
        self
    }

    pub fn build(self) -> Frame {
        Frame::new(self.image)
    }
}

/// A bare felt rectangle on the rail color.
pub fn plain_table_frame() -> Frame {
    SceneBuilder::new(FRAME_W, FRAME_H).rect(table_region(), FELT).build()
}

/// Felt, six pockets, a cue ball at (250, 250), a 1-ball at (450, 330), a
/// 3-ball at (550, 180) and a yellow guide line pointing right.
pub fn full_scene_frame() -> Frame {
    let table = table_region();
    let mut scene = SceneBuilder::new(FRAME_W, FRAME_H).rect(table, FELT);
    for pocket in crate::core_modules::ball::PocketName::ALL {
        scene = scene.disk(pocket.position_on(&table), 26.0, POCKET);
    }
    scene
        .ray(Point::new(250.0, 250.0), 0.0, 60.0, 180.0, GUIDE)
        .ball(BallType::Cue, Point::new(250.0, 250.0), 12.0)
        .ball(BallType::Solid(1), Point::new(450.0, 330.0), 12.0)
        .ball(BallType::Solid(3), Point::new(550.0, 180.0), 12.0)
        .build()
}
