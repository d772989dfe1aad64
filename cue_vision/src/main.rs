// Example runner for the `cue_vision` library. It renders a synthetic table,
// feeds it through the parallel pipeline for a few cycles, prints the ranked
// shot suggestions and runs one calibration round.
//
// Usage: cue_vision [config.json]
// Set RUST_LOG (for example `RUST_LOG=cue_vision=debug`) to see the cycle logs.

use anyhow::{Context, Result};
use cue_vision::config::{ConfigSnapshot, ConfigStore};
use cue_vision::core_modules::ball::{BallType, PocketName};
use cue_vision::core_modules::calibrator::Calibrator;
use cue_vision::core_modules::frame::Frame;
use cue_vision::core_modules::geometry::{Point, Region};
use cue_vision::error::{CaptureError, PersistenceError};
use cue_vision::parallel_pipeline::{
    CALIBRATION_CHANNEL_CAPACITY, CalibrationEvent, CalibrationRecord, CalibrationService, CalibrationSink,
    CycleReport, FrameSource, ParallelPipeline,
};
use cue_vision::pipeline::{PipelineConfig, Report, calibration_sample};
use image::{Rgb, RgbImage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CYCLES: usize = 5;
const RAIL: Rgb<u8> = Rgb([60, 40, 30]);
const FELT: Rgb<u8> = Rgb([30, 120, 70]);
const POCKET: Rgb<u8> = Rgb([10, 10, 10]);
const GUIDE: Rgb<u8> = Rgb([255, 255, 0]);

/// Renders the same table every cycle, as a screen capture of a static
/// position would.
struct DemoTable {
    frame: Frame,
}

impl DemoTable {
    fn new() -> Self {
        let table = Region::new(100.0, 100.0, 699.0, 399.0);
        let mut image = RgbImage::from_pixel(800, 500, RAIL);
        fill(&mut image, |x, y| table.contains(Point::new(x, y)), FELT);
        for pocket in PocketName::ALL {
            disk(&mut image, pocket.position_on(&table), 26.0, POCKET);
        }
        let cue = Point::new(250.0, 250.0);
        fill(&mut image, |x, y| (y - cue.y).abs() <= 1.0 && x >= cue.x + 60.0 && x <= cue.x + 180.0, GUIDE);
        disk(&mut image, cue, 12.0, BallType::Cue.color());
        disk(&mut image, Point::new(450.0, 330.0), 12.0, BallType::Solid(1).color());
        disk(&mut image, Point::new(550.0, 180.0), 12.0, BallType::Solid(3).color());
        Self { frame: Frame::new(image) }
    }
}

impl FrameSource for DemoTable {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        Ok(self.frame.clone())
    }
}

fn fill(image: &mut RgbImage, inside: impl Fn(f64, f64) -> bool, color: Rgb<u8>) {
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if inside(x as f64, y as f64) {
            *pixel = color;
        }
    }
}

fn disk(image: &mut RgbImage, center: Point, radius: f64, color: Rgb<u8>) {
    fill(image, |x, y| Point::new(x, y).distance_to(center) <= radius, color);
}

/// Prints what would be written to persistent storage.
struct StdoutSink;

impl CalibrationSink for StdoutSink {
    fn persist(&self, record: &CalibrationRecord) -> Result<(), PersistenceError> {
        println!("calibration record: {} bytes", record.to_json()?.len());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let snapshot = match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            ConfigSnapshot::from_json(&json).with_context(|| format!("parsing {path}"))?
        }
        None => ConfigSnapshot::default(),
    };
    let store = Arc::new(ConfigStore::new(snapshot.clone()));
    let pipeline = ParallelPipeline::new(PipelineConfig::default(), Arc::clone(&store));
    info!("Pipeline running on {} workers", pipeline.worker_count());

    let source = DemoTable::new();
    let frame = source.frame.clone();
    let (sender, mut receiver) = mpsc::channel(CYCLES);
    let consume = async move {
        let mut detected = None;
        for _ in 0..CYCLES {
            match receiver.recv().await {
                Some(CycleReport::Frame { frame_id, report }) => {
                    println!("cycle {frame_id}: {report:?}");
                    if let Report::Detected(state) = report {
                        detected = Some(state);
                    }
                }
                Some(CycleReport::SourceLost { attempts, error }) => {
                    println!("source lost after {attempts} attempts: {error}");
                    break;
                }
                None => break,
            }
        }
        detected
    };
    let (run_result, detected) = tokio::join!(pipeline.run(source, sender), consume);
    run_result?;

    let Some(state) = detected else {
        println!("no table detected");
        return Ok(());
    };

    let shots = pipeline.evaluate_shots(&state).await?;
    if shots.is_empty() {
        println!("no makeable shot");
    }
    for (rank, shot) in shots.iter().enumerate() {
        println!(
            "#{} {:?} into {:?}: score {:.2}, aim {:.3} rad, power {:.2}, {:?}{}",
            rank + 1,
            shot.target,
            shot.pocket,
            shot.score,
            shot.cue_angle,
            shot.power,
            shot.outcome,
            if shot.scratch { " (scratch)" } else { "" }
        );
    }

    let (handle, service) = CalibrationService::spawn(
        Calibrator::new(snapshot),
        Arc::clone(&store),
        Some(Arc::new(StdoutSink) as Arc<dyn CalibrationSink>),
        CALIBRATION_CHANNEL_CAPACITY,
    );
    if let Some(sample) = calibration_sample(&frame, &state, &shots, &store.snapshot()) {
        handle.submit(CalibrationEvent::Sample(sample));
    }
    drop(handle);
    let calibrator = service.await?;
    println!(
        "calibrated from {} samples: ball radius {:.1}, color tolerance {}",
        calibrator.history().len(),
        store.snapshot().detection.ball_radius,
        store.snapshot().detection.color_tolerance
    );
    Ok(())
}
