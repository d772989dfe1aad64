// THEORY:
// The `error` module holds the hard failures of the engine. Soft absences (no
// table, no cue ball, no direction) are never errors; they are `Option::None`
// all the way up. What lives here are the conditions a caller must react to:
// a frame that does not describe a raster, a frame source that went away, a
// configuration that is out of range, or a persistence collaborator that
// refused a write.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Frame buffer of {len} bytes does not match {width}x{height} with {channels} channels")]
    InvalidFrame {
        width: u32,
        height: u32,
        channels: usize,
        len: usize,
    },

    #[error("Worker pool is closed")]
    WorkerPoolClosed,

    #[error("Worker dropped the result of frame {0}")]
    WorkerDropped(u64),

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Frame source is unavailable: {0}")]
    Unavailable(String),

    #[error("Frame capture failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config value '{field}' = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Failed to parse config snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Calibration storage rejected the write: {0}")]
    WriteFailed(String),

    #[error("Failed to encode calibration record: {0}")]
    Encode(#[from] serde_json::Error),
}
