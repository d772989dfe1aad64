// THEORY:
// This file is the entry point of the `cue_vision` library crate. It exposes
// the shot-assistance engine to its host (an overlay, a recorder, a test
// harness) as two pipelines plus the shared configuration they read.
//
// Key architectural principles:
// 1.  **Layered analysis**: `core_modules` holds the pure layers, leaves first.
//     Geometry and frame access, then table region detection, object location,
//     trajectory simulation, shot evaluation and calibration. None of them
//     perform I/O or keep hidden global state.
// 2.  **Two faces, one cycle**: `pipeline::ShotPipeline` is the synchronous,
//     frame-at-a-time API. `parallel_pipeline::ParallelPipeline` drives the
//     same cycle on tokio with a worker pool, a fixed cadence and a calibration
//     service. Both share the cycle bookkeeping, so they report identically.
// 3.  **Snapshot configuration**: every tunable lives in `config`. Readers take
//     an immutable snapshot; the calibrator publishes whole replacements.
// 4.  **Typed failures**: `error` defines what can actually go wrong at the
//     seams (capture, configuration, persistence, the worker pool). Detection
//     misses are not errors; they are reports.

pub mod config;
pub mod error;
pub mod core_modules;
pub mod pipeline;
pub mod parallel_pipeline;
