// THEORY:
// The `parallel_pipeline` is the asynchronous face of the engine. It runs the
// same detection cycle as `pipeline::ShotPipeline`, but spreads the work over
// tokio tasks so capture, detection, shot planning and calibration never wait
// on each other.
//
// Key architectural principles:
// 1.  **Worker pool**: a dispatcher task hands `FrameTask`s round-robin to a
//     fixed set of workers. Each worker runs the CPU-heavy detection on the
//     blocking pool and answers through a `oneshot` channel.
// 2.  **Fixed cadence**: `run` ticks a `tokio::time::interval`; a slow cycle
//     skips ticks instead of queueing a burst of catch-up cycles.
// 3.  **Capture is the only fatal path**: detection misses are reports, but a
//     frame source that keeps failing past the retry limit ends the loop with
//     a terminal `SourceLost` report and an error.
// 4.  **Fan-out with identical results**: shot evaluation and secondary
//     trajectories fan out over `spawn_blocking` and are joined in submission
//     order, so the output equals the synchronous functions exactly.
// 5.  **Single-writer calibration**: one `CalibrationService` task owns the
//     `Calibrator`. Producers push events into a bounded channel with
//     `try_send` and never block; the service publishes snapshots to the
//     shared `ConfigStore` and hands records to the persistence sink without
//     waiting for it.

use crate::config::{ConfigSnapshot, ConfigStore};
use crate::core_modules::ball::{Ball, GameState, Pocket};
use crate::core_modules::calibrator::{CalibrationSample, Calibrator, ManualCorrection};
use crate::core_modules::frame::Frame;
use crate::core_modules::geometry::Region;
use crate::core_modules::shot_evaluator::{ShotContext, ShotEvaluator, ShotSuggestion, rank};
use crate::core_modules::trajectory::{TrajectoryPath, TrajectorySimulator};
use crate::error::{CaptureError, PersistenceError, VisionError};
use crate::pipeline::{CycleTracker, PipelineConfig, Report, detect_game_state};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Default capacity of the calibration event channel.
pub const CALIBRATION_CHANNEL_CAPACITY: usize = 64;

/// The screen-capture collaborator.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;
}

/// One frame handed to a detection worker.
pub struct FrameTask {
    pub frame: Frame,
    pub frame_id: u64,
    pub snapshot: Arc<ConfigSnapshot>,
    pub result_sender: oneshot::Sender<Result<Option<GameState>, VisionError>>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<FrameTask>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers (one per CPU when `0`) and their
    /// dispatcher. Must be called from within a tokio runtime.
    pub fn new(worker_count: usize) -> Self {
        let size = match worker_count {
            0 => num_cpus::get().max(1),
            n => n,
        };
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<FrameTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::unbounded_channel::<FrameTask>()).unzip();

        tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                if worker_senders[worker_idx].send(task).is_err() {
                    warn!("Detection worker {} is gone", worker_idx);
                }
                worker_idx = (worker_idx + 1) % size;
            }
        });

        let workers = worker_receivers
            .into_iter()
            .enumerate()
            .map(|(id, mut receiver)| {
                tokio::spawn(async move {
                    while let Some(task) = receiver.recv().await {
                        let FrameTask { frame, frame_id, snapshot, result_sender } = task;
                        let started = Instant::now();
                        let result = tokio::task::spawn_blocking(move || detect_game_state(&frame, &snapshot))
                            .await
                            .map_err(|e| VisionError::TaskFailed(e.to_string()));
                        trace!("Worker {} analysed frame {} in {:?}", id, frame_id, started.elapsed());
                        // The requester may have given up; nothing to do then.
                        let _ = result_sender.send(result);
                    }
                })
            })
            .collect();

        info!("Started detection worker pool with {} workers", size);
        Self { task_sender, workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub async fn process_frame(
        &self,
        frame: Frame,
        frame_id: u64,
        snapshot: Arc<ConfigSnapshot>,
    ) -> Result<Option<GameState>, VisionError> {
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(FrameTask { frame, frame_id, snapshot, result_sender })
            .map_err(|_| VisionError::WorkerPoolClosed)?;
        result_receiver.await.map_err(|_| VisionError::WorkerDropped(frame_id))?
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

/// What the cycle loop emits per tick.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    Frame { frame_id: u64, report: Report },
    /// The frame source failed `attempts` times in a row; the loop has ended.
    SourceLost { attempts: u32, error: CaptureError },
}

pub struct ParallelPipeline {
    config: PipelineConfig,
    store: Arc<ConfigStore>,
    worker_pool: WorkerPool,
    tracker: Mutex<CycleTracker>,
    frame_counter: AtomicU64,
}

impl ParallelPipeline {
    pub fn new(config: PipelineConfig, store: Arc<ConfigStore>) -> Self {
        let worker_pool = WorkerPool::new(config.worker_count);
        let tracker = Mutex::new(CycleTracker::new(&config));
        Self { config, store, worker_pool, tracker, frame_counter: AtomicU64::new(0) }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_pool.size()
    }

    pub fn last_state(&self) -> Option<GameState> {
        self.tracker.lock().last_accepted().cloned()
    }

    /// Analyses one frame on the worker pool and folds the result into the
    /// cycle bookkeeping. Concurrent calls are folded in completion order.
    pub async fn process_frame(&self, frame: Frame) -> Result<(u64, Report), VisionError> {
        let frame_id = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.store.snapshot();
        let detection = self.worker_pool.process_frame(frame, frame_id, snapshot).await?;
        let report = self.tracker.lock().observe(detection);
        Ok((frame_id, report))
    }

    /// Drives `source` at the configured cadence until the receiver of
    /// `reports` is dropped (`Ok`) or the source is lost (`Err`).
    pub async fn run<S: FrameSource>(&self, mut source: S, reports: mpsc::Sender<CycleReport>) -> Result<(), VisionError> {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.cycle_interval_ms.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut capture_failures = 0u32;

        loop {
            interval.tick().await;
            let frame = match source.next_frame() {
                Ok(frame) => {
                    capture_failures = 0;
                    frame
                }
                Err(err) => {
                    capture_failures += 1;
                    if capture_failures > self.config.max_capture_retries {
                        error!("Frame source lost after {} attempts: {}", capture_failures, err);
                        let lost = CycleReport::SourceLost { attempts: capture_failures, error: err.clone() };
                        // Best effort; the error below is the authoritative signal.
                        let _ = reports.send(lost).await;
                        return Err(err.into());
                    }
                    warn!("Frame capture failed (attempt {}): {}", capture_failures, err);
                    continue;
                }
            };

            let (frame_id, report) = self.process_frame(frame).await?;
            debug!("Cycle {} -> {:?}", frame_id, report_kind(&report));
            if reports.send(CycleReport::Frame { frame_id, report }).await.is_err() {
                info!("Report receiver dropped, stopping the detection loop");
                return Ok(());
            }
        }
    }

    /// Ranked suggestions for `state`, evaluated in parallel on the blocking
    /// pool. Identical to `ShotEvaluator::rank_shots`.
    pub async fn evaluate_shots(&self, state: &GameState) -> Result<Vec<ShotSuggestion>, VisionError> {
        let Some(context) = ShotContext::from_state(state) else {
            return Ok(Vec::new());
        };
        let context = Arc::new(context);
        let evaluator = Arc::new(ShotEvaluator::new(self.store.snapshot().physics.clone()));

        let handles = context.candidates(self.config.game_mode).into_iter().map(|(target, pocket)| {
            let context = Arc::clone(&context);
            let evaluator = Arc::clone(&evaluator);
            tokio::task::spawn_blocking(move || evaluator.evaluate(&context, &target, &pocket))
        });

        let mut suggestions = Vec::new();
        for result in join_all(handles).await {
            if let Some(suggestion) = result.map_err(|e| VisionError::TaskFailed(e.to_string()))? {
                suggestions.push(suggestion);
            }
        }
        Ok(rank(suggestions))
    }

    /// The primary path of `ball` plus the chains of every ball it strikes,
    /// each chain simulated on its own blocking task. Identical to
    /// `TrajectorySimulator::simulate_multiple`.
    pub async fn simulate_shot(
        &self,
        ball: Ball,
        direction: f64,
        power: f64,
        bounds: Region,
        obstacles: Vec<Ball>,
        pockets: Vec<Pocket>,
    ) -> Result<Vec<TrajectoryPath>, VisionError> {
        let simulator = Arc::new(TrajectorySimulator::new(self.store.snapshot().physics.clone()));
        let obstacles = Arc::new(obstacles);
        let pockets = Arc::new(pockets);

        let primary = {
            let (simulator, obstacles, pockets) = (Arc::clone(&simulator), Arc::clone(&obstacles), Arc::clone(&pockets));
            tokio::task::spawn_blocking(move || simulator.simulate(&ball, direction, power, &bounds, &obstacles, &pockets))
                .await
                .map_err(|e| VisionError::TaskFailed(e.to_string()))?
        };

        let handles = primary.ball_hits().copied().map(|event| {
            let (simulator, obstacles, pockets) = (Arc::clone(&simulator), Arc::clone(&obstacles), Arc::clone(&pockets));
            tokio::task::spawn_blocking(move || simulator.follow_struck(&event, &obstacles, &bounds, &pockets, 1))
        });
        let chains = join_all(handles).await;

        let mut paths = vec![primary];
        for chain in chains {
            paths.extend(chain.map_err(|e| VisionError::TaskFailed(e.to_string()))?);
        }
        Ok(paths)
    }
}

fn report_kind(report: &Report) -> &'static str {
    match report {
        Report::Detected(_) => "detected",
        Report::Unchanged => "unchanged",
        Report::NoTable { .. } => "no table",
        Report::LowConfidence { .. } => "low confidence",
        Report::NeedsCalibration { .. } => "needs calibration",
    }
}

/// Input of the calibration service.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    Sample(CalibrationSample),
    Correction(ManualCorrection),
}

/// What the service hands to persistence after every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub snapshot: ConfigSnapshot,
    pub sample: Option<CalibrationSample>,
}

impl CalibrationRecord {
    pub fn to_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The persistent key/value storage collaborator. Called from the blocking
/// pool; its failures are logged and never reach the detection loop.
pub trait CalibrationSink: Send + Sync + 'static {
    fn persist(&self, record: &CalibrationRecord) -> Result<(), PersistenceError>;
}

/// Cheap, cloneable sender side of the calibration service.
#[derive(Debug, Clone)]
pub struct CalibrationHandle {
    sender: mpsc::Sender<CalibrationEvent>,
}

impl CalibrationHandle {
    /// Queues `event` without waiting. Returns `false` (and logs) when the
    /// queue is full or the service has stopped.
    pub fn submit(&self, event: CalibrationEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Calibration queue full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Calibration service stopped, event dropped");
                false
            }
        }
    }
}

pub struct CalibrationService;

impl CalibrationService {
    /// Spawns the service task. It runs until every handle is dropped and
    /// then returns the calibrator.
    pub fn spawn(
        calibrator: Calibrator,
        store: Arc<ConfigStore>,
        sink: Option<Arc<dyn CalibrationSink>>,
        capacity: usize,
    ) -> (CalibrationHandle, JoinHandle<Calibrator>) {
        let (sender, mut receiver) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(async move {
            let mut calibrator = calibrator;
            while let Some(event) = receiver.recv().await {
                let sample = match event {
                    CalibrationEvent::Sample(sample) => {
                        if !calibrator.record(sample.clone()) {
                            continue;
                        }
                        Some(sample)
                    }
                    CalibrationEvent::Correction(correction) => {
                        calibrator.apply_correction(correction);
                        None
                    }
                };

                let snapshot = calibrator.snapshot();
                if *store.snapshot() != snapshot {
                    match store.publish(snapshot.clone()) {
                        Ok(()) => info!("Published recalibrated config"),
                        Err(err) => {
                            warn!("Recalibrated config rejected: {}", err);
                            continue;
                        }
                    }
                }

                if let Some(sink) = &sink {
                    let sink = Arc::clone(sink);
                    let record = CalibrationRecord { snapshot, sample };
                    tokio::task::spawn_blocking(move || {
                        if let Err(err) = sink.persist(&record) {
                            warn!("Persisting calibration failed: {}", err);
                        }
                    });
                }
            }
            debug!("Calibration service stopped");
            calibrator
        });
        (CalibrationHandle { sender }, task)
    }
}
