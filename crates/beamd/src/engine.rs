//! Session controller and the emotion sampling loop.
//!
//! A session acquires the camera and the detector, then runs one tokio task
//! that ticks at the display refresh rate. Ticks closer together than the
//! sampling interval are skipped; the others capture a frame, run the
//! detector on the blocking pool and push the readout to the sink.

use crate::config::Config;
use crate::sink::{present, PresentationSink};
use beam_core::{DetectorError, ExpressionDetector, OnnxExpressionDetector, Readout, Sampler, SamplerSettings};
use beam_hw::{Camera, CameraError, Frame, FrameSource};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("capability worker failed: {0}")]
    Worker(String),
}

/// Acquires the collaborators a session needs. Both calls may block.
pub trait Capabilities: Send + Sync + 'static {
    fn open_camera(&self) -> Result<Box<dyn FrameSource>, CameraError>;
    fn load_detector(&self) -> Result<Box<dyn ExpressionDetector>, DetectorError>;
}

/// V4L2 camera plus the SCRFD/FER+ ONNX detector.
pub struct DeviceCapabilities {
    camera_device: String,
    frame_width: u32,
    frame_height: u32,
    face_model: String,
    expression_model: String,
}

impl DeviceCapabilities {
    pub fn from_config(config: &Config) -> Self {
        Self {
            camera_device: config.camera_device.clone(),
            frame_width: config.frame_width,
            frame_height: config.frame_height,
            face_model: config.face_model_path(),
            expression_model: config.expression_model_path(),
        }
    }
}

impl Capabilities for DeviceCapabilities {
    fn open_camera(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        let camera = Camera::open(&self.camera_device, self.frame_width, self.frame_height)?;
        tracing::info!(
            device = %camera.device_path,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            "camera opened"
        );
        Ok(Box::new(camera))
    }

    fn load_detector(&self) -> Result<Box<dyn ExpressionDetector>, DetectorError> {
        let detector = OnnxExpressionDetector::load(&self.face_model, &self.expression_model)?;
        tracing::info!(
            face_model = %self.face_model,
            expression_model = %self.expression_model,
            "expression detector loaded"
        );
        Ok(Box::new(detector))
    }
}

/// Timing and mapping parameters for every session.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub sampler: SamplerSettings,
    /// Scheduling tick period (display refresh).
    pub tick: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sampler: config.sampler_settings(),
            tick: config.tick_period(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    /// Stop requested; the camera and detector are not released yet.
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session is running.
    Started,
    /// A session was starting, running or stopping; nothing was acquired.
    AlreadyActive,
    /// `stop()` arrived while capabilities were being acquired.
    Cancelled,
}

enum Phase {
    Idle,
    Starting {
        id: u64,
        cancel: CancellationToken,
        /// Fires once `start()` has either handed the stage to the loop or
        /// dropped it.
        settled: CancellationToken,
    },
    Running {
        id: u64,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
    Stopping {
        id: u64,
        /// Fires once the session's camera and detector are dropped.
        released: CancellationToken,
    },
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Idle => SessionState::Idle,
            Phase::Starting { .. } => SessionState::Starting,
            Phase::Running { task, .. } if task.is_finished() => SessionState::Idle,
            Phase::Running { .. } => SessionState::Running,
            Phase::Stopping { .. } => SessionState::Stopping,
        }
    }

    fn is_stopping(&self, session: u64) -> bool {
        matches!(self, Phase::Stopping { id, .. } if *id == session)
    }
}

/// Owns the session lifecycle: at most one session holds the camera at a time.
pub struct SessionController {
    capabilities: Arc<dyn Capabilities>,
    sink: Arc<dyn PresentationSink>,
    settings: EngineSettings,
    phase: Mutex<Phase>,
    next_id: AtomicU64,
}

impl SessionController {
    pub fn new(
        capabilities: Arc<dyn Capabilities>,
        sink: Arc<dyn PresentationSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            capabilities,
            sink,
            settings,
            phase: Mutex::new(Phase::Idle),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.phase.lock().await.state()
    }

    /// Acquire the camera, then the detector, then start sampling.
    ///
    /// A call while a session is starting, running or still stopping is a
    /// no-op. On failure the controller goes back to idle and nothing is
    /// retried.
    pub async fn start(&self) -> Result<StartOutcome, EngineError> {
        let (id, cancel, settled) = {
            let mut phase = self.phase.lock().await;
            if phase.state() != SessionState::Idle {
                tracing::info!(state = ?phase.state(), "start requested while a session is active; ignoring");
                return Ok(StartOutcome::AlreadyActive);
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let cancel = CancellationToken::new();
            let settled = CancellationToken::new();
            *phase = Phase::Starting {
                id,
                cancel: cancel.clone(),
                settled: settled.clone(),
            };
            (id, cancel, settled)
        };
        // Declared before the phase guard below so waiters wake after it is released.
        let _settled = settled.drop_guard();

        tracing::info!(session = id, "starting session");
        let acquired = acquire(Arc::clone(&self.capabilities)).await;

        let mut phase = self.phase.lock().await;
        let still_ours = matches!(&*phase, Phase::Starting { id: current, .. } if *current == id);

        let stage = match acquired {
            Ok(stage) => stage,
            Err(e) => {
                if still_ours || phase.is_stopping(id) {
                    *phase = Phase::Idle;
                }
                tracing::warn!(session = id, error = %e, "session failed to start");
                return Err(e);
            }
        };

        if !still_ours || cancel.is_cancelled() {
            tracing::info!(session = id, "session stopped during start-up; releasing camera and detector");
            drop(stage);
            if still_ours || phase.is_stopping(id) {
                *phase = Phase::Idle;
            }
            return Ok(StartOutcome::Cancelled);
        }

        let task = tokio::spawn(sampling_loop(
            id,
            stage,
            Sampler::new(self.settings.sampler),
            Arc::clone(&self.sink),
            cancel.clone(),
            self.settings.tick,
        ));
        *phase = Phase::Running { id, cancel, task };
        tracing::info!(session = id, "session running");
        Ok(StartOutcome::Started)
    }

    /// Deactivate the session and wait until its camera and detector are
    /// released. The controller reports `Stopping` until then.
    ///
    /// Returns false if nothing was active.
    pub async fn stop(&self) -> bool {
        let mut phase = self.phase.lock().await;
        match std::mem::replace(&mut *phase, Phase::Idle) {
            Phase::Idle => {
                tracing::debug!("stop requested while idle");
                false
            }
            Phase::Stopping { id, released } => {
                *phase = Phase::Stopping {
                    id,
                    released: released.clone(),
                };
                drop(phase);
                tracing::debug!(session = id, "stop already in progress; waiting");
                released.cancelled().await;
                false
            }
            Phase::Starting { id, cancel, settled } => {
                cancel.cancel();
                *phase = Phase::Stopping {
                    id,
                    released: settled.clone(),
                };
                drop(phase);
                tracing::info!(session = id, "stop requested during start-up");
                settled.cancelled().await;
                self.finish_stop(id).await;
                tracing::info!(session = id, "session stopped");
                true
            }
            Phase::Running { id, cancel, task } => {
                let was_running = !task.is_finished();
                let released = CancellationToken::new();
                cancel.cancel();
                *phase = Phase::Stopping {
                    id,
                    released: released.clone(),
                };
                drop(phase);
                if let Err(e) = task.await {
                    tracing::error!(session = id, error = %e, "sampling loop task failed");
                }
                self.finish_stop(id).await;
                released.cancel();
                tracing::info!(session = id, "session stopped");
                was_running
            }
        }
    }

    async fn finish_stop(&self, id: u64) {
        let mut phase = self.phase.lock().await;
        if phase.is_stopping(id) {
            *phase = Phase::Idle;
        }
    }
}

/// The camera and detector owned by one running session.
struct Stage {
    camera: Box<dyn FrameSource>,
    detector: Box<dyn ExpressionDetector>,
}

enum Sample {
    Frame {
        frame: Frame,
        result: Result<Option<beam_core::Detection>, DetectorError>,
    },
    CaptureFailed(CameraError),
}

impl Stage {
    fn sample(&mut self) -> Sample {
        match self.camera.next_frame() {
            Ok(frame) => {
                let result = self.detector.detect(&frame.data, frame.width, frame.height);
                Sample::Frame { frame, result }
            }
            Err(e) => Sample::CaptureFailed(e),
        }
    }
}

async fn acquire(capabilities: Arc<dyn Capabilities>) -> Result<Stage, EngineError> {
    let caps = Arc::clone(&capabilities);
    let camera = tokio::task::spawn_blocking(move || caps.open_camera())
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))??;

    let detector = tokio::task::spawn_blocking(move || capabilities.load_detector())
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))??;

    Ok(Stage { camera, detector })
}

/// One session's tick chain. Exits when `cancel` fires or the blocking
/// worker panics.
async fn sampling_loop(
    id: u64,
    mut stage: Stage,
    mut sampler: Sampler,
    sink: Arc<dyn PresentationSink>,
    cancel: CancellationToken,
    tick: Duration,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(session = id, tick_ms = tick.as_secs_f64() * 1000.0, "sampling loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if cancel.is_cancelled() {
            break;
        }
        if !sampler.poll(Instant::now()) {
            tracing::trace!(session = id, "tick inside sampling interval; skipped");
            continue;
        }

        let joined = tokio::task::spawn_blocking(move || {
            let sample = stage.sample();
            (stage, sample)
        })
        .await;
        let sample = match joined {
            Ok((returned, sample)) => {
                stage = returned;
                sample
            }
            Err(e) => {
                tracing::error!(session = id, error = %e, "capture worker panicked; ending session loop");
                break;
            }
        };

        // Results that land after stop() are dropped, never applied.
        if cancel.is_cancelled() {
            tracing::debug!(session = id, "discarding result that arrived after stop");
            break;
        }

        let readout = apply(id, &mut sampler, sample, sink.as_ref());
        tracing::trace!(session = id, label = readout.label(), "tick processed");
    }

    tracing::info!(session = id, score = sampler.score(), "sampling loop exited");
}

fn apply(id: u64, sampler: &mut Sampler, sample: Sample, sink: &dyn PresentationSink) -> Readout {
    match sample {
        Sample::Frame { frame, result } => {
            let detection = result.unwrap_or_else(|e| {
                tracing::warn!(session = id, error = %e, "detector failed; treating as no face");
                None
            });
            let readout = sampler.observe(detection.as_ref());
            present(sink, &readout, &frame);
            readout
        }
        Sample::CaptureFailed(e) => {
            tracing::warn!(session = id, error = %e, "frame capture failed; treating as no face");
            let readout = sampler.observe(None);
            sink.set_score_text(readout.label());
            readout
        }
    }
}
