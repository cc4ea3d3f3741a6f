//! File-mode pipeline controller ("Start Frame Analysis")
//!
//! Drives one seekable source through its sample schedule, strictly one frame
//! in flight at a time, and aggregates the detections in capture order.
//!
//! Failure policy:
//! - opening the source and the duration limit abort the run
//! - a frame that cannot be captured or detected is recorded as an empty
//!   result and the run continues
//! - cancellation stops after the in-flight request settles and keeps every
//!   result already collected

use crate::cancel::CancellationToken;
use crate::capture::{CaptureSource, SourceGuard, SourceMetadata};
use crate::client::Detector;
use crate::config::PipelineConfig;
use crate::detection::DetectionResult;
use crate::error::PipelineError;
use crate::sampler::{sample_count, SampleSchedule};
use crate::state::{FailureReason, PipelineState, StateCell};
use crate::summary::BehaviorSummary;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Position within a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current_frame: usize,
    pub total_frames: usize,
    /// `floor(current / total * 100)`, capped at 100
    pub percent: u8,
}

impl Progress {
    pub fn new(current_frame: usize, total_frames: usize) -> Self {
        let percent = if total_frames == 0 {
            0
        } else {
            ((current_frame as f64 / total_frames as f64) * 100.0).floor().min(100.0) as u8
        };
        Self {
            current_frame,
            total_frames,
            percent,
        }
    }
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// `Completed` or `Failed(Cancelled)`
    pub state: PipelineState,
    pub results: Vec<DetectionResult>,
    pub total_frames: usize,
    pub summary: BehaviorSummary,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.state == PipelineState::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Frames whose capture or detection failed
    pub fn failed_frames(&self) -> usize {
        self.results.iter().filter(|r| r.is_failed()).count()
    }
}

/// Read-only view of a controller plus the stop button.
///
/// Cheap to clone and safe to move to another task while the run is going.
#[derive(Clone)]
pub struct PipelineHandle {
    cancel: Arc<Mutex<CancellationToken>>,
    state: watch::Receiver<PipelineState>,
    progress: watch::Receiver<Progress>,
}

impl PipelineHandle {
    /// Request the current run to stop
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    pub fn state(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    pub fn progress(&self) -> Progress {
        *self.progress.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }

    pub fn watch_progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }
}

/// Orchestrates capture source, sampler and detector for file analysis
pub struct FrameAnalysis<S: CaptureSource> {
    config: PipelineConfig,
    source: SourceGuard<S>,
    detector: Arc<dyn Detector>,
    state: StateCell,
    progress: watch::Sender<Progress>,
    cancel: Arc<Mutex<CancellationToken>>,
    metadata: Option<SourceMetadata>,
    results: Vec<DetectionResult>,
}

impl<S: CaptureSource> FrameAnalysis<S> {
    pub fn new(config: PipelineConfig, source: S, detector: Arc<dyn Detector>) -> Result<Self, PipelineError> {
        config.validate()?;
        let (progress, _) = watch::channel(Progress::default());
        Ok(Self {
            config,
            source: SourceGuard::new(source),
            detector,
            state: StateCell::new(),
            progress,
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            metadata: None,
            results: Vec::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            cancel: self.cancel.clone(),
            state: self.state.subscribe(),
            progress: self.progress.subscribe(),
        }
    }

    pub fn progress(&self) -> Progress {
        *self.progress.borrow()
    }

    /// Results of the current or most recent run, in capture order
    pub fn results(&self) -> &[DetectionResult] {
        &self.results
    }

    pub fn metadata(&self) -> Option<SourceMetadata> {
        self.metadata
    }

    /// Frames a run would analyze, known once the source is ready
    pub fn estimated_frames(&self) -> Option<usize> {
        self.metadata
            .and_then(|m| m.duration_secs)
            .map(|d| sample_count(d, self.config.sampling_rate))
    }

    /// Open the source and wait for its metadata
    pub async fn prepare(&mut self) -> Result<SourceMetadata, PipelineError> {
        let current = self.state.get();
        if current.is_terminal() {
            self.state.transition(PipelineState::Idle)?;
        } else if current != PipelineState::Idle {
            return Err(PipelineError::InvalidTransition {
                from: current.to_string(),
                to: PipelineState::SourceReady.to_string(),
            });
        }

        // a stop issued from here on applies to the upcoming run
        *self.cancel.lock() = CancellationToken::new();

        match self.source.acquire().await {
            Ok(metadata) => {
                self.metadata = Some(metadata);
                self.state.transition(PipelineState::SourceReady)?;
                if let Some(frames) = self.estimated_frames() {
                    info!(
                        "Source ready: {}x{}, {:.2}s, ~{} frames at {}",
                        metadata.width,
                        metadata.height,
                        metadata.duration_secs.unwrap_or_default(),
                        frames,
                        self.config.sampling_rate
                    );
                }
                Ok(metadata)
            }
            Err(e) => {
                self.source.release();
                self.metadata = None;
                self.state.fail(&e);
                Err(e)
            }
        }
    }

    /// Analyze every sampled frame.
    ///
    /// Returns `Ok` for both natural completion and cancellation; the report's
    /// state tells them apart. Run-aborting errors are returned as `Err`.
    pub async fn run(&mut self) -> Result<RunReport, PipelineError> {
        if self.state.get() != PipelineState::SourceReady {
            self.prepare().await?;
        }

        let outcome = self.run_prepared().await;
        self.source.release();

        match outcome {
            Ok(cancelled) => {
                if cancelled {
                    if self.state.get() != PipelineState::Cancelling {
                        self.state.transition(PipelineState::Cancelling)?;
                    }
                    self.state.transition(PipelineState::Failed(FailureReason::Cancelled))?;
                } else {
                    self.state.transition(PipelineState::Completed)?;
                }

                let report = RunReport {
                    state: self.state.get(),
                    results: self.results.clone(),
                    total_frames: self.progress.borrow().total_frames,
                    summary: BehaviorSummary::from_results(&self.results),
                };
                info!(
                    "Analysis {}: {} of {} frames, {} detections",
                    report.state,
                    report.results.len(),
                    report.total_frames,
                    report.summary.detections_found
                );
                Ok(report)
            }
            Err(e) => {
                self.state.fail(&e);
                Err(e)
            }
        }
    }

    /// Returns whether the run was cancelled
    async fn run_prepared(&mut self) -> Result<bool, PipelineError> {
        let metadata = self
            .metadata
            .ok_or_else(|| PipelineError::SourceUnavailable("Source metadata not loaded".to_string()))?;
        let duration = metadata.duration_secs.ok_or_else(|| {
            PipelineError::Config("Frame analysis needs a source with a known duration".to_string())
        })?;

        if let Some(limit) = self.config.max_duration_secs {
            if duration > limit {
                return Err(PipelineError::DurationExceeded { duration, limit });
            }
        }

        let schedule = SampleSchedule::for_file(duration, self.config.sampling_rate);
        let total = schedule.total_frames();
        let token = self.cancel.lock().clone();

        self.results.clear();
        self.progress.send_replace(Progress::new(0, total));
        self.state.transition(PipelineState::Running)?;
        info!("Analyzing {} frames at {}", total, self.config.sampling_rate);

        let base_url = self.detector.base_url();

        for (index, timestamp) in schedule.iter() {
            if token.is_cancelled() {
                debug!("Cancellation observed before frame {}", index + 1);
                self.enter_cancelling()?;
                return Ok(true);
            }

            let step = analyze_frame(&self.source, self.detector.as_ref(), &token, &base_url, index, timestamp);
            tokio::pin!(step);

            // stop requested mid-frame: report Cancelling while the step settles
            let result = tokio::select! {
                biased;
                result = &mut step => result,
                _ = token.cancelled() => {
                    self.enter_cancelling()?;
                    step.await
                }
            };

            let Some(result) = result else {
                self.enter_cancelling()?;
                return Ok(true);
            };
            self.results.push(result);
            self.progress.send_replace(Progress::new(index + 1, total));
        }

        if token.is_cancelled() {
            self.enter_cancelling()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn enter_cancelling(&self) -> Result<(), PipelineError> {
        if self.state.get() == PipelineState::Running {
            self.state.transition(PipelineState::Cancelling)?;
        }
        Ok(())
    }
}

/// Capture and detect one sampled frame; `None` once the request was cancelled
async fn analyze_frame<S: CaptureSource>(
    source: &SourceGuard<S>,
    detector: &dyn Detector,
    token: &CancellationToken,
    base_url: &str,
    index: usize,
    timestamp: f64,
) -> Option<DetectionResult> {
    let frame = match source.capture_frame_at(timestamp).await {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Capture failed for frame {} at {:.2}s: {}", index + 1, timestamp, e);
            return Some(DetectionResult::empty(timestamp, e.to_string()));
        }
    };

    match detector.detect(&frame, token).await {
        Ok(response) => Some(DetectionResult::from_response(timestamp, response, base_url).with_frame(frame)),
        Err(PipelineError::Cancelled) => {
            debug!("Frame {} detection cancelled in flight", index + 1);
            None
        }
        Err(e) => {
            warn!("Detection failed for frame {} at {:.2}s: {}", index + 1, timestamp, e);
            Some(DetectionResult::empty(timestamp, e.to_string()).with_frame(frame))
        }
    }
}
