//! Live-mode controller ("Continuous Detection" and "Capture & Detect")
//!
//! A periodic tick asks for one detection of the newest camera frame. At most
//! one request is ever in flight: a tick that fires while the previous one is
//! still waiting on the network is dropped, never queued. Only the latest
//! result is kept.

use crate::cancel::CancellationToken;
use crate::capture::{CaptureSource, SourceGuard, SourceMetadata};
use crate::client::Detector;
use crate::config::{PipelineConfig, SamplingRate};
use crate::detection::{Detection, DetectionResponse};
use crate::error::PipelineError;
use crate::sampler::LiveTicker;
use crate::state::{FailureReason, PipelineState, StateCell};
use crate::summary::BehaviorSummary;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Camera status as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiveStatus {
    Initializing,
    StreamActive,
    /// Opening the camera failed; `retry_camera` may be offered
    PermissionDenied,
}

/// Most recent detection shown for the live feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub timestamp_secs: f64,
    pub detections: Vec<Detection>,
    pub visualization_url: Option<String>,
    pub processing_time: Option<f64>,
    pub detection_count: u64,
    pub summary: BehaviorSummary,
    pub captured_at: DateTime<Utc>,
}

impl LiveSnapshot {
    fn from_response(timestamp_secs: f64, response: DetectionResponse, base_url: &str) -> Self {
        Self {
            timestamp_secs,
            visualization_url: response.visualization_url(base_url),
            processing_time: response.processing_time,
            detection_count: response.count(),
            summary: BehaviorSummary::from_detections(&response.detections),
            detections: response.detections,
            captured_at: Utc::now(),
        }
    }
}

/// Tick bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStats {
    pub ticks: u64,
    /// Ticks dropped because a request was still in flight
    pub skipped_ticks: u64,
    pub requests: u64,
    pub completed: u64,
}

/// Releases the single in-flight slot when dropped
struct InFlight<S: CaptureSource + 'static> {
    shared: Arc<Shared<S>>,
}

impl<S: CaptureSource + 'static> Drop for InFlight<S> {
    fn drop(&mut self) {
        self.shared.in_flight.store(false, Ordering::Release);
    }
}

struct Shared<S: CaptureSource + 'static> {
    source: tokio::sync::RwLock<SourceGuard<S>>,
    detector: Arc<dyn Detector>,
    base_url: String,
    in_flight: AtomicBool,
    latest: RwLock<Option<LiveSnapshot>>,
    last_error: RwLock<Option<String>>,
    status: RwLock<LiveStatus>,
    ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    requests: AtomicU64,
    completed: AtomicU64,
}

impl<S: CaptureSource + 'static> Shared<S> {
    /// Claim the in-flight slot, or `None` if a request is already running
    fn try_claim(self: &Arc<Self>) -> Option<InFlight<S>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight { shared: self.clone() })
    }

    fn on_tick(self: &Arc<Self>, cancel: &CancellationToken) {
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let Some(slot) = self.try_claim() else {
            self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
            debug!("Previous detection still in flight, skipping tick");
            return;
        };

        let shared = self.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _slot = slot;
            match shared.detect_once(&cancel).await {
                Ok(_) => {}
                Err(PipelineError::Cancelled) => debug!("Live detection cancelled"),
                Err(PipelineError::CaptureFailed(msg)) => warn!("Skipping tick: {}", msg),
                Err(e) => warn!("Live detection failed: {}", e),
            }
        });
    }

    /// Capture the newest frame and detect on it.
    ///
    /// Detection failures are recorded as the visible error; capture failures
    /// are only returned.
    async fn detect_once(&self, cancel: &CancellationToken) -> Result<LiveSnapshot, PipelineError> {
        let frame = {
            let source = self.source.read().await;
            if !source.is_held() {
                return Err(PipelineError::CaptureFailed("Camera is not started".to_string()));
            }
            source.capture_frame_at(0.0).await?
        };

        self.requests.fetch_add(1, Ordering::Relaxed);
        let response = match self.detector.detect(&frame, cancel).await {
            Ok(response) => response,
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                *self.last_error.write() = Some(e.to_string());
                return Err(e);
            }
        };

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let snapshot = LiveSnapshot::from_response(frame.timestamp_secs, response, &self.base_url);
        *self.latest.write() = Some(snapshot.clone());
        *self.last_error.write() = None;
        self.completed.fetch_add(1, Ordering::Relaxed);
        debug!("Live detection: {} objects", snapshot.detection_count);
        Ok(snapshot)
    }
}

/// Live webcam pipeline
pub struct LiveDetection<S: CaptureSource + 'static> {
    config: PipelineConfig,
    shared: Arc<Shared<S>>,
    ticker: LiveTicker,
    state: StateCell,
    cancel: Mutex<CancellationToken>,
}

impl<S: CaptureSource + 'static> LiveDetection<S> {
    pub fn new(config: PipelineConfig, source: S, detector: Arc<dyn Detector>) -> Result<Self, PipelineError> {
        config.validate()?;
        let base_url = detector.base_url();
        Ok(Self {
            config,
            shared: Arc::new(Shared {
                source: tokio::sync::RwLock::new(SourceGuard::new(source)),
                detector,
                base_url,
                in_flight: AtomicBool::new(false),
                latest: RwLock::new(None),
                last_error: RwLock::new(None),
                status: RwLock::new(LiveStatus::Initializing),
                ticks: AtomicU64::new(0),
                skipped_ticks: AtomicU64::new(0),
                requests: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            }),
            ticker: LiveTicker::new(),
            state: StateCell::new(),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    pub fn status(&self) -> LiveStatus {
        *self.shared.status.read()
    }

    pub fn rate(&self) -> SamplingRate {
        self.config.sampling_rate
    }

    pub fn is_detecting(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn is_continuous(&self) -> bool {
        self.ticker.is_active()
    }

    pub fn latest(&self) -> Option<LiveSnapshot> {
        self.shared.latest.read().clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.read().clone()
    }

    pub fn clear_error(&self) {
        *self.shared.last_error.write() = None;
    }

    pub fn stats(&self) -> LiveStats {
        LiveStats {
            ticks: self.shared.ticks.load(Ordering::Relaxed),
            skipped_ticks: self.shared.skipped_ticks.load(Ordering::Relaxed),
            requests: self.shared.requests.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
        }
    }

    pub fn ticker(&self) -> &LiveTicker {
        &self.ticker
    }

    /// Open the camera and wait for the stream to become active
    pub async fn start_camera(&mut self) -> Result<SourceMetadata, PipelineError> {
        *self.shared.status.write() = LiveStatus::Initializing;

        let opened = {
            let mut source = self.shared.source.write().await;
            let opened = source.acquire().await;
            if opened.is_err() {
                source.release();
            }
            opened
        };

        match opened {
            Ok(metadata) => {
                *self.shared.status.write() = LiveStatus::StreamActive;
                self.state.transition(PipelineState::SourceReady)?;
                info!("Live stream active ({}x{})", metadata.width, metadata.height);
                Ok(metadata)
            }
            Err(e) => {
                *self.shared.status.write() = LiveStatus::PermissionDenied;
                *self.shared.last_error.write() = Some(e.to_string());
                self.state.fail(&e);
                Err(e)
            }
        }
    }

    /// Reopen the camera after a failed start
    pub async fn retry_camera(&mut self) -> Result<SourceMetadata, PipelineError> {
        if self.state.get().is_terminal() {
            self.state.transition(PipelineState::Idle)?;
        }
        self.clear_error();
        self.start_camera().await
    }

    /// Begin detecting on every tick of the configured rate
    pub fn start_continuous(&mut self) -> Result<(), PipelineError> {
        if self.ticker.is_active() {
            return Ok(());
        }
        let held = self
            .shared
            .source
            .try_read()
            .map(|source| source.is_held())
            .unwrap_or(false);
        if !held {
            return Err(PipelineError::SourceUnavailable("Camera is not started".to_string()));
        }
        self.state.transition(PipelineState::Running)?;

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        self.install_ticker(token);
        info!("Continuous detection started at {}", self.config.sampling_rate.label());
        Ok(())
    }

    /// Change the tick rate; a running tick source is replaced, results are kept
    pub fn set_rate(&mut self, rate: SamplingRate) {
        if rate == self.config.sampling_rate {
            return;
        }
        self.config.sampling_rate = rate;
        if self.ticker.is_active() {
            let token = self.cancel.lock().clone();
            self.install_ticker(token);
            info!("Sampling rate changed to {}", rate.label());
        }
    }

    fn install_ticker(&mut self, token: CancellationToken) {
        let shared = self.shared.clone();
        self.ticker
            .install(self.config.sampling_rate, move || shared.on_tick(&token));
    }

    /// Stop ticking. The last result stays visible.
    pub fn stop_continuous(&mut self) -> Result<(), PipelineError> {
        if !self.ticker.teardown() {
            return Ok(());
        }
        self.cancel.lock().cancel();
        self.state.transition(PipelineState::Cancelling)?;
        self.state.transition(PipelineState::Failed(FailureReason::Cancelled))?;
        info!("Continuous detection stopped");
        Ok(())
    }

    /// One capture and one detection, with any error returned to the caller.
    ///
    /// Refused while another detection is in flight.
    pub async fn capture_and_detect(&self) -> Result<LiveSnapshot, PipelineError> {
        let _slot = self.shared.try_claim().ok_or_else(|| {
            PipelineError::DetectionFailed("A detection is already in progress".to_string())
        })?;

        let cancel = self.cancel.lock().clone();
        let cancel = if cancel.is_cancelled() {
            CancellationToken::new()
        } else {
            cancel
        };

        match self.shared.detect_once(&cancel).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                *self.shared.last_error.write() = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Stop everything and give the camera back
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stop_continuous() {
            debug!("Stop during shutdown: {}", e);
        }
        self.cancel.lock().cancel();
        self.shared.source.write().await.release();
        *self.shared.status.write() = LiveStatus::Initializing;
        if self.state.get() != PipelineState::Idle {
            if let Err(e) = self.state.transition(PipelineState::Idle) {
                warn!("Live pipeline left in {}: {}", self.state.get(), e);
            }
        }
        info!("Live pipeline shut down");
    }
}

impl<S: CaptureSource + 'static> Drop for LiveDetection<S> {
    fn drop(&mut self) {
        self.ticker.teardown();
        self.cancel.lock().cancel();
        if let Ok(mut source) = self.shared.source.try_write() {
            source.release();
        }
    }
}
