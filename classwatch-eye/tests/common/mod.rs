//! Fakes shared by the pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use classwatch_eye::{
    CancellationToken, CaptureSource, Detection, DetectionResponse, Detector, Frame, PipelineError,
    SourceKind, SourceMetadata,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Acquire/release counts observed by a [`CountingSource`]
#[derive(Debug, Clone, Default)]
pub struct SourceCounters {
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub captures: Arc<AtomicUsize>,
}

impl SourceCounters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

/// Capture source that renders placeholder frames and counts its lifecycle
pub struct CountingSource {
    duration_secs: Option<f64>,
    fail_open: bool,
    failing_captures: HashSet<usize>,
    open: bool,
    counters: SourceCounters,
}

impl CountingSource {
    /// Seekable file of the given duration
    pub fn file(duration_secs: f64) -> Self {
        Self {
            duration_secs: Some(duration_secs),
            fail_open: false,
            failing_captures: HashSet::new(),
            open: false,
            counters: SourceCounters::default(),
        }
    }

    /// Live camera feed
    pub fn camera() -> Self {
        Self {
            duration_secs: None,
            ..Self::file(0.0)
        }
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Make the n-th capture (1-based) fail
    pub fn failing_capture(mut self, n: usize) -> Self {
        self.failing_captures.insert(n);
        self
    }

    pub fn counters(&self) -> SourceCounters {
        self.counters.clone()
    }
}

#[async_trait]
impl CaptureSource for CountingSource {
    fn kind(&self) -> SourceKind {
        if self.duration_secs.is_some() {
            SourceKind::File
        } else {
            SourceKind::Live
        }
    }

    async fn open(&mut self) -> Result<SourceMetadata, PipelineError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(PipelineError::SourceUnavailable("Permission denied".to_string()));
        }
        self.open = true;
        Ok(SourceMetadata {
            duration_secs: self.duration_secs,
            width: 640,
            height: 480,
        })
    }

    fn metadata(&self) -> Option<SourceMetadata> {
        self.open.then_some(SourceMetadata {
            duration_secs: self.duration_secs,
            width: 640,
            height: 480,
        })
    }

    async fn capture_frame_at(&self, timestamp_secs: f64) -> Result<Frame, PipelineError> {
        let n = self.counters.captures.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.open {
            return Err(PipelineError::CaptureFailed("Source is closed".to_string()));
        }
        if self.failing_captures.contains(&n) {
            return Err(PipelineError::CaptureFailed(format!("Decoder stalled on capture {}", n)));
        }
        Ok(Frame::new(timestamp_secs, Bytes::from_static(b"jpeg-bytes"), 640, 480))
    }

    fn close(&mut self) {
        self.open = false;
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Detector with scripted latency and failures.
///
/// Every successful call returns one `attentive` detection.
#[derive(Default)]
pub struct ScriptedDetector {
    delay: Option<Duration>,
    ignore_cancel: bool,
    failing_calls: HashSet<usize>,
    cancel_on_call: Option<usize>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    timestamps: Mutex<Vec<f64>>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each call waits this long (cancellable)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The delay runs to completion even after the token fires
    pub fn ignoring_cancel(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }

    /// The n-th call (1-based) fails with `DetectionFailed`
    pub fn failing_call(mut self, n: usize) -> Self {
        self.failing_calls.insert(n);
        self
    }

    /// The n-th call cancels the run's token, then succeeds
    pub fn cancelling_on_call(mut self, n: usize) -> Self {
        self.cancel_on_call = Some(n);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.timestamps.lock().clone()
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(&self, frame: &Frame, cancel: &CancellationToken) -> Result<DetectionResponse, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.timestamps.lock().push(frame.timestamp_secs);

        let outcome = match self.delay {
            Some(delay) if self.ignore_cancel => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Some(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(PipelineError::Cancelled),
                    _ = tokio::time::sleep(delay) => Ok(()),
                }
            }
            None => Ok(()),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome?;

        if self.failing_calls.contains(&n) {
            return Err(PipelineError::DetectionFailed(format!("Server returned 500 on call {}", n)));
        }
        if self.cancel_on_call == Some(n) {
            cancel.cancel();
        }

        Ok(DetectionResponse {
            success: Some(true),
            detections: vec![Detection::new("attentive", 0.9).with_bbox([1.0, 2.0, 3.0, 4.0])],
            visualization: Some(format!("/vis/{}.jpg", n)),
            processing_time: Some(0.05),
            detection_count: Some(1),
            ..Default::default()
        })
    }

    fn base_url(&self) -> String {
        "http://127.0.0.1:7000".to_string()
    }
}
