//! classwatch-eye: frame sampling and behavior detection pipeline
//!
//! Pulls still frames from a live camera or a video file at a fixed rate,
//! submits them one at a time to the remote Detection API and aggregates
//! what comes back.
//!
//! - [`capture`]: camera and video file sources behind [`CaptureSource`]
//! - [`sampler`]: file timestamp schedules and live tick sources
//! - [`client`]: the [`Detector`] seam and its HTTP implementation
//! - [`controller`]: file-mode analysis with progress and cancellation
//! - [`live`]: live-mode continuous and single-shot detection

pub mod cancel;
pub mod capture;
pub mod client;
pub mod config;
pub mod controller;
pub mod detection;
pub mod error;
pub mod frame;
pub mod live;
pub mod sampler;
pub mod session;
pub mod state;
pub mod summary;

pub use cancel::CancellationToken;
pub use capture::{build_source, CameraSource, CaptureSource, SourceDescriptor, SourceGuard, SourceKind, SourceMetadata, VideoFileSource};
pub use client::{DetectionClient, Detector};
pub use config::{PipelineConfig, SamplingRate, SUPPORTED_RATES};
pub use controller::{FrameAnalysis, PipelineHandle, Progress, RunReport};
pub use detection::{Detection, DetectionResponse, DetectionResult};
pub use error::PipelineError;
pub use frame::Frame;
pub use live::{LiveDetection, LiveSnapshot, LiveStats, LiveStatus};
pub use sampler::{sample_count, LiveTicker, SampleSchedule};
pub use session::{SessionClient, SessionStatus};
pub use state::{FailureReason, PipelineState};
pub use summary::BehaviorSummary;
