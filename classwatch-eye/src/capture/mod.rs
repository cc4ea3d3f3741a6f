//! Capture sources: live camera feeds and seekable video files

pub mod camera;
pub mod video_file;
mod ffmpeg;

use crate::error::PipelineError;
use crate::frame::Frame;
use async_trait::async_trait;
use classwatch_core::CaptureConfig;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

pub use camera::CameraSource;
pub use video_file::VideoFileSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// Continuously live device feed; timestamps are ignored
    Live,
    /// Seekable file with a known duration
    File,
}

/// What a source reports once it signals readiness
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// `None` for live feeds, which never run out
    pub duration_secs: Option<f64>,
    pub width: u32,
    pub height: u32,
}

impl SourceMetadata {
    pub fn is_live(&self) -> bool {
        self.duration_secs.is_none()
    }
}

/// A media input that renders still frames on demand.
///
/// `open` acquires the device or file and only returns once the source is
/// ready (stream active / metadata loaded). `close` must release everything
/// `open` allocated and be safe to call more than once.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn open(&mut self) -> Result<SourceMetadata, PipelineError>;

    /// Valid only after `open` succeeded
    fn metadata(&self) -> Option<SourceMetadata>;

    async fn capture_frame_at(&self, timestamp_secs: f64) -> Result<Frame, PipelineError>;

    fn close(&mut self);
}

#[async_trait]
impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn kind(&self) -> SourceKind {
        (**self).kind()
    }

    async fn open(&mut self) -> Result<SourceMetadata, PipelineError> {
        (**self).open().await
    }

    fn metadata(&self) -> Option<SourceMetadata> {
        (**self).metadata()
    }

    async fn capture_frame_at(&self, timestamp_secs: f64) -> Result<Frame, PipelineError> {
        (**self).capture_frame_at(timestamp_secs).await
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Scoped ownership of a capture source.
///
/// `acquire` opens the source; `release` closes it exactly once per
/// acquisition. Dropping the guard releases whatever is still held, so every
/// exit path of a run gives the device back.
pub struct SourceGuard<S: CaptureSource> {
    source: S,
    held: bool,
}

impl<S: CaptureSource> SourceGuard<S> {
    pub fn new(source: S) -> Self {
        Self { source, held: false }
    }

    /// Open the source. A failed open still counts as held so that partial
    /// allocations are released.
    pub async fn acquire(&mut self) -> Result<SourceMetadata, PipelineError> {
        if self.held {
            if let Some(metadata) = self.source.metadata() {
                return Ok(metadata);
            }
        }
        self.held = true;
        debug!("Acquiring {:?} source", self.source.kind());
        self.source.open().await
    }

    pub fn release(&mut self) {
        if self.held {
            self.held = false;
            self.source.close();
            debug!("Released {:?} source", self.source.kind());
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl<S: CaptureSource> Deref for SourceGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.source
    }
}

impl<S: CaptureSource> DerefMut for SourceGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: CaptureSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Where frames come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceDescriptor {
    Camera { device: String },
    File { path: PathBuf },
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::Camera { .. } => SourceKind::Live,
            SourceDescriptor::File { .. } => SourceKind::File,
        }
    }
}

/// Construct (but do not open) the source a descriptor names
pub fn build_source(descriptor: &SourceDescriptor, config: Arc<CaptureConfig>) -> Box<dyn CaptureSource> {
    match descriptor {
        SourceDescriptor::Camera { device } => Box::new(CameraSource::new(device.clone(), config)),
        SourceDescriptor::File { path } => Box::new(VideoFileSource::new(path.clone(), config)),
    }
}
