//! Seekable video file source

use super::ffmpeg;
use super::{CaptureSource, SourceKind, SourceMetadata};
use crate::error::PipelineError;
use crate::frame::{encode_jpeg, rgb_from_raw, Frame};
use async_trait::async_trait;
use classwatch_core::CaptureConfig;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Video file decoded frame-by-frame through ffmpeg
pub struct VideoFileSource {
    path: PathBuf,
    config: Arc<CaptureConfig>,
    metadata: Option<SourceMetadata>,
}

impl VideoFileSource {
    pub fn new(path: impl Into<PathBuf>, config: Arc<CaptureConfig>) -> Self {
        Self {
            path: path.into(),
            config,
            metadata: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_file(&self) -> Result<(), PipelineError> {
        let meta = std::fs::metadata(&self.path).map_err(|e| {
            PipelineError::SourceUnavailable(format!("Cannot read {}: {}", self.path.display(), e))
        })?;

        if !meta.is_file() {
            return Err(PipelineError::SourceUnavailable(format!(
                "{} is not a file",
                self.path.display()
            )));
        }

        if meta.len() > self.config.max_file_bytes {
            return Err(PipelineError::SourceUnavailable(format!(
                "File size exceeds {}MB limit",
                self.config.max_file_bytes / (1024 * 1024)
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl CaptureSource for VideoFileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    async fn open(&mut self) -> Result<SourceMetadata, PipelineError> {
        self.check_file()?;

        let input: Vec<OsString> = vec!["-i".into(), self.path.clone().into_os_string()];
        let probe = tokio::time::timeout(
            self.config.ready_timeout(),
            ffmpeg::probe(&self.config.ffprobe_path, &input),
        )
        .await
        .map_err(|_| PipelineError::SourceUnavailable("Timed out loading video metadata".to_string()))??;

        let duration_secs = probe.duration_secs.ok_or_else(|| {
            PipelineError::SourceUnavailable(format!("{} has no known duration", self.path.display()))
        })?;

        let metadata = SourceMetadata {
            duration_secs: Some(duration_secs),
            width: probe.width,
            height: probe.height,
        };
        self.metadata = Some(metadata);

        info!(
            "Loaded {} ({}x{}, {:.2}s)",
            self.path.display(),
            metadata.width,
            metadata.height,
            duration_secs
        );
        Ok(metadata)
    }

    fn metadata(&self) -> Option<SourceMetadata> {
        self.metadata
    }

    async fn capture_frame_at(&self, timestamp_secs: f64) -> Result<Frame, PipelineError> {
        let metadata = self
            .metadata
            .ok_or_else(|| PipelineError::CaptureFailed("Video source is closed".to_string()))?;

        let raw = ffmpeg::frame_at(
            &self.config.ffmpeg_path,
            &self.path,
            timestamp_secs,
            metadata.width,
            metadata.height,
        )
        .await?;

        let image = rgb_from_raw(metadata.width, metadata.height, raw)?;
        let data = encode_jpeg(&image, self.config.file_jpeg_quality)?;
        debug!("Captured frame at {:.3}s ({} bytes)", timestamp_secs, data.len());

        Ok(Frame::new(timestamp_secs, data, metadata.width, metadata.height))
    }

    fn close(&mut self) {
        if self.metadata.take().is_some() {
            debug!("Closed video source {}", self.path.display());
        }
    }
}
