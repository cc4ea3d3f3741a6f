//! Live webcam capture

use super::ffmpeg;
use super::{CaptureSource, SourceKind, SourceMetadata};
use crate::error::PipelineError;
use crate::frame::{encode_square, rgb_from_raw, Frame};
use async_trait::async_trait;
use classwatch_core::CaptureConfig;
use image::RgbImage;
use parking_lot::RwLock;
use std::ffi::OsString;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Running ffmpeg reader and the most recent frame it produced
struct CameraStream {
    child: Child,
    reader: Option<thread::JoinHandle<()>>,
    latest: Arc<RwLock<Option<RgbImage>>>,
    alive: Arc<AtomicBool>,
    started: Instant,
}

/// Camera manager for USB webcam capture.
///
/// A background reader keeps only the newest frame; `capture_frame_at`
/// ignores the timestamp and always returns that frame, center-cropped to a
/// square of `live_frame_size` pixels.
pub struct CameraSource {
    device: String,
    config: Arc<CaptureConfig>,
    stream: Option<CameraStream>,
    metadata: Option<SourceMetadata>,
}

impl CameraSource {
    pub fn new(device: impl Into<String>, config: Arc<CaptureConfig>) -> Self {
        Self {
            device: device.into(),
            config,
            stream: None,
            metadata: None,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Whether the reader process is still delivering frames
    pub fn is_streaming(&self) -> bool {
        self.stream
            .as_ref()
            .map(|stream| stream.alive.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn input_args(&self) -> Vec<OsString> {
        vec![
            "-f".into(),
            ffmpeg::camera_input_format().into(),
            "-i".into(),
            self.device.clone().into(),
        ]
    }

    fn spawn_reader(&self, width: u32, height: u32) -> Result<(CameraStream, watch::Receiver<u64>), PipelineError> {
        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error"])
            .args(self.input_args())
            .args(["-an", "-pix_fmt", "rgb24", "-f", "rawvideo", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PipelineError::SourceUnavailable(format!("Failed to start camera reader: {}", e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::SourceUnavailable("Failed to capture ffmpeg stdout".to_string()))?;

        let latest = Arc::new(RwLock::new(None));
        let (frames_tx, frames_rx) = watch::channel(0u64);
        let frame_bytes = width as usize * height as usize * 3;
        let alive = Arc::new(AtomicBool::new(true));
        let slot = latest.clone();
        let running = alive.clone();
        let device = self.device.clone();

        let reader = thread::spawn(move || {
            let mut buffer = vec![0u8; frame_bytes];
            loop {
                if let Err(e) = stdout.read_exact(&mut buffer) {
                    // device gone: never hand out the stale frame again
                    let was_running = running.swap(false, Ordering::AcqRel);
                    *slot.write() = None;
                    if was_running {
                        warn!("Camera stream {} ended: {}", device, e);
                    } else {
                        debug!("Camera reader for {} finished: {}", device, e);
                    }
                    break;
                }
                match rgb_from_raw(width, height, buffer.clone()) {
                    Ok(image) => {
                        *slot.write() = Some(image);
                        frames_tx.send_modify(|n| *n += 1);
                    }
                    Err(e) => warn!("Dropping malformed camera frame: {}", e),
                }
            }
        });

        Ok((
            CameraStream {
                child,
                reader: Some(reader),
                latest,
                alive,
                started: Instant::now(),
            },
            frames_rx,
        ))
    }
}

#[async_trait]
impl CaptureSource for CameraSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    async fn open(&mut self) -> Result<SourceMetadata, PipelineError> {
        if let (Some(metadata), Some(_)) = (self.metadata, self.stream.as_ref()) {
            return Ok(metadata);
        }

        let ready_timeout = self.config.ready_timeout();
        let probe = tokio::time::timeout(
            ready_timeout,
            ffmpeg::probe(&self.config.ffprobe_path, &self.input_args()),
        )
        .await
        .map_err(|_| PipelineError::SourceUnavailable(format!("Timed out probing {}", self.device)))??;

        let (stream, mut frames) = self.spawn_reader(probe.width, probe.height)?;
        self.stream = Some(stream);

        // "stream active" is the first decoded frame
        let first_frame = tokio::time::timeout(ready_timeout, async move {
            frames.wait_for(|n| *n > 0).await.is_ok()
        })
        .await;

        match first_frame {
            Ok(true) => {}
            Ok(false) => {
                return Err(PipelineError::SourceUnavailable(format!(
                    "Camera {} stopped before producing a frame",
                    self.device
                )));
            }
            Err(_) => {
                return Err(PipelineError::SourceUnavailable(format!(
                    "Camera {} produced no frame within {:?}",
                    self.device, ready_timeout
                )));
            }
        }

        let metadata = SourceMetadata {
            duration_secs: None,
            width: probe.width,
            height: probe.height,
        };
        self.metadata = Some(metadata);
        info!("Camera {} active at {}x{}", self.device, probe.width, probe.height);
        Ok(metadata)
    }

    fn metadata(&self) -> Option<SourceMetadata> {
        self.metadata
    }

    async fn capture_frame_at(&self, _timestamp_secs: f64) -> Result<Frame, PipelineError> {
        let stream = self
            .stream
            .as_ref()
            .filter(|stream| stream.alive.load(Ordering::Acquire))
            .ok_or_else(|| PipelineError::CaptureFailed("Video stream not available".to_string()))?;

        let image = stream
            .latest
            .read()
            .clone()
            .ok_or_else(|| PipelineError::CaptureFailed("No frame captured yet".to_string()))?;

        let timestamp_secs = stream.started.elapsed().as_secs_f64();
        let edge = self.config.live_frame_size;
        let quality = self.config.live_jpeg_quality;

        let (data, edge) = tokio::task::spawn_blocking(move || encode_square(&image, edge, quality))
            .await
            .map_err(|e| PipelineError::CaptureFailed(format!("Frame encoder panicked: {}", e)))??;

        Ok(Frame::new(timestamp_secs, data, edge, edge))
    }

    fn close(&mut self) {
        self.metadata = None;
        if let Some(mut stream) = self.stream.take() {
            stream.alive.store(false, Ordering::Release);
            if let Err(e) = stream.child.kill() {
                debug!("Camera reader already exited: {}", e);
            }
            // the reader sees EOF once the process is gone, so both return promptly
            if let Err(e) = stream.child.wait() {
                warn!("Failed to reap camera reader for {}: {}", self.device, e);
            }
            if let Some(reader) = stream.reader.take() {
                if reader.join().is_err() {
                    warn!("Camera reader thread for {} panicked", self.device);
                }
            }
            *stream.latest.write() = None;
            info!("Camera {} stopped", self.device);
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}
