//! Thin wrappers around the `ffprobe`/`ffmpeg` executables

use crate::error::PipelineError;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Demuxer ffmpeg uses for local cameras on this platform
pub(crate) fn camera_input_format() -> &'static str {
    if cfg!(target_os = "macos") {
        "avfoundation"
    } else if cfg!(target_os = "windows") {
        "dshow"
    } else {
        "video4linux2"
    }
}

#[derive(Debug, Deserialize)]
struct ProbeJson {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// First video stream's geometry plus container duration
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ProbeInfo {
    pub width: u32,
    pub height: u32,
    pub duration_secs: Option<f64>,
}

pub(crate) fn parse_probe(json: &[u8]) -> Result<ProbeInfo, PipelineError> {
    let probe: ProbeJson = serde_json::from_slice(json)
        .map_err(|e| PipelineError::SourceUnavailable(format!("Unreadable probe output: {}", e)))?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.width.unwrap_or(0) > 0 && s.height.unwrap_or(0) > 0)
        .ok_or_else(|| PipelineError::SourceUnavailable("No decodable video stream".to_string()))?;

    let parse_secs = |raw: &Option<String>| {
        raw.as_deref()
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
    };

    let duration_secs = probe
        .format
        .as_ref()
        .and_then(|f| parse_secs(&f.duration))
        .or_else(|| parse_secs(&stream.duration));

    Ok(ProbeInfo {
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        duration_secs,
    })
}

/// Run `ffprobe` against an input and read back its first video stream
pub(crate) async fn probe(ffprobe: &Path, input_args: &[OsString]) -> Result<ProbeInfo, PipelineError> {
    let output = Command::new(ffprobe)
        .args(["-v", "error", "-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height,duration:format=duration"])
        .args(["-of", "json"])
        .args(input_args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| PipelineError::SourceUnavailable(format!("Failed to run {}: {}", ffprobe.display(), e)))?;

    if !output.status.success() {
        return Err(PipelineError::SourceUnavailable(stderr_message(&output.stderr, "ffprobe failed")));
    }

    parse_probe(&output.stdout)
}

/// Decode the frame shown at `timestamp_secs` as packed RGB24.
///
/// Awaiting the process is the seek: it only exits once the decoder has
/// landed on the requested position.
pub(crate) async fn frame_at(
    ffmpeg: &Path,
    input: &Path,
    timestamp_secs: f64,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, PipelineError> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-loglevel", "error"])
        .arg("-ss")
        .arg(format!("{:.3}", timestamp_secs.max(0.0)))
        .arg("-i")
        .arg(input)
        .args(["-frames:v", "1", "-an"])
        .arg("-vf")
        .arg(format!("scale={}:{}", width, height))
        .args(["-pix_fmt", "rgb24", "-f", "rawvideo", "-"])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| PipelineError::CaptureFailed(format!("Failed to run {}: {}", ffmpeg.display(), e)))?;

    if !output.status.success() {
        return Err(PipelineError::CaptureFailed(stderr_message(&output.stderr, "ffmpeg failed")));
    }

    Ok(output.stdout)
}

pub(crate) fn stderr_message(stderr: &[u8], fallback: &str) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}
