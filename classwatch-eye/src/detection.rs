//! Detection API payloads and the per-frame results a run aggregates

use crate::frame::Frame;
use classwatch_core::config::join_url;
use serde::{Deserialize, Deserializer, Serialize};

/// Label used when the service omits a detection's class
pub const UNKNOWN_CLASS: &str = "unknown";

fn unknown_class() -> String {
    UNKNOWN_CLASS.to_string()
}

fn class_or_unknown<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let class = Option::<String>::deserialize(deserializer)?;
    Ok(class.filter(|c| !c.is_empty()).unwrap_or_else(unknown_class))
}

fn confidence_or_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

fn bbox_if_complete<'de, D>(deserializer: D) -> Result<Option<[f64; 4]>, D::Error>
where
    D: Deserializer<'de>,
{
    let coords = Option::<Vec<f64>>::deserialize(deserializer)?;
    Ok(coords.and_then(|c| <[f64; 4]>::try_from(c.as_slice()).ok()))
}

fn list_or_empty<'de, D>(deserializer: D) -> Result<Vec<Detection>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Detection>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One object found in a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class", default = "unknown_class", deserialize_with = "class_or_unknown")]
    pub class_name: String,
    #[serde(default, deserialize_with = "confidence_or_zero")]
    pub confidence: f64,
    /// `[x, y, w, h]`
    #[serde(default, deserialize_with = "bbox_if_complete", skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, confidence: f64) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            bbox: None,
        }
    }

    pub fn with_bbox(mut self, bbox: [f64; 4]) -> Self {
        self.bbox = Some(bbox);
        self
    }

    /// Confidence as a whole percentage, the way results are listed
    pub fn confidence_percent(&self) -> f64 {
        (self.confidence * 1000.0).round() / 10.0
    }
}

/// Body returned by `POST /session/detect/{session_id}`.
///
/// Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub detections: Vec<Detection>,
    /// Path of the rendered overlay image, relative to the API host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<String>,
    /// Server-side inference time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_count: Option<u64>,
}

impl DetectionResponse {
    /// Whether the service reported the frame as processed.
    ///
    /// A body without a `success` field counts as success.
    pub fn is_success(&self) -> bool {
        self.success.unwrap_or(true)
    }

    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "Unknown error".to_string())
    }

    /// Reported count, falling back to the number of detections received
    pub fn count(&self) -> u64 {
        self.detection_count.unwrap_or(self.detections.len() as u64)
    }

    /// Absolute URL of the overlay image
    pub fn visualization_url(&self, base_url: &str) -> Option<String> {
        self.visualization.as_deref().map(|path| resolve_url(base_url, path))
    }
}

fn resolve_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        join_url(base_url, path)
    }
}

/// Detections for one sampled frame
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub timestamp_secs: f64,
    pub detections: Vec<Detection>,
    /// Retained in file mode for the result timeline
    pub frame: Option<Frame>,
    pub visualization_url: Option<String>,
    pub processing_time: Option<f64>,
    /// Why this frame has no detections, when it failed
    pub error: Option<String>,
}

impl DetectionResult {
    pub fn from_response(timestamp_secs: f64, response: DetectionResponse, base_url: &str) -> Self {
        Self {
            timestamp_secs,
            visualization_url: response.visualization_url(base_url),
            processing_time: response.processing_time,
            detections: response.detections,
            frame: None,
            error: None,
        }
    }

    /// Placeholder for a frame whose capture or detection failed
    pub fn empty(timestamp_secs: f64, error: impl Into<String>) -> Self {
        Self {
            timestamp_secs,
            detections: Vec::new(),
            frame: None,
            visualization_url: None,
            processing_time: None,
            error: Some(error.into()),
        }
    }

    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}
