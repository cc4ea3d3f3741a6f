//! Error types for classwatch-eye

use classwatch_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Camera or file could not be opened. Fatal to the run.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// One frame could not be rendered. Transient.
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// Network or server error for one frame. Transient.
    #[error("Detection failed: {0}")]
    DetectionFailed(String),

    /// User-initiated stop
    #[error("Cancelled")]
    Cancelled,

    #[error("Video exceeds {limit} second limit (duration {duration:.1}s)")]
    DurationExceeded { duration: f64, limit: f64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl PipelineError {
    /// Aborts the state machine
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::SourceUnavailable(_)
                | PipelineError::DurationExceeded { .. }
                | PipelineError::Config(_)
                | PipelineError::InvalidTransition { .. }
        )
    }

    /// Absorbed locally, the sequence keeps going
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::CaptureFailed(_)
                | PipelineError::DetectionFailed(_)
                | PipelineError::Network(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

impl From<PipelineError> for CoreError {
    fn from(err: PipelineError) -> Self {
        CoreError::Pipeline(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::SourceUnavailable("Permission denied".to_string());
        assert!(err.to_string().contains("Source unavailable"));
        assert!(err.to_string().contains("Permission denied"));

        let err = PipelineError::DurationExceeded { duration: 75.0, limit: 60.0 };
        assert_eq!(err.to_string(), "Video exceeds 60 second limit (duration 75.0s)");
    }

    #[test]
    fn test_error_taxonomy() {
        assert!(PipelineError::SourceUnavailable("x".into()).is_fatal());
        assert!(PipelineError::DurationExceeded { duration: 2.0, limit: 1.0 }.is_fatal());
        assert!(PipelineError::CaptureFailed("x".into()).is_transient());
        assert!(PipelineError::DetectionFailed("x".into()).is_transient());

        let cancelled = PipelineError::Cancelled;
        assert!(!cancelled.is_fatal());
        assert!(!cancelled.is_transient());
        assert!(cancelled.is_cancelled());
    }

    #[test]
    fn test_pipeline_error_to_core_error() {
        let core_err: CoreError = PipelineError::CaptureFailed("closed".to_string()).into();
        match core_err {
            CoreError::Pipeline(msg) => assert!(msg.contains("closed")),
            _ => panic!("Expected Pipeline error"),
        }
    }
}
