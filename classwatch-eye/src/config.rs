//! Configuration for a pipeline run

use crate::error::PipelineError;
use classwatch_core::ConsoleConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sampling rates offered to the user, in frames per second
pub const SUPPORTED_RATES: [f64; 5] = [0.2, 0.5, 1.0, 2.0, 5.0];

/// Frames per second drawn from the source.
///
/// Always one of [`SUPPORTED_RATES`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct SamplingRate(f64);

impl SamplingRate {
    pub fn new(fps: f64) -> Result<Self, PipelineError> {
        SUPPORTED_RATES
            .iter()
            .copied()
            .find(|rate| (rate - fps).abs() < 1e-9)
            .map(SamplingRate)
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "Unsupported sampling rate {} (supported: {:?})",
                    fps, SUPPORTED_RATES
                ))
            })
    }

    pub fn fps(&self) -> f64 {
        self.0
    }

    /// Time between two samples
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.0)
    }

    /// Label as shown in the rate picker, e.g. "2 FPS (every 0.5 seconds)"
    pub fn label(&self) -> String {
        let period = 1.0 / self.0;
        if (period - 1.0).abs() < 1e-9 {
            format!("{} FPS (every second)", self.0)
        } else {
            format!("{} FPS (every {} seconds)", self.0, period)
        }
    }
}

impl Default for SamplingRate {
    fn default() -> Self {
        SamplingRate(1.0)
    }
}

impl fmt::Display for SamplingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} FPS", self.0)
    }
}

impl TryFrom<f64> for SamplingRate {
    type Error = PipelineError;

    fn try_from(fps: f64) -> Result<Self, Self::Error> {
        SamplingRate::new(fps)
    }
}

impl From<SamplingRate> for f64 {
    fn from(rate: SamplingRate) -> f64 {
        rate.0
    }
}

/// Immutable configuration captured when a run starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub sampling_rate: SamplingRate,
    /// Longest file accepted for analysis; `None` disables the limit
    pub max_duration_secs: Option<f64>,
    /// Session the detections are filed under
    pub session_id: String,
}

impl PipelineConfig {
    pub fn new(session_id: impl Into<String>, sampling_rate: SamplingRate) -> Self {
        Self {
            sampling_rate,
            max_duration_secs: Some(60.0),
            session_id: session_id.into(),
        }
    }

    pub fn with_max_duration(mut self, max_duration_secs: Option<f64>) -> Self {
        self.max_duration_secs = max_duration_secs;
        self
    }

    /// Build from the console-wide analysis defaults
    pub fn from_console(console: &ConsoleConfig, session_id: impl Into<String>) -> Result<Self, PipelineError> {
        let config = Self {
            sampling_rate: SamplingRate::new(console.analysis.sampling_rate)?,
            max_duration_secs: Some(console.analysis.max_duration_secs),
            session_id: session_id.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.session_id.trim().is_empty() {
            return Err(PipelineError::Config("Session id cannot be empty".to_string()));
        }

        if self.session_id.contains('/') || self.session_id.contains('?') || self.session_id.contains('#') {
            return Err(PipelineError::Config(format!(
                "Session id '{}' contains invalid characters",
                self.session_id
            )));
        }

        if let Some(limit) = self.max_duration_secs {
            if !(limit.is_finite() && limit > 0.0) {
                return Err(PipelineError::Config(
                    "Maximum duration must be > 0".to_string()
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_rates() {
        for fps in SUPPORTED_RATES {
            assert_eq!(SamplingRate::new(fps).unwrap().fps(), fps);
        }
    }

    #[test]
    fn test_unsupported_rates() {
        assert!(SamplingRate::new(0.0).is_err());
        assert!(SamplingRate::new(-1.0).is_err());
        assert!(SamplingRate::new(3.0).is_err());
        assert!(SamplingRate::new(f64::NAN).is_err());
    }

    #[test]
    fn test_interval() {
        assert_eq!(SamplingRate::new(2.0).unwrap().interval(), Duration::from_millis(500));
        assert_eq!(SamplingRate::new(0.2).unwrap().interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_labels() {
        assert_eq!(SamplingRate::new(1.0).unwrap().label(), "1 FPS (every second)");
        assert_eq!(SamplingRate::new(0.5).unwrap().label(), "0.5 FPS (every 2 seconds)");
        assert_eq!(SamplingRate::new(5.0).unwrap().label(), "5 FPS (every 0.2 seconds)");
    }

    #[test]
    fn test_rate_serde() {
        let rate: SamplingRate = serde_json::from_str("2.0").unwrap();
        assert_eq!(rate.fps(), 2.0);
        assert!(serde_json::from_str::<SamplingRate>("3.0").is_err());
        assert_eq!(serde_json::to_string(&rate).unwrap(), "2.0");
    }

    #[test]
    fn test_pipeline_config_validation() {
        let config = PipelineConfig::new("42", SamplingRate::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.max_duration_secs, Some(60.0));

        assert!(PipelineConfig::new("", SamplingRate::default()).validate().is_err());
        assert!(PipelineConfig::new("4/2", SamplingRate::default()).validate().is_err());

        let config = PipelineConfig::new("42", SamplingRate::default()).with_max_duration(Some(0.0));
        assert!(config.validate().is_err());

        let config = PipelineConfig::new("42", SamplingRate::default()).with_max_duration(None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_console() {
        let mut console = ConsoleConfig::default();
        console.analysis.sampling_rate = 5.0;
        console.analysis.max_duration_secs = 30.0;
        let config = PipelineConfig::from_console(&console, "7").unwrap();
        assert_eq!(config.sampling_rate.fps(), 5.0);
        assert_eq!(config.max_duration_secs, Some(30.0));

        console.analysis.sampling_rate = 3.0;
        assert!(PipelineConfig::from_console(&console, "7").is_err());
    }
}
