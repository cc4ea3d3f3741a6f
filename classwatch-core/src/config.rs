// Console configuration: API endpoint, capture devices and analysis defaults

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Detection/Session API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every API path is joined onto
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Bearer token obtained at login
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7000".to_string(),
            request_timeout_secs: 30,
            token: None,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Capture device and encoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera device path (v4l2) or platform device name
    pub camera_device: String,
    /// Edge length of the square live frame
    pub live_frame_size: u32,
    pub live_jpeg_quality: u8,
    pub file_jpeg_quality: u8,
    /// Upload limit for video files
    pub max_file_bytes: u64,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// How long to wait for "stream active" / "loaded metadata"
    pub ready_timeout_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            live_frame_size: 640,
            live_jpeg_quality: 90,
            file_jpeg_quality: 70,
            max_file_bytes: 200 * 1024 * 1024,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            ready_timeout_secs: 10,
        }
    }
}

impl CaptureConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

/// Defaults for a frame analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Frames per second
    pub sampling_rate: f64,
    pub max_duration_secs: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 1.0,
            max_duration_secs: 60.0,
        }
    }
}

/// Top-level console configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub api: ApiConfig,
    pub capture: CaptureConfig,
    pub analysis: AnalysisConfig,
    pub log_level: Option<String>,
}

impl ConsoleConfig {
    /// Load configuration from file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_str(&content)
    }

    /// Load configuration from string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        // Try JSON first
        if let Ok(config) = serde_json::from_str::<ConsoleConfig>(content) {
            return Ok(config);
        }

        // Try TOML
        if let Ok(config) = toml::from_str::<ConsoleConfig>(content) {
            return Ok(config);
        }

        // YAML only counts when the document is a mapping
        if let Ok(serde_yaml::Value::Mapping(_)) = serde_yaml::from_str::<serde_yaml::Value>(content) {
            if let Ok(config) = serde_yaml::from_str::<ConsoleConfig>(content) {
                return Ok(config);
            }
        }

        Err(ConfigError::ParseError("Unknown format".to_string()))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.merge_env();
        config
    }

    /// Apply environment overrides on top of the current values
    pub fn merge_env(&mut self) {
        if let Ok(url) = std::env::var("CLASSWATCH_API_URL") {
            self.api.base_url = url;
        }

        if let Ok(token) = std::env::var("CLASSWATCH_TOKEN") {
            if !token.trim().is_empty() {
                self.api.token = Some(token);
            }
        }

        if let Ok(device) = std::env::var("CLASSWATCH_CAMERA") {
            self.capture.camera_device = device;
        }

        if let Ok(level) = std::env::var("CLASSWATCH_LOG_LEVEL") {
            self.log_level = Some(level);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api.base_url.trim();
        if url.is_empty() {
            return Err(ConfigError::ValidationError("api.base_url cannot be empty".to_string()));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "api.base_url must be an http(s) URL, got '{}'",
                url
            )));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "api.request_timeout_secs must be > 0".to_string()
            ));
        }

        if self.capture.live_frame_size == 0 || self.capture.live_frame_size > 4096 {
            return Err(ConfigError::ValidationError(
                "capture.live_frame_size must be between 1 and 4096".to_string()
            ));
        }
        for (name, quality) in [
            ("live_jpeg_quality", self.capture.live_jpeg_quality),
            ("file_jpeg_quality", self.capture.file_jpeg_quality),
        ] {
            if quality == 0 || quality > 100 {
                return Err(ConfigError::ValidationError(format!(
                    "capture.{} must be between 1 and 100",
                    name
                )));
            }
        }
        if self.capture.max_file_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "capture.max_file_bytes must be > 0".to_string()
            ));
        }
        if self.capture.ready_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "capture.ready_timeout_secs must be > 0".to_string()
            ));
        }

        if !(self.analysis.sampling_rate.is_finite() && self.analysis.sampling_rate > 0.0) {
            return Err(ConfigError::ValidationError(
                "analysis.sampling_rate must be > 0".to_string()
            ));
        }
        if !(self.analysis.max_duration_secs.is_finite() && self.analysis.max_duration_secs > 0.0) {
            return Err(ConfigError::ValidationError(
                "analysis.max_duration_secs must be > 0".to_string()
            ));
        }

        Ok(())
    }

    /// Join an API path onto the configured base URL
    pub fn api_url(&self, path: &str) -> String {
        join_url(&self.api.base_url, path)
    }
}

/// Join `path` onto `base`, keeping exactly one slash between them
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(e) => write!(f, "Validation error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Configuration(err.to_string())
    }
}
