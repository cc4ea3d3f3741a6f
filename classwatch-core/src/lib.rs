//! classwatch-core: configuration, errors and credentials shared by the
//! classwatch console crates.

pub mod error;
pub mod config;
pub mod auth;

pub use error::{Error, Result};
pub use config::{ApiConfig, CaptureConfig, AnalysisConfig, ConsoleConfig, ConfigError};
pub use auth::{Claims, TokenStore};
