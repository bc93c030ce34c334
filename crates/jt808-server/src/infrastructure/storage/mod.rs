//! Configuration and persistence adapters.

pub mod audit;
pub mod config;
pub mod directory;
pub mod journal;
pub mod telemetry;

pub use audit::FrameLog;
pub use config::{load_config, AppConfig, ConfigError};
pub use directory::StaticDeviceDirectory;
pub use telemetry::TelemetryLog;
