//! Application configuration.

pub mod app_config;
pub mod args;
pub mod engine_config;
pub mod storage;

pub use app_config::{AppConfig, LogLevel};
pub use args::{CliArgs, Command, LoadArgs};
pub use engine_config::{CacheConfig, DefaultsConfig, EngineConfig, FetchConfig};
pub use storage::{ConfigError, ConfigStore};
