//! Parley Common - configuration and logging shared by Parley services.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;

pub use config::{
    ApiKey, ClassifierConfig, Config, ConfigError, GeminiConfig, HealthProbeConfig, ImageConfig,
    LogFormat, ObservabilityConfig, ServerConfig, SessionConfig, GROUNDING_TOP_K,
    HISTORY_CAPACITY,
};
pub use logging::init_logging;
