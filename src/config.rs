//! Configuration module.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Engine settings (interval, worker pool size, sample channel capacity)
//! - Remote hosts and the queries each one collects
//! - In-memory server fixtures for the `memory://` transport

mod app;
mod fixtures;
mod validation;

pub use app::{AppConfig, HostConfig};
pub use fixtures::{FixtureResource, FixtureServer, Fixtures};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{DEFAULT_INTERVAL, MAX_POOL_SIZE, MIN_POOL_SIZE};
