//! In-memory server fixtures for the `memory://` transport.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::memory::{MemoryResource, MemoryServer, MemoryTransportFactory};
use crate::protocol::{Credentials, ResourceName};

use super::validation::{ConfigError, expand_env_vars};

fn default_true() -> bool {
    true
}

/// A fixture file: the servers reachable as `memory://<name>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub servers: Vec<FixtureServer>,
}

/// One in-memory server and its initial state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureServer {
    pub name: String,

    /// Whether the server accepts connections (default: true).
    #[serde(default = "default_true")]
    pub reachable: bool,

    /// Whether the server delegate is registered (default: true).
    #[serde(default = "default_true")]
    pub delegate: bool,

    /// Delay added to every read (default: none).
    #[serde(default, with = "humantime_serde")]
    pub latency: Duration,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub resources: Vec<FixtureResource>,
}

/// A resource registered on a fixture server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureResource {
    pub name: ResourceName,
    #[serde(flatten)]
    pub resource: MemoryResource,
}

impl Fixtures {
    /// Load fixtures from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed, or names
    /// a server twice.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let fixtures: Self = serde_yaml::from_str(&content)?;

        let mut names = std::collections::HashSet::new();
        if let Some(dup) = fixtures.servers.iter().find(|s| !names.insert(s.name.as_str())) {
            return Err(ConfigError::Validation(format!(
                "duplicate fixture server: '{}'",
                dup.name
            )));
        }
        Ok(fixtures)
    }

    /// Build a factory serving every fixture server.
    pub fn build_factory(&self) -> MemoryTransportFactory {
        let factory = MemoryTransportFactory::new();
        for fixture in &self.servers {
            factory.add_server(fixture.build_server());
        }
        factory
    }
}

impl FixtureServer {
    fn build_server(&self) -> Arc<MemoryServer> {
        let server = MemoryServer::new(&self.name);
        for resource in &self.resources {
            server.register(resource.name.clone(), resource.resource.clone());
        }
        server.set_reachable(self.reachable);
        server.set_delegate_registered(self.delegate);
        server.set_latency(self.latency);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            server.require_credentials(Credentials {
                username: expand_env_vars(username),
                password: expand_env_vars(password),
            });
        }

        tracing::debug!(
            server = %self.name,
            resources = self.resources.len(),
            reachable = self.reachable,
            "Fixture server built"
        );
        server
    }
}
