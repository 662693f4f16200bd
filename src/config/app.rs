//! Application configuration structures.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::RemoteHost;
use crate::pipeline::DEFAULT_CHANNEL_CAPACITY;
use crate::poller::{AttributeQuery, DEFAULT_PLUGIN, MIN_INTERVAL, Schedule};
use crate::protocol::ServiceUrl;

use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default poll interval (10 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Smallest worker pool picked by default.
pub const MIN_POOL_SIZE: usize = 2;

/// Largest worker pool picked by default.
pub const MAX_POOL_SIZE: usize = 32;

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_POOL_SIZE)
        .clamp(MIN_POOL_SIZE, MAX_POOL_SIZE)
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_plugin() -> String {
    DEFAULT_PLUGIN.to_string()
}

// =============================================================================
// Host Configuration
// =============================================================================

/// One remote endpoint and the queries polled from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Service URL, e.g. `service:jmx:rmi:///jndi/rmi://db01:9010/jmxrmi`.
    pub url: String,

    /// Host name reported on samples (default: host part of the URL).
    #[serde(default)]
    pub hostname: Option<String>,

    /// Username, `${VAR}` references are expanded.
    #[serde(default)]
    pub username: Option<String>,

    /// Password, `${VAR}` references are expanded.
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub instance_prefix: Option<String>,

    /// Names of the queries bound to this host.
    #[serde(default)]
    pub collect: Vec<String>,
}

impl HostConfig {
    /// Build the host identity.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if the URL does not parse.
    pub fn to_remote_host(&self) -> Result<RemoteHost, ConfigError> {
        let url = ServiceUrl::parse(&self.url).map_err(ConfigError::Validation)?;
        let hostname = self
            .hostname
            .clone()
            .or_else(|| url.host().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string());

        let mut host = RemoteHost::new(url, hostname);
        host.username = self.username.as_deref().map(expand_env_vars);
        host.password = self.password.as_deref().map(expand_env_vars);
        host.instance_prefix = self.instance_prefix.clone();
        Ok(host)
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Poll interval and sweep deadline (default: 10s, minimum: 1s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Cron expression (`sec min hour day month weekday`) that triggers
    /// sweeps instead of the interval. The interval still bounds each sweep.
    #[serde(default)]
    pub schedule: Option<String>,

    /// Worker pool size (default: available parallelism, 2 to 32).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Sample channel capacity (default: 10000).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Plugin name for queries that name none (default: "FastJMX").
    #[serde(default = "default_plugin")]
    pub plugin: String,

    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    #[serde(default)]
    pub queries: Vec<AttributeQuery>,

    /// In-memory server fixtures, relative to the config file.
    #[serde(default)]
    pub fixtures: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yaml::from_str(&content)?;

        if config.interval < MIN_INTERVAL {
            tracing::warn!(
                interval = ?config.interval,
                min = ?MIN_INTERVAL,
                "Poll interval below minimum, clamping"
            );
            config.interval = MIN_INTERVAL;
        }

        if let Some(fixtures) = config.fixtures.take() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.fixtures = Some(if fixtures.is_relative() {
                base.join(fixtures)
            } else {
                fixtures
            });
        }

        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            hosts = config.hosts.len(),
            queries = config.queries.len(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Validation(
                "pool_size must be positive".to_string(),
            ));
        }

        if self.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "channel_capacity must be positive".to_string(),
            ));
        }

        self.schedule()?;

        let mut names = HashSet::new();
        for query in &self.queries {
            query
                .validate()
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
            if !names.insert(query.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate query name: '{}'",
                    query.name
                )));
            }
        }

        for host in &self.hosts {
            ServiceUrl::parse(&host.url).map_err(ConfigError::Validation)?;
            if let Some(unknown) = host.collect.iter().find(|c| !names.contains(c.as_str())) {
                return Err(ConfigError::Validation(format!(
                    "host '{}' collects unknown query '{}'",
                    host.url, unknown
                )));
            }
        }

        Ok(())
    }

    /// Sweep schedule: the cron expression if one is set, else the interval.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if the cron expression is invalid.
    pub fn schedule(&self) -> Result<Schedule, ConfigError> {
        match &self.schedule {
            Some(expr) => Schedule::cron(expr).map_err(|e| ConfigError::Validation(e.to_string())),
            None => Ok(Schedule::interval(self.interval)),
        }
    }

    /// Queries by name, with the default plugin applied where none is named.
    pub fn resolved_queries(&self) -> HashMap<String, Arc<AttributeQuery>> {
        self.queries
            .iter()
            .map(|query| {
                let mut query = query.clone();
                if query.plugin_name.is_none() {
                    query.plugin_name = Some(self.plugin.clone());
                }
                (query.name.clone(), Arc::new(query))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
interval: 30s
pool_size: 4
plugin: GenericJMX
hosts:
  - url: "service:jmx:rmi:///jndi/rmi://db01:9010/jmxrmi"
    username: monitor
    password: "${MBEANPOLL_TEST_UNSET_PW:-secret}"
    collect: [memory, caches]
  - url: "memory://app01"
    hostname: app01.example.com
    instance_prefix: blue
    collect: [caches]
queries:
  - name: memory
    resource: "java.lang:type=Memory"
    attributes: [HeapMemoryUsage]
    table: true
    dataset: { type: memory, sources: [gauge] }
    plugin_name: JVM
  - name: caches
    resource: "app:type=Cache,*"
    attributes: [Hits, Misses]
    dataset: { type: cache, sources: [counter, counter] }
    instance_from: [name]
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn parse(content: &str) -> AppConfig {
        serde_yaml::from_str(content).unwrap()
    }

    #[test]
    fn test_load_config() {
        let file = write_config(CONFIG);
        let config = AppConfig::load(file.path()).unwrap();

        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.queries.len(), 2);
        assert!(config.queries[0].table);
        assert_eq!(config.queries[1].attributes.len(), 2);
        assert!(config.fixtures.is_none());
    }

    #[test]
    fn test_defaults() {
        let config = parse("{}");
        assert_eq!(config.interval, DEFAULT_INTERVAL);
        assert!((MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&config.pool_size));
        assert_eq!(config.plugin, DEFAULT_PLUGIN);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_interval_clamped() {
        let file = write_config("interval: 200ms\n");
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.interval, MIN_INTERVAL);
    }

    #[test]
    fn test_fixtures_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "fixtures: servers.yaml\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.fixtures, Some(dir.path().join("servers.yaml")));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load("/nonexistent/mbeanpoll.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let file = write_config("hosts: [url: ");
        assert!(matches!(
            AppConfig::load(file.path()).unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    // ===== Validation =====

    #[test]
    fn test_validation_duplicate_query() {
        let mut config = parse(CONFIG);
        let copy = config.queries[0].clone();
        config.queries.push(copy);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate query name"));
    }

    #[test]
    fn test_validation_unknown_collect() {
        let mut config = parse(CONFIG);
        config.hosts[1].collect.push("threads".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown query 'threads'"));
    }

    #[test]
    fn test_validation_source_count_mismatch() {
        let mut config = parse(CONFIG);
        config.queries[1].dataset.sources.pop();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bad_url() {
        let mut config = parse(CONFIG);
        config.hosts[0].url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_pool() {
        let mut config = parse(CONFIG);
        config.pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_schedule_defaults_to_interval() {
        let config = parse(CONFIG);
        assert_eq!(
            config.schedule().unwrap(),
            Schedule::Interval(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_cron_schedule() {
        let file = write_config("interval: 5s\nschedule: \"*/15 * * * * *\"\n");
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(
            config.schedule().unwrap(),
            Schedule::Cron("*/15 * * * * *".into())
        );
        assert_eq!(config.interval, Duration::from_secs(5));
    }

    #[test]
    fn test_validation_bad_cron() {
        let file = write_config("schedule: every minute\n");
        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid cron"));
    }

    #[test]
    fn test_bad_resource_pattern_rejected_on_parse() {
        let yaml = CONFIG.replace("app:type=Cache,*", "no-domain");
        assert!(serde_yaml::from_str::<AppConfig>(&yaml).is_err());
    }

    // ===== Conversion =====

    #[test]
    fn test_to_remote_host() {
        let config = parse(CONFIG);

        let db = config.hosts[0].to_remote_host().unwrap();
        assert_eq!(db.hostname, "db01");
        assert_eq!(db.username.as_deref(), Some("monitor"));
        assert_eq!(db.password.as_deref(), Some("secret"));
        assert!(db.credentials().is_some());

        let app = config.hosts[1].to_remote_host().unwrap();
        assert_eq!(app.hostname, "app01.example.com");
        assert_eq!(app.instance_prefix.as_deref(), Some("blue"));
        assert!(app.credentials().is_none());
    }

    #[test]
    fn test_resolved_queries_apply_default_plugin() {
        let config = parse(CONFIG);
        let queries = config.resolved_queries();
        assert_eq!(queries["memory"].plugin(), "JVM");
        assert_eq!(queries["caches"].plugin(), "GenericJMX");
    }
}
