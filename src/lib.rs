//! mbeanpoll - Managed Resource Metric Poller
//!
//! Polls numeric attributes from remote managed resources (attribute trees
//! addressed by structured names, in the manner of JMX MBeans) and
//! republishes them as timestamped metric samples. The crate can be used as
//! a library, or run as a standalone binary with the `mbeanpoll` executable.
//!
//! # Architecture
//!
//! - **Protocol**: transport/session traits and an in-memory server
//! - **Connection**: lazy per-host connection state machine
//! - **Poller**: query expansion, path resolution, coercion and sweeps
//! - **Pipeline**: bounded sample channel to the monitoring system
//! - **Config**: YAML application config and server fixtures
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mbeanpoll::config::{AppConfig, Fixtures};
//! use mbeanpoll::{PollEngine, SampleWriter};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("configs/config.yaml")?;
//! let factory = Arc::new(Fixtures::load("configs/fixtures.yaml")?.build_factory());
//! let queries = config.resolved_queries();
//!
//! let (writer, samples) = SampleWriter::channel(config.channel_capacity);
//! let mut engine = PollEngine::new(writer, config.interval, config.pool_size);
//! for host in &config.hosts {
//!     let bound = host.collect.iter().filter_map(|q| queries.get(q).cloned()).collect();
//!     engine.add_host(host.to_remote_host()?, factory.clone(), bound);
//! }
//!
//! let report = engine.sweep().await;
//! println!("{} samples", report.samples);
//! for sample in samples.try_iter() {
//!     println!("{}", sample.identifier());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod pipeline;
pub mod poller;
pub mod protocol;

// Re-export commonly used types
pub use connection::{Connection, ConnectionState, RemoteHost};
pub use pipeline::{DataSet, DataSourceKind, MetricSample, Number, PipelineError, SampleWriter};
pub use poller::{
    AttributePath, AttributePermutation, AttributeQuery, PermutationKey, PollEngine, PollError,
    PollRegistry, Schedule, SweepReport,
};
pub use protocol::memory::{MemoryResource, MemoryServer, MemoryTransportFactory};
pub use protocol::{ProtocolError, ResourceName, ServiceUrl, Value};
