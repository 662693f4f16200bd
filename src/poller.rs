//! Poll Engine
//!
//! Expands declarative attribute queries against discovered resources into
//! independently schedulable permutations and runs them.
//!
//! # Architecture
//!
//! - [`AttributeQuery`]: what to read from which resources and how to name it
//! - [`AttributePermutation`]: one (resource, query) unit; resolves paths,
//!   coerces values and dispatches samples
//! - [`PollEngine`]: discovery, re-discovery and bounded-pool sweeps
//! - [`PollRegistry`]: drives sweeps on a [`Schedule`]
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use mbeanpoll::{
//!     AttributePath, AttributeQuery, DataSet, MemoryTransportFactory, PollEngine, RemoteHost, ResourceName,
//!     SampleWriter, ServiceUrl,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (writer, _samples) = SampleWriter::channel(1024);
//! let mut engine = PollEngine::new(writer, Duration::from_secs(10), 4);
//! let query = AttributeQuery::new(
//!     "threads",
//!     ResourceName::parse("java.lang:type=Threading")?,
//!     vec!["ThreadCount".parse::<AttributePath>()?],
//!     DataSet::gauge("threads"),
//! );
//! engine.add_host(
//!     RemoteHost::new(ServiceUrl::parse("memory://app01")?, "app01"),
//!     Arc::new(MemoryTransportFactory::new()),
//!     vec![Arc::new(query)],
//! );
//! let report = engine.sweep().await;
//! println!("{report:?}");
//! # Ok(())
//! # }
//! ```

pub mod coerce;
mod engine;
mod error;
mod permutation;
mod query;
mod registry;
mod resolver;
mod schedule;

pub use engine::{PollEngine, SweepReport};
pub use error::PollError;
pub use permutation::{AttributePermutation, PermutationKey, RunStats, ScheduleKey};
pub use query::{AttributePath, AttributeQuery, DEFAULT_PLUGIN};
pub use registry::{DEFAULT_SHUTDOWN_TIMEOUT, JobInfo, PollRegistry};
pub use resolver::PathResolver;
pub use schedule::{MIN_INTERVAL, Schedule};
