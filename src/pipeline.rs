//! Sample Pipeline
//!
//! Metric samples leave the engine through a bounded channel:
//! - **Writer**: [`SampleWriter`], a cloneable non-blocking facade used by
//!   every poll execution
//! - **Consumer**: the receiving end returned by [`SampleWriter::channel`],
//!   owned by whatever forwards samples to the monitoring system
//! - **Output**: [`SampleOutput`], a thread writing received samples as
//!   JSON lines
//!
//! # Components
//!
//! - [`MetricSample`]: one timestamped sample (host, plugin, type, values)
//! - [`DataSet`] / [`DataSourceKind`]: declared numeric type of a sample
//! - [`Number`]: a coerced numeric cell

mod error;
mod output;
mod types;
mod writer;

pub use error::PipelineError;
pub use output::SampleOutput;
pub use types::{DataSet, DataSourceKind, MetricSample, Number};
pub use writer::{DEFAULT_CHANNEL_CAPACITY, SampleWriter};
