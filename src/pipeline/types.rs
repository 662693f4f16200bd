//! Core data types for the sample pipeline.
//!
//! - [`MetricSample`]: one dispatched sample, identified the collectd way
//!   (`host/plugin-plugin_instance/type-type_instance`)
//! - [`Number`]: a numeric cell, `None` when a value could not be parsed
//! - [`DataSet`]: the declared type of a sample and the kind of each cell

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::protocol::ExactNumber;

/// Kind of one data source within a [`DataSet`].
///
/// Only gauges carry floating point values; the other kinds are
/// counter-like integers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DataSourceKind {
    /// Floating point value that may go up and down.
    Gauge,
    /// Monotonic counter.
    Counter,
    /// Signed rate-of-change counter.
    Derive,
    /// Counter reset on every read.
    Absolute,
}

impl DataSourceKind {
    pub fn is_gauge(self) -> bool {
        self == Self::Gauge
    }
}

/// Declared numeric type of a sample: a type name plus one kind per value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSet {
    #[serde(rename = "type")]
    pub type_name: String,
    pub sources: Vec<DataSourceKind>,
}

impl DataSet {
    pub fn new(type_name: impl Into<String>, sources: Vec<DataSourceKind>) -> Self {
        Self {
            type_name: type_name.into(),
            sources,
        }
    }

    /// Single-gauge data set.
    pub fn gauge(type_name: impl Into<String>) -> Self {
        Self::new(type_name, vec![DataSourceKind::Gauge])
    }
}

/// A coerced numeric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Integer(i64),
    Float(f64),
    /// Arbitrary-precision value, kept exact.
    Exact(ExactNumber),
}

impl Number {
    /// Nearest `f64`.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Integer(i) => *i as f64,
            Self::Float(f) => *f,
            Self::Exact(e) => e.to_f64(),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Exact(e) => write!(f, "{e}"),
        }
    }
}

/// A metric sample handed to the monitoring pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub host: String,
    pub plugin: String,
    pub plugin_instance: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub type_instance: String,
    /// One cell per data source, in declared order.
    pub values: Vec<Option<Number>>,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Set when the sample is dispatched.
    pub time: Option<DateTime<Utc>>,
}

impl MetricSample {
    /// Create an empty sample for `host/plugin` of the given type.
    pub fn new(
        host: impl Into<String>,
        plugin: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            plugin: plugin.into(),
            plugin_instance: String::new(),
            type_name: type_name.into(),
            type_instance: String::new(),
            values: Vec::new(),
            interval: Duration::ZERO,
            time: None,
        }
    }

    pub fn with_plugin_instance(mut self, instance: impl Into<String>) -> Self {
        self.plugin_instance = instance.into();
        self
    }

    pub fn with_type_instance(mut self, instance: impl Into<String>) -> Self {
        self.type_instance = instance.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// `host/plugin[-plugin_instance]`.
    pub fn source(&self) -> String {
        let mut out = format!("{}/{}", self.host, self.plugin);
        if !self.plugin_instance.is_empty() {
            out.push('-');
            out.push_str(&self.plugin_instance);
        }
        out
    }

    /// `host/plugin[-plugin_instance]/type[-type_instance]`.
    pub fn identifier(&self) -> String {
        let mut out = format!("{}/{}", self.source(), self.type_name);
        if !self.type_instance.is_empty() {
            out.push('-');
            out.push_str(&self.type_instance);
        }
        out
    }
}

impl fmt::Display for MetricSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.identifier())?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match v {
                Some(n) => write!(f, "{n}")?,
                None => f.write_str("nan")?,
            }
        }
        write!(f, "] interval={:?}", self.interval)
    }
}
