//! Attribute permutations: one concrete (resource, query) poll unit.
//!
//! A permutation binds a discovered [`ResourceName`] to the [`Connection`] it
//! was found on and the [`AttributeQuery`] that matched it. Each execution
//! reads every declared sub-value, then either dispatches one sample
//! (scalar mode) or pivots structured sub-values into one sample per field
//! (table mode).

use std::cmp::Reverse;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::connection::Connection;
use crate::pipeline::{MetricSample, SampleWriter};
use crate::poller::coerce::coerce_row;
use crate::poller::resolver::PathResolver;
use crate::poller::{AttributeQuery, PollError};
use crate::protocol::{ResourceName, Value};

static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Identity of the metric series a permutation produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermutationKey {
    pub hostname: String,
    pub raw_url: String,
    /// `host/plugin[-plugin_instance]`.
    pub source: String,
    pub type_name: String,
    pub type_instance: String,
}

/// Outcome of the most recent execution, updated as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunStats {
    pub duration: Duration,
    /// Failed or cancelled.
    pub failed: bool,
    pub last_run: Option<DateTime<Utc>>,
}

impl RunStats {
    /// Duration used for scheduling: zero unless the last run succeeded.
    pub fn effective_duration(&self) -> Duration {
        if self.failed {
            Duration::ZERO
        } else {
            self.duration
        }
    }
}

/// Scheduling priority. Ascending order runs the slowest successful
/// permutations first; failed and never-run ones come last, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScheduleKey {
    duration: Reverse<Duration>,
    seq: u64,
}

/// One concrete (resource, query) poll unit.
pub struct AttributePermutation {
    seq: u64,
    resource: ResourceName,
    connection: Connection,
    query: Arc<AttributeQuery>,
    key: PermutationKey,
    template: RwLock<MetricSample>,
    stats: Mutex<RunStats>,
}

impl AttributePermutation {
    /// Build one permutation per discovered resource, in input order.
    ///
    /// An empty `names` slice is expected when a host lacks the resource:
    /// it is logged and yields no permutations. Key properties missing from
    /// a name are logged and left out of the instance names.
    pub fn create(
        names: &[ResourceName],
        connection: &Connection,
        query: &Arc<AttributeQuery>,
    ) -> Vec<Self> {
        if names.is_empty() {
            tracing::warn!(
                query = %query.name,
                pattern = %query.resource,
                url = %connection.raw_url(),
                "No resources matched"
            );
            return Vec::new();
        }

        let host = connection.host();
        names
            .iter()
            .map(|name| {
                let plugin_instance = instance_name(
                    [host.instance_prefix.as_deref(), query.instance_prefix.as_deref()],
                    name,
                    &query.instance_from,
                    "plugin",
                );
                let type_instance = instance_name(
                    [query.value_instance_prefix.as_deref()],
                    name,
                    &query.value_instance_from,
                    "type",
                );

                let template = MetricSample::new(
                    host.hostname.clone(),
                    query.plugin(),
                    query.dataset.type_name.clone(),
                )
                .with_plugin_instance(plugin_instance)
                .with_type_instance(type_instance);

                let key = PermutationKey {
                    hostname: host.hostname.clone(),
                    raw_url: host.raw_url().to_string(),
                    source: template.source(),
                    type_name: template.type_name.clone(),
                    type_instance: template.type_instance.clone(),
                };

                Self {
                    seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
                    resource: name.clone(),
                    connection: connection.clone(),
                    query: Arc::clone(query),
                    key,
                    template: RwLock::new(template),
                    stats: Mutex::new(RunStats::default()),
                }
            })
            .collect()
    }

    pub fn resource(&self) -> &ResourceName {
        &self.resource
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn query(&self) -> &AttributeQuery {
        &self.query
    }

    pub fn key(&self) -> &PermutationKey {
        &self.key
    }

    /// Creation sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Copy of the sample template.
    pub fn template(&self) -> MetricSample {
        self.template.read().clone()
    }

    /// Interval reported on every sample produced from now on.
    pub fn set_interval(&self, interval: Duration) {
        self.template.write().interval = interval;
    }

    pub fn stats(&self) -> RunStats {
        *self.stats.lock()
    }

    /// Last successful run duration, zero if the last run failed or never happened.
    pub fn last_run_duration(&self) -> Duration {
        self.stats().effective_duration()
    }

    pub fn schedule_key(&self) -> ScheduleKey {
        ScheduleKey {
            duration: Reverse(self.last_run_duration()),
            seq: self.seq,
        }
    }

    /// Execute one poll cycle and dispatch its samples.
    ///
    /// Returns the number of samples handed to the writer. Samples the
    /// writer drops are not counted and do not fail the run. The run is
    /// recorded as failed when it returns an error or when the future is
    /// dropped before completing.
    pub async fn run(&self, writer: &SampleWriter) -> Result<usize, PollError> {
        let mut guard = RunGuard {
            stats: &self.stats,
            start: Instant::now(),
            succeeded: false,
        };
        let template = self.template();

        let result = self.execute(template, writer).await;
        match &result {
            Ok(dispatched) => {
                guard.succeeded = true;
                tracing::trace!(key = ?self.key, dispatched, "Permutation run complete");
            }
            Err(e) => {
                tracing::warn!(
                    resource = %self.resource,
                    url = %self.connection.raw_url(),
                    error = %e,
                    "Permutation run failed"
                );
            }
        }
        result
    }

    async fn execute(&self, template: MetricSample, writer: &SampleWriter) -> Result<usize, PollError> {
        let url = self.connection.raw_url();
        let session = self
            .connection
            .session()
            .await
            .ok_or_else(|| PollError::NotConnected(url.to_string()))?;

        let values = PathResolver::new(session.as_ref(), &self.resource, url)
            .resolve_all(&self.query.attributes)
            .await?;

        let samples = if self.query.table {
            self.table_samples(&template, &values)?
        } else {
            self.scalar_sample(template, &values)?.into_iter().collect()
        };

        let mut dispatched = 0;
        for sample in samples {
            tracing::debug!(%sample, "dispatch");
            match writer.dispatch(sample) {
                Ok(()) => dispatched += 1,
                Err(e) => tracing::debug!(resource = %self.resource, error = %e, "Sample not dispatched"),
            }
        }
        Ok(dispatched)
    }

    fn scalar_sample(
        &self,
        mut sample: MetricSample,
        values: &[Value],
    ) -> Result<Option<MetricSample>, PollError> {
        if values.iter().any(Value::is_null) {
            return Ok(None);
        }
        sample.values = coerce_row(values, &self.query.dataset.sources)?;
        Ok(Some(sample))
    }

    fn table_samples(
        &self,
        template: &MetricSample,
        values: &[Value],
    ) -> Result<Vec<MetricSample>, PollError> {
        let rows = values
            .iter()
            .map(|v| {
                v.as_composite().ok_or_else(|| PollError::TableShape {
                    resource: self.resource.to_string(),
                    url: self.connection.raw_url().to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Key set of the first value, assumed uniform.
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };

        first
            .keys()
            .map(|key| {
                let cells = rows.iter().map(|row| row.get(key).unwrap_or(&Value::Null));
                let mut sample = template.clone();
                sample.type_instance.push_str(key);
                sample.values = coerce_row(cells, &self.query.dataset.sources)?;
                Ok(sample)
            })
            .collect()
    }

    #[cfg(test)]
    fn record(&self, stats: RunStats) {
        *self.stats.lock() = stats;
    }
}

/// Records the run outcome when dropped, including on cancellation.
struct RunGuard<'a> {
    stats: &'a Mutex<RunStats>,
    start: Instant,
    succeeded: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.stats.lock() = RunStats {
            duration: self.start.elapsed(),
            failed: !self.succeeded,
            last_run: Some(Utc::now()),
        };
    }
}

/// Join the prefixes and the named key properties of `name` with `-`.
fn instance_name<const N: usize>(
    prefixes: [Option<&str>; N],
    name: &ResourceName,
    properties: &[String],
    kind: &str,
) -> String {
    let mut segments: Vec<&str> = prefixes
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect();

    for property in properties {
        match name.key_property(property) {
            Some(value) => segments.push(value),
            None => tracing::error!(
                property = %property,
                resource = %name,
                "No such property for {kind} instance creation"
            ),
        }
    }
    segments.join("-")
}

impl PartialEq for AttributePermutation {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for AttributePermutation {}

impl Hash for AttributePermutation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl std::fmt::Debug for AttributePermutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributePermutation")
            .field("seq", &self.seq)
            .field("resource", &self.resource.to_string())
            .field("key", &self.key)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
