//! Discovery and sweeps over every bound host.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};

use crate::connection::{Connection, RemoteHost};
use crate::pipeline::SampleWriter;
use crate::poller::{AttributePermutation, AttributeQuery, PermutationKey, PollError};
use crate::protocol::{ConnectionEvent, Notification, NotificationListener, TransportFactory};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Permutations known when the sweep started.
    pub scheduled: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Aborted at the deadline, or never started before it.
    pub cancelled: usize,
    /// Samples dispatched.
    pub samples: usize,
}

/// One connection and the queries polled through it.
struct HostBinding {
    connection: Connection,
    queries: Vec<Arc<AttributeQuery>>,
    rediscover: Arc<AtomicBool>,
    permutations: RwLock<Vec<Arc<AttributePermutation>>>,
}

/// Discovers permutations on every host and runs them on a bounded pool.
pub struct PollEngine {
    bindings: Vec<HostBinding>,
    writer: SampleWriter,
    interval: Duration,
    pool_size: usize,
    sweeping: tokio::sync::Mutex<()>,
}

impl PollEngine {
    pub fn new(writer: SampleWriter, interval: Duration, pool_size: usize) -> Self {
        Self {
            bindings: Vec::new(),
            writer,
            interval,
            pool_size: pool_size.max(1),
            sweeping: tokio::sync::Mutex::new(()),
        }
    }

    /// Bind `queries` to a new connection to `host`.
    ///
    /// Registration notifications and reconnects on that connection mark the
    /// host for re-discovery before the next sweep.
    pub fn add_host(
        &mut self,
        host: RemoteHost,
        factory: Arc<dyn TransportFactory>,
        queries: Vec<Arc<AttributeQuery>>,
    ) -> Connection {
        let rediscover = Arc::new(AtomicBool::new(true));
        let sink = notification_sink(host.raw_url().to_string(), Arc::clone(&rediscover));
        let connection = Connection::new(host, factory, Some(sink));

        tracing::info!(
            url = %connection.raw_url(),
            queries = queries.len(),
            "Host bound"
        );
        self.bindings.push(HostBinding {
            connection: connection.clone(),
            queries,
            rediscover,
            permutations: RwLock::new(Vec::new()),
        });
        connection
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.bindings.iter().map(|b| &b.connection)
    }

    /// Snapshot of every current permutation.
    pub fn permutations(&self) -> Vec<Arc<AttributePermutation>> {
        self.bindings
            .iter()
            .flat_map(|b| b.permutations.read().clone())
            .collect()
    }

    /// Re-discover every host marked for it.
    ///
    /// A host that cannot be reached keeps its previous permutations and
    /// stays marked.
    pub async fn discover(&self) {
        for binding in &self.bindings {
            if !binding.rediscover.swap(false, Ordering::AcqRel) {
                continue;
            }
            if let Err(e) = self.discover_host(binding).await {
                tracing::warn!(url = %binding.connection.raw_url(), error = %e, "Discovery failed");
                binding.rediscover.store(true, Ordering::Release);
            }
        }
    }

    async fn discover_host(&self, binding: &HostBinding) -> Result<(), PollError> {
        let url = binding.connection.raw_url();
        let session = binding
            .connection
            .session()
            .await
            .ok_or_else(|| PollError::NotConnected(url.to_string()))?;

        let mut fresh = Vec::new();
        for query in &binding.queries {
            let names = session.query_names(&query.resource).await?;
            fresh.extend(AttributePermutation::create(&names, &binding.connection, query));
        }

        let previous = binding.permutations.read().clone();
        let merged = merge(&previous, fresh, self.interval);
        tracing::info!(
            url = %url,
            before = previous.len(),
            after = merged.len(),
            "Discovery complete"
        );
        *binding.permutations.write() = merged;
        Ok(())
    }

    /// Discover, then run every permutation once.
    ///
    /// Permutations start in schedule order with at most `pool_size` running
    /// at once. Whatever has not finished when the interval elapses is
    /// aborted; an overlapping call returns an empty report.
    pub async fn sweep(&self) -> SweepReport {
        let Ok(_sweeping) = self.sweeping.try_lock() else {
            tracing::warn!("Previous sweep still running, skipping");
            return SweepReport::default();
        };
        let deadline = Instant::now() + self.interval;

        self.discover().await;

        let mut permutations = self.permutations();
        permutations.sort_by_key(|p| p.schedule_key());

        let mut report = SweepReport {
            scheduled: permutations.len(),
            ..SweepReport::default()
        };
        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut tasks = JoinSet::new();

        for (started, permutation) in permutations.into_iter().enumerate() {
            let permit = match timeout_at(deadline, Arc::clone(&semaphore).acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                _ => {
                    report.cancelled += report.scheduled - started;
                    break;
                }
            };
            let writer = self.writer.clone();
            tasks.spawn(async move {
                let _permit = permit;
                permutation.run(&writer).await
            });
        }

        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(result)) => tally(&mut report, result),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(running = tasks.len(), "Sweep deadline reached, cancelling");
                    tasks.abort_all();
                    while let Some(result) = tasks.join_next().await {
                        tally(&mut report, result);
                    }
                    break;
                }
            }
        }

        tracing::debug!(?report, "Sweep complete");
        report
    }

    /// Close every connection.
    pub async fn close(&self) {
        for binding in &self.bindings {
            binding.connection.close().await;
        }
    }
}

impl std::fmt::Debug for PollEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollEngine")
            .field("hosts", &self.bindings.len())
            .field("interval", &self.interval)
            .field("pool_size", &self.pool_size)
            .finish_non_exhaustive()
    }
}

fn tally(
    report: &mut SweepReport,
    result: Result<Result<usize, PollError>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(samples)) => {
            report.succeeded += 1;
            report.samples += samples;
        }
        Ok(Err(_)) => report.failed += 1,
        Err(e) if e.is_cancelled() => report.cancelled += 1,
        Err(e) => {
            tracing::error!(error = %e, "Permutation task panicked");
            report.failed += 1;
        }
    }
}

/// Keep previous permutations whose series and resource are unchanged, so
/// their run stats survive; collapse duplicate series.
fn merge(
    previous: &[Arc<AttributePermutation>],
    fresh: Vec<AttributePermutation>,
    interval: Duration,
) -> Vec<Arc<AttributePermutation>> {
    let mut existing: HashMap<&PermutationKey, &Arc<AttributePermutation>> =
        previous.iter().map(|p| (p.key(), p)).collect();
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(fresh.len());

    for permutation in fresh {
        if !seen.insert(permutation.key().clone()) {
            tracing::warn!(
                key = ?permutation.key(),
                resource = %permutation.resource(),
                "Duplicate metric series, ignoring resource"
            );
            continue;
        }
        match existing.remove(permutation.key()) {
            Some(kept) if kept.resource() == permutation.resource() => merged.push(Arc::clone(kept)),
            _ => {
                permutation.set_interval(interval);
                merged.push(Arc::new(permutation));
            }
        }
    }
    merged
}

fn notification_sink(url: String, rediscover: Arc<AtomicBool>) -> NotificationListener {
    Arc::new(move |notification: &Notification| match notification {
        Notification::Registration { name, event } => {
            tracing::debug!(url = %url, resource = %name, %event, "Registration notification");
            rediscover.store(true, Ordering::Release);
        }
        Notification::Connection { connection_id, event } => {
            tracing::debug!(url = %url, connection = %connection_id, %event, "Connection notification");
            if *event == ConnectionEvent::Opened {
                rediscover.store(true, Ordering::Release);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::Receiver;

    use crate::pipeline::{DataSet, MetricSample};
    use crate::protocol::memory::{MemoryResource, MemoryServer, MemoryTransportFactory};
    use crate::protocol::{ResourceName, ServiceUrl};

    fn name(s: &str) -> ResourceName {
        ResourceName::parse(s).unwrap()
    }

    fn cache_query() -> Arc<AttributeQuery> {
        Arc::new(
            AttributeQuery::new(
                "caches",
                name("app:type=Cache,*"),
                vec!["Hits".parse().unwrap()],
                DataSet::gauge("cache"),
            )
            .with_instance_from(None, ["name"]),
        )
    }

    fn cache(hits: i64) -> MemoryResource {
        MemoryResource::new().with_attribute("Hits", hits)
    }

    fn host(server: &str) -> RemoteHost {
        RemoteHost::new(ServiceUrl::parse(&format!("memory://{server}")).unwrap(), server)
    }

    struct Fixture {
        factory: Arc<MemoryTransportFactory>,
        engine: PollEngine,
        rx: Receiver<MetricSample>,
    }

    fn fixture(interval: Duration, pool_size: usize, servers: &[Arc<MemoryServer>]) -> Fixture {
        let factory = Arc::new(MemoryTransportFactory::new());
        let (writer, rx) = SampleWriter::channel(64);
        let mut engine = PollEngine::new(writer, interval, pool_size);
        for server in servers {
            factory.add_server(Arc::clone(server));
            engine.add_host(host(server.name()), factory.clone(), vec![cache_query()]);
        }
        Fixture { factory, engine, rx }
    }

    // ===== Discovery =====

    #[tokio::test]
    async fn test_discovery_creates_permutations() {
        let server = MemoryServer::new("app01");
        server.register(name("app:type=Cache,name=users"), cache(1));
        server.register(name("app:type=Cache,name=orders"), cache(2));
        server.register(name("app:type=Pool,name=eden"), MemoryResource::new());
        let fx = fixture(Duration::from_secs(1), 2, &[server]);

        fx.engine.discover().await;
        let perms = fx.engine.permutations();
        assert_eq!(perms.len(), 2);
        assert!(perms.iter().all(|p| p.template().interval == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_registration_triggers_rediscovery_and_keeps_stats() {
        let server = MemoryServer::new("app01");
        server.register(name("app:type=Cache,name=users"), cache(1));
        let fx = fixture(Duration::from_secs(1), 2, &[Arc::clone(&server)]);

        let report = fx.engine.sweep().await;
        assert_eq!(report.succeeded, 1);
        let before = fx.engine.permutations();
        let users_seq = before[0].seq();

        server.register(name("app:type=Cache,name=orders"), cache(2));
        let report = fx.engine.sweep().await;
        assert_eq!(report.scheduled, 2);
        assert_eq!(report.succeeded, 2);

        let after = fx.engine.permutations();
        let users = after
            .iter()
            .find(|p| p.resource() == &name("app:type=Cache,name=users"))
            .unwrap();
        assert_eq!(users.seq(), users_seq);

        server.unregister(&name("app:type=Cache,name=users"));
        fx.engine.discover().await;
        assert_eq!(fx.engine.permutations().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_host_keeps_permutations() {
        let server = MemoryServer::new("app01");
        server.register(name("app:type=Cache,name=users"), cache(1));
        let fx = fixture(Duration::from_secs(1), 2, &[Arc::clone(&server)]);
        fx.engine.discover().await;

        server.set_reachable(false);
        server.drop_connections();
        let report = fx.engine.sweep().await;
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.failed, 1);

        server.set_reachable(true);
        let report = fx.engine.sweep().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(fx.engine.permutations().len(), 1);
        assert!(fx.factory.server("app01").is_some());
    }

    #[test]
    fn test_merge_collapses_duplicate_series() {
        let server = MemoryServer::new("app01");
        let factory = Arc::new(MemoryTransportFactory::new());
        factory.add_server(Arc::clone(&server));
        let conn = Connection::new(host("app01"), factory, None);
        let unnamed = Arc::new(AttributeQuery::new(
            "caches",
            name("app:type=Cache,*"),
            vec!["Hits".parse().unwrap()],
            DataSet::gauge("cache"),
        ));

        let fresh = AttributePermutation::create(
            &[name("app:type=Cache,name=a"), name("app:type=Cache,name=b")],
            &conn,
            &unnamed,
        );
        let merged = merge(&[], fresh, Duration::from_secs(5));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].resource(), &name("app:type=Cache,name=a"));
        assert_eq!(merged[0].template().interval, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_series_differing_in_type_instance_are_kept() {
        let server = MemoryServer::new("app01");
        let usage = |used: i64| crate::protocol::CompositeValue::new("MemoryUsage").with_field("used", used);
        server.register(
            name("java.lang:type=Memory"),
            MemoryResource::new()
                .with_attribute("HeapMemoryUsage", usage(100))
                .with_attribute("NonHeapMemoryUsage", usage(40)),
        );
        let memory = |query: &str, attribute: &str, prefix: &str| {
            Arc::new(
                AttributeQuery::new(
                    query,
                    name("java.lang:type=Memory"),
                    vec![attribute.parse().unwrap()],
                    DataSet::gauge("memory"),
                )
                .with_value_instance_from(Some(prefix), Vec::<String>::new()),
            )
        };
        let factory = Arc::new(MemoryTransportFactory::new());
        factory.add_server(Arc::clone(&server));
        let (writer, rx) = SampleWriter::channel(16);
        let mut engine = PollEngine::new(writer, Duration::from_secs(1), 2);
        engine.add_host(
            host("app01"),
            factory,
            vec![
                memory("heap", "HeapMemoryUsage.used", "heap"),
                memory("nonheap", "NonHeapMemoryUsage.used", "nonheap"),
            ],
        );

        let report = engine.sweep().await;
        assert_eq!(report.scheduled, 2);
        assert_eq!(report.samples, 2);
        let ids: HashSet<String> = rx.try_iter().map(|s| s.identifier()).collect();
        assert!(ids.contains("app01/FastJMX/memory-heap"));
        assert!(ids.contains("app01/FastJMX/memory-nonheap"));
    }

    #[tokio::test]
    async fn test_full_channel_keeps_sweeps_successful() {
        let server = MemoryServer::new("app01");
        server.register(name("app:type=Cache,name=users"), cache(1));
        let factory = Arc::new(MemoryTransportFactory::new());
        factory.add_server(Arc::clone(&server));
        let (writer, _rx) = SampleWriter::channel(1);
        let mut engine = PollEngine::new(writer, Duration::from_secs(1), 2);
        engine.add_host(host("app01"), factory, vec![cache_query()]);

        let first = engine.sweep().await;
        assert_eq!((first.succeeded, first.samples), (1, 1));
        let second = engine.sweep().await;
        assert_eq!(second.succeeded, 1);
        assert_eq!(second.failed, 0);
        assert_eq!(second.samples, 0);
        assert!(!engine.permutations()[0].stats().failed);
    }

    // ===== Sweeps =====

    #[tokio::test]
    async fn test_sweep_dispatches_samples() {
        let server = MemoryServer::new("app01");
        server.register(name("app:type=Cache,name=users"), cache(7));
        let fx = fixture(Duration::from_secs(1), 2, &[server]);

        let report = fx.engine.sweep().await;
        assert_eq!(
            report,
            SweepReport {
                scheduled: 1,
                succeeded: 1,
                failed: 0,
                cancelled: 0,
                samples: 1,
            }
        );
        let sample = fx.rx.try_recv().unwrap();
        assert_eq!(sample.identifier(), "app01/FastJMX-users/cache");
        assert!(sample.time.is_some());
    }

    #[tokio::test]
    async fn test_sweep_runs_slowest_first() {
        let slow = MemoryServer::new("slow");
        slow.register(name("app:type=Cache,name=s"), cache(1));
        slow.set_latency(Duration::from_millis(30));
        let fast = MemoryServer::new("fast");
        fast.register(name("app:type=Cache,name=f"), cache(2));

        // The slow host is bound last, so a never-run sweep starts with the fast one.
        let fx = fixture(Duration::from_secs(2), 1, &[Arc::clone(&fast), Arc::clone(&slow)]);
        fx.engine.sweep().await;
        let hosts: Vec<String> = fx.rx.try_iter().map(|s| s.host).collect();
        assert_eq!(hosts, vec!["fast".to_string(), "slow".to_string()]);

        // Ordering follows the previous run, not the current one.
        slow.set_latency(Duration::ZERO);
        fx.engine.sweep().await;
        let hosts: Vec<String> = fx.rx.try_iter().map(|s| s.host).collect();
        assert_eq!(hosts, vec!["slow".to_string(), "fast".to_string()]);

        let perms = fx.engine.permutations();
        let mut order = perms.clone();
        order.sort_by_key(|p| p.schedule_key());
        assert!(order[0].last_run_duration() >= order[1].last_run_duration());
    }

    #[tokio::test]
    async fn test_deadline_cancels_running_permutations() {
        let server = MemoryServer::new("app01");
        server.register(name("app:type=Cache,name=users"), cache(1));
        server.register(name("app:type=Cache,name=orders"), cache(2));
        let fx = fixture(Duration::from_millis(300), 1, &[Arc::clone(&server)]);
        fx.engine.discover().await;

        server.set_latency(Duration::from_secs(10));
        let report = fx.engine.sweep().await;
        assert_eq!(report.scheduled, 2);
        assert_eq!(report.succeeded, 0);
        // One aborted while running, one never started.
        assert_eq!(report.cancelled, 2);

        let failed: Vec<bool> = fx
            .engine
            .permutations()
            .iter()
            .map(|p| p.stats().failed)
            .collect();
        assert_eq!(failed.iter().filter(|f| **f).count(), 1);
    }

    #[tokio::test]
    async fn test_close_disconnects_hosts() {
        let server = MemoryServer::new("app01");
        server.register(name("app:type=Cache,name=users"), cache(1));
        let fx = fixture(Duration::from_secs(1), 2, &[server]);
        fx.engine.sweep().await;
        assert!(fx.engine.connections().all(Connection::is_connected));

        fx.engine.close().await;
        assert!(!fx.engine.connections().any(Connection::is_connected));
    }
}
