//! In-process management servers.
//!
//! [`MemoryServer`] holds a set of resources and behaves like a remote
//! server reached through [`MemoryTransportFactory`] with `memory://<server>`
//! URLs. Servers can be taken offline, can drop or fail their connections
//! and can hide the delegate, which makes every transport and session path
//! of the engine reachable without a network.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{
    ConnectEnvironment, ConnectionEvent, Credentials, ListenerId, Notification,
    NotificationListener, ProtocolError, RegistrationEvent, ResourceName, ServiceUrl, Session,
    Transport, TransportFactory, Value,
};

/// Protocol name served by [`MemoryTransportFactory`].
pub const MEMORY_PROTOCOL: &str = "memory";

/// Attributes and zero-argument operations of one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryResource {
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub operations: BTreeMap<String, Value>,
}

impl MemoryResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_operation(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.operations.insert(name.into(), value.into());
        self
    }
}

struct Subscription {
    name: ResourceName,
    id: ListenerId,
    listener: NotificationListener,
}

struct ServerState {
    resources: BTreeMap<ResourceName, MemoryResource>,
    reachable: bool,
    delegate_registered: bool,
    required_credentials: Option<Credentials>,
    latency: Duration,
    subscriptions: Vec<Subscription>,
    transports: Vec<Weak<MemoryTransport>>,
}

/// An in-process management server.
pub struct MemoryServer {
    name: String,
    state: RwLock<ServerState>,
    reads: AtomicU64,
    transports_opened: AtomicU64,
}

impl MemoryServer {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: RwLock::new(ServerState {
                resources: BTreeMap::new(),
                reachable: true,
                delegate_registered: true,
                required_credentials: None,
                latency: Duration::ZERO,
                subscriptions: Vec::new(),
                transports: Vec::new(),
            }),
            reads: AtomicU64::new(0),
            transports_opened: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register (or replace) a resource and notify delegate subscribers.
    pub fn register(&self, name: ResourceName, resource: MemoryResource) {
        self.state.write().resources.insert(name.clone(), resource);
        self.broadcast(Notification::Registration {
            name,
            event: RegistrationEvent::Registered,
        });
    }

    /// Unregister a resource and notify delegate subscribers.
    pub fn unregister(&self, name: &ResourceName) {
        let removed = self.state.write().resources.remove(name).is_some();
        if removed {
            self.broadcast(Notification::Registration {
                name: name.clone(),
                event: RegistrationEvent::Unregistered,
            });
        }
    }

    /// Replace one attribute value of a registered resource.
    pub fn set_attribute(&self, name: &ResourceName, attribute: &str, value: impl Into<Value>) {
        if let Some(resource) = self.state.write().resources.get_mut(name) {
            resource.attributes.insert(attribute.to_string(), value.into());
        }
    }

    /// Simulate an outage: connects and reads fail with I/O errors.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.write().reachable = reachable;
    }

    /// Hide the delegate; subscribing to it then reports instance-not-found.
    pub fn set_delegate_registered(&self, registered: bool) {
        self.state.write().delegate_registered = registered;
    }

    /// Require these credentials on connect.
    pub fn require_credentials(&self, credentials: Credentials) {
        self.state.write().required_credentials = Some(credentials);
    }

    /// Delay applied to every read and invocation.
    pub fn set_latency(&self, latency: Duration) {
        self.state.write().latency = latency;
    }

    /// Report a failure on every open transport without closing it.
    pub fn notify_failure(&self) {
        for transport in self.live_transports() {
            transport.emit(ConnectionEvent::Failed);
        }
    }

    /// Close every open transport from the server side.
    pub fn drop_connections(&self) {
        for transport in self.live_transports() {
            *transport.open.lock() = false;
            transport.emit(ConnectionEvent::Closed);
        }
    }

    /// Attribute reads and invocations served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Transports successfully opened so far.
    pub fn transports_opened(&self) -> u64 {
        self.transports_opened.load(Ordering::Relaxed)
    }

    fn live_transports(&self) -> Vec<Arc<MemoryTransport>> {
        let mut state = self.state.write();
        state.transports.retain(|t| t.strong_count() > 0);
        state.transports.iter().filter_map(Weak::upgrade).collect()
    }

    fn broadcast(&self, notification: Notification) {
        let delegate = ResourceName::delegate();
        let listeners: Vec<NotificationListener> = self
            .state
            .read()
            .subscriptions
            .iter()
            .filter(|s| s.name == delegate)
            .map(|s| Arc::clone(&s.listener))
            .collect();
        for listener in listeners {
            listener(&notification);
        }
    }

    fn check_reachable(&self) -> Result<(), ProtocolError> {
        if self.state.read().reachable {
            Ok(())
        } else {
            Err(ProtocolError::Io(format!("server '{}' unreachable", self.name)))
        }
    }

    async fn simulate_latency(&self) {
        let latency = self.state.read().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl std::fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryServer")
            .field("name", &self.name)
            .field("resources", &self.state.read().resources.len())
            .finish_non_exhaustive()
    }
}

/// Transport to a [`MemoryServer`].
pub struct MemoryTransport {
    id: String,
    server: Arc<MemoryServer>,
    credentials: Option<Credentials>,
    open: Mutex<bool>,
    listeners: Mutex<Vec<(ListenerId, NotificationListener)>>,
}

impl MemoryTransport {
    fn emit(&self, event: ConnectionEvent) {
        let notification = Notification::Connection {
            connection_id: self.id.clone(),
            event,
        };
        let listeners: Vec<NotificationListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&notification);
        }
    }

    fn check_open(&self) -> Result<(), ProtocolError> {
        if *self.open.lock() {
            self.server.check_reachable()
        } else {
            Err(ProtocolError::Io(format!("{} is not open", self.id)))
        }
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    fn connection_id(&self) -> String {
        self.id.clone()
    }

    fn add_connection_listener(&self, listener: NotificationListener) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove_connection_listener(&self, id: ListenerId) -> Result<(), ProtocolError> {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        if listeners.len() == before {
            return Err(ProtocolError::ListenerNotFound);
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        self.server.check_reachable()?;

        let required = self.server.state.read().required_credentials.clone();
        if let Some(required) = required
            && self.credentials.as_ref() != Some(&required)
        {
            return Err(ProtocolError::Security(format!(
                "authentication failed for server '{}'",
                self.server.name
            )));
        }

        *self.open.lock() = true;
        self.server.transports_opened.fetch_add(1, Ordering::Relaxed);
        self.emit(ConnectionEvent::Opened);
        Ok(())
    }

    async fn session(&self) -> Result<Arc<dyn Session>, ProtocolError> {
        self.check_open()?;
        let transport = self
            .server
            .live_transports()
            .into_iter()
            .find(|t| t.id == self.id)
            .ok_or_else(|| ProtocolError::Io(format!("{} is gone", self.id)))?;
        Ok(Arc::new(MemorySession { transport }))
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        let was_open = std::mem::replace(&mut *self.open.lock(), false);
        if was_open {
            self.emit(ConnectionEvent::Closed);
        }
        Ok(())
    }
}

struct MemorySession {
    transport: Arc<MemoryTransport>,
}

impl MemorySession {
    fn server(&self) -> &MemoryServer {
        &self.transport.server
    }

    async fn read<F>(&self, name: &ResourceName, lookup: F) -> Result<Value, ProtocolError>
    where
        F: FnOnce(&MemoryResource) -> Result<Value, ProtocolError>,
    {
        self.transport.check_open()?;
        self.server().simulate_latency().await;
        self.transport.check_open()?;
        self.server().reads.fetch_add(1, Ordering::Relaxed);

        let state = self.server().state.read();
        let resource = state
            .resources
            .get(name)
            .ok_or_else(|| ProtocolError::InstanceNotFound(name.to_string()))?;
        lookup(resource)
    }
}

#[async_trait::async_trait]
impl Session for MemorySession {
    async fn get_attribute(
        &self,
        name: &ResourceName,
        attribute: &str,
    ) -> Result<Value, ProtocolError> {
        self.read(name, |r| {
            r.attributes
                .get(attribute)
                .cloned()
                .ok_or_else(|| ProtocolError::AttributeNotFound {
                    resource: name.to_string(),
                    attribute: attribute.to_string(),
                })
        })
        .await
    }

    async fn invoke(&self, name: &ResourceName, operation: &str) -> Result<Value, ProtocolError> {
        self.read(name, |r| {
            r.operations
                .get(operation)
                .cloned()
                .ok_or_else(|| ProtocolError::OperationNotFound {
                    resource: name.to_string(),
                    operation: operation.to_string(),
                })
        })
        .await
    }

    async fn query_names(&self, pattern: &ResourceName) -> Result<Vec<ResourceName>, ProtocolError> {
        self.transport.check_open()?;
        Ok(self
            .server()
            .state
            .read()
            .resources
            .keys()
            .filter(|n| pattern.matches(n))
            .cloned()
            .collect())
    }

    async fn add_notification_listener(
        &self,
        name: &ResourceName,
        listener: NotificationListener,
    ) -> Result<ListenerId, ProtocolError> {
        self.transport.check_open()?;
        let mut state = self.server().state.write();

        let known = if *name == ResourceName::delegate() {
            state.delegate_registered
        } else {
            state.resources.contains_key(name)
        };
        if !known {
            return Err(ProtocolError::InstanceNotFound(name.to_string()));
        }

        let id = ListenerId::next();
        state.subscriptions.push(Subscription {
            name: name.clone(),
            id,
            listener,
        });
        Ok(id)
    }

    async fn remove_notification_listener(
        &self,
        name: &ResourceName,
        id: ListenerId,
    ) -> Result<(), ProtocolError> {
        let mut state = self.server().state.write();
        let before = state.subscriptions.len();
        state
            .subscriptions
            .retain(|s| !(s.id == id && s.name == *name));
        if state.subscriptions.len() == before {
            return Err(ProtocolError::ListenerNotFound);
        }
        Ok(())
    }
}

/// Creates transports to registered [`MemoryServer`]s.
#[derive(Default)]
pub struct MemoryTransportFactory {
    servers: RwLock<HashMap<String, Arc<MemoryServer>>>,
    next_id: AtomicU64,
}

impl MemoryTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a server reachable as `memory://<name>`.
    pub fn add_server(&self, server: Arc<MemoryServer>) {
        self.servers
            .write()
            .insert(server.name().to_string(), server);
    }

    pub fn server(&self, name: &str) -> Option<Arc<MemoryServer>> {
        self.servers.read().get(name).cloned()
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn new_transport(
        &self,
        url: &ServiceUrl,
        env: &ConnectEnvironment,
    ) -> Result<Arc<dyn Transport>, ProtocolError> {
        if url.protocol() != MEMORY_PROTOCOL {
            return Err(ProtocolError::UnsupportedProtocol(url.protocol().to_string()));
        }

        let server_name = url.host().unwrap_or_default();
        let server = self
            .server(server_name)
            .ok_or_else(|| ProtocolError::Io(format!("no memory server named '{server_name}'")))?;

        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let transport = Arc::new(MemoryTransport {
            id: format!("{url}#{n}"),
            server: Arc::clone(&server),
            credentials: env.credentials.clone(),
            open: Mutex::new(false),
            listeners: Mutex::new(Vec::new()),
        });
        server
            .state
            .write()
            .transports
            .push(Arc::downgrade(&transport));

        Ok(transport)
    }
}
