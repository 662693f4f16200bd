//! Lazily established transport/session pair for one host.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use strum_macros::{AsRefStr, Display};

use crate::connection::RemoteHost;
use crate::protocol::{
    ConnectEnvironment, ListenerId, Notification, NotificationListener, ProtocolError,
    ResourceName, Session, Transport, TransportFactory,
};

/// Provider family requested from transport factories.
pub const PROVIDER_HINT: &str = "mbeanpoll";

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// References swapped by connect, close and the liveness listener.
///
/// Guarded by a short-lived lock that is never held across an await;
/// readers clone the `Arc`s out and use them unlocked.
#[derive(Default)]
struct Link {
    transport: Option<Arc<dyn Transport>>,
    session: Option<Arc<dyn Session>>,
    connection_listeners: Vec<ListenerId>,
    /// Delegate subscription and the session it was made on, which can
    /// outlive `session` after a liveness loss.
    delegate_listener: Option<(Arc<dyn Session>, ListenerId)>,
}

struct Inner {
    host: RemoteHost,
    factory: Arc<dyn TransportFactory>,
    sink: Option<NotificationListener>,
    /// Serializes connect and close.
    gate: tokio::sync::Mutex<()>,
    link: RwLock<Link>,
}

/// Transport and session to one [`RemoteHost`].
///
/// Cloning is cheap; clones share the same underlying link.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create a disconnected connection.
    ///
    /// `sink` receives every connection notification of the transport and
    /// every registration notification from the server delegate.
    pub fn new(
        host: RemoteHost,
        factory: Arc<dyn TransportFactory>,
        sink: Option<NotificationListener>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                factory,
                sink,
                gate: tokio::sync::Mutex::new(()),
                link: RwLock::new(Link::default()),
            }),
        }
    }

    pub fn host(&self) -> &RemoteHost {
        &self.inner.host
    }

    pub fn raw_url(&self) -> &str {
        self.inner.host.raw_url()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        let link = self.inner.link.read();
        match (&link.transport, &link.session) {
            (Some(_), Some(_)) => ConnectionState::Connected,
            (Some(_), None) => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }

    /// Establish whatever part of the link is missing.
    ///
    /// No-op when already connected. Failures are logged and leave the
    /// connection in the state reached so far.
    pub async fn connect(&self) {
        let _gate = self.inner.gate.lock().await;
        self.inner.connect_locked().await;
    }

    /// Unsubscribe listeners, close the transport and clear the link.
    pub async fn close(&self) {
        let _gate = self.inner.gate.lock().await;
        self.inner.close_locked().await;
    }

    /// Connect if needed, then return the current session.
    ///
    /// `None` means the host could not be reached this time.
    pub async fn session(&self) -> Option<Arc<dyn Session>> {
        self.connect().await;
        self.inner.link.read().session.clone()
    }

    /// Liveness transition: a closed or failed notification for the current
    /// transport drops the session and keeps the transport.
    pub fn handle_notification(&self, notification: &Notification) {
        self.inner.on_notification(notification);
    }
}

impl Inner {
    async fn connect_locked(self: &Arc<Self>) {
        let (transport, has_session) = {
            let link = self.link.read();
            (link.transport.clone(), link.session.is_some())
        };
        if transport.is_some() && has_session {
            return;
        }

        let transport = match transport {
            Some(transport) => transport,
            None => match self.open_transport().await {
                Ok(transport) => transport,
                Err(e) => {
                    tracing::warn!(url = %self.host.raw_url(), error = %e, "Could not connect");
                    *self.link.write() = Link::default();
                    return;
                }
            },
        };

        let session = match transport.session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(url = %self.host.raw_url(), error = %e, "Could not get session");
                self.close_locked().await;
                return;
            }
        };
        self.link.write().session = Some(Arc::clone(&session));
        tracing::debug!(url = %self.host.raw_url(), "Session established");

        let Some(sink) = self.sink.clone() else {
            return;
        };
        let stale = self.link.write().delegate_listener.take();
        if let Some((old_session, id)) = stale {
            self.unsubscribe_delegate(old_session.as_ref(), id).await;
        }
        match session
            .add_notification_listener(&ResourceName::delegate(), sink)
            .await
        {
            Ok(id) => self.link.write().delegate_listener = Some((session, id)),
            Err(ProtocolError::InstanceNotFound(_)) => {
                tracing::info!(
                    url = %self.host.raw_url(),
                    "Could not register delegate listener, newly deployed or undeployed resources will not be detected"
                );
            }
            Err(e) if e.is_io() => {
                tracing::warn!(url = %self.host.raw_url(), error = %e, "Could not subscribe to delegate");
                self.close_locked().await;
            }
            Err(e) => {
                tracing::warn!(url = %self.host.raw_url(), error = %e, "Delegate subscription refused");
            }
        }
    }

    async fn open_transport(self: &Arc<Self>) -> Result<Arc<dyn Transport>, ProtocolError> {
        let env = ConnectEnvironment {
            credentials: self.host.credentials(),
            provider_hint: PROVIDER_HINT.to_string(),
        };
        let transport = self.factory.new_transport(&self.host.url, &env)?;

        let mut listeners = Vec::with_capacity(2);
        if let Some(sink) = &self.sink {
            listeners.push(transport.add_connection_listener(Arc::clone(sink)));
        }
        listeners.push(transport.add_connection_listener(self.liveness_listener()));

        transport.connect().await?;
        tracing::info!(url = %self.host.raw_url(), "Transport connected");

        *self.link.write() = Link {
            transport: Some(Arc::clone(&transport)),
            session: None,
            connection_listeners: listeners,
            delegate_listener: None,
        };
        Ok(transport)
    }

    async fn close_locked(&self) {
        tracing::info!(url = %self.host.raw_url(), "Closing");
        let link = std::mem::take(&mut *self.link.write());

        let Some(transport) = link.transport else {
            return;
        };

        if let Some((session, id)) = link.delegate_listener {
            self.unsubscribe_delegate(session.as_ref(), id).await;
        }

        for id in link.connection_listeners {
            if let Err(ProtocolError::ListenerNotFound) = transport.remove_connection_listener(id) {
                tracing::debug!(url = %self.host.raw_url(), listener = %id, "Listener already unregistered");
            }
        }

        if let Err(e) = transport.close().await {
            tracing::warn!(url = %self.host.raw_url(), error = %e, "Error closing transport");
        }
    }

    async fn unsubscribe_delegate(&self, session: &dyn Session, id: ListenerId) {
        if let Err(e) = session
            .remove_notification_listener(&ResourceName::delegate(), id)
            .await
        {
            tracing::debug!(url = %self.host.raw_url(), error = %e, "Could not unsubscribe from delegate");
        }
    }

    fn liveness_listener(self: &Arc<Self>) -> NotificationListener {
        let weak: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |notification: &Notification| {
            if let Some(inner) = weak.upgrade() {
                inner.on_notification(notification);
            }
        })
    }

    fn on_notification(&self, notification: &Notification) {
        let mut link = self.link.write();
        let Some(transport) = &link.transport else {
            return;
        };
        if notification.is_liveness_loss_of(&transport.connection_id()) {
            link.session = None;
            tracing::debug!(url = %self.host.raw_url(), "Session invalidated by connection notification");
        }
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.host == other.inner.host
    }
}

impl Eq for Connection {}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.inner.host)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServiceUrl;
    use crate::protocol::memory::{MemoryResource, MemoryServer, MemoryTransportFactory};
    use parking_lot::Mutex;

    fn setup() -> (Arc<MemoryServer>, Connection) {
        let server = MemoryServer::new("app01");
        server.register(
            ResourceName::parse("java.lang:type=Threading").unwrap(),
            MemoryResource::new().with_attribute("ThreadCount", 12i64),
        );
        let factory = Arc::new(MemoryTransportFactory::new());
        factory.add_server(Arc::clone(&server));

        let host = RemoteHost::new(ServiceUrl::parse("memory://app01").unwrap(), "app01");
        (server, Connection::new(host, factory, None))
    }

    #[tokio::test]
    async fn test_connect_is_lazy_and_idempotent() {
        let (server, conn) = setup();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.connect().await;
        assert!(conn.is_connected());
        conn.connect().await;
        assert_eq!(server.transports_opened(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_stays_disconnected() {
        let (server, conn) = setup();
        server.set_reachable(false);

        assert!(conn.session().await.is_none());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        server.set_reachable(true);
        assert!(conn.session().await.is_some());
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_close_then_session_reconnects() {
        let (server, conn) = setup();
        conn.connect().await;
        conn.close().await;
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let session = conn.session().await;
        assert!(session.is_some());
        assert!(conn.is_connected());
        assert_eq!(server.transports_opened(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_server, conn) = setup();
        conn.close().await;
        conn.connect().await;
        conn.close().await;
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failure_notification_clears_session_only() {
        let (server, conn) = setup();
        conn.connect().await;
        assert!(conn.is_connected());

        server.notify_failure();
        assert!(!conn.is_connected());
        assert_eq!(conn.state(), ConnectionState::Connecting);

        // Transport is still open: only the session is fetched again.
        assert!(conn.session().await.is_some());
        assert_eq!(server.transports_opened(), 1);
    }

    #[tokio::test]
    async fn test_dropped_transport_is_replaced() {
        let (server, conn) = setup();
        conn.connect().await;

        server.drop_connections();
        assert_eq!(conn.state(), ConnectionState::Connecting);

        // Session fetch fails on the dead transport, which closes the link;
        // the following request opens a fresh transport.
        assert!(conn.session().await.is_none());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.session().await.is_some());
        assert_eq!(server.transports_opened(), 2);
    }

    #[tokio::test]
    async fn test_notification_for_other_transport_is_ignored() {
        let (_server, conn) = setup();
        conn.connect().await;

        conn.handle_notification(&Notification::Connection {
            connection_id: "memory://elsewhere#99".into(),
            event: crate::protocol::ConnectionEvent::Failed,
        });
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_missing_delegate_keeps_session() {
        let (server, _) = setup();
        server.set_delegate_registered(false);

        let factory = Arc::new(MemoryTransportFactory::new());
        factory.add_server(Arc::clone(&server));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: NotificationListener = Arc::new(move |n: &Notification| sink_seen.lock().push(n.clone()));
        let host = RemoteHost::new(ServiceUrl::parse("memory://app01").unwrap(), "app01");
        let conn = Connection::new(host, factory, Some(sink));

        assert!(conn.session().await.is_some());
        assert!(conn.is_connected());
        // The sink still hears connection events.
        assert!(!seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_sink_receives_registrations() {
        let server = MemoryServer::new("app01");
        let factory = Arc::new(MemoryTransportFactory::new());
        factory.add_server(Arc::clone(&server));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: NotificationListener = Arc::new(move |n: &Notification| sink_seen.lock().push(n.clone()));
        let host = RemoteHost::new(ServiceUrl::parse("memory://app01").unwrap(), "app01");
        let conn = Connection::new(host, factory, Some(sink));

        conn.connect().await;
        server.register(
            ResourceName::parse("app:type=Cache,name=users").unwrap(),
            MemoryResource::new(),
        );

        assert!(
            seen.lock()
                .iter()
                .any(|n| matches!(n, Notification::Registration { .. }))
        );

        conn.close().await;
        let before = seen.lock().len();
        server.register(
            ResourceName::parse("app:type=Cache,name=orders").unwrap(),
            MemoryResource::new(),
        );
        assert_eq!(seen.lock().len(), before);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_delegate_listener() {
        let server = MemoryServer::new("app01");
        let factory = Arc::new(MemoryTransportFactory::new());
        factory.add_server(Arc::clone(&server));
        let registrations = Arc::new(Mutex::new(0usize));
        let sink_count = Arc::clone(&registrations);
        let sink: NotificationListener = Arc::new(move |n: &Notification| {
            if matches!(n, Notification::Registration { .. }) {
                *sink_count.lock() += 1;
            }
        });
        let host = RemoteHost::new(ServiceUrl::parse("memory://app01").unwrap(), "app01");
        let conn = Connection::new(host, factory, Some(sink));

        conn.connect().await;
        server.notify_failure();
        assert!(conn.session().await.is_some());
        server.notify_failure();
        assert!(conn.session().await.is_some());

        server.register(
            ResourceName::parse("app:type=Cache,name=users").unwrap(),
            MemoryResource::new(),
        );
        assert_eq!(*registrations.lock(), 1);

        // The subscription is removed on close even without a live session.
        server.notify_failure();
        conn.close().await;
        server.register(
            ResourceName::parse("app:type=Cache,name=orders").unwrap(),
            MemoryResource::new(),
        );
        assert_eq!(*registrations.lock(), 1);
    }
}
