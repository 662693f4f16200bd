//! Transport and session traits.

use std::fmt;
use std::sync::Arc;

use super::{ListenerId, NotificationListener, ProtocolError, ResourceName, Value};

/// A live management session against one remote server.
///
/// Implementations must tolerate concurrent calls; the engine reads from
/// one session on many workers at once.
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Read a named attribute.
    ///
    /// Returns [`ProtocolError::AttributeNotFound`] when the resource has no
    /// such attribute.
    async fn get_attribute(
        &self,
        name: &ResourceName,
        attribute: &str,
    ) -> Result<Value, ProtocolError>;

    /// Invoke a zero-argument operation.
    async fn invoke(&self, name: &ResourceName, operation: &str) -> Result<Value, ProtocolError>;

    /// Names of registered resources selected by `pattern`, in server order.
    async fn query_names(&self, pattern: &ResourceName) -> Result<Vec<ResourceName>, ProtocolError>;

    /// Subscribe to notifications broadcast by `name`.
    async fn add_notification_listener(
        &self,
        name: &ResourceName,
        listener: NotificationListener,
    ) -> Result<ListenerId, ProtocolError>;

    /// Cancel a subscription made with [`Session::add_notification_listener`].
    async fn remove_notification_listener(
        &self,
        name: &ResourceName,
        id: ListenerId,
    ) -> Result<(), ProtocolError>;
}

/// Transport to one remote host.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Identifier carried by this transport's connection notifications.
    fn connection_id(&self) -> String;

    /// Register a connection-state listener.
    fn add_connection_listener(&self, listener: NotificationListener) -> ListenerId;

    /// Remove a connection-state listener.
    fn remove_connection_listener(&self, id: ListenerId) -> Result<(), ProtocolError>;

    /// Open the transport, performing the handshake.
    async fn connect(&self) -> Result<(), ProtocolError>;

    /// Fetch the session of an opened transport.
    async fn session(&self) -> Result<Arc<dyn Session>, ProtocolError>;

    /// Close the transport.
    async fn close(&self) -> Result<(), ProtocolError>;
}

/// Creates transports for service URLs.
pub trait TransportFactory: Send + Sync {
    fn new_transport(
        &self,
        url: &ServiceUrl,
        env: &ConnectEnvironment,
    ) -> Result<Arc<dyn Transport>, ProtocolError>;
}

/// Username/password pair presented on connect.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Environment handed to a [`TransportFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectEnvironment {
    /// Present only when both username and password are configured.
    pub credentials: Option<Credentials>,
    /// Which protocol-provider family the transport should load.
    pub provider_hint: String,
}

/// A parsed service URL.
///
/// Two forms are accepted: `service:<family>:<protocol>:<address>` (for
/// example `service:jmx:rmi:///jndi/rmi://db01:9010/jmxrmi`) and plain
/// `<protocol>://<host>...` URLs such as `memory://app01`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceUrl {
    raw: String,
    protocol: String,
    host: Option<String>,
}

impl ServiceUrl {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let url = url::Url::parse(raw).map_err(|e| format!("invalid service URL '{raw}': {e}"))?;

        let (protocol, host) = if url.scheme() == "service" {
            let mut parts = url.path().splitn(3, ':');
            let _family = parts.next();
            let protocol = parts
                .next()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| format!("service URL '{raw}' names no protocol"))?;
            (protocol.to_string(), embedded_host(raw))
        } else {
            (
                url.scheme().to_string(),
                url.host_str().filter(|h| !h.is_empty()).map(str::to_string),
            )
        };

        Ok(Self {
            raw: raw.to_string(),
            protocol,
            host,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Host named by the URL, if any.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

/// Host of the innermost `scheme://host[:port]` segment.
fn embedded_host(raw: &str) -> Option<String> {
    let (_, rest) = raw.rsplit_once("://")?;
    let host = rest.split(['/', ':']).next()?;
    (!host.is_empty()).then(|| host.to_string())
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
