//! Asynchronous notifications emitted by transports and sessions.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use strum_macros::{AsRefStr, Display};

use super::ResourceName;

/// Connection lifecycle events reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionEvent {
    Opened,
    Closed,
    Failed,
    NotificationsLost,
}

/// Registration events broadcast by the server delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RegistrationEvent {
    Registered,
    Unregistered,
}

/// A notification delivered to a registered listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Transport state change for the connection identified by `connection_id`.
    Connection {
        connection_id: String,
        event: ConnectionEvent,
    },
    /// A resource was registered or unregistered on the server.
    Registration {
        name: ResourceName,
        event: RegistrationEvent,
    },
}

impl Notification {
    /// Whether this notification reports loss of the given connection.
    pub fn is_liveness_loss_of(&self, id: &str) -> bool {
        matches!(
            self,
            Self::Connection { connection_id, event: ConnectionEvent::Closed | ConnectionEvent::Failed }
                if connection_id == id
        )
    }
}

/// Callback invoked for each notification.
///
/// Listeners run on the notifying thread and must not block.
pub type NotificationListener = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Handle returned on registration, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocate a process-unique listener id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}
