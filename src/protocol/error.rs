//! Errors raised at the management-session boundary.

use thiserror::Error;

/// Errors reported by a [`Session`](super::Session) or [`Transport`](super::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The resource exposes no readable attribute with this name.
    #[error("attribute '{attribute}' not found on {resource}")]
    AttributeNotFound { resource: String, attribute: String },

    /// The resource exposes no zero-argument operation with this name.
    #[error("operation '{operation}' not found on {resource}")]
    OperationNotFound { resource: String, operation: String },

    /// The named resource is not registered on the server.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// The listener was never registered, or was already removed.
    #[error("listener not found")]
    ListenerNotFound,

    /// Transport-level I/O failure.
    #[error("i/o error: {0}")]
    Io(String),

    /// Access refused by the remote server.
    #[error("security error: {0}")]
    Security(String),

    /// No transport is available for the URL's protocol.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),
}

impl ProtocolError {
    /// Whether this error signals that the transport itself is unusable.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
