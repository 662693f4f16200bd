//! Connection Layer
//!
//! One [`Connection`] per [`RemoteHost`] owns the transport and session to
//! that host. Connections are lazy: nothing is opened until a poll asks for
//! a session, and a lost session is re-established on the next request.
//!
//! # States
//!
//! - [`ConnectionState::Disconnected`]: no transport, no session
//! - [`ConnectionState::Connecting`]: transport open, session not confirmed
//! - [`ConnectionState::Connected`]: transport and session both live

mod host;
mod link;

pub use host::RemoteHost;
pub use link::{Connection, ConnectionState, PROVIDER_HINT};
