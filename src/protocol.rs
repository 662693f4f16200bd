//! Management Protocol Boundary
//!
//! The engine never speaks a wire protocol itself. It talks to remote
//! management servers through the traits in this module, which model a
//! connection that already speaks the protocol:
//!
//! - [`TransportFactory`] / [`Transport`]: per-host transport with
//!   connection-level notifications (opened, closed, failed)
//! - [`Session`]: attribute reads, zero-argument operations, name queries
//!   and resource-level notifications
//! - [`ResourceName`]: structured `domain:key=value` resource identifiers
//! - [`Value`]: runtime values whose shape is only known after a read
//!
//! [`memory`] provides an in-process implementation used by the test suite
//! and by the binary's fixture mode.

mod error;
pub mod memory;
mod name;
mod notification;
mod session;
mod value;

pub use error::ProtocolError;
pub use name::{DELEGATE_NAME, NameParseError, ResourceName};
pub use notification::{
    ConnectionEvent, ListenerId, Notification, NotificationListener, RegistrationEvent,
};
pub use session::{ConnectEnvironment, Credentials, ServiceUrl, Session, Transport, TransportFactory};
pub use value::{CompositeValue, ExactNumber, ObjectValue, Value};
