//! Poll engine errors.

use thiserror::Error;

use crate::protocol::ProtocolError;

/// Errors that abort a single permutation execution, or the engine itself.
///
/// None of these terminate the process. An execution that fails is logged,
/// recorded as failed and retried on the next scheduled sweep.
#[derive(Debug, Error)]
pub enum PollError {
    /// Read, invoke or query failed at the session boundary.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No session could be obtained for the host.
    #[error("not connected to {0}")]
    NotConnected(String),

    /// Path traversal reached a value kind that is not handled yet.
    #[error("handling of open type '{0}' is not implemented")]
    Unimplemented(String),

    /// Path segment names a field the current value does not have.
    #[error("no field '{field}' on {type_name} value")]
    NoSuchField { field: String, type_name: String },

    /// Table mode requires every sub-value to be structured.
    #[error(
        "at least one attribute of {resource} @ {url} was not a composite value as required in table mode"
    )]
    TableShape { resource: String, url: String },

    /// Runtime value kind has no numeric representation.
    #[error("cannot convert type {0} to a number")]
    Coercion(String),

    /// Scheduler error.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),
}
