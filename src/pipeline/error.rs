//! Pipeline-specific error types.

use thiserror::Error;

/// Errors that can occur while handing samples to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The channel is at capacity; the sample was dropped.
    #[error("sample channel full, sample dropped")]
    ChannelFull,

    /// The consumer has gone away.
    #[error("sample channel closed")]
    ChannelClosed,
}
