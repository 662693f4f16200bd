//! Non-blocking sample writer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use chrono::Utc;

use crate::pipeline::{MetricSample, PipelineError};

/// Default channel capacity for dispatched samples.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Non-blocking sample writer.
///
/// Uses `try_send` - a sample is dropped if the channel is full, so a slow
/// consumer never stalls poll workers.
#[derive(Clone)]
pub struct SampleWriter {
    tx: SyncSender<MetricSample>,
    dispatched: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for SampleWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleWriter")
            .field("dispatched", &self.dispatched())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl SampleWriter {
    /// Create a writer and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, Receiver<MetricSample>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        let writer = Self {
            tx,
            dispatched: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (writer, rx)
    }

    /// Stamp and hand over one sample.
    pub fn dispatch(&self, mut sample: MetricSample) -> Result<(), PipelineError> {
        if sample.time.is_none() {
            sample.time = Some(Utc::now());
        }

        match self.tx.try_send(sample) {
            Ok(()) => {
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(sample)) => {
                tracing::warn!(sample = %sample.identifier(), "Channel full, dropping sample");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(PipelineError::ChannelFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(PipelineError::ChannelClosed)
            }
        }
    }

    /// Samples accepted by the channel so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Samples dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
