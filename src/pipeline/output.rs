//! JSON-lines sample output thread.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::pipeline::MetricSample;

/// How often an idle output thread checks for a stop request.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Writes every received sample to `W` as one JSON object per line.
///
/// The thread ends when every [`SampleWriter`](crate::pipeline::SampleWriter)
/// is gone, or when [`SampleOutput::shutdown`] asks it to. Samples already
/// queued at that point are still written.
pub struct SampleOutput<W> {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<io::Result<W>>,
}

impl<W: Write + Send + 'static> SampleOutput<W> {
    /// Start the output thread.
    pub fn spawn(samples: Receiver<MetricSample>, out: W) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("sample-output".into())
            .spawn(move || write_lines(&samples, out, &thread_stop))?;
        Ok(Self { stop, handle })
    }

    /// Stop after draining queued samples and wait for the thread.
    ///
    /// Returns the output, or the write error that ended the thread early.
    pub fn shutdown(self) -> io::Result<W> {
        self.stop.store(true, Ordering::Release);
        self.handle
            .join()
            .map_err(|_| io::Error::other("sample output thread panicked"))?
    }
}

fn write_lines<W: Write>(samples: &Receiver<MetricSample>, mut out: W, stop: &AtomicBool) -> io::Result<W> {
    tracing::debug!("Sample output started");
    let mut written = 0u64;

    loop {
        if stop.load(Ordering::Acquire) {
            for sample in samples.try_iter() {
                write_line(&mut out, &sample)?;
                written += 1;
            }
            break;
        }
        match samples.recv_timeout(STOP_CHECK_INTERVAL) {
            Ok(sample) => {
                write_line(&mut out, &sample)?;
                written += 1;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::debug!(written, "Sample output stopped");
    Ok(out)
}

fn write_line<W: Write>(out: &mut W, sample: &MetricSample) -> io::Result<()> {
    match serde_json::to_string(sample) {
        Ok(line) => {
            writeln!(out, "{line}")?;
            out.flush()
        }
        Err(e) => {
            tracing::warn!(sample = %sample.identifier(), error = %e, "Failed to encode sample");
            Ok(())
        }
    }
}
