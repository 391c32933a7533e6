use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel as channel;

use crate::index::Shared;

/// Background thread that periodically makes buffered writes durable.
///
/// Each tick takes the index lock, flushes every dirty structure and clears the
/// interning caches. The thread exits once the index is disposed or dropped.
#[derive(Debug)]
pub(crate) struct FlushWorker {
    stop_tx: Option<channel::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FlushWorker {
    pub(crate) fn spawn(shared: Weak<Shared>, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("test-usage-flush".to_string())
            .spawn(move || run(shared, interval, stop_rx))?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Wakes the thread and waits for it to exit.
    ///
    /// Must not be called while holding the index lock.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Disconnecting the channel is the stop signal.
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(target = "nova.test_usage", "flush worker panicked");
            }
        }
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: Weak<Shared>, interval: Duration, stop_rx: channel::Receiver<()>) {
    let ticker = channel::tick(interval);
    loop {
        channel::select! {
            recv(stop_rx) -> _ => break,
            recv(ticker) -> _ => {
                let Some(shared) = shared.upgrade() else { break };
                if !shared.flush_cycle() {
                    break;
                }
            }
        }
    }
    tracing::debug!(target = "nova.test_usage", "flush worker stopped");
}
