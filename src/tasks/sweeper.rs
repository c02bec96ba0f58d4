//! Expiry Sweeper
//!
//! Background worker that sleeps until the earliest deadline in the
//! expiration queue and evicts due entries.
//!
//! The worker is a dedicated thread driving a current-thread Tokio runtime.
//! Each iteration waits on three things at once:
//! - the stop request, which ends the loop
//! - the wake signal, sent by writes and by reads that moved a deadline
//!   ahead of the scheduled wake, which only recomputes the sleep
//! - the timer, which runs an eviction pass
//!
//! Expiration callbacks are dispatched on the runtime's blocking pool once the
//! cache lock is released.

use std::hash::Hash;
use std::sync::Arc;
use std::thread;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;
use tracing::{info, trace, warn};

use crate::cache::{ExpirationCallback, Shared};
use crate::error::Result;

/// Name of the sweeper thread.
pub const SWEEPER_THREAD_NAME: &str = "ttl-cache-sweeper";

/// Handle of the running sweep worker.
#[derive(Debug)]
pub(crate) struct SweepWorker {
    stop_tx: oneshot::Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl SweepWorker {
    /// Starts the worker thread for the given cache state.
    pub(crate) fn spawn<K, V>(shared: Arc<Shared<K, V>>) -> Result<Self>
    where
        K: Eq + Hash + Clone + Send + 'static,
        V: Send + 'static,
    {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        let (stop_tx, stop_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name(SWEEPER_THREAD_NAME.to_string())
            .spawn(move || run(runtime, shared, stop_rx))?;

        Ok(Self { stop_tx, thread })
    }

    /// Asks the worker to stop and blocks until it has exited.
    pub(crate) fn stop(self) {
        let _ = self.stop_tx.send(());

        // The last cache handle can be dropped on the worker thread when an
        // expiration callback owning it is released there. Joining would
        // wait on itself.
        if thread::current().id() == self.thread.thread().id() {
            return;
        }
        if self.thread.join().is_err() {
            warn!("Sweep worker panicked");
        }
    }
}

fn run<K, V>(runtime: Runtime, shared: Arc<Shared<K, V>>, stop_rx: oneshot::Receiver<()>)
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    runtime.block_on(sweep_loop(shared, stop_rx));
    // Expiration callbacks still running are left to finish on their own.
    runtime.shutdown_background();
}

/// The main sweeper loop.
async fn sweep_loop<K, V>(shared: Arc<Shared<K, V>>, mut stop_rx: oneshot::Receiver<()>)
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    info!("Sweep worker started");

    loop {
        let sleep_for = shared.state.lock().schedule_next_wake();
        trace!(sleep_us = sleep_for.as_micros() as u64, "Sweeper sleeping");

        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                info!("Sweep worker stopped");
                return;
            }
            _ = shared.wake.notified() => {
                trace!("Sweeper woken early, retargeting");
            }
            _ = tokio::time::sleep(sleep_for) => {
                let (callback, evicted) = {
                    let mut state = shared.state.lock();
                    let evicted = state.evict_due();
                    (state.expiration_callback(), evicted)
                };
                if let Some(callback) = callback {
                    dispatch_expirations(callback, evicted);
                }
            }
        }
    }
}

/// Fires the expiration callback for each evicted entry without waiting.
///
/// A panicking callback is logged and otherwise ignored.
fn dispatch_expirations<K, V>(callback: ExpirationCallback<K, V>, evicted: Vec<(K, V)>)
where
    K: Send + 'static,
    V: Send + 'static,
{
    for (key, value) in evicted {
        let callback = Arc::clone(&callback);
        let handle = tokio::task::spawn_blocking(move || callback(key, value));
        tokio::spawn(async move {
            if let Err(err) = handle.await {
                warn!(error = %err, "Expiration callback failed");
            }
        });
    }
}
