//! Blocking-to-async bridge
//!
//! Async workers never wait on the bus's synchronous channel. A dedicated
//! blocking task does the receive and forwards each event into a tokio mpsc
//! channel that async consumers simply await.
//!
//! The bridge ends when the bus closes (the async receiver then sees `None`)
//! or when the async side drops its receiver.

use crate::bus::{ConsumerReceiver, RecvTimeoutError};
use crate::event::StateEvent;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How often the bridge checks whether the async side went away
const CLOSED_CHECK_INTERVAL: Duration = Duration::from_millis(200);

/// Handle to a running bridge task
pub struct AsyncBridge {
    task: JoinHandle<u64>,
}

impl AsyncBridge {
    /// Start forwarding `rx` into a new async channel of `capacity` slots
    pub fn spawn(
        rx: ConsumerReceiver,
        runtime: &Handle,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<StateEvent>) {
        let (tx, async_rx) = mpsc::channel(capacity.max(1));
        let task = runtime.spawn_blocking(move || forward(rx, tx));
        (Self { task }, async_rx)
    }

    /// Wait for the bridge to end; returns the number of events forwarded
    pub async fn join(self) -> u64 {
        match self.task.await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!("Status bridge task failed: {}", e);
                0
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn forward(rx: ConsumerReceiver, tx: mpsc::Sender<StateEvent>) -> u64 {
    let mut forwarded = 0u64;
    loop {
        if tx.is_closed() {
            tracing::debug!("Async status receiver dropped, stopping bridge");
            break;
        }
        match rx.recv_timeout(CLOSED_CHECK_INTERVAL) {
            Ok(event) => {
                if tx.blocking_send(event).is_err() {
                    tracing::debug!("Async status receiver dropped, stopping bridge");
                    break;
                }
                forwarded += 1;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Closed) => {
                tracing::debug!("Status bus closed, stopping bridge");
                break;
            }
        }
    }
    forwarded
}
