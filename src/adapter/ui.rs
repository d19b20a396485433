//! Timer-driven polling for a cooperative UI loop
//!
//! The UI thread must never block. On every tick it drains whatever its bus
//! channel holds with `try_recv` and applies each event to its view on the
//! same thread. An empty channel is a no-op.

use crate::bus::{ConsumerReceiver, TryRecvError};
use crate::event::StateEvent;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Something that displays the relay state on the UI thread
pub trait StatusView {
    /// Apply one delivered event. Called in delivery order.
    fn apply(&mut self, event: &StateEvent);

    /// Called once per tick after pending events were applied
    fn tick(&mut self, _now: Instant) {}
}

/// Outcome of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Nothing new
    Idle,
    /// This many events were applied
    Updated(usize),
    /// The relay closed the channel; no further events will arrive
    Closed,
}

/// Non-blocking reader for one consumer channel
pub struct UiPoller {
    rx: ConsumerReceiver,
    interval: Duration,
    closed: bool,
}

impl UiPoller {
    pub fn new(rx: ConsumerReceiver, interval: Duration) -> Self {
        Self {
            rx,
            interval,
            closed: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Drain the channel into `view` without blocking, then tick it
    pub fn poll<V: StatusView + ?Sized>(&mut self, view: &mut V) -> Poll {
        let mut applied = 0;
        if !self.closed {
            loop {
                match self.rx.try_recv() {
                    Ok(event) => {
                        tracing::trace!("UI applying {} ({:?})", event.class, event.origin);
                        view.apply(&event);
                        applied += 1;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Closed) => {
                        tracing::debug!("UI status channel closed");
                        self.closed = true;
                        break;
                    }
                }
            }
        }

        view.tick(Instant::now());

        if applied > 0 {
            Poll::Updated(applied)
        } else if self.closed {
            Poll::Closed
        } else {
            Poll::Idle
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Fixed-interval tick driver standing in for a toolkit main loop.
///
/// Each tick runs the caller's closure; the loop ends when the closure
/// breaks or when the quit flag is raised from another thread.
pub struct UiLoop {
    interval: Duration,
    quit: Arc<AtomicBool>,
}

impl UiLoop {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            quit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the loop at its next tick
    pub fn quit_handle(&self) -> Arc<AtomicBool> {
        self.quit.clone()
    }

    /// Run until the closure breaks or quit is requested; returns the break value
    pub fn run<B, F>(&self, mut on_tick: F) -> Option<B>
    where
        F: FnMut() -> ControlFlow<B>,
    {
        let mut next = Instant::now();
        loop {
            if self.quit.load(Ordering::SeqCst) {
                return None;
            }
            if let ControlFlow::Break(value) = on_tick() {
                return Some(value);
            }

            // Schedule by deadline so slow ticks do not drift the cadence
            next += self.interval;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else {
                next = now;
            }
        }
    }
}
