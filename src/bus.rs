//! Fan-out bus: one ordered status stream, N independent consumer channels
//!
//! # Design
//!
//! Every consumer gets its own bounded FIFO. The bus holds only the sending
//! halves; each consumer holds only its receiving half. Publishing writes an
//! independent copy of the event into every channel. When a channel is full
//! its oldest queued event is dropped to make room (latest state wins), so a
//! stalled consumer never delays the others and never blocks the publisher.
//!
//! Each channel is single-writer/single-reader and synchronizes internally,
//! so the writer and the readers may live on different threads without any
//! external locking.

use crate::error::BusError;
use crate::event::StateEvent;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of pushing an event into one consumer channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued with room to spare
    Queued,
    /// Queued after evicting the oldest queued event
    Replaced,
    /// The consumer dropped its receiver
    Closed,
}

/// Error from a non-blocking receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    #[error("no event queued")]
    Empty,
    #[error("status bus closed")]
    Closed,
}

/// Error from a bounded-wait receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvTimeoutError {
    #[error("timed out waiting for an event")]
    Timeout,
    #[error("status bus closed")]
    Closed,
}

#[derive(Debug)]
struct Slots {
    events: VecDeque<StateEvent>,
    sender_alive: bool,
    receiver_alive: bool,
    evicted: u64,
}

#[derive(Debug)]
struct Shared {
    slots: Mutex<Slots>,
    ready: Condvar,
    capacity: usize,
}

/// Create a bounded drop-oldest channel for one consumer
pub fn consumer_channel(
    name: &str,
    capacity: usize,
) -> Result<(ConsumerSender, ConsumerReceiver), BusError> {
    if capacity == 0 {
        return Err(BusError::ZeroCapacity(name.to_string()));
    }

    let shared = Arc::new(Shared {
        slots: Mutex::new(Slots {
            events: VecDeque::with_capacity(capacity),
            sender_alive: true,
            receiver_alive: true,
            evicted: 0,
        }),
        ready: Condvar::new(),
        capacity,
    });

    Ok((
        ConsumerSender {
            shared: shared.clone(),
        },
        ConsumerReceiver { shared },
    ))
}

/// Sending half, owned by the bus
#[derive(Debug)]
pub struct ConsumerSender {
    shared: Arc<Shared>,
}

impl ConsumerSender {
    /// Enqueue without ever blocking, evicting the oldest event if full
    pub fn push(&self, event: StateEvent) -> Delivery {
        let mut slots = self.shared.slots.lock();
        if !slots.receiver_alive {
            return Delivery::Closed;
        }

        let delivery = if slots.events.len() >= self.shared.capacity {
            slots.events.pop_front();
            slots.evicted += 1;
            Delivery::Replaced
        } else {
            Delivery::Queued
        };

        slots.events.push_back(event);
        drop(slots);
        self.shared.ready.notify_one();
        delivery
    }

    /// Whether the receiving half still exists
    pub fn is_connected(&self) -> bool {
        self.shared.slots.lock().receiver_alive
    }
}

impl Drop for ConsumerSender {
    fn drop(&mut self) {
        self.shared.slots.lock().sender_alive = false;
        self.shared.ready.notify_all();
    }
}

/// Receiving half, owned by exactly one consumer
#[derive(Debug)]
pub struct ConsumerReceiver {
    shared: Arc<Shared>,
}

impl ConsumerReceiver {
    /// Take the next event if one is queued. Never blocks.
    ///
    /// Queued events are still delivered after the bus closes;
    /// `Closed` is returned only once the queue is drained.
    pub fn try_recv(&self) -> Result<StateEvent, TryRecvError> {
        let mut slots = self.shared.slots.lock();
        match slots.events.pop_front() {
            Some(event) => Ok(event),
            None if !slots.sender_alive => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Block until an event arrives. `None` once the bus is closed and drained.
    pub fn recv(&self) -> Option<StateEvent> {
        let mut slots = self.shared.slots.lock();
        loop {
            if let Some(event) = slots.events.pop_front() {
                return Some(event);
            }
            if !slots.sender_alive {
                return None;
            }
            self.shared.ready.wait(&mut slots);
        }
    }

    /// Block for at most `timeout` waiting for an event
    pub fn recv_timeout(&self, timeout: Duration) -> Result<StateEvent, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        let mut slots = self.shared.slots.lock();
        loop {
            if let Some(event) = slots.events.pop_front() {
                return Ok(event);
            }
            if !slots.sender_alive {
                return Err(RecvTimeoutError::Closed);
            }
            if self
                .shared
                .ready
                .wait_until(&mut slots, deadline)
                .timed_out()
            {
                return match slots.events.pop_front() {
                    Some(event) => Ok(event),
                    None if !slots.sender_alive => Err(RecvTimeoutError::Closed),
                    None => Err(RecvTimeoutError::Timeout),
                };
            }
        }
    }

    /// Number of events currently queued
    pub fn len(&self) -> usize {
        self.shared.slots.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Events dropped from this channel because it was full
    pub fn evicted(&self) -> u64 {
        self.shared.slots.lock().evicted
    }

    /// True once the bus has dropped its sending half
    pub fn is_closed(&self) -> bool {
        !self.shared.slots.lock().sender_alive
    }
}

impl Drop for ConsumerReceiver {
    fn drop(&mut self) {
        let mut slots = self.shared.slots.lock();
        slots.receiver_alive = false;
        slots.events.clear();
    }
}

/// One entry of the consumer registration table
#[derive(Debug)]
struct Registration {
    name: String,
    sender: ConsumerSender,
}

/// Duplicates each published event into every registered consumer channel.
///
/// Consumers register before the bus is handed to the supervisor; the
/// supervisor takes the bus by value, so the table cannot change afterwards.
#[derive(Debug, Default)]
pub struct FanoutBus {
    consumers: Vec<Registration>,
}

impl FanoutBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer and return the receiving half of its channel
    pub fn register(&mut self, name: &str, capacity: usize) -> Result<ConsumerReceiver, BusError> {
        if self.consumers.iter().any(|r| r.name == name) {
            return Err(BusError::DuplicateConsumer(name.to_string()));
        }

        let (sender, receiver) = consumer_channel(name, capacity)?;
        self.consumers.push(Registration {
            name: name.to_string(),
            sender,
        });
        tracing::debug!("Registered status consumer '{}' (capacity {})", name, capacity);
        Ok(receiver)
    }

    /// Write a copy of `event` into every channel.
    ///
    /// Returns how many consumers are still connected. Never blocks.
    pub fn publish(&self, event: &StateEvent) -> usize {
        let mut live = 0;
        for registration in &self.consumers {
            match registration.sender.push(event.clone()) {
                Delivery::Queued => live += 1,
                Delivery::Replaced => {
                    tracing::trace!(
                        "Consumer '{}' is behind, dropped its oldest event",
                        registration.name
                    );
                    live += 1;
                }
                Delivery::Closed => {}
            }
        }
        tracing::trace!("Published {} to {} consumer(s)", event.class, live);
        live
    }

    /// Names in registration order
    pub fn consumer_names(&self) -> Vec<&str> {
        self.consumers.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StateClass;

    fn event(class: StateClass) -> StateEvent {
        StateEvent::new(class)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            consumer_channel("overlay", 0),
            Err(BusError::ZeroCapacity(_))
        ));
    }

    #[test]
    fn test_duplicate_consumer_rejected() {
        let mut bus = FanoutBus::new();
        let _rx = bus.register("tray", 4).unwrap();
        assert!(matches!(
            bus.register("tray", 4),
            Err(BusError::DuplicateConsumer(_))
        ));
        assert_eq!(bus.consumer_names(), vec!["tray"]);
    }

    #[test]
    fn test_publish_reaches_every_consumer() {
        let mut bus = FanoutBus::new();
        let overlay = bus.register("overlay", 8).unwrap();
        let tray = bus.register("tray", 8).unwrap();

        assert_eq!(bus.publish(&event(StateClass::Recording)), 2);
        assert_eq!(overlay.try_recv().unwrap().class, StateClass::Recording);
        assert_eq!(tray.try_recv().unwrap().class, StateClass::Recording);
    }

    #[test]
    fn test_full_channel_drops_oldest() {
        let (tx, rx) = consumer_channel("overlay", 2).unwrap();
        assert_eq!(tx.push(event(StateClass::Idle)), Delivery::Queued);
        assert_eq!(tx.push(event(StateClass::Recording)), Delivery::Queued);
        assert_eq!(tx.push(event(StateClass::Transcribing)), Delivery::Replaced);

        assert_eq!(rx.len(), 2);
        assert_eq!(rx.evicted(), 1);
        assert_eq!(rx.try_recv().unwrap().class, StateClass::Recording);
        assert_eq!(rx.try_recv().unwrap().class, StateClass::Transcribing);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_stalled_consumer_does_not_delay_others() {
        let mut bus = FanoutBus::new();
        let stalled = bus.register("stalled", 2).unwrap();
        let healthy = bus.register("healthy", 2).unwrap();

        bus.publish(&event(StateClass::Idle));
        bus.publish(&event(StateClass::Recording));
        assert_eq!(healthy.try_recv().unwrap().class, StateClass::Idle);
        assert_eq!(healthy.try_recv().unwrap().class, StateClass::Recording);
        assert_eq!(stalled.len(), 2);

        // stalled is full; the next event still reaches healthy at once
        assert_eq!(bus.publish(&event(StateClass::Transcribing)), 2);
        assert_eq!(healthy.try_recv().unwrap().class, StateClass::Transcribing);
        assert_eq!(stalled.len(), 2);
        assert_eq!(stalled.evicted(), 1);
    }

    #[test]
    fn test_dropped_receiver_reported_closed() {
        let mut bus = FanoutBus::new();
        let overlay = bus.register("overlay", 4).unwrap();
        let tray = bus.register("tray", 4).unwrap();
        drop(tray);

        assert_eq!(bus.publish(&event(StateClass::Idle)), 1);
        drop(overlay);
        assert_eq!(bus.publish(&event(StateClass::Idle)), 0);
    }

    #[test]
    fn test_receiver_sees_close_after_drain() {
        let mut bus = FanoutBus::new();
        let rx = bus.register("overlay", 4).unwrap();
        bus.publish(&event(StateClass::Idle));
        drop(bus);

        assert!(rx.is_closed());
        assert_eq!(rx.try_recv().unwrap().class, StateClass::Idle);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
        assert!(rx.recv().is_none());
    }

    #[test]
    fn test_recv_timeout_expires() {
        let (_tx, rx) = consumer_channel("tray", 1).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(20)),
            Err(RecvTimeoutError::Timeout)
        );
    }

    #[test]
    fn test_blocking_recv_across_threads() {
        let mut bus = FanoutBus::new();
        let rx = bus.register("bridge", 8).unwrap();

        let reader = std::thread::spawn(move || {
            let mut seen = Vec::new();
            while let Some(event) = rx.recv() {
                seen.push(event.class);
            }
            seen
        });

        for class in [StateClass::Idle, StateClass::Recording, StateClass::Idle] {
            bus.publish(&event(class));
        }
        drop(bus);

        let seen = reader.join().unwrap();
        assert_eq!(
            seen,
            vec![StateClass::Idle, StateClass::Recording, StateClass::Idle]
        );
    }
}
