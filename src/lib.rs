//! Voxtype Relay: status fan-out for the voxtype tray and overlay
//!
//! This library provides the core functionality for:
//! - Supervising the daemon's `status --follow --format json` subprocess
//! - Decoding its line-delimited Waybar records into state events
//! - Fanning each event out to per-consumer bounded channels (drop-oldest)
//! - Feeding a polling UI loop and an async runtime from those channels
//! - Guaranteeing a single relay instance per user session
//!
//! # Architecture
//!
//! ```text
//!   voxtype status --follow --format json
//!                    │ stdout (one JSON record per line)
//!                    ▼
//!          ┌───────────────────┐
//!          │    Supervisor     │  blocking thread, restarts the child,
//!          │  + Line Decoder   │  publishes "stopped" when it exits
//!          └───────────────────┘
//!                    │ StateEvent
//!                    ▼
//!          ┌───────────────────┐
//!          │    Fan-out Bus    │  one bounded channel per consumer
//!          └───────────────────┘
//!                 │         │
//!                 ▼         ▼
//!      ┌──────────────┐  ┌──────────────┐
//!      │  UI Poller   │  │ Async Bridge │  spawn_blocking → tokio mpsc
//!      │ (try_recv on │  └──────────────┘
//!      │  each tick)  │         │
//!      └──────────────┘         ▼
//!             │          ┌──────────────┐
//!             ▼          │ Tray service │ ◀── update checker
//!      ┌──────────────┐  └──────────────┘
//!      │   Overlay    │
//!      └──────────────┘
//!
//!   Instance socket ($XDG_RUNTIME_DIR/voxtype/<name>.sock)
//!     later launches ──raise / record / quit──▶ running relay
//! ```

pub mod adapter;
pub mod app;
pub mod bus;
pub mod cli;
pub mod config;
pub mod consumers;
pub mod control;
pub mod decoder;
pub mod error;
pub mod event;
pub mod instance;
pub mod notification;
pub mod supervisor;
pub mod update;

pub use app::{Outcome, Relay, RelayReport};
pub use bus::{ConsumerReceiver, FanoutBus};
pub use cli::{Cli, Commands, RemoteAction};
pub use config::Config;
pub use decoder::LineDecoder;
pub use error::{RelayError, Result, Severity};
pub use event::{StateClass, StateEvent};
pub use instance::{Acquisition, InstanceCoordinator, Request};
pub use supervisor::{Supervisor, SupervisorSettings};
