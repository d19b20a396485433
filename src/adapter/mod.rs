//! Consumer adapters
//!
//! Two ways for a consumer to read its bus channel without ever blocking
//! the relay:
//! - [`ui`]: a timer-driven poller for single-threaded UI loops
//! - [`bridge`]: a blocking-to-async bridge feeding a tokio channel

pub mod bridge;
pub mod ui;

pub use bridge::AsyncBridge;
pub use ui::{Poll, StatusView, UiLoop, UiPoller};
