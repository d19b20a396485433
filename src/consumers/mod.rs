//! Status consumers
//!
//! - [`overlay`]: runs on the UI thread, fed by the polling adapter
//! - [`tray`]: runs on the async runtime, fed by the bridge

pub mod overlay;
pub mod tray;

pub use overlay::{OverlayModel, TerminalOverlay, Visibility};
pub use tray::{DesktopNotifier, Notifier, TrayModel, TrayService, TrayStatus};
