// Command-line interface definitions for voxtype-relay
//
// This module is separate so it can be used by both the binary (main.rs)
// and build.rs for generating man pages.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "voxtype-relay")]
#[command(author, version, about = "Status relay for the voxtype tray and overlay")]
#[command(long_about = "
voxtype-relay follows the voxtype daemon's status stream and keeps the
tray icon and the recording overlay in sync with it.

Only one relay runs per user session. Launching it again brings the
running relay's overlay to the front and exits.

USAGE:
  voxtype-relay                  Start the relay (or raise the running one)
  voxtype-relay send toggle      Toggle recording through the running relay
  voxtype-relay status           Print the daemon's current status as JSON
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Override the voxtype binary (path or name on PATH)
    #[arg(long, value_name = "PATH")]
    pub binary: Option<String>,

    /// Request model, device and backend details in the status stream
    #[arg(long)]
    pub extended: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay (default if no command specified)
    Run,

    /// Send a request to the running relay
    Send {
        #[arg(value_enum)]
        action: RemoteAction,
    },

    /// Query the daemon's current status once and print it as JSON
    Status,

    /// Show the effective configuration
    Config,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RemoteAction {
    /// Bring the overlay to the front
    Raise,
    /// Start recording
    Start,
    /// Stop recording and transcribe
    Stop,
    /// Cancel recording without transcribing
    Cancel,
    /// Toggle recording state
    Toggle,
    /// Restart the voxtype daemon service
    RestartDaemon,
    /// Stop the running relay
    Quit,
}
