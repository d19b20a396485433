//! voxtype-relay - status relay for the voxtype tray and overlay
//!
//! Run with `voxtype-relay` to start the relay, or to raise the one that is
//! already running. Use `voxtype-relay send <action>` to control it.

use clap::Parser;
use tracing_subscriber::EnvFilter;
use voxtype_relay::cli::{Cli, Commands, RemoteAction};
use voxtype_relay::config::{self, Config};
use voxtype_relay::control::{DaemonControl, RecordCommand};
use voxtype_relay::{InstanceCoordinator, Outcome, Relay, Request};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("voxtype_relay={},warn", log_level))),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let mut config = config::load_config(cli.config.as_deref())?;

    // Apply CLI overrides
    if let Some(binary) = cli.binary {
        config.daemon.binary = binary;
    }
    if cli.extended {
        config.daemon.extended = true;
    }
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => match Relay::new(config).run(Request::Raise)? {
            Outcome::Forwarded => {
                tracing::info!("voxtype-relay is already running; raised it");
            }
            Outcome::Shutdown(report) => {
                tracing::debug!(
                    "Relay ran {} status subprocess(es), bridged {} events",
                    report.launches,
                    report.bridged
                );
            }
        },

        Commands::Send { action } => {
            let request = match action {
                RemoteAction::Raise => Request::Raise,
                RemoteAction::Start => Request::Record(RecordCommand::Start),
                RemoteAction::Stop => Request::Record(RecordCommand::Stop),
                RemoteAction::Cancel => Request::Record(RecordCommand::Cancel),
                RemoteAction::Toggle => Request::Record(RecordCommand::Toggle),
                RemoteAction::RestartDaemon => Request::RestartDaemon,
                RemoteAction::Quit => Request::Quit,
            };
            InstanceCoordinator::from_config(&config).send(request)?;
        }

        Commands::Status => {
            let program = voxtype_relay::app::resolve_binary(&config.daemon.binary)?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let event = runtime
                .block_on(DaemonControl::new(program).query_status(std::time::Duration::from_secs(5)))
                .ok_or_else(|| anyhow::anyhow!("Could not read daemon status"))?;
            println!("{}", serde_json::to_string(&event)?);
        }

        Commands::Config => {
            show_config(&config)?;
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> anyhow::Result<()> {
    println!("Current Configuration\n");
    println!("=====================\n");
    println!("{}", toml::to_string_pretty(config)?);

    println!("---");
    match Config::default_path() {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (no config directory)"),
    }
    println!("Runtime directory: {}", Config::runtime_dir().display());
    Ok(())
}
