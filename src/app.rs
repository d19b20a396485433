//! Relay application wiring
//!
//! Owns startup order and teardown:
//! 1. become the sole instance (or forward the request and exit)
//! 2. resolve the daemon binary
//! 3. build the bus and register both consumers before anything publishes
//! 4. start the async side (bridge, tray, update checker, signal watcher)
//! 5. start the supervisor
//! 6. run the UI loop on the calling thread until quit
//!
//! Teardown runs in reverse: the supervisor kills the child and drops the
//! bus, which closes both consumer channels. The UI drains what is left,
//! the bridge sees the closure and ends, and the tray task ends in turn.

use crate::adapter::{AsyncBridge, Poll, UiLoop, UiPoller};
use crate::bus::FanoutBus;
use crate::config::Config;
use crate::consumers::overlay::TerminalOverlay;
use crate::consumers::tray::{DesktopNotifier, Notifier, TrayModel, TrayService};
use crate::control::DaemonControl;
use crate::error::{InstanceError, RelayError, Result, SupervisorError};
use crate::event::StateClass;
use crate::instance::{Acquisition, InstanceCoordinator, InstanceGuard, Request};
use crate::supervisor::{Supervisor, SupervisorSettings};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Upper bound for the async side to wind down
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// How a relay run ended
#[derive(Debug)]
pub enum Outcome {
    /// This process was the relay and shut down cleanly
    Shutdown(RelayReport),
    /// Another relay was running and accepted the request
    Forwarded,
}

/// What the consumers showed when the relay stopped
#[derive(Debug)]
pub struct RelayReport {
    pub overlay_class: StateClass,
    pub tray: Option<TrayModel>,
    pub launches: u64,
    pub bridged: u64,
}

/// The relay process
pub struct Relay {
    config: Config,
    coordinator: InstanceCoordinator,
}

impl Relay {
    pub fn new(config: Config) -> Self {
        let coordinator = InstanceCoordinator::from_config(&config);
        Self {
            config,
            coordinator,
        }
    }

    /// Use a specific coordinator (custom runtime directory)
    pub fn with_coordinator(mut self, coordinator: InstanceCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Become the relay, or hand `request` to the one already running
    pub fn run(self, request: Request) -> Result<Outcome> {
        let guard = match self.acquire(request)? {
            Acquisition::Acquired(guard) => guard,
            Acquisition::Forwarded => return Ok(Outcome::Forwarded),
        };

        let program = resolve_binary(&self.config.daemon.binary)?;
        tracing::info!("Using daemon binary {}", program.display());

        let settings = SupervisorSettings::from_config(&self.config, program);
        self.serve(guard, settings, DesktopNotifier).map(Outcome::Shutdown)
    }

    /// Acquire the registration, retrying while another launch holds the claim
    fn acquire(&self, request: Request) -> Result<Acquisition> {
        let mut reported = false;
        loop {
            match self.coordinator.acquire(request) {
                Err(e @ InstanceError::Contended(_)) => {
                    if !reported {
                        tracing::warn!("{} (retrying)", e);
                        // Runs before the UI loop exists; never call from a tick
                        crate::notification::send_sync("Voxtype relay", &e.to_string());
                        reported = true;
                    }
                    std::thread::sleep(self.config.relay.restart_delay());
                }
                other => return other.map_err(RelayError::from),
            }
        }
    }

    /// Run the relay as the registered instance until quit
    pub fn serve<N: Notifier + 'static>(
        &self,
        guard: InstanceGuard,
        settings: SupervisorSettings,
        notifier: N,
    ) -> Result<RelayReport> {
        let config = &self.config;
        let capacity = config.relay.channel_capacity;

        let mut bus = FanoutBus::new();
        let overlay_rx = bus.register("overlay", capacity)?;
        let tray_rx = bus.register("tray", capacity)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("relay-async")
            .enable_all()
            .build()?;

        let ui = UiLoop::new(config.ui.poll_interval());
        let quit = ui.quit_handle();

        // Async domain
        let (bridge, tray_events) = AsyncBridge::spawn(tray_rx, runtime.handle(), capacity);
        let (update_tx, update_rx) = mpsc::channel(1);
        let update_task = {
            let _enter = runtime.enter();
            crate::update::spawn_periodic(&config.update, update_tx)
        };
        let tray_task = runtime.spawn(
            TrayService::new(notifier, config.notification.clone()).run(tray_events, update_rx),
        );
        runtime.spawn(watch_signals(quit));

        // Blocking domain
        let control = DaemonControl::new(&settings.program);
        let mut supervisor = Supervisor::new(settings, bus);
        let started = supervisor.start()?;
        if let Some(e) = started.spawn_error {
            let body = e.to_string();
            runtime.spawn(async move {
                crate::notification::send("Voxtype relay", &body, None).await;
            });
        }

        // UI domain
        let mut overlay = TerminalOverlay::stderr(config.ui.overlay);
        let mut poller = UiPoller::new(overlay_rx, config.ui.poll_interval());
        tracing::info!("Relay running");

        // Each tick must stay non-blocking: control commands spawn detached
        ui.run(|| {
            while let Some(request) = guard.try_request() {
                match request {
                    Request::Quit => {
                        tracing::info!("Quit requested");
                        return ControlFlow::Break(());
                    }
                    Request::Raise => overlay.raise(),
                    Request::Record(cmd) => {
                        control.record(cmd);
                    }
                    Request::RestartDaemon => {
                        control.restart_daemon();
                    }
                    Request::Ping => {}
                }
            }

            match poller.poll(&mut overlay) {
                Poll::Closed => {
                    tracing::warn!("Status relay ended unexpectedly");
                    ControlFlow::Break(())
                }
                Poll::Idle | Poll::Updated(_) => ControlFlow::Continue(()),
            }
        });

        // Teardown
        let launches = supervisor.launches();
        supervisor.shutdown();
        poller.poll(&mut overlay);
        overlay.finish();

        let (tray, bridged) = runtime.block_on(async {
            let tray = match tokio::time::timeout(TEARDOWN_TIMEOUT, tray_task).await {
                Ok(Ok(model)) => Some(model),
                Ok(Err(e)) => {
                    tracing::error!("Tray task failed: {}", e);
                    None
                }
                Err(_) => {
                    tracing::warn!("Tray task did not stop in time");
                    None
                }
            };
            let bridged = tokio::time::timeout(TEARDOWN_TIMEOUT, bridge.join())
                .await
                .unwrap_or_default();
            (tray, bridged)
        });
        if let Some(task) = update_task {
            task.abort();
        }
        runtime.shutdown_timeout(Duration::from_secs(1));
        drop(guard);

        tracing::info!("Relay stopped");
        Ok(RelayReport {
            overlay_class: overlay.model().class(),
            tray,
            launches,
            bridged,
        })
    }
}

/// Find the daemon binary; a missing binary is a startup failure
pub fn resolve_binary(binary: &str) -> Result<PathBuf> {
    which::which(binary)
        .map_err(|_| SupervisorError::BinaryNotFound(binary.to_string()).into())
}

/// Raise the quit flag on SIGINT or SIGTERM
async fn watch_signals(quit: Arc<AtomicBool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT, shutting down..."),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to set up SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Received SIGINT, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received SIGINT, shutting down...");
    }

    quit.store(true, Ordering::SeqCst);
}
