//! Status subprocess supervisor
//!
//! Owns the lifecycle of the single `voxtype status --follow --format json`
//! child. A dedicated blocking thread reads the child's stdout, decodes it and
//! publishes every event on the fan-out bus.
//!
//! When the stream ends (child exit or read failure) a synthetic `Stopped`
//! event is published first, so no consumer keeps showing a stale state, and
//! the child is relaunched after a fixed delay. This repeats until
//! [`Supervisor::shutdown`], which kills the child and suppresses restarts.
//! Dropping the bus on shutdown closes every consumer channel.

use crate::bus::FanoutBus;
use crate::config::Config;
use crate::decoder::LineDecoder;
use crate::error::SupervisorError;
use crate::event::StateEvent;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const READ_CHUNK: usize = 4096;

/// How to launch and restart the status child
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub restart_delay: Duration,
}

impl SupervisorSettings {
    /// Arguments for the daemon's status-streaming command
    pub fn status_args(extended: bool) -> Vec<String> {
        let mut args: Vec<String> = ["status", "--follow", "--format", "json"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if extended {
            args.push("--extended".to_string());
        }
        args
    }

    /// Settings for a resolved daemon binary
    pub fn from_config(config: &Config, program: PathBuf) -> Self {
        Self {
            program,
            args: Self::status_args(config.daemon.extended),
            restart_delay: config.relay.restart_delay(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        // Own process group, so teardown also reaches grandchildren holding the pipe
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        cmd
    }
}

/// Result of [`Supervisor::start`]
#[derive(Debug)]
pub struct StartReport {
    /// PID of the first child, if it launched
    pub pid: Option<u32>,
    /// First spawn failure. Reported here once; the supervisor keeps retrying.
    pub spawn_error: Option<SupervisorError>,
}

/// State shared between the supervisor handle and its thread
#[derive(Debug, Default)]
struct ChildSlot {
    child: Mutex<Option<Child>>,
    stopping: AtomicBool,
    launches: AtomicU64,
}

impl ChildSlot {
    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().map(|c| c.id())
    }

    /// Launch a child and track it. Refuses once shutdown has begun.
    fn launch(&self, settings: &SupervisorSettings) -> Result<(u32, ChildStdout), SupervisorError> {
        let mut slot = self.child.lock();
        if self.stopping() {
            return Err(SupervisorError::ShutDown);
        }
        if slot.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }

        let mut child = settings
            .command()
            .spawn()
            .map_err(|e| SupervisorError::Spawn {
                program: settings.program.display().to_string(),
                message: e.to_string(),
            })?;

        let Some(stdout) = child.stdout.take() else {
            terminate(&mut child);
            return Err(SupervisorError::NoStdout);
        };

        let pid = child.id();
        *slot = Some(child);
        self.launches.fetch_add(1, Ordering::SeqCst);
        tracing::info!("Status subprocess started (pid={})", pid);
        Ok((pid, stdout))
    }

    /// Kill and reap the tracked child, if any
    fn reap(&self) {
        if let Some(mut child) = self.child.lock().take() {
            terminate(&mut child);
        }
    }
}

/// Stop a child and its process group, then wait for it
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Ok(pid) = i32::try_from(child.id()) {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGTERM);
        }
    }

    let _ = child.kill();
    match child.wait() {
        Ok(status) => tracing::debug!("Status subprocess exited: {}", status),
        Err(e) => tracing::debug!("Failed to reap status subprocess: {}", e),
    }
}

/// Why reading the status stream stopped
#[derive(Debug)]
pub enum StreamEnd {
    /// The child closed its stdout
    Eof,
    /// Reading failed; handled exactly like an exit
    ReadError(std::io::Error),
    /// Every consumer dropped its receiver
    ConsumersGone,
}

/// Read `reader` to the end, publishing each decoded event in order
pub fn pump<R: Read>(mut reader: R, decoder: &mut LineDecoder, bus: &FanoutBus) -> StreamEnd {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return StreamEnd::Eof,
            Ok(n) => {
                for event in decoder.decode(&buf[..n]) {
                    if bus.publish(&event) == 0 {
                        return StreamEnd::ConsumersGone;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return StreamEnd::ReadError(e),
        }
    }
}

struct Worker {
    thread: JoinHandle<()>,
    // Dropping this wakes the thread out of its back-off sleep
    shutdown_tx: Sender<()>,
}

enum Phase {
    Ready(FanoutBus),
    Running(Worker),
    Finished,
}

/// Supervises exactly one status subprocess at a time
pub struct Supervisor {
    settings: SupervisorSettings,
    slot: Arc<ChildSlot>,
    phase: Phase,
}

impl Supervisor {
    /// The bus must be fully populated: it is moved into the supervisor
    pub fn new(settings: SupervisorSettings, bus: FanoutBus) -> Self {
        Self {
            settings,
            slot: Arc::new(ChildSlot::default()),
            phase: Phase::Ready(bus),
        }
    }

    /// Launch the first child and the supervising thread.
    ///
    /// Fails fast if this supervisor already tracks a live child. A spawn
    /// failure is not an error here: it is returned once in the report and
    /// then retried with the normal restart policy.
    pub fn start(&mut self) -> Result<StartReport, SupervisorError> {
        let bus = match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Ready(bus) => bus,
            Phase::Running(worker) => {
                self.phase = Phase::Running(worker);
                return Err(SupervisorError::AlreadyRunning);
            }
            Phase::Finished => return Err(SupervisorError::ShutDown),
        };

        let (first_stdout, report) = match self.slot.launch(&self.settings) {
            Ok((pid, stdout)) => (
                Some(stdout),
                StartReport {
                    pid: Some(pid),
                    spawn_error: None,
                },
            ),
            Err(e) => {
                tracing::warn!("Failed to start status subprocess: {} (will retry)", e);
                (
                    None,
                    StartReport {
                        pid: None,
                        spawn_error: Some(e),
                    },
                )
            }
        };

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        let settings = self.settings.clone();
        let slot = self.slot.clone();

        let thread = std::thread::Builder::new()
            .name("status-relay".into())
            .spawn(move || supervise(settings, slot, bus, first_stdout, shutdown_rx))
            .map_err(|e| {
                self.slot.stopping.store(true, Ordering::SeqCst);
                self.slot.reap();
                SupervisorError::Thread(e.to_string())
            })?;

        self.phase = Phase::Running(Worker {
            thread,
            shutdown_tx,
        });
        Ok(report)
    }

    /// Kill the child, stop restarting and close the bus. Idempotent.
    pub fn shutdown(&mut self) {
        self.slot.stopping.store(true, Ordering::SeqCst);
        match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Running(worker) => {
                drop(worker.shutdown_tx);
                self.slot.reap();
                if worker.thread.join().is_err() {
                    tracing::error!("Status relay thread panicked");
                }
                tracing::info!("Status relay stopped");
            }
            Phase::Ready(bus) => drop(bus),
            Phase::Finished => {}
        }
    }

    /// PID of the currently tracked child
    pub fn child_pid(&self) -> Option<u32> {
        self.slot.pid()
    }

    /// Number of children launched so far
    pub fn launches(&self) -> u64 {
        self.slot.launches.load(Ordering::SeqCst)
    }

    /// True while the supervising thread is alive
    pub fn is_running(&self) -> bool {
        matches!(&self.phase, Phase::Running(worker) if !worker.thread.is_finished())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn supervise(
    settings: SupervisorSettings,
    slot: Arc<ChildSlot>,
    bus: FanoutBus,
    mut stdout: Option<ChildStdout>,
    shutdown_rx: Receiver<()>,
) {
    let mut decoder = LineDecoder::new();
    let mut spawn_failure_reported = stdout.is_none();

    loop {
        if let Some(out) = stdout.take() {
            spawn_failure_reported = false;
            let end = pump(out, &mut decoder, &bus);
            decoder.finish();
            slot.reap();

            if slot.stopping() {
                break;
            }
            match end {
                StreamEnd::ConsumersGone => {
                    tracing::info!("All status consumers disconnected, stopping relay");
                    break;
                }
                StreamEnd::Eof => tracing::warn!(
                    "Status stream ended, restarting in {:?}",
                    settings.restart_delay
                ),
                StreamEnd::ReadError(e) => tracing::warn!(
                    "Status stream read failed ({}), restarting in {:?}",
                    e,
                    settings.restart_delay
                ),
            }
        }

        if slot.stopping() {
            break;
        }

        // Consumers must show "stopped" before any replacement child reports
        if bus.publish(&StateEvent::stopped()) == 0 {
            tracing::info!("All status consumers disconnected, stopping relay");
            break;
        }

        match shutdown_rx.recv_timeout(settings.restart_delay) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        match slot.launch(&settings) {
            Ok((_, out)) => stdout = Some(out),
            Err(SupervisorError::ShutDown) => break,
            Err(e) if spawn_failure_reported => {
                tracing::debug!("Status subprocess still failing to start: {}", e);
            }
            Err(e) => {
                tracing::warn!("Failed to restart status subprocess: {} (will retry)", e);
                spawn_failure_reported = true;
            }
        }
    }

    slot.reap();
}
