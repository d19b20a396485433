//! Single-instance coordination
//!
//! The running relay is registered under a well-known Unix socket,
//! `<runtime_dir>/<name>.sock`. A new launch either:
//! - binds the socket and becomes the sole instance,
//! - finds a live holder, hands it its request (usually `raise`) and exits,
//! - or finds a holder that does not answer within the probe timeout,
//!   removes its socket and takes over.
//!
//! All bind and reclaim steps run while holding a pidlock claim file, so two
//! instances started at the same moment cannot both win.
//!
//! Protocol: one request line per connection, answered with `ok` or
//! `err <message>`.

use crate::config::Config;
use crate::control::RecordCommand;
use crate::error::InstanceError;
use crossbeam_channel::{Receiver, Sender};
use pidlock::Pidlock;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Registration attempts before giving up with `Contended`
const MAX_ATTEMPTS: u32 = 5;

/// Pause between claim file attempts
const CLAIM_RETRY: Duration = Duration::from_millis(20);

/// A refused connection may be a peer between bind and listen
const REFUSED_GRACE: Duration = Duration::from_millis(50);

/// Accept loop wake-up interval; also bounds how long a probe waits to be accepted
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Upper bound on how long the holder waits for a client to send its request
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(1);

const MAX_LINE: u64 = 1024;

/// A request delivered to the running instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Liveness probe, answered but never forwarded
    Ping,
    /// Bring the instance's UI to the front
    Raise,
    Record(RecordCommand),
    RestartDaemon,
    Quit,
}

impl FromStr for Request {
    type Err = InstanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let mut words = line.split_whitespace();
        let request = match (words.next(), words.next(), words.next()) {
            (Some("ping"), None, _) => Request::Ping,
            (Some("raise"), None, _) => Request::Raise,
            (Some("restart-daemon"), None, _) => Request::RestartDaemon,
            (Some("quit"), None, _) => Request::Quit,
            (Some("record"), Some(action), None) => RecordCommand::parse(action)
                .map(Request::Record)
                .ok_or_else(|| InstanceError::BadRequest(line.to_string()))?,
            _ => return Err(InstanceError::BadRequest(line.to_string())),
        };
        Ok(request)
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Ping => f.write_str("ping"),
            Request::Raise => f.write_str("raise"),
            Request::Record(cmd) => write!(f, "record {}", cmd),
            Request::RestartDaemon => f.write_str("restart-daemon"),
            Request::Quit => f.write_str("quit"),
        }
    }
}

/// Result of [`InstanceCoordinator::acquire`]
#[derive(Debug)]
pub enum Acquisition {
    /// This process is now the sole instance
    Acquired(InstanceGuard),
    /// A live instance accepted the request; this process should exit
    Forwarded,
}

enum Probe {
    Answered(String),
    Missing,
    Refused,
    Silent,
}

/// Acquires the instance registration or forwards to its holder
#[derive(Debug, Clone)]
pub struct InstanceCoordinator {
    name: String,
    dir: PathBuf,
    probe_timeout: Duration,
}

impl InstanceCoordinator {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, probe_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            probe_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.instance.name.clone(),
            Config::runtime_dir(),
            config.instance.probe_timeout(),
        )
    }

    pub fn socket_path(&self) -> PathBuf {
        self.dir.join(format!("{}.sock", self.name))
    }

    pub fn claim_path(&self) -> PathBuf {
        self.dir.join(format!("{}.claim", self.name))
    }

    /// Read timeout the holder applies to each client, below the probe timeout
    fn request_timeout(&self) -> Duration {
        (self.probe_timeout / 2).min(REQUEST_READ_TIMEOUT)
    }

    /// Become the sole instance, or deliver `request` to the live one
    pub fn acquire(&self, request: Request) -> Result<Acquisition, InstanceError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| unavailable(&self.dir, e))?;

        for attempt in 1..=MAX_ATTEMPTS {
            let Some(mut claim) = self.wait_for_claim() else {
                tracing::debug!(
                    "Instance claim busy (attempt {}/{})",
                    attempt,
                    MAX_ATTEMPTS
                );
                continue;
            };

            let outcome = self.register(request);
            if let Err(e) = claim.release() {
                tracing::debug!("Failed to release instance claim: {:?}", e);
            }

            if let Some(acquisition) = outcome? {
                return Ok(acquisition);
            }
        }

        Err(InstanceError::Contended(MAX_ATTEMPTS))
    }

    /// Deliver a request to the running instance without trying to become it
    pub fn send(&self, request: Request) -> Result<(), InstanceError> {
        match self.exchange(request) {
            Probe::Answered(reply) => interpret_reply(&reply),
            Probe::Missing | Probe::Refused | Probe::Silent => Err(InstanceError::NotRunning),
        }
    }

    /// True if a live instance answers a ping
    pub fn is_running(&self) -> bool {
        matches!(self.exchange(Request::Ping), Probe::Answered(_))
    }

    fn wait_for_claim(&self) -> Option<Pidlock> {
        let path = self.claim_path().to_string_lossy().to_string();
        // The holder may spend a full probe on a silent peer before releasing
        let deadline = Instant::now() + self.probe_timeout * 2 + REFUSED_GRACE;
        loop {
            let mut claim = Pidlock::new(&path);
            if claim.acquire().is_ok() {
                return Some(claim);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(CLAIM_RETRY);
        }
    }

    /// One registration attempt, run under the claim. `None` means retry.
    fn register(&self, request: Request) -> Result<Option<Acquisition>, InstanceError> {
        let path = self.socket_path();
        if let Some(listener) = bind(&path)? {
            return InstanceGuard::start(listener, path, self.request_timeout())
                .map(|g| Some(Acquisition::Acquired(g)));
        }

        match self.exchange(request) {
            Probe::Answered(reply) => {
                interpret_reply(&reply)?;
                tracing::info!("Forwarded '{}' to running instance", request);
                Ok(Some(Acquisition::Forwarded))
            }
            Probe::Missing => Ok(None),
            Probe::Refused => {
                std::thread::sleep(REFUSED_GRACE);
                match self.exchange(Request::Ping) {
                    Probe::Refused | Probe::Silent => self.reclaim(&path),
                    Probe::Answered(_) | Probe::Missing => Ok(None),
                }
            }
            Probe::Silent => {
                tracing::warn!(
                    "Instance at {} did not answer within {:?}, reclaiming",
                    path.display(),
                    self.probe_timeout
                );
                self.reclaim(&path)
            }
        }
    }

    fn reclaim(&self, path: &Path) -> Result<Option<Acquisition>, InstanceError> {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!("Removed stale instance socket {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(unavailable(path, e)),
        }

        match bind(path)? {
            Some(listener) => {
                tracing::info!("Reclaimed instance registration");
                InstanceGuard::start(listener, path.to_path_buf(), self.request_timeout())
                    .map(|g| Some(Acquisition::Acquired(g)))
            }
            None => Ok(None),
        }
    }

    fn exchange(&self, request: Request) -> Probe {
        let path = self.socket_path();
        let mut stream = match UnixStream::connect(&path) {
            Ok(stream) => stream,
            Err(e) if e.kind() == ErrorKind::NotFound => return Probe::Missing,
            Err(e) => {
                tracing::debug!("Instance socket refused connection: {}", e);
                return Probe::Refused;
            }
        };

        if stream.set_read_timeout(Some(self.probe_timeout)).is_err()
            || stream.set_write_timeout(Some(self.probe_timeout)).is_err()
        {
            return Probe::Silent;
        }
        if let Err(e) = writeln!(stream, "{}", request) {
            tracing::debug!("Failed to send instance request: {}", e);
            return Probe::Silent;
        }

        let mut reply = String::new();
        match BufReader::new(stream).take(MAX_LINE).read_line(&mut reply) {
            Ok(0) => Probe::Silent,
            Ok(_) => Probe::Answered(reply.trim().to_string()),
            Err(e) => {
                tracing::debug!("No reply from instance: {}", e);
                Probe::Silent
            }
        }
    }
}

/// Bind the socket, `None` if the address is taken
fn bind(path: &Path) -> Result<Option<UnixListener>, InstanceError> {
    match UnixListener::bind(path) {
        Ok(listener) => Ok(Some(listener)),
        Err(e) if e.kind() == ErrorKind::AddrInUse => Ok(None),
        Err(e) => Err(unavailable(path, e)),
    }
}

fn unavailable(path: &Path, e: std::io::Error) -> InstanceError {
    InstanceError::Unavailable {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn interpret_reply(reply: &str) -> Result<(), InstanceError> {
    match reply {
        "ok" => Ok(()),
        other => Err(InstanceError::Rejected(
            other.strip_prefix("err ").unwrap_or(other).to_string(),
        )),
    }
}

/// Registration held by the running instance.
///
/// Accepts requests on a background thread and hands them over through
/// [`InstanceGuard::requests`]. Dropping the guard stops the thread and
/// removes the socket if it is still the one this instance bound.
#[derive(Debug)]
pub struct InstanceGuard {
    path: PathBuf,
    inode: Option<u64>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    requests: Receiver<Request>,
}

impl InstanceGuard {
    fn start(
        listener: UnixListener,
        path: PathBuf,
        request_timeout: Duration,
    ) -> Result<Self, InstanceError> {
        listener
            .set_nonblocking(true)
            .map_err(|e| unavailable(&path, e))?;
        let inode = std::fs::metadata(&path).ok().map(|m| m.ino());

        let (tx, rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let thread = std::thread::Builder::new()
            .name("instance-accept".into())
            .spawn(move || accept_loop(listener, tx, thread_stop, request_timeout))
            .map_err(|e| unavailable(&path, e))?;

        tracing::info!("Registered instance at {}", path.display());
        Ok(Self {
            path,
            inode,
            stop,
            thread: Some(thread),
            requests: rx,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Requests from later launches, in arrival order
    pub fn requests(&self) -> &Receiver<Request> {
        &self.requests
    }

    /// Next pending request, without blocking
    pub fn try_request(&self) -> Option<Request> {
        self.requests.try_recv().ok()
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }

        // Another instance may have reclaimed the name; leave its socket alone
        let current = std::fs::metadata(&self.path).ok().map(|m| m.ino());
        if current.is_some() && current == self.inode {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::debug!("Failed to remove instance socket: {}", e);
            }
        }
        tracing::debug!("Released instance registration");
    }
}

fn accept_loop(
    listener: UnixListener,
    tx: Sender<Request>,
    stop: Arc<AtomicBool>,
    request_timeout: Duration,
) {
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            // A client that never sends must not hold up the next launch's probe
            Ok((stream, _)) => {
                let tx = tx.clone();
                let spawned = std::thread::Builder::new()
                    .name("instance-request".into())
                    .spawn(move || handle_connection(stream, &tx, request_timeout));
                if let Err(e) = spawned {
                    tracing::warn!("Failed to serve instance request: {}", e);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(e) => {
                tracing::warn!("Instance socket accept failed: {}", e);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn handle_connection(mut stream: UnixStream, tx: &Sender<Request>, timeout: Duration) {
    if stream.set_nonblocking(false).is_err()
        || stream.set_read_timeout(Some(timeout)).is_err()
        || stream.set_write_timeout(Some(timeout)).is_err()
    {
        return;
    }

    let mut line = String::new();
    let read = match stream.try_clone() {
        Ok(reader) => BufReader::new(reader).take(MAX_LINE).read_line(&mut line),
        Err(e) => Err(e),
    };

    let reply = match read {
        Ok(0) => return,
        Ok(_) => match line.parse::<Request>() {
            Ok(Request::Ping) => "ok".to_string(),
            Ok(request) => {
                tracing::debug!("Instance request: {}", request);
                match tx.send(request) {
                    Ok(()) => "ok".to_string(),
                    Err(_) => "err shutting down".to_string(),
                }
            }
            Err(e) => format!("err {}", e),
        },
        Err(e) => {
            tracing::debug!("Failed to read instance request: {}", e);
            return;
        }
    };

    let _ = writeln!(stream, "{}", reply);
}
