//! End-to-end relay tests with a scripted status subprocess
//!
//! `/bin/sh -c` stands in for `voxtype status --follow --format json`:
//! each script prints Waybar records and then either exits (a crash) or
//! `exec`s into `sleep` so the stream stays open without more output.

use async_trait::async_trait;
use std::ops::ControlFlow;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};
use voxtype_relay::adapter::{AsyncBridge, StatusView, UiLoop, UiPoller};
use voxtype_relay::consumers::tray::Notifier;
use voxtype_relay::event::EventOrigin;
use voxtype_relay::{
    Acquisition, Config, FanoutBus, InstanceCoordinator, Outcome, Relay, Request, StateClass,
    StateEvent, Supervisor, SupervisorSettings,
};

const WAIT: Duration = Duration::from_secs(5);

fn sh(script: &str, restart_delay: Duration) -> SupervisorSettings {
    SupervisorSettings {
        program: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), script.to_string()],
        restart_delay,
    }
}

/// Script printing one record per class, then holding the stream open
fn stream_then_hold(classes: &[&str]) -> String {
    let records: Vec<String> = classes
        .iter()
        .map(|c| format!("'{{\"class\":\"{}\"}}'", c))
        .collect();
    format!("printf '%s\\n' {}; exec sleep 30", records.join(" "))
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.ui.overlay = false;
    config.update.check_enabled = false;
    config.instance.probe_timeout_ms = 300;
    config
}

fn coordinator(dir: &std::path::Path) -> InstanceCoordinator {
    InstanceCoordinator::new("test.Relay", dir, Duration::from_millis(300))
}

struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _title: &str, _body: &str, _icon: Option<&str>) {}
}

#[derive(Default)]
struct Recorder {
    seen: Vec<StateClass>,
}

impl StatusView for Recorder {
    fn apply(&mut self, event: &StateEvent) {
        self.seen.push(event.class);
    }
}

/// Never delivers `recording` after an `idle` it already delivered, and ends in idle
fn assert_consistent_suffix(seen: &[StateClass]) {
    assert_eq!(seen.last(), Some(&StateClass::Idle), "sequence: {:?}", seen);
    if let Some(first_idle) = seen.iter().position(|c| *c == StateClass::Idle) {
        let after = &seen[first_idle..];
        let last_recording = after.iter().rposition(|c| *c == StateClass::Recording);
        let last_idle = after.iter().rposition(|c| *c == StateClass::Idle);
        assert!(last_recording < last_idle, "sequence: {:?}", seen);
    }
}

#[test]
fn both_adapters_observe_the_stream_in_order() {
    let expected = vec![
        StateClass::Idle,
        StateClass::Recording,
        StateClass::Transcribing,
        StateClass::Idle,
    ];

    let mut bus = FanoutBus::new();
    let overlay_rx = bus.register("overlay", 8).unwrap();
    let tray_rx = bus.register("tray", 8).unwrap();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let (bridge, mut tray_events) = AsyncBridge::spawn(tray_rx, runtime.handle(), 8);
    let tray_seen = runtime.spawn(async move {
        let mut seen = Vec::new();
        while let Some(event) = tray_events.recv().await {
            seen.push(event.class);
        }
        seen
    });

    let mut supervisor = Supervisor::new(
        sh(
            &stream_then_hold(&["idle", "recording", "transcribing", "idle"]),
            Duration::from_secs(2),
        ),
        bus,
    );
    let report = supervisor.start().unwrap();
    assert!(report.pid.is_some());
    assert!(report.spawn_error.is_none());

    // UI side: cooperative ticks, never blocking
    let mut poller = UiPoller::new(overlay_rx, Duration::from_millis(10));
    let mut overlay = Recorder::default();
    let deadline = Instant::now() + WAIT;
    UiLoop::new(poller.interval()).run(|| {
        poller.poll(&mut overlay);
        if overlay.seen.len() >= expected.len() || Instant::now() > deadline {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });

    supervisor.shutdown();
    let tray = runtime.block_on(async {
        tokio::time::timeout(WAIT, tray_seen).await.unwrap().unwrap()
    });
    let bridged = runtime.block_on(bridge.join());

    assert_eq!(overlay.seen, expected);
    assert_eq!(tray, expected);
    assert_eq!(bridged, 4);
    assert_consistent_suffix(&overlay.seen);
    assert_consistent_suffix(&tray);
}

#[test]
fn crash_publishes_stopped_before_replacement_events() {
    let mut bus = FanoutBus::new();
    let rx = bus.register("overlay", 8).unwrap();
    let restart_delay = Duration::from_millis(100);

    let mut supervisor = Supervisor::new(
        sh("printf '%s\\n' '{\"class\":\"recording\"}'; exit 1", restart_delay),
        bus,
    );
    supervisor.start().unwrap();

    let first = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(first.class, StateClass::Recording);

    // The stale "recording" must be replaced by "stopped" promptly
    let stopped = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(stopped.class, StateClass::Stopped);
    assert_eq!(stopped.origin, EventOrigin::Synthetic);

    let replacement = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(replacement.class, StateClass::Recording);
    assert_eq!(replacement.origin, EventOrigin::Stream);
    assert!(supervisor.launches() >= 2);

    supervisor.shutdown();
    assert_eq!(supervisor.child_pid(), None);
}

#[test]
fn stalled_consumer_does_not_delay_the_other() {
    let mut bus = FanoutBus::new();
    let stalled = bus.register("stalled", 2).unwrap();
    let live = bus.register("live", 2).unwrap();

    let classes = ["idle", "recording"].repeat(10);
    let mut supervisor = Supervisor::new(
        sh(&stream_then_hold(&classes), Duration::from_secs(2)),
        bus,
    );
    supervisor.start().unwrap();

    let mut last = None;
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        match live.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => last = Some(event.class),
            Err(_) if last.is_some() => break,
            Err(_) => {}
        }
    }
    assert_eq!(last, Some(StateClass::Recording));

    // The stalled channel kept only the newest events
    assert_eq!(stalled.len(), 2);
    assert!(stalled.evicted() >= 18);
    supervisor.shutdown();
}

#[test]
fn malformed_line_maps_to_stopped_and_stream_continues() {
    let mut bus = FanoutBus::new();
    let rx = bus.register("overlay", 8).unwrap();
    let mut supervisor = Supervisor::new(
        sh(
            "printf '%s\\n' not-json-at-all '{\"class\":\"idle\"}'; exec sleep 30",
            Duration::from_secs(2),
        ),
        bus,
    );
    supervisor.start().unwrap();

    let unknown = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(unknown.class, StateClass::Stopped);
    assert_eq!(unknown.origin, EventOrigin::Malformed);
    assert_eq!(rx.recv_timeout(WAIT).unwrap().class, StateClass::Idle);
    supervisor.shutdown();
}

#[test]
fn second_instance_forwards_and_keeps_one_subprocess() {
    let dir = tempfile::tempdir().unwrap();
    let coord = coordinator(dir.path());

    let Acquisition::Acquired(guard) = coord.acquire(Request::Raise).unwrap() else {
        panic!("first instance should acquire");
    };

    let relay = Relay::new(test_config()).with_coordinator(coord.clone());
    let settings = sh(
        &stream_then_hold(&["idle", "recording", "idle"]),
        Duration::from_secs(2),
    );
    let first = std::thread::spawn(move || relay.serve(guard, settings, NullNotifier));

    // Second launch goes through the normal run path and never starts a child
    let second = Relay::new(test_config())
        .with_coordinator(coord.clone())
        .run(Request::Raise)
        .unwrap();
    assert!(matches!(second, Outcome::Forwarded));

    std::thread::sleep(Duration::from_millis(500));
    coord.send(Request::Quit).unwrap();

    let report = first.join().unwrap().unwrap();
    assert_eq!(report.launches, 1);
    assert_eq!(report.overlay_class, StateClass::Idle);
    let tray = report.tray.expect("tray model");
    assert_eq!(tray.class(), StateClass::Stopped);
    assert!(!coord.socket_path().exists());
}

#[test]
fn busy_live_holder_still_forwards_later_launches() {
    let dir = tempfile::tempdir().unwrap();
    let coord = InstanceCoordinator::new("test.Relay", dir.path(), Duration::from_millis(500));

    let Acquisition::Acquired(guard) = coord.acquire(Request::Raise).unwrap() else {
        panic!("first instance should acquire");
    };

    // Several clients connect and then go quiet
    let _idle: Vec<UnixStream> = (0..3)
        .map(|_| UnixStream::connect(coord.socket_path()).unwrap())
        .collect();
    std::thread::sleep(Duration::from_millis(50));

    let second = coord.acquire(Request::Raise).unwrap();
    assert!(matches!(second, Acquisition::Forwarded));
    assert_eq!(
        guard.requests().recv_timeout(WAIT).unwrap(),
        Request::Raise
    );
    assert!(coord.is_running());
    drop(guard);
    assert!(!coord.socket_path().exists());
}

#[test]
fn unresponsive_holder_is_reclaimed_and_relay_produces_events() {
    let dir = tempfile::tempdir().unwrap();
    let coord = coordinator(dir.path());

    // A hung holder: bound, but never answers
    let _hung = UnixListener::bind(coord.socket_path()).unwrap();

    let started = Instant::now();
    let Acquisition::Acquired(guard) = coord.acquire(Request::Raise).unwrap() else {
        panic!("unresponsive holder should be reclaimed");
    };
    assert!(started.elapsed() >= Duration::from_millis(300));

    let mut bus = FanoutBus::new();
    let rx = bus.register("overlay", 8).unwrap();
    let mut supervisor = Supervisor::new(
        sh(&stream_then_hold(&["idle"]), Duration::from_secs(2)),
        bus,
    );
    supervisor.start().unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap().class, StateClass::Idle);

    supervisor.shutdown();
    drop(guard);
}

#[test]
fn concurrent_launches_have_exactly_one_winner() {
    const LAUNCHES: usize = 4;
    let dir = tempfile::tempdir().unwrap();
    let barrier = Arc::new(Barrier::new(LAUNCHES));

    let handles: Vec<_> = (0..LAUNCHES)
        .map(|_| {
            let coord = coordinator(dir.path());
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                coord.acquire(Request::Raise).unwrap()
            })
        })
        .collect();

    let results: Vec<Acquisition> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results
        .into_iter()
        .filter_map(|r| match r {
            Acquisition::Acquired(guard) => Some(guard),
            Acquisition::Forwarded => None,
        })
        .collect();

    assert_eq!(winners.len(), 1);
    let guard = &winners[0];
    for _ in 0..LAUNCHES - 1 {
        assert_eq!(
            guard.requests().recv_timeout(Duration::from_secs(1)).unwrap(),
            Request::Raise
        );
    }
}
