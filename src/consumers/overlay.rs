//! Recording overlay driven from the UI loop
//!
//! [`OverlayModel`] holds what the floating overlay displays: the state
//! indicator (icon, label, elapsed time), a rolling waveform of audio
//! levels and the overlay visibility. It changes only when an event is
//! applied, plus the timed auto-hide of the error message.
//!
//! [`TerminalOverlay`] renders the model as a single status line on stderr.

use crate::adapter::StatusView;
use crate::event::{StateClass, StateEvent};
use std::collections::VecDeque;
use std::io::{IsTerminal, Write};
use std::time::{Duration, Instant};

/// Number of bars in the waveform
pub const WAVEFORM_BARS: usize = 24;

/// Shown when the daemon stops while a recording was in progress
pub const DAEMON_STOPPED_MESSAGE: &str = "Daemon not running — systemctl --user start voxtype";

/// How long the daemon-stopped message stays up
const ERROR_DISPLAY: Duration = Duration::from_secs(5);

const BAR_GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Overlay visibility
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    Hidden,
    Recording,
    Transcribing,
    Error(String),
}

/// State shown by the overlay and its indicator
#[derive(Debug)]
pub struct OverlayModel {
    class: StateClass,
    tooltip: String,
    visibility: Visibility,
    recording_start: Option<Instant>,
    error_since: Option<Instant>,
    levels: VecDeque<f32>,
    raise_pending: bool,
}

impl Default for OverlayModel {
    fn default() -> Self {
        Self {
            class: StateClass::default(),
            tooltip: StateClass::default().default_tooltip().to_string(),
            visibility: Visibility::Hidden,
            recording_start: None,
            error_since: None,
            levels: VecDeque::from(vec![0.0; WAVEFORM_BARS]),
            raise_pending: false,
        }
    }
}

impl OverlayModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Displayed state
    pub fn class(&self) -> StateClass {
        self.class
    }

    pub fn icon_name(&self) -> &'static str {
        self.class.icon_name()
    }

    pub fn label(&self) -> &'static str {
        self.class.label()
    }

    pub fn tooltip(&self) -> &str {
        &self.tooltip
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn levels(&self) -> impl Iterator<Item = f32> + '_ {
        self.levels.iter().copied()
    }

    /// Time since recording started, while recording
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        match self.visibility {
            Visibility::Recording => self
                .recording_start
                .map(|start| now.saturating_duration_since(start)),
            _ => None,
        }
    }

    /// Ask the renderer to present the overlay again
    pub fn raise(&mut self) {
        self.raise_pending = true;
    }

    fn take_raise(&mut self) -> bool {
        std::mem::take(&mut self.raise_pending)
    }

    fn is_active(&self) -> bool {
        matches!(
            self.visibility,
            Visibility::Recording | Visibility::Transcribing
        )
    }

    fn show_recording(&mut self, now: Instant) {
        self.visibility = Visibility::Recording;
        self.recording_start = Some(now);
        self.error_since = None;
        self.levels = VecDeque::from(vec![0.0; WAVEFORM_BARS]);
    }

    fn push_level(&mut self, level: f32) {
        self.levels.push_back(level);
        while self.levels.len() > WAVEFORM_BARS {
            self.levels.pop_front();
        }
    }

    fn hide(&mut self) {
        self.visibility = Visibility::Hidden;
        self.recording_start = None;
        self.error_since = None;
    }

    fn show_error(&mut self, message: &str, now: Instant) {
        self.visibility = Visibility::Error(message.to_string());
        self.recording_start = None;
        self.error_since = Some(now);
    }

    /// The line a text renderer shows for the current state
    pub fn render_line(&self, now: Instant) -> String {
        match &self.visibility {
            Visibility::Hidden => format!("[{}] {}", self.class, self.tooltip),
            Visibility::Recording => {
                let secs = self.elapsed(now).unwrap_or_default().as_secs();
                format!(
                    "[{}] {:02}:{:02} {}",
                    self.class,
                    secs / 60,
                    secs % 60,
                    self.waveform()
                )
            }
            Visibility::Transcribing => {
                format!("[{}] {} {}", self.class, self.label(), self.waveform())
            }
            Visibility::Error(message) => format!("[{}] {}", self.class, message),
        }
    }

    fn waveform(&self) -> String {
        self.levels
            .iter()
            .map(|&level| {
                let idx = (level.clamp(0.0, 1.0) * (BAR_GLYPHS.len() - 1) as f32).round() as usize;
                BAR_GLYPHS[idx.min(BAR_GLYPHS.len() - 1)]
            })
            .collect()
    }

    fn apply_at(&mut self, event: &StateEvent, now: Instant) {
        match event.class {
            StateClass::Recording => {
                if self.visibility != Visibility::Recording {
                    self.show_recording(now);
                }
                self.push_level(event.level.unwrap_or(0.0));
            }
            // Waveform stays frozen at its last levels
            StateClass::Transcribing => self.visibility = Visibility::Transcribing,
            StateClass::Idle => {
                if self.is_active() {
                    self.hide();
                }
            }
            StateClass::Stopped => {
                if self.is_active() {
                    self.show_error(DAEMON_STOPPED_MESSAGE, now);
                }
            }
        }

        self.class = event.class;
        self.tooltip = match &event.extended {
            Some(ext) => format!(
                "{}\nModel: {}\nDevice: {}\nBackend: {}",
                event.tooltip, ext.model, ext.device, ext.backend
            ),
            None => event.tooltip.clone(),
        };
    }
}

impl StatusView for OverlayModel {
    fn apply(&mut self, event: &StateEvent) {
        self.apply_at(event, Instant::now());
    }

    fn tick(&mut self, now: Instant) {
        if let Some(since) = self.error_since {
            if now.saturating_duration_since(since) >= ERROR_DISPLAY {
                self.hide();
            }
        }
    }
}

/// Renders an [`OverlayModel`] as one rewritten terminal line
pub struct TerminalOverlay<W: Write> {
    model: OverlayModel,
    out: Option<W>,
    last_line: Option<String>,
}

impl TerminalOverlay<std::io::Stderr> {
    /// Render to stderr, only when enabled and stderr is a terminal
    pub fn stderr(enabled: bool) -> Self {
        let stderr = std::io::stderr();
        let out = (enabled && stderr.is_terminal()).then_some(stderr);
        Self::new(out)
    }
}

impl<W: Write> TerminalOverlay<W> {
    pub fn new(out: Option<W>) -> Self {
        Self {
            model: OverlayModel::new(),
            out,
            last_line: None,
        }
    }

    pub fn model(&self) -> &OverlayModel {
        &self.model
    }

    pub fn raise(&mut self) {
        self.model.raise();
    }

    /// Leave the cursor on a fresh line
    pub fn finish(&mut self) {
        if let (Some(out), Some(_)) = (self.out.as_mut(), self.last_line.as_ref()) {
            let _ = writeln!(out);
            let _ = out.flush();
        }
        self.last_line = None;
    }

    fn render(&mut self, now: Instant) {
        let forced = self.model.take_raise();
        let Some(out) = self.out.as_mut() else {
            return;
        };

        let line = self.model.render_line(now);
        if !forced && self.last_line.as_deref() == Some(line.as_str()) {
            return;
        }

        let first_line = line.lines().next().unwrap_or_default();
        if write!(out, "\r\x1b[2K{}", first_line)
            .and_then(|_| out.flush())
            .is_err()
        {
            tracing::debug!("Overlay output closed, disabling terminal overlay");
            self.out = None;
            return;
        }
        self.last_line = Some(line);
    }
}

impl<W: Write> StatusView for TerminalOverlay<W> {
    fn apply(&mut self, event: &StateEvent) {
        self.model.apply(event);
    }

    fn tick(&mut self, now: Instant) {
        self.model.tick(now);
        self.render(now);
    }
}
