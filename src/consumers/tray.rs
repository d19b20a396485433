//! Tray status service on the async runtime
//!
//! Awaits the bridged status channel and the update checker, keeps a
//! [`TrayModel`] (icon, title, tooltip, attention status) in sync and sends
//! desktop notifications on the transitions enabled in `[notification]`.

use crate::config::NotificationConfig;
use crate::event::{ExtendedInfo, StateClass, StateEvent};
use crate::update::UpdateInfo;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Tray item status as understood by StatusNotifierItem hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayStatus {
    Active,
    NeedsAttention,
}

/// What the tray icon currently shows
#[derive(Debug, Clone, Default)]
pub struct TrayModel {
    class: StateClass,
    tooltip: String,
    extended: Option<ExtendedInfo>,
    update: Option<UpdateInfo>,
}

impl TrayModel {
    pub fn new() -> Self {
        Self {
            tooltip: StateClass::default().default_tooltip().to_string(),
            ..Self::default()
        }
    }

    pub fn class(&self) -> StateClass {
        self.class
    }

    pub fn icon_name(&self) -> &'static str {
        self.class.icon_name()
    }

    pub fn title(&self) -> String {
        format!("Voxtype - {}", self.class.label())
    }

    pub fn status(&self) -> TrayStatus {
        if self.class == StateClass::Recording || self.update.is_some() {
            TrayStatus::NeedsAttention
        } else {
            TrayStatus::Active
        }
    }

    pub fn tooltip(&self) -> String {
        let mut description = self.tooltip.clone();
        if let Some(ext) = &self.extended {
            description.push_str(&format!(
                "\nModel: {}\nDevice: {}\nBackend: {}",
                ext.model, ext.device, ext.backend
            ));
        }
        if let Some(update) = &self.update {
            description.push_str(&format!("\nUpdate available: {}", update.version));
        }
        description
    }

    /// Label of the primary menu action
    pub fn record_label(&self) -> &'static str {
        match self.class {
            StateClass::Recording => "Stop recording",
            _ => "Start recording",
        }
    }

    pub fn update(&self) -> Option<&UpdateInfo> {
        self.update.as_ref()
    }

    pub fn apply(&mut self, event: &StateEvent) {
        self.class = event.class;
        self.tooltip = event.tooltip.clone();
        self.extended = event.extended.clone();
    }

    pub fn set_update(&mut self, update: UpdateInfo) {
        self.update = Some(update);
    }
}

/// Delivers desktop notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str, icon: Option<&str>);
}

/// Notifications through the platform notifier
pub struct DesktopNotifier;

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, title: &str, body: &str, icon: Option<&str>) {
        crate::notification::send(title, body, icon).await;
    }
}

/// Notification text for a transition, if one is enabled
fn transition_notice(
    config: &NotificationConfig,
    from: StateClass,
    to: StateClass,
) -> Option<(&'static str, &'static str)> {
    if from == to {
        return None;
    }
    match to {
        StateClass::Recording if config.on_recording_start => {
            Some(("Voxtype", "Recording started"))
        }
        StateClass::Stopped if config.on_daemon_stopped => Some((
            "Voxtype daemon stopped",
            "Run: systemctl --user start voxtype",
        )),
        _ if from == StateClass::Recording && config.on_recording_stop => {
            Some(("Voxtype", "Recording stopped"))
        }
        _ => None,
    }
}

/// Async tray consumer
pub struct TrayService<N: Notifier> {
    model: TrayModel,
    notifier: N,
    config: NotificationConfig,
}

impl<N: Notifier> TrayService<N> {
    pub fn new(notifier: N, config: NotificationConfig) -> Self {
        Self {
            model: TrayModel::new(),
            notifier,
            config,
        }
    }

    /// Run until the status channel closes; returns the final model
    pub async fn run(
        mut self,
        mut status_rx: mpsc::Receiver<StateEvent>,
        mut updates_rx: mpsc::Receiver<UpdateInfo>,
    ) -> TrayModel {
        let mut updates_open = true;
        loop {
            tokio::select! {
                biased;
                update = updates_rx.recv(), if updates_open => match update {
                    Some(update) => {
                        tracing::debug!("Tray showing update {}", update.version);
                        self.model.set_update(update);
                    }
                    None => updates_open = false,
                },
                event = status_rx.recv() => match event {
                    Some(event) => self.handle(&event).await,
                    None => break,
                },
            }
        }

        tracing::debug!("Tray status channel closed");
        self.model.apply(&StateEvent::stopped());
        self.model
    }

    async fn handle(&mut self, event: &StateEvent) {
        let previous = self.model.class();
        self.model.apply(event);
        if previous != event.class {
            tracing::debug!("Tray: {} -> {}", previous, event.class);
        }

        if let Some((title, body)) = transition_notice(&self.config, previous, event.class) {
            self.notifier
                .notify(title, body, Some(event.class.icon_name()))
                .await;
        }
    }
}
