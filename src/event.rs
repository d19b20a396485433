//! Status events flowing through the relay
//!
//! The daemon's `status --follow --format json` command prints one Waybar
//! record per line. Each record is decoded into a [`StateEvent`], whose
//! [`StateClass`] is always one of the four canonical states. Unrecognized
//! or malformed records are normalized to `Stopped` by the decoder.

use serde::{Deserialize, Serialize};

/// Canonical daemon state as displayed by every consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateClass {
    Idle,
    Recording,
    Transcribing,
    /// Daemon not running, or state not known. Initial displayed state.
    #[default]
    Stopped,
}

impl StateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateClass::Idle => "idle",
            StateClass::Recording => "recording",
            StateClass::Transcribing => "transcribing",
            StateClass::Stopped => "stopped",
        }
    }

    /// Freedesktop icon name for the state
    pub fn icon_name(&self) -> &'static str {
        match self {
            StateClass::Idle => "audio-input-microphone-symbolic",
            StateClass::Recording => "media-record-symbolic",
            StateClass::Transcribing => "view-refresh-symbolic",
            StateClass::Stopped => "microphone-sensitivity-muted-symbolic",
        }
    }

    /// Short label for menus and the overlay indicator
    pub fn label(&self) -> &'static str {
        match self {
            StateClass::Idle => "Ready",
            StateClass::Recording => "Recording...",
            StateClass::Transcribing => "Transcribing...",
            StateClass::Stopped => "Daemon not running",
        }
    }

    /// Default tooltip used when the record carries none
    pub fn default_tooltip(&self) -> &'static str {
        match self {
            StateClass::Idle => "Voxtype ready - hold hotkey to record",
            StateClass::Recording => "Recording...",
            StateClass::Transcribing => "Transcribing...",
            StateClass::Stopped => "Voxtype not running",
        }
    }

    /// Recording or transcribing
    pub fn is_active(&self) -> bool {
        matches!(self, StateClass::Recording | StateClass::Transcribing)
    }
}

impl std::fmt::Display for StateClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State tag as it appears on the wire, before normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateTag {
    Idle,
    Recording,
    Transcribing,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl StateTag {
    /// Map the wire tag onto a canonical class. `Unknown` becomes `Stopped`.
    pub fn canonical(self) -> StateClass {
        match self {
            StateTag::Idle => StateClass::Idle,
            StateTag::Recording => StateClass::Recording,
            StateTag::Transcribing => StateClass::Transcribing,
            StateTag::Stopped | StateTag::Unknown => StateClass::Stopped,
        }
    }
}

/// One Waybar JSON record from the status stream.
///
/// Only `class` is required. Unknown fields are ignored so newer daemons
/// can add fields without breaking the relay.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRecord {
    pub class: StateTag,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tooltip: String,
    /// Audio RMS level (0.0–1.0), only present while recording
    #[serde(default)]
    pub level: Option<f32>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
}

/// Extended attributes, present only when the stream runs with `--extended`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtendedInfo {
    pub model: String,
    pub device: String,
    pub backend: String,
}

/// Where an event came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    /// A well-formed record with a known class
    Stream,
    /// A well-formed record whose class was not recognized
    Unrecognized,
    /// A line that could not be parsed as a record
    Malformed,
    /// Produced by the supervisor when the stream ended or could not start
    Synthetic,
}

/// A decoded, normalized state event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateEvent {
    pub class: StateClass,
    /// Display text from the record (icon glyph in the daemon's theme)
    pub text: String,
    pub tooltip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended: Option<ExtendedInfo>,
    pub origin: EventOrigin,
}

impl StateEvent {
    /// Build an event for a class with its default texts
    pub fn new(class: StateClass) -> Self {
        Self {
            class,
            text: String::new(),
            tooltip: class.default_tooltip().to_string(),
            level: None,
            extended: None,
            origin: EventOrigin::Stream,
        }
    }

    /// Synthetic `Stopped` pushed when the status stream is lost
    pub fn stopped() -> Self {
        Self {
            origin: EventOrigin::Synthetic,
            ..Self::new(StateClass::Stopped)
        }
    }

    /// `Unknown` mapped event: displayed as `Stopped`
    pub fn unknown(origin: EventOrigin) -> Self {
        Self {
            tooltip: "Unknown state".to_string(),
            origin,
            ..Self::new(StateClass::Stopped)
        }
    }

    /// Normalize a wire record
    pub fn from_record(record: StatusRecord) -> Self {
        let class = record.class.canonical();
        let origin = if record.class == StateTag::Unknown {
            EventOrigin::Unrecognized
        } else {
            EventOrigin::Stream
        };

        let tooltip = if record.tooltip.is_empty() {
            if origin == EventOrigin::Unrecognized {
                "Unknown state".to_string()
            } else {
                class.default_tooltip().to_string()
            }
        } else {
            record.tooltip
        };

        let level = record
            .level
            .filter(|l| class == StateClass::Recording && (0.0..=1.0).contains(l));

        let extended = if record.model.is_some()
            || record.device.is_some()
            || record.backend.is_some()
        {
            let unknown = || "unknown".to_string();
            Some(ExtendedInfo {
                model: record.model.unwrap_or_else(unknown),
                device: record.device.unwrap_or_else(unknown),
                backend: record.backend.unwrap_or_else(unknown),
            })
        } else {
            None
        };

        Self {
            class,
            text: record.text,
            tooltip,
            level,
            extended,
            origin,
        }
    }

    /// True for events normalized from an unrecognized or malformed line
    pub fn is_unknown(&self) -> bool {
        matches!(
            self.origin,
            EventOrigin::Unrecognized | EventOrigin::Malformed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> StatusRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_default_class_is_stopped() {
        assert_eq!(StateClass::default(), StateClass::Stopped);
    }

    #[test]
    fn test_known_tags_map_to_same_class() {
        assert_eq!(StateTag::Idle.canonical(), StateClass::Idle);
        assert_eq!(StateTag::Recording.canonical(), StateClass::Recording);
        assert_eq!(StateTag::Transcribing.canonical(), StateClass::Transcribing);
        assert_eq!(StateTag::Stopped.canonical(), StateClass::Stopped);
    }

    #[test]
    fn test_unknown_tag_normalized_to_stopped() {
        let event = StateEvent::from_record(record(r#"{"class":"outputting"}"#));
        assert_eq!(event.class, StateClass::Stopped);
        assert_eq!(event.origin, EventOrigin::Unrecognized);
        assert_eq!(event.tooltip, "Unknown state");
        assert!(event.is_unknown());
    }

    #[test]
    fn test_record_without_optional_fields() {
        let event = StateEvent::from_record(record(r#"{"class":"idle"}"#));
        assert_eq!(event.class, StateClass::Idle);
        assert_eq!(event.tooltip, "Voxtype ready - hold hotkey to record");
        assert!(event.extended.is_none());
        assert!(event.level.is_none());
        assert!(!event.is_unknown());
    }

    #[test]
    fn test_extended_fields_collected() {
        let event = StateEvent::from_record(record(
            r#"{"text":"🎤","alt":"recording","class":"recording","tooltip":"Recording...",
                "model":"large-v3","device":"pulse","backend":"GPU (Vulkan)"}"#,
        ));
        let ext = event.extended.expect("extended info");
        assert_eq!(ext.model, "large-v3");
        assert_eq!(ext.device, "pulse");
        assert_eq!(ext.backend, "GPU (Vulkan)");
        assert_eq!(event.text, "🎤");
    }

    #[test]
    fn test_partial_extended_fields_fill_unknown() {
        let event = StateEvent::from_record(record(r#"{"class":"idle","model":"base.en"}"#));
        let ext = event.extended.unwrap();
        assert_eq!(ext.model, "base.en");
        assert_eq!(ext.device, "unknown");
    }

    #[test]
    fn test_level_kept_only_while_recording() {
        let rec = StateEvent::from_record(record(r#"{"class":"recording","level":0.42}"#));
        let level = rec.level.expect("level while recording");
        assert!((level - 0.42).abs() < 0.001);

        let idle = StateEvent::from_record(record(r#"{"class":"idle","level":0.42}"#));
        assert_eq!(idle.level, None);

        let out_of_range = StateEvent::from_record(record(r#"{"class":"recording","level":1.5}"#));
        assert_eq!(out_of_range.level, None);
    }

    #[test]
    fn test_synthetic_stopped() {
        let event = StateEvent::stopped();
        assert_eq!(event.class, StateClass::Stopped);
        assert_eq!(event.origin, EventOrigin::Synthetic);
        assert!(!event.is_unknown());
    }

    #[test]
    fn test_active_states() {
        assert!(StateClass::Recording.is_active());
        assert!(StateClass::Transcribing.is_active());
        assert!(!StateClass::Idle.is_active());
        assert!(!StateClass::Stopped.is_active());
    }
}
