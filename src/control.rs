//! Control commands issued through the daemon binary
//!
//! The relay never talks to the daemon directly: recording control and
//! one-shot status queries go through `voxtype record ...` and
//! `voxtype status`, and restarts go through the service manager.
//! Every command is best-effort. Failures are logged and never fatal.

use crate::decoder::LineDecoder;
use crate::event::StateEvent;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Recording actions understood by `voxtype record`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordCommand {
    Start,
    Stop,
    Cancel,
    Toggle,
}

impl RecordCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordCommand::Start => "start",
            RecordCommand::Stop => "stop",
            RecordCommand::Cancel => "cancel",
            RecordCommand::Toggle => "toggle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(RecordCommand::Start),
            "stop" => Some(RecordCommand::Stop),
            "cancel" => Some(RecordCommand::Cancel),
            "toggle" => Some(RecordCommand::Toggle),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issues control commands against one daemon binary
#[derive(Debug, Clone)]
pub struct DaemonControl {
    binary: PathBuf,
}

impl DaemonControl {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Arguments for a recording command
    pub fn record_args(cmd: RecordCommand) -> [&'static str; 2] {
        ["record", cmd.as_str()]
    }

    /// Fire a recording command without waiting for it
    pub fn record(&self, cmd: RecordCommand) -> bool {
        tracing::debug!("Sending record {} to daemon", cmd);
        spawn_detached(&self.binary, &Self::record_args(cmd))
    }

    /// Restart the daemon through the platform service manager
    pub fn restart_daemon(&self) -> bool {
        let (program, args) = restart_command();
        tracing::info!("Restarting daemon: {} {}", program, args.join(" "));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        spawn_detached(Path::new(program), &args)
    }

    /// One-shot status query, decoded like a status stream line
    pub async fn query_status(&self, timeout: Duration) -> Option<StateEvent> {
        let output = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(&self.binary)
                .args(["status", "--format", "json"])
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .output(),
        )
        .await;

        let output = match output {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!("Failed to query daemon status: {}", e);
                return None;
            }
            Err(_) => {
                tracing::warn!("Daemon status query timed out after {:?}", timeout);
                return None;
            }
        };

        parse_status_output(&output.stdout)
    }
}

/// First status record in a command's output
fn parse_status_output(stdout: &[u8]) -> Option<StateEvent> {
    stdout
        .split(|&b| b == b'\n')
        .find_map(LineDecoder::parse_line)
}

fn spawn_detached(program: &Path, args: &[&str]) -> bool {
    match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(mut child) => {
            // Reap in the background so no zombie is left behind
            std::thread::spawn(move || {
                let _ = child.wait();
            });
            true
        }
        Err(e) => {
            tracing::warn!("Failed to run {}: {}", program.display(), e);
            false
        }
    }
}

#[cfg(target_os = "macos")]
fn restart_command() -> (&'static str, Vec<String>) {
    let uid = nix::unistd::getuid();
    (
        "launchctl",
        vec![
            "kickstart".to_string(),
            "-k".to_string(),
            format!("gui/{}/io.voxtype.daemon", uid),
        ],
    )
}

#[cfg(not(target_os = "macos"))]
fn restart_command() -> (&'static str, Vec<String>) {
    (
        "systemctl",
        vec![
            "--user".to_string(),
            "restart".to_string(),
            "voxtype".to_string(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StateClass;

    #[test]
    fn test_record_command_parse() {
        for cmd in [
            RecordCommand::Start,
            RecordCommand::Stop,
            RecordCommand::Cancel,
            RecordCommand::Toggle,
        ] {
            assert_eq!(RecordCommand::parse(cmd.as_str()), Some(cmd));
        }
        assert_eq!(RecordCommand::parse("pause"), None);
        assert_eq!(DaemonControl::record_args(RecordCommand::Toggle), ["record", "toggle"]);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_restart_uses_systemd_user_unit() {
        let (program, args) = restart_command();
        assert_eq!(program, "systemctl");
        assert_eq!(args, vec!["--user", "restart", "voxtype"]);
    }

    #[test]
    fn test_missing_binary_is_not_fatal() {
        let control = DaemonControl::new("/nonexistent/voxtype");
        assert!(!control.record(RecordCommand::Toggle));
    }

    #[test]
    fn test_status_output_first_record_wins() {
        let out = b"\n{\"class\":\"recording\",\"tooltip\":\"Recording...\"}\n{\"class\":\"idle\"}\n";
        let event = parse_status_output(out).unwrap();
        assert_eq!(event.class, StateClass::Recording);
        assert!(parse_status_output(b"").is_none());
    }

    #[tokio::test]
    async fn test_query_status_missing_binary() {
        let control = DaemonControl::new("/nonexistent/voxtype");
        assert!(control.query_status(Duration::from_secs(1)).await.is_none());
    }
}
