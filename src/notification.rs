//! Desktop notifications for relay events
//!
//! Best-effort: a missing notifier is logged at debug level and ignored.
//! - Linux: notify-send, with the state's freedesktop icon
//! - macOS: terminal-notifier when installed, osascript otherwise

use std::process::Stdio;
use tokio::process::Command;

const APP_NAME: &str = "Voxtype Relay";

/// Send a desktop notification without blocking the async runtime
pub async fn send(title: &str, body: &str, icon: Option<&str>) {
    #[cfg(target_os = "linux")]
    {
        let result = Command::new("notify-send")
            .args(notify_send_args(title, body, icon, 2000))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        if let Err(e) = result {
            tracing::debug!("Failed to send notification: {}", e);
        }
    }

    #[cfg(target_os = "macos")]
    {
        let _ = icon;
        let delivered = Command::new("terminal-notifier")
            .args(terminal_notifier_args(title, body))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);

        if !delivered {
            let result = Command::new("osascript")
                .args(["-e", &applescript(title, body)])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if let Err(e) = result {
                tracing::debug!("Failed to send notification: {}", e);
            }
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        tracing::debug!("Notifications not supported on this platform");
        let _ = (title, body, icon);
    }
}

/// Fire a notification from a non-async context, e.g. startup failures.
///
/// Returns at once; the notifier process is reaped on a background thread.
pub fn send_sync(title: &str, body: &str) {
    #[cfg(target_os = "linux")]
    let mut cmd = {
        let mut cmd = std::process::Command::new("notify-send");
        cmd.args(notify_send_args(title, body, None, 5000));
        cmd
    };

    #[cfg(target_os = "macos")]
    let mut cmd = {
        let mut cmd = std::process::Command::new("osascript");
        cmd.args(["-e", &applescript(title, body)]);
        cmd
    };

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    if let Err(e) = spawn_reaped(&mut cmd) {
        tracing::debug!("Failed to send notification: {}", e);
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = (title, body);
    }
}

/// Spawn with null stdio and wait for the child on its own thread
#[cfg_attr(not(any(target_os = "linux", target_os = "macos")), allow(dead_code))]
fn spawn_reaped(
    cmd: &mut std::process::Command,
) -> std::io::Result<std::thread::JoinHandle<Option<std::process::ExitStatus>>> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    std::thread::Builder::new()
        .name("notify-reaper".into())
        .spawn(move || child.wait().ok())
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn notify_send_args(title: &str, body: &str, icon: Option<&str>, expire_ms: u32) -> Vec<String> {
    let mut args = vec![
        format!("--app-name={}", APP_NAME),
        format!("--expire-time={}", expire_ms),
    ];
    if let Some(icon) = icon {
        args.push(format!("--icon={}", icon));
    }
    args.push(title.to_string());
    args.push(body.to_string());
    args
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn applescript(title: &str, body: &str) -> String {
    format!(
        r#"display notification "{}" with title "{}""#,
        body.replace('"', "\\\""),
        title.replace('"', "\\\"")
    )
}

#[cfg(target_os = "macos")]
fn terminal_notifier_args(title: &str, body: &str) -> Vec<String> {
    let mut args = vec![
        "-title".to_string(),
        title.to_string(),
        "-message".to_string(),
        body.to_string(),
        "-group".to_string(),
        "voxtype-relay".to_string(),
    ];
    if let Some(icon) = find_notification_icon() {
        args.push("-appIcon".to_string());
        args.push(icon);
    }
    args
}

/// Voxtype icon as a file:// URL, if one is installed
#[cfg(target_os = "macos")]
fn find_notification_icon() -> Option<String> {
    let candidates = [
        dirs::data_dir().map(|d| d.join("voxtype/icon.png")),
        dirs::config_dir().map(|d| d.join("voxtype/icon.png")),
        Some(std::path::PathBuf::from("/opt/homebrew/share/voxtype/icon.png")),
        Some(std::path::PathBuf::from("/usr/local/share/voxtype/icon.png")),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|candidate| candidate.exists())
        .map(|path| format!("file://{}", path.to_string_lossy().replace(' ', "%20")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applescript_escapes_quotes() {
        let script = applescript(r#"Voxtype "relay""#, "Daemon stopped");
        assert_eq!(
            script,
            r#"display notification "Daemon stopped" with title "Voxtype \"relay\"""#
        );
    }

    #[test]
    fn test_notify_send_args_with_icon() {
        let args = notify_send_args("Voxtype", "Recording...", Some("media-record-symbolic"), 2000);
        assert_eq!(
            args,
            vec![
                "--app-name=Voxtype Relay",
                "--expire-time=2000",
                "--icon=media-record-symbolic",
                "Voxtype",
                "Recording...",
            ]
        );
    }

    #[test]
    fn test_notify_send_args_without_icon() {
        let args = notify_send_args("Voxtype", "Ready", None, 5000);
        assert_eq!(args.len(), 4);
        assert_eq!(args[2], "Voxtype");
    }

    #[test]
    fn test_spawn_reaped_waits_for_child() {
        let reaper = spawn_reaped(std::process::Command::new("/bin/sh").args(["-c", "exit 3"]))
            .unwrap();
        let status = reaper.join().unwrap().expect("child reaped");
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn test_spawn_reaped_missing_program() {
        let mut cmd = std::process::Command::new("/nonexistent/notify-send");
        assert!(spawn_reaped(&mut cmd).is_err());
    }
}

