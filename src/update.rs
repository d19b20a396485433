//! Periodic update check against GitHub releases
//!
//! Runs on the async side: the HTTP request is blocking (ureq), so each
//! check is moved to the blocking pool. Network and parse failures are
//! silent apart from a debug log.

use crate::config::UpdateConfig;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// GitHub API URL for the latest release
const GITHUB_RELEASES_URL: &str =
    "https://api.github.com/repos/peteonrails/voxtype/releases/latest";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A newer release than the running one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    pub version: String,
    pub changelog_url: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    html_url: String,
}

/// True if `remote` is a strictly newer semantic version than `current`
pub fn is_newer(remote: &str, current: &str) -> bool {
    let parse = |v: &str| semver::Version::parse(v.trim().trim_start_matches('v'));
    match (parse(remote), parse(current)) {
        (Ok(remote), Ok(current)) => remote > current,
        _ => false,
    }
}

fn evaluate(release: Release, current: &str) -> Option<UpdateInfo> {
    let version = release.tag_name.trim_start_matches('v').to_string();
    is_newer(&version, current).then(|| UpdateInfo {
        version,
        changelog_url: release.html_url,
    })
}

/// Query GitHub once. Blocking.
pub fn check_latest_release(current: &str) -> Option<UpdateInfo> {
    let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
    let release: Release = match agent
        .get(GITHUB_RELEASES_URL)
        .set("User-Agent", concat!("voxtype-relay/", env!("CARGO_PKG_VERSION")))
        .call()
    {
        Ok(response) => match response.into_json() {
            Ok(release) => release,
            Err(e) => {
                tracing::debug!("Update check: unreadable release JSON: {}", e);
                return None;
            }
        },
        Err(e) => {
            tracing::debug!("Update check failed: {}", e);
            return None;
        }
    };

    evaluate(release, current)
}

/// Check once now, then every `interval_hours`, until the receiver is gone.
///
/// Returns `None` when checks are disabled.
pub fn spawn_periodic(config: &UpdateConfig, tx: mpsc::Sender<UpdateInfo>) -> Option<JoinHandle<()>> {
    if !config.check_enabled {
        tracing::debug!("Update check disabled");
        return None;
    }
    let interval = config.interval();

    Some(tokio::spawn(async move {
        let mut last_reported: Option<String> = None;
        loop {
            let found = tokio::task::spawn_blocking(|| {
                check_latest_release(env!("CARGO_PKG_VERSION"))
            })
            .await
            .ok()
            .flatten();

            if let Some(info) = found {
                if last_reported.as_deref() != Some(info.version.as_str()) {
                    tracing::info!("Voxtype {} is available", info.version);
                    last_reported = Some(info.version.clone());
                    if tx.send(info).await.is_err() {
                        break;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tx.closed() => break,
            }
        }
        tracing::debug!("Update checker stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_newer() {
        assert!(is_newer("0.7.0", "0.6.6"));
        assert!(is_newer("v0.6.7", "0.6.6"));
        assert!(!is_newer("0.6.6", "0.6.6"));
        assert!(!is_newer("0.5.9", "0.6.6"));
        assert!(!is_newer("0.7.0-rc1", "0.7.0"));
        assert!(!is_newer("garbage", "0.6.6"));
    }

    #[test]
    fn test_evaluate_release_json() {
        let release: Release = serde_json::from_str(
            r#"{"tag_name":"v1.0.0","html_url":"https://github.com/peteonrails/voxtype/releases/tag/v1.0.0","assets":[]}"#,
        )
        .unwrap();
        let info = evaluate(release, "0.6.6").unwrap();
        assert_eq!(info.version, "1.0.0");
        assert!(info.changelog_url.ends_with("v1.0.0"));

        let old: Release = serde_json::from_str(r#"{"tag_name":"v0.1.0"}"#).unwrap();
        assert!(evaluate(old, "0.6.6").is_none());
    }

    #[tokio::test]
    async fn test_disabled_checker_not_spawned() {
        let (tx, _rx) = mpsc::channel(1);
        let config = UpdateConfig {
            check_enabled: false,
            interval_hours: 24,
        };
        assert!(spawn_periodic(&config, tx).is_none());
    }
}
