use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "fin-report.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub settle_delay: Duration,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(120),
            settle_delay: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub server_url: String,
    pub request_timeout: Duration,
    pub progress: ProgressSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            request_timeout: Duration::from_secs(30),
            progress: ProgressSettings::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    server_url: Option<String>,
    request_timeout_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
    upload_timeout_secs: Option<u64>,
    settle_delay_ms: Option<u64>,
}

/// Defaults, then `fin-report.toml` in the working directory, then environment.
pub fn load_settings() -> anyhow::Result<ClientSettings> {
    load_settings_from(Path::new(DEFAULT_CONFIG_FILE))
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file_cfg: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        apply_file_settings(&mut settings, file_cfg);
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file_settings(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout = Duration::from_secs(v);
    }
    if let Some(v) = file_cfg
        .poll_interval_ms
        .and_then(|v| poll_interval("poll_interval_ms", v))
    {
        settings.progress.poll_interval = v;
    }
    if let Some(v) = file_cfg.upload_timeout_secs {
        settings.progress.timeout = Duration::from_secs(v);
    }
    if let Some(v) = file_cfg.settle_delay_ms {
        settings.progress.settle_delay = Duration::from_millis(v);
    }
}

pub(crate) fn apply_env_overrides<F>(settings: &mut ClientSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("FIN_REPORT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = parse_env_u64(&lookup, "APP__REQUEST_TIMEOUT_SECS") {
        settings.request_timeout = Duration::from_secs(v);
    }
    if let Some(v) = parse_env_u64(&lookup, "APP__POLL_INTERVAL_MS")
        .and_then(|v| poll_interval("APP__POLL_INTERVAL_MS", v))
    {
        settings.progress.poll_interval = v;
    }
    if let Some(v) = parse_env_u64(&lookup, "APP__UPLOAD_TIMEOUT_SECS") {
        settings.progress.timeout = Duration::from_secs(v);
    }
    if let Some(v) = parse_env_u64(&lookup, "APP__SETTLE_DELAY_MS") {
        settings.progress.settle_delay = Duration::from_millis(v);
    }
}

/// A zero period would spin the polling loop, so it keeps the previous value.
fn poll_interval(key: &str, millis: u64) -> Option<Duration> {
    if millis == 0 {
        warn!(key, "config: ignoring zero poll interval");
        return None;
    }
    Some(Duration::from_millis(millis))
}

fn parse_env_u64<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            warn!(key, value = %raw, "config: ignoring unparsable environment value: {err}");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
