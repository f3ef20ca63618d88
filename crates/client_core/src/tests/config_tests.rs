use super::*;

use std::{
    collections::HashMap,
    env,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

fn temp_config_path(tag: &str) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir = env::temp_dir().join(format!("fin_report_config_{tag}_{suffix}"));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir.join("fin-report.toml")
}

#[test]
fn defaults_match_progress_policy() {
    let settings = ClientSettings::default();
    assert_eq!(settings.server_url, "http://127.0.0.1:5000");
    assert_eq!(settings.progress.poll_interval, Duration::from_secs(3));
    assert_eq!(settings.progress.timeout, Duration::from_secs(120));
}

#[test]
fn missing_file_keeps_defaults() {
    let path = temp_config_path("missing");
    let settings = load_settings_from(&path.with_file_name("absent.toml")).expect("load");
    assert_eq!(settings.progress, ProgressSettings::default());
}

#[test]
fn file_values_override_defaults() {
    let path = temp_config_path("file");
    fs::write(
        &path,
        r#"server_url = "http://reports.internal:8080"
poll_interval_ms = 500
upload_timeout_secs = 30
settle_delay_ms = 0
"#,
    )
    .expect("write config");

    let mut settings = ClientSettings::default();
    let file_cfg: FileSettings =
        toml::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
    apply_file_settings(&mut settings, file_cfg);

    assert_eq!(settings.server_url, "http://reports.internal:8080");
    assert_eq!(settings.progress.poll_interval, Duration::from_millis(500));
    assert_eq!(settings.progress.timeout, Duration::from_secs(30));
    assert_eq!(settings.progress.settle_delay, Duration::ZERO);
    assert_eq!(settings.request_timeout, Duration::from_secs(30));

    fs::remove_dir_all(path.parent().expect("parent")).expect("cleanup");
}

#[test]
fn malformed_file_is_reported_with_path() {
    let path = temp_config_path("malformed");
    fs::write(&path, "poll_interval_ms = \"soon\"\n").expect("write config");

    let err = load_settings_from(&path).expect_err("malformed config must fail");
    assert!(err.to_string().contains("failed to parse config file"));

    fs::remove_dir_all(path.parent().expect("parent")).expect("cleanup");
}

#[test]
fn env_overrides_take_precedence_and_bad_values_are_ignored() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("FIN_REPORT_SERVER_URL", "http://first:5000"),
        ("APP__SERVER_URL", "http://second:5000"),
        ("APP__POLL_INTERVAL_MS", "250"),
        ("APP__UPLOAD_TIMEOUT_SECS", "two minutes"),
    ]);

    let mut settings = ClientSettings::default();
    apply_env_overrides(&mut settings, |key| env.get(key).map(|v| v.to_string()));

    assert_eq!(settings.server_url, "http://second:5000");
    assert_eq!(settings.progress.poll_interval, Duration::from_millis(250));
    assert_eq!(settings.progress.timeout, Duration::from_secs(120));
}

#[test]
fn zero_poll_interval_keeps_previous_value() {
    let file_cfg: FileSettings = toml::from_str("poll_interval_ms = 0\n").expect("parse");
    let mut settings = ClientSettings::default();
    apply_file_settings(&mut settings, file_cfg);
    assert_eq!(settings.progress.poll_interval, Duration::from_secs(3));

    let env: HashMap<&str, &str> = HashMap::from([("APP__POLL_INTERVAL_MS", "0")]);
    apply_env_overrides(&mut settings, |key| env.get(key).map(|v| v.to_string()));
    assert_eq!(settings.progress.poll_interval, Duration::from_secs(3));
}
