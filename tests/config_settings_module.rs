use eduflow::config::{load_settings, load_settings_from, ConfigError, Settings};
use eduflow::shared::EndpointId;
use eduflow::wizard::BackFromFirst;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn write_settings(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("config.yaml");
    fs::write(&path, body).expect("write settings");
    path
}

#[test]
fn full_settings_load_and_override_endpoints() {
    let dir = tempdir().expect("tempdir");
    let path = write_settings(
        &dir,
        r#"
backend:
  base_url: https://edu.example.test/
  timeout_seconds: 5
  token_env: EDU_TOKEN
  endpoints:
    transfer_options: /v2/transfer-options
wizard:
  back_from_first: close
  min_reason_length: 20
cache:
  refetch_on_focus: false
  max_entries: 16
log_path: /var/log/eduflow/wizard.log
"#,
    );

    let settings = load_settings(Some(&path)).expect("load settings");
    assert_eq!(settings.wizard.back_from_first, BackFromFirst::Close);
    assert_eq!(settings.wizard.min_reason_length, 20);
    assert!(!settings.cache.refetch_on_focus);

    let endpoints = settings.backend.resolved_endpoints();
    let options = EndpointId::parse("transfer_options").expect("endpoint");
    let submit = EndpointId::parse("transfer_submit").expect("endpoint");
    assert_eq!(endpoints.get(&options).map(String::as_str), Some("/v2/transfer-options"));
    assert_eq!(endpoints.get(&submit).map(String::as_str), Some("/api/v1/transfers"));
    assert_eq!(
        settings.resolved_log_path(dir.path()),
        PathBuf::from("/var/log/eduflow/wizard.log")
    );
}

#[test]
fn validation_rejects_bad_values() {
    let cases = [
        ("backend:\n  base_url: ftp://edu.example.test\n", "base_url"),
        (
            "backend:\n  base_url: https://edu.example.test\n  timeout_seconds: 0\n",
            "timeout_seconds",
        ),
        (
            "backend:\n  base_url: https://edu.example.test\n  token_env: \"  \"\n",
            "token_env",
        ),
        (
            "backend:\n  base_url: https://edu.example.test\n  endpoints:\n    import_submit: \"\"\n",
            "import_submit",
        ),
        (
            "backend:\n  base_url: https://edu.example.test\ncache:\n  max_entries: 0\n",
            "max_entries",
        ),
        (
            "backend:\n  base_url: https://edu.example.test\nlog_path: logs/wizard.log\n",
            "log_path",
        ),
    ];
    for (body, needle) in cases {
        let dir = tempdir().expect("tempdir");
        let path = write_settings(&dir, body);
        match load_settings_from(&path) {
            Err(ConfigError::Settings(message)) => {
                assert!(message.contains(needle), "{message} should mention {needle}")
            }
            other => panic!("expected validation error for {needle}, got {other:?}"),
        }
    }
}

#[test]
fn unknown_keys_and_bad_ids_fail_to_parse() {
    let dir = tempdir().expect("tempdir");
    let path = write_settings(
        &dir,
        "backend:\n  base_url: https://edu.example.test\n  retries: 3\n",
    );
    assert!(matches!(
        Settings::from_path(&path),
        Err(ConfigError::Parse { .. })
    ));

    let path = write_settings(
        &dir,
        "backend:\n  base_url: https://edu.example.test\n  endpoints:\n    \"bad endpoint\": /x\n",
    );
    let err = Settings::from_path(&path).expect_err("invalid endpoint id");
    assert!(err.to_string().contains("invalid endpoint id"));
}

#[test]
fn missing_file_reports_read_error() {
    let dir = tempdir().expect("tempdir");
    let err = load_settings_from(&dir.path().join("absent.yaml")).expect_err("missing");
    assert!(matches!(err, ConfigError::Read { .. }));
    assert!(err.to_string().contains("absent.yaml"));
}
