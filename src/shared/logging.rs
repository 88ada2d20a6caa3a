use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn wizard_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/wizard.log")
}

pub fn append_log_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

/// Best-effort JSON-lines event log shared by sessions, drivers and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WizardLog {
    path: Option<PathBuf>,
}

impl WizardLog {
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, event: &str, fields: Value) {
        self.record("info", event, fields);
    }

    pub fn warn(&self, event: &str, fields: Value) {
        self.record("warn", event, fields);
    }

    pub fn record(&self, level: &str, event: &str, fields: Value) {
        let Some(path) = self.path.as_ref() else {
            return;
        };

        let mut payload = Map::new();
        payload.insert(
            "timestamp".to_string(),
            Value::from(chrono::Utc::now().timestamp()),
        );
        payload.insert("level".to_string(), Value::from(level));
        payload.insert("event".to_string(), Value::from(event));
        if let Value::Object(extra) = fields {
            for (key, value) in extra {
                payload.entry(key).or_insert(value);
            }
        }

        let Ok(line) = serde_json::to_string(&Value::Object(payload)) else {
            return;
        };
        let _ = append_log_line(path, &line);
    }
}
