use serde::{Deserialize, Serialize};
use serde_json::Value;

const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again later.";
const GENERIC_REJECTION_MESSAGE: &str = "The request could not be completed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "info" | "notice" => Some(Self::Info),
            "warning" | "warn" => Some(Self::Warning),
            "error" | "critical" | "fatal" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuggestedAction {
    Retry,
    ContactSupport,
    Navigate { target: Option<String> },
}

impl SuggestedAction {
    pub fn parse(raw: &str, target: Option<String>) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "retry" => Some(Self::Retry),
            "contact-support" | "support" => Some(Self::ContactSupport),
            "navigate" | "reselect" => Some(Self::Navigate { target }),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Retry => "Retry",
            Self::ContactSupport => "Contact support",
            Self::Navigate { .. } => "Choose again",
        }
    }
}

/// A structured 4xx failure returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub status: u16,
    pub code: Option<String>,
    pub message: String,
    pub severity: Severity,
    pub action: Option<SuggestedAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("request rejected ({}): {}", .0.status, .0.message)]
    Rejected(Rejection),
    #[error("request failed: {message}")]
    Transient { message: String },
    #[error("unexpected response shape: {message}")]
    Malformed { message: String },
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.rejection().and_then(|r| r.code.as_deref())
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Rejected(rejection) => rejection.severity,
            Self::Transient { .. } => Severity::Warning,
            Self::Malformed { .. } => Severity::Error,
        }
    }

    /// Message safe to show to the person driving the wizard.
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected(rejection) => rejection.message.clone(),
            Self::Transient { .. } => {
                "The server could not be reached. Check your connection and retry.".to_string()
            }
            Self::Malformed { .. } => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }

    pub fn suggested_action(&self) -> Option<SuggestedAction> {
        match self {
            Self::Rejected(rejection) => rejection.action.clone(),
            Self::Transient { .. } => Some(SuggestedAction::Retry),
            Self::Malformed { .. } => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawRejection {
    #[serde(default)]
    code: Option<String>,
    #[serde(default, alias = "detail", alias = "error_description")]
    message: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    target: Option<String>,
}

fn known_code_defaults(code: &str) -> Option<(Severity, SuggestedAction)> {
    match code {
        "DUPLICATE_PENDING_REQUEST" | "PENDING_REQUEST_EXISTS" => {
            Some((Severity::Warning, SuggestedAction::ContactSupport))
        }
        "QUOTA_EXCEEDED" | "TRANSFER_QUOTA_EXHAUSTED" | "NOT_ELIGIBLE" => {
            Some((Severity::Error, SuggestedAction::ContactSupport))
        }
        "CLASS_FULL" | "CAPACITY_EXCEEDED" | "TARGET_UNAVAILABLE" | "SESSION_UNAVAILABLE"
        | "SOURCE_CHANGED" => Some((Severity::Warning, SuggestedAction::Navigate { target: None })),
        "RATE_LIMITED" => Some((Severity::Info, SuggestedAction::Retry)),
        _ => None,
    }
}

fn raw_from_body(body: &Value) -> RawRejection {
    let nested = body.get("error").filter(|value| value.is_object());
    let source = nested.unwrap_or(body);
    let mut raw: RawRejection = serde_json::from_value(source.clone()).unwrap_or_default();
    if raw.message.is_none() {
        raw.message = body
            .get("message")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string);
    }
    raw
}

/// Maps an HTTP failure status and body into the client-observed error taxonomy.
pub fn classify_failure(status: u16, body: &str) -> RemoteError {
    if status >= 500 || status == 408 || status == 429 {
        return RemoteError::transient(format!("server responded with status {status}"));
    }

    let parsed = serde_json::from_str::<Value>(body).ok();
    let raw = match parsed.as_ref() {
        Some(value @ Value::Object(_)) => raw_from_body(value),
        _ => RawRejection::default(),
    };

    let code = raw
        .code
        .map(|code| code.trim().to_ascii_uppercase())
        .filter(|code| !code.is_empty());
    let defaults = code.as_deref().and_then(known_code_defaults);

    let severity = raw
        .severity
        .as_deref()
        .and_then(Severity::parse)
        .or_else(|| defaults.as_ref().map(|(severity, _)| *severity))
        .unwrap_or(match status {
            401 | 403 => Severity::Error,
            _ => Severity::Warning,
        });

    let target = raw.target.filter(|value| !value.trim().is_empty());
    let action = match raw.action.as_deref() {
        Some(action) => SuggestedAction::parse(action, target.clone()),
        None => defaults.map(|(_, action)| match action {
            SuggestedAction::Navigate { .. } => SuggestedAction::Navigate {
                target: target.clone(),
            },
            other => other,
        }),
    };

    let message = raw
        .message
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| GENERIC_REJECTION_MESSAGE.to_string());

    RemoteError::Rejected(Rejection {
        status,
        code,
        message,
        severity,
        action,
    })
}
