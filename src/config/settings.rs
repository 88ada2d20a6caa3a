use super::ConfigError;
use crate::shared::logging::wizard_log_path;
use crate::shared::EndpointId;
use crate::wizard::BackFromFirst;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_MIN_REASON_LENGTH: usize = 10;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 256;

const DEFAULT_ENDPOINTS: [(&str, &str); 6] = [
    ("transfer_eligibility", "/api/v1/transfers/eligibility"),
    ("transfer_options", "/api/v1/transfers/options"),
    ("transfer_submit", "/api/v1/transfers"),
    ("student_enrollments", "/api/v1/students/enrollments"),
    ("import_preview", "/api/v1/enrollments/import/preview"),
    ("import_submit", "/api/v1/enrollments/import"),
];

pub fn default_endpoint_paths() -> BTreeMap<EndpointId, String> {
    DEFAULT_ENDPOINTS
        .iter()
        .map(|(id, path)| (EndpointId::from_static(id), path.to_string()))
        .collect()
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_min_reason_length() -> usize {
    DEFAULT_MIN_REASON_LENGTH
}

fn default_cache_max_entries() -> usize {
    DEFAULT_CACHE_MAX_ENTRIES
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub backend: BackendSettings,
    #[serde(default)]
    pub wizard: WizardSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSettings {
    pub base_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Name of the environment variable holding the bearer token.
    #[serde(default)]
    pub token_env: Option<String>,
    /// Overrides for the built-in endpoint paths.
    #[serde(default)]
    pub endpoints: BTreeMap<EndpointId, String>,
}

impl BackendSettings {
    pub fn resolved_endpoints(&self) -> BTreeMap<EndpointId, String> {
        let mut endpoints = default_endpoint_paths();
        endpoints.extend(
            self.endpoints
                .iter()
                .map(|(id, path)| (id.clone(), path.clone())),
        );
        endpoints
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WizardSettings {
    #[serde(default)]
    pub back_from_first: BackFromFirst,
    #[serde(default = "default_min_reason_length")]
    pub min_reason_length: usize,
}

impl Default for WizardSettings {
    fn default() -> Self {
        Self {
            back_from_first: BackFromFirst::default(),
            min_reason_length: DEFAULT_MIN_REASON_LENGTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub refetch_on_focus: bool,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            refetch_on_focus: true,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::read(path, source))?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::parse(path, source))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.backend.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Settings(
                "`backend.base_url` must start with http:// or https://".to_string(),
            ));
        }
        if self.backend.timeout_seconds == 0 {
            return Err(ConfigError::Settings(
                "`backend.timeout_seconds` must be greater than 0".to_string(),
            ));
        }
        if let Some(name) = self.backend.token_env.as_deref() {
            if name.trim().is_empty() {
                return Err(ConfigError::Settings(
                    "`backend.token_env` must be non-empty when set".to_string(),
                ));
            }
        }
        for (endpoint, path) in &self.backend.endpoints {
            if path.trim().is_empty() {
                return Err(ConfigError::Settings(format!(
                    "endpoint `{endpoint}` must have a non-empty path"
                )));
            }
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Settings(
                "`cache.max_entries` must be greater than 0".to_string(),
            ));
        }
        if let Some(path) = &self.log_path {
            if !path.is_absolute() {
                return Err(ConfigError::Settings(
                    "`log_path` must be an absolute path".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn resolved_log_path(&self, state_root: &Path) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| wizard_log_path(state_root))
    }
}
