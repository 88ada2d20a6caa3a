use crate::config::BackendSettings;
use crate::remote::rejection::{classify_failure, RemoteError};
use crate::remote::types::QueryKey;
use crate::shared::EndpointId;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Blocking transport for the REST contracts a wizard consumes.
pub trait BackendApi {
    fn fetch(&self, key: &QueryKey) -> Result<Value, RemoteError>;
    fn mutate(&self, endpoint: &EndpointId, payload: &Value) -> Result<Value, RemoteError>;
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
    endpoints: BTreeMap<EndpointId, String>,
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        token: Option<String>,
        endpoints: BTreeMap<EndpointId, String>,
    ) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|value| !value.trim().is_empty()),
            endpoints,
        }
    }

    /// Reads the bearer token from the environment variable named in settings.
    pub fn from_settings(settings: &BackendSettings) -> Self {
        let token = settings
            .token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok());
        Self::new(
            &settings.base_url,
            Duration::from_secs(settings.timeout_seconds),
            token,
            settings.resolved_endpoints(),
        )
    }

    fn url(&self, endpoint: &EndpointId) -> Result<String, RemoteError> {
        let path = self.endpoints.get(endpoint).ok_or_else(|| {
            RemoteError::malformed(format!("no path configured for endpoint `{endpoint}`"))
        })?;
        Ok(format!("{}/{}", self.base_url, path.trim_start_matches('/')))
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        let request = request.set("Accept", "application/json");
        match self.token.as_deref() {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }
}

fn read_response(result: Result<ureq::Response, ureq::Error>) -> Result<Value, RemoteError> {
    match result {
        Ok(response) => {
            let body = response
                .into_string()
                .map_err(|err| RemoteError::transient(err.to_string()))?;
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&body).map_err(|err| RemoteError::malformed(err.to_string()))
        }
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(classify_failure(status, &body))
        }
        Err(ureq::Error::Transport(transport)) => {
            Err(RemoteError::transient(transport.to_string()))
        }
    }
}

impl BackendApi for HttpBackend {
    fn fetch(&self, key: &QueryKey) -> Result<Value, RemoteError> {
        let mut url = self.url(&key.endpoint)?;
        if !key.params.is_empty() {
            url = format!("{url}?{}", key.query_string());
        }
        read_response(self.authorize(self.agent.get(&url)).call())
    }

    fn mutate(&self, endpoint: &EndpointId, payload: &Value) -> Result<Value, RemoteError> {
        let url = self.url(endpoint)?;
        read_response(self.authorize(self.agent.post(&url)).send_json(payload.clone()))
    }
}
