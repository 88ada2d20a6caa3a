use crate::remote::rejection::RemoteError;
use crate::shared::{EndpointId, StepId};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Identifies one remote read: the endpoint plus every parameter that shapes its result.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    pub endpoint: EndpointId,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl QueryKey {
    pub fn new(endpoint: EndpointId) -> Self {
        Self {
            endpoint,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn query_string(&self) -> String {
        self.params
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.endpoint.as_str().as_bytes());
        for (name, value) in &self.params {
            hasher.update([0]);
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }
        to_hex(&hasher.finalize())
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.endpoint)
        } else {
            write!(f, "{}?{}", self.endpoint, self.query_string())
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Names a server-side collection whose cached reads go stale after a mutation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheTag(String);

impl CacheTag {
    pub fn collection(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn scoped(collection: &str, id: &str) -> Self {
        Self(format!("{collection}:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTicket {
    pub generation: u64,
    pub step: StepId,
    pub key: QueryKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub ticket: QueryTicket,
    pub tags: Vec<CacheTag>,
}

impl QueryRequest {
    pub fn key(&self) -> &QueryKey {
        &self.ticket.key
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub ticket: QueryTicket,
    pub result: Result<Value, RemoteError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationTicket {
    pub generation: u64,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub ticket: MutationTicket,
    pub endpoint: EndpointId,
    pub payload: Value,
    pub invalidates: Vec<CacheTag>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationResponse {
    pub ticket: MutationTicket,
    pub result: Result<Value, RemoteError>,
}

/// Success payload of a submission mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    #[serde(deserialize_with = "deserialize_record_id")]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn deserialize_record_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(raw) if !raw.trim().is_empty() => Ok(raw),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(D::Error::custom(format!(
            "record id must be a non-empty string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(raw: &str) -> EndpointId {
        EndpointId::parse(raw).expect("endpoint")
    }

    #[test]
    fn cache_key_ignores_param_insertion_order() {
        let a = QueryKey::new(endpoint("transfer_options"))
            .with_param("classId", "C1")
            .with_param("branch", "north");
        let b = QueryKey::new(endpoint("transfer_options"))
            .with_param("branch", "north")
            .with_param("classId", "C1");
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key().len(), 64);
    }

    #[test]
    fn cache_key_separates_endpoints_and_values() {
        let a = QueryKey::new(endpoint("transfer_options")).with_param("classId", "C1");
        let b = QueryKey::new(endpoint("transfer_eligibility")).with_param("classId", "C1");
        let c = QueryKey::new(endpoint("transfer_options")).with_param("classId", "C2");
        assert_ne!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn display_encodes_query_string() {
        let key = QueryKey::new(endpoint("transfer_options")).with_param("branch", "North Campus");
        assert_eq!(key.to_string(), "transfer_options?branch=North%20Campus");
    }

    #[test]
    fn receipt_accepts_numeric_ids() {
        let receipt: SubmissionReceipt = serde_json::from_str(
            r#"{"id":42,"status":"PENDING","createdAt":"2026-03-01T09:30:00Z"}"#,
        )
        .expect("receipt");
        assert_eq!(receipt.id, "42");
        assert!(receipt.created_at.is_some());
        assert!(serde_json::from_str::<SubmissionReceipt>(r#"{"id":"","status":"x"}"#).is_err());
    }
}
