use crate::remote::rejection::RemoteError;
use crate::remote::types::{MutationTicket, QueryKey};
use serde_json::Value;

/// Per-step view of a remote read, shaped like a cached query hook result.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteQuery {
    key: QueryKey,
    data: Option<Value>,
    is_loading: bool,
    error: Option<RemoteError>,
}

impl RemoteQuery {
    pub fn loading(key: QueryKey) -> Self {
        Self {
            key,
            data: None,
            is_loading: true,
            error: None,
        }
    }

    pub fn loaded(key: QueryKey, data: Value) -> Self {
        Self {
            key,
            data: Some(data),
            is_loading: false,
            error: None,
        }
    }

    pub fn failed(key: QueryKey, error: RemoteError) -> Self {
        Self {
            key,
            data: None,
            is_loading: false,
            error: Some(error),
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&RemoteError> {
        self.error.as_ref()
    }

    /// Starts a fetch. Data for a different key is dropped; data for the same
    /// key stays visible while the refetch is in flight.
    pub fn begin(&mut self, key: QueryKey) {
        if self.key != key {
            self.key = key;
            self.data = None;
        }
        self.is_loading = true;
        self.error = None;
    }

    pub fn resolve(&mut self, result: Result<Value, RemoteError>) {
        self.is_loading = false;
        match result {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
            }
            Err(err) => self.error = Some(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateState {
    pub can_submit: bool,
    pub is_loading: bool,
}

impl GateState {
    /// A step without a remote query has its data trivially present.
    pub fn derive(form_valid: bool, query: Option<&RemoteQuery>) -> Self {
        let (data_present, is_loading, has_error) = match query {
            None => (true, false, false),
            Some(query) => (
                query.data.is_some(),
                query.is_loading,
                query.error.is_some(),
            ),
        };
        Self {
            can_submit: form_valid && data_present && !is_loading && !has_error,
            is_loading,
        }
    }

    pub fn with_mutation_in_flight(self, in_flight: bool) -> Self {
        if !in_flight {
            return self;
        }
        Self {
            can_submit: false,
            is_loading: true,
        }
    }
}

/// Guards the submission mutation: at most one dispatch at a time.
#[derive(Debug, Clone, Default)]
pub struct AsyncStepGate {
    in_flight: Option<MutationTicket>,
    next_seq: u64,
    last_error: Option<RemoteError>,
}

impl AsyncStepGate {
    pub fn begin(&mut self, generation: u64) -> Option<MutationTicket> {
        if self.in_flight.is_some() {
            return None;
        }
        self.next_seq += 1;
        let ticket = MutationTicket {
            generation,
            seq: self.next_seq,
        };
        self.in_flight = Some(ticket);
        self.last_error = None;
        Some(ticket)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<MutationTicket> {
        self.in_flight
    }

    /// Returns false when `ticket` is not the outstanding mutation.
    pub fn finish(&mut self, ticket: MutationTicket) -> bool {
        if self.in_flight != Some(ticket) {
            return false;
        }
        self.in_flight = None;
        true
    }

    pub fn fail(&mut self, error: RemoteError) {
        self.last_error = Some(error);
    }

    pub fn last_error(&self) -> Option<&RemoteError> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn reset(&mut self) {
        self.in_flight = None;
        self.last_error = None;
    }

    pub fn state(&self, form_valid: bool, query: Option<&RemoteQuery>) -> GateState {
        GateState::derive(form_valid, query).with_mutation_in_flight(self.is_in_flight())
    }
}
