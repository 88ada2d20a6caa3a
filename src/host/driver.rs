use crate::remote::{
    BackendApi, CacheLookup, CacheTag, MutationRequest, MutationResponse, MutationTicket,
    QueryCache, QueryKey, QueryRequest, QueryResponse, RemoteError,
};
use crate::shared::{FieldKey, WizardLog};
use crate::wizard::{
    FieldValue, SubmissionResult, SubmitOutcome, Transition, WizardError, WizardSession,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

pub const DRIVER_POLL_MS: u64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Requests run on the calling thread before the call returns.
    Inline,
    /// One thread per request; replies are applied by `poll`.
    Background,
}

#[derive(Debug)]
enum Reply {
    Query {
        key: QueryKey,
        result: Result<Value, RemoteError>,
    },
    Mutation(MutationResponse),
}

/// Runs a session's remote work through the shared cache and a backend.
pub struct WizardDriver<B> {
    session: WizardSession,
    backend: B,
    cache: QueryCache,
    mode: DispatchMode,
    refetch_on_focus: bool,
    invalidations: BTreeMap<u64, Vec<CacheTag>>,
    last_result: Option<SubmissionResult>,
    replies_tx: Sender<Reply>,
    replies_rx: Receiver<Reply>,
    outstanding: usize,
    log: WizardLog,
}

impl<B> WizardDriver<B>
where
    B: BackendApi + Clone + Send + 'static,
{
    pub fn new(session: WizardSession, backend: B, cache: QueryCache, mode: DispatchMode) -> Self {
        let (replies_tx, replies_rx) = mpsc::channel();
        let log = session.log().clone();
        Self {
            session,
            backend,
            cache,
            mode,
            refetch_on_focus: true,
            invalidations: BTreeMap::new(),
            last_result: None,
            replies_tx,
            replies_rx,
            outstanding: 0,
            log,
        }
    }

    pub fn with_refetch_on_focus(mut self, enabled: bool) -> Self {
        self.refetch_on_focus = enabled;
        self
    }

    pub fn session(&self) -> &WizardSession {
        &self.session
    }

    /// Direct access for subscribing or reading; remote work issued through
    /// it bypasses the driver.
    pub fn session_mut(&mut self) -> &mut WizardSession {
        &mut self.session
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Result of the most recently settled submission.
    pub fn last_result(&self) -> Option<&SubmissionResult> {
        self.last_result.as_ref()
    }

    pub fn open(&mut self, context: BTreeMap<FieldKey, FieldValue>) -> Result<(), WizardError> {
        self.last_result = None;
        let requests = self.session.open(context)?;
        self.dispatch_queries(requests);
        Ok(())
    }

    pub fn initialize(&mut self) -> Result<(), WizardError> {
        let requests = self.session.initialize()?;
        self.dispatch_queries(requests);
        Ok(())
    }

    pub fn set(&mut self, key: FieldKey, value: FieldValue) -> Result<(), WizardError> {
        let requests = self.session.set(key, value)?;
        self.dispatch_queries(requests);
        Ok(())
    }

    pub fn clear(&mut self, key: &FieldKey) -> Result<(), WizardError> {
        let requests = self.session.clear(key)?;
        self.dispatch_queries(requests);
        Ok(())
    }

    pub fn next(&mut self) -> Result<Transition, WizardError> {
        let outcome = self.session.next()?;
        self.dispatch_queries(outcome.requests);
        Ok(outcome.transition)
    }

    pub fn previous(&mut self) -> Result<Transition, WizardError> {
        let outcome = self.session.previous()?;
        self.dispatch_queries(outcome.requests);
        Ok(outcome.transition)
    }

    pub fn retry(&mut self) -> Result<(), WizardError> {
        if let Some(query) = self.session.current_query() {
            self.cache.forget(query.key());
        }
        let requests = self.session.retry()?;
        self.dispatch_queries(requests);
        Ok(())
    }

    pub fn close(&mut self) -> Transition {
        self.session.close()
    }

    pub fn submit(&mut self) -> Result<SubmitOutcome, WizardError> {
        let outcome = self.session.submit()?;
        if let SubmitOutcome::Dispatched(request) = &outcome {
            self.dispatch_mutation(request.clone());
        }
        Ok(outcome)
    }

    /// Marks cached reads stale and refetches the ones the session shows.
    pub fn focus(&mut self) {
        if !self.refetch_on_focus {
            return;
        }
        let keys = self.cache.on_focus();
        let requests = self.session.refetch(&keys);
        self.dispatch_queries(requests);
    }

    /// Drops every cached read and closes the session.
    pub fn logout(&mut self) -> Transition {
        self.cache.clear();
        self.invalidations.clear();
        self.log.info("driver.logout", json!({}));
        self.session.close()
    }

    /// Applies every reply that has arrived; returns how many were applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.replies_rx.try_recv() {
                Ok(reply) => {
                    self.apply(reply);
                    applied += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        applied
    }

    /// Blocks until no background request is outstanding or `timeout` passes.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.outstanding > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self
                .replies_rx
                .recv_timeout(remaining.min(Duration::from_millis(DRIVER_POLL_MS)))
            {
                Ok(reply) => self.apply(reply),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        true
    }

    fn apply(&mut self, reply: Reply) {
        self.outstanding = self.outstanding.saturating_sub(1);
        match reply {
            Reply::Query { key, result } => self.finish_query(&key, result),
            Reply::Mutation(response) => self.finish_mutation(response),
        }
    }

    fn dispatch_queries(&mut self, requests: Vec<QueryRequest>) {
        for request in requests {
            match self.cache.lookup_or_begin(&request) {
                CacheLookup::Fresh(data) => {
                    self.session.deliver(QueryResponse {
                        ticket: request.ticket,
                        result: Ok(data),
                    });
                }
                CacheLookup::Pending => {}
                CacheLookup::Miss => self.fetch(request.ticket.key),
            }
        }
    }

    fn fetch(&mut self, key: QueryKey) {
        match self.mode {
            DispatchMode::Inline => {
                let result = self.backend.fetch(&key);
                self.finish_query(&key, result);
            }
            DispatchMode::Background => {
                let backend = self.backend.clone();
                let tx = self.replies_tx.clone();
                self.outstanding += 1;
                thread::spawn(move || {
                    let result = backend.fetch(&key);
                    let _ = tx.send(Reply::Query { key, result });
                });
            }
        }
    }

    fn finish_query(&mut self, key: &QueryKey, result: Result<Value, RemoteError>) {
        if let Err(error) = &result {
            self.log.warn(
                "driver.fetch_failed",
                json!({ "query": key.to_string(), "error": error.to_string() }),
            );
        }
        for ticket in self.cache.complete(key, &result) {
            self.session.deliver(QueryResponse {
                ticket,
                result: result.clone(),
            });
        }
    }

    fn dispatch_mutation(&mut self, request: MutationRequest) {
        let MutationRequest {
            ticket,
            endpoint,
            payload,
            invalidates,
        } = request;
        self.invalidations.insert(ticket.seq, invalidates);
        match self.mode {
            DispatchMode::Inline => {
                let result = self.backend.mutate(&endpoint, &payload);
                self.finish_mutation(MutationResponse { ticket, result });
            }
            DispatchMode::Background => {
                let backend = self.backend.clone();
                let tx = self.replies_tx.clone();
                self.outstanding += 1;
                thread::spawn(move || {
                    let result = backend.mutate(&endpoint, &payload);
                    let _ = tx.send(Reply::Mutation(MutationResponse { ticket, result }));
                });
            }
        }
    }

    fn finish_mutation(&mut self, response: MutationResponse) {
        let ticket: MutationTicket = response.ticket;
        let tags = self.invalidations.remove(&ticket.seq).unwrap_or_default();
        // The backend applied an accepted write even if the run is gone.
        let accepted = response.result.is_ok();
        let result = self.session.complete_submission(response);
        let stale_keys = if accepted {
            let keys = self.cache.invalidate(&tags);
            self.log.info(
                "driver.invalidate",
                json!({
                    "receipt_id": match &result {
                        SubmissionResult::Completed(receipt) => Value::from(receipt.id.as_str()),
                        _ => Value::Null,
                    },
                    "tags": tags.iter().map(CacheTag::as_str).collect::<Vec<_>>(),
                    "stale_keys": keys.len(),
                    "discarded": result == SubmissionResult::Discarded,
                }),
            );
            keys
        } else {
            Vec::new()
        };
        match &result {
            SubmissionResult::Completed(_) => {
                let requests = self.session.refetch(&stale_keys);
                self.dispatch_queries(requests);
            }
            SubmissionResult::Returned { requests, .. } => {
                for request in requests {
                    self.cache.forget(request.key());
                }
                self.dispatch_queries(requests.clone());
            }
            SubmissionResult::Failed(_) | SubmissionResult::Discarded => {}
        }
        if result != SubmissionResult::Discarded {
            self.last_result = Some(result);
        }
    }
}
