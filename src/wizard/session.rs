use crate::remote::rejection::RemoteError;
use crate::remote::types::{
    MutationRequest, MutationResponse, QueryKey, QueryRequest, QueryResponse, QueryTicket,
    SubmissionReceipt,
};
use crate::shared::{FieldKey, StepId, WizardLog};
use crate::wizard::error::WizardError;
use crate::wizard::flow::{StaleReference, WizardFlow};
use crate::wizard::gate::{AsyncStepGate, GateState, RemoteQuery};
use crate::wizard::registry::{StepCheck, StepDefinition};
use crate::wizard::state::{FieldValue, StateSnapshot, WizardState};
use crate::wizard::transitions::{
    resolve_next, resolve_previous, scope_for, validate_chain, ChainViolation, NextStep,
    PreviousStep, StepCursor, Transition,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

const LOADING_REASON: &str = "Waiting for data to load.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Closed,
    Active,
    Submitting,
    Completed,
    Cancelled,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Active => "active",
            Self::Submitting => "submitting",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Active | Self::Submitting)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummary {
    pub id: StepId,
    pub label: String,
    pub visited: bool,
    pub current: bool,
}

/// Everything a host needs to render the wizard at one moment.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub flow: String,
    pub session_id: String,
    pub phase: SessionPhase,
    pub step: StepId,
    pub step_label: String,
    /// 1-based position among linear steps; `None` on a branch-only step.
    pub step_number: Option<usize>,
    pub steps: Vec<StepSummary>,
    pub check: StepCheck,
    pub gate: GateState,
    pub is_final: bool,
    pub query: Option<RemoteQuery>,
    pub snapshot: StateSnapshot,
    pub error: Option<RemoteError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Changed(SessionView),
    Completed(SubmissionReceipt),
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub transition: Transition,
    pub requests: Vec<QueryRequest>,
}

impl StepOutcome {
    fn unchanged() -> Self {
        Self {
            transition: Transition::Unchanged,
            requests: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Dispatched(MutationRequest),
    InFlight,
    Blocked(ChainViolation),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionResult {
    Completed(SubmissionReceipt),
    Failed(RemoteError),
    /// Rejected for a stale reference; the session moved back to `step`.
    Returned {
        step: StepId,
        error: RemoteError,
        requests: Vec<QueryRequest>,
    },
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Applied,
    Discarded,
}

pub fn generate_session_id() -> String {
    let mut bytes = [0_u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => {
            let hex = bytes
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect::<String>();
            format!("wiz-{hex}")
        }
        Err(_) => format!(
            "wiz-{:x}",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ),
    }
}

fn query_block_reason(query: Option<&RemoteQuery>) -> Option<String> {
    let query = query?;
    if query.is_loading() {
        return Some(LOADING_REASON.to_string());
    }
    if let Some(error) = query.error() {
        return Some(error.user_message());
    }
    if query.data().is_none() {
        return Some(LOADING_REASON.to_string());
    }
    None
}

/// One run of a wizard flow. Single-owner and synchronous: remote work leaves
/// as request values and comes back through `deliver`/`complete_submission`.
pub struct WizardSession {
    flow: Arc<WizardFlow>,
    session_id: String,
    state: WizardState,
    cursor: StepCursor,
    queries: BTreeMap<StepId, RemoteQuery>,
    gate: AsyncStepGate,
    phase: SessionPhase,
    generation: u64,
    subscribers: Vec<Sender<SessionEvent>>,
    log: WizardLog,
}

impl WizardSession {
    pub fn new(flow: Arc<WizardFlow>) -> Self {
        let state = WizardState::new(flow.dependencies().clone());
        let cursor = StepCursor::start(flow.registry());
        Self {
            flow,
            session_id: String::new(),
            state,
            cursor,
            queries: BTreeMap::new(),
            gate: AsyncStepGate::default(),
            phase: SessionPhase::Closed,
            generation: 0,
            subscribers: Vec::new(),
            log: WizardLog::disabled(),
        }
    }

    pub fn with_log(mut self, log: WizardLog) -> Self {
        self.log = log;
        self
    }

    pub fn open(
        &mut self,
        context: BTreeMap<FieldKey, FieldValue>,
    ) -> Result<Vec<QueryRequest>, WizardError> {
        if self.phase.is_running() {
            return Err(WizardError::InvalidPhase {
                operation: "open",
                phase: self.phase,
            });
        }
        self.generation += 1;
        self.session_id = generate_session_id();
        self.state.set_context(context);
        self.reset_run();
        self.phase = SessionPhase::Active;
        self.record("info", "wizard.open", json!({}));
        let requests = self.refresh_current_query(false);
        self.emit_changed();
        Ok(requests)
    }

    /// Restarts the run at the first step, keeping the context.
    pub fn initialize(&mut self) -> Result<Vec<QueryRequest>, WizardError> {
        self.require_active("initialize")?;
        self.generation += 1;
        self.reset_run();
        let requests = self.refresh_current_query(false);
        self.emit_changed();
        Ok(requests)
    }

    pub fn close(&mut self) -> Transition {
        let was_running = self.phase.is_running();
        self.generation += 1;
        if was_running {
            self.record("info", "wizard.close", json!({}));
        }
        self.phase = if was_running {
            SessionPhase::Cancelled
        } else {
            SessionPhase::Closed
        };
        self.reset_run();
        self.state.clear_context();
        self.emit(SessionEvent::Closed);
        Transition::Closed
    }

    pub fn set(
        &mut self,
        key: FieldKey,
        value: FieldValue,
    ) -> Result<Vec<QueryRequest>, WizardError> {
        self.require_active("set")?;
        self.ensure_writable(&key)?;
        let cleared = self.state.set(key, value);
        Ok(self.after_edit(cleared))
    }

    pub fn clear(&mut self, key: &FieldKey) -> Result<Vec<QueryRequest>, WizardError> {
        self.require_active("clear")?;
        self.ensure_writable(key)?;
        let cleared = self.state.clear(key);
        Ok(self.after_edit(cleared))
    }

    pub fn next(&mut self) -> Result<StepOutcome, WizardError> {
        self.require_active("next")?;
        let flow = Arc::clone(&self.flow);
        let registry = flow.registry();
        let from = self.cursor.current().clone();
        let step = registry.get(from.as_str())?;
        let snapshot = self.state.snapshot();
        let query = self.queries.get(&from);

        let decision = resolve_next(registry, step, &scope_for(step, &snapshot, query))?;
        let decision = match (decision, query_block_reason(query)) {
            (NextStep::Advance(_), Some(reason)) => NextStep::Blocked(reason),
            (decision, _) => decision,
        };

        let outcome = match decision {
            NextStep::Advance(to) => {
                self.cursor.advance(to.clone());
                self.gate.clear_error();
                self.record(
                    "info",
                    "wizard.transition",
                    json!({ "direction": "next", "from": from.as_str() }),
                );
                let requests = self.refresh_current_query(false);
                StepOutcome {
                    transition: Transition::Moved {
                        from,
                        to,
                        cleared: Vec::new(),
                    },
                    requests,
                }
            }
            NextStep::Blocked(reason) => {
                self.record("info", "wizard.blocked", json!({ "reason": reason }));
                StepOutcome {
                    transition: Transition::Blocked { step: from, reason },
                    requests: Vec::new(),
                }
            }
            NextStep::Stay => StepOutcome::unchanged(),
        };
        self.emit_changed();
        Ok(outcome)
    }

    pub fn previous(&mut self) -> Result<StepOutcome, WizardError> {
        self.require_active("previous")?;
        let flow = Arc::clone(&self.flow);
        match resolve_previous(flow.registry(), &self.cursor, flow.back_from_first())? {
            PreviousStep::Retreat { to, clear } => {
                let from = self.cursor.current().clone();
                let mut cleared: Vec<FieldKey> = Vec::new();
                for key in &clear {
                    for removed in self.state.clear(key) {
                        if !cleared.contains(&removed) {
                            cleared.push(removed);
                        }
                    }
                }
                self.cursor.retreat_to(to.clone());
                self.gate.clear_error();
                self.record(
                    "info",
                    "wizard.transition",
                    json!({
                        "direction": "previous",
                        "from": from.as_str(),
                        "cleared": cleared.iter().map(FieldKey::as_str).collect::<Vec<_>>(),
                    }),
                );
                let requests = self.refresh_current_query(false);
                self.emit_changed();
                Ok(StepOutcome {
                    transition: Transition::Moved { from, to, cleared },
                    requests,
                })
            }
            PreviousStep::Stay => Ok(StepOutcome::unchanged()),
            PreviousStep::Close => Ok(StepOutcome {
                transition: self.close(),
                requests: Vec::new(),
            }),
        }
    }

    /// Re-issues the current step's query and clears a surfaced submission error.
    pub fn retry(&mut self) -> Result<Vec<QueryRequest>, WizardError> {
        self.require_active("retry")?;
        self.gate.clear_error();
        let requests = self.refresh_current_query(true);
        self.emit_changed();
        Ok(requests)
    }

    pub fn deliver(&mut self, response: QueryResponse) -> Delivery {
        let QueryResponse { ticket, result } = response;
        if ticket.generation != self.generation || !self.phase.is_running() {
            self.record_discard(&ticket, "superseded");
            return Delivery::Discarded;
        }
        let awaited = self
            .queries
            .get(&ticket.step)
            .is_some_and(|slot| slot.key() == &ticket.key && slot.is_loading());
        if !awaited {
            self.record_discard(&ticket, "key_changed");
            return Delivery::Discarded;
        }

        let flow = Arc::clone(&self.flow);
        let definition = flow
            .registry()
            .get(ticket.step.as_str())
            .ok()
            .and_then(StepDefinition::query);
        let result = match (result, definition) {
            (Ok(data), Some(query)) => query
                .check_shape(&data)
                .map(|()| data)
                .map_err(RemoteError::malformed),
            (result, _) => result,
        };
        if let Err(error) = &result {
            self.record(
                "warn",
                "wizard.query_failed",
                json!({ "query": ticket.key.to_string(), "error": error.to_string() }),
            );
        }
        if let Some(slot) = self.queries.get_mut(&ticket.step) {
            slot.resolve(result);
        }
        self.emit_changed();
        Delivery::Applied
    }

    /// Re-issues every slot whose key is in `keys`, keeping the data already shown.
    pub fn refetch(&mut self, keys: &[QueryKey]) -> Vec<QueryRequest> {
        if self.phase != SessionPhase::Active {
            return Vec::new();
        }
        let flow = Arc::clone(&self.flow);
        let mut requests = Vec::new();
        for (step, slot) in self.queries.iter_mut() {
            if !keys.contains(slot.key()) {
                continue;
            }
            let key = slot.key().clone();
            slot.begin(key.clone());
            let tags = flow
                .registry()
                .get(step.as_str())
                .ok()
                .and_then(StepDefinition::query)
                .map(|query| query.tags_for(&key))
                .unwrap_or_default();
            requests.push(QueryRequest {
                ticket: QueryTicket {
                    generation: self.generation,
                    step: step.clone(),
                    key,
                },
                tags,
            });
        }
        if !requests.is_empty() {
            self.emit_changed();
        }
        requests
    }

    pub fn submit(&mut self) -> Result<SubmitOutcome, WizardError> {
        if self.phase == SessionPhase::Submitting || self.gate.is_in_flight() {
            return Ok(SubmitOutcome::InFlight);
        }
        self.require_active("submit")?;
        let flow = Arc::clone(&self.flow);
        let registry = flow.registry();
        let current = self.cursor.current().clone();
        if registry.final_step().id() != &current {
            return Err(WizardError::NotAtFinalStep {
                step: current.to_string(),
            });
        }

        let snapshot = self.state.snapshot();
        let violation = match query_block_reason(self.queries.get(&current)) {
            Some(reason) => Some(ChainViolation {
                step: current,
                reason,
            }),
            None => validate_chain(registry, &self.cursor.path(), &snapshot, &self.queries)?,
        };
        if let Some(violation) = violation {
            self.record(
                "info",
                "wizard.submit_blocked",
                json!({ "blocked_step": violation.step.as_str(), "reason": violation.reason }),
            );
            self.emit_changed();
            return Ok(SubmitOutcome::Blocked(violation));
        }

        let submission = flow.submission();
        let payload = submission
            .build_payload(&snapshot)
            .map_err(WizardError::Payload)?;
        let Some(ticket) = self.gate.begin(self.generation) else {
            return Ok(SubmitOutcome::InFlight);
        };
        self.phase = SessionPhase::Submitting;
        self.record(
            "info",
            "wizard.submit",
            json!({ "endpoint": submission.endpoint().as_str(), "seq": ticket.seq }),
        );
        self.emit_changed();
        Ok(SubmitOutcome::Dispatched(MutationRequest {
            ticket,
            endpoint: submission.endpoint().clone(),
            payload,
            invalidates: submission.invalidation_tags(&snapshot),
        }))
    }

    pub fn complete_submission(&mut self, response: MutationResponse) -> SubmissionResult {
        let MutationResponse { ticket, result } = response;
        if ticket.generation != self.generation
            || self.phase != SessionPhase::Submitting
            || !self.gate.finish(ticket)
        {
            self.record(
                "info",
                "wizard.discard",
                json!({ "kind": "mutation", "seq": ticket.seq, "reason": "superseded" }),
            );
            return SubmissionResult::Discarded;
        }

        let result = result.and_then(|value| {
            serde_json::from_value::<SubmissionReceipt>(value)
                .map_err(|err| RemoteError::malformed(err.to_string()))
        });

        match result {
            Ok(receipt) => {
                self.record(
                    "info",
                    "wizard.completed",
                    json!({ "receipt_id": receipt.id, "status": receipt.status }),
                );
                self.emit(SessionEvent::Completed(receipt.clone()));
                self.generation += 1;
                self.reset_run();
                self.phase = SessionPhase::Completed;
                self.emit_changed();
                SubmissionResult::Completed(receipt)
            }
            Err(error) => {
                self.phase = SessionPhase::Active;
                self.record(
                    "warn",
                    "wizard.rejected",
                    json!({
                        "error": error.to_string(),
                        "code": error.code(),
                        "severity": error.severity().as_str(),
                    }),
                );
                let flow = Arc::clone(&self.flow);
                let stale = error
                    .code()
                    .and_then(|code| flow.submission().stale_reference(code))
                    .cloned();
                self.gate.fail(error.clone());
                let Some(StaleReference { step, fields }) = stale else {
                    self.emit_changed();
                    return SubmissionResult::Failed(error);
                };

                for key in &fields {
                    self.state.clear(key);
                }
                self.cursor.rewind_to(step.clone());
                self.queries.remove(&step);
                let requests = self.refresh_current_query(false);
                self.emit_changed();
                SubmissionResult::Returned {
                    step,
                    error,
                    requests,
                }
            }
        }
    }

    pub fn gate_state(&self) -> GateState {
        if !self.phase.is_running() {
            return GateState::default();
        }
        let step = self.current_step();
        let query = self.queries.get(step.id());
        let form_valid = self.check_current().is_ready();
        self.gate.state(form_valid, query)
    }

    pub fn check_current(&self) -> StepCheck {
        let step = self.current_step();
        let snapshot = self.state.snapshot();
        step.check(&scope_for(step, &snapshot, self.queries.get(step.id())))
    }

    pub fn current_step(&self) -> &StepDefinition {
        let registry = self.flow.registry();
        registry
            .get(self.cursor.current().as_str())
            .unwrap_or_else(|_| registry.first())
    }

    pub fn view(&self) -> SessionView {
        let registry = self.flow.registry();
        let step = self.current_step();
        let snapshot = self.state.snapshot();
        let query = self.queries.get(step.id());
        let check = step.check(&scope_for(step, &snapshot, query));
        let steps = registry
            .iter()
            .filter(|candidate| !candidate.is_branch_only() || candidate.id() == step.id())
            .map(|candidate| StepSummary {
                id: candidate.id().clone(),
                label: candidate.label().to_string(),
                visited: self.cursor.history().contains(candidate.id()),
                current: candidate.id() == step.id(),
            })
            .collect();

        SessionView {
            flow: self.flow.name().to_string(),
            session_id: self.session_id.clone(),
            phase: self.phase,
            step: step.id().clone(),
            step_label: step.label().to_string(),
            step_number: registry
                .linear_steps()
                .position(|candidate| candidate.id() == step.id())
                .map(|index| index + 1),
            steps,
            check,
            gate: self.gate_state(),
            is_final: registry.final_step().id() == step.id(),
            query: query.cloned(),
            snapshot,
            error: self.gate.last_error().cloned(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    pub fn query(&self, step: &str) -> Option<&RemoteQuery> {
        self.queries.get(step)
    }

    pub fn current_query(&self) -> Option<&RemoteQuery> {
        self.queries.get(self.cursor.current())
    }

    pub fn last_error(&self) -> Option<&RemoteError> {
        self.gate.last_error()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn flow(&self) -> &WizardFlow {
        &self.flow
    }

    pub fn cursor(&self) -> &StepCursor {
        &self.cursor
    }

    pub fn log(&self) -> &WizardLog {
        &self.log
    }

    fn require_active(&self, operation: &'static str) -> Result<(), WizardError> {
        if self.phase == SessionPhase::Active {
            Ok(())
        } else {
            Err(WizardError::InvalidPhase {
                operation,
                phase: self.phase,
            })
        }
    }

    fn ensure_writable(&self, key: &FieldKey) -> Result<(), WizardError> {
        let step = self.current_step();
        if step.write_keys().contains(key) {
            return Ok(());
        }
        Err(WizardError::FieldNotWritable {
            step: step.id().to_string(),
            field: key.to_string(),
        })
    }

    fn after_edit(&mut self, cleared: Vec<FieldKey>) -> Vec<QueryRequest> {
        if !cleared.is_empty() {
            self.record(
                "info",
                "wizard.cascade",
                json!({ "cleared": cleared.iter().map(FieldKey::as_str).collect::<Vec<_>>() }),
            );
        }
        self.gate.clear_error();
        let requests = self.refresh_current_query(false);
        self.emit_changed();
        requests
    }

    fn reset_run(&mut self) {
        self.state.initialize();
        self.cursor = StepCursor::start(self.flow.registry());
        self.queries.clear();
        self.gate.reset();
    }

    /// Recomputes the current step's query key and emits a fetch when it changed.
    fn refresh_current_query(&mut self, force: bool) -> Vec<QueryRequest> {
        let flow = Arc::clone(&self.flow);
        let step_id = self.cursor.current().clone();
        let Ok(step) = flow.registry().get(step_id.as_str()) else {
            return Vec::new();
        };
        let Some(query) = step.query() else {
            return Vec::new();
        };
        let snapshot = self.state.snapshot();
        let Some(key) = query.key_for(&scope_for(step, &snapshot, None)) else {
            self.queries.remove(&step_id);
            return Vec::new();
        };

        match self.queries.get_mut(&step_id) {
            Some(slot) if slot.key() == &key && !force => return Vec::new(),
            Some(slot) => slot.begin(key.clone()),
            None => {
                self.queries
                    .insert(step_id.clone(), RemoteQuery::loading(key.clone()));
            }
        }

        self.record("info", "wizard.fetch", json!({ "query": key.to_string() }));
        let tags = query.tags_for(&key);
        vec![QueryRequest {
            ticket: QueryTicket {
                generation: self.generation,
                step: step_id,
                key,
            },
            tags,
        }]
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit_changed(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }
        let view = self.view();
        self.emit(SessionEvent::Changed(view));
    }

    fn record_discard(&self, ticket: &QueryTicket, reason: &str) {
        self.record(
            "info",
            "wizard.discard",
            json!({
                "kind": "query",
                "query": ticket.key.to_string(),
                "ticket_generation": ticket.generation,
                "reason": reason,
            }),
        );
    }

    fn record(&self, level: &str, event: &str, extra: Value) {
        let mut fields = json!({
            "session_id": self.session_id,
            "flow": self.flow.name(),
            "step": self.cursor.current().as_str(),
            "generation": self.generation,
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut fields, extra) {
            base.extend(extra);
        }
        self.log.record(level, event, fields);
    }
}

impl std::fmt::Debug for WizardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WizardSession")
            .field("flow", &self.flow.name())
            .field("session_id", &self.session_id)
            .field("phase", &self.phase)
            .field("cursor", &self.cursor)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_prefixed_and_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert!(a.starts_with("wiz-"));
        assert_ne!(a, b);
    }

    #[test]
    fn loading_or_failed_query_blocks_progress() {
        let key = QueryKey::new(crate::shared::EndpointId::parse("transfer_options").expect("id"));
        assert_eq!(
            query_block_reason(Some(&RemoteQuery::loading(key.clone()))).as_deref(),
            Some(LOADING_REASON)
        );
        assert!(query_block_reason(Some(&RemoteQuery::failed(
            key.clone(),
            RemoteError::transient("down")
        )))
        .is_some());
        assert!(query_block_reason(Some(&RemoteQuery::loaded(key, json!([])))).is_none());
        assert!(query_block_reason(None).is_none());
    }
}
