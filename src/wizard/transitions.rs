use crate::shared::{FieldKey, StepId};
use crate::wizard::error::WizardError;
use crate::wizard::gate::RemoteQuery;
use crate::wizard::registry::{BackPolicy, StepCheck, StepDefinition, StepRegistry};
use crate::wizard::state::{StateSnapshot, StepScope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What "previous" does on the first step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackFromFirst {
    #[default]
    Stay,
    Close,
}

impl BackFromFirst {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stay => "stay",
            Self::Close => "close",
        }
    }
}

/// Current step plus the steps visited to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCursor {
    current: StepId,
    history: Vec<StepId>,
}

impl StepCursor {
    pub fn start(registry: &StepRegistry) -> Self {
        Self {
            current: registry.first().id().clone(),
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> &StepId {
        &self.current
    }

    pub fn history(&self) -> &[StepId] {
        &self.history
    }

    /// Visited steps in order, ending with the current one.
    pub fn path(&self) -> Vec<StepId> {
        let mut path = self.history.clone();
        path.push(self.current.clone());
        path
    }

    pub fn advance(&mut self, to: StepId) {
        let from = std::mem::replace(&mut self.current, to);
        self.history.push(from);
    }

    pub fn retreat_to(&mut self, target: StepId) {
        if self.history.last() == Some(&target) {
            self.history.pop();
        } else if let Some(position) = self.history.iter().position(|step| step == &target) {
            self.history.truncate(position);
        }
        self.current = target;
    }

    /// Jumps back to an already visited step, forgetting everything after it.
    /// An unvisited target becomes current without touching history.
    pub fn rewind_to(&mut self, target: StepId) {
        if let Some(position) = self.history.iter().position(|step| step == &target) {
            self.history.truncate(position);
        }
        self.current = target;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Moved {
        from: StepId,
        to: StepId,
        cleared: Vec<FieldKey>,
    },
    Blocked {
        step: StepId,
        reason: String,
    },
    Unchanged,
    Closed,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Moved { .. } => "moved",
            Self::Blocked { .. } => "blocked",
            Self::Unchanged => "unchanged",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    Advance(StepId),
    Blocked(String),
    Stay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviousStep {
    Retreat { to: StepId, clear: Vec<FieldKey> },
    Stay,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainViolation {
    pub step: StepId,
    pub reason: String,
}

pub fn scope_for<'a>(
    step: &'a StepDefinition,
    snapshot: &'a StateSnapshot,
    query: Option<&'a RemoteQuery>,
) -> StepScope<'a> {
    StepScope::new(
        step.id(),
        step.read_keys(),
        step.write_keys(),
        snapshot,
        query,
    )
}

pub fn resolve_next(
    registry: &StepRegistry,
    step: &StepDefinition,
    scope: &StepScope<'_>,
) -> Result<NextStep, WizardError> {
    if registry.final_step().id() == step.id() {
        return Ok(NextStep::Stay);
    }

    if let StepCheck::Blocked(reason) = step.check(scope) {
        return Ok(NextStep::Blocked(reason));
    }

    if let Some(next) = step.next_override(scope) {
        if !registry.contains(next.as_str()) {
            return Err(WizardError::UnknownNextStep {
                step: step.id().to_string(),
                next: next.to_string(),
            });
        }
        return Ok(NextStep::Advance(next));
    }

    if step.is_branch_only() {
        return Ok(NextStep::Stay);
    }

    let index = registry.index_of(step.id().as_str())?;
    Ok(match registry.linear_next(index) {
        Some(next) => NextStep::Advance(next.id().clone()),
        None => NextStep::Stay,
    })
}

pub fn resolve_previous(
    registry: &StepRegistry,
    cursor: &StepCursor,
    back_from_first: BackFromFirst,
) -> Result<PreviousStep, WizardError> {
    let target = match cursor.history().last() {
        Some(step) => Some(registry.get(step.as_str())?),
        None => {
            let index = registry.index_of(cursor.current().as_str())?;
            registry.linear_previous(index)
        }
    };

    let Some(target) = target else {
        return Ok(match back_from_first {
            BackFromFirst::Stay => PreviousStep::Stay,
            BackFromFirst::Close => PreviousStep::Close,
        });
    };

    let clear = match target.back_policy() {
        BackPolicy::ClearDownstream => {
            registry.fields_written_after(registry.index_of(target.id().as_str())?)
        }
        BackPolicy::Preserve => Vec::new(),
    };
    Ok(PreviousStep::Retreat {
        to: target.id().clone(),
        clear,
    })
}

/// First step on `path` whose predicate fails against the current snapshot.
pub fn validate_chain(
    registry: &StepRegistry,
    path: &[StepId],
    snapshot: &StateSnapshot,
    queries: &BTreeMap<StepId, RemoteQuery>,
) -> Result<Option<ChainViolation>, WizardError> {
    for step_id in path {
        let step = registry.get(step_id.as_str())?;
        let scope = scope_for(step, snapshot, queries.get(step_id));
        if let StepCheck::Blocked(reason) = step.check(&scope) {
            return Ok(Some(ChainViolation {
                step: step_id.clone(),
                reason,
            }));
        }
    }
    Ok(None)
}
