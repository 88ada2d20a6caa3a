use crate::remote::types::{CacheTag, QueryKey};
use crate::shared::{FieldKey, StepId};
use crate::wizard::error::RegistryError;
use crate::wizard::state::StepScope;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Outcome of a step predicate. A blocked step is normal control flow, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepCheck {
    Ready,
    Blocked(String),
}

impl StepCheck {
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked(reason.into())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Ready => None,
            Self::Blocked(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackPolicy {
    /// Returning to this step clears every field written by later steps.
    #[default]
    ClearDownstream,
    Preserve,
}

pub type AdvancePredicate = Arc<dyn Fn(&StepScope<'_>) -> StepCheck + Send + Sync>;
pub type NextResolver = Arc<dyn Fn(&StepScope<'_>) -> Option<StepId> + Send + Sync>;
pub type QueryKeyFn = Arc<dyn Fn(&StepScope<'_>) -> Option<QueryKey> + Send + Sync>;
pub type QueryTagsFn = Arc<dyn Fn(&QueryKey) -> Vec<CacheTag> + Send + Sync>;

fn check_shape<T: DeserializeOwned>(value: &Value) -> Result<(), String> {
    serde_json::from_value::<T>(value.clone())
        .map(|_| ())
        .map_err(|err| err.to_string())
}

fn no_tags(_: &QueryKey) -> Vec<CacheTag> {
    Vec::new()
}

fn always_ready(_: &StepScope<'_>) -> StepCheck {
    StepCheck::Ready
}

/// Remote read a step depends on, keyed on the selections visible to that step.
#[derive(Clone)]
pub struct StepQuery {
    key: QueryKeyFn,
    tags: QueryTagsFn,
    shape: fn(&Value) -> Result<(), String>,
}

impl StepQuery {
    /// `T` is the response contract; data that does not decode as `T` is treated as malformed.
    pub fn new<T, F>(key: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(&StepScope<'_>) -> Option<QueryKey> + Send + Sync + 'static,
    {
        Self {
            key: Arc::new(key),
            tags: Arc::new(no_tags),
            shape: check_shape::<T>,
        }
    }

    pub fn with_tags<F>(mut self, tags: F) -> Self
    where
        F: Fn(&QueryKey) -> Vec<CacheTag> + Send + Sync + 'static,
    {
        self.tags = Arc::new(tags);
        self
    }

    pub fn key_for(&self, scope: &StepScope<'_>) -> Option<QueryKey> {
        (self.key)(scope)
    }

    pub fn tags_for(&self, key: &QueryKey) -> Vec<CacheTag> {
        (self.tags)(key)
    }

    pub fn check_shape(&self, value: &Value) -> Result<(), String> {
        (self.shape)(value)
    }
}

impl std::fmt::Debug for StepQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepQuery").finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct StepDefinition {
    id: StepId,
    label: String,
    reads: Vec<FieldKey>,
    writes: Vec<FieldKey>,
    branch_only: bool,
    back_policy: BackPolicy,
    check: AdvancePredicate,
    resolve_next: Option<NextResolver>,
    query: Option<StepQuery>,
}

impl StepDefinition {
    pub fn new(id: StepId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            reads: Vec::new(),
            writes: Vec::new(),
            branch_only: false,
            back_policy: BackPolicy::default(),
            check: Arc::new(always_ready),
            resolve_next: None,
            query: None,
        }
    }

    pub fn reads(mut self, keys: impl IntoIterator<Item = FieldKey>) -> Self {
        self.reads.extend(keys);
        self
    }

    pub fn writes(mut self, keys: impl IntoIterator<Item = FieldKey>) -> Self {
        self.writes.extend(keys);
        self
    }

    /// Marks a side path reachable only through another step's resolver.
    pub fn branch_only(mut self) -> Self {
        self.branch_only = true;
        self
    }

    pub fn with_back_policy(mut self, policy: BackPolicy) -> Self {
        self.back_policy = policy;
        self
    }

    pub fn with_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&StepScope<'_>) -> StepCheck + Send + Sync + 'static,
    {
        self.check = Arc::new(check);
        self
    }

    pub fn with_next<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&StepScope<'_>) -> Option<StepId> + Send + Sync + 'static,
    {
        self.resolve_next = Some(Arc::new(resolve));
        self
    }

    pub fn with_query(mut self, query: StepQuery) -> Self {
        self.query = Some(query);
        self
    }

    pub fn id(&self) -> &StepId {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn read_keys(&self) -> &[FieldKey] {
        &self.reads
    }

    pub fn write_keys(&self) -> &[FieldKey] {
        &self.writes
    }

    pub fn is_branch_only(&self) -> bool {
        self.branch_only
    }

    pub fn back_policy(&self) -> BackPolicy {
        self.back_policy
    }

    pub fn query(&self) -> Option<&StepQuery> {
        self.query.as_ref()
    }

    pub fn has_resolver(&self) -> bool {
        self.resolve_next.is_some()
    }

    pub fn check(&self, scope: &StepScope<'_>) -> StepCheck {
        (self.check)(scope)
    }

    pub fn next_override(&self, scope: &StepScope<'_>) -> Option<StepId> {
        self.resolve_next.as_ref().and_then(|resolve| resolve(scope))
    }
}

impl std::fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .field("branch_only", &self.branch_only)
            .field("back_policy", &self.back_policy)
            .field("has_resolver", &self.resolve_next.is_some())
            .field("query", &self.query)
            .finish()
    }
}

/// Fixed, ordered catalogue of steps for one flow.
#[derive(Debug, Clone)]
pub struct StepRegistry {
    steps: Vec<StepDefinition>,
}

impl StepRegistry {
    pub fn register(steps: Vec<StepDefinition>) -> Result<Self, RegistryError> {
        let Some(first) = steps.first() else {
            return Err(RegistryError::Configuration(
                "at least one step is required".to_string(),
            ));
        };
        if first.branch_only {
            return Err(RegistryError::Configuration(format!(
                "first step `{}` cannot be branch-only",
                first.id
            )));
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.id.as_str()) {
                return Err(RegistryError::Configuration(format!(
                    "duplicate step id `{}`",
                    step.id
                )));
            }
        }

        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.iter()
    }

    pub fn step_at(&self, index: usize) -> Result<&StepDefinition, RegistryError> {
        self.steps
            .get(index)
            .ok_or(RegistryError::IndexOutOfRange {
                index,
                len: self.steps.len(),
            })
    }

    pub fn index_of(&self, step_id: &str) -> Result<usize, RegistryError> {
        self.steps
            .iter()
            .position(|step| step.id.as_str() == step_id)
            .ok_or_else(|| RegistryError::NotFound {
                step: step_id.to_string(),
            })
    }

    pub fn get(&self, step_id: &str) -> Result<&StepDefinition, RegistryError> {
        let index = self.index_of(step_id)?;
        self.step_at(index)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.index_of(step_id).is_ok()
    }

    pub fn first(&self) -> &StepDefinition {
        &self.steps[0]
    }

    /// Last linear step; the only step allowed to submit.
    pub fn final_step(&self) -> &StepDefinition {
        self.steps
            .iter()
            .rev()
            .find(|step| !step.branch_only)
            .unwrap_or(&self.steps[0])
    }

    pub fn linear_next(&self, index: usize) -> Option<&StepDefinition> {
        self.steps
            .iter()
            .skip(index + 1)
            .find(|step| !step.branch_only)
    }

    pub fn linear_previous(&self, index: usize) -> Option<&StepDefinition> {
        self.steps
            .iter()
            .take(index)
            .rev()
            .find(|step| !step.branch_only)
    }

    pub fn linear_steps(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.iter().filter(|step| !step.branch_only)
    }

    pub fn fields_written_after(&self, index: usize) -> Vec<FieldKey> {
        self.steps
            .iter()
            .skip(index + 1)
            .flat_map(|step| step.writes.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
