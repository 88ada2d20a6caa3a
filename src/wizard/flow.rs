use crate::remote::types::CacheTag;
use crate::shared::{EndpointId, FieldKey, StepId};
use crate::wizard::error::RegistryError;
use crate::wizard::registry::StepRegistry;
use crate::wizard::state::{FieldDependencies, StateSnapshot};
pub use crate::wizard::transitions::BackFromFirst;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type PayloadBuilder = Arc<dyn Fn(&StateSnapshot) -> Result<Value, String> + Send + Sync>;
pub type InvalidationFn = Arc<dyn Fn(&StateSnapshot) -> Vec<CacheTag> + Send + Sync>;

fn no_invalidation(_: &StateSnapshot) -> Vec<CacheTag> {
    Vec::new()
}

/// Where a stale-reference rejection sends the run, and which selections it voids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleReference {
    pub step: StepId,
    pub fields: Vec<FieldKey>,
}

/// The mutation a flow's final step dispatches.
#[derive(Clone)]
pub struct SubmissionSpec {
    endpoint: EndpointId,
    payload: PayloadBuilder,
    invalidates: InvalidationFn,
    stale_references: BTreeMap<String, StaleReference>,
}

impl SubmissionSpec {
    pub fn new<F>(endpoint: EndpointId, payload: F) -> Self
    where
        F: Fn(&StateSnapshot) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            endpoint,
            payload: Arc::new(payload),
            invalidates: Arc::new(no_invalidation),
            stale_references: BTreeMap::new(),
        }
    }

    pub fn with_invalidation<F>(mut self, tags: F) -> Self
    where
        F: Fn(&StateSnapshot) -> Vec<CacheTag> + Send + Sync + 'static,
    {
        self.invalidates = Arc::new(tags);
        self
    }

    /// A rejection carrying `code` sends the session back to `step` and clears
    /// `fields` there. Everything else the user entered is kept.
    pub fn with_stale_reference(
        mut self,
        code: &str,
        step: StepId,
        fields: impl IntoIterator<Item = FieldKey>,
    ) -> Self {
        self.stale_references.insert(
            code.trim().to_ascii_uppercase(),
            StaleReference {
                step,
                fields: fields.into_iter().collect(),
            },
        );
        self
    }

    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    pub fn build_payload(&self, snapshot: &StateSnapshot) -> Result<Value, String> {
        (self.payload)(snapshot)
    }

    pub fn invalidation_tags(&self, snapshot: &StateSnapshot) -> Vec<CacheTag> {
        (self.invalidates)(snapshot)
    }

    pub fn stale_reference(&self, code: &str) -> Option<&StaleReference> {
        self.stale_references.get(code)
    }
}

impl std::fmt::Debug for SubmissionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionSpec")
            .field("endpoint", &self.endpoint)
            .field("stale_references", &self.stale_references)
            .finish_non_exhaustive()
    }
}

/// Everything needed to run one kind of wizard.
#[derive(Debug, Clone)]
pub struct WizardFlow {
    name: String,
    registry: StepRegistry,
    dependencies: FieldDependencies,
    submission: SubmissionSpec,
    back_from_first: BackFromFirst,
}

impl WizardFlow {
    pub fn new(
        name: impl Into<String>,
        registry: StepRegistry,
        submission: SubmissionSpec,
    ) -> Result<Self, RegistryError> {
        for (code, stale) in &submission.stale_references {
            let step = &stale.step;
            let Ok(definition) = registry.get(step.as_str()) else {
                return Err(RegistryError::Configuration(format!(
                    "rejection code `{code}` maps to unregistered step `{step}`"
                )));
            };
            if let Some(field) = stale
                .fields
                .iter()
                .find(|field| !definition.write_keys().contains(*field))
            {
                return Err(RegistryError::Configuration(format!(
                    "rejection code `{code}` clears `{field}`, which step `{step}` does not write"
                )));
            }
        }
        Ok(Self {
            name: name.into(),
            registry,
            dependencies: FieldDependencies::new(),
            submission,
            back_from_first: BackFromFirst::default(),
        })
    }

    pub fn with_dependencies(mut self, dependencies: FieldDependencies) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_back_from_first(mut self, behaviour: BackFromFirst) -> Self {
        self.back_from_first = behaviour;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn dependencies(&self) -> &FieldDependencies {
        &self.dependencies
    }

    pub fn submission(&self) -> &SubmissionSpec {
        &self.submission
    }

    pub fn back_from_first(&self) -> BackFromFirst {
        self.back_from_first
    }
}
