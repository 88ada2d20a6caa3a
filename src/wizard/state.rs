use crate::shared::{FieldKey, StepId};
use crate::wizard::gate::RemoteQuery;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Opaque reference to a chosen record plus what is needed to display it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionEntity {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub details: Value,
}

impl SelectionEntity {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn details_as<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.details.clone()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    Date(NaiveDate),
    Entity(SelectionEntity),
    Entities(Vec<SelectionEntity>),
    Ids(BTreeSet<String>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&SelectionEntity> {
        match self {
            Self::Entity(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_entities(&self) -> Option<&[SelectionEntity]> {
        match self {
            Self::Entities(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_ids(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Ids(values) => Some(values),
            _ => None,
        }
    }
}

/// Upstream field -> fields derived from it. Clearing or changing an upstream
/// field clears the transitive closure of its dependents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDependencies {
    edges: BTreeMap<FieldKey, BTreeSet<FieldKey>>,
}

impl FieldDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depend(mut self, upstream: &FieldKey, dependents: &[FieldKey]) -> Self {
        self.edges
            .entry(upstream.clone())
            .or_default()
            .extend(dependents.iter().cloned());
        self
    }

    pub fn dependents_of(&self, upstream: &FieldKey) -> Vec<FieldKey> {
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        let mut pending = VecDeque::from([upstream.clone()]);
        while let Some(current) = pending.pop_front() {
            let Some(children) = self.edges.get(&current) else {
                continue;
            };
            for child in children {
                if child == upstream || !seen.insert(child.clone()) {
                    continue;
                }
                ordered.push(child.clone());
                pending.push_back(child.clone());
            }
        }
        ordered
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    pub context: BTreeMap<FieldKey, FieldValue>,
    pub fields: BTreeMap<FieldKey, FieldValue>,
}

impl StateSnapshot {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key).or_else(|| self.context.get(key))
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_text)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(FieldValue::as_flag).unwrap_or(false)
    }

    pub fn date(&self, key: &str) -> Option<NaiveDate> {
        self.get(key).and_then(FieldValue::as_date)
    }

    pub fn entity(&self, key: &str) -> Option<&SelectionEntity> {
        self.get(key).and_then(FieldValue::as_entity)
    }

    pub fn entities(&self, key: &str) -> &[SelectionEntity] {
        self.get(key)
            .and_then(FieldValue::as_entities)
            .unwrap_or(&[])
    }

    pub fn ids(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.get(key).and_then(FieldValue::as_ids)
    }
}

/// Single mutable source of truth for one wizard run.
#[derive(Debug, Clone, Default)]
pub struct WizardState {
    context: BTreeMap<FieldKey, FieldValue>,
    fields: BTreeMap<FieldKey, FieldValue>,
    dependencies: FieldDependencies,
}

impl WizardState {
    pub fn new(dependencies: FieldDependencies) -> Self {
        Self {
            context: BTreeMap::new(),
            fields: BTreeMap::new(),
            dependencies,
        }
    }

    pub fn initialize(&mut self) {
        self.fields.clear();
    }

    pub fn set_context(&mut self, context: BTreeMap<FieldKey, FieldValue>) {
        self.context = context;
    }

    pub fn clear_context(&mut self) {
        self.context.clear();
    }

    /// Returns the dependent fields cleared by this assignment.
    pub fn set(&mut self, key: FieldKey, value: FieldValue) -> Vec<FieldKey> {
        if self.fields.get(&key) == Some(&value) {
            return Vec::new();
        }
        let cleared = self.clear_dependents(&key);
        self.fields.insert(key, value);
        cleared
    }

    pub fn clear(&mut self, key: &FieldKey) -> Vec<FieldKey> {
        let mut cleared = Vec::new();
        if self.fields.remove(key).is_some() {
            cleared.push(key.clone());
        }
        cleared.extend(self.clear_dependents(key));
        cleared
    }

    fn clear_dependents(&mut self, key: &FieldKey) -> Vec<FieldKey> {
        self.dependencies
            .dependents_of(key)
            .into_iter()
            .filter(|dependent| self.fields.remove(dependent).is_some())
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key).or_else(|| self.context.get(key))
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            context: self.context.clone(),
            fields: self.fields.clone(),
        }
    }
}

/// What a single step may see: its declared reads and writes, context fields,
/// and its own remote query. Every other field reads as absent.
pub struct StepScope<'a> {
    step: &'a StepId,
    reads: &'a [FieldKey],
    writes: &'a [FieldKey],
    snapshot: &'a StateSnapshot,
    query: Option<&'a RemoteQuery>,
}

impl<'a> StepScope<'a> {
    pub fn new(
        step: &'a StepId,
        reads: &'a [FieldKey],
        writes: &'a [FieldKey],
        snapshot: &'a StateSnapshot,
        query: Option<&'a RemoteQuery>,
    ) -> Self {
        Self {
            step,
            reads,
            writes,
            snapshot,
            query,
        }
    }

    pub fn step(&self) -> &StepId {
        self.step
    }

    fn visible(&self, key: &str) -> bool {
        self.reads.iter().any(|k| k.as_str() == key)
            || self.writes.iter().any(|k| k.as_str() == key)
            || self.snapshot.context.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&'a FieldValue> {
        if !self.visible(key) {
            return None;
        }
        self.snapshot.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&'a str> {
        self.get(key).and_then(FieldValue::as_text)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(FieldValue::as_flag).unwrap_or(false)
    }

    pub fn date(&self, key: &str) -> Option<NaiveDate> {
        self.get(key).and_then(FieldValue::as_date)
    }

    pub fn entity(&self, key: &str) -> Option<&'a SelectionEntity> {
        self.get(key).and_then(FieldValue::as_entity)
    }

    pub fn entities(&self, key: &str) -> &'a [SelectionEntity] {
        self.get(key)
            .and_then(FieldValue::as_entities)
            .unwrap_or(&[])
    }

    pub fn ids(&self, key: &str) -> Option<&'a BTreeSet<String>> {
        self.get(key).and_then(FieldValue::as_ids)
    }

    pub fn query(&self) -> Option<&'a RemoteQuery> {
        self.query
    }

    pub fn query_data<T: DeserializeOwned>(&self) -> Option<T> {
        self.query
            .and_then(RemoteQuery::data)
            .and_then(|data| serde_json::from_value(data.clone()).ok())
    }
}
