//! Concrete wizards built on the engine.

pub mod enrollment_import;
pub mod transfer;

use crate::shared::{EndpointId, FieldKey, StepId};

/// Field key for one of the names exported by the flow modules.
pub fn field(name: &'static str) -> FieldKey {
    FieldKey::from_static(name)
}

pub(crate) fn step(name: &'static str) -> StepId {
    StepId::from_static(name)
}

pub(crate) fn endpoint(name: &'static str) -> EndpointId {
    EndpointId::from_static(name)
}
