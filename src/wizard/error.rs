use crate::wizard::session::SessionPhase;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid step registry: {0}")]
    Configuration(String),
    #[error("step `{step}` is not registered")]
    NotFound { step: String },
    #[error("step index {index} is out of range for {len} registered steps")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WizardError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("step `{step}` resolved to unknown next step `{next}`")]
    UnknownNextStep { step: String, next: String },
    #[error("field `{field}` is not writable from step `{step}`")]
    FieldNotWritable { step: String, field: String },
    #[error("operation `{operation}` is not allowed while the wizard is {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: SessionPhase,
    },
    #[error("step `{step}` is not the final step and cannot submit")]
    NotAtFinalStep { step: String },
    #[error("submission payload could not be built: {0}")]
    Payload(String),
}
