pub mod error;
pub mod flow;
pub mod gate;
pub mod registry;
pub mod session;
pub mod state;
pub mod transitions;

pub use error::{RegistryError, WizardError};
pub use flow::{BackFromFirst, StaleReference, SubmissionSpec, WizardFlow};
pub use gate::{AsyncStepGate, GateState, RemoteQuery};
pub use registry::{BackPolicy, StepCheck, StepDefinition, StepQuery, StepRegistry};
pub use session::{
    Delivery, SessionEvent, SessionPhase, SessionView, StepOutcome, StepSummary,
    SubmissionResult, SubmitOutcome, WizardSession,
};
pub use state::{
    FieldDependencies, FieldValue, SelectionEntity, StateSnapshot, StepScope, WizardState,
};
pub use transitions::{ChainViolation, StepCursor, Transition};
