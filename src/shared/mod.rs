pub mod ids;
pub mod logging;

pub use ids::{EndpointId, FieldKey, InvalidId, StepId};
pub use logging::WizardLog;
