pub mod driver;

pub use driver::{DispatchMode, WizardDriver};
