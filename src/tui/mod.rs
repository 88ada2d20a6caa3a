pub mod keys;
pub mod render;
pub mod run;
pub mod view;

pub use keys::{parse_scripted_keys, wizard_action_from_key, KeyMode, WizardKeyAction};
pub use run::{run_scripted, run_wizard_tui, TuiExit, WizardTui};
pub use view::{project_screen, ItemEdit, ScreenItem, WizardScreen};
