use crate::app::cli::CommandOptions;
use crate::config::{default_state_root, load_settings as config_load_settings, ConfigError, Settings};
use crate::host::{DispatchMode, WizardDriver};
use crate::remote::{BackendApi, HttpBackend, QueryCache};
use crate::shared::{FieldKey, WizardLog};
use crate::tui::{run_wizard_tui, TuiExit};
use crate::wizard::{FieldValue, WizardFlow, WizardSession};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub fn map_config_err(err: ConfigError) -> String {
    err.to_string()
}

pub fn load_settings(options: &CommandOptions) -> Result<Settings, String> {
    config_load_settings(options.get("config").map(Path::new)).map_err(map_config_err)
}

/// Log sink for a command; logging is skipped when no home directory exists
/// and no explicit `log_path` is configured.
pub fn wizard_log(settings: &Settings) -> WizardLog {
    match (&settings.log_path, default_state_root()) {
        (Some(path), _) => WizardLog::to_file(path),
        (None, Ok(root)) => WizardLog::to_file(settings.resolved_log_path(&root)),
        (None, Err(_)) => WizardLog::disabled(),
    }
}

pub fn http_backend(settings: &Settings) -> HttpBackend {
    HttpBackend::from_settings(&settings.backend)
}

/// Opens `flow` with `context`, applies `prefill`, and hands the driver to the terminal host.
pub fn drive_wizard<B>(
    flow: WizardFlow,
    context: BTreeMap<FieldKey, FieldValue>,
    prefill: Vec<(FieldKey, FieldValue)>,
    backend: B,
    settings: &Settings,
    log: WizardLog,
) -> Result<TuiExit, String>
where
    B: BackendApi + Clone + Send + 'static,
{
    let flow_name = flow.name().to_string();
    let session = WizardSession::new(Arc::new(flow)).with_log(log.clone());
    let mut driver = WizardDriver::new(
        session,
        backend,
        QueryCache::new(settings.cache.max_entries),
        DispatchMode::Background,
    )
    .with_refetch_on_focus(settings.cache.refetch_on_focus);

    driver.open(context).map_err(|e| e.to_string())?;
    for (key, value) in prefill {
        driver.set(key, value).map_err(|e| e.to_string())?;
    }
    log.info("cli.wizard_started", json!({ "flow": flow_name }));
    let exit = run_wizard_tui(&mut driver)?;
    log.info(
        "cli.wizard_finished",
        json!({
            "flow": flow_name,
            "completed": matches!(exit, TuiExit::Completed(_)),
        }),
    );
    Ok(exit)
}

pub fn render_exit(subject: &str, exit: &TuiExit) -> String {
    match exit {
        TuiExit::Completed(receipt) => {
            let mut line = format!("{subject} submitted: id={} status={}", receipt.id, receipt.status);
            if let Some(created_at) = receipt.created_at {
                line.push_str(&format!(" created_at={}", created_at.to_rfc3339()));
            }
            line
        }
        TuiExit::Cancelled => format!("{subject} cancelled"),
    }
}
