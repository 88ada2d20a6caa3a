use crate::app::cli::CommandOptions;
use crate::app::command_support::{drive_wizard, http_backend, load_settings, render_exit, wizard_log};
use crate::flows::transfer::{
    enrollments_query, transfer_context, transfer_flow, EnrolledClass, TransferAudience,
    TransferFlowConfig,
};
use crate::remote::BackendApi;

pub fn cmd_transfer(args: &[String]) -> Result<String, String> {
    let options = CommandOptions::parse(args, &["student", "name", "audience", "config"])?;
    let student_id = options.require("student")?.to_string();
    let audience = TransferAudience::parse(options.get("audience").unwrap_or("student"))?;
    let settings = load_settings(&options)?;
    let backend = http_backend(&settings);

    let enrollments = load_enrollments(&backend, &student_id)?;
    if enrollments.is_empty() {
        return Err(format!("student `{student_id}` has no active enrollments"));
    }
    let student_name = options.get("name").unwrap_or(&student_id).to_string();
    let flow = transfer_flow(TransferFlowConfig::from_settings(audience, &settings.wizard))
        .map_err(|e| e.to_string())?;
    let exit = drive_wizard(
        flow,
        transfer_context(&student_id, &student_name, &enrollments),
        Vec::new(),
        backend,
        &settings,
        wizard_log(&settings),
    )?;
    Ok(render_exit("transfer request", &exit))
}

pub fn load_enrollments(
    backend: &impl BackendApi,
    student_id: &str,
) -> Result<Vec<EnrolledClass>, String> {
    let value = backend
        .fetch(&enrollments_query(student_id))
        .map_err(|e| format!("failed to load enrollments: {}", e.user_message()))?;
    serde_json::from_value(value).map_err(|e| format!("invalid enrollments response: {e}"))
}
