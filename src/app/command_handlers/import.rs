use crate::app::cli::CommandOptions;
use crate::app::command_support::{drive_wizard, http_backend, load_settings, render_exit, wizard_log};
use crate::flows::enrollment_import::{import_context, import_flow, UPLOAD_ID};
use crate::flows::field;
use crate::wizard::FieldValue;

pub fn cmd_import(args: &[String]) -> Result<String, String> {
    let options = CommandOptions::parse(args, &["class", "class-name", "upload", "config"])?;
    let class_id = options.require("class")?.to_string();
    let class_name = options.get("class-name").unwrap_or(&class_id).to_string();
    let settings = load_settings(&options)?;

    let prefill = options
        .get("upload")
        .map(str::trim)
        .filter(|upload| !upload.is_empty())
        .map(|upload| vec![(field(UPLOAD_ID), FieldValue::text(upload))])
        .unwrap_or_default();
    let flow = import_flow(settings.wizard.back_from_first).map_err(|e| e.to_string())?;
    let exit = drive_wizard(
        flow,
        import_context(&class_id, &class_name),
        prefill,
        http_backend(&settings),
        &settings,
        wizard_log(&settings),
    )?;
    Ok(render_exit("enrollment import", &exit))
}
