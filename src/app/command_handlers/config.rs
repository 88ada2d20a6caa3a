use crate::app::cli::CommandOptions;
use crate::app::command_support::{load_settings, map_config_err};
use crate::config::default_global_config_path;

pub fn cmd_config(args: &[String]) -> Result<String, String> {
    if args.is_empty() {
        return Err("usage: config <check|show> [--config <path>]".to_string());
    }
    let options = CommandOptions::parse(&args[1..], &["config"])?;

    match args[0].as_str() {
        "check" => {
            let settings = load_settings(&options)?;
            let path = match options.get("config") {
                Some(path) => path.to_string(),
                None => default_global_config_path()
                    .map_err(map_config_err)?
                    .display()
                    .to_string(),
            };
            let endpoints = settings.backend.resolved_endpoints();
            let mut lines = vec![
                format!("config ok: {path}"),
                format!("backend: {}", settings.backend.base_url.trim_end_matches('/')),
                format!("timeout_seconds: {}", settings.backend.timeout_seconds),
            ];
            if let Some(token_env) = &settings.backend.token_env {
                let present = std::env::var(token_env).is_ok_and(|value| !value.is_empty());
                lines.push(format!(
                    "token_env: {token_env} ({})",
                    if present { "set" } else { "missing" }
                ));
            }
            lines.extend(
                endpoints
                    .iter()
                    .map(|(id, path)| format!("endpoint {id}: {path}")),
            );
            Ok(lines.join("\n"))
        }
        "show" => {
            let settings = load_settings(&options)?;
            serde_yaml::to_string(&settings).map_err(|e| format!("failed to encode settings: {e}"))
        }
        other => Err(format!(
            "unknown config subcommand `{other}`; expected check or show"
        )),
    }
}
