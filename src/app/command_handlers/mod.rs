use crate::app::cli::{help_text, parse_cli_verb, CliVerb};

pub mod config;
pub mod import;
pub mod transfer;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }

    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Transfer => transfer::cmd_transfer(&args[1..]),
        CliVerb::Import => import::cmd_import(&args[1..]),
        CliVerb::Config => config::cmd_config(&args[1..]),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}
