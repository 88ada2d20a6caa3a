#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Transfer,
    Import,
    Config,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "transfer" => CliVerb::Transfer,
        "import" => CliVerb::Import,
        "config" => CliVerb::Config,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  transfer --student <id> [--name <name>] [--audience student|aa] [--config <path>]"
            .to_string(),
        "                                       Request or record a class transfer".to_string(),
        "  import --class <id> [--class-name <name>] [--upload <id>] [--config <path>]"
            .to_string(),
        "                                       Import a roster upload into a class".to_string(),
        "  config check [--config <path>]       Validate the settings file".to_string(),
        "  config show [--config <path>]        Print the effective settings".to_string(),
        "  help                                 Show this help".to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    let mut lines = cli_help_lines();
    lines.push(String::new());
    lines.push("Environment:".to_string());
    lines.push("  EDUFLOW_CONFIG                       Settings file path override".to_string());
    lines.push(
        "  EDUFLOW_SCRIPT_KEYS                  Comma-separated keys replayed instead of a terminal"
            .to_string(),
    );
    lines.join("\n")
}

/// `--flag value` pairs following a verb, restricted to `allowed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOptions {
    values: Vec<(String, String)>,
}

impl CommandOptions {
    pub fn parse(args: &[String], allowed: &[&str]) -> Result<Self, String> {
        let mut values: Vec<(String, String)> = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let Some(name) = arg.strip_prefix("--") else {
                return Err(format!("unexpected argument `{arg}`"));
            };
            if !allowed.contains(&name) {
                return Err(format!(
                    "unknown option `--{name}`; expected one of: {}",
                    allowed
                        .iter()
                        .map(|flag| format!("--{flag}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
            let value = iter
                .next()
                .filter(|value| !value.starts_with("--"))
                .ok_or_else(|| format!("--{name} requires a value"))?;
            if values.iter().any(|(existing, _)| existing == name) {
                return Err(format!("--{name} given more than once"));
            }
            values.push((name.to_string(), value.clone()));
        }
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn require(&self, name: &str) -> Result<&str, String> {
        self.get(name)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| format!("--{name} is required"))
    }
}
