use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

pub const SCRIPT_KEYS_ENV: &str = "EDUFLOW_SCRIPT_KEYS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardKeyAction {
    MoveUp,
    MoveDown,
    /// Apply the highlighted item to the wizard state.
    Activate,
    Next,
    Previous,
    Submit,
    Retry,
    Refresh,
    Quit,
    InputChar(char),
    InputBackspace,
    InputCommit,
    InputCancel,
}

/// Whether keystrokes navigate the screen or edit a text field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Navigate,
    TextInput,
}

pub fn wizard_action_from_key(mode: KeyMode, key: KeyEvent) -> Option<WizardKeyAction> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(WizardKeyAction::Quit);
    }

    match mode {
        KeyMode::TextInput => match key.code {
            KeyCode::Enter => Some(WizardKeyAction::InputCommit),
            KeyCode::Esc => Some(WizardKeyAction::InputCancel),
            KeyCode::Backspace => Some(WizardKeyAction::InputBackspace),
            KeyCode::Char(ch) => Some(WizardKeyAction::InputChar(ch)),
            _ => None,
        },
        KeyMode::Navigate => match key.code {
            KeyCode::Up | KeyCode::Char('k') => Some(WizardKeyAction::MoveUp),
            KeyCode::Down | KeyCode::Char('j') => Some(WizardKeyAction::MoveDown),
            KeyCode::Enter | KeyCode::Char(' ') => Some(WizardKeyAction::Activate),
            KeyCode::Right | KeyCode::Char('n') => Some(WizardKeyAction::Next),
            KeyCode::Left | KeyCode::Esc | KeyCode::Char('b') => Some(WizardKeyAction::Previous),
            KeyCode::Char('s') => Some(WizardKeyAction::Submit),
            KeyCode::Char('r') => Some(WizardKeyAction::Retry),
            KeyCode::Char('f') => Some(WizardKeyAction::Refresh),
            KeyCode::Char('q') => Some(WizardKeyAction::Quit),
            _ => None,
        },
    }
}

/// Parses a comma-separated key script such as `down,enter,right,text:hello`.
///
/// `text:<value>` expands to one character key per character of `value`.
pub fn parse_scripted_keys(raw: &str) -> Result<Vec<KeyEvent>, String> {
    let mut keys = Vec::new();
    for token in raw.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(text) = trimmed.strip_prefix("text:") {
            keys.extend(
                text.chars()
                    .map(|ch| KeyEvent::new(KeyCode::Char(ch), KeyModifiers::NONE)),
            );
            continue;
        }
        let key = match trimmed.to_ascii_lowercase().as_str() {
            "up" => KeyEvent::new(KeyCode::Up, KeyModifiers::NONE),
            "down" => KeyEvent::new(KeyCode::Down, KeyModifiers::NONE),
            "left" => KeyEvent::new(KeyCode::Left, KeyModifiers::NONE),
            "right" => KeyEvent::new(KeyCode::Right, KeyModifiers::NONE),
            "enter" => KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE),
            "esc" => KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE),
            "backspace" => KeyEvent::new(KeyCode::Backspace, KeyModifiers::NONE),
            "space" => KeyEvent::new(KeyCode::Char(' '), KeyModifiers::NONE),
            "ctrl-c" => KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
            "s" => KeyEvent::new(KeyCode::Char('s'), KeyModifiers::NONE),
            "r" => KeyEvent::new(KeyCode::Char('r'), KeyModifiers::NONE),
            "f" => KeyEvent::new(KeyCode::Char('f'), KeyModifiers::NONE),
            "q" => KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE),
            other => {
                return Err(format!(
                    "invalid {SCRIPT_KEYS_ENV} token `{other}`; valid tokens: up,down,left,right,enter,esc,backspace,space,ctrl-c,s,r,f,q,text:<value>"
                ));
            }
        };
        keys.push(key);
    }
    Ok(keys)
}

pub fn load_scripted_keys() -> Result<Option<Vec<KeyEvent>>, String> {
    let Ok(raw) = std::env::var(SCRIPT_KEYS_ENV) else {
        return Ok(None);
    };
    parse_scripted_keys(&raw).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_events_are_ignored() {
        let mut key = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        key.kind = KeyEventKind::Release;
        assert_eq!(wizard_action_from_key(KeyMode::Navigate, key), None);
    }

    #[test]
    fn letters_are_text_while_editing() {
        let key = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert_eq!(
            wizard_action_from_key(KeyMode::TextInput, key),
            Some(WizardKeyAction::InputChar('q'))
        );
        assert_eq!(
            wizard_action_from_key(KeyMode::Navigate, key),
            Some(WizardKeyAction::Quit)
        );
    }
}
