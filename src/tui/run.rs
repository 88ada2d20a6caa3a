use crate::host::WizardDriver;
use crate::remote::{BackendApi, SubmissionReceipt};
use crate::tui::keys::{load_scripted_keys, wizard_action_from_key, KeyMode, WizardKeyAction};
use crate::tui::render::draw_wizard_screen;
use crate::tui::view::{project_screen, EditCommand, TextInput, WizardScreen};
use crate::wizard::{FieldValue, SubmissionResult, SubmitOutcome, Transition, WizardError};
use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, DisableFocusChange, EnableFocusChange, Event, KeyEvent};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io::{self, IsTerminal, Write};
use std::time::Duration;

const INPUT_POLL_MS: u64 = 250;
const SCRIPT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TuiExit {
    Completed(SubmissionReceipt),
    Cancelled,
}

/// Screen-local state layered over a driven session.
#[derive(Debug, Default)]
pub struct WizardTui {
    selected: usize,
    input: Option<TextInput>,
    notice: Option<String>,
}

impl WizardTui {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn screen<B>(&self, driver: &WizardDriver<B>) -> WizardScreen
    where
        B: BackendApi + Clone + Send + 'static,
    {
        project_screen(
            &driver.session().view(),
            self.selected,
            self.input.as_ref(),
            self.notice.as_deref(),
        )
    }

    pub fn handle_key<B>(&mut self, driver: &mut WizardDriver<B>, key: KeyEvent) -> Option<TuiExit>
    where
        B: BackendApi + Clone + Send + 'static,
    {
        let mode = if self.input.is_some() {
            KeyMode::TextInput
        } else {
            KeyMode::Navigate
        };
        let action = wizard_action_from_key(mode, key)?;
        self.apply(driver, action)
    }

    pub fn apply<B>(
        &mut self,
        driver: &mut WizardDriver<B>,
        action: WizardKeyAction,
    ) -> Option<TuiExit>
    where
        B: BackendApi + Clone + Send + 'static,
    {
        match action {
            WizardKeyAction::MoveUp => {
                self.selected = self.selected.saturating_sub(1);
            }
            WizardKeyAction::MoveDown => {
                let count = self.screen(driver).items.len();
                if self.selected + 1 < count {
                    self.selected += 1;
                }
            }
            WizardKeyAction::Activate => {
                self.notice = None;
                let screen = self.screen(driver);
                let snapshot = driver.session().snapshot();
                let command = screen
                    .items
                    .get(screen.selected)
                    .and_then(|item| item.edit.command(&snapshot));
                match command {
                    Some(EditCommand::Set(key, value)) => self.report(driver.set(key, value)),
                    Some(EditCommand::Clear(key)) => self.report(driver.clear(&key)),
                    Some(EditCommand::BeginInput { key, initial }) => {
                        self.input = Some(TextInput {
                            key,
                            buffer: initial,
                        });
                    }
                    None => {}
                }
            }
            WizardKeyAction::Next => {
                self.notice = None;
                match driver.next() {
                    Ok(Transition::Moved { .. }) => self.selected = 0,
                    Ok(Transition::Blocked { reason, .. }) => self.notice = Some(reason),
                    Ok(Transition::Unchanged) if driver.session().view().is_final => {
                        self.notice = Some("Press s to submit.".to_string());
                    }
                    Ok(_) => {}
                    Err(err) => self.notice = Some(err.to_string()),
                }
            }
            WizardKeyAction::Previous => {
                self.notice = None;
                match driver.previous() {
                    Ok(Transition::Closed) => return Some(TuiExit::Cancelled),
                    Ok(Transition::Moved { .. }) => self.selected = 0,
                    Ok(_) => {}
                    Err(err) => self.notice = Some(err.to_string()),
                }
            }
            WizardKeyAction::Submit => {
                self.notice = match driver.submit() {
                    Ok(SubmitOutcome::Dispatched(_)) => None,
                    Ok(SubmitOutcome::InFlight) => {
                        Some("A submission is already in progress.".to_string())
                    }
                    Ok(SubmitOutcome::Blocked(violation)) => Some(format!(
                        "Cannot submit yet ({}): {}",
                        violation.step, violation.reason
                    )),
                    Err(err) => Some(err.to_string()),
                };
            }
            WizardKeyAction::Retry => {
                self.notice = None;
                self.report(driver.retry());
            }
            WizardKeyAction::Refresh => {
                self.notice = None;
                driver.focus();
            }
            WizardKeyAction::Quit => {
                driver.close();
                return Some(TuiExit::Cancelled);
            }
            WizardKeyAction::InputChar(ch) => {
                if let Some(input) = self.input.as_mut() {
                    input.buffer.push(ch);
                }
            }
            WizardKeyAction::InputBackspace => {
                if let Some(input) = self.input.as_mut() {
                    input.buffer.pop();
                }
            }
            WizardKeyAction::InputCommit => {
                if let Some(TextInput { key, buffer }) = self.input.take() {
                    let result = if buffer.trim().is_empty() {
                        driver.clear(&key)
                    } else {
                        driver.set(key, FieldValue::text(buffer))
                    };
                    self.report(result);
                }
            }
            WizardKeyAction::InputCancel => {
                self.input = None;
            }
        }
        self.settle(driver)
    }

    /// Exit once the driver has recorded a completed submission.
    pub fn settle<B>(&mut self, driver: &WizardDriver<B>) -> Option<TuiExit>
    where
        B: BackendApi + Clone + Send + 'static,
    {
        match driver.last_result() {
            Some(SubmissionResult::Completed(receipt)) => Some(TuiExit::Completed(receipt.clone())),
            _ => None,
        }
    }

    fn report(&mut self, result: Result<(), WizardError>) {
        if let Err(err) = result {
            self.notice = Some(err.to_string());
        }
    }
}

fn is_interactive_terminal() -> bool {
    io::stdin().is_terminal() && io::stdout().is_terminal()
}

/// Drives an opened wizard until it completes or the user leaves.
pub fn run_wizard_tui<B>(driver: &mut WizardDriver<B>) -> Result<TuiExit, String>
where
    B: BackendApi + Clone + Send + 'static,
{
    if let Some(keys) = load_scripted_keys()? {
        return run_scripted(driver, keys);
    }
    if !is_interactive_terminal() {
        return Err(
            "the wizard needs an interactive terminal; set EDUFLOW_SCRIPT_KEYS to script it"
                .to_string(),
        );
    }

    let mut guard = ScreenGuard::enter(io::stdout())?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
        .map_err(|e| format!("failed to create wizard terminal: {e}"))?;
    let result = run_wizard_loop(driver, &mut terminal);
    guard.restore()?;
    result
}

/// Raw mode plus alternate screen, undone on every exit path.
struct ScreenGuard<W: Write> {
    out: W,
    armed: bool,
}

impl<W: Write> ScreenGuard<W> {
    fn enter(out: W) -> Result<Self, String> {
        enable_raw_mode().map_err(|e| format!("failed to enable raw mode: {e}"))?;
        let mut guard = Self::armed(out);
        execute!(guard.out, EnterAlternateScreen, Hide, EnableFocusChange)
            .map_err(|e| format!("failed to enter wizard screen: {e}"))?;
        Ok(guard)
    }

    fn armed(out: W) -> Self {
        Self { out, armed: true }
    }

    fn restore(&mut self) -> Result<(), String> {
        if !self.armed {
            return Ok(());
        }
        self.armed = false;
        let raw = disable_raw_mode().map_err(|e| format!("failed to disable raw mode: {e}"));
        execute!(self.out, DisableFocusChange, Show, LeaveAlternateScreen)
            .map_err(|e| format!("failed to leave wizard screen: {e}"))?;
        raw
    }
}

impl<W: Write> Drop for ScreenGuard<W> {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

fn run_wizard_loop<B>(
    driver: &mut WizardDriver<B>,
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
) -> Result<TuiExit, String>
where
    B: BackendApi + Clone + Send + 'static,
{
    let mut tui = WizardTui::new();
    loop {
        driver.poll();
        if let Some(exit) = tui.settle(driver) {
            return Ok(exit);
        }
        let screen = tui.screen(driver);
        terminal
            .draw(|frame| draw_wizard_screen(frame, &screen))
            .map_err(|e| format!("failed to render wizard: {e}"))?;
        if !event::poll(Duration::from_millis(INPUT_POLL_MS))
            .map_err(|e| format!("failed to poll wizard input: {e}"))?
        {
            continue;
        }
        match event::read().map_err(|e| format!("failed to read wizard input: {e}"))? {
            Event::Key(key) => {
                if let Some(exit) = tui.handle_key(driver, key) {
                    return Ok(exit);
                }
            }
            Event::FocusGained => driver.focus(),
            _ => {}
        }
    }
}

/// Replays `keys` without a terminal, waiting for remote work between keys.
pub fn run_scripted<B>(driver: &mut WizardDriver<B>, keys: Vec<KeyEvent>) -> Result<TuiExit, String>
where
    B: BackendApi + Clone + Send + 'static,
{
    let mut tui = WizardTui::new();
    for key in keys {
        if !driver.wait_idle(SCRIPT_IDLE_TIMEOUT) {
            return Err("timed out waiting for the backend".to_string());
        }
        if let Some(exit) = tui.settle(driver) {
            return Ok(exit);
        }
        if let Some(exit) = tui.handle_key(driver, key) {
            return Ok(exit);
        }
    }
    if !driver.wait_idle(SCRIPT_IDLE_TIMEOUT) {
        return Err("timed out waiting for the backend".to_string());
    }
    tui.settle(driver).ok_or_else(|| {
        format!(
            "scripted keys ended before the wizard finished; status: {}",
            tui.screen(driver).status
        )
    })
}
