//! Pure projection of a [`SessionView`] into what the terminal draws.

use crate::flows::enrollment_import::{self, ImportPreview, ImportRow};
use crate::flows::field;
use crate::flows::transfer::{self, Eligibility, TransferOption, TransferPath};
use crate::remote::RemoteError;
use crate::shared::FieldKey;
use crate::wizard::{FieldValue, SessionPhase, SessionView, StateSnapshot};
use std::collections::BTreeSet;

pub const NAVIGATE_HINT: &str =
    "Up/Down move | Enter choose | Right next | Left back | s submit | r retry | q quit";
pub const INPUT_HINT: &str = "Type to edit | Enter save | Esc cancel";

/// What activating a screen item does to the wizard state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemEdit {
    Set { key: FieldKey, value: FieldValue },
    Toggle { key: FieldKey },
    ToggleId { key: FieldKey, id: String },
    Input { key: FieldKey },
    ReadOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditCommand {
    Set(FieldKey, FieldValue),
    Clear(FieldKey),
    BeginInput { key: FieldKey, initial: String },
}

impl ItemEdit {
    pub fn command(&self, snapshot: &StateSnapshot) -> Option<EditCommand> {
        match self {
            Self::Set { key, value } => Some(EditCommand::Set(key.clone(), value.clone())),
            Self::Toggle { key } => Some(EditCommand::Set(
                key.clone(),
                FieldValue::Flag(!snapshot.flag(key.as_str())),
            )),
            Self::ToggleId { key, id } => {
                let mut ids = snapshot.ids(key.as_str()).cloned().unwrap_or_default();
                if !ids.remove(id) {
                    ids.insert(id.clone());
                }
                if ids.is_empty() {
                    Some(EditCommand::Clear(key.clone()))
                } else {
                    Some(EditCommand::Set(key.clone(), FieldValue::Ids(ids)))
                }
            }
            Self::Input { key } => Some(EditCommand::BeginInput {
                key: key.clone(),
                initial: snapshot.text(key.as_str()).unwrap_or_default().to_string(),
            }),
            Self::ReadOnly => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenItem {
    pub label: String,
    pub detail: String,
    /// The item reflects the value currently held in the wizard state.
    pub chosen: bool,
    pub edit: ItemEdit,
}

impl ScreenItem {
    fn new(label: impl Into<String>, edit: ItemEdit) -> Self {
        Self {
            label: label.into(),
            detail: String::new(),
            chosen: false,
            edit,
        }
    }

    fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    fn chosen(mut self, chosen: bool) -> Self {
        self.chosen = chosen;
        self
    }
}

/// Text field being edited in place of the item list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextInput {
    pub key: FieldKey,
    pub buffer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardScreen {
    pub title: String,
    pub progress: String,
    pub info: Vec<String>,
    pub items: Vec<ScreenItem>,
    pub selected: usize,
    pub input: Option<TextInput>,
    pub status: String,
    pub hint: &'static str,
    pub can_submit: bool,
}

pub fn flow_title(flow: &str) -> &'static str {
    match flow {
        "student_transfer" => "Request a class transfer",
        "aa_transfer" => "Transfer a student",
        "enrollment_import" => "Import enrollments",
        _ => "Wizard",
    }
}

pub fn clamp_selection(selected: usize, len: usize) -> usize {
    if len == 0 {
        0
    } else {
        selected.min(len - 1)
    }
}

pub fn project_screen(
    view: &SessionView,
    selected: usize,
    input: Option<&TextInput>,
    notice: Option<&str>,
) -> WizardScreen {
    let (info, items) = step_content(view);
    let selected = clamp_selection(selected, items.len());
    let status = match input {
        Some(input) => format!("Editing {}", input.key),
        None => notice
            .map(str::to_string)
            .unwrap_or_else(|| derived_status(view)),
    };

    WizardScreen {
        title: flow_title(&view.flow).to_string(),
        progress: progress_line(view),
        info,
        items,
        selected,
        input: input.cloned(),
        status,
        hint: if input.is_some() {
            INPUT_HINT
        } else {
            NAVIGATE_HINT
        },
        can_submit: view.gate.can_submit && view.is_final,
    }
}

fn progress_line(view: &SessionView) -> String {
    match view.step_number {
        Some(number) => format!(
            "Step {number} of {}: {}",
            view.steps.len(),
            view.step_label
        ),
        None => view.step_label.clone(),
    }
}

pub fn error_status(error: &RemoteError) -> String {
    match error.suggested_action() {
        Some(action) => format!("{} ({})", error.user_message(), action.label()),
        None => error.user_message(),
    }
}

fn derived_status(view: &SessionView) -> String {
    match view.phase {
        SessionPhase::Completed => return "Request submitted.".to_string(),
        SessionPhase::Cancelled | SessionPhase::Closed => return "Wizard closed.".to_string(),
        SessionPhase::Submitting => return "Submitting...".to_string(),
        SessionPhase::Active => {}
    }
    if let Some(error) = &view.error {
        return error_status(error);
    }
    if let Some(query) = &view.query {
        if let Some(error) = query.error() {
            return error_status(error);
        }
        if query.is_loading() && query.data().is_none() {
            return "Loading...".to_string();
        }
    }
    match view.check.reason() {
        Some(reason) => reason.to_string(),
        None if view.is_final => "Ready to submit.".to_string(),
        None => "Ready. Press Right to continue.".to_string(),
    }
}

fn step_content(view: &SessionView) -> (Vec<String>, Vec<ScreenItem>) {
    let step = view.step.as_str();
    match view.flow.as_str() {
        "enrollment_import" => match step {
            enrollment_import::UPLOAD => import_upload(view),
            enrollment_import::REVIEW => import_review(view),
            enrollment_import::CONFIRM => import_confirm(view),
            _ => (Vec::new(), Vec::new()),
        },
        _ => match step {
            transfer::SELECT_SOURCE => transfer_source(view),
            transfer::SELECT_TARGET => transfer_target(view),
            transfer::CONFIRM => transfer_confirm(view),
            transfer::CONTACT_SUPPORT => (
                vec![
                    "Moving to a different class is handled by the academic office.".to_string(),
                    "Go back to request a schedule change instead.".to_string(),
                ],
                Vec::new(),
            ),
            _ => (Vec::new(), Vec::new()),
        },
    }
}

fn query_value<T: serde::de::DeserializeOwned>(view: &SessionView) -> Option<T> {
    let data = view.query.as_ref()?.data()?;
    serde_json::from_value(data.clone()).ok()
}

fn input_item(snapshot: &StateSnapshot, label: &str, key: &'static str, empty: &str) -> ScreenItem {
    let current = snapshot.text(key).unwrap_or_default();
    ScreenItem::new(label, ItemEdit::Input { key: field(key) })
        .detail(if current.is_empty() { empty } else { current })
}

fn transfer_source(view: &SessionView) -> (Vec<String>, Vec<ScreenItem>) {
    let snapshot = &view.snapshot;
    let mut info = Vec::new();
    if let Some(student) = snapshot.entity(transfer::STUDENT) {
        info.push(format!("Student: {}", student.label));
    }
    if let Some(eligibility) = query_value::<Eligibility>(view) {
        info.push(format!(
            "Transfers used: {} of {} ({} remaining)",
            eligibility.quota.used, eligibility.quota.limit, eligibility.quota.remaining
        ));
    }

    let source_id = snapshot.entity(transfer::SOURCE).map(|source| source.id.as_str());
    let mut items: Vec<ScreenItem> = snapshot
        .entities(transfer::ENROLLMENTS)
        .iter()
        .map(|class| {
            ScreenItem::new(
                format!("From {}", class.label),
                ItemEdit::Set {
                    key: field(transfer::SOURCE),
                    value: FieldValue::Entity(class.clone()),
                },
            )
            .chosen(source_id == Some(class.id.as_str()))
        })
        .collect();
    let path = snapshot.text(transfer::PATH).and_then(TransferPath::parse);
    for option in [TransferPath::Schedule, TransferPath::Class] {
        items.push(
            ScreenItem::new(
                option.label(),
                ItemEdit::Set {
                    key: field(transfer::PATH),
                    value: option.value(),
                },
            )
            .chosen(path == Some(option)),
        );
    }
    (info, items)
}

fn option_detail(option: &TransferOption) -> String {
    let mut detail = format!(
        "{} | {} of {} seats left",
        option.schedule.summary,
        option.capacity.remaining(),
        option.capacity.limit
    );
    if option.capacity.is_full() {
        detail.push_str(" | full");
    }
    if option.content_gap.severity.requires_acknowledgement() {
        detail.push_str(&format!(" | {} gap", option.content_gap.severity.as_str()));
    }
    detail
}

fn transfer_target(view: &SessionView) -> (Vec<String>, Vec<ScreenItem>) {
    let snapshot = &view.snapshot;
    let mut info = Vec::new();
    if let Some(source) = snapshot.entity(transfer::SOURCE) {
        info.push(format!("Current class: {}", source.label));
    }
    let mut items = vec![
        input_item(snapshot, "Branch filter", transfer::BRANCH_FILTER, "any"),
        input_item(snapshot, "Modality filter", transfer::MODALITY_FILTER, "any"),
    ];
    let target_id = snapshot.entity(transfer::TARGET).map(|target| target.id.as_str());
    let options = transfer::options_from(view.query.as_ref().and_then(|query| query.data()));
    info.push(format!("{} classes available", options.len()));
    items.extend(options.iter().map(|option| {
        ScreenItem::new(
            format!("{} {}", option.code, option.name),
            ItemEdit::Set {
                key: field(transfer::TARGET),
                value: FieldValue::Entity(option.entity()),
            },
        )
        .detail(option_detail(option))
        .chosen(target_id == Some(option.class_id.as_str()))
    }));
    (info, items)
}

fn transfer_confirm(view: &SessionView) -> (Vec<String>, Vec<ScreenItem>) {
    let snapshot = &view.snapshot;
    let source = snapshot.entity(transfer::SOURCE);
    let target = snapshot.entity(transfer::TARGET);
    let option = target.and_then(|target| target.details_as::<TransferOption>());
    let mut info = vec![format!(
        "{} -> {}",
        source.map_or("?", |source| source.label.as_str()),
        target.map_or("?", |target| target.label.as_str())
    )];
    let mut items = Vec::new();

    if let Some(option) = &option {
        let gap = &option.content_gap;
        if gap.severity.requires_acknowledgement() {
            info.push(format!(
                "Content gap: {} ({} sessions missed)",
                gap.severity.as_str(),
                gap.missed_sessions
            ));
        }
        if let Some(recommendation) = &gap.recommendation {
            info.push(recommendation.clone());
        }
        let chosen = snapshot.date(transfer::EFFECTIVE_DATE);
        items.extend(option.schedule.upcoming_dates.iter().map(|date| {
            ScreenItem::new(
                format!("Start on {}", date.format("%Y-%m-%d")),
                ItemEdit::Set {
                    key: field(transfer::EFFECTIVE_DATE),
                    value: FieldValue::Date(*date),
                },
            )
            .chosen(chosen == Some(*date))
        }));
    }
    items.push(input_item(snapshot, "Reason", transfer::REASON, "(required)"));
    items.push(input_item(snapshot, "Note", transfer::NOTE, "(optional)"));
    if option
        .as_ref()
        .is_some_and(|option| option.content_gap.severity.requires_acknowledgement())
    {
        items.push(
            ScreenItem::new(
                "I understand the content gap",
                ItemEdit::Toggle {
                    key: field(transfer::ACKNOWLEDGED),
                },
            )
            .chosen(snapshot.flag(transfer::ACKNOWLEDGED)),
        );
    }
    (info, items)
}

fn import_upload(view: &SessionView) -> (Vec<String>, Vec<ScreenItem>) {
    let snapshot = &view.snapshot;
    let info = snapshot
        .entity(enrollment_import::CLASS)
        .map(|class| vec![format!("Class: {}", class.label)])
        .unwrap_or_default();
    (
        info,
        vec![input_item(
            snapshot,
            "Upload id",
            enrollment_import::UPLOAD_ID,
            "(none)",
        )],
    )
}

fn row_label(row: &ImportRow) -> String {
    match &row.full_name {
        Some(name) => format!("Row {} {}", row.row_number, name),
        None => format!("Row {}", row.row_number),
    }
}

fn import_review(view: &SessionView) -> (Vec<String>, Vec<ScreenItem>) {
    let snapshot = &view.snapshot;
    let rows = query_value::<ImportPreview>(view)
        .map(|preview| preview.rows)
        .unwrap_or_default();
    let selected = snapshot
        .ids(enrollment_import::SELECTED_ROWS)
        .cloned()
        .unwrap_or_default();
    let summary = enrollment_import::ImportSummary::from_rows(&rows, &selected);
    let info = vec![format!(
        "{} to enroll, {} to create, {} duplicates, {} errors",
        summary.enroll_existing, summary.create_new, summary.duplicates, summary.errors
    )];

    let mut items = Vec::new();
    if !rows.is_empty() {
        items.push(ScreenItem::new(
            "Select every importable row",
            ItemEdit::Set {
                key: field(enrollment_import::SELECTED_ROWS),
                value: FieldValue::Ids(enrollment_import::default_selection(&rows)),
            },
        ));
    }
    items.extend(rows.iter().map(|row| {
        let id = row.selection_id();
        let edit = if row.status.is_importable() {
            ItemEdit::ToggleId {
                key: field(enrollment_import::SELECTED_ROWS),
                id: id.clone(),
            }
        } else {
            ItemEdit::ReadOnly
        };
        let detail = match &row.status {
            enrollment_import::ImportRowStatus::Error { message } => message.clone(),
            status => status.label().to_string(),
        };
        ScreenItem::new(row_label(row), edit)
            .detail(detail)
            .chosen(selected.contains(&id))
    }));
    (info, items)
}

fn import_confirm(view: &SessionView) -> (Vec<String>, Vec<ScreenItem>) {
    let snapshot = &view.snapshot;
    let count = snapshot
        .ids(enrollment_import::SELECTED_ROWS)
        .map_or(0, BTreeSet::len);
    let mut info = vec![format!("{count} rows will be imported")];
    if let Some(class) = snapshot.entity(enrollment_import::CLASS) {
        info.push(format!("Class: {}", class.label));
    }
    let items = vec![ScreenItem::new(
        "Confirm the import",
        ItemEdit::Toggle {
            key: field(enrollment_import::CONFIRMED),
        },
    )
    .chosen(snapshot.flag(enrollment_import::CONFIRMED))];
    (info, items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn snapshot_with(fields: BTreeMap<FieldKey, FieldValue>) -> StateSnapshot {
        StateSnapshot {
            context: BTreeMap::new(),
            fields,
        }
    }

    #[test]
    fn toggle_id_clears_field_when_last_id_removed() {
        let key = field(enrollment_import::SELECTED_ROWS);
        let snapshot = snapshot_with(BTreeMap::from([(
            key.clone(),
            FieldValue::Ids(BTreeSet::from(["3".to_string()])),
        )]));
        let edit = ItemEdit::ToggleId {
            key: key.clone(),
            id: "3".to_string(),
        };
        assert_eq!(edit.command(&snapshot), Some(EditCommand::Clear(key)));
    }

    #[test]
    fn toggle_flips_flag() {
        let key = field(transfer::ACKNOWLEDGED);
        let snapshot = snapshot_with(BTreeMap::new());
        assert_eq!(
            ItemEdit::Toggle { key: key.clone() }.command(&snapshot),
            Some(EditCommand::Set(key, FieldValue::Flag(true)))
        );
    }

    #[test]
    fn clamp_selection_handles_empty_lists() {
        assert_eq!(clamp_selection(4, 0), 0);
        assert_eq!(clamp_selection(4, 2), 1);
    }
}
