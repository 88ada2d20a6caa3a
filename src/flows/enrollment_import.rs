use crate::flows::{endpoint, field, step};
use crate::remote::{CacheTag, QueryKey};
use crate::shared::FieldKey;
use crate::wizard::{
    BackFromFirst, FieldDependencies, FieldValue, RegistryError, SelectionEntity, StateSnapshot,
    StepCheck, StepDefinition, StepQuery, StepRegistry, StepScope, SubmissionSpec, WizardFlow,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

pub const CLASS: &str = "class";
pub const UPLOAD_ID: &str = "upload_id";
pub const SELECTED_ROWS: &str = "selected_rows";
pub const CONFIRMED: &str = "confirmed";

pub const UPLOAD: &str = "upload";
pub const REVIEW: &str = "review";
pub const CONFIRM: &str = "confirm";

pub const PREVIEW_ENDPOINT: &str = "import_preview";
pub const SUBMIT_ENDPOINT: &str = "import_submit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportRowStatus {
    /// Matches an existing student who will be enrolled.
    Found { student_id: String },
    /// A new student record will be created.
    Create,
    Duplicate,
    Error { message: String },
}

impl ImportRowStatus {
    pub fn is_importable(&self) -> bool {
        matches!(self, Self::Found { .. } | Self::Create)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Found { .. } => "found",
            Self::Create => "create",
            Self::Duplicate => "duplicate",
            Self::Error { .. } => "error",
        }
    }

    fn wire_code(&self) -> &'static str {
        match self {
            Self::Found { .. } => "FOUND",
            Self::Create => "CREATE",
            Self::Duplicate => "DUPLICATE",
            Self::Error { .. } => "ERROR",
        }
    }
}

/// Preview row as the backend sends it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawImportRow {
    row_number: u32,
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawImportRow", into = "RawImportRow")]
pub struct ImportRow {
    pub row_number: u32,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub status: ImportRowStatus,
}

impl TryFrom<RawImportRow> for ImportRow {
    type Error = String;

    fn try_from(raw: RawImportRow) -> Result<Self, Self::Error> {
        let status = match raw.status.trim().to_ascii_uppercase().as_str() {
            "FOUND" => match raw.student_id.filter(|id| !id.trim().is_empty()) {
                Some(student_id) => ImportRowStatus::Found { student_id },
                None => ImportRowStatus::Error {
                    message: "matched student has no id".to_string(),
                },
            },
            "CREATE" => ImportRowStatus::Create,
            "DUPLICATE" => ImportRowStatus::Duplicate,
            "ERROR" => ImportRowStatus::Error {
                message: raw.message.unwrap_or_else(|| "invalid row".to_string()),
            },
            other => return Err(format!("unknown import row status `{other}`")),
        };
        Ok(Self {
            row_number: raw.row_number,
            full_name: raw.full_name,
            email: raw.email,
            status,
        })
    }
}

impl From<ImportRow> for RawImportRow {
    fn from(row: ImportRow) -> Self {
        let status = row.status.wire_code().to_string();
        let (student_id, message) = match row.status {
            ImportRowStatus::Found { student_id } => (Some(student_id), None),
            ImportRowStatus::Error { message } => (None, Some(message)),
            ImportRowStatus::Create | ImportRowStatus::Duplicate => (None, None),
        };
        Self {
            row_number: row.row_number,
            status,
            student_id,
            full_name: row.full_name,
            email: row.email,
            message,
        }
    }
}

impl ImportRow {
    pub fn selection_id(&self) -> String {
        self.row_number.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportPreview {
    pub rows: Vec<ImportRow>,
}

/// Every importable row, which is what the review step starts with.
pub fn default_selection(rows: &[ImportRow]) -> BTreeSet<String> {
    rows.iter()
        .filter(|row| row.status.is_importable())
        .map(ImportRow::selection_id)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportSummary {
    pub enroll_existing: usize,
    pub create_new: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl ImportSummary {
    pub fn from_rows(rows: &[ImportRow], selected: &BTreeSet<String>) -> Self {
        let mut summary = Self::default();
        for row in rows {
            let chosen = selected.contains(&row.selection_id());
            match (&row.status, chosen) {
                (ImportRowStatus::Found { .. }, true) => summary.enroll_existing += 1,
                (ImportRowStatus::Create, true) => summary.create_new += 1,
                (ImportRowStatus::Duplicate, _) => summary.duplicates += 1,
                (ImportRowStatus::Error { .. }, _) => summary.errors += 1,
                (_, false) => summary.skipped += 1,
            }
        }
        summary
    }

    pub fn to_import(&self) -> usize {
        self.enroll_existing + self.create_new
    }
}

pub fn import_context(class_id: &str, class_label: &str) -> BTreeMap<FieldKey, FieldValue> {
    BTreeMap::from([(
        field(CLASS),
        FieldValue::Entity(SelectionEntity::new(class_id, class_label)),
    )])
}

pub fn preview_query(class_id: &str, upload_id: &str) -> QueryKey {
    QueryKey::new(endpoint(PREVIEW_ENDPOINT))
        .with_param("classId", class_id)
        .with_param("uploadId", upload_id)
}

fn upload_check(scope: &StepScope<'_>) -> StepCheck {
    match scope.text(UPLOAD_ID).map(str::trim) {
        Some(upload) if !upload.is_empty() => StepCheck::Ready,
        _ => StepCheck::blocked("Upload a roster file first."),
    }
}

fn review_check(scope: &StepScope<'_>) -> StepCheck {
    let Some(preview) = scope.query_data::<ImportPreview>() else {
        return StepCheck::blocked("Loading the import preview...");
    };
    if preview.rows.is_empty() {
        return StepCheck::blocked("The uploaded file contains no rows.");
    }
    let selected = scope.ids(SELECTED_ROWS).cloned().unwrap_or_default();
    if selected.is_empty() {
        return StepCheck::blocked("Select at least one row to import.");
    }
    for id in &selected {
        match preview.rows.iter().find(|row| &row.selection_id() == id) {
            Some(row) if row.status.is_importable() => {}
            Some(row) => {
                return StepCheck::Blocked(format!(
                    "Row {} cannot be imported ({}).",
                    row.row_number,
                    row.status.label()
                ))
            }
            None => return StepCheck::Blocked(format!("Row {id} is not in the preview.")),
        }
    }
    StepCheck::Ready
}

fn confirm_check(scope: &StepScope<'_>) -> StepCheck {
    if scope.ids(SELECTED_ROWS).map_or(true, BTreeSet::is_empty) {
        return StepCheck::blocked("Select at least one row to import.");
    }
    if !scope.flag(CONFIRMED) {
        return StepCheck::blocked("Confirm the import to continue.");
    }
    StepCheck::Ready
}

fn preview_key(scope: &StepScope<'_>) -> Option<QueryKey> {
    let class = scope.entity(CLASS)?;
    let upload = scope.text(UPLOAD_ID).map(str::trim).filter(|u| !u.is_empty())?;
    Some(preview_query(&class.id, upload))
}

fn preview_tags(key: &QueryKey) -> Vec<CacheTag> {
    key.param("uploadId")
        .map(|upload| vec![CacheTag::scoped("import-preview", upload)])
        .unwrap_or_default()
}

fn submission_payload(snapshot: &StateSnapshot) -> Result<Value, String> {
    let class = snapshot
        .entity(CLASS)
        .ok_or_else(|| "class is missing".to_string())?;
    let upload = snapshot
        .text(UPLOAD_ID)
        .ok_or_else(|| "upload id is missing".to_string())?;
    let mut rows = snapshot
        .ids(SELECTED_ROWS)
        .map(|ids| {
            ids.iter()
                .map(|id| {
                    id.parse::<u32>()
                        .map_err(|_| format!("row id `{id}` is not a row number"))
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();
    rows.sort_unstable();
    Ok(json!({
        "classId": class.id,
        "uploadId": upload.trim(),
        "rowNumbers": rows,
    }))
}

fn submission_tags(snapshot: &StateSnapshot) -> Vec<CacheTag> {
    let mut tags = Vec::new();
    if let Some(class) = snapshot.entity(CLASS) {
        tags.push(CacheTag::scoped("class-students", &class.id));
        tags.push(CacheTag::scoped("available-students", &class.id));
    }
    if let Some(upload) = snapshot.text(UPLOAD_ID) {
        tags.push(CacheTag::scoped("import-preview", upload.trim()));
    }
    tags
}

pub fn import_registry() -> Result<StepRegistry, RegistryError> {
    StepRegistry::register(vec![
        StepDefinition::new(step(UPLOAD), "Upload roster")
            .writes([field(UPLOAD_ID)])
            .with_check(upload_check),
        StepDefinition::new(step(REVIEW), "Review rows")
            .reads([field(UPLOAD_ID)])
            .writes([field(SELECTED_ROWS)])
            .with_check(review_check)
            .with_query(StepQuery::new::<ImportPreview, _>(preview_key).with_tags(preview_tags)),
        StepDefinition::new(step(CONFIRM), "Confirm import")
            .reads([field(UPLOAD_ID), field(SELECTED_ROWS)])
            .writes([field(CONFIRMED)])
            .with_check(confirm_check),
    ])
}

pub fn import_flow(back_from_first: BackFromFirst) -> Result<WizardFlow, RegistryError> {
    let submission = SubmissionSpec::new(endpoint(SUBMIT_ENDPOINT), submission_payload)
        .with_invalidation(submission_tags)
        .with_stale_reference("UPLOAD_EXPIRED", step(UPLOAD), [field(UPLOAD_ID)])
        .with_stale_reference("ROWS_CHANGED", step(REVIEW), [field(SELECTED_ROWS)]);

    Ok(
        WizardFlow::new("enrollment_import", import_registry()?, submission)?
            .with_dependencies(
                FieldDependencies::new()
                    .depend(&field(UPLOAD_ID), &[field(SELECTED_ROWS), field(CONFIRMED)])
                    .depend(&field(SELECTED_ROWS), &[field(CONFIRMED)]),
            )
            .with_back_from_first(back_from_first),
    )
}
