//! Student and academic-affairs class transfer.
//!
//! Students asking to move to a different class instead of another schedule of
//! the same class are routed to `contact_support`; academic affairs staff can
//! do either.

use crate::config::WizardSettings;
use crate::flows::{endpoint, field, step};
use crate::remote::{CacheTag, QueryKey};
use crate::shared::FieldKey;
use crate::wizard::{
    BackFromFirst, FieldDependencies, FieldValue, RegistryError, SelectionEntity, StateSnapshot,
    StepCheck, StepDefinition, StepQuery, StepRegistry, StepScope, SubmissionSpec, WizardFlow,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const STUDENT: &str = "student";
pub const ENROLLMENTS: &str = "enrollments";
pub const SOURCE: &str = "source";
pub const PATH: &str = "path";
pub const BRANCH_FILTER: &str = "branch_filter";
pub const MODALITY_FILTER: &str = "modality_filter";
pub const TARGET: &str = "target";
pub const EFFECTIVE_DATE: &str = "effective_date";
pub const REASON: &str = "reason";
pub const NOTE: &str = "note";
pub const ACKNOWLEDGED: &str = "acknowledged";

pub const SELECT_SOURCE: &str = "select_source";
pub const SELECT_TARGET: &str = "select_target";
pub const CONFIRM: &str = "confirm";
pub const CONTACT_SUPPORT: &str = "contact_support";

pub const ELIGIBILITY_ENDPOINT: &str = "transfer_eligibility";
pub const OPTIONS_ENDPOINT: &str = "transfer_options";
pub const SUBMIT_ENDPOINT: &str = "transfer_submit";
pub const ENROLLMENTS_ENDPOINT: &str = "student_enrollments";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferAudience {
    Student,
    AcademicAffairs,
}

impl TransferAudience {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "aa" | "academic_affairs" | "academic-affairs" => Ok(Self::AcademicAffairs),
            _ => Err("audience must be one of: student, aa".to_string()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::AcademicAffairs => "aa",
        }
    }

    pub fn flow_name(self) -> &'static str {
        match self {
            Self::Student => "student_transfer",
            Self::AcademicAffairs => "aa_transfer",
        }
    }
}

/// Same class at another time, or a different class altogether.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPath {
    Schedule,
    Class,
}

impl TransferPath {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "schedule" => Some(Self::Schedule),
            "class" => Some(Self::Class),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Class => "class",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Schedule => "Change schedule (same class)",
            Self::Class => "Change to a different class",
        }
    }

    pub fn value(self) -> FieldValue {
        FieldValue::text(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    pub eligible: bool,
    #[serde(default)]
    pub reason: Option<String>,
    pub quota: Quota,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapSeverity {
    None,
    Minor,
    Moderate,
    Major,
}

impl GapSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Major => "major",
        }
    }

    pub fn requires_acknowledgement(self) -> bool {
        self >= Self::Moderate
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentGap {
    pub severity: GapSeverity,
    #[serde(default)]
    pub missed_sessions: u32,
    #[serde(default)]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    pub enrolled: u32,
    pub limit: u32,
}

impl Capacity {
    pub fn is_full(self) -> bool {
        self.enrolled >= self.limit
    }

    pub fn remaining(self) -> u32 {
        self.limit.saturating_sub(self.enrolled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSchedule {
    pub summary: String,
    #[serde(default)]
    pub upcoming_dates: Vec<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOption {
    pub class_id: String,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub modality: Option<String>,
    pub capacity: Capacity,
    pub schedule: ClassSchedule,
    pub content_gap: ContentGap,
}

impl TransferOption {
    pub fn entity(&self) -> SelectionEntity {
        SelectionEntity::new(&self.class_id, format!("{} {}", self.code, self.name))
            .with_details(serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledClass {
    pub class_id: String,
    pub code: String,
    pub name: String,
}

impl EnrolledClass {
    pub fn entity(&self) -> SelectionEntity {
        SelectionEntity::new(&self.class_id, format!("{} {}", self.code, self.name))
            .with_details(serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFlowConfig {
    pub audience: TransferAudience,
    pub min_reason_length: usize,
    pub back_from_first: BackFromFirst,
}

impl TransferFlowConfig {
    pub fn new(audience: TransferAudience) -> Self {
        Self::from_settings(audience, &WizardSettings::default())
    }

    pub fn from_settings(audience: TransferAudience, settings: &WizardSettings) -> Self {
        Self {
            audience,
            min_reason_length: settings.min_reason_length,
            back_from_first: settings.back_from_first,
        }
    }
}

/// Context fields the host supplies when opening the wizard.
pub fn transfer_context(
    student_id: &str,
    student_name: &str,
    enrollments: &[EnrolledClass],
) -> BTreeMap<FieldKey, FieldValue> {
    BTreeMap::from([
        (
            field(STUDENT),
            FieldValue::Entity(SelectionEntity::new(student_id, student_name)),
        ),
        (
            field(ENROLLMENTS),
            FieldValue::Entities(enrollments.iter().map(EnrolledClass::entity).collect()),
        ),
    ])
}

pub fn enrollments_query(student_id: &str) -> QueryKey {
    QueryKey::new(endpoint(ENROLLMENTS_ENDPOINT)).with_param("studentId", student_id)
}

pub fn eligibility_query(student_id: &str, class_id: &str) -> QueryKey {
    QueryKey::new(endpoint(ELIGIBILITY_ENDPOINT))
        .with_param("studentId", student_id)
        .with_param("classId", class_id)
}

pub fn options_query(
    class_id: &str,
    path: TransferPath,
    branch: Option<&str>,
    modality: Option<&str>,
) -> QueryKey {
    let mut key = QueryKey::new(endpoint(OPTIONS_ENDPOINT))
        .with_param("classId", class_id)
        .with_param(
            "scheduleOnly",
            if path == TransferPath::Schedule {
                "true"
            } else {
                "false"
            },
        );
    if let Some(branch) = branch.filter(|value| !value.is_empty()) {
        key = key.with_param("branch", branch);
    }
    if let Some(modality) = modality.filter(|value| !value.is_empty()) {
        key = key.with_param("modality", modality);
    }
    key
}

fn scope_path(scope: &StepScope<'_>) -> Option<TransferPath> {
    scope.text(PATH).and_then(TransferPath::parse)
}

fn source_check(scope: &StepScope<'_>) -> StepCheck {
    let Some(source) = scope.entity(SOURCE) else {
        return StepCheck::blocked("Select the class to transfer from.");
    };
    let enrollments = scope.entities(ENROLLMENTS);
    if !enrollments.is_empty() && !enrollments.iter().any(|class| class.id == source.id) {
        return StepCheck::blocked("The selected class is not one of the student's enrollments.");
    }
    let Some(eligibility) = scope.query_data::<Eligibility>() else {
        return StepCheck::blocked("Checking transfer eligibility...");
    };
    if !eligibility.eligible {
        return StepCheck::Blocked(
            eligibility
                .reason
                .filter(|reason| !reason.trim().is_empty())
                .unwrap_or_else(|| "This student is not eligible for a transfer.".to_string()),
        );
    }
    if eligibility.quota.remaining == 0 {
        return StepCheck::Blocked(format!(
            "Transfer quota used up ({} of {}).",
            eligibility.quota.used, eligibility.quota.limit
        ));
    }
    if scope_path(scope).is_none() {
        return StepCheck::blocked("Choose whether to change schedule or class.");
    }
    StepCheck::Ready
}

fn target_check(scope: &StepScope<'_>) -> StepCheck {
    let Some(options) = scope.query_data::<Vec<TransferOption>>() else {
        return StepCheck::blocked("Loading available classes...");
    };
    if options.is_empty() {
        return StepCheck::blocked("No classes are available for this transfer.");
    }
    let Some(target) = scope.entity(TARGET) else {
        return StepCheck::blocked("Select the class to transfer to.");
    };
    if scope.entity(SOURCE).is_some_and(|source| source.id == target.id) {
        return StepCheck::blocked("Choose a class different from the current one.");
    }
    let Some(option) = options.iter().find(|option| option.class_id == target.id) else {
        return StepCheck::blocked("The selected class is no longer offered.");
    };
    if option.capacity.is_full() {
        return StepCheck::blocked("The selected class is full.");
    }
    StepCheck::Ready
}

fn confirm_check(scope: &StepScope<'_>, min_reason_length: usize) -> StepCheck {
    let Some(option) = scope
        .entity(TARGET)
        .and_then(SelectionEntity::details_as::<TransferOption>)
    else {
        return StepCheck::blocked("Select the class to transfer to.");
    };
    let Some(date) = scope.date(EFFECTIVE_DATE) else {
        return StepCheck::blocked("Choose an effective date.");
    };
    if !option.schedule.upcoming_dates.contains(&date) {
        return StepCheck::blocked("The effective date must be one of the class's upcoming sessions.");
    }
    let reason_length = scope
        .text(REASON)
        .map(|reason| reason.trim().chars().count())
        .unwrap_or(0);
    if reason_length < min_reason_length {
        return StepCheck::Blocked(format!(
            "Give a reason of at least {min_reason_length} characters."
        ));
    }
    if option.content_gap.severity.requires_acknowledgement() && !scope.flag(ACKNOWLEDGED) {
        return StepCheck::blocked("Acknowledge the content gap before submitting.");
    }
    StepCheck::Ready
}

fn eligibility_key(scope: &StepScope<'_>) -> Option<QueryKey> {
    let student = scope.entity(STUDENT)?;
    let source = scope.entity(SOURCE)?;
    Some(eligibility_query(&student.id, &source.id))
}

fn options_key(scope: &StepScope<'_>) -> Option<QueryKey> {
    let source = scope.entity(SOURCE)?;
    let path = scope_path(scope)?;
    Some(options_query(
        &source.id,
        path,
        scope.text(BRANCH_FILTER),
        scope.text(MODALITY_FILTER),
    ))
}

fn eligibility_tags(key: &QueryKey) -> Vec<CacheTag> {
    key.param("studentId")
        .map(|student| vec![CacheTag::scoped("transfer-eligibility", student)])
        .unwrap_or_default()
}

fn options_tags(key: &QueryKey) -> Vec<CacheTag> {
    key.param("classId")
        .map(|class| vec![CacheTag::scoped("transfer-options", class)])
        .unwrap_or_default()
}

fn submission_payload(snapshot: &StateSnapshot) -> Result<Value, String> {
    let student = snapshot
        .entity(STUDENT)
        .ok_or_else(|| "student is missing".to_string())?;
    let source = snapshot
        .entity(SOURCE)
        .ok_or_else(|| "source class is missing".to_string())?;
    let target = snapshot
        .entity(TARGET)
        .ok_or_else(|| "target class is missing".to_string())?;
    let date = snapshot
        .date(EFFECTIVE_DATE)
        .ok_or_else(|| "effective date is missing".to_string())?;
    let reason = snapshot.text(REASON).unwrap_or_default().trim();

    let mut payload = json!({
        "studentId": student.id,
        "sourceClassId": source.id,
        "targetClassId": target.id,
        "effectiveDate": date.format("%Y-%m-%d").to_string(),
        "reason": reason,
    });
    if let Some(note) = snapshot.text(NOTE).map(str::trim).filter(|n| !n.is_empty()) {
        payload["note"] = Value::from(note);
    }
    Ok(payload)
}

fn submission_tags(snapshot: &StateSnapshot) -> Vec<CacheTag> {
    let mut tags = Vec::new();
    if let Some(source) = snapshot.entity(SOURCE) {
        tags.push(CacheTag::scoped("class-students", &source.id));
        tags.push(CacheTag::scoped("transfer-options", &source.id));
    }
    if let Some(target) = snapshot.entity(TARGET) {
        tags.push(CacheTag::scoped("class-students", &target.id));
    }
    if let Some(student) = snapshot.entity(STUDENT) {
        tags.push(CacheTag::scoped("student-enrollments", &student.id));
        tags.push(CacheTag::scoped("transfer-eligibility", &student.id));
    }
    tags
}

pub fn transfer_dependencies() -> FieldDependencies {
    FieldDependencies::new()
        .depend(
            &field(SOURCE),
            &[field(TARGET), field(BRANCH_FILTER), field(MODALITY_FILTER)],
        )
        .depend(&field(PATH), &[field(TARGET)])
        .depend(&field(BRANCH_FILTER), &[field(TARGET)])
        .depend(&field(MODALITY_FILTER), &[field(TARGET)])
        .depend(&field(TARGET), &[field(EFFECTIVE_DATE), field(ACKNOWLEDGED)])
}

pub fn transfer_registry(config: TransferFlowConfig) -> Result<StepRegistry, RegistryError> {
    let audience = config.audience;
    let min_reason_length = config.min_reason_length;

    StepRegistry::register(vec![
        StepDefinition::new(step(SELECT_SOURCE), "Current class")
            .writes([field(SOURCE), field(PATH)])
            .with_check(source_check)
            .with_next(move |scope| {
                let student_needs_support = audience == TransferAudience::Student
                    && scope_path(scope) == Some(TransferPath::Class);
                student_needs_support.then(|| step(CONTACT_SUPPORT))
            })
            .with_query(StepQuery::new::<Eligibility, _>(eligibility_key).with_tags(eligibility_tags)),
        StepDefinition::new(step(SELECT_TARGET), "New class")
            .reads([field(SOURCE), field(PATH)])
            .writes([field(BRANCH_FILTER), field(MODALITY_FILTER), field(TARGET)])
            .with_check(target_check)
            .with_query(
                StepQuery::new::<Vec<TransferOption>, _>(options_key).with_tags(options_tags),
            ),
        StepDefinition::new(step(CONFIRM), "Confirm")
            .reads([field(SOURCE), field(TARGET)])
            .writes([
                field(EFFECTIVE_DATE),
                field(REASON),
                field(NOTE),
                field(ACKNOWLEDGED),
            ])
            .with_check(move |scope| confirm_check(scope, min_reason_length)),
        StepDefinition::new(step(CONTACT_SUPPORT), "Contact support")
            .reads([field(SOURCE)])
            .branch_only()
            .with_check(|_| {
                StepCheck::blocked(
                    "Changing to a different class must be arranged with the academic office.",
                )
            }),
    ])
}

pub fn transfer_flow(config: TransferFlowConfig) -> Result<WizardFlow, RegistryError> {
    let submission = SubmissionSpec::new(endpoint(SUBMIT_ENDPOINT), submission_payload)
        .with_invalidation(submission_tags)
        .with_stale_reference("CLASS_FULL", step(SELECT_TARGET), [field(TARGET)])
        .with_stale_reference("CAPACITY_EXCEEDED", step(SELECT_TARGET), [field(TARGET)])
        .with_stale_reference("TARGET_UNAVAILABLE", step(SELECT_TARGET), [field(TARGET)])
        .with_stale_reference("SESSION_UNAVAILABLE", step(CONFIRM), [field(EFFECTIVE_DATE)])
        .with_stale_reference("SOURCE_CHANGED", step(SELECT_SOURCE), [field(SOURCE)]);

    Ok(WizardFlow::new(
        config.audience.flow_name(),
        transfer_registry(config)?,
        submission,
    )?
    .with_dependencies(transfer_dependencies())
    .with_back_from_first(config.back_from_first))
}

/// Options currently shown on `select_target`, empty when not yet loaded.
pub fn options_from(data: Option<&Value>) -> Vec<TransferOption> {
    data.and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(class_id: &str, enrolled: u32, severity: GapSeverity) -> TransferOption {
        TransferOption {
            class_id: class_id.to_string(),
            code: "ENG2".to_string(),
            name: "English 2".to_string(),
            branch: Some("north".to_string()),
            modality: Some("onsite".to_string()),
            capacity: Capacity {
                enrolled,
                limit: 20,
            },
            schedule: ClassSchedule {
                summary: "Mon/Wed 18:00".to_string(),
                upcoming_dates: vec![NaiveDate::from_ymd_opt(2026, 3, 2).expect("date")],
            },
            content_gap: ContentGap {
                severity,
                missed_sessions: 2,
                recommendation: None,
            },
        }
    }

    #[test]
    fn options_decode_from_camel_case_contract() {
        let options: Vec<TransferOption> = serde_json::from_value(json!([{
            "classId": "C2",
            "code": "ENG2",
            "name": "English 2",
            "capacity": {"enrolled": 19, "limit": 20},
            "schedule": {"summary": "Mon/Wed", "upcomingDates": ["2026-03-02"]},
            "contentGap": {"severity": "MODERATE", "missedSessions": 3}
        }]))
        .expect("options");
        assert_eq!(options[0].content_gap.severity, GapSeverity::Moderate);
        assert!(options[0].content_gap.severity.requires_acknowledgement());
        assert_eq!(options[0].capacity.remaining(), 1);
    }

    #[test]
    fn options_query_omits_empty_filters() {
        let key = options_query("C1", TransferPath::Schedule, Some(""), Some("online"));
        assert_eq!(key.param("scheduleOnly"), Some("true"));
        assert_eq!(key.param("branch"), None);
        assert_eq!(key.param("modality"), Some("online"));
    }

    #[test]
    fn target_entity_round_trips_details() {
        let original = option("C2", 3, GapSeverity::Minor);
        let entity = original.entity();
        assert_eq!(entity.id, "C2");
        assert_eq!(entity.details_as::<TransferOption>(), Some(original));
    }

    #[test]
    fn audience_parse_accepts_aliases() {
        assert_eq!(
            TransferAudience::parse("AA"),
            Ok(TransferAudience::AcademicAffairs)
        );
        assert!(TransferAudience::parse("teacher").is_err());
    }
}
