use eduflow::host::{DispatchMode, WizardDriver};
use eduflow::remote::{
    classify_failure, BackendApi, CacheTag, QueryCache, QueryKey, RemoteError,
};
use eduflow::shared::{EndpointId, FieldKey, StepId};
use eduflow::wizard::{
    FieldValue, SessionPhase, StepCheck, StepDefinition, StepQuery, StepRegistry,
    SubmissionResult, SubmissionSpec, SubmitOutcome, WizardFlow, WizardSession,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct FakeState {
    data: BTreeMap<String, Value>,
    fetches: Vec<String>,
    mutations: VecDeque<Result<Value, RemoteError>>,
    payloads: Vec<Value>,
}

#[derive(Clone, Default)]
struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    fn with_choices(choices: Value) -> Self {
        let backend = Self::default();
        backend.put("choices", choices);
        backend
    }

    fn put(&self, endpoint: &str, data: Value) {
        self.state
            .lock()
            .expect("lock")
            .data
            .insert(endpoint.to_string(), data);
    }

    fn queue_mutation(&self, result: Result<Value, RemoteError>) {
        self.state.lock().expect("lock").mutations.push_back(result);
    }

    fn fetch_count(&self) -> usize {
        self.state.lock().expect("lock").fetches.len()
    }

    fn payloads(&self) -> Vec<Value> {
        self.state.lock().expect("lock").payloads.clone()
    }
}

impl BackendApi for FakeBackend {
    fn fetch(&self, key: &QueryKey) -> Result<Value, RemoteError> {
        let mut state = self.state.lock().expect("lock");
        state.fetches.push(key.to_string());
        state
            .data
            .get(key.endpoint.as_str())
            .cloned()
            .ok_or_else(|| RemoteError::transient("not available"))
    }

    fn mutate(&self, _endpoint: &EndpointId, payload: &Value) -> Result<Value, RemoteError> {
        let mut state = self.state.lock().expect("lock");
        state.payloads.push(payload.clone());
        state
            .mutations
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"id": "R1", "status": "PENDING"})))
    }
}

fn id(raw: &str) -> StepId {
    StepId::parse(raw).expect("step id")
}

fn key(raw: &str) -> FieldKey {
    FieldKey::parse(raw).expect("field key")
}

fn flow() -> Arc<WizardFlow> {
    let registry = StepRegistry::register(vec![
        StepDefinition::new(id("pick"), "Pick")
            .writes([key("choice")])
            .with_query(
                StepQuery::new::<Vec<String>, _>(|scope| {
                    let owner = scope.text("owner")?;
                    Some(
                        QueryKey::new(EndpointId::parse("choices").ok()?)
                            .with_param("owner", owner),
                    )
                })
                .with_tags(|_| vec![CacheTag::collection("choices")]),
            )
            .with_check(|scope| {
                let options = scope.query_data::<Vec<String>>().unwrap_or_default();
                match scope.text("choice") {
                    Some(choice) if options.iter().any(|option| option == choice) => {
                        StepCheck::Ready
                    }
                    _ => StepCheck::blocked("Pick one of the listed choices."),
                }
            }),
        StepDefinition::new(id("confirm"), "Confirm").reads([key("choice")]),
    ])
    .expect("registry");
    let submission = SubmissionSpec::new(EndpointId::parse("save").expect("endpoint"), |snapshot| {
        Ok(json!({ "choice": snapshot.text("choice") }))
    })
    .with_invalidation(|_| vec![CacheTag::collection("choices")])
    .with_stale_reference("CHOICE_GONE", id("pick"), [key("choice")]);
    Arc::new(WizardFlow::new("driver_test", registry, submission).expect("flow"))
}

fn context() -> BTreeMap<FieldKey, FieldValue> {
    BTreeMap::from([(key("owner"), FieldValue::text("u1"))])
}

fn driver(backend: &FakeBackend, mode: DispatchMode) -> WizardDriver<FakeBackend> {
    WizardDriver::new(
        WizardSession::new(flow()),
        backend.clone(),
        QueryCache::default(),
        mode,
    )
}

fn choices_key() -> QueryKey {
    QueryKey::new(EndpointId::parse("choices").expect("endpoint")).with_param("owner", "u1")
}

fn walk_to_confirm(driver: &mut WizardDriver<FakeBackend>) {
    driver
        .set(key("choice"), FieldValue::text("a"))
        .expect("set choice");
    driver.next().expect("next");
    assert_eq!(driver.session().cursor().current().as_str(), "confirm");
}

#[test]
fn inline_open_fetches_once_and_reuses_cache() {
    let backend = FakeBackend::with_choices(json!(["a", "b"]));
    let mut driver = driver(&backend, DispatchMode::Inline);

    driver.open(context()).expect("open");
    assert_eq!(backend.fetch_count(), 1);
    let query = driver.session().current_query().expect("slot");
    assert_eq!(query.data(), Some(&json!(["a", "b"])));

    driver.close();
    driver.open(context()).expect("reopen");
    assert_eq!(backend.fetch_count(), 1);
    assert!(driver.session().current_query().expect("slot").data().is_some());
}

#[test]
fn successful_submission_invalidates_tagged_reads() {
    let backend = FakeBackend::with_choices(json!(["a"]));
    let mut driver = driver(&backend, DispatchMode::Inline);
    driver.open(context()).expect("open");
    walk_to_confirm(&mut driver);

    assert!(matches!(
        driver.submit().expect("submit"),
        SubmitOutcome::Dispatched(_)
    ));
    assert!(matches!(
        driver.last_result(),
        Some(SubmissionResult::Completed(receipt)) if receipt.id == "R1"
    ));
    assert_eq!(backend.payloads(), vec![json!({"choice": "a"})]);
    assert_eq!(driver.session().phase(), SessionPhase::Completed);
    assert!(driver.cache().is_stale(&choices_key()));

    driver.open(context()).expect("reopen");
    assert_eq!(backend.fetch_count(), 2);
    assert!(driver.last_result().is_none());
}

#[test]
fn stale_rejection_refetches_the_returned_step() {
    let backend = FakeBackend::with_choices(json!(["a"]));
    backend.queue_mutation(Err(classify_failure(
        409,
        r#"{"code":"CHOICE_GONE","message":"That choice was removed."}"#,
    )));
    let mut driver = driver(&backend, DispatchMode::Inline);
    driver.open(context()).expect("open");
    walk_to_confirm(&mut driver);
    backend.put("choices", json!(["b"]));

    driver.submit().expect("submit");
    assert!(matches!(
        driver.last_result(),
        Some(SubmissionResult::Returned { step, .. }) if step.as_str() == "pick"
    ));
    let session = driver.session();
    assert_eq!(session.cursor().current().as_str(), "pick");
    assert_eq!(session.snapshot().get("choice"), None);
    assert_eq!(backend.fetch_count(), 2);
    assert_eq!(
        session.current_query().expect("slot").data(),
        Some(&json!(["b"]))
    );
    assert_eq!(
        session.last_error().map(|error| error.user_message()),
        Some("That choice was removed.".to_string())
    );
}

#[test]
fn transient_submission_failure_keeps_the_run() {
    let backend = FakeBackend::with_choices(json!(["a"]));
    backend.queue_mutation(Err(RemoteError::transient("connection reset")));
    let mut driver = driver(&backend, DispatchMode::Inline);
    driver.open(context()).expect("open");
    walk_to_confirm(&mut driver);

    driver.submit().expect("submit");
    assert!(matches!(
        driver.last_result(),
        Some(SubmissionResult::Failed(RemoteError::Transient { .. }))
    ));
    assert_eq!(driver.session().phase(), SessionPhase::Active);
    assert_eq!(driver.session().snapshot().text("choice"), Some("a"));

    driver.submit().expect("resubmit");
    assert!(matches!(
        driver.last_result(),
        Some(SubmissionResult::Completed(_))
    ));
}

#[test]
fn retry_refetches_a_failed_read() {
    let backend = FakeBackend::default();
    let mut driver = driver(&backend, DispatchMode::Inline);
    driver.open(context()).expect("open");
    assert!(driver.session().current_query().expect("slot").error().is_some());

    backend.put("choices", json!(["a"]));
    driver.retry().expect("retry");
    assert_eq!(backend.fetch_count(), 2);
    let query = driver.session().current_query().expect("slot");
    assert!(query.error().is_none());
    assert_eq!(query.data(), Some(&json!(["a"])));
}

#[test]
fn focus_refetches_visible_reads_unless_disabled() {
    let backend = FakeBackend::with_choices(json!(["a"]));
    let mut driver = driver(&backend, DispatchMode::Inline);
    driver.open(context()).expect("open");
    driver.focus();
    assert_eq!(backend.fetch_count(), 2);

    let mut quiet = WizardDriver::new(
        WizardSession::new(flow()),
        backend.clone(),
        QueryCache::default(),
        DispatchMode::Inline,
    )
    .with_refetch_on_focus(false);
    quiet.open(context()).expect("open");
    quiet.focus();
    assert_eq!(backend.fetch_count(), 3);
}

#[test]
fn logout_drops_cache_and_closes() {
    let backend = FakeBackend::with_choices(json!(["a"]));
    let mut driver = driver(&backend, DispatchMode::Inline);
    driver.open(context()).expect("open");
    assert_eq!(driver.cache().len(), 1);

    driver.logout();
    assert!(driver.cache().is_empty());
    assert_eq!(driver.session().phase(), SessionPhase::Cancelled);
}

#[test]
fn background_dispatch_applies_replies_on_wait() {
    let backend = FakeBackend::with_choices(json!(["a"]));
    let mut driver = driver(&backend, DispatchMode::Background);
    driver.open(context()).expect("open");
    assert!(driver.wait_idle(Duration::from_secs(5)));
    assert_eq!(driver.outstanding(), 0);
    assert_eq!(
        driver.session().current_query().expect("slot").data(),
        Some(&json!(["a"]))
    );

    walk_to_confirm(&mut driver);
    driver.submit().expect("submit");
    assert_eq!(driver.session().phase(), SessionPhase::Submitting);
    assert_eq!(
        driver.submit().expect("second submit"),
        SubmitOutcome::InFlight
    );
    assert!(driver.wait_idle(Duration::from_secs(5)));
    assert!(matches!(
        driver.last_result(),
        Some(SubmissionResult::Completed(_))
    ));
    assert_eq!(backend.payloads().len(), 1);
}

#[test]
fn accepted_submission_invalidates_even_after_close() {
    let backend = FakeBackend::with_choices(json!(["a"]));
    let mut driver = driver(&backend, DispatchMode::Background);
    driver.open(context()).expect("open");
    assert!(driver.wait_idle(Duration::from_secs(5)));
    walk_to_confirm(&mut driver);

    driver.submit().expect("submit");
    driver.close();
    assert!(driver.wait_idle(Duration::from_secs(5)));
    assert_eq!(backend.payloads().len(), 1);
    assert!(driver.last_result().is_none());
    assert_eq!(driver.session().phase(), SessionPhase::Cancelled);
    assert!(driver.cache().is_stale(&choices_key()));

    driver.open(context()).expect("reopen");
    assert!(driver.wait_idle(Duration::from_secs(5)));
    assert_eq!(backend.fetch_count(), 2);
}

#[test]
fn rejected_submission_after_close_leaves_cache_fresh() {
    let backend = FakeBackend::with_choices(json!(["a"]));
    backend.queue_mutation(Err(RemoteError::transient("connection reset")));
    let mut driver = driver(&backend, DispatchMode::Background);
    driver.open(context()).expect("open");
    assert!(driver.wait_idle(Duration::from_secs(5)));
    walk_to_confirm(&mut driver);

    driver.submit().expect("submit");
    driver.close();
    assert!(driver.wait_idle(Duration::from_secs(5)));
    assert!(!driver.cache().is_stale(&choices_key()));
    assert_eq!(driver.cache().peek(&choices_key()), Some(&json!(["a"])));
}
