use eduflow::remote::{
    classify_failure, MutationResponse, QueryKey, QueryRequest, QueryResponse, RemoteError,
    SuggestedAction,
};
use eduflow::shared::{EndpointId, FieldKey, StepId};
use eduflow::wizard::{
    BackFromFirst, Delivery, FieldDependencies, FieldValue, SessionEvent, SessionPhase,
    StepCheck, StepDefinition, StepQuery, StepRegistry, SubmissionResult, SubmissionSpec,
    SubmitOutcome, Transition, WizardError, WizardFlow, WizardSession,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

fn id(raw: &str) -> StepId {
    StepId::parse(raw).expect("step id")
}

fn key(raw: &str) -> FieldKey {
    FieldKey::parse(raw).expect("field key")
}

fn endpoint(raw: &str) -> EndpointId {
    EndpointId::parse(raw).expect("endpoint")
}

fn flow(back_from_first: BackFromFirst) -> Arc<WizardFlow> {
    let registry = StepRegistry::register(vec![
        StepDefinition::new(id("pick"), "Pick")
            .writes([key("choice")])
            .with_query(StepQuery::new::<Vec<String>, _>(|scope| {
                let owner = scope.text("owner")?;
                Some(QueryKey::new(endpoint("choices")).with_param("owner", owner))
            }))
            .with_check(|scope| {
                let Some(options) = scope.query_data::<Vec<String>>() else {
                    return StepCheck::blocked("Loading choices.");
                };
                match scope.text("choice") {
                    Some(choice) if options.iter().any(|option| option == choice) => {
                        StepCheck::Ready
                    }
                    Some(_) => StepCheck::blocked("That choice is gone."),
                    None => StepCheck::blocked("Pick something."),
                }
            })
            .with_next(|scope| (scope.text("choice") == Some("help")).then(|| id("help"))),
        StepDefinition::new(id("detail"), "Detail")
            .reads([key("choice")])
            .writes([key("detail")])
            .with_query(StepQuery::new::<Value, _>(|scope| {
                let choice = scope.text("choice")?;
                Some(QueryKey::new(endpoint("details")).with_param("choice", choice))
            }))
            .with_check(|scope| match scope.text("detail") {
                Some(_) => StepCheck::Ready,
                None => StepCheck::blocked("Add a detail."),
            }),
        StepDefinition::new(id("help"), "Help").branch_only(),
        StepDefinition::new(id("finish"), "Finish")
            .reads([key("detail")])
            .writes([key("agree")])
            .with_check(|scope| {
                if scope.flag("agree") {
                    StepCheck::Ready
                } else {
                    StepCheck::blocked("Agree first.")
                }
            }),
    ])
    .expect("registry");

    let submission = SubmissionSpec::new(endpoint("save"), |snapshot| {
        Ok(json!({
            "choice": snapshot.text("choice"),
            "detail": snapshot.text("detail"),
        }))
    })
    .with_stale_reference("choice_gone", id("pick"), [key("choice")]);

    Arc::new(
        WizardFlow::new("test_flow", registry, submission)
            .expect("flow")
            .with_dependencies(
                FieldDependencies::new()
                    .depend(&key("choice"), &[key("detail")])
                    .depend(&key("detail"), &[key("agree")]),
            )
            .with_back_from_first(back_from_first),
    )
}

fn context() -> BTreeMap<FieldKey, FieldValue> {
    BTreeMap::from([(key("owner"), FieldValue::text("u1"))])
}

fn respond(request: &QueryRequest, data: Value) -> QueryResponse {
    QueryResponse {
        ticket: request.ticket.clone(),
        result: Ok(data),
    }
}

fn single(requests: Vec<QueryRequest>) -> QueryRequest {
    assert_eq!(requests.len(), 1, "expected exactly one request");
    requests.into_iter().next().expect("request")
}

/// Opens the session and walks it to `finish` with every field filled in.
fn session_at_finish() -> WizardSession {
    let mut session = WizardSession::new(flow(BackFromFirst::Stay));
    let pick = single(session.open(context()).expect("open"));
    session.deliver(respond(&pick, json!(["a", "b", "help"])));
    session
        .set(key("choice"), FieldValue::text("a"))
        .expect("set choice");
    let detail = single(session.next().expect("next").requests);
    session.deliver(respond(&detail, json!({"max": 3})));
    session
        .set(key("detail"), FieldValue::text("x"))
        .expect("set detail");
    session.next().expect("next");
    session
        .set(key("agree"), FieldValue::Flag(true))
        .expect("set agree");
    assert_eq!(session.cursor().current().as_str(), "finish");
    session
}

#[test]
fn open_requests_first_step_query_and_blocks_until_loaded() {
    let mut session = WizardSession::new(flow(BackFromFirst::Stay));
    assert_eq!(session.phase(), SessionPhase::Closed);

    let pick = single(session.open(context()).expect("open"));
    assert_eq!(session.phase(), SessionPhase::Active);
    assert_eq!(pick.key().param("owner"), Some("u1"));
    assert!(session.session_id().starts_with("wiz-"));

    session
        .set(key("choice"), FieldValue::text("a"))
        .expect("set choice");
    let outcome = session.next().expect("next");
    assert!(matches!(outcome.transition, Transition::Blocked { .. }));

    assert_eq!(
        session.deliver(respond(&pick, json!(["a", "b"]))),
        Delivery::Applied
    );
    let outcome = session.next().expect("next");
    assert_eq!(
        outcome.transition,
        Transition::Moved {
            from: id("pick"),
            to: id("detail"),
            cleared: Vec::new(),
        }
    );
    let detail = single(outcome.requests);
    assert_eq!(detail.key().param("choice"), Some("a"));
    assert_eq!(detail.ticket.step, id("detail"));
}

#[test]
fn malformed_query_data_surfaces_as_error() {
    let mut session = WizardSession::new(flow(BackFromFirst::Stay));
    let pick = single(session.open(context()).expect("open"));
    session.deliver(respond(&pick, json!({"not": "a list"})));

    let query = session.query("pick").expect("slot");
    assert!(matches!(query.error(), Some(RemoteError::Malformed { .. })));
    assert!(!session.gate_state().can_submit);
}

#[test]
fn responses_from_a_closed_run_are_discarded() {
    let mut session = WizardSession::new(flow(BackFromFirst::Stay));
    let first = single(session.open(context()).expect("open"));
    let first_id = session.session_id().to_string();

    assert_eq!(session.close(), Transition::Closed);
    assert_eq!(session.phase(), SessionPhase::Cancelled);
    assert_eq!(
        session.deliver(respond(&first, json!(["a"]))),
        Delivery::Discarded
    );

    let second = single(session.open(context()).expect("reopen"));
    assert_ne!(session.session_id(), first_id);
    assert!(session.snapshot().fields.is_empty());
    assert_eq!(session.cursor().current().as_str(), "pick");
    assert!(session.cursor().history().is_empty());
    assert_eq!(
        session.deliver(respond(&first, json!(["a"]))),
        Delivery::Discarded
    );
    assert_eq!(
        session.deliver(respond(&second, json!(["a"]))),
        Delivery::Applied
    );
}

#[test]
fn response_for_a_replaced_key_is_discarded() {
    let mut session = WizardSession::new(flow(BackFromFirst::Stay));
    let pick = single(session.open(context()).expect("open"));
    session.deliver(respond(&pick, json!(["a", "b"])));
    session
        .set(key("choice"), FieldValue::text("a"))
        .expect("set a");
    let for_a = single(session.next().expect("next").requests);

    session.previous().expect("previous");
    session
        .set(key("choice"), FieldValue::text("b"))
        .expect("set b");
    let for_b = single(session.next().expect("next").requests);
    assert_eq!(for_b.key().param("choice"), Some("b"));

    assert_eq!(
        session.deliver(respond(&for_a, json!({}))),
        Delivery::Discarded
    );
    assert!(session.current_query().expect("slot").is_loading());
    assert_eq!(
        session.deliver(respond(&for_b, json!({}))),
        Delivery::Applied
    );
}

#[test]
fn going_back_clears_fields_written_downstream() {
    let mut session = session_at_finish();
    session.previous().expect("back to detail");
    assert_eq!(session.snapshot().get("agree"), None);

    session.previous().expect("back to pick");
    assert_eq!(session.snapshot().get("detail"), None);

    let mut session = session_at_finish();
    assert!(matches!(
        session.set(key("choice"), FieldValue::text("b")),
        Err(WizardError::FieldNotWritable { .. })
    ));
    assert_eq!(session.snapshot().text("detail"), Some("x"));
}

#[test]
fn writes_are_limited_to_current_step_and_active_phase() {
    let mut session = WizardSession::new(flow(BackFromFirst::Stay));
    assert!(matches!(
        session.set(key("choice"), FieldValue::text("a")),
        Err(WizardError::InvalidPhase { .. })
    ));
    session.open(context()).expect("open");
    assert_eq!(
        session.set(key("detail"), FieldValue::text("x")),
        Err(WizardError::FieldNotWritable {
            step: "pick".to_string(),
            field: "detail".to_string(),
        })
    );
}

#[test]
fn back_from_first_step_stays_or_closes() {
    let mut session = WizardSession::new(flow(BackFromFirst::Stay));
    session.open(context()).expect("open");
    assert_eq!(
        session.previous().expect("previous").transition,
        Transition::Unchanged
    );
    assert_eq!(session.phase(), SessionPhase::Active);

    let mut session = WizardSession::new(flow(BackFromFirst::Close));
    session.open(context()).expect("open");
    assert_eq!(
        session.previous().expect("previous").transition,
        Transition::Closed
    );
    assert_eq!(session.phase(), SessionPhase::Cancelled);
}

#[test]
fn branch_only_step_is_reached_through_resolver_and_has_no_next() {
    let mut session = WizardSession::new(flow(BackFromFirst::Stay));
    let pick = single(session.open(context()).expect("open"));
    session.deliver(respond(&pick, json!(["help"])));
    session
        .set(key("choice"), FieldValue::text("help"))
        .expect("set");
    session.next().expect("next");
    assert_eq!(session.cursor().current().as_str(), "help");
    assert_eq!(session.view().step_number, None);
    assert_eq!(
        session.next().expect("next").transition,
        Transition::Unchanged
    );
    assert!(matches!(
        session.submit(),
        Err(WizardError::NotAtFinalStep { .. })
    ));
    session.previous().expect("previous");
    assert_eq!(session.cursor().current().as_str(), "pick");
}

#[test]
fn cursor_stays_registered_under_arbitrary_navigation() {
    let flow = flow(BackFromFirst::Stay);
    let mut session = WizardSession::new(Arc::clone(&flow));
    let mut pending = session.open(context()).expect("open");
    let mut seed: u64 = 0x5eed;

    for _ in 0..400 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let requests = match (seed >> 33) % 6 {
            0 => session.next().map(|outcome| outcome.requests),
            1 => session.previous().map(|outcome| outcome.requests),
            2 => session.set(key("choice"), FieldValue::text(if seed % 2 == 0 { "a" } else { "help" })),
            3 => session.set(key("detail"), FieldValue::text("x")),
            4 => session.set(key("agree"), FieldValue::Flag(true)),
            _ => {
                for request in pending.drain(..) {
                    let data = match request.key().endpoint.as_str() {
                        "choices" => json!(["a", "help"]),
                        _ => json!({}),
                    };
                    session.deliver(respond(&request, data));
                }
                Ok(Vec::new())
            }
        };
        if let Ok(requests) = requests {
            pending.extend(requests);
        }

        let registry = flow.registry();
        assert!(registry.contains(session.cursor().current().as_str()));
        assert!(session
            .cursor()
            .history()
            .iter()
            .all(|step| registry.contains(step.as_str())));
        assert_eq!(session.phase(), SessionPhase::Active);
    }
}

#[test]
fn double_submit_dispatches_one_mutation() {
    let mut session = session_at_finish();
    let request = match session.submit().expect("submit") {
        SubmitOutcome::Dispatched(request) => request,
        other => panic!("expected dispatch, got {other:?}"),
    };
    assert_eq!(request.endpoint.as_str(), "save");
    assert_eq!(request.payload, json!({"choice": "a", "detail": "x"}));
    assert_eq!(session.phase(), SessionPhase::Submitting);
    assert_eq!(session.submit().expect("submit"), SubmitOutcome::InFlight);
    assert!(!session.gate_state().can_submit);
    assert!(session.gate_state().is_loading);
}

#[test]
fn successful_submission_notifies_and_resets() {
    let mut session = session_at_finish();
    let events = session.subscribe();
    let SubmitOutcome::Dispatched(request) = session.submit().expect("submit") else {
        panic!("expected dispatch");
    };

    let result = session.complete_submission(MutationResponse {
        ticket: request.ticket,
        result: Ok(json!({"id": 42, "status": "PENDING"})),
    });
    let SubmissionResult::Completed(receipt) = result else {
        panic!("expected completion, got {result:?}");
    };
    assert_eq!(receipt.id, "42");
    assert_eq!(session.phase(), SessionPhase::Completed);
    assert!(session.snapshot().fields.is_empty());
    assert_eq!(session.cursor().current().as_str(), "pick");

    let completed: Vec<_> = events
        .try_iter()
        .filter(|event| matches!(event, SessionEvent::Completed(_)))
        .collect();
    assert_eq!(completed.len(), 1);

    assert_eq!(
        session.complete_submission(MutationResponse {
            ticket: request.ticket,
            result: Ok(json!({"id": 42, "status": "PENDING"})),
        }),
        SubmissionResult::Discarded
    );
}

#[test]
fn business_rejection_keeps_state_and_suggests_support() {
    let mut session = session_at_finish();
    let SubmitOutcome::Dispatched(request) = session.submit().expect("submit") else {
        panic!("expected dispatch");
    };
    let before = session.snapshot();

    let result = session.complete_submission(MutationResponse {
        ticket: request.ticket,
        result: Err(classify_failure(
            409,
            r#"{"code":"DUPLICATE_PENDING_REQUEST","message":"A request is already pending."}"#,
        )),
    });
    let SubmissionResult::Failed(error) = result else {
        panic!("expected failure, got {result:?}");
    };
    assert_eq!(error.suggested_action(), Some(SuggestedAction::ContactSupport));
    assert_eq!(session.phase(), SessionPhase::Active);
    assert_eq!(session.cursor().current().as_str(), "finish");
    assert_eq!(session.snapshot(), before);
    assert_eq!(
        session.view().error.map(|error| error.user_message()),
        Some("A request is already pending.".to_string())
    );
}

#[test]
fn stale_reference_returns_to_mapped_step_and_clears_it() {
    let mut session = session_at_finish();
    let SubmitOutcome::Dispatched(request) = session.submit().expect("submit") else {
        panic!("expected dispatch");
    };

    let result = session.complete_submission(MutationResponse {
        ticket: request.ticket,
        result: Err(classify_failure(422, r#"{"code":"CHOICE_GONE"}"#)),
    });
    let SubmissionResult::Returned { step, requests, .. } = result else {
        panic!("expected return, got {result:?}");
    };
    assert_eq!(step, id("pick"));
    assert_eq!(session.cursor().current().as_str(), "pick");
    assert!(session.cursor().history().is_empty());
    let snapshot = session.snapshot();
    assert_eq!(snapshot.get("choice"), None);
    assert_eq!(snapshot.get("detail"), None);
    assert_eq!(snapshot.get("agree"), None);
    assert_eq!(single(requests).key().endpoint.as_str(), "choices");
}

#[test]
fn transient_failure_stays_and_retry_clears_error() {
    let mut session = session_at_finish();
    let SubmitOutcome::Dispatched(request) = session.submit().expect("submit") else {
        panic!("expected dispatch");
    };
    let result = session.complete_submission(MutationResponse {
        ticket: request.ticket,
        result: Err(RemoteError::transient("connection reset")),
    });
    assert!(matches!(result, SubmissionResult::Failed(RemoteError::Transient { .. })));
    assert!(session.last_error().is_some());
    assert!(session.gate_state().can_submit);

    session.retry().expect("retry");
    assert!(session.last_error().is_none());
    assert!(matches!(
        session.submit().expect("resubmit"),
        SubmitOutcome::Dispatched(_)
    ));
}

#[test]
fn submit_revalidates_every_visited_step() {
    let mut session = session_at_finish();
    let choices = session.query("pick").expect("pick slot").key().clone();

    let refetch = single(session.refetch(&[choices]));
    assert_eq!(refetch.ticket.step, id("pick"));
    session.deliver(respond(&refetch, json!(["b"])));

    match session.submit().expect("submit") {
        SubmitOutcome::Blocked(violation) => {
            assert_eq!(violation.step, id("pick"));
            assert_eq!(violation.reason, "That choice is gone.");
        }
        other => panic!("expected block, got {other:?}"),
    }
    assert_eq!(session.phase(), SessionPhase::Active);
}

#[test]
fn observers_see_changes_and_close() {
    let mut session = WizardSession::new(flow(BackFromFirst::Stay));
    let events = session.subscribe();
    session.open(context()).expect("open");
    session.close();

    let events: Vec<_> = events.try_iter().collect();
    assert!(matches!(events.first(), Some(SessionEvent::Changed(view)) if view.step.as_str() == "pick"));
    assert!(matches!(events.last(), Some(SessionEvent::Closed)));
}
