use eduflow::remote::{
    classify_failure, CacheLookup, CacheTag, QueryCache, QueryKey, QueryRequest, QueryTicket,
    RemoteError, Severity, SuggestedAction,
};
use eduflow::shared::{EndpointId, StepId};
use serde_json::json;

fn request(endpoint: &str, class_id: &str, tag: &str) -> QueryRequest {
    let key = QueryKey::new(EndpointId::parse(endpoint).expect("endpoint"))
        .with_param("classId", class_id);
    QueryRequest {
        ticket: QueryTicket {
            generation: 1,
            step: StepId::parse("select_target").expect("step"),
            key,
        },
        tags: vec![CacheTag::collection(tag)],
    }
}

fn fill(cache: &mut QueryCache, request: &QueryRequest) {
    assert_eq!(cache.lookup_or_begin(request), CacheLookup::Miss);
    cache.complete(request.key(), &Ok(json!([request.key().param("classId")])));
}

#[test]
fn invalidation_only_touches_matching_tags() {
    let mut cache = QueryCache::default();
    let options = request("transfer_options", "C1", "transfer-options");
    let quota = request("transfer_quota", "C1", "transfer-quota");
    fill(&mut cache, &options);
    fill(&mut cache, &quota);

    let keys = cache.invalidate(&[CacheTag::collection("transfer-quota")]);
    assert_eq!(keys, vec![quota.key().clone()]);
    assert!(cache.is_stale(quota.key()));
    assert!(!cache.is_stale(options.key()));

    assert!(matches!(cache.lookup_or_begin(&options), CacheLookup::Fresh(_)));
    assert_eq!(cache.lookup_or_begin(&quota), CacheLookup::Miss);
    assert_eq!(cache.peek(quota.key()), Some(&json!(["C1"])));
}

#[test]
fn focus_marks_every_entry_stale() {
    let mut cache = QueryCache::default();
    let a = request("transfer_options", "A", "transfer-options");
    let b = request("transfer_options", "B", "transfer-options");
    fill(&mut cache, &a);
    fill(&mut cache, &b);

    let mut keys = cache.on_focus();
    keys.sort();
    let mut expected = vec![a.key().clone(), b.key().clone()];
    expected.sort();
    assert_eq!(keys, expected);
    assert!(cache.is_stale(a.key()) && cache.is_stale(b.key()));
}

#[test]
fn forget_drops_settled_entries_and_poisons_in_flight_ones() {
    let mut cache = QueryCache::default();
    let settled = request("transfer_options", "A", "transfer-options");
    let pending = request("transfer_options", "B", "transfer-options");
    fill(&mut cache, &settled);
    assert_eq!(cache.lookup_or_begin(&pending), CacheLookup::Miss);

    cache.forget(settled.key());
    cache.forget(pending.key());
    assert!(cache.peek(settled.key()).is_none());
    assert_eq!(cache.len(), 1);

    assert_eq!(
        cache.complete(pending.key(), &Ok(json!([]))),
        vec![pending.ticket.clone()]
    );
    assert!(cache.is_stale(pending.key()));
    assert_eq!(cache.lookup_or_begin(&pending), CacheLookup::Miss);
}

#[test]
fn completing_an_unknown_key_has_no_waiters() {
    let mut cache = QueryCache::default();
    let options = request("transfer_options", "C1", "transfer-options");
    assert!(cache.complete(options.key(), &Ok(json!([]))).is_empty());
    fill(&mut cache, &options);
    assert!(cache.complete(options.key(), &Ok(json!([]))).is_empty());
}

#[test]
fn least_recently_used_entry_is_evicted() {
    let mut cache = QueryCache::new(2);
    let a = request("transfer_options", "A", "transfer-options");
    let b = request("transfer_options", "B", "transfer-options");
    let c = request("transfer_options", "C", "transfer-options");
    fill(&mut cache, &a);
    fill(&mut cache, &b);
    assert!(matches!(cache.lookup_or_begin(&a), CacheLookup::Fresh(_)));

    fill(&mut cache, &c);
    assert_eq!(cache.len(), 2);
    assert!(cache.peek(a.key()).is_some());
    assert!(cache.peek(b.key()).is_none());

    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn failure_classification_covers_transport_and_business_errors() {
    for status in [500, 502, 408, 429] {
        assert!(matches!(
            classify_failure(status, "{}"),
            RemoteError::Transient { .. }
        ));
    }

    let full = classify_failure(409, r#"{"code":"class_full","target":"select_target"}"#);
    assert_eq!(full.code(), Some("CLASS_FULL"));
    assert_eq!(full.severity(), Severity::Warning);
    assert_eq!(
        full.suggested_action(),
        Some(SuggestedAction::Navigate {
            target: Some("select_target".to_string())
        })
    );
    assert_eq!(full.user_message(), "The request could not be completed.");

    let unauthorized = classify_failure(401, "");
    assert_eq!(unauthorized.severity(), Severity::Error);
    assert_eq!(unauthorized.code(), None);

    let explicit = classify_failure(
        400,
        r#"{"code":"INVALID_DATE","message":"Start date is in the past","severity":"info","action":"retry"}"#,
    );
    assert_eq!(explicit.severity(), Severity::Info);
    assert_eq!(explicit.suggested_action(), Some(SuggestedAction::Retry));
}
