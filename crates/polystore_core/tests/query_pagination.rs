//! Exercises `run_query` against the in-memory testkit backend, checking the
//! pagination invariant from spec.md §8: for `limit=L` over `F` matches,
//! `ceil(F/L)` pages are emitted and CRUD round-trips by identity.

use polystore_core::{run_query, Criterion, Filter, Operator, Value};
use polystore_testkit::{sample_users_collection, seed_users, InMemoryBackend};

#[test]
fn insert_then_retrieve_round_trips_by_identity() {
    let backend = InMemoryBackend::new();
    seed_users(&backend, &[(1, "a"), (2, "b")]);

    let record = backend.retrieve("users", &[Value::Int(1)], &[]).unwrap();
    assert_eq!(record.get("name"), Some(&Value::Text("a".to_string())));
}

#[test]
fn prefix_query_matches_one_of_two_seeded_records() {
    let backend = InMemoryBackend::new();
    seed_users(&backend, &[(1, "a"), (2, "b")]);

    let collection = sample_users_collection();
    let indexer = backend.with_search("users").unwrap();
    let filter = Filter::new().with_criterion(Criterion::new(
        "name",
        Operator::Prefix,
        vec![Value::Text("a".to_string())],
    ));

    let result = run_query(indexer.as_ref(), Some(backend.as_ref()), &collection, &filter).unwrap();
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.result_count, Some(1));
    assert_eq!(result.records[0].get("name"), Some(&Value::Text("a".to_string())));
}

#[test]
fn pagination_emits_ceil_total_over_limit_pages() {
    let backend = InMemoryBackend::new();
    let rows: Vec<(i64, &str)> = (0..7).map(|i| (i, "row")).collect();
    seed_users(&backend, &rows);

    let collection = sample_users_collection();
    let indexer = backend.with_search("users").unwrap();

    let mut seen_pages = std::collections::BTreeSet::new();
    let limit = 3;
    for offset in (0..7).step_by(limit as usize) {
        let filter = Filter::new().with_limit(limit).with_offset(offset);
        let result = run_query(indexer.as_ref(), Some(backend.as_ref()), &collection, &filter).unwrap();
        assert_eq!(result.total_pages, 7u64.div_ceil(limit));
        seen_pages.insert(result.page);
    }
    assert_eq!(seen_pages.len(), 7usize.div_ceil(limit as usize));
}

#[test]
fn exists_reports_false_for_a_missing_id() {
    let backend = InMemoryBackend::new();
    seed_users(&backend, &[(1, "a")]);
    assert!(!backend.exists("users", &[Value::Int(99)]).unwrap());
    assert!(backend.exists("users", &[Value::Int(1)]).unwrap());
}
