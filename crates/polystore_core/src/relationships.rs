//! Relationship resolver: defers embedded-record lookups found in a record
//! tree, bulk-resolves them grouped by target collection, then re-injects
//! the resolved values. See spec.md §4.4.

use crate::backend::Backend;
use crate::composition::CompositionRunId;
use crate::error::{DbError, DbResult};
use crate::filter::{Criterion, Filter, Operator};
use crate::indexer::query_collect;
use crate::record::Record;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A placeholder for an embedded reference, planted in a record's field tree
/// until `resolve_deferred_records` replaces it with the target record's
/// fields (or leaves it absent, if `allow_missing` and the lookup misses).
#[derive(Debug, Clone)]
pub struct DeferredRecord {
    pub backend_name: String,
    pub collection: String,
    pub id: Value,
    /// Fields to project from the target record; empty means "all".
    pub keys: Vec<String>,
    pub allow_missing: bool,
}

impl DeferredRecord {
    fn group_key(&self) -> String {
        format!(
            "{}:{}@{}",
            self.backend_name,
            self.collection,
            self.keys.join(",")
        )
    }
}

/// One recorded deferral: where it lives (`path` into the owning record's
/// fields) and what it points to.
struct Deferral {
    record_index: usize,
    path: String,
    target: DeferredRecord,
}

/// Resolve every `DeferredRecord` reachable from `records` in place.
///
/// `backends` maps a backend name to the `Backend` used to bulk-resolve
/// references landing in that backend. `memo` is a caller-supplied cache
/// keyed by `"{group-key}:{id}"`, carried across calls so repeated
/// references to the same target issue exactly one round-trip process-wide
/// (spec.md §8 "Deferred resolution").
pub fn resolve_deferred_records(
    records: &mut [Record],
    backends: &BTreeMap<String, Arc<dyn Backend>>,
    memo: &mut BTreeMap<String, Option<BTreeMap<String, Value>>>,
) -> DbResult<()> {
    // Pass 1: defer. Walk each record's field tree, replacing every
    // DeferredRecord leaf with Value::Null and recording its location.
    let mut deferrals: Vec<Deferral> = Vec::new();
    for (index, record) in records.iter_mut().enumerate() {
        collect_deferrals(index, &mut record.fields, String::new(), &mut deferrals);
    }

    if deferrals.is_empty() {
        return Ok(());
    }

    let run_id = CompositionRunId::new();
    log::debug!("composition run {run_id}: resolving {} deferred reference(s)", deferrals.len());

    // Group unresolved deferrals by group key, collecting unique ids.
    let mut groups: BTreeMap<String, (DeferredRecord, Vec<Value>)> = BTreeMap::new();
    for deferral in &deferrals {
        let key = deferral.target.group_key();
        let memo_key = format!("{key}:{}", deferral.target.id.as_key_component());
        if memo.contains_key(&memo_key) {
            continue;
        }
        let (_, ids) = groups
            .entry(key)
            .or_insert_with(|| (deferral.target.clone(), Vec::new()));
        if !ids.contains(&deferral.target.id) {
            ids.push(deferral.target.id.clone());
        }
    }

    // Pass 2: bulk resolve per group.
    for (group_key, (sample, ids)) in &groups {
        let backend = backends.get(&sample.backend_name).ok_or_else(|| {
            DbError::Unsupported(format!(
                "no backend registered for deferred references named {:?}",
                sample.backend_name
            ))
        })?;

        let resolved = bulk_resolve_group(backend.as_ref(), sample, ids)?;
        log::debug!(
            "composition run {run_id}: group {group_key:?} resolved {}/{} id(s)",
            resolved.len(),
            ids.len()
        );
        for id in ids {
            let memo_key = format!("{group_key}:{}", id.as_key_component());
            memo.insert(memo_key, resolved.get(&id.as_key_component()).cloned());
        }
    }

    // Pass 3: re-inject. Look up each deferral's memoized result and write
    // it back at its recorded path, or error if missing and not allowed.
    for deferral in deferrals {
        let memo_key = format!(
            "{}:{}",
            deferral.target.group_key(),
            deferral.target.id.as_key_component()
        );
        match memo.get(&memo_key) {
            Some(Some(fields)) => {
                records[deferral.record_index]
                    .set_nested(&deferral.path, Value::Object(fields.clone()));
            }
            Some(None) | None => {
                if !deferral.target.allow_missing {
                    return Err(DbError::RecordNotFound {
                        collection: deferral.target.collection.clone(),
                        id: deferral.target.id.as_key_component(),
                    });
                }
                // allow_missing: leave the field absent (already Null from pass 1).
            }
        }
    }

    Ok(())
}

/// Issue one bulk query for every unique id in `ids`, falling back to
/// sequential `Retrieve` calls when the target collection has no indexer.
fn bulk_resolve_group(
    backend: &dyn Backend,
    sample: &DeferredRecord,
    ids: &[Value],
) -> DbResult<BTreeMap<String, BTreeMap<String, Value>>> {
    let mut resolved = BTreeMap::new();

    if let Some(indexer) = backend.with_search(&sample.collection) {
        let collection = backend.get_collection(&sample.collection)?;
        let filter = Filter::new()
            .with_criterion(Criterion::new(
                collection.identity_field.clone(),
                Operator::Is,
                ids.to_vec(),
            ))
            .with_fields(sample.keys.clone())
            .with_limit(1 << 20);

        for hit in query_collect(indexer.as_ref(), &collection, &filter)? {
            if let Ok(record) = hit.record {
                if let Some(id) = record.scalar_id() {
                    resolved.insert(id.as_key_component(), record.fields.clone());
                }
            }
        }
    } else {
        for id in ids {
            match backend.retrieve(&sample.collection, std::slice::from_ref(id), &sample.keys) {
                Ok(record) => {
                    resolved.insert(id.as_key_component(), record.fields);
                }
                Err(DbError::RecordNotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
    }

    Ok(resolved)
}

/// Walk a record's field tree, collecting every `DeferredRecord` leaf (a
/// `Value::Object` tagged with the `__deferred__` sentinel key planted by
/// `defer_field`/`defer_array_field`) and zeroing it in place. `Value` has no
/// dedicated placeholder variant, so the sentinel object is the on-the-wire
/// encoding of a deferred reference. Recurses into both `Value::Object` and
/// `Value::Array` children, since `defer_array_field` plants its sentinels as
/// elements of an array rather than fields of an object.
fn collect_deferrals(
    record_index: usize,
    fields: &mut BTreeMap<String, Value>,
    prefix: String,
    out: &mut Vec<Deferral>,
) {
    for (name, value) in fields.iter_mut() {
        let path = if prefix.is_empty() { name.clone() } else { format!("{prefix}.{name}") };
        walk_value(record_index, value, path, out);
    }
}

fn walk_value(record_index: usize, value: &mut Value, path: String, out: &mut Vec<Deferral>) {
    let is_sentinel = matches!(value, Value::Object(obj) if obj.contains_key(DEFERRED_SENTINEL));
    if is_sentinel {
        if let Value::Object(obj) = value {
            if let Some(deferred) = decode_sentinel(obj) {
                out.push(Deferral { record_index, path, target: deferred });
            }
        }
        *value = Value::Null;
        return;
    }

    match value {
        Value::Object(nested) => {
            for (name, child) in nested.iter_mut() {
                let child_path = format!("{path}.{name}");
                walk_value(record_index, child, child_path, out);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                let child_path = format!("{path}[{i}]");
                walk_value(record_index, item, child_path, out);
            }
        }
        _ => {}
    }
}

const DEFERRED_SENTINEL: &str = "__deferred__";

fn decode_sentinel(obj: &BTreeMap<String, Value>) -> Option<DeferredRecord> {
    let backend_name = obj.get("backend")?.as_str()?.to_string();
    let collection = obj.get("collection")?.as_str()?.to_string();
    let id = obj.get("id")?.clone();
    let allow_missing = matches!(obj.get("allow_missing"), Some(Value::Bool(true)));
    let keys = match obj.get("keys") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    Some(DeferredRecord {
        backend_name,
        collection,
        id,
        keys,
        allow_missing,
    })
}

/// Plant a `DeferredRecord` placeholder at `field` of `record`, to be
/// replaced in place by `resolve_deferred_records`.
pub fn defer_field(record: &mut Record, field: impl Into<String>, deferred: DeferredRecord) {
    let mut obj = BTreeMap::new();
    obj.insert(DEFERRED_SENTINEL.to_string(), Value::Bool(true));
    obj.insert("backend".to_string(), Value::Text(deferred.backend_name));
    obj.insert("collection".to_string(), Value::Text(deferred.collection));
    obj.insert("id".to_string(), deferred.id);
    obj.insert(
        "keys".to_string(),
        Value::Array(deferred.keys.into_iter().map(Value::Text).collect()),
    );
    obj.insert("allow_missing".to_string(), Value::Bool(deferred.allow_missing));
    record.set(field.into(), Value::Object(obj));
}

/// Rewrite `field` to hold an array of `DeferredRecord` placeholders, one
/// per id in `ids`. Per spec.md §4.4, arrays of references first reset the
/// enclosing path to an empty array, then re-set each index, so the
/// destination shape survives pass 3's re-injection.
pub fn defer_array_field(
    record: &mut Record,
    field: impl Into<String> + Clone,
    backend_name: &str,
    collection: &str,
    ids: &[Value],
    keys: &[String],
    allow_missing: bool,
) {
    record.set(field.clone(), Value::Array(Vec::new()));
    let mut items = Vec::with_capacity(ids.len());
    for id in ids {
        let mut obj = BTreeMap::new();
        obj.insert(DEFERRED_SENTINEL.to_string(), Value::Bool(true));
        obj.insert("backend".to_string(), Value::Text(backend_name.to_string()));
        obj.insert("collection".to_string(), Value::Text(collection.to_string()));
        obj.insert("id".to_string(), id.clone());
        obj.insert(
            "keys".to_string(),
            Value::Array(keys.iter().map(|k| Value::Text(k.clone())).collect()),
        );
        obj.insert("allow_missing".to_string(), Value::Bool(allow_missing));
        items.push(Value::Object(obj));
    }
    // Re-set each index individually via set_nested so the array-index
    // write path is exercised the same way a caller resolving one item at a
    // time would use it.
    for (i, item) in items.into_iter().enumerate() {
        record.set_nested(&format!("{}[{}]", field.clone().into(), i), item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter as CoreFilter;
    use crate::indexer::{IndexPage, IndexResult, Indexer, ResultFn};
    use crate::schema::Collection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct InMemoryBackend {
        collection: Collection,
        rows: BTreeMap<String, BTreeMap<String, Value>>,
        query_calls: AtomicUsize,
    }

    impl Backend for InMemoryBackend {
        fn initialize(&self) -> DbResult<()> {
            Ok(())
        }
        fn ping(&self, _timeout: std::time::Duration) -> DbResult<()> {
            Ok(())
        }
        fn register_collection(&self, _definition: Collection) -> DbResult<()> {
            Ok(())
        }
        fn get_collection(&self, _name: &str) -> DbResult<Collection> {
            Ok(self.collection.clone())
        }
        fn list_collections(&self) -> Vec<String> {
            vec![self.collection.name.clone()]
        }
        fn create_collection(&self, _definition: Collection) -> DbResult<()> {
            Ok(())
        }
        fn delete_collection(&self, _name: &str) -> DbResult<()> {
            Ok(())
        }
        fn insert(&self, _collection: &str, _records: Vec<Record>) -> DbResult<crate::record::RecordSet> {
            unimplemented!()
        }
        fn update(
            &self,
            _collection: &str,
            _records: Vec<Record>,
            _target_expr: Option<CoreFilter>,
        ) -> DbResult<crate::record::RecordSet> {
            unimplemented!()
        }
        fn delete(&self, _collection: &str, _ids: Vec<Vec<Value>>) -> DbResult<u64> {
            unimplemented!()
        }
        fn retrieve(&self, _collection: &str, _id: &[Value], _fields: &[String]) -> DbResult<Record> {
            unimplemented!()
        }
        fn exists(&self, _collection: &str, _id: &[Value]) -> DbResult<bool> {
            unimplemented!()
        }
        fn with_search(&self, _collection: &str) -> Option<Arc<dyn Indexer>> {
            None
        }
        fn with_aggregator(&self, _collection: &str) -> Option<Arc<dyn crate::aggregator::Aggregator>> {
            None
        }
        fn flush(&self) -> DbResult<()> {
            Ok(())
        }
    }

    impl Indexer for InMemoryBackend {
        fn index_initialize(&self, _parent: Arc<dyn Backend>) -> DbResult<()> {
            Ok(())
        }
        fn index_exists(&self, _collection: &str, _id: &str) -> DbResult<bool> {
            Ok(false)
        }
        fn index_retrieve(&self, _collection: &str, _id: &str) -> DbResult<Record> {
            Err(DbError::NotImplemented("unused".into()))
        }
        fn index_remove(&self, _collection: &str, _id: &str) -> DbResult<()> {
            Ok(())
        }
        fn query_func(
            &self,
            _collection: &Collection,
            filter: &CoreFilter,
            result_fn: &mut ResultFn<'_>,
        ) -> DbResult<()> {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            let wanted: Vec<String> = filter
                .criteria
                .first()
                .map(|c| c.values.iter().map(|v| v.as_key_component()).collect())
                .unwrap_or_default();
            for id in &wanted {
                if let Some(fields) = self.rows.get(id) {
                    let mut record = Record::with_id(Value::Text(id.clone()));
                    record.fields = fields.clone();
                    result_fn(IndexResult {
                        record: Ok(record),
                        page: IndexPage {
                            total_results: Some(wanted.len() as u64),
                            ..Default::default()
                        },
                    })?;
                }
            }
            Ok(())
        }
        fn list_values(
            &self,
            _c: &Collection,
            _f: &[String],
            _filter: &CoreFilter,
        ) -> DbResult<BTreeMap<String, Vec<Value>>> {
            Ok(Default::default())
        }
        fn delete_query(&self, _c: &Collection, _filter: &CoreFilter) -> DbResult<u64> {
            Ok(0)
        }
        fn flush_index(&self) -> DbResult<()> {
            Ok(())
        }
        fn get_backend(&self) -> Arc<dyn Backend> {
            panic!("unused in this test")
        }
    }

    // Backend + Indexer both implemented by the same struct; wire a
    // trait-object pair so `with_search` can return `self` as an `Indexer`.
    struct Composite(Arc<InMemoryBackend>);
    impl Backend for Composite {
        fn initialize(&self) -> DbResult<()> {
            self.0.initialize()
        }
        fn ping(&self, t: std::time::Duration) -> DbResult<()> {
            self.0.ping(t)
        }
        fn register_collection(&self, d: Collection) -> DbResult<()> {
            self.0.register_collection(d)
        }
        fn get_collection(&self, n: &str) -> DbResult<Collection> {
            self.0.get_collection(n)
        }
        fn list_collections(&self) -> Vec<String> {
            self.0.list_collections()
        }
        fn create_collection(&self, d: Collection) -> DbResult<()> {
            self.0.create_collection(d)
        }
        fn delete_collection(&self, n: &str) -> DbResult<()> {
            self.0.delete_collection(n)
        }
        fn insert(&self, c: &str, r: Vec<Record>) -> DbResult<crate::record::RecordSet> {
            self.0.insert(c, r)
        }
        fn update(
            &self,
            c: &str,
            r: Vec<Record>,
            t: Option<CoreFilter>,
        ) -> DbResult<crate::record::RecordSet> {
            self.0.update(c, r, t)
        }
        fn delete(&self, c: &str, ids: Vec<Vec<Value>>) -> DbResult<u64> {
            self.0.delete(c, ids)
        }
        fn retrieve(&self, c: &str, id: &[Value], f: &[String]) -> DbResult<Record> {
            self.0.retrieve(c, id, f)
        }
        fn exists(&self, c: &str, id: &[Value]) -> DbResult<bool> {
            self.0.exists(c, id)
        }
        fn with_search(&self, _collection: &str) -> Option<Arc<dyn Indexer>> {
            Some(self.0.clone() as Arc<dyn Indexer>)
        }
        fn with_aggregator(&self, c: &str) -> Option<Arc<dyn crate::aggregator::Aggregator>> {
            self.0.with_aggregator(c)
        }
        fn flush(&self) -> DbResult<()> {
            self.0.flush()
        }
    }

    #[test]
    fn duplicate_references_issue_exactly_one_bulk_query() {
        let mut rows = BTreeMap::new();
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::Text("grace".to_string()));
        rows.insert("7".to_string(), fields);

        let inner = Arc::new(InMemoryBackend {
            collection: Collection::new("users"),
            rows,
            query_calls: AtomicUsize::new(0),
        });
        let mut backends: BTreeMap<String, Arc<dyn Backend>> = BTreeMap::new();
        backends.insert("main".to_string(), Arc::new(Composite(inner.clone())));

        let mut a = Record::with_id(Value::Text("a".into()));
        defer_field(
            &mut a,
            "author",
            DeferredRecord {
                backend_name: "main".into(),
                collection: "users".into(),
                id: Value::Text("7".into()),
                keys: vec!["name".into()],
                allow_missing: false,
            },
        );
        let mut b = Record::with_id(Value::Text("b".into()));
        defer_field(
            &mut b,
            "author",
            DeferredRecord {
                backend_name: "main".into(),
                collection: "users".into(),
                id: Value::Text("7".into()),
                keys: vec!["name".into()],
                allow_missing: false,
            },
        );

        let mut records = vec![a, b];
        let mut memo = BTreeMap::new();
        resolve_deferred_records(&mut records, &backends, &mut memo).unwrap();

        assert_eq!(inner.query_calls.load(Ordering::SeqCst), 1);
        for record in &records {
            match record.get("author") {
                Some(Value::Object(obj)) => {
                    assert_eq!(obj.get("name"), Some(&Value::Text("grace".into())));
                }
                other => panic!("expected resolved object, got {other:?}"),
            }
        }
    }

    #[test]
    fn array_of_references_resolves_every_element() {
        let mut rows = BTreeMap::new();
        let mut grace = BTreeMap::new();
        grace.insert("name".to_string(), Value::Text("grace".to_string()));
        rows.insert("7".to_string(), grace);
        let mut ada = BTreeMap::new();
        ada.insert("name".to_string(), Value::Text("ada".to_string()));
        rows.insert("9".to_string(), ada);

        let inner = Arc::new(InMemoryBackend {
            collection: Collection::new("users"),
            rows,
            query_calls: AtomicUsize::new(0),
        });
        let mut backends: BTreeMap<String, Arc<dyn Backend>> = BTreeMap::new();
        backends.insert("main".to_string(), Arc::new(Composite(inner.clone())));

        let mut post = Record::with_id(Value::Text("p1".into()));
        defer_array_field(
            &mut post,
            "authors",
            "main",
            "users",
            &[Value::Text("7".into()), Value::Text("9".into())],
            &["name".to_string()],
            false,
        );

        let mut records = vec![post];
        let mut memo = BTreeMap::new();
        resolve_deferred_records(&mut records, &backends, &mut memo).unwrap();

        match records[0].get("authors") {
            Some(Value::Array(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(
                    items[0],
                    Value::Object(BTreeMap::from([("name".to_string(), Value::Text("grace".into()))]))
                );
                assert_eq!(
                    items[1],
                    Value::Object(BTreeMap::from([("name".to_string(), Value::Text("ada".into()))]))
                );
            }
            other => panic!("expected resolved array, got {other:?}"),
        }
    }

    #[test]
    fn missing_reference_without_allow_missing_is_an_error() {
        let inner = Arc::new(InMemoryBackend {
            collection: Collection::new("users"),
            rows: BTreeMap::new(),
            query_calls: AtomicUsize::new(0),
        });
        let mut backends: BTreeMap<String, Arc<dyn Backend>> = BTreeMap::new();
        backends.insert("main".to_string(), Arc::new(Composite(inner)));

        let mut a = Record::with_id(Value::Text("a".into()));
        defer_field(
            &mut a,
            "author",
            DeferredRecord {
                backend_name: "main".into(),
                collection: "users".into(),
                id: Value::Text("missing".into()),
                keys: vec!["name".into()],
                allow_missing: false,
            },
        );
        let mut records = vec![a];
        let mut memo = BTreeMap::new();
        let result = resolve_deferred_records(&mut records, &backends, &mut memo);
        assert!(matches!(result, Err(DbError::RecordNotFound { .. })));
    }
}
