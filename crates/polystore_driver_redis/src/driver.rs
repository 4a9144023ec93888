use crate::filter_match;
use crate::keys;
use polystore_core::{
    Aggregate, Aggregator, Backend, Collection, ConnectionString, DbError, DbResult, Filter, IndexPage, IndexResult,
    Indexer, Record, RecordSet, ResultFn, Value, EXACT_COUNT_CAP,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use uuid::Uuid;

const SCAN_BATCH: usize = 500;

/// A `Backend`+`Indexer`+`Aggregator` over a single Redis connection.
/// Records live one-per-hash under `keys::record_key`; there is no native
/// query language, so `Indexer`/`Aggregator` both fall back to a `SCAN` of
/// the collection's keyspace with the predicate evaluated client-side, the
/// same fallback `Aggregator`'s own contract sanctions for stores without
/// native grouping support.
pub struct RedisBackend {
    connection: Mutex<redis::Connection>,
    prefix: String,
    dataset: String,
    cancelled: AtomicBool,
    collections: RwLock<HashMap<String, Collection>>,
    self_ref: Weak<RedisBackend>,
}

impl RedisBackend {
    pub fn connect(cs: &ConnectionString) -> DbResult<Arc<Self>> {
        if cs.dataset.is_empty() {
            return Err(DbError::Validation(
                "redis connection string requires a dataset namespace".to_string(),
            ));
        }

        let host = if cs.host.is_empty() { "localhost".to_string() } else { cs.host.clone() };
        let port = cs.port.unwrap_or(6379);

        let mut uri = String::from("redis://");
        if let Some(user) = &cs.user {
            uri.push_str(&urlencoding::encode(user));
            if let Some(password) = &cs.password {
                uri.push(':');
                uri.push_str(&urlencoding::encode(password));
            }
            uri.push('@');
        }
        uri.push_str(&format!("{host}:{port}/0"));

        let client = redis::Client::open(uri.as_str())
            .map_err(|e| DbError::unavailable(format!("failed to build redis client for {host}:{port}: {e}")))?;
        let connection = client
            .get_connection()
            .map_err(|e| DbError::unavailable(format!("failed to connect to redis at {host}:{port}: {e}")))?;

        Ok(Arc::new_cyclic(|weak| Self {
            connection: Mutex::new(connection),
            prefix: cs.prefix().to_string(),
            dataset: cs.dataset.clone(),
            cancelled: AtomicBool::new(false),
            collections: RwLock::new(HashMap::new()),
            self_ref: weak.clone(),
        }))
    }

    fn self_arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("RedisBackend outlived its own Arc")
    }

    fn get_collection_or_err(&self, name: &str) -> DbResult<Collection> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::collection_not_found(name))
    }

    fn record_key_for(&self, schema: &Collection, id: &[Value]) -> DbResult<String> {
        let components = schema.build_identity_components(id)?;
        let values: Vec<Value> = components.into_iter().map(|(_, v)| v).collect();
        let encoded = schema.encode_compound_id(&values);
        Ok(keys::record_key(&self.prefix, &self.dataset, &schema.name, &encoded))
    }

    /// Full linear scan of a collection's keyspace, decoded into records and
    /// filtered to exclude the schema pointer. Every `Indexer`/`Aggregator`
    /// operation is built on top of this.
    fn scan_records(&self, collection_name: &str) -> DbResult<Vec<Record>> {
        let schema = self.get_collection_or_err(collection_name)?;
        let pattern = keys::scan_pattern(&self.prefix, &self.dataset, collection_name);
        let schema_key = keys::schema_key(&self.prefix, &self.dataset, collection_name);

        let mut conn = self.connection.lock().unwrap();
        let keys = scan_all(&mut conn, &pattern)?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if key == schema_key {
                continue;
            }
            let hash: HashMap<String, String> = redis::cmd("HGETALL")
                .arg(&key)
                .query(&mut *conn)
                .map_err(|e| DbError::driver(format!("scan read on {collection_name:?} failed: {e}")))?;
            if hash.is_empty() {
                continue;
            }
            records.push(decode_record_hash(&schema, &hash)?);
        }
        Ok(records)
    }
}

impl Backend for RedisBackend {
    fn initialize(&self) -> DbResult<()> {
        self.ping(Duration::from_secs(10))
    }

    fn ping(&self, _timeout: Duration) -> DbResult<()> {
        let mut conn = self.connection.lock().unwrap();
        redis::cmd("PING")
            .query::<String>(&mut *conn)
            .map(|_| ())
            .map_err(|e| DbError::unavailable(format!("redis ping failed: {e}")))
    }

    fn register_collection(&self, definition: Collection) -> DbResult<()> {
        let schema_key = keys::schema_key(&self.prefix, &self.dataset, &definition.name);
        let payload = serde_json::to_string(&definition)
            .map_err(|e| DbError::driver(format!("failed to encode schema for {:?}: {e}", definition.name)))?;

        let mut conn = self.connection.lock().unwrap();
        let set: Option<String> = redis::cmd("SET")
            .arg(&schema_key)
            .arg(&payload)
            .arg("NX")
            .query(&mut *conn)
            .map_err(|e| DbError::driver(format!("failed to persist schema for {:?}: {e}", definition.name)))?;

        let resolved = if set.is_some() {
            definition
        } else {
            let existing: String = redis::cmd("GET")
                .arg(&schema_key)
                .query(&mut *conn)
                .map_err(|e| DbError::driver(format!("failed to read schema for {:?}: {e}", definition.name)))?;
            serde_json::from_str(&existing)
                .map_err(|e| DbError::driver(format!("failed to decode schema for {:?}: {e}", definition.name)))?
        };

        self.collections.write().unwrap().entry(resolved.name.clone()).or_insert(resolved);
        Ok(())
    }

    fn get_collection(&self, name: &str) -> DbResult<Collection> {
        self.get_collection_or_err(name)
    }

    fn list_collections(&self) -> Vec<String> {
        self.collections.read().unwrap().keys().cloned().collect()
    }

    fn create_collection(&self, definition: Collection) -> DbResult<()> {
        if self.collections.read().unwrap().contains_key(&definition.name) {
            return Err(DbError::Validation(format!("collection {:?} already exists", definition.name)));
        }
        self.register_collection(definition)
    }

    fn delete_collection(&self, name: &str) -> DbResult<()> {
        let pattern = keys::scan_pattern(&self.prefix, &self.dataset, name);
        let schema_key = keys::schema_key(&self.prefix, &self.dataset, name);

        let mut conn = self.connection.lock().unwrap();
        let mut record_keys = scan_all(&mut conn, &pattern)?;
        record_keys.push(schema_key);
        if !record_keys.is_empty() {
            let mut cmd = redis::cmd("DEL");
            for key in &record_keys {
                cmd.arg(key);
            }
            cmd.query::<i64>(&mut *conn)
                .map_err(|e| DbError::driver(format!("failed to drop collection {name:?}: {e}")))?;
        }
        drop(conn);

        self.collections.write().unwrap().remove(name);
        Ok(())
    }

    fn insert(&self, collection: &str, records: Vec<Record>) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let mut conn = self.connection.lock().unwrap();

        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            let mut rec = record;
            let has_identity = rec.get(&schema.identity_field).map(|v| !v.is_null()).unwrap_or(false);
            if !has_identity {
                rec.set(schema.identity_field.clone(), Value::Text(Uuid::new_v4().to_string()));
            }
            rec.id = schema.key_fields().iter().map(|f| rec.get(&f.name).cloned().unwrap_or(Value::Null)).collect();

            let key = self.record_key_for(&schema, &rec.id)?;
            let pairs = encode_record_fields(&rec)?;
            hset_record(&mut conn, &key, &pairs)
                .map_err(|e| DbError::driver(format!("insert into {collection:?} failed: {e}")))?;
            stored.push(rec);
        }

        Ok(RecordSet::from_records(stored))
    }

    fn update(&self, collection: &str, records: Vec<Record>, target_expr: Option<Filter>) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let mut updated = Vec::new();

        match target_expr {
            None => {
                let mut conn = self.connection.lock().unwrap();
                for record in records {
                    if record.id.is_empty() {
                        return Err(DbError::Validation(
                            "update without target_expr requires every record to carry an id".to_string(),
                        ));
                    }
                    let key = self.record_key_for(&schema, &record.id)?;
                    let pairs = encode_record_fields(&record)?;
                    hset_record(&mut conn, &key, &pairs)
                        .map_err(|e| DbError::driver(format!("update on {collection:?} failed: {e}")))?;
                    updated.push(record);
                }
            }
            Some(filter) => {
                let mut matched = self.scan_records(&schema.name)?;
                matched.retain(|r| filter_match::matches_filter(r, &filter));

                let mut conn = self.connection.lock().unwrap();
                for record in records {
                    let pairs = encode_record_fields(&record)?;
                    for target in &matched {
                        let key = self.record_key_for(&schema, &target.id)?;
                        hset_record(&mut conn, &key, &pairs)
                            .map_err(|e| DbError::driver(format!("target-expr update on {collection:?} failed: {e}")))?;
                    }
                    updated.push(record);
                }
            }
        }

        Ok(RecordSet::from_records(updated))
    }

    fn delete(&self, collection: &str, ids: Vec<Vec<Value>>) -> DbResult<u64> {
        let schema = self.get_collection_or_err(collection)?;
        let mut conn = self.connection.lock().unwrap();
        let mut affected = 0u64;
        for id in ids {
            let key = self.record_key_for(&schema, &id)?;
            let deleted: i64 = redis::cmd("DEL")
                .arg(&key)
                .query(&mut *conn)
                .map_err(|e| DbError::driver(format!("delete on {collection:?} failed: {e}")))?;
            affected += deleted as u64;
        }
        Ok(affected)
    }

    fn retrieve(&self, collection: &str, id: &[Value], fields: &[String]) -> DbResult<Record> {
        let schema = self.get_collection_or_err(collection)?;
        let key = self.record_key_for(&schema, id)?;

        let mut conn = self.connection.lock().unwrap();
        let hash: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&key)
            .query(&mut *conn)
            .map_err(|e| DbError::driver(format!("retrieve from {collection:?} failed: {e}")))?;

        if hash.is_empty() {
            return Err(DbError::record_not_found(
                collection,
                id.iter().map(Value::as_key_component).collect::<Vec<_>>().join(","),
            ));
        }

        let mut record = decode_record_hash(&schema, &hash)?;
        if !fields.is_empty() {
            record.fields.retain(|name, _| fields.contains(name) || name == &schema.identity_field);
        }
        Ok(record)
    }

    fn exists(&self, collection: &str, id: &[Value]) -> DbResult<bool> {
        let schema = self.get_collection_or_err(collection)?;
        let key = self.record_key_for(&schema, id)?;
        let mut conn = self.connection.lock().unwrap();
        let count: i64 = redis::cmd("EXISTS")
            .arg(&key)
            .query(&mut *conn)
            .map_err(|e| DbError::driver(format!("exists check on {collection:?} failed: {e}")))?;
        Ok(count > 0)
    }

    fn with_search(&self, _collection: &str) -> Option<Arc<dyn Indexer>> {
        Some(self.self_arc())
    }

    fn with_aggregator(&self, _collection: &str) -> Option<Arc<dyn Aggregator>> {
        Some(self.self_arc())
    }

    fn flush(&self) -> DbResult<()> {
        Ok(())
    }

    fn estimate_count(&self, collection: &str) -> DbResult<u64> {
        let pattern = keys::scan_pattern(&self.prefix, &self.dataset, collection);
        let schema_key = keys::schema_key(&self.prefix, &self.dataset, collection);

        let mut conn = self.connection.lock().unwrap();
        let mut cursor: u64 = 0;
        let mut count: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query(&mut *conn)
                .map_err(|e| DbError::driver(format!("count on {collection:?} failed: {e}")))?;
            count += batch.iter().filter(|k| *k != &schema_key).count() as u64;
            if count >= EXACT_COUNT_CAP || next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(count.min(EXACT_COUNT_CAP))
    }
}

fn hset_record(conn: &mut redis::Connection, key: &str, pairs: &[(String, String)]) -> redis::RedisResult<()> {
    if pairs.is_empty() {
        return Ok(());
    }
    let mut cmd = redis::cmd("HSET");
    cmd.arg(key);
    for (field, value) in pairs {
        cmd.arg(field).arg(value);
    }
    cmd.query::<()>(conn)
}

fn scan_all(conn: &mut redis::Connection, pattern: &str) -> DbResult<Vec<String>> {
    let mut cursor: u64 = 0;
    let mut out = Vec::new();
    loop {
        let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query(conn)
            .map_err(|e| DbError::driver(format!("scan failed: {e}")))?;
        out.extend(batch);
        if next_cursor == 0 {
            break;
        }
        cursor = next_cursor;
    }
    Ok(out)
}

fn decode_record_hash(schema: &Collection, hash: &HashMap<String, String>) -> DbResult<Record> {
    let mut record = Record::new();
    for (field, raw) in hash {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| DbError::driver(format!("failed to decode field {field:?}: {e}")))?;
        record.set(field.clone(), value);
    }
    record.id = schema.key_fields().iter().map(|f| record.get(&f.name).cloned().unwrap_or(Value::Null)).collect();
    Ok(record)
}

fn encode_record_fields(record: &Record) -> DbResult<Vec<(String, String)>> {
    record
        .fields
        .iter()
        .map(|(name, value)| {
            serde_json::to_string(value)
                .map(|encoded| (name.clone(), encoded))
                .map_err(|e| DbError::driver(format!("failed to encode field {name:?}: {e}")))
        })
        .collect()
}

fn decode_index_id(collection: &Collection, id: &str) -> Vec<Value> {
    collection.split_compound_id(id).into_iter().map(Value::Text).collect()
}

impl Indexer for RedisBackend {
    fn index_initialize(&self, _parent: Arc<dyn Backend>) -> DbResult<()> {
        // Colocated: the index plane *is* the primary hash keyspace.
        Ok(())
    }

    fn index_exists(&self, collection: &str, id: &str) -> DbResult<bool> {
        let schema = self.get_collection_or_err(collection)?;
        let components = decode_index_id(&schema, id);
        Backend::exists(self, collection, &components)
    }

    fn index_retrieve(&self, collection: &str, id: &str) -> DbResult<Record> {
        let schema = self.get_collection_or_err(collection)?;
        let components = decode_index_id(&schema, id);
        Backend::retrieve(self, collection, &components, &[])
    }

    fn index_remove(&self, collection: &str, id: &str) -> DbResult<()> {
        let schema = self.get_collection_or_err(collection)?;
        let components = decode_index_id(&schema, id);
        Backend::delete(self, collection, vec![components]).map(|_| ())
    }

    fn query_func(&self, collection: &Collection, filter: &Filter, result_fn: &mut ResultFn<'_>) -> DbResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(DbError::unavailable("query cancelled"));
        }

        let mut records = self.scan_records(&collection.name)?;
        records.retain(|r| filter_match::matches_filter(r, filter));
        filter_match::sort_records(&mut records, filter);

        let total_results = Some(records.len() as u64);
        let limit = filter.effective_limit();
        let offset = filter.effective_offset();
        let total_pages =
            total_results.map(|total| if limit == 0 || limit == u64::MAX { 1 } else { total.div_ceil(limit).max(1) });
        let page = if limit == 0 || limit == u64::MAX { 1 } else { offset / limit + 1 };
        let index_page = IndexPage { page, total_pages, limit, offset, total_results };

        let tail = records.into_iter().skip(offset as usize);
        let window: Vec<Record> = if limit == u64::MAX { tail.collect() } else { tail.take(limit as usize).collect() };

        for record in window {
            result_fn(IndexResult { record: Ok(record), page: index_page })?;
        }
        Ok(())
    }

    fn list_values(
        &self,
        collection: &Collection,
        fields: &[String],
        filter: &Filter,
    ) -> DbResult<BTreeMap<String, Vec<Value>>> {
        let mut records = self.scan_records(&collection.name)?;
        records.retain(|r| filter_match::matches_filter(r, filter));

        let mut out = BTreeMap::new();
        for field in fields {
            let mut seen: Vec<Value> = Vec::new();
            for record in &records {
                let value = if field == "id" {
                    record.scalar_id().cloned().unwrap_or(Value::Null)
                } else {
                    record.get(field).cloned().unwrap_or(Value::Null)
                };
                if !seen.contains(&value) {
                    seen.push(value);
                }
            }
            out.insert(field.clone(), seen);
        }
        Ok(out)
    }

    fn delete_query(&self, collection: &Collection, filter: &Filter) -> DbResult<u64> {
        let mut records = self.scan_records(&collection.name)?;
        records.retain(|r| filter_match::matches_filter(r, filter));

        let mut conn = self.connection.lock().unwrap();
        let mut affected = 0u64;
        for record in &records {
            let key = self.record_key_for(collection, &record.id)?;
            let deleted: i64 = redis::cmd("DEL")
                .arg(&key)
                .query(&mut *conn)
                .map_err(|e| DbError::driver(format!("delete_query on {:?} failed: {e}", collection.name)))?;
            affected += deleted as u64;
        }
        Ok(affected)
    }

    fn flush_index(&self) -> DbResult<()> {
        Ok(())
    }

    fn get_backend(&self) -> Arc<dyn Backend> {
        self.self_arc()
    }
}

/// Stream every row matching `filter` into memory; Redis has no native
/// grouping, so every scalar reducer and `group_by` reduces client-side atop
/// `Indexer::query_func`, as `Aggregator`'s own contract allows.
fn collect_rows(backend: &RedisBackend, collection: &str, filter: &Filter) -> DbResult<Vec<Record>> {
    let schema = backend.get_collection_or_err(collection)?;
    let mut rows = Vec::new();
    Indexer::query_func(backend, &schema, filter, &mut |result| {
        if let Ok(record) = result.record {
            rows.push(record);
        }
        Ok(())
    })?;
    Ok(rows)
}

impl Aggregator for RedisBackend {
    fn sum(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<f64> {
        let rows = collect_rows(self, collection, filter)?;
        Ok(rows.iter().filter_map(|r| r.get(field).and_then(Value::as_float)).sum())
    }

    fn count(&self, collection: &str, filter: &Filter) -> DbResult<u64> {
        let rows = collect_rows(self, collection, filter)?;
        Ok(rows.len() as u64)
    }

    fn min(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<Value> {
        let rows = collect_rows(self, collection, filter)?;
        Ok(rows.iter().filter_map(|r| r.get(field).cloned()).filter(|v| !v.is_null()).min().unwrap_or(Value::Null))
    }

    fn max(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<Value> {
        let rows = collect_rows(self, collection, filter)?;
        Ok(rows.iter().filter_map(|r| r.get(field).cloned()).filter(|v| !v.is_null()).max().unwrap_or(Value::Null))
    }

    fn avg(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<f64> {
        let rows = collect_rows(self, collection, filter)?;
        let values: Vec<f64> = rows.iter().filter_map(|r| r.get(field).and_then(Value::as_float)).collect();
        if values.is_empty() {
            Ok(0.0)
        } else {
            Ok(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    fn group_by(
        &self,
        collection: &str,
        group_fields: &[String],
        aggregates: &[Aggregate],
        filter: &Filter,
    ) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let rows = collect_rows(self, collection, filter)?;
        Ok(polystore_core::aggregator::reduce_groups(
            rows,
            group_fields,
            aggregates,
            &schema.index_compound_field_joiner,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::{ConnectionString, Field, FieldType};

    #[test]
    fn connect_rejects_empty_dataset() {
        let cs = ConnectionString::parse("redis://localhost:6379/").unwrap();
        assert!(RedisBackend::connect(&cs).is_err());
    }

    #[test]
    fn encode_record_fields_round_trips_through_json() {
        let mut record = Record::with_id(Value::Text("abc".into()));
        record.set("name", Value::Text("ada".into()));
        let pairs = encode_record_fields(&record).unwrap();
        assert_eq!(pairs.len(), 1);
        let (field, encoded) = &pairs[0];
        assert_eq!(field, "name");
        let decoded: Value = serde_json::from_str(encoded).unwrap();
        assert_eq!(decoded, Value::Text("ada".into()));
    }

    #[test]
    fn decode_record_hash_derives_id_from_key_fields() {
        let schema = Collection::new("users")
            .with_field(Field::new("id", FieldType::String).identity())
            .with_field(Field::new("name", FieldType::String));
        let mut hash = HashMap::new();
        hash.insert("id".to_string(), serde_json::to_string(&Value::Text("abc".into())).unwrap());
        hash.insert("name".to_string(), serde_json::to_string(&Value::Text("ada".into())).unwrap());
        let record = decode_record_hash(&schema, &hash).unwrap();
        assert_eq!(record.id, vec![Value::Text("abc".into())]);
    }
}
