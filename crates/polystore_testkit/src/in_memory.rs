use polystore_core::{
    Aggregate, AggregateFunction, Aggregator, Backend, Collection, Criterion, DbError, DbResult,
    Field, Filter, IdentityFieldType, IndexPage, IndexResult, Indexer, Operator, Record,
    RecordSet, ResultFn, SortDirection, Value,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

/// A fully in-process `Backend`. Collections and rows live in `RwLock`-guarded
/// maps; there is no driver, no network, no persistence across instances.
///
/// `InMemoryBackend` is its own `Indexer` and `Aggregator` — `with_search`
/// and `with_aggregator` return a clone of the same `Arc`, obtained via a
/// `Weak` self-reference set up at construction (`Arc::new_cyclic`), since
/// `Backend`'s methods only receive `&self`.
pub struct InMemoryBackend {
    collections: RwLock<HashMap<String, Collection>>,
    rows: RwLock<HashMap<String, BTreeMap<String, Record>>>,
    self_ref: Weak<InMemoryBackend>,
}

impl InMemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            collections: RwLock::new(HashMap::new()),
            rows: RwLock::new(HashMap::new()),
            self_ref: weak.clone(),
        })
    }

    fn self_arc(&self) -> Arc<InMemoryBackend> {
        self.self_ref.upgrade().expect("InMemoryBackend dropped while still in use")
    }

    fn identity_key(collection: &Collection, record: &Record) -> DbResult<String> {
        if !record.id.is_empty() {
            return Ok(if record.id.len() > 1 {
                collection.encode_compound_id(&record.id)
            } else {
                record.id[0].as_key_component()
            });
        }
        match record.get(&collection.identity_field) {
            Some(v) => Ok(v.as_key_component()),
            None => Err(DbError::Validation(format!(
                "record for {:?} has neither an id nor an {:?} field",
                collection.name, collection.identity_field
            ))),
        }
    }

    fn fill_defaults(collection: &Collection, record: &mut Record) {
        for field in &collection.fields {
            if record.get(&field.name).is_some() {
                continue;
            }
            if field.is_server_now_default() {
                record.set(field.name.clone(), Value::DateTime(chrono::Utc::now()));
            } else if let Some(default) = &field.default_value {
                record.set(field.name.clone(), default.clone());
            }
        }
    }
}

impl Backend for InMemoryBackend {
    fn initialize(&self) -> DbResult<()> {
        Ok(())
    }

    fn ping(&self, _timeout: Duration) -> DbResult<()> {
        Ok(())
    }

    fn register_collection(&self, definition: Collection) -> DbResult<()> {
        let mut collections = self.collections.write().expect("lock poisoned");
        collections.entry(definition.name.clone()).or_insert(definition);
        Ok(())
    }

    fn get_collection(&self, name: &str) -> DbResult<Collection> {
        self.collections
            .read()
            .expect("lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::collection_not_found(name))
    }

    fn list_collections(&self) -> Vec<String> {
        self.collections.read().expect("lock poisoned").keys().cloned().collect()
    }

    fn create_collection(&self, definition: Collection) -> DbResult<()> {
        let mut collections = self.collections.write().expect("lock poisoned");
        if collections.contains_key(&definition.name) {
            return Err(DbError::Validation(format!(
                "collection {:?} already exists",
                definition.name
            )));
        }
        collections.insert(definition.name.clone(), definition);
        Ok(())
    }

    fn delete_collection(&self, name: &str) -> DbResult<()> {
        self.collections.write().expect("lock poisoned").remove(name);
        self.rows.write().expect("lock poisoned").remove(name);
        Ok(())
    }

    fn insert(&self, collection: &str, records: Vec<Record>) -> DbResult<RecordSet> {
        let definition = self.get_collection(collection)?;
        let mut rows = self.rows.write().expect("lock poisoned");
        let table = rows.entry(collection.to_string()).or_default();

        let mut inserted = Vec::with_capacity(records.len());
        for mut record in records {
            Self::fill_defaults(&definition, &mut record);
            let key = Self::identity_key(&definition, &record)?;
            if record.id.is_empty() {
                if let Some(v) = record.get(&definition.identity_field) {
                    record.id = vec![v.clone()];
                }
            }
            table.insert(key, record.clone());
            inserted.push(record);
        }
        Ok(RecordSet::from_records(inserted))
    }

    fn update(
        &self,
        collection: &str,
        records: Vec<Record>,
        target_expr: Option<Filter>,
    ) -> DbResult<RecordSet> {
        let definition = self.get_collection(collection)?;
        let mut rows = self.rows.write().expect("lock poisoned");
        let table = rows.entry(collection.to_string()).or_default();

        let mut updated = Vec::new();
        for patch in records {
            if !patch.id.is_empty() {
                let key = Self::identity_key(&definition, &patch)?;
                if let Some(existing) = table.get_mut(&key) {
                    for (field, value) in &patch.fields {
                        existing.set(field.clone(), value.clone());
                    }
                    updated.push(existing.clone());
                } else {
                    return Err(DbError::record_not_found(collection, key));
                }
            } else if let Some(filter) = &target_expr {
                let matching_keys: Vec<String> = table
                    .iter()
                    .filter(|(_, row)| matches_filter(row, filter))
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in matching_keys {
                    let existing = table.get_mut(&key).expect("key from iteration above");
                    for (field, value) in &patch.fields {
                        existing.set(field.clone(), value.clone());
                    }
                    updated.push(existing.clone());
                }
            } else {
                return Err(DbError::Validation(
                    "update record has no id and no targetExpr was supplied".to_string(),
                ));
            }
        }
        Ok(RecordSet::from_records(updated))
    }

    fn delete(&self, collection: &str, ids: Vec<Vec<Value>>) -> DbResult<u64> {
        let definition = self.get_collection(collection)?;
        let mut rows = self.rows.write().expect("lock poisoned");
        let table = rows.entry(collection.to_string()).or_default();
        let mut deleted = 0;
        for id in ids {
            let key = if id.len() > 1 {
                definition.encode_compound_id(&id)
            } else if let Some(v) = id.first() {
                v.as_key_component()
            } else {
                continue;
            };
            if table.remove(&key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn retrieve(&self, collection: &str, id: &[Value], fields: &[String]) -> DbResult<Record> {
        let definition = self.get_collection(collection)?;
        let key = if id.len() > 1 {
            definition.encode_compound_id(id)
        } else if let Some(v) = id.first() {
            v.as_key_component()
        } else {
            return Err(DbError::Validation("retrieve called with empty id".to_string()));
        };

        let rows = self.rows.read().expect("lock poisoned");
        let record = rows
            .get(collection)
            .and_then(|t| t.get(&key))
            .cloned()
            .ok_or_else(|| DbError::record_not_found(collection, key))?;

        if fields.is_empty() {
            return Ok(record);
        }
        let mut projected = Record::with_composite_id(record.id.clone());
        for field in fields {
            if let Some(v) = record.get(field) {
                projected.set(field.clone(), v.clone());
            }
        }
        Ok(projected)
    }

    fn exists(&self, collection: &str, id: &[Value]) -> DbResult<bool> {
        match self.retrieve(collection, id, &["id".to_string()]) {
            Ok(_) => Ok(true),
            Err(DbError::RecordNotFound { .. }) => Ok(false),
            Err(DbError::CollectionNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn with_search(&self, _collection: &str) -> Option<Arc<dyn Indexer>> {
        Some(self.self_arc() as Arc<dyn Indexer>)
    }

    fn with_aggregator(&self, _collection: &str) -> Option<Arc<dyn Aggregator>> {
        Some(self.self_arc() as Arc<dyn Aggregator>)
    }

    fn flush(&self) -> DbResult<()> {
        Ok(())
    }

    fn estimate_count(&self, collection: &str) -> DbResult<u64> {
        Ok(self
            .rows
            .read()
            .expect("lock poisoned")
            .get(collection)
            .map(|t| t.len() as u64)
            .unwrap_or(0))
    }
}

impl Indexer for InMemoryBackend {
    fn index_initialize(&self, _parent: Arc<dyn Backend>) -> DbResult<()> {
        Ok(())
    }

    fn index_exists(&self, collection: &str, id: &str) -> DbResult<bool> {
        Ok(self
            .rows
            .read()
            .expect("lock poisoned")
            .get(collection)
            .map(|t| t.contains_key(id))
            .unwrap_or(false))
    }

    fn index_retrieve(&self, collection: &str, id: &str) -> DbResult<Record> {
        self.rows
            .read()
            .expect("lock poisoned")
            .get(collection)
            .and_then(|t| t.get(id))
            .cloned()
            .ok_or_else(|| DbError::record_not_found(collection, id))
    }

    fn index_remove(&self, collection: &str, id: &str) -> DbResult<()> {
        self.rows
            .write()
            .expect("lock poisoned")
            .get_mut(collection)
            .map(|t| t.remove(id));
        Ok(())
    }

    fn query_func(
        &self,
        collection: &Collection,
        filter: &Filter,
        result_fn: &mut ResultFn<'_>,
    ) -> DbResult<()> {
        let rows = self.rows.read().expect("lock poisoned");
        let mut matching: Vec<Record> = rows
            .get(&collection.name)
            .map(|t| t.values().filter(|r| matches_filter(r, filter)).cloned().collect())
            .unwrap_or_default();
        drop(rows);

        sort_records(&mut matching, filter);

        let total = matching.len() as u64;
        let offset = filter.effective_offset();
        let limit = filter.effective_limit();
        let page_number = if limit == 0 || limit == u64::MAX {
            1
        } else {
            (offset + 1).div_ceil(limit).max(1)
        };

        let page = IndexPage {
            page: page_number,
            total_pages: Some(if limit == 0 || limit == u64::MAX {
                1
            } else {
                total.div_ceil(limit).max(1)
            }),
            limit: if limit == u64::MAX { total.max(1) } else { limit },
            offset,
            total_results: Some(total),
        };

        let window = matching
            .into_iter()
            .skip(offset as usize)
            .take(if limit == u64::MAX { usize::MAX } else { limit as usize });

        for record in window {
            result_fn(IndexResult {
                record: Ok(record),
                page,
            })?;
        }
        Ok(())
    }

    fn list_values(
        &self,
        collection: &Collection,
        fields: &[String],
        filter: &Filter,
    ) -> DbResult<BTreeMap<String, Vec<Value>>> {
        let rows = self.rows.read().expect("lock poisoned");
        let mut out: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        if let Some(table) = rows.get(&collection.name) {
            for record in table.values().filter(|r| matches_filter(r, filter)) {
                for field in fields {
                    if let Some(v) = record.get(field) {
                        let bucket = out.entry(field.clone()).or_default();
                        if !bucket.contains(v) {
                            bucket.push(v.clone());
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn delete_query(&self, collection: &Collection, filter: &Filter) -> DbResult<u64> {
        let mut rows = self.rows.write().expect("lock poisoned");
        if let Some(table) = rows.get_mut(&collection.name) {
            let matching_keys: Vec<String> = table
                .iter()
                .filter(|(_, row)| matches_filter(row, filter))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &matching_keys {
                table.remove(key);
            }
            Ok(matching_keys.len() as u64)
        } else {
            Ok(0)
        }
    }

    fn flush_index(&self) -> DbResult<()> {
        Ok(())
    }

    fn get_backend(&self) -> Arc<dyn Backend> {
        self.self_arc() as Arc<dyn Backend>
    }
}

impl Aggregator for InMemoryBackend {
    fn sum(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<f64> {
        Ok(self
            .matching_rows(collection, filter)?
            .iter()
            .filter_map(|r| r.get(field).and_then(Value::as_float))
            .sum())
    }

    fn count(&self, collection: &str, filter: &Filter) -> DbResult<u64> {
        Ok(self.matching_rows(collection, filter)?.len() as u64)
    }

    fn min(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<Value> {
        Ok(self
            .matching_rows(collection, filter)?
            .iter()
            .filter_map(|r| r.get(field).cloned())
            .min()
            .unwrap_or(Value::Null))
    }

    fn max(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<Value> {
        Ok(self
            .matching_rows(collection, filter)?
            .iter()
            .filter_map(|r| r.get(field).cloned())
            .max()
            .unwrap_or(Value::Null))
    }

    fn avg(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<f64> {
        let values: Vec<f64> = self
            .matching_rows(collection, filter)?
            .iter()
            .filter_map(|r| r.get(field).and_then(Value::as_float))
            .collect();
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
        let rows = self.matching_rows(collection, filter)?;
        Ok(polystore_core::aggregator::reduce_groups(rows, group_fields, aggregates, ":"))
    }
}

impl InMemoryBackend {
    fn matching_rows(&self, collection: &str, filter: &Filter) -> DbResult<Vec<Record>> {
        let rows = self.rows.read().expect("lock poisoned");
        Ok(rows
            .get(collection)
            .map(|t| t.values().filter(|r| matches_filter(r, filter)).cloned().collect())
            .unwrap_or_default())
    }
}

/// Evaluate one `Filter` against a `Record` in memory. This is the testkit's
/// only stand-in for a driver's `QueryGenerator`: no native statement is
/// rendered, criteria are matched directly against field values.
fn matches_filter(record: &Record, filter: &Filter) -> bool {
    filter.criteria.iter().all(|criterion| matches_criterion(record, criterion))
}

fn matches_criterion(record: &Record, criterion: &Criterion) -> bool {
    let field_value = if criterion.field == "id" {
        record.scalar_id().cloned()
    } else {
        record.get(&criterion.field).cloned()
    };

    let outcome = match criterion.operator {
        Operator::Null => field_value.as_ref().map(Value::is_null).unwrap_or(true),
        Operator::NotNull => field_value.as_ref().map(|v| !v.is_null()).unwrap_or(false),
        Operator::Is => field_value
            .as_ref()
            .map(|v| criterion.values.contains(v))
            .unwrap_or(false),
        Operator::Not => field_value
            .as_ref()
            .map(|v| !criterion.values.contains(v))
            .unwrap_or(true),
        Operator::Lt => compare(&field_value, criterion.values.first(), std::cmp::Ordering::Less),
        Operator::Lte => {
            compare(&field_value, criterion.values.first(), std::cmp::Ordering::Less)
                || compare(&field_value, criterion.values.first(), std::cmp::Ordering::Equal)
        }
        Operator::Gt => compare(&field_value, criterion.values.first(), std::cmp::Ordering::Greater),
        Operator::Gte => {
            compare(&field_value, criterion.values.first(), std::cmp::Ordering::Greater)
                || compare(&field_value, criterion.values.first(), std::cmp::Ordering::Equal)
        }
        Operator::Prefix => match (&field_value, criterion.values.first()) {
            (Some(Value::Text(s)), Some(Value::Text(prefix))) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        Operator::Suffix => match (&field_value, criterion.values.first()) {
            (Some(Value::Text(s)), Some(Value::Text(suffix))) => s.ends_with(suffix.as_str()),
            _ => false,
        },
        Operator::Contains | Operator::Fulltext => match (&field_value, criterion.values.first()) {
            (Some(Value::Text(s)), Some(Value::Text(needle))) => {
                s.to_lowercase().contains(&needle.to_lowercase())
            }
            _ => false,
        },
        Operator::Range => match (&field_value, criterion.values.as_slice()) {
            (Some(v), [lo, hi, ..]) => v >= lo && v <= hi,
            _ => false,
        },
    };

    if criterion.not {
        !outcome
    } else {
        outcome
    }
}

fn compare(value: &Option<Value>, bound: Option<&Value>, expected: std::cmp::Ordering) -> bool {
    match (value, bound) {
        (Some(v), Some(b)) => v.cmp(b) == expected,
        _ => false,
    }
}

fn sort_records(records: &mut [Record], filter: &Filter) {
    if filter.sort.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for sort_field in &filter.sort {
            let av = a.get(&sort_field.field);
            let bv = b.get(&sort_field.field);
            let ordering = av.cmp(&bv);
            let ordering = match sort_field.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// A starter `Collection` used across the workspace's integration tests.
pub fn users_collection_with(identity_type: IdentityFieldType) -> Collection {
    Collection::new("users")
        .with_field(
            Field::new(
                "id",
                match identity_type {
                    IdentityFieldType::Int => polystore_core::FieldType::Int,
                    _ => polystore_core::FieldType::String,
                },
            )
            .identity(),
        )
        .with_field(Field::new("name", polystore_core::FieldType::String))
}
