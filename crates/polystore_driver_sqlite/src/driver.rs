use crate::dialect::{quote_ident, sql_to_value, value_to_sql, SqliteDialect};
use polystore_core::{
    Aggregate, AggregateFunction, Aggregator, Backend, Collection, DbError, DbResult, FieldType,
    Filter, IndexPage, IndexResult, Indexer, Record, RecordSet, ResultFn, Value,
};
use polystore_sql::{count_query, SqlDialect, SqlQueryGenerator};
use rusqlite::Connection as RusqliteConnection;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

static DIALECT: SqliteDialect = SqliteDialect;

/// A `Backend`+`Indexer`+`Aggregator` over a single SQLite file, colocating
/// the index plane with the primary table: `with_search`/`with_aggregator`
/// hand back the same object, since the same `SELECT` reads the rows the
/// `Backend` half writes.
pub struct SqliteBackend {
    conn: Mutex<RusqliteConnection>,
    cancelled: AtomicBool,
    collections: RwLock<HashMap<String, Collection>>,
    self_ref: Weak<SqliteBackend>,
}

impl SqliteBackend {
    pub fn open(path: &str) -> DbResult<Arc<Self>> {
        let conn = if path == ":memory:" {
            RusqliteConnection::open_in_memory()
        } else {
            RusqliteConnection::open(path)
        }
        .map_err(|e| DbError::driver(format!("failed to open sqlite database {path:?}: {e}")))?;

        Ok(Arc::new_cyclic(|weak| Self {
            conn: Mutex::new(conn),
            cancelled: AtomicBool::new(false),
            collections: RwLock::new(HashMap::new()),
            self_ref: weak.clone(),
        }))
    }

    fn self_arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("SqliteBackend outlived its own Arc")
    }

    fn get_collection_or_err(&self, name: &str) -> DbResult<Collection> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::collection_not_found(name))
    }

    fn sql_column_type(field_type: FieldType) -> &'static str {
        match field_type {
            FieldType::Int => "INTEGER",
            FieldType::Float => "REAL",
            FieldType::Bool => "INTEGER",
            FieldType::Raw => "BLOB",
            FieldType::String | FieldType::Time | FieldType::Object | FieldType::Array => "TEXT",
        }
    }

    fn create_table_sql(collection: &Collection) -> String {
        let table = quote_ident(&collection.name);
        let key_names: Vec<&str> = collection.key_fields().iter().map(|f| f.name.as_str()).collect();
        let single_integer_pk = key_names.len() == 1
            && collection
                .field(key_names[0])
                .map(|f| f.field_type == FieldType::Int)
                .unwrap_or(false);

        let mut columns: Vec<String> = collection
            .fields
            .iter()
            .map(|field| {
                let mut line = format!("{} {}", quote_ident(&field.name), Self::sql_column_type(field.field_type));
                if field.required {
                    line.push_str(" NOT NULL");
                }
                if single_integer_pk && field.identity {
                    line.push_str(" PRIMARY KEY");
                }
                line
            })
            .collect();

        if !single_integer_pk && !key_names.is_empty() {
            let quoted: Vec<String> = key_names.iter().map(|n| quote_ident(n)).collect();
            columns.push(format!("PRIMARY KEY ({})", quoted.join(", ")));
        }

        format!("CREATE TABLE IF NOT EXISTS {} (\n    {}\n)", table, columns.join(",\n    "))
    }

    fn identity_where(collection: &Collection, id: &[Value]) -> DbResult<(String, Vec<Value>)> {
        let components = collection.build_identity_components(id)?;
        let mut params = Vec::with_capacity(components.len());
        let conditions: Vec<String> = components
            .into_iter()
            .map(|(name, value)| {
                let column = quote_ident(&name);
                if value.is_null() {
                    format!("{} IS NULL", column)
                } else {
                    params.push(value);
                    format!("{} = ?", column)
                }
            })
            .collect();
        Ok((conditions.join(" AND "), params))
    }

    fn row_to_record(collection: &Collection, columns: &[String], row: &rusqlite::Row) -> DbResult<Record> {
        let mut record = Record::new();
        for (idx, name) in columns.iter().enumerate() {
            let value_ref = row
                .get_ref(idx)
                .map_err(|e| DbError::driver(format!("failed to read column {name:?}: {e}")))?;
            record.set(name.clone(), sql_to_value(&value_ref));
        }
        let id: Vec<Value> = collection
            .key_fields()
            .iter()
            .map(|f| record.get(&f.name).cloned().unwrap_or(Value::Null))
            .collect();
        record.id = id;
        Ok(record)
    }

    fn select_all_sql(collection: &Collection) -> String {
        format!("SELECT * FROM {}", quote_ident(&collection.name))
    }
}

impl Backend for SqliteBackend {
    fn initialize(&self) -> DbResult<()> {
        self.ping(Duration::from_secs(10))
    }

    fn ping(&self, _timeout: Duration) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("SELECT 1")
            .map_err(|e| DbError::unavailable(format!("sqlite ping failed: {e}")))
    }

    fn register_collection(&self, definition: Collection) -> DbResult<()> {
        let sql = Self::create_table_sql(&definition);
        self.conn
            .lock()
            .unwrap()
            .execute_batch(&sql)
            .map_err(|e| DbError::driver(format!("failed to create table {:?}: {e}", definition.name)))?;

        self.collections
            .write()
            .unwrap()
            .entry(definition.name.clone())
            .or_insert(definition);
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
            return Err(DbError::Validation(format!(
                "collection {:?} already exists",
                definition.name
            )));
        }
        self.register_collection(definition)
    }

    fn delete_collection(&self, name: &str) -> DbResult<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(name));
        self.conn
            .lock()
            .unwrap()
            .execute_batch(&sql)
            .map_err(|e| DbError::driver(format!("failed to drop table {name:?}: {e}")))?;
        self.collections.write().unwrap().remove(name);
        Ok(())
    }

    fn insert(&self, collection: &str, records: Vec<Record>) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let table = quote_ident(collection);
        let conn = self.conn.lock().unwrap();

        let mut inserted = Vec::with_capacity(records.len());
        for record in records {
            let columns: Vec<&String> = record.fields.keys().collect();
            let quoted_columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                quoted_columns.join(", "),
                placeholders.join(", ")
            );
            let params: Vec<rusqlite::types::Value> =
                columns.iter().map(|c| value_to_sql(record.fields.get(*c).unwrap())).collect();

            conn.execute(&sql, rusqlite::params_from_iter(params))
                .map_err(|e| DbError::driver(format!("insert into {collection:?} failed: {e}")))?;

            let mut stored = record.clone();
            if stored.id.is_empty() || stored.id.iter().all(Value::is_null) {
                let rowid = conn.last_insert_rowid();
                if let Some(identity) = schema.fields.iter().find(|f| f.identity) {
                    stored.set(identity.name.clone(), Value::Int(rowid));
                }
            }
            let id: Vec<Value> = schema
                .key_fields()
                .iter()
                .map(|f| stored.get(&f.name).cloned().unwrap_or(Value::Null))
                .collect();
            stored.id = id;
            inserted.push(stored);
        }

        Ok(RecordSet::from_records(inserted))
    }

    fn update(&self, collection: &str, records: Vec<Record>, target_expr: Option<Filter>) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let table = quote_ident(collection);
        let conn = self.conn.lock().unwrap();

        let mut updated = Vec::new();
        match target_expr {
            None => {
                for record in records {
                    if record.id.is_empty() {
                        return Err(DbError::Validation(
                            "update without target_expr requires every record to carry an id".to_string(),
                        ));
                    }
                    let (where_clause, mut where_params) = Self::identity_where(&schema, &record.id)?;
                    let columns: Vec<&String> = record.fields.keys().collect();
                    let assignments: Vec<String> = columns.iter().map(|c| format!("{} = ?", quote_ident(c))).collect();
                    let sql = format!("UPDATE {} SET {} WHERE {}", table, assignments.join(", "), where_clause);

                    let mut params: Vec<rusqlite::types::Value> =
                        columns.iter().map(|c| value_to_sql(record.fields.get(*c).unwrap())).collect();
                    params.append(&mut where_params.iter().map(value_to_sql).collect());

                    conn.execute(&sql, rusqlite::params_from_iter(params))
                        .map_err(|e| DbError::driver(format!("update on {collection:?} failed: {e}")))?;
                    updated.push(record);
                }
            }
            Some(filter) => {
                let generator = SqlQueryGenerator::new(&DIALECT as &dyn SqlDialect, None);
                let (predicate, where_params) = generator.generate_where(&filter);
                let where_clause = predicate.unwrap_or_else(|| "1=1".to_string());

                for record in records {
                    let columns: Vec<&String> = record.fields.keys().collect();
                    let assignments: Vec<String> = columns.iter().map(|c| format!("{} = ?", quote_ident(c))).collect();
                    let sql = format!("UPDATE {} SET {} WHERE {}", table, assignments.join(", "), where_clause);

                    let mut params: Vec<rusqlite::types::Value> =
                        columns.iter().map(|c| value_to_sql(record.fields.get(*c).unwrap())).collect();
                    params.extend(where_params.iter().map(value_to_sql));

                    conn.execute(&sql, rusqlite::params_from_iter(params))
                        .map_err(|e| DbError::driver(format!("target-expr update on {collection:?} failed: {e}")))?;
                    updated.push(record);
                }
            }
        }

        Ok(RecordSet::from_records(updated))
    }

    fn delete(&self, collection: &str, ids: Vec<Vec<Value>>) -> DbResult<u64> {
        let schema = self.get_collection_or_err(collection)?;
        let table = quote_ident(collection);
        let conn = self.conn.lock().unwrap();

        let mut affected = 0u64;
        for id in ids {
            let (where_clause, params) = Self::identity_where(&schema, &id)?;
            let sql = format!("DELETE FROM {} WHERE {}", table, where_clause);
            let bound: Vec<rusqlite::types::Value> = params.iter().map(value_to_sql).collect();
            affected += conn
                .execute(&sql, rusqlite::params_from_iter(bound))
                .map_err(|e| DbError::driver(format!("delete on {collection:?} failed: {e}")))? as u64;
        }
        Ok(affected)
    }

    fn retrieve(&self, collection: &str, id: &[Value], fields: &[String]) -> DbResult<Record> {
        let schema = self.get_collection_or_err(collection)?;
        let (where_clause, params) = Self::identity_where(&schema, id)?;
        let select_list = if fields.is_empty() {
            "*".to_string()
        } else {
            fields.iter().map(|f| quote_ident(f)).collect::<Vec<_>>().join(", ")
        };
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            select_list,
            quote_ident(collection),
            where_clause
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| DbError::driver(format!("retrieve from {collection:?} failed: {e}")))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let bound: Vec<rusqlite::types::Value> = params.iter().map(value_to_sql).collect();

        let mut rows = stmt
            .query(rusqlite::params_from_iter(bound))
            .map_err(|e| DbError::driver(format!("retrieve from {collection:?} failed: {e}")))?;

        match rows.next().map_err(|e| DbError::driver(e.to_string()))? {
            Some(row) => Self::row_to_record(&schema, &columns, row),
            None => Err(DbError::record_not_found(collection, id.iter().map(Value::as_key_component).collect::<Vec<_>>().join(","))),
        }
    }

    fn exists(&self, collection: &str, id: &[Value]) -> DbResult<bool> {
        match self.retrieve(collection, id, &[]) {
            Ok(_) => Ok(true),
            Err(DbError::RecordNotFound { .. }) => Ok(false),
            Err(other) => Err(other),
        }
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
        let sql = count_query(&quote_ident(collection), None);
        let conn = self.conn.lock().unwrap();
        conn.query_row(&sql, [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| DbError::driver(format!("count on {collection:?} failed: {e}")))
    }
}

impl Indexer for SqliteBackend {
    fn index_initialize(&self, _parent: Arc<dyn Backend>) -> DbResult<()> {
        // Colocated: the index plane *is* the primary table.
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

        let generator = SqlQueryGenerator::new(&DIALECT as &dyn SqlDialect, None);
        let generated = generator.generate_select(&collection.name, filter);
        let (predicate, where_params) = generator.generate_where(filter);

        let total_results = if let Some(predicate) = predicate {
            let sql = count_query(&quote_ident(&collection.name), Some(&predicate));
            let bound: Vec<rusqlite::types::Value> = where_params.iter().map(value_to_sql).collect();
            self.conn
                .lock()
                .unwrap()
                .query_row(&sql, rusqlite::params_from_iter(bound), |row| row.get::<_, i64>(0))
                .ok()
                .map(|n| n as u64)
        } else {
            let sql = count_query(&quote_ident(&collection.name), None);
            self.conn
                .lock()
                .unwrap()
                .query_row(&sql, [], |row| row.get::<_, i64>(0))
                .ok()
                .map(|n| n as u64)
        };

        let limit = filter.effective_limit();
        let offset = filter.effective_offset();
        let total_pages = total_results.map(|total| if limit == 0 || limit == u64::MAX { 1 } else { total.div_ceil(limit).max(1) });
        let page = if limit == 0 || limit == u64::MAX { 1 } else { offset / limit + 1 };

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&generated.text)
            .map_err(|e| DbError::driver(format!("query on {:?} failed: {e}", collection.name)))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let bound: Vec<rusqlite::types::Value> = generated.params.iter().map(value_to_sql).collect();

        let mut rows = stmt
            .query(rusqlite::params_from_iter(bound))
            .map_err(|e| DbError::driver(format!("query on {:?} failed: {e}", collection.name)))?;

        let index_page = IndexPage { page, total_pages, limit, offset, total_results };
        loop {
            match rows.next() {
                Ok(Some(row)) => {
                    let record = Self::row_to_record(collection, &columns, row);
                    result_fn(IndexResult { record, page: index_page })?;
                }
                Ok(None) => break,
                Err(e) => {
                    result_fn(IndexResult { record: Err(DbError::driver(e.to_string())), page: index_page })?;
                    break;
                }
            }
        }
        Ok(())
    }

    fn list_values(
        &self,
        collection: &Collection,
        fields: &[String],
        filter: &Filter,
    ) -> DbResult<BTreeMap<String, Vec<Value>>> {
        let generator = SqlQueryGenerator::new(&DIALECT as &dyn SqlDialect, None);
        let (predicate, where_params) = generator.generate_where(filter);
        let where_fragment = predicate.map(|p| format!(" WHERE {p}")).unwrap_or_default();

        let conn = self.conn.lock().unwrap();
        let mut out = BTreeMap::new();
        for field in fields {
            let sql = format!("SELECT DISTINCT {} FROM {}{}", quote_ident(field), quote_ident(&collection.name), where_fragment);
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| DbError::driver(format!("list_values on {field:?} failed: {e}")))?;
            let bound: Vec<rusqlite::types::Value> = where_params.iter().map(value_to_sql).collect();
            let values: Vec<Value> = stmt
                .query_map(rusqlite::params_from_iter(bound), |row| {
                    let value_ref = row.get_ref(0)?;
                    Ok(sql_to_value(&value_ref))
                })
                .map_err(|e| DbError::driver(e.to_string()))?
                .filter_map(|r| r.ok())
                .collect();
            out.insert(field.clone(), values);
        }
        Ok(out)
    }

    fn delete_query(&self, collection: &Collection, filter: &Filter) -> DbResult<u64> {
        let generator = SqlQueryGenerator::new(&DIALECT as &dyn SqlDialect, None);
        let (predicate, where_params) = generator.generate_where(filter);
        let where_fragment = predicate.map(|p| format!(" WHERE {p}")).unwrap_or_default();

        let sql = format!("DELETE FROM {}{}", quote_ident(&collection.name), where_fragment);
        let bound: Vec<rusqlite::types::Value> = where_params.iter().map(value_to_sql).collect();
        let conn = self.conn.lock().unwrap();
        conn.execute(&sql, rusqlite::params_from_iter(bound))
            .map(|n| n as u64)
            .map_err(|e| DbError::driver(format!("delete_query on {:?} failed: {e}", collection.name)))
    }

    fn flush_index(&self) -> DbResult<()> {
        Ok(())
    }

    fn get_backend(&self) -> Arc<dyn Backend> {
        self.self_arc()
    }
}

fn decode_index_id(collection: &Collection, id: &str) -> Vec<Value> {
    collection
        .split_compound_id(id)
        .into_iter()
        .map(Value::Text)
        .collect()
}

impl Aggregator for SqliteBackend {
    fn sum(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<f64> {
        let value = aggregate_scalar(self, collection, AggregateFunction::Sum, field, filter)?;
        Ok(value.as_float().unwrap_or(0.0))
    }

    fn count(&self, collection: &str, filter: &Filter) -> DbResult<u64> {
        let value = aggregate_scalar(self, collection, AggregateFunction::Count, "*", filter)?;
        Ok(value.as_int().unwrap_or(0) as u64)
    }

    fn min(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<Value> {
        aggregate_scalar(self, collection, AggregateFunction::Min, field, filter)
    }

    fn max(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<Value> {
        aggregate_scalar(self, collection, AggregateFunction::Max, field, filter)
    }

    fn avg(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<f64> {
        let value = aggregate_scalar(self, collection, AggregateFunction::Avg, field, filter)?;
        Ok(value.as_float().unwrap_or(0.0))
    }

    fn group_by(
        &self,
        collection: &str,
        group_fields: &[String],
        aggregates: &[Aggregate],
        filter: &Filter,
    ) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let mut rows = Vec::new();
        Indexer::query_func(self, &schema, filter, &mut |result| {
            if let Ok(record) = result.record {
                rows.push(record);
            }
            Ok(())
        })?;
        Ok(polystore_core::aggregator::reduce_groups(
            rows,
            group_fields,
            aggregates,
            &schema.index_compound_field_joiner,
        ))
    }
}

fn aggregate_scalar(
    backend: &SqliteBackend,
    collection: &str,
    function: AggregateFunction,
    field: &str,
    filter: &Filter,
) -> DbResult<Value> {
    let sql_fn = match function {
        AggregateFunction::Sum => "SUM",
        AggregateFunction::Count => "COUNT",
        AggregateFunction::Min => "MIN",
        AggregateFunction::Max => "MAX",
        AggregateFunction::Avg => "AVG",
    };
    let generator = SqlQueryGenerator::new(&DIALECT as &dyn SqlDialect, None);
    let (predicate, where_params) = generator.generate_where(filter);
    let where_fragment = predicate.map(|p| format!(" WHERE {p}")).unwrap_or_default();

    let column = if field == "*" { "*".to_string() } else { quote_ident(field) };
    let sql = format!("SELECT {}({}) FROM {}{}", sql_fn, column, quote_ident(collection), where_fragment);
    let bound: Vec<rusqlite::types::Value> = where_params.iter().map(value_to_sql).collect();

    let conn = backend.conn.lock().unwrap();
    let value_ref_owned: rusqlite::types::Value = conn
        .query_row(&sql, rusqlite::params_from_iter(bound), |row| row.get(0))
        .map_err(|e| DbError::driver(format!("aggregate on {collection:?} failed: {e}")))?;

    Ok(match value_ref_owned {
        rusqlite::types::Value::Null => Value::Null,
        rusqlite::types::Value::Integer(i) => Value::Int(i),
        rusqlite::types::Value::Real(f) => Value::Float(f),
        rusqlite::types::Value::Text(s) => Value::Text(s),
        rusqlite::types::Value::Blob(b) => Value::Bytes(b),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::{Criterion, Field, FieldType, Operator};

    fn users_schema() -> Collection {
        Collection::new("users")
            .with_field(Field::new("id", FieldType::Int).identity())
            .with_field(Field::new("name", FieldType::String))
    }

    #[test]
    fn insert_then_retrieve_round_trips() {
        let backend = SqliteBackend::open(":memory:").unwrap();
        backend.register_collection(users_schema()).unwrap();

        let mut record = Record::new();
        record.set("name", Value::Text("ada".to_string()));
        backend.insert("users", vec![record]).unwrap();

        let found = backend.retrieve("users", &[Value::Int(1)], &[]).unwrap();
        assert_eq!(found.get("name"), Some(&Value::Text("ada".to_string())));
    }

    #[test]
    fn create_collection_twice_fails() {
        let backend = SqliteBackend::open(":memory:").unwrap();
        backend.create_collection(users_schema()).unwrap();
        assert!(backend.create_collection(users_schema()).is_err());
    }

    #[test]
    fn query_func_filters_by_prefix() {
        let backend = SqliteBackend::open(":memory:").unwrap();
        backend.register_collection(users_schema()).unwrap();
        let mut a = Record::new();
        a.set("name", Value::Text("ada".to_string()));
        let mut b = Record::new();
        b.set("name", Value::Text("bob".to_string()));
        backend.insert("users", vec![a, b]).unwrap();

        let schema = users_schema();
        let filter = Filter::new().with_criterion(Criterion::new(
            "name",
            Operator::Prefix,
            vec![Value::Text("a".to_string())],
        ));

        let mut hits = Vec::new();
        Indexer::query_func(backend.as_ref(), &schema, &filter, &mut |r| {
            hits.push(r.record.unwrap());
            Ok(())
        })
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get("name"), Some(&Value::Text("ada".to_string())));
    }

    #[test]
    fn delete_removes_row() {
        let backend = SqliteBackend::open(":memory:").unwrap();
        backend.register_collection(users_schema()).unwrap();
        let mut record = Record::new();
        record.set("name", Value::Text("ada".to_string()));
        backend.insert("users", vec![record]).unwrap();

        let affected = backend.delete("users", vec![vec![Value::Int(1)]]).unwrap();
        assert_eq!(affected, 1);
        assert!(!backend.exists("users", &[Value::Int(1)]).unwrap());
    }
}
