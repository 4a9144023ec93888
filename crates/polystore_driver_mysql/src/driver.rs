use crate::dialect::{quote_ident, value_to_mysql, MysqlDialect};
use crate::types::row_to_record;
use mysql::prelude::*;
use mysql::{Conn, Opts, OptsBuilder, Params};
use polystore_core::{
    Aggregate, AggregateFunction, Aggregator, Backend, Collection, ConnectionString, DbError,
    DbResult, Field, FieldType, Filter, IndexPage, IndexResult, Indexer, Record, RecordSet,
    ResultFn, Value,
};
use polystore_sql::{count_query, SqlDialect, SqlQueryGenerator};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

static DIALECT: MysqlDialect = MysqlDialect;

/// A `Backend`+`Indexer`+`Aggregator` over a single MySQL/MariaDB database,
/// colocating the index plane with the primary table the same way the
/// sqlite and postgres drivers do. MySQL has no `RETURNING`, so writes
/// re-query by identity after `query_drop`+`last_insert_id`.
pub struct MysqlBackend {
    conn: Mutex<Conn>,
    cancelled: AtomicBool,
    collections: RwLock<HashMap<String, Collection>>,
    self_ref: Weak<MysqlBackend>,
}

impl MysqlBackend {
    pub fn connect(cs: &ConnectionString) -> DbResult<Arc<Self>> {
        let host = if cs.host.is_empty() { "localhost" } else { cs.host.as_str() };
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(host))
            .tcp_port(cs.port.unwrap_or(3306))
            .user(cs.user.as_deref())
            .pass(cs.password.as_deref())
            .db_name(Some(cs.dataset.as_str()))
            .into();

        let conn = Conn::new(opts).map_err(|e| DbError::unavailable(format!("mysql connection failed: {e}")))?;

        Ok(Arc::new_cyclic(|weak| Self {
            conn: Mutex::new(conn),
            cancelled: AtomicBool::new(false),
            collections: RwLock::new(HashMap::new()),
            self_ref: weak.clone(),
        }))
    }

    fn self_arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("MysqlBackend outlived its own Arc")
    }

    fn get_collection_or_err(&self, name: &str) -> DbResult<Collection> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::collection_not_found(name))
    }

    fn sql_column_type(field: &Field) -> &'static str {
        match field.field_type {
            FieldType::Int => "BIGINT",
            FieldType::Float => "DOUBLE",
            FieldType::Bool => "TINYINT(1)",
            FieldType::Raw => "BLOB",
            FieldType::Time => "DATETIME",
            FieldType::Object | FieldType::Array => "JSON",
            FieldType::String => "TEXT",
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
                let mut line = format!("{} {}", quote_ident(&field.name), Self::sql_column_type(field));
                if field.required && !field.identity {
                    line.push_str(" NOT NULL");
                }
                if single_integer_pk && field.identity {
                    line.push_str(" AUTO_INCREMENT");
                }
                line
            })
            .collect();

        if !key_names.is_empty() {
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

    fn positional(values: &[Value]) -> Params {
        if values.is_empty() {
            Params::Empty
        } else {
            Params::Positional(values.iter().map(value_to_mysql).collect())
        }
    }
}

impl Backend for MysqlBackend {
    fn initialize(&self) -> DbResult<()> {
        self.ping(Duration::from_secs(10))
    }

    fn ping(&self, _timeout: Duration) -> DbResult<()> {
        let mut conn = self.conn.lock().unwrap();
        conn.query_drop("SELECT 1").map_err(|e| DbError::unavailable(format!("mysql ping failed: {e}")))
    }

    fn register_collection(&self, definition: Collection) -> DbResult<()> {
        let sql = Self::create_table_sql(&definition);
        self.conn
            .lock()
            .unwrap()
            .query_drop(&sql)
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
            .query_drop(&sql)
            .map_err(|e| DbError::driver(format!("failed to drop table {name:?}: {e}")))?;
        self.collections.write().unwrap().remove(name);
        Ok(())
    }

    fn insert(&self, collection: &str, records: Vec<Record>) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let table = quote_ident(collection);
        let mut conn = self.conn.lock().unwrap();

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
            let values: Vec<Value> = columns.iter().map(|c| record.fields.get(*c).unwrap().clone()).collect();

            conn.exec_drop(&sql, Self::positional(&values))
                .map_err(|e| DbError::driver(format!("insert into {collection:?} failed: {e}")))?;

            let mut stored = record.clone();
            if stored.id.is_empty() || stored.id.iter().all(Value::is_null) {
                let last_id = conn.last_insert_id();
                if last_id > 0 {
                    if let Some(identity) = schema.fields.iter().find(|f| f.identity) {
                        stored.set(identity.name.clone(), Value::Int(last_id as i64));
                    }
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
        let mut conn = self.conn.lock().unwrap();

        let mut updated = Vec::new();
        match target_expr {
            None => {
                for record in records {
                    if record.id.is_empty() {
                        return Err(DbError::Validation(
                            "update without target_expr requires every record to carry an id".to_string(),
                        ));
                    }
                    let (where_clause, where_values) = Self::identity_where(&schema, &record.id)?;
                    let columns: Vec<&String> = record.fields.keys().collect();
                    let assignments: Vec<String> = columns.iter().map(|c| format!("{} = ?", quote_ident(c))).collect();
                    let sql = format!("UPDATE {} SET {} WHERE {}", table, assignments.join(", "), where_clause);

                    let mut values: Vec<Value> = columns.iter().map(|c| record.fields.get(*c).unwrap().clone()).collect();
                    values.extend(where_values);

                    conn.exec_drop(&sql, Self::positional(&values))
                        .map_err(|e| DbError::driver(format!("update on {collection:?} failed: {e}")))?;
                    updated.push(record);
                }
            }
            Some(filter) => {
                let generator = SqlQueryGenerator::new(&DIALECT as &dyn SqlDialect, None);
                let generated = generator.generate_select(collection, &filter);
                let where_clause = where_fragment(&generated.text).unwrap_or_else(|| "1=1".to_string());

                for record in records {
                    let columns: Vec<&String> = record.fields.keys().collect();
                    let assignments: Vec<String> = columns.iter().map(|c| format!("{} = ?", quote_ident(c))).collect();
                    let sql = format!("UPDATE {} SET {} WHERE {}", table, assignments.join(", "), where_clause);

                    let mut values: Vec<Value> = columns.iter().map(|c| record.fields.get(*c).unwrap().clone()).collect();
                    values.extend(generated.params.clone());

                    conn.exec_drop(&sql, Self::positional(&values))
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
        let mut conn = self.conn.lock().unwrap();

        let mut affected = 0u64;
        for id in ids {
            let (where_clause, values) = Self::identity_where(&schema, &id)?;
            let sql = format!("DELETE FROM {} WHERE {}", table, where_clause);
            conn.exec_drop(&sql, Self::positional(&values))
                .map_err(|e| DbError::driver(format!("delete on {collection:?} failed: {e}")))?;
            affected += conn.affected_rows();
        }
        Ok(affected)
    }

    fn retrieve(&self, collection: &str, id: &[Value], fields: &[String]) -> DbResult<Record> {
        let schema = self.get_collection_or_err(collection)?;
        let (where_clause, values) = Self::identity_where(&schema, id)?;
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

        let mut conn = self.conn.lock().unwrap();
        let rows: Vec<mysql::Row> = conn
            .exec(&sql, Self::positional(&values))
            .map_err(|e| DbError::driver(format!("retrieve from {collection:?} failed: {e}")))?;

        match rows.first() {
            Some(row) => row_to_record(&schema, row),
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
        let mut conn = self.conn.lock().unwrap();
        let count: Option<i64> = conn
            .query_first(&sql)
            .map_err(|e| DbError::driver(format!("count on {collection:?} failed: {e}")))?;
        Ok(count.unwrap_or(0) as u64)
    }
}

impl Indexer for MysqlBackend {
    fn index_initialize(&self, _parent: Arc<dyn Backend>) -> DbResult<()> {
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

        let mut conn = self.conn.lock().unwrap();
        let total_results = match where_fragment(&generated.text) {
            Some(predicate) => {
                let sql = count_query(&quote_ident(&collection.name), Some(&predicate));
                let non_pagination = &generated.params[..generated.params.len().saturating_sub(pagination_param_count(filter))];
                conn.exec_first::<Option<i64>, _, _>(&sql, Self::positional(non_pagination))
                    .ok()
                    .flatten()
                    .map(|n| n as u64)
            }
            None => {
                let sql = count_query(&quote_ident(&collection.name), None);
                conn.query_first::<Option<i64>, _>(&sql).ok().flatten().map(|n| n as u64)
            }
        };

        let limit = filter.effective_limit();
        let offset = filter.effective_offset();
        let total_pages = total_results.map(|total| if limit == 0 || limit == u64::MAX { 1 } else { total.div_ceil(limit).max(1) });
        let page = if limit == 0 || limit == u64::MAX { 1 } else { offset / limit + 1 };

        let rows: Vec<mysql::Row> = conn
            .exec(&generated.text, Self::positional(&generated.params))
            .map_err(|e| DbError::driver(format!("query on {:?} failed: {e}", collection.name)))?;

        let index_page = IndexPage { page, total_pages, limit, offset, total_results };
        for row in &rows {
            let record = row_to_record(collection, row);
            result_fn(IndexResult { record, page: index_page })?;
        }
        Ok(())
    }

    fn list_values(&self, collection: &Collection, fields: &[String], filter: &Filter) -> DbResult<BTreeMap<String, Vec<Value>>> {
        let generator = SqlQueryGenerator::new(&DIALECT as &dyn SqlDialect, None);
        let generated = generator.generate_select(&collection.name, filter);
        let fragment = where_fragment(&generated.text).map(|p| format!(" WHERE {}", p)).unwrap_or_default();

        let mut conn = self.conn.lock().unwrap();
        let mut out = BTreeMap::new();
        for field in fields {
            let sql = format!("SELECT DISTINCT {} FROM {}{}", quote_ident(field), quote_ident(&collection.name), fragment);
            let rows: Vec<mysql::Row> = conn
                .exec(&sql, Self::positional(&generated.params))
                .map_err(|e| DbError::driver(format!("list_values on {field:?} failed: {e}")))?;
            let values: Vec<Value> = rows
                .iter()
                .map(|row| crate::types::column_value(row, 0, &row.columns_ref()[0]))
                .collect();
            out.insert(field.clone(), values);
        }
        Ok(out)
    }

    fn delete_query(&self, collection: &Collection, filter: &Filter) -> DbResult<u64> {
        let generator = SqlQueryGenerator::new(&DIALECT as &dyn SqlDialect, None);
        let generated = generator.generate_select(&collection.name, filter);
        let fragment = where_fragment(&generated.text).map(|p| format!(" WHERE {}", p)).unwrap_or_default();

        let sql = format!("DELETE FROM {}{}", quote_ident(&collection.name), fragment);
        let mut conn = self.conn.lock().unwrap();
        conn.exec_drop(&sql, Self::positional(&generated.params))
            .map_err(|e| DbError::driver(format!("delete_query on {:?} failed: {e}", collection.name)))?;
        Ok(conn.affected_rows())
    }

    fn flush_index(&self) -> DbResult<()> {
        Ok(())
    }

    fn get_backend(&self) -> Arc<dyn Backend> {
        self.self_arc()
    }
}

fn where_fragment(generated_text: &str) -> Option<String> {
    generated_text.split_once(" WHERE ").map(|(_, rest)| {
        rest.split(" ORDER BY ").next().unwrap_or(rest).split(" LIMIT ").next().unwrap_or(rest).to_string()
    })
}

fn pagination_param_count(filter: &Filter) -> usize {
    filter.limit.is_some() as usize + filter.offset.is_some() as usize
}

fn decode_index_id(collection: &Collection, id: &str) -> Vec<Value> {
    collection.split_compound_id(id).into_iter().map(Value::Text).collect()
}

impl Aggregator for MysqlBackend {
    fn sum(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<f64> {
        Ok(aggregate_scalar(self, collection, AggregateFunction::Sum, field, filter)?.as_float().unwrap_or(0.0))
    }

    fn count(&self, collection: &str, filter: &Filter) -> DbResult<u64> {
        Ok(aggregate_scalar(self, collection, AggregateFunction::Count, "*", filter)?.as_int().unwrap_or(0) as u64)
    }

    fn min(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<Value> {
        aggregate_scalar(self, collection, AggregateFunction::Min, field, filter)
    }

    fn max(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<Value> {
        aggregate_scalar(self, collection, AggregateFunction::Max, field, filter)
    }

    fn avg(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<f64> {
        Ok(aggregate_scalar(self, collection, AggregateFunction::Avg, field, filter)?.as_float().unwrap_or(0.0))
    }

    fn group_by(&self, collection: &str, group_fields: &[String], aggregates: &[Aggregate], filter: &Filter) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let mut rows = Vec::new();
        Indexer::query_func(self, &schema, filter, &mut |result| {
            if let Ok(record) = result.record {
                rows.push(record);
            }
            Ok(())
        })?;
        Ok(polystore_core::aggregator::reduce_groups(rows, group_fields, aggregates, &schema.index_compound_field_joiner))
    }
}

fn aggregate_scalar(backend: &MysqlBackend, collection: &str, function: AggregateFunction, field: &str, filter: &Filter) -> DbResult<Value> {
    let sql_fn = match function {
        AggregateFunction::Sum => "SUM",
        AggregateFunction::Count => "COUNT",
        AggregateFunction::Min => "MIN",
        AggregateFunction::Max => "MAX",
        AggregateFunction::Avg => "AVG",
    };
    let generator = SqlQueryGenerator::new(&DIALECT as &dyn SqlDialect, None);
    let generated = generator.generate_select(collection, filter);
    let fragment = where_fragment(&generated.text).map(|p| format!(" WHERE {}", p)).unwrap_or_default();

    let column = if field == "*" { "*".to_string() } else { quote_ident(field) };
    let sql = format!("SELECT {}({}) FROM {}{}", sql_fn, column, quote_ident(collection), fragment);
    let mut conn = backend.conn.lock().unwrap();
    let rows: Vec<mysql::Row> = conn
        .exec(&sql, MysqlBackend::positional(&generated.params))
        .map_err(|e| DbError::driver(format!("aggregate on {collection:?} failed: {e}")))?;
    match rows.first() {
        Some(row) => Ok(crate::types::column_value(row, 0, &row.columns_ref()[0])),
        None => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::{Field, FieldType};

    fn users_schema() -> Collection {
        Collection::new("users")
            .with_field(Field::new("id", FieldType::Int).identity())
            .with_field(Field::new("name", FieldType::String))
    }

    #[test]
    fn create_table_sql_auto_increments_single_int_key() {
        let sql = MysqlBackend::create_table_sql(&users_schema());
        assert!(sql.contains("AUTO_INCREMENT"));
        assert!(sql.contains("PRIMARY KEY (`id`)"));
    }
}
