use crate::dialect::{quote_ident, PostgresDialect};
use crate::types::{row_to_record, PgParam};
use native_tls::TlsConnector;
use polystore_core::{
    Aggregate, AggregateFunction, Aggregator, Backend, Collection, ConnectionString, DbError,
    DbResult, Field, FieldType, Filter, IndexPage, IndexResult, Indexer, Record, RecordSet,
    ResultFn, Value,
};
use polystore_sql::{count_query, SqlDialect, SqlQueryGenerator};
use postgres::{Client, NoTls};
use postgres_native_tls::MakeTlsConnector;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

static DIALECT: PostgresDialect = PostgresDialect;

/// A `Backend`+`Indexer`+`Aggregator` over a single PostgreSQL database,
/// colocating the index plane with the primary table the same way the
/// sqlite driver does.
pub struct PostgresBackend {
    client: Mutex<Client>,
    cancelled: AtomicBool,
    collections: RwLock<HashMap<String, Collection>>,
    self_ref: Weak<PostgresBackend>,
}

impl PostgresBackend {
    pub fn connect(cs: &ConnectionString) -> DbResult<Arc<Self>> {
        let host = if cs.host.is_empty() { "localhost" } else { cs.host.as_str() };
        let conn_string = format!(
            "host={} port={} user={} password={} dbname={} connect_timeout={}",
            host,
            cs.port.unwrap_or(5432),
            cs.user.as_deref().unwrap_or(""),
            cs.password.as_deref().unwrap_or(""),
            cs.dataset,
            cs.timeout().as_secs(),
        );

        let client = match cs.sslmode() {
            "disable" => Client::connect(&conn_string, NoTls)
                .map_err(|e| format_connect_error(&e, host, cs.port.unwrap_or(5432)))?,
            mode => {
                let connector = TlsConnector::builder()
                    .danger_accept_invalid_certs(mode == "prefer")
                    .build()
                    .map_err(|e| DbError::unavailable(format!("TLS setup failed: {e}")))?;
                let tls = MakeTlsConnector::new(connector);
                match Client::connect(&conn_string, tls) {
                    Ok(c) => c,
                    Err(_) if mode == "prefer" => Client::connect(&conn_string, NoTls)
                        .map_err(|e| format_connect_error(&e, host, cs.port.unwrap_or(5432)))?,
                    Err(e) => return Err(format_connect_error(&e, host, cs.port.unwrap_or(5432))),
                }
            }
        };

        Ok(Arc::new_cyclic(|weak| Self {
            client: Mutex::new(client),
            cancelled: AtomicBool::new(false),
            collections: RwLock::new(HashMap::new()),
            self_ref: weak.clone(),
        }))
    }

    fn self_arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("PostgresBackend outlived its own Arc")
    }

    fn get_collection_or_err(&self, name: &str) -> DbResult<Collection> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::collection_not_found(name))
    }

    fn sql_column_type(field: &Field, single_int_identity: bool) -> String {
        let base = match field.field_type {
            FieldType::Int => "BIGINT",
            FieldType::Float => "DOUBLE PRECISION",
            FieldType::Bool => "BOOLEAN",
            FieldType::Raw => "BYTEA",
            FieldType::Time => "TIMESTAMPTZ",
            FieldType::Object | FieldType::Array => "JSONB",
            FieldType::String => "TEXT",
        };
        if single_int_identity && field.identity {
            "BIGINT GENERATED BY DEFAULT AS IDENTITY".to_string()
        } else {
            base.to_string()
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
                let mut line = format!(
                    "{} {}",
                    quote_ident(&field.name),
                    Self::sql_column_type(field, single_integer_pk)
                );
                if field.required && !field.identity {
                    line.push_str(" NOT NULL");
                }
                line
            })
            .collect();

        if single_integer_pk {
            columns.push(format!("PRIMARY KEY ({})", quote_ident(key_names[0])));
        } else if !key_names.is_empty() {
            let quoted: Vec<String> = key_names.iter().map(|n| quote_ident(n)).collect();
            columns.push(format!("PRIMARY KEY ({})", quoted.join(", ")));
        }

        format!("CREATE TABLE IF NOT EXISTS {} (\n    {}\n)", table, columns.join(",\n    "))
    }

    fn identity_where(collection: &Collection, id: &[Value], next_index: &mut usize) -> DbResult<(String, Vec<Value>)> {
        let components = collection.build_identity_components(id)?;
        let mut params = Vec::with_capacity(components.len());
        let conditions: Vec<String> = components
            .into_iter()
            .map(|(name, value)| {
                let column = quote_ident(&name);
                if value.is_null() {
                    format!("{} IS NULL", column)
                } else {
                    let placeholder = format!("${}", next_index);
                    *next_index += 1;
                    params.push(value);
                    format!("{} = {}", column, placeholder)
                }
            })
            .collect();
        Ok((conditions.join(" AND "), params))
    }
}

impl Backend for PostgresBackend {
    fn initialize(&self) -> DbResult<()> {
        self.ping(Duration::from_secs(10))
    }

    fn ping(&self, _timeout: Duration) -> DbResult<()> {
        let mut client = self.client.lock().unwrap();
        client
            .simple_query("SELECT 1")
            .map(|_| ())
            .map_err(|e| DbError::unavailable(format!("postgres ping failed: {e}")))
    }

    fn register_collection(&self, definition: Collection) -> DbResult<()> {
        let sql = Self::create_table_sql(&definition);
        self.client
            .lock()
            .unwrap()
            .batch_execute(&sql)
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
        self.client
            .lock()
            .unwrap()
            .batch_execute(&sql)
            .map_err(|e| DbError::driver(format!("failed to drop table {name:?}: {e}")))?;
        self.collections.write().unwrap().remove(name);
        Ok(())
    }

    fn insert(&self, collection: &str, records: Vec<Record>) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let table = quote_ident(collection);
        let mut client = self.client.lock().unwrap();

        let mut inserted = Vec::with_capacity(records.len());
        for record in records {
            let columns: Vec<&String> = record.fields.keys().collect();
            let quoted_columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                table,
                quoted_columns.join(", "),
                placeholders.join(", ")
            );
            let bound: Vec<PgParam> = columns.iter().map(|c| PgParam(record.fields.get(*c).unwrap())).collect();
            let params: Vec<&(dyn postgres::types::ToSql + Sync)> =
                bound.iter().map(|p| p as &(dyn postgres::types::ToSql + Sync)).collect();

            let row = client
                .query_one(&sql, &params)
                .map_err(|e| DbError::driver(format!("insert into {collection:?} failed: {e}")))?;
            inserted.push(row_to_record(&schema, &row)?);
        }

        Ok(RecordSet::from_records(inserted))
    }

    fn update(&self, collection: &str, records: Vec<Record>, target_expr: Option<Filter>) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let table = quote_ident(collection);
        let mut client = self.client.lock().unwrap();

        let mut updated = Vec::new();
        match target_expr {
            None => {
                for record in records {
                    if record.id.is_empty() {
                        return Err(DbError::Validation(
                            "update without target_expr requires every record to carry an id".to_string(),
                        ));
                    }
                    let columns: Vec<&String> = record.fields.keys().collect();
                    let mut next_index = 1usize;
                    let assignments: Vec<String> = columns
                        .iter()
                        .map(|c| {
                            let placeholder = format!("${}", next_index);
                            next_index += 1;
                            format!("{} = {}", quote_ident(c), placeholder)
                        })
                        .collect();
                    let (where_clause, where_values) = Self::identity_where(&schema, &record.id, &mut next_index)?;
                    let sql = format!(
                        "UPDATE {} SET {} WHERE {} RETURNING *",
                        table,
                        assignments.join(", "),
                        where_clause
                    );

                    let set_bound: Vec<PgParam> = columns.iter().map(|c| PgParam(record.fields.get(*c).unwrap())).collect();
                    let where_bound: Vec<PgParam> = where_values.iter().map(PgParam).collect();
                    let params: Vec<&(dyn postgres::types::ToSql + Sync)> = set_bound
                        .iter()
                        .chain(where_bound.iter())
                        .map(|p| p as &(dyn postgres::types::ToSql + Sync))
                        .collect();

                    let row = client
                        .query_one(&sql, &params)
                        .map_err(|e| DbError::driver(format!("update on {collection:?} failed: {e}")))?;
                    updated.push(row_to_record(&schema, &row)?);
                }
            }
            Some(filter) => {
                let generator = SqlQueryGenerator::new(&DIALECT as &dyn SqlDialect, None);
                let generated = generator.generate_select(collection, &filter);
                let where_clause = generated
                    .text
                    .split_once(" WHERE ")
                    .map(|(_, rest)| rest.split(" ORDER BY ").next().unwrap_or(rest).to_string())
                    .unwrap_or_else(|| "TRUE".to_string());
                let mut next_index = generated.params.len() + 1;

                for record in records {
                    let columns: Vec<&String> = record.fields.keys().collect();
                    let assignments: Vec<String> = columns
                        .iter()
                        .map(|c| {
                            let placeholder = format!("${}", next_index);
                            next_index += 1;
                            format!("{} = {}", quote_ident(c), placeholder)
                        })
                        .collect();
                    let sql = format!("UPDATE {} SET {} WHERE {} RETURNING *", table, assignments.join(", "), where_clause);

                    let where_bound: Vec<PgParam> = generated.params.iter().map(PgParam).collect();
                    let set_bound: Vec<PgParam> = columns.iter().map(|c| PgParam(record.fields.get(*c).unwrap())).collect();
                    let params: Vec<&(dyn postgres::types::ToSql + Sync)> = where_bound
                        .iter()
                        .chain(set_bound.iter())
                        .map(|p| p as &(dyn postgres::types::ToSql + Sync))
                        .collect();

                    for row in client
                        .query(&sql, &params)
                        .map_err(|e| DbError::driver(format!("target-expr update on {collection:?} failed: {e}")))?
                    {
                        updated.push(row_to_record(&schema, &row)?);
                    }
                }
            }
        }

        Ok(RecordSet::from_records(updated))
    }

    fn delete(&self, collection: &str, ids: Vec<Vec<Value>>) -> DbResult<u64> {
        let schema = self.get_collection_or_err(collection)?;
        let table = quote_ident(collection);
        let mut client = self.client.lock().unwrap();

        let mut affected = 0u64;
        for id in ids {
            let mut next_index = 1usize;
            let (where_clause, values) = Self::identity_where(&schema, &id, &mut next_index)?;
            let sql = format!("DELETE FROM {} WHERE {}", table, where_clause);
            let bound: Vec<PgParam> = values.iter().map(PgParam).collect();
            let params: Vec<&(dyn postgres::types::ToSql + Sync)> =
                bound.iter().map(|p| p as &(dyn postgres::types::ToSql + Sync)).collect();
            affected += client
                .execute(&sql, &params)
                .map_err(|e| DbError::driver(format!("delete on {collection:?} failed: {e}")))?;
        }
        Ok(affected)
    }

    fn retrieve(&self, collection: &str, id: &[Value], fields: &[String]) -> DbResult<Record> {
        let schema = self.get_collection_or_err(collection)?;
        let mut next_index = 1usize;
        let (where_clause, values) = Self::identity_where(&schema, id, &mut next_index)?;
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

        let mut client = self.client.lock().unwrap();
        let bound: Vec<PgParam> = values.iter().map(PgParam).collect();
        let params: Vec<&(dyn postgres::types::ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn postgres::types::ToSql + Sync)).collect();
        let rows = client
            .query(&sql, &params)
            .map_err(|e| DbError::driver(format!("retrieve from {collection:?} failed: {e}")))?;

        match rows.into_iter().next() {
            Some(row) => row_to_record(&schema, &row),
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
        let mut client = self.client.lock().unwrap();
        let row = client
            .query_one(&sql, &[])
            .map_err(|e| DbError::driver(format!("count on {collection:?} failed: {e}")))?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }
}

impl Indexer for PostgresBackend {
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

        let mut client = self.client.lock().unwrap();
        let total_results = where_fragment(&generated.text).map(|predicate| {
            let sql = count_query(&quote_ident(&collection.name), Some(&predicate));
            let non_pagination = &generated.params[..generated.params.len().saturating_sub(pagination_param_count(filter))];
            let bound: Vec<PgParam> = non_pagination.iter().map(PgParam).collect();
            let params: Vec<&(dyn postgres::types::ToSql + Sync)> =
                bound.iter().map(|p| p as &(dyn postgres::types::ToSql + Sync)).collect();
            client.query_one(&sql, &params).ok().map(|row| row.get::<_, i64>(0) as u64)
        }).unwrap_or_else(|| {
            let sql = count_query(&quote_ident(&collection.name), None);
            client.query_one(&sql, &[]).ok().map(|row| row.get::<_, i64>(0) as u64)
        });

        let limit = filter.effective_limit();
        let offset = filter.effective_offset();
        let total_pages = total_results.map(|total| if limit == 0 || limit == u64::MAX { 1 } else { total.div_ceil(limit).max(1) });
        let page = if limit == 0 || limit == u64::MAX { 1 } else { offset / limit + 1 };

        let bound: Vec<PgParam> = generated.params.iter().map(PgParam).collect();
        let params: Vec<&(dyn postgres::types::ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn postgres::types::ToSql + Sync)).collect();
        let rows = client
            .query(&generated.text, &params)
            .map_err(|e| DbError::driver(format!("query on {:?} failed: {e}", collection.name)))?;

        let index_page = IndexPage { page, total_pages, limit, offset, total_results };
        for row in rows {
            let record = row_to_record(collection, &row);
            result_fn(IndexResult { record, page: index_page })?;
        }
        Ok(())
    }

    fn list_values(&self, collection: &Collection, fields: &[String], filter: &Filter) -> DbResult<BTreeMap<String, Vec<Value>>> {
        let generator = SqlQueryGenerator::new(&DIALECT as &dyn SqlDialect, None);
        let generated = generator.generate_select(&collection.name, filter);
        let fragment = where_fragment(&generated.text).map(|p| format!(" WHERE {}", p)).unwrap_or_default();

        let mut client = self.client.lock().unwrap();
        let mut out = BTreeMap::new();
        for field in fields {
            let sql = format!("SELECT DISTINCT {} FROM {}{}", quote_ident(field), quote_ident(&collection.name), fragment);
            let bound: Vec<PgParam> = generated.params.iter().map(PgParam).collect();
            let params: Vec<&(dyn postgres::types::ToSql + Sync)> =
                bound.iter().map(|p| p as &(dyn postgres::types::ToSql + Sync)).collect();
            let rows = client
                .query(&sql, &params)
                .map_err(|e| DbError::driver(format!("list_values on {field:?} failed: {e}")))?;
            let values: Vec<Value> = rows.iter().map(|row| crate::types::column_value(row, 0)).collect();
            out.insert(field.clone(), values);
        }
        Ok(out)
    }

    fn delete_query(&self, collection: &Collection, filter: &Filter) -> DbResult<u64> {
        let generator = SqlQueryGenerator::new(&DIALECT as &dyn SqlDialect, None);
        let generated = generator.generate_select(&collection.name, filter);
        let fragment = where_fragment(&generated.text).map(|p| format!(" WHERE {}", p)).unwrap_or_default();

        let sql = format!("DELETE FROM {}{}", quote_ident(&collection.name), fragment);
        let mut client = self.client.lock().unwrap();
        let bound: Vec<PgParam> = generated.params.iter().map(PgParam).collect();
        let params: Vec<&(dyn postgres::types::ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn postgres::types::ToSql + Sync)).collect();
        client
            .execute(&sql, &params)
            .map_err(|e| DbError::driver(format!("delete_query on {:?} failed: {e}", collection.name)))
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

fn format_connect_error(e: &postgres::Error, host: &str, port: u16) -> DbError {
    let source = e.to_string();
    let message = if source.contains("timed out") {
        format!("connection to {host}:{port} timed out")
    } else if source.contains("password authentication failed") {
        "authentication failed: check username and password".to_string()
    } else if source.contains("Connection refused") {
        format!("connection refused at {host}:{port}")
    } else {
        format!("postgres connection error: {source}")
    };
    DbError::unavailable(message)
}

impl Aggregator for PostgresBackend {
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

fn aggregate_scalar(backend: &PostgresBackend, collection: &str, function: AggregateFunction, field: &str, filter: &Filter) -> DbResult<Value> {
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
    let mut client = backend.client.lock().unwrap();
    let bound: Vec<PgParam> = generated.params.iter().map(PgParam).collect();
    let params: Vec<&(dyn postgres::types::ToSql + Sync)> =
        bound.iter().map(|p| p as &(dyn postgres::types::ToSql + Sync)).collect();
    let row = client
        .query_one(&sql, &params)
        .map_err(|e| DbError::driver(format!("aggregate on {collection:?} failed: {e}")))?;
    Ok(crate::types::column_value(&row, 0))
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
    fn create_table_sql_uses_identity_column_for_single_int_key() {
        let sql = PostgresBackend::create_table_sql(&users_schema());
        assert!(sql.contains("GENERATED BY DEFAULT AS IDENTITY"));
        assert!(sql.contains("PRIMARY KEY (\"id\")"));
    }
}
