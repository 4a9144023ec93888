use crate::filter::plan_query;
use crate::keys::table_name;
use crate::types::{item_from_record, record_from_item, value_to_attribute};
use aws_sdk_dynamodb::types::{AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType};
use aws_sdk_dynamodb::Client;
use polystore_core::{
    Aggregate, Aggregator, Backend, Collection, ConnectionString, DbError, DbResult, Field, FieldType, Filter,
    IndexPage, IndexResult, Indexer, Record, RecordSet, ResultFn, Value, EXACT_COUNT_CAP,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use uuid::Uuid;

/// A `Backend`+`Indexer`+`Aggregator` over DynamoDB, one table per
/// collection. Every AWS SDK call is async; `Backend`/`Indexer`/`Aggregator`
/// are `&self`-synchronous, so every method bridges through `self.runtime`
/// the way an embedding application would bridge any async client into a
/// sync call site.
pub struct DynamoBackend {
    client: Client,
    runtime: tokio::runtime::Runtime,
    prefix: String,
    dataset: String,
    cancelled: AtomicBool,
    collections: RwLock<HashMap<String, Collection>>,
    self_ref: Weak<DynamoBackend>,
}

impl DynamoBackend {
    pub fn connect(cs: &ConnectionString) -> DbResult<Arc<Self>> {
        if cs.dataset.is_empty() {
            return Err(DbError::Validation("dynamodb connection string requires a dataset/table namespace".to_string()));
        }
        let region = if cs.host.is_empty() { "us-east-1".to_string() } else { cs.host.clone() };
        let endpoint = cs.option("endpoint").map(|s| s.to_string());
        let user = cs.user.clone();
        let password = cs.password.clone();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| DbError::unavailable(format!("failed to start async runtime for dynamodb: {e}")))?;

        let client = runtime.block_on(async {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(aws_config::Region::new(region));
            if let (Some(access_key), Some(secret_key)) = (&user, &password) {
                loader = loader.credentials_provider(aws_sdk_dynamodb::config::Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    None,
                    None,
                    "polystore",
                ));
            }
            let config = loader.load().await;
            let mut builder = aws_sdk_dynamodb::config::Builder::from(&config);
            if let Some(endpoint) = &endpoint {
                builder = builder.endpoint_url(endpoint.clone());
            }
            Client::from_conf(builder.build())
        });

        Ok(Arc::new_cyclic(|weak| Self {
            client,
            runtime,
            prefix: cs.prefix().to_string(),
            dataset: cs.dataset.clone(),
            cancelled: AtomicBool::new(false),
            collections: RwLock::new(HashMap::new()),
            self_ref: weak.clone(),
        }))
    }

    fn self_arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("DynamoBackend outlived its own Arc")
    }

    fn get_collection_or_err(&self, name: &str) -> DbResult<Collection> {
        self.collections.read().unwrap().get(name).cloned().ok_or_else(|| DbError::collection_not_found(name))
    }

    fn table(&self, collection: &str) -> String {
        table_name(&self.prefix, &self.dataset, collection)
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

fn scalar_attribute_type(field: Option<&Field>) -> ScalarAttributeType {
    match field.map(|f| f.field_type) {
        Some(FieldType::Int) | Some(FieldType::Float) => ScalarAttributeType::N,
        _ => ScalarAttributeType::S,
    }
}

impl Backend for DynamoBackend {
    fn initialize(&self) -> DbResult<()> {
        self.ping(Duration::from_secs(10))
    }

    fn ping(&self, _timeout: Duration) -> DbResult<()> {
        self.block_on(self.client.list_tables().limit(1).send())
            .map(|_| ())
            .map_err(|e| DbError::unavailable(format!("dynamodb ping failed: {e}")))
    }

    fn register_collection(&self, definition: Collection) -> DbResult<()> {
        let key_fields = definition.key_fields();
        if key_fields.is_empty() {
            return Err(DbError::SchemaMismatch(format!(
                "collection {:?} declares no identity or key fields",
                definition.name
            )));
        }
        if key_fields.len() > 2 {
            return Err(DbError::Unsupported(format!(
                "dynamodb supports at most a partition+sort key pair; collection {:?} declares {} key fields",
                definition.name,
                key_fields.len()
            )));
        }

        let table = self.table(&definition.name);
        let mut key_schema = vec![KeySchemaElement::builder()
            .attribute_name(key_fields[0].name.as_str())
            .key_type(KeyType::Hash)
            .build()
            .expect("partition key schema element")];
        let mut attribute_definitions = vec![AttributeDefinition::builder()
            .attribute_name(key_fields[0].name.as_str())
            .attribute_type(scalar_attribute_type(Some(key_fields[0])))
            .build()
            .expect("partition key attribute definition")];

        if let Some(sort_field) = key_fields.get(1) {
            key_schema.push(
                KeySchemaElement::builder()
                    .attribute_name(sort_field.name.as_str())
                    .key_type(KeyType::Range)
                    .build()
                    .expect("sort key schema element"),
            );
            attribute_definitions.push(
                AttributeDefinition::builder()
                    .attribute_name(sort_field.name.as_str())
                    .attribute_type(scalar_attribute_type(Some(sort_field)))
                    .build()
                    .expect("sort key attribute definition"),
            );
        }

        let result = self.block_on(
            self.client
                .create_table()
                .table_name(&table)
                .set_key_schema(Some(key_schema))
                .set_attribute_definitions(Some(attribute_definitions))
                .billing_mode(BillingMode::PayPerRequest)
                .send(),
        );
        if let Err(e) = result {
            let message = e.to_string();
            if !message.contains("ResourceInUseException") && !message.contains("already exists") {
                return Err(DbError::driver(format!("failed to create table {table:?}: {message}")));
            }
        }

        self.collections.write().unwrap().entry(definition.name.clone()).or_insert(definition);
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
        let table = self.table(name);
        self.block_on(self.client.delete_table().table_name(&table).send())
            .map_err(|e| DbError::driver(format!("failed to delete table {table:?}: {e}")))?;
        self.collections.write().unwrap().remove(name);
        Ok(())
    }

    fn insert(&self, collection: &str, records: Vec<Record>) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let table = self.table(collection);

        let mut stored = Vec::with_capacity(records.len());
        for mut record in records {
            if record.get(&schema.identity_field).map(Value::is_null).unwrap_or(true) {
                record.set(schema.identity_field.clone(), Value::Text(Uuid::new_v4().to_string()));
            }
            record.id = schema.key_fields().iter().map(|f| record.get(&f.name).cloned().unwrap_or(Value::Null)).collect();

            let item = item_from_record(&record);
            self.block_on(self.client.put_item().table_name(&table).set_item(Some(item)).send())
                .map_err(|e| DbError::driver(format!("insert into {collection:?} failed: {e}")))?;
            stored.push(record);
        }

        Ok(RecordSet::from_records(stored))
    }

    fn update(&self, collection: &str, records: Vec<Record>, target_expr: Option<Filter>) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let table = self.table(collection);

        let mut updated = Vec::new();
        match target_expr {
            None => {
                for record in records {
                    if record.id.is_empty() {
                        return Err(DbError::Validation(
                            "update without target_expr requires every record to carry an id".to_string(),
                        ));
                    }
                    let components = schema.build_identity_components(&record.id)?;
                    let mut merged = self.fetch_item(&table, &schema, &components)?;
                    for (field, value) in &record.fields {
                        merged.set(field.clone(), value.clone());
                    }
                    for (name, value) in &components {
                        merged.set(name.clone(), value.clone());
                    }
                    let item = item_from_record(&merged);
                    self.block_on(self.client.put_item().table_name(&table).set_item(Some(item)).send())
                        .map_err(|e| DbError::driver(format!("update on {collection:?} failed: {e}")))?;
                    updated.push(merged);
                }
            }
            Some(filter) => {
                let matches = collect_rows(self, collection, &filter)?;
                for existing in matches {
                    for record in &records {
                        let mut merged = existing.clone();
                        for (field, value) in &record.fields {
                            merged.set(field.clone(), value.clone());
                        }
                        let item = item_from_record(&merged);
                        self.block_on(self.client.put_item().table_name(&table).set_item(Some(item)).send())
                            .map_err(|e| DbError::driver(format!("target-expr update on {collection:?} failed: {e}")))?;
                        updated.push(merged);
                    }
                }
            }
        }

        Ok(RecordSet::from_records(updated))
    }

    fn delete(&self, collection: &str, ids: Vec<Vec<Value>>) -> DbResult<u64> {
        let schema = self.get_collection_or_err(collection)?;
        let table = self.table(collection);

        let mut affected = 0u64;
        for id in ids {
            let components = schema.build_identity_components(&id)?;
            let mut request = self
                .client
                .delete_item()
                .table_name(&table)
                .return_values(aws_sdk_dynamodb::types::ReturnValue::AllOld);
            for (name, value) in &components {
                request = request.key(name.as_str(), value_to_attribute(value));
            }
            let result = self.block_on(request.send()).map_err(|e| DbError::driver(format!("delete on {collection:?} failed: {e}")))?;
            if result.attributes().is_some_and(|attrs| !attrs.is_empty()) {
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn retrieve(&self, collection: &str, id: &[Value], fields: &[String]) -> DbResult<Record> {
        let schema = self.get_collection_or_err(collection)?;
        let table = self.table(collection);
        let components = schema.build_identity_components(id)?;

        let mut record = self.fetch_item(&table, &schema, &components)?;
        if !fields.is_empty() {
            record.fields.retain(|k, _| fields.contains(k));
        }
        Ok(record)
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
        let table = self.table(collection);
        let mut total = 0u64;
        let mut exclusive_start_key = None;
        loop {
            let mut scan = self.client.scan().table_name(&table).select(aws_sdk_dynamodb::types::Select::Count);
            if let Some(key) = exclusive_start_key.take() {
                scan = scan.set_exclusive_start_key(Some(key));
            }
            let output = self.block_on(scan.send()).map_err(|e| DbError::driver(format!("count on {collection:?} failed: {e}")))?;
            total += output.count() as u64;
            if total >= EXACT_COUNT_CAP {
                return Ok(EXACT_COUNT_CAP);
            }
            match output.last_evaluated_key() {
                Some(last) if !last.is_empty() => exclusive_start_key = Some(last.clone()),
                _ => break,
            }
        }
        Ok(total)
    }
}

impl DynamoBackend {
    fn fetch_item(&self, table: &str, schema: &Collection, components: &[(String, Value)]) -> DbResult<Record> {
        let mut request = self.client.get_item().table_name(table);
        for (name, value) in components {
            request = request.key(name.as_str(), value_to_attribute(value));
        }
        let result = self.block_on(request.send()).map_err(|e| DbError::driver(format!("retrieve from {:?} failed: {e}", schema.name)))?;
        match result.item() {
            Some(item) => Ok(record_from_item(schema, item)),
            None => Err(DbError::record_not_found(
                &schema.name,
                components.iter().map(|(_, v)| v.as_key_component()).collect::<Vec<_>>().join(","),
            )),
        }
    }
}

fn decode_index_id(collection: &Collection, id: &str) -> Vec<Value> {
    collection.split_compound_id(id).into_iter().map(Value::Text).collect()
}

impl Indexer for DynamoBackend {
    fn index_initialize(&self, _parent: Arc<dyn Backend>) -> DbResult<()> {
        Ok(())
    }

    fn index_exists(&self, collection: &str, id: &str) -> DbResult<bool> {
        let schema = self.get_collection_or_err(collection)?;
        Backend::exists(self, collection, &decode_index_id(&schema, id))
    }

    fn index_retrieve(&self, collection: &str, id: &str) -> DbResult<Record> {
        let schema = self.get_collection_or_err(collection)?;
        Backend::retrieve(self, collection, &decode_index_id(&schema, id), &[])
    }

    fn index_remove(&self, collection: &str, id: &str) -> DbResult<()> {
        let schema = self.get_collection_or_err(collection)?;
        Backend::delete(self, collection, vec![decode_index_id(&schema, id)]).map(|_| ())
    }

    fn query_func(&self, collection: &Collection, filter: &Filter, result_fn: &mut ResultFn<'_>) -> DbResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(DbError::unavailable("query cancelled"));
        }

        let table = self.table(&collection.name);
        let plan = plan_query(collection, filter)?;
        let limit = filter.effective_limit();
        let offset = filter.effective_offset();

        let mut skipped = 0u64;
        let mut emitted = 0u64;
        let mut exclusive_start_key = None;
        // `total_results` stays unknown: both Query-with-filter and Scan may
        // drop rows client-side after a page is fetched, so a running count
        // wouldn't reflect the total across pages without reading every one.
        let index_page = IndexPage { page: offset / limit.max(1) + 1, total_pages: None, limit, offset, total_results: None };

        loop {
            if emitted >= limit {
                break;
            }
            let output = if plan.is_query {
                let mut request = self
                    .client
                    .query()
                    .table_name(&table)
                    .key_condition_expression(plan.key_condition_expression.clone().expect("query plan"))
                    .set_expression_attribute_names(Some(plan.attribute_names.clone()))
                    .set_expression_attribute_values(Some(plan.attribute_values.clone()))
                    .scan_index_forward(plan.scan_index_forward);
                if let Some(filter_expr) = &plan.filter_expression {
                    request = request.filter_expression(filter_expr.clone());
                }
                if let Some(key) = exclusive_start_key.take() {
                    request = request.set_exclusive_start_key(Some(key));
                }
                self.block_on(request.send()).map_err(|e| DbError::driver(format!("query on {:?} failed: {e}", collection.name)))?
            } else {
                let mut request = self.client.scan().table_name(&table);
                if !plan.attribute_names.is_empty() {
                    request = request.set_expression_attribute_names(Some(plan.attribute_names.clone()));
                }
                if !plan.attribute_values.is_empty() {
                    request = request.set_expression_attribute_values(Some(plan.attribute_values.clone()));
                }
                if let Some(filter_expr) = &plan.filter_expression {
                    request = request.filter_expression(filter_expr.clone());
                }
                if let Some(key) = exclusive_start_key.take() {
                    request = request.set_exclusive_start_key(Some(key));
                }
                self.block_on(request.send()).map_err(|e| DbError::driver(format!("scan on {:?} failed: {e}", collection.name)))?
            };

            for item in output.items() {
                if skipped < offset {
                    skipped += 1;
                    continue;
                }
                if emitted >= limit {
                    break;
                }
                let record = Ok(record_from_item(collection, item));
                result_fn(IndexResult { record, page: index_page })?;
                emitted += 1;
            }

            match output.last_evaluated_key() {
                Some(last) if !last.is_empty() && emitted < limit => exclusive_start_key = Some(last.clone()),
                _ => break,
            }
        }
        Ok(())
    }

    fn list_values(&self, collection: &Collection, fields: &[String], filter: &Filter) -> DbResult<BTreeMap<String, Vec<Value>>> {
        let rows = collect_rows(self, &collection.name, filter)?;
        let mut out = BTreeMap::new();
        for field in fields {
            let mut values: Vec<Value> = Vec::new();
            for row in &rows {
                let value = if field == "id" { row.scalar_id().cloned().unwrap_or(Value::Null) } else { row.get(field).cloned().unwrap_or(Value::Null) };
                if !values.contains(&value) {
                    values.push(value);
                }
            }
            out.insert(field.clone(), values);
        }
        Ok(out)
    }

    fn delete_query(&self, collection: &Collection, filter: &Filter) -> DbResult<u64> {
        let rows = collect_rows(self, &collection.name, filter)?;
        let ids: Vec<Vec<Value>> = rows.into_iter().map(|r| r.id).collect();
        let count = ids.len() as u64;
        Backend::delete(self, &collection.name, ids)?;
        Ok(count)
    }

    fn flush_index(&self) -> DbResult<()> {
        Ok(())
    }

    fn get_backend(&self) -> Arc<dyn Backend> {
        self.self_arc()
    }
}

/// Stream every row matching `filter` into memory for the scalar reducers
/// and `group_by`, per `Aggregator`'s doc comment sanctioning this fallback
/// when the store has no native grouping pushed down.
fn collect_rows(backend: &DynamoBackend, collection: &str, filter: &Filter) -> DbResult<Vec<Record>> {
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

impl Aggregator for DynamoBackend {
    fn sum(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<f64> {
        let rows = collect_rows(self, collection, filter)?;
        Ok(rows.iter().filter_map(|r| r.get(field).and_then(Value::as_float)).sum())
    }

    fn count(&self, collection: &str, filter: &Filter) -> DbResult<u64> {
        Ok(collect_rows(self, collection, filter)?.len() as u64)
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

    fn group_by(&self, collection: &str, group_fields: &[String], aggregates: &[Aggregate], filter: &Filter) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let rows = collect_rows(self, collection, filter)?;
        Ok(polystore_core::aggregator::reduce_groups(rows, group_fields, aggregates, &schema.index_compound_field_joiner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::ConnectionString;

    #[test]
    fn connect_rejects_empty_dataset() {
        let cs = ConnectionString::parse("dynamodb://us-east-1/").unwrap();
        assert!(DynamoBackend::connect(&cs).is_err());
    }

    #[test]
    fn scalar_attribute_type_maps_numeric_fields_to_n() {
        let field = Field::new("amount", FieldType::Int).identity();
        assert_eq!(scalar_attribute_type(Some(&field)), ScalarAttributeType::N);
        let field = Field::new("name", FieldType::String).identity();
        assert_eq!(scalar_attribute_type(Some(&field)), ScalarAttributeType::S);
    }
}
