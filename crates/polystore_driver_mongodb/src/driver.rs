use crate::filter::{filter_to_document, identity_filter, projection_document, sort_document};
use crate::types::{document_from_record, record_from_document};
use bson::{doc, Bson, Document};
use mongodb::sync::Client;
use polystore_core::{
    Aggregate, AggregateFunction, Aggregator, Backend, Collection, ConnectionString, DbError, DbResult, Filter,
    IndexPage, IndexResult, Indexer, Record, RecordSet, ResultFn, Value,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

/// A `Backend`+`Indexer`+`Aggregator` over a single Mongo database,
/// colocating the index plane with the primary collection the same way the
/// SQL drivers colocate theirs with their table.
pub struct MongoBackend {
    client: Client,
    database: String,
    cancelled: AtomicBool,
    collections: RwLock<HashMap<String, Collection>>,
    self_ref: Weak<MongoBackend>,
}

impl MongoBackend {
    pub fn connect(cs: &ConnectionString) -> DbResult<Arc<Self>> {
        if cs.dataset.is_empty() {
            return Err(DbError::Validation("mongodb connection string requires a database name".to_string()));
        }

        let host = if cs.host.is_empty() { "localhost".to_string() } else { cs.host.clone() };
        let port = cs.port.unwrap_or(27017);

        let mut uri = String::from("mongodb://");
        if let Some(user) = &cs.user {
            uri.push_str(&urlencoding::encode(user));
            if let Some(password) = &cs.password {
                uri.push(':');
                uri.push_str(&urlencoding::encode(password));
            }
            uri.push('@');
        }
        uri.push_str(&format!("{host}:{port}/{}", cs.dataset));
        if cs.sslmode() != "disable" {
            uri.push_str("?tls=true");
        }

        let client = Client::with_uri_str(&uri)
            .map_err(|e| DbError::unavailable(format!("failed to connect to mongodb at {host}:{port}: {e}")))?;

        Ok(Arc::new_cyclic(|weak| Self {
            client,
            database: cs.dataset.clone(),
            cancelled: AtomicBool::new(false),
            collections: RwLock::new(HashMap::new()),
            self_ref: weak.clone(),
        }))
    }

    fn self_arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("MongoBackend outlived its own Arc")
    }

    fn get_collection_or_err(&self, name: &str) -> DbResult<Collection> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::collection_not_found(name))
    }

    fn db(&self) -> mongodb::sync::Database {
        self.client.database(&self.database)
    }

    fn mongo_collection(&self, name: &str) -> mongodb::sync::Collection<Document> {
        self.db().collection::<Document>(name)
    }
}

impl Backend for MongoBackend {
    fn initialize(&self) -> DbResult<()> {
        self.ping(Duration::from_secs(10))
    }

    fn ping(&self, _timeout: Duration) -> DbResult<()> {
        self.client
            .database("admin")
            .run_command(doc! {"ping": 1})
            .run()
            .map(|_| ())
            .map_err(|e| DbError::unavailable(format!("mongodb ping failed: {e}")))
    }

    fn register_collection(&self, definition: Collection) -> DbResult<()> {
        let existing: Vec<String> = self
            .db()
            .list_collection_names()
            .run()
            .map_err(|e| DbError::driver(format!("failed to list collections: {e}")))?;

        if !existing.contains(&definition.name) {
            if let Err(e) = self.db().create_collection(&definition.name).run() {
                if !e.to_string().contains("already exists") {
                    return Err(DbError::driver(format!("failed to create collection {:?}: {e}", definition.name)));
                }
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
        self.mongo_collection(name)
            .drop()
            .run()
            .map_err(|e| DbError::driver(format!("failed to drop collection {name:?}: {e}")))?;
        self.collections.write().unwrap().remove(name);
        Ok(())
    }

    fn insert(&self, collection: &str, records: Vec<Record>) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let mongo_collection = self.mongo_collection(collection);

        let mut docs = Vec::with_capacity(records.len());
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            let mut doc = document_from_record(&schema, &record);
            let mut rec = record;
            if !doc.contains_key("_id") {
                let oid = bson::oid::ObjectId::new();
                doc.insert("_id", Bson::ObjectId(oid));
                rec.set(schema.identity_field.clone(), Value::Text(oid.to_hex()));
            }
            rec.id = schema
                .key_fields()
                .iter()
                .map(|f| rec.get(&f.name).cloned().unwrap_or(Value::Null))
                .collect();
            docs.push(doc);
            stored.push(rec);
        }

        if docs.is_empty() {
            return Ok(RecordSet::empty());
        }

        if docs.len() == 1 {
            mongo_collection
                .insert_one(docs.into_iter().next().unwrap())
                .run()
                .map_err(|e| DbError::driver(format!("insert into {collection:?} failed: {e}")))?;
        } else {
            mongo_collection
                .insert_many(docs)
                .run()
                .map_err(|e| DbError::driver(format!("insert into {collection:?} failed: {e}")))?;
        }

        Ok(RecordSet::from_records(stored))
    }

    fn update(&self, collection: &str, records: Vec<Record>, target_expr: Option<Filter>) -> DbResult<RecordSet> {
        let schema = self.get_collection_or_err(collection)?;
        let mongo_collection = self.mongo_collection(collection);

        let mut updated = Vec::new();
        match target_expr {
            None => {
                for record in records {
                    if record.id.is_empty() {
                        return Err(DbError::Validation(
                            "update without target_expr requires every record to carry an id".to_string(),
                        ));
                    }
                    let filter_doc = identity_filter(&schema, &record.id)?;
                    let set_doc = set_document(&schema, &record);
                    mongo_collection
                        .update_one(filter_doc, doc! {"$set": set_doc})
                        .run()
                        .map_err(|e| DbError::driver(format!("update on {collection:?} failed: {e}")))?;
                    updated.push(record);
                }
            }
            Some(filter) => {
                let filter_doc = filter_to_document(&schema, &filter);
                for record in records {
                    let set_doc = set_document(&schema, &record);
                    mongo_collection
                        .update_many(filter_doc.clone(), doc! {"$set": set_doc})
                        .run()
                        .map_err(|e| DbError::driver(format!("target-expr update on {collection:?} failed: {e}")))?;
                    updated.push(record);
                }
            }
        }

        Ok(RecordSet::from_records(updated))
    }

    fn delete(&self, collection: &str, ids: Vec<Vec<Value>>) -> DbResult<u64> {
        let schema = self.get_collection_or_err(collection)?;
        let mongo_collection = self.mongo_collection(collection);

        let mut affected = 0u64;
        for id in ids {
            let filter_doc = identity_filter(&schema, &id)?;
            let result = mongo_collection
                .delete_one(filter_doc)
                .run()
                .map_err(|e| DbError::driver(format!("delete on {collection:?} failed: {e}")))?;
            affected += result.deleted_count;
        }
        Ok(affected)
    }

    fn retrieve(&self, collection: &str, id: &[Value], fields: &[String]) -> DbResult<Record> {
        let schema = self.get_collection_or_err(collection)?;
        let filter_doc = identity_filter(&schema, id)?;
        let mongo_collection = self.mongo_collection(collection);

        let mut builder = mongo_collection.find_one(filter_doc);
        if !fields.is_empty() {
            let mut projection = Document::new();
            for field in fields {
                let key = if field == &schema.identity_field { "_id".to_string() } else { field.clone() };
                projection.insert(key, Bson::Int32(1));
            }
            builder = builder.projection(projection);
        }

        let found = builder
            .run()
            .map_err(|e| DbError::driver(format!("retrieve from {collection:?} failed: {e}")))?;

        match found {
            Some(doc) => Ok(record_from_document(&schema, &doc)),
            None => Err(DbError::record_not_found(
                collection,
                id.iter().map(Value::as_key_component).collect::<Vec<_>>().join(","),
            )),
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
        self.mongo_collection(collection)
            .count_documents(doc! {})
            .run()
            .map_err(|e| DbError::driver(format!("count on {collection:?} failed: {e}")))
    }
}

fn set_document(collection: &Collection, record: &Record) -> Document {
    let mut doc = document_from_record(collection, record);
    doc.remove("_id");
    doc
}

fn decode_index_id(collection: &Collection, id: &str) -> Vec<Value> {
    collection.split_compound_id(id).into_iter().map(Value::Text).collect()
}

impl Indexer for MongoBackend {
    fn index_initialize(&self, _parent: Arc<dyn Backend>) -> DbResult<()> {
        // Colocated: the index plane *is* the primary collection.
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

        let mongo_collection = self.mongo_collection(&collection.name);
        let filter_doc = filter_to_document(collection, filter);

        let total_results = mongo_collection.count_documents(filter_doc.clone()).run().ok();

        let limit = filter.effective_limit();
        let offset = filter.effective_offset();
        let total_pages =
            total_results.map(|total| if limit == 0 || limit == u64::MAX { 1 } else { total.div_ceil(limit).max(1) });
        let page = if limit == 0 || limit == u64::MAX { 1 } else { offset / limit + 1 };

        let mut builder = mongo_collection.find(filter_doc).skip(offset);
        if limit != u64::MAX {
            builder = builder.limit(limit as i64);
        }
        if let Some(sort) = sort_document(collection, filter) {
            builder = builder.sort(sort);
        }
        if let Some(projection) = projection_document(collection, filter) {
            builder = builder.projection(projection);
        }

        let cursor = builder
            .run()
            .map_err(|e| DbError::driver(format!("query on {:?} failed: {e}", collection.name)))?;

        let index_page = IndexPage { page, total_pages, limit, offset, total_results };
        for item in cursor {
            match item {
                Ok(doc) => {
                    let record = Ok(record_from_document(collection, &doc));
                    result_fn(IndexResult { record, page: index_page })?;
                }
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
        let mongo_collection = self.mongo_collection(&collection.name);
        let filter_doc = filter_to_document(collection, filter);

        let mut out = BTreeMap::new();
        for field in fields {
            let key = if field == &collection.identity_field { "_id".to_string() } else { field.clone() };
            let values = mongo_collection
                .distinct(&key, filter_doc.clone())
                .run()
                .map_err(|e| DbError::driver(format!("list_values on {field:?} failed: {e}")))?
                .iter()
                .map(crate::types::bson_to_value)
                .collect();
            out.insert(field.clone(), values);
        }
        Ok(out)
    }

    fn delete_query(&self, collection: &Collection, filter: &Filter) -> DbResult<u64> {
        let filter_doc = filter_to_document(collection, filter);
        let result = self
            .mongo_collection(&collection.name)
            .delete_many(filter_doc)
            .run()
            .map_err(|e| DbError::driver(format!("delete_query on {:?} failed: {e}", collection.name)))?;
        Ok(result.deleted_count)
    }

    fn flush_index(&self) -> DbResult<()> {
        Ok(())
    }

    fn get_backend(&self) -> Arc<dyn Backend> {
        self.self_arc()
    }
}

impl Aggregator for MongoBackend {
    fn sum(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<f64> {
        let rows = collect_rows(self, collection, filter)?;
        Ok(rows.iter().filter_map(|r| r.get(field).and_then(Value::as_float)).sum())
    }

    fn count(&self, collection: &str, filter: &Filter) -> DbResult<u64> {
        let schema = self.get_collection_or_err(collection)?;
        let filter_doc = filter_to_document(&schema, filter);
        self.mongo_collection(collection)
            .count_documents(filter_doc)
            .run()
            .map_err(|e| DbError::driver(format!("count on {collection:?} failed: {e}")))
    }

    fn min(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<Value> {
        let rows = collect_rows(self, collection, filter)?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get(field).cloned())
            .filter(|v| !v.is_null())
            .min()
            .unwrap_or(Value::Null))
    }

    fn max(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<Value> {
        let rows = collect_rows(self, collection, filter)?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get(field).cloned())
            .filter(|v| !v.is_null())
            .max()
            .unwrap_or(Value::Null))
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

/// Stream every row matching `filter` into memory; used by the scalar
/// reducers and `group_by` since Mongo's own aggregation pipeline isn't
/// needed to satisfy the contract (per `Aggregator`'s doc comment, a driver
/// may layer this atop `Indexer::query_func` when it has no native grouping
/// pushed down).
fn collect_rows(backend: &MongoBackend, collection: &str, filter: &Filter) -> DbResult<Vec<Record>> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::{ConnectionString, Field, FieldType};

    #[test]
    fn connect_rejects_empty_database_name() {
        let cs = ConnectionString::parse("mongodb://localhost:27017/").unwrap();
        assert!(MongoBackend::connect(&cs).is_err());
    }

    #[test]
    fn set_document_never_touches_identity() {
        let schema = Collection::new("users")
            .with_field(Field::new("id", FieldType::String).identity())
            .with_field(Field::new("name", FieldType::String));
        let mut record = Record::with_id(Value::Text("abc".into()));
        record.set("id", Value::Text("abc".into()));
        record.set("name", Value::Text("ada".into()));
        let doc = set_document(&schema, &record);
        assert!(!doc.contains_key("_id"));
        assert_eq!(doc.get_str("name").unwrap(), "ada");
    }
}
