//! `CachingBackend`: a process-local memoizing wrapper over `Backend::retrieve`
//! for scalar ids. See spec.md §4.9; the invalidate-on-mutation Open Question
//! is resolved here (see SPEC_FULL.md §8) — mutating calls evict affected ids
//! instead of passing through unchanged.

use crate::backend::Backend;
use crate::error::DbResult;
use crate::filter::Filter;
use crate::indexer::Indexer;
use crate::record::{Record, RecordSet};
use crate::schema::Collection;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Wraps an inner `Backend`, memoizing `retrieve` calls keyed by
/// `(collection, scalar id)`. Only scalar (single-component) ids are
/// cacheable; composite-key lookups always pass through.
pub struct CachingBackend {
    inner: Arc<dyn Backend>,
    cache: RwLock<HashMap<(String, String), Record>>,
}

impl CachingBackend {
    pub fn new(inner: Arc<dyn Backend>) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn cache_key(collection: &str, id: &[Value]) -> Option<(String, String)> {
        match id {
            [single] => Some((collection.to_string(), single.as_key_component())),
            _ => None,
        }
    }

    /// Drop every cached entry. Exposed for callers that want an explicit
    /// full reset in addition to the automatic per-id invalidation below.
    pub fn reset_cache(&self) {
        self.cache.write().expect("cache lock poisoned").clear();
    }

    fn invalidate(&self, collection: &str, ids: &[Vec<Value>]) {
        let mut cache = self.cache.write().expect("cache lock poisoned");
        for id in ids {
            if let Some(key) = Self::cache_key(collection, id) {
                cache.remove(&key);
            }
        }
    }
}

impl Backend for CachingBackend {
    fn initialize(&self) -> DbResult<()> {
        self.inner.initialize()
    }

    fn ping(&self, timeout: std::time::Duration) -> DbResult<()> {
        self.inner.ping(timeout)
    }

    fn register_collection(&self, definition: Collection) -> DbResult<()> {
        self.inner.register_collection(definition)
    }

    fn get_collection(&self, name: &str) -> DbResult<Collection> {
        self.inner.get_collection(name)
    }

    fn list_collections(&self) -> Vec<String> {
        self.inner.list_collections()
    }

    fn create_collection(&self, definition: Collection) -> DbResult<()> {
        self.inner.create_collection(definition)
    }

    fn delete_collection(&self, name: &str) -> DbResult<()> {
        self.cache
            .write()
            .expect("cache lock poisoned")
            .retain(|(collection, _), _| collection != name);
        self.inner.delete_collection(name)
    }

    fn insert(&self, collection: &str, records: Vec<Record>) -> DbResult<RecordSet> {
        let ids: Vec<Vec<Value>> = records.iter().map(|r| r.id.clone()).collect();
        let result = self.inner.insert(collection, records)?;
        self.invalidate(collection, &ids);
        Ok(result)
    }

    fn update(
        &self,
        collection: &str,
        records: Vec<Record>,
        target_expr: Option<Filter>,
    ) -> DbResult<RecordSet> {
        let ids: Vec<Vec<Value>> = records.iter().map(|r| r.id.clone()).collect();
        let result = self.inner.update(collection, records, target_expr)?;
        self.invalidate(collection, &ids);
        // A targetExpr-driven update may touch rows whose ids we never saw;
        // rather than guess, drop the whole collection's cache in that case.
        if ids.iter().all(|id| id.is_empty()) {
            self.cache
                .write()
                .expect("cache lock poisoned")
                .retain(|(c, _), _| c != collection);
        }
        Ok(result)
    }

    fn delete(&self, collection: &str, ids: Vec<Vec<Value>>) -> DbResult<u64> {
        let result = self.inner.delete(collection, ids.clone())?;
        self.invalidate(collection, &ids);
        Ok(result)
    }

    fn retrieve(&self, collection: &str, id: &[Value], fields: &[String]) -> DbResult<Record> {
        let key = Self::cache_key(collection, id);

        if fields.is_empty() {
            if let Some(key) = &key {
                if let Some(cached) = self.cache.read().expect("cache lock poisoned").get(key) {
                    return Ok(cached.clone());
                }
            }
        }

        let record = self.inner.retrieve(collection, id, fields)?;

        if fields.is_empty() {
            if let Some(key) = key {
                self.cache
                    .write()
                    .expect("cache lock poisoned")
                    .insert(key, record.clone());
            }
        }

        Ok(record)
    }

    fn exists(&self, collection: &str, id: &[Value]) -> DbResult<bool> {
        self.inner.exists(collection, id)
    }

    fn with_search(&self, collection: &str) -> Option<Arc<dyn Indexer>> {
        self.inner.with_search(collection)
    }

    fn with_aggregator(&self, collection: &str) -> Option<Arc<dyn crate::aggregator::Aggregator>> {
        self.inner.with_aggregator(collection)
    }

    fn flush(&self) -> DbResult<()> {
        self.inner.flush()
    }

    fn estimate_count(&self, collection: &str) -> DbResult<u64> {
        self.inner.estimate_count(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        calls: AtomicUsize,
        value: Value,
    }

    impl Backend for CountingBackend {
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
            Ok(Collection::new("x"))
        }
        fn list_collections(&self) -> Vec<String> {
            vec![]
        }
        fn create_collection(&self, _definition: Collection) -> DbResult<()> {
            Ok(())
        }
        fn delete_collection(&self, _name: &str) -> DbResult<()> {
            Ok(())
        }
        fn insert(&self, _collection: &str, records: Vec<Record>) -> DbResult<RecordSet> {
            Ok(RecordSet::from_records(records))
        }
        fn update(
            &self,
            _collection: &str,
            records: Vec<Record>,
            _target_expr: Option<Filter>,
        ) -> DbResult<RecordSet> {
            Ok(RecordSet::from_records(records))
        }
        fn delete(&self, _collection: &str, ids: Vec<Vec<Value>>) -> DbResult<u64> {
            Ok(ids.len() as u64)
        }
        fn retrieve(&self, _collection: &str, id: &[Value], _fields: &[String]) -> DbResult<Record> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut record = Record::with_id(id[0].clone());
            record.set("v", self.value.clone());
            Ok(record)
        }
        fn exists(&self, _collection: &str, _id: &[Value]) -> DbResult<bool> {
            Ok(true)
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

    #[test]
    fn repeated_retrieve_hits_cache_on_second_call() {
        let inner = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
            value: Value::Int(1),
        });
        let caching = CachingBackend::new(inner.clone());
        let id = [Value::Text("7".into())];
        caching.retrieve("users", &id, &[]).unwrap();
        caching.retrieve("users", &id, &[]).unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delete_invalidates_cached_entry() {
        let inner = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
            value: Value::Int(1),
        });
        let caching = CachingBackend::new(inner.clone());
        let id = vec![Value::Text("7".into())];
        caching.retrieve("users", &id, &[]).unwrap();
        caching.delete("users", vec![id.clone()]).unwrap();
        caching.retrieve("users", &id, &[]).unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
