//! `MultiIndex`: composes several `Indexer`s behind one `Indexer` façade,
//! dispatching each operation across children per a configurable strategy.
//! See spec.md §4.6.

use crate::backend::Backend;
use crate::error::{DbError, DbResult};
use crate::filter::Filter;
use crate::indexer::{IndexResult, Indexer, ResultFn};
use crate::record::Record;
use crate::schema::Collection;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Correlates the log lines of one `resolve_deferred_records` call (which may
/// issue several bulk-resolve queries, one per target collection) so they can
/// be grepped together, the way the teacher tags a `QueryHandle` per
/// in-flight query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionRunId(uuid::Uuid);

impl CompositionRunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for CompositionRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CompositionRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a `MultiIndex` operation is dispatched across its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStrategy {
    /// Run every child concurrently; take the first non-empty/non-error
    /// result, in whichever order threads finish.
    ParallelFirstNonEmpty,
    /// Try children one at a time, in order, stopping at the first
    /// non-empty/non-error result.
    SequentialFirstNonEmpty,
    /// Always use the first child, ignore the rest.
    First,
    /// Apply to every child except the first (the first indexer is the
    /// authoritative primary, already handled by the owning `Backend`).
    AllExceptFirst,
    /// Pick one child at random (seeded from a caller-supplied index, since
    /// this crate avoids nondeterministic system RNG in library code).
    Random,
}

/// An `Indexer` composed from `children`, dispatching writes/deletes to
/// `AllExceptFirst` and retrievals to `ParallelFirstNonEmpty` by default, per
/// spec.md §4.6.
pub struct MultiIndex {
    children: Vec<Arc<dyn Indexer>>,
    write_strategy: DispatchStrategy,
    read_strategy: DispatchStrategy,
    /// Advances on every `Random`-dispatched call, giving a deterministic
    /// round-robin instead of reaching for a system RNG.
    random_cursor: AtomicUsize,
}

impl MultiIndex {
    pub fn new(children: Vec<Arc<dyn Indexer>>) -> Self {
        Self {
            children,
            write_strategy: DispatchStrategy::AllExceptFirst,
            read_strategy: DispatchStrategy::ParallelFirstNonEmpty,
            random_cursor: AtomicUsize::new(0),
        }
    }

    pub fn with_write_strategy(mut self, strategy: DispatchStrategy) -> Self {
        self.write_strategy = strategy;
        self
    }

    pub fn with_read_strategy(mut self, strategy: DispatchStrategy) -> Self {
        self.read_strategy = strategy;
        self
    }

    fn targets_for(&self, strategy: DispatchStrategy) -> Vec<Arc<dyn Indexer>> {
        match strategy {
            DispatchStrategy::AllExceptFirst => self.children.iter().skip(1).cloned().collect(),
            DispatchStrategy::First => self.children.first().cloned().into_iter().collect(),
            DispatchStrategy::Random => {
                if self.children.is_empty() {
                    return Vec::new();
                }
                let i = self.random_cursor.fetch_add(1, Ordering::Relaxed) % self.children.len();
                vec![self.children[i].clone()]
            }
            DispatchStrategy::ParallelFirstNonEmpty | DispatchStrategy::SequentialFirstNonEmpty => {
                self.children.clone()
            }
        }
    }
}

impl Indexer for MultiIndex {
    fn index_initialize(&self, parent: Arc<dyn Backend>) -> DbResult<()> {
        for child in &self.children {
            child.index_initialize(parent.clone())?;
        }
        Ok(())
    }

    fn index_exists(&self, collection: &str, id: &str) -> DbResult<bool> {
        for child in self.targets_for(self.read_strategy) {
            if child.index_exists(collection, id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn index_retrieve(&self, collection: &str, id: &str) -> DbResult<Record> {
        match self.read_strategy {
            DispatchStrategy::ParallelFirstNonEmpty => {
                let results: Mutex<Vec<DbResult<Record>>> = Mutex::new(Vec::new());
                thread::scope(|scope| {
                    for child in &self.children {
                        let results = &results;
                        scope.spawn(move || {
                            let outcome = child.index_retrieve(collection, id);
                            results.lock().expect("mutex poisoned").push(outcome);
                        });
                    }
                });
                let outcomes = results.into_inner().expect("mutex poisoned");
                first_success(outcomes)
            }
            _ => {
                let mut last_err = None;
                for child in self.targets_for(self.read_strategy) {
                    match child.index_retrieve(collection, id) {
                        Ok(record) => return Ok(record),
                        Err(err) => last_err = Some(err),
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    DbError::RecordNotFound {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    }
                }))
            }
        }
    }

    fn index_remove(&self, collection: &str, id: &str) -> DbResult<()> {
        for child in self.targets_for(self.write_strategy) {
            child.index_remove(collection, id)?;
        }
        Ok(())
    }

    fn index(&self, collection: &Collection, records: &[Record]) -> DbResult<()> {
        for child in self.targets_for(self.write_strategy) {
            child.index(collection, records)?;
        }
        Ok(())
    }

    fn query_func(
        &self,
        collection: &Collection,
        filter: &Filter,
        result_fn: &mut ResultFn<'_>,
    ) -> DbResult<()> {
        for child in self.targets_for(self.read_strategy) {
            let mut emitted = false;
            child.query_func(collection, filter, &mut |hit| {
                emitted = true;
                result_fn(hit)
            })?;
            if emitted && matches!(
                self.read_strategy,
                DispatchStrategy::SequentialFirstNonEmpty | DispatchStrategy::ParallelFirstNonEmpty
            ) {
                return Ok(());
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
        for child in self.targets_for(self.read_strategy) {
            let values = child.list_values(collection, fields, filter)?;
            if !values.is_empty() {
                return Ok(values);
            }
        }
        Ok(BTreeMap::new())
    }

    fn delete_query(&self, collection: &Collection, filter: &Filter) -> DbResult<u64> {
        let mut total = 0;
        for child in self.targets_for(self.write_strategy) {
            total += child.delete_query(collection, filter)?;
        }
        Ok(total)
    }

    fn flush_index(&self) -> DbResult<()> {
        for child in &self.children {
            child.flush_index()?;
        }
        Ok(())
    }

    fn get_backend(&self) -> Arc<dyn Backend> {
        self.children
            .first()
            .expect("MultiIndex requires at least one child")
            .get_backend()
    }
}

fn first_success(outcomes: Vec<DbResult<Record>>) -> DbResult<Record> {
    let mut last_err = None;
    for outcome in outcomes {
        match outcome {
            Ok(record) => return Ok(record),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| DbError::NotImplemented("MultiIndex has no children".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::IndexPage;

    struct FixedIndexer {
        id: &'static str,
        hit: Option<Record>,
    }

    impl Indexer for FixedIndexer {
        fn index_initialize(&self, _parent: Arc<dyn Backend>) -> DbResult<()> {
            Ok(())
        }
        fn index_exists(&self, _collection: &str, _id: &str) -> DbResult<bool> {
            Ok(self.hit.is_some())
        }
        fn index_retrieve(&self, _collection: &str, _id: &str) -> DbResult<Record> {
            self.hit.clone().ok_or(DbError::RecordNotFound {
                collection: "x".into(),
                id: self.id.to_string(),
            })
        }
        fn index_remove(&self, _collection: &str, _id: &str) -> DbResult<()> {
            Ok(())
        }
        fn query_func(
            &self,
            _collection: &Collection,
            _filter: &Filter,
            result_fn: &mut ResultFn<'_>,
        ) -> DbResult<()> {
            if let Some(record) = &self.hit {
                result_fn(IndexResult {
                    record: Ok(record.clone()),
                    page: IndexPage::default(),
                })?;
            }
            Ok(())
        }
        fn list_values(
            &self,
            _c: &Collection,
            _f: &[String],
            _filter: &Filter,
        ) -> DbResult<BTreeMap<String, Vec<Value>>> {
            Ok(Default::default())
        }
        fn delete_query(&self, _c: &Collection, _filter: &Filter) -> DbResult<u64> {
            Ok(1)
        }
        fn flush_index(&self) -> DbResult<()> {
            Ok(())
        }
        fn get_backend(&self) -> Arc<dyn Backend> {
            panic!("unused in this test")
        }
    }

    #[test]
    fn parallel_first_non_empty_returns_whichever_child_has_it() {
        let empty: Arc<dyn Indexer> = Arc::new(FixedIndexer { id: "a", hit: None });
        let found: Arc<dyn Indexer> = Arc::new(FixedIndexer {
            id: "b",
            hit: Some(Record::with_id(Value::Text("7".into()))),
        });
        let multi = MultiIndex::new(vec![empty, found]);
        let record = multi.index_retrieve("x", "7").unwrap();
        assert_eq!(record.scalar_id(), Some(&Value::Text("7".into())));
    }

    #[test]
    fn all_except_first_skips_the_primary_on_delete_query() {
        let primary: Arc<dyn Indexer> = Arc::new(FixedIndexer { id: "p", hit: None });
        let secondary: Arc<dyn Indexer> = Arc::new(FixedIndexer { id: "s", hit: None });
        let multi = MultiIndex::new(vec![primary, secondary]);
        let collection = Collection::new("x");
        let deleted = multi.delete_query(&collection, &Filter::new()).unwrap();
        assert_eq!(deleted, 1, "only the non-primary child should run");
    }

    #[test]
    fn first_strategy_always_uses_child_zero() {
        let only: Arc<dyn Indexer> = Arc::new(FixedIndexer {
            id: "only",
            hit: Some(Record::with_id(Value::Text("1".into()))),
        });
        let multi = MultiIndex::new(vec![only]).with_read_strategy(DispatchStrategy::First);
        assert!(multi.index_exists("x", "1").unwrap());
    }
}
