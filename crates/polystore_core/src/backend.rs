use crate::aggregator::Aggregator;
use crate::error::{DbError, DbResult};
use crate::indexer::Indexer;
use crate::record::{Record, RecordSet};
use crate::schema::Collection;
use crate::value::Value;
use std::sync::Arc;
use std::time::Duration;

/// The primary CRUD + schema plane over one storage technology.
///
/// Every method is `&self` and must be safe to call concurrently from many
/// threads (spec.md §5): drivers hold their connection pool internally and
/// protect the collection registry with a reader-preferred lock.
pub trait Backend: Send + Sync {
    /// Open the driver connection, ping it, and (when
    /// `ConnectionString::autoregister()` is set) auto-discover schemas from
    /// the live store, overlaying caller-registered metadata via
    /// `schema::apply_definition`.
    fn initialize(&self) -> DbResult<()>;

    fn ping(&self, timeout: Duration) -> DbResult<()>;

    /// Idempotent: registering the same definition twice leaves the
    /// registry in the same state (spec.md §8 "Idempotent register").
    fn register_collection(&self, definition: Collection) -> DbResult<()>;

    fn get_collection(&self, name: &str) -> DbResult<Collection>;

    fn list_collections(&self) -> Vec<String>;

    /// Fails without side effects if the collection already exists
    /// (spec.md §8 "Create-Collection atomicity").
    fn create_collection(&self, definition: Collection) -> DbResult<()>;

    fn delete_collection(&self, name: &str) -> DbResult<()>;

    /// Insert is atomic per call: all records commit together or none do.
    /// On commit success, if an indexer is attached, the insert is mirrored
    /// into the index plane *after* the primary commit (spec.md §9's
    /// resolved ordering); index failures are logged and returned as a
    /// non-fatal warning via `DbError::Driver`, never by rolling back the
    /// primary write.
    fn insert(&self, collection: &str, records: Vec<Record>) -> DbResult<RecordSet>;

    /// Updates by identity when `record.id` is set; otherwise every record
    /// in the set is applied to every row matched by `target_expr`.
    fn update(
        &self,
        collection: &str,
        records: Vec<Record>,
        target_expr: Option<crate::filter::Filter>,
    ) -> DbResult<RecordSet>;

    /// Index removal fires unconditionally as defense against stale index
    /// entries, independent of whether the primary delete itself succeeds
    /// for every id.
    fn delete(&self, collection: &str, ids: Vec<Vec<Value>>) -> DbResult<u64>;

    fn retrieve(&self, collection: &str, id: &[Value], fields: &[String]) -> DbResult<Record>;

    fn exists(&self, collection: &str, id: &[Value]) -> DbResult<bool>;

    /// Returns the bound indexer, or `None` when this backend/collection
    /// doesn't support secondary search.
    fn with_search(&self, collection: &str) -> Option<Arc<dyn Indexer>>;

    fn with_aggregator(&self, collection: &str) -> Option<Arc<dyn Aggregator>>;

    fn flush(&self) -> DbResult<()>;

    /// Best-effort approximate row count used by `register_collection` when
    /// `ConnectionString::autocount()` is set. Default falls back to an
    /// exact count capped at `EXACT_COUNT_CAP` rows.
    fn estimate_count(&self, collection: &str) -> DbResult<u64> {
        let _ = collection;
        Err(DbError::NotImplemented(
            "estimate_count not overridden by this backend".to_string(),
        ))
    }
}

/// Exact-count fallback cap used by the default `estimate_count` contract
/// (spec.md §4.1: "falling back to an exact count bounded by a cap, e.g.
/// 10,000 rows").
pub const EXACT_COUNT_CAP: u64 = 10_000;
