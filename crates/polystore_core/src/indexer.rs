use crate::backend::Backend;
use crate::error::DbResult;
use crate::filter::Filter;
use crate::record::Record;
use crate::schema::Collection;
use std::sync::Arc;

/// Pagination metadata accompanying a page of index hits.
/// `total_results = None` means "unknown" — drivers that can't cheaply
/// count (DynamoDB's scan-based filters, Mongo without a count-stage)
/// leave this `None` and let `DefaultQueryImplementation` fall back to the
/// accumulated record count.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexPage {
    pub page: u64,
    pub total_pages: Option<u64>,
    pub limit: u64,
    pub offset: u64,
    pub total_results: Option<u64>,
}

/// One streamed index hit: the bare index-plane record, or an error if this
/// particular row couldn't be decoded/retrieved.
pub struct IndexResult {
    pub record: DbResult<Record>,
    pub page: IndexPage,
}

/// Callback invoked once per streamed result row (or once per errored row).
/// Returning `Err` aborts the stream at the next page boundary and
/// propagates to the caller of `QueryFunc`/`Query`.
pub type ResultFn<'a> = dyn FnMut(IndexResult) -> DbResult<()> + 'a;

/// Structurally independent secondary-access plane: queryable, paged,
/// write-through-optional. An `Indexer` never owns primary records, only
/// its own index entries — record re-hydration always goes back through
/// `GetBackend()`.
pub trait Indexer: Send + Sync {
    fn index_initialize(&self, parent: Arc<dyn Backend>) -> DbResult<()>;

    fn index_exists(&self, collection: &str, id: &str) -> DbResult<bool>;

    fn index_retrieve(&self, collection: &str, id: &str) -> DbResult<Record>;

    fn index_remove(&self, collection: &str, id: &str) -> DbResult<()>;

    /// Write path; a no-op for indexers colocated with the primary store
    /// (e.g. the SQL indexer, which reads the same table it writes to).
    fn index(&self, collection: &Collection, records: &[Record]) -> DbResult<()> {
        let _ = (collection, records);
        Ok(())
    }

    /// Stream results as a lazy, finite sequence. Paging is internal: the
    /// implementation transparently fetches subsequent pages until `limit`
    /// is met or the stream is exhausted, invoking `result_fn` exactly once
    /// per result row.
    fn query_func(
        &self,
        collection: &Collection,
        filter: &Filter,
        result_fn: &mut ResultFn<'_>,
    ) -> DbResult<()>;

    fn list_values(
        &self,
        collection: &Collection,
        fields: &[String],
        filter: &Filter,
    ) -> DbResult<std::collections::BTreeMap<String, Vec<crate::value::Value>>>;

    fn delete_query(&self, collection: &Collection, filter: &Filter) -> DbResult<u64>;

    fn flush_index(&self) -> DbResult<()>;

    fn get_backend(&self) -> Arc<dyn Backend>;
}

/// Convenience wrapper over `query_func`: collects every streamed row
/// (respecting `filter.limit`) into a `Vec`. Most callers that don't need
/// per-row callback control use this instead of `query_func` directly.
pub fn query_collect(
    indexer: &dyn Indexer,
    collection: &Collection,
    filter: &Filter,
) -> DbResult<Vec<IndexResult>> {
    let mut collected = Vec::new();
    let limit = filter.effective_limit();
    indexer.query_func(collection, filter, &mut |result| {
        collected.push(result);
        Ok(())
    })?;
    if (collected.len() as u64) > limit {
        collected.truncate(limit as usize);
    }
    Ok(collected)
}
