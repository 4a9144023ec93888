//! `DefaultQueryImplementation`: bridges an `Indexer`'s streamed hits into a
//! `RecordSet`, retrieving primary records on demand. See spec.md §4.3.

use crate::backend::Backend;
use crate::error::{DbError, DbResult};
use crate::filter::{Filter, OPTION_FORCE_INDEX_RECORD};
use crate::indexer::{IndexPage, Indexer};
use crate::record::{Record, RecordSet};
use crate::schema::Collection;
use crate::value::Value;

/// Run `indexer.query_func` and assemble a `RecordSet`, re-hydrating full
/// records from `parent` unless the filter asks for index-only results.
///
/// `parent` is `None` when the indexer isn't bound to a primary backend
/// (e.g. a standalone full-text indexer queried before composition) — in
/// that case every hit is emitted as the bare index record, matching
/// spec.md §4.3 step 2b's "parent backend is nil" branch.
pub fn run_query(
    indexer: &dyn Indexer,
    parent: Option<&dyn Backend>,
    collection: &Collection,
    filter: &Filter,
) -> DbResult<RecordSet> {
    let mut records: Vec<Record> = Vec::new();
    let mut last_page = IndexPage::default();
    let force_index_record = filter.option_flag(OPTION_FORCE_INDEX_RECORD);
    let id_only = filter.id_only();

    indexer.query_func(collection, filter, &mut |hit| {
        last_page = hit.page;

        let mut record = match hit.record {
            Ok(r) => r,
            Err(err) => {
                records.push(Record::error(err.to_string()));
                return Ok(());
            }
        };

        // Step 2a: reassemble a compound id from the index-plane id string.
        if collection.index_compound_fields.len() > 1 {
            if let Err(err) = reassemble_compound_id(collection, &mut record) {
                records.push(Record::error(err.to_string()));
                return Ok(());
            }
        }

        // Step 2b/2c: short-circuit to the index record, or re-hydrate.
        if force_index_record || id_only || parent.is_none() {
            records.push(record);
            return Ok(());
        }

        let backend = parent.expect("checked above");
        match backend.retrieve(&collection.name, &record.id, &filter.fields) {
            Ok(full) => records.push(full),
            Err(err) => records.push(Record::error(err.to_string())),
        }
        Ok(())
    })?;

    Ok(assemble_record_set(records, last_page, filter))
}

/// Re-assign `record.id` to the ordered vector of compound-key components,
/// and set each non-first component onto the record's fields. When the
/// joined id splits into fewer parts than declared, the missing tail
/// components are read from the index record's own fields before failing
/// with a schema error if the total still doesn't match.
fn reassemble_compound_id(collection: &Collection, record: &mut Record) -> DbResult<()> {
    let n = collection.index_compound_fields.len();
    let encoded = record
        .scalar_id()
        .map(|v| v.as_key_component())
        .unwrap_or_default();

    let mut parts: Vec<String> = collection.split_compound_id(&encoded);

    if parts.len() < n {
        for field_name in collection.index_compound_fields.iter().skip(parts.len()) {
            match record.get(field_name) {
                Some(v) => parts.push(v.as_key_component()),
                None => break,
            }
        }
    }

    if parts.len() != n {
        return Err(DbError::SchemaMismatch(format!(
            "compound id {:?} for collection {:?} split into {} parts, expected {}",
            encoded,
            collection.name,
            parts.len(),
            n
        )));
    }

    record.id = parts.iter().map(|p| Value::Text(p.clone())).collect();
    for (field_name, part) in collection
        .index_compound_fields
        .iter()
        .zip(parts.iter())
        .skip(1)
    {
        record.set(field_name.clone(), Value::Text(part.clone()));
    }

    Ok(())
}

fn assemble_record_set(records: Vec<Record>, page: IndexPage, filter: &Filter) -> RecordSet {
    let result_count = page.total_results.unwrap_or(records.len() as u64);
    let limit = filter.limit.unwrap_or(page.limit).max(1);
    let total_pages = page
        .total_pages
        .unwrap_or_else(|| result_count.div_ceil(limit).max(1));
    let offset = filter.effective_offset().max(page.offset);
    let current_page = (offset + 1).div_ceil(limit);

    RecordSet {
        records,
        result_count: Some(result_count),
        known_size: page.total_results.is_some(),
        total_pages,
        page: current_page.max(1),
        records_per_page: limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbResult;
    use crate::indexer::{IndexResult, ResultFn};
    use std::sync::Arc;

    struct StubIndexer {
        rows: Vec<(String, Vec<(&'static str, Value)>)>,
    }

    impl Indexer for StubIndexer {
        fn index_initialize(&self, _parent: Arc<dyn Backend>) -> DbResult<()> {
            Ok(())
        }
        fn index_exists(&self, _c: &str, _id: &str) -> DbResult<bool> {
            Ok(false)
        }
        fn index_retrieve(&self, _c: &str, _id: &str) -> DbResult<Record> {
            Err(DbError::NotImplemented("unused".into()))
        }
        fn index_remove(&self, _c: &str, _id: &str) -> DbResult<()> {
            Ok(())
        }
        fn query_func(
            &self,
            _collection: &Collection,
            _filter: &Filter,
            result_fn: &mut ResultFn<'_>,
        ) -> DbResult<()> {
            for (id, fields) in &self.rows {
                let mut record = Record::with_id(Value::Text(id.clone()));
                for (k, v) in fields {
                    record.set(*k, v.clone());
                }
                result_fn(IndexResult {
                    record: Ok(record),
                    page: IndexPage {
                        page: 1,
                        total_pages: Some(1),
                        limit: 10,
                        offset: 0,
                        total_results: Some(self.rows.len() as u64),
                    },
                })?;
            }
            Ok(())
        }
        fn list_values(
            &self,
            _c: &Collection,
            _f: &[String],
            _filter: &Filter,
        ) -> DbResult<std::collections::BTreeMap<String, Vec<Value>>> {
            Ok(Default::default())
        }
        fn delete_query(&self, _c: &Collection, _filter: &Filter) -> DbResult<u64> {
            Ok(0)
        }
        fn flush_index(&self) -> DbResult<()> {
            Ok(())
        }
        fn get_backend(&self) -> Arc<dyn Backend> {
            panic!("unused in this stub")
        }
    }

    #[test]
    fn compound_id_reassembly_emits_vector_id_and_sets_field() {
        let mut collection = Collection::new("inventory");
        collection.index_compound_fields = vec!["tenant".into(), "sku".into()];
        collection.index_compound_field_joiner = ":".into();

        let indexer = StubIndexer {
            rows: vec![("acme:42".to_string(), vec![])],
        };

        let filter = Filter::new().force_index_record();
        let result = run_query(&indexer, None, &collection, &filter).unwrap();

        assert_eq!(result.records.len(), 1);
        let record = &result.records[0];
        assert_eq!(record.id, vec![Value::Text("acme".into()), Value::Text("42".into())]);
        assert_eq!(record.get("sku"), Some(&Value::Text("42".into())));
    }

    #[test]
    fn force_index_record_skips_retrieval_even_with_parent() {
        let collection = Collection::new("users");
        let indexer = StubIndexer {
            rows: vec![("1".to_string(), vec![("name", Value::Text("a".into()))])],
        };
        let filter = Filter::new().force_index_record();
        let result = run_query(&indexer, None, &collection, &filter).unwrap();
        assert_eq!(result.records[0].get("name"), Some(&Value::Text("a".into())));
    }

    #[test]
    fn pagination_metadata_derives_total_pages_when_unknown() {
        let collection = Collection::new("users");
        let indexer = StubIndexer {
            rows: (0..3)
                .map(|i| (i.to_string(), vec![]))
                .collect(),
        };
        let filter = Filter::new().force_index_record().with_limit(2);
        let result = run_query(&indexer, None, &collection, &filter).unwrap();
        assert_eq!(result.result_count, Some(3));
    }
}
