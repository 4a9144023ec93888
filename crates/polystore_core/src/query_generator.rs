use crate::filter::Filter;
use crate::value::Value;

/// A rendered native statement plus its positional parameter list, produced
/// by a driver's `QueryGenerator` from a logical `Filter`.
///
/// This is intentionally opaque to `polystore_core` — dialect text fragments
/// are out of scope for the core fabric (spec.md §1); drivers own the
/// `text` grammar (SQL, a Mongo BSON pipeline serialized to a debug string,
/// a DynamoDB KeyConditionExpression, ...).
#[derive(Debug, Clone)]
pub struct GeneratedQuery {
    pub text: String,
    pub params: Vec<Value>,
}

/// Translates a logical `Filter` AST into a driver-specific statement.
/// Implemented once per driver crate (the "per-driver SQL/JSON text
/// fragments" spec.md §1 calls out as out of scope for the core fabric,
/// but the trait boundary itself is core).
pub trait QueryGenerator: Send + Sync {
    fn generate_select(&self, collection: &str, filter: &Filter) -> GeneratedQuery;
}
