//! Contracts and composition fabric for the polystore data-access layer:
//! the `Backend`/`Indexer`/`Aggregator` traits, the typed schema model, the
//! `Filter`+`QueryGenerator` collaborator pair, `DefaultQueryImplementation`,
//! the relationship resolver, and the composition wrappers
//! (`CachingBackend`, `MultiIndex`, `Supervisor`) built on top of them.

pub mod aggregator;
pub mod backend;
pub mod caching_backend;
pub mod composition;
pub mod connection_string;
pub mod error;
pub mod filter;
pub mod indexer;
pub mod query_generator;
pub mod query_impl;
pub mod record;
pub mod refresh_policy;
pub mod relationships;
pub mod schema;
pub mod supervisor;
pub mod value;

#[cfg(feature = "migrate")]
pub mod migrate;

pub use aggregator::{Aggregate, AggregateFunction, Aggregator};
pub use backend::{Backend, EXACT_COUNT_CAP};
pub use caching_backend::CachingBackend;
pub use composition::{CompositionRunId, DispatchStrategy, MultiIndex};
pub use connection_string::ConnectionString;
pub use error::{DbError, DbResult, ErrorDetail};
pub use filter::{Criterion, Filter, Operator, SortDirection, SortField};
pub use indexer::{query_collect, IndexPage, IndexResult, Indexer, ResultFn};
pub use query_generator::{GeneratedQuery, QueryGenerator};
pub use query_impl::run_query;
pub use record::{Record, RecordSet};
pub use refresh_policy::RefreshPolicy;
pub use relationships::{defer_array_field, defer_field, resolve_deferred_records, DeferredRecord};
pub use schema::{
    apply_definition, Collection, Field, FieldType, IdentityFieldType, Relationship, SchemaDelta,
    SchemaDeltaKind,
};
pub use supervisor::{Availability, Supervisor};
pub use value::Value;
