//! Shared SQL plumbing for the sqlite/postgres/mysql driver crates: a
//! dialect trait capturing the handful of ways real SQL engines disagree
//! (identifier quoting, placeholder syntax, RETURNING support), a
//! `Filter`-to-`SELECT` translator built on it, and pagination helpers.
//!
//! Each driver crate owns its connection handling and row decoding; this
//! crate only owns the text of the statements.

mod dialect;
mod generator;
mod pagination;

pub use dialect::{AnsiDialect, PlaceholderStyle, SqlDialect};
pub use generator::SqlQueryGenerator;
pub use pagination::{count_query, limit_offset_clause};
