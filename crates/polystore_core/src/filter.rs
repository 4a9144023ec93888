use crate::value::Value;
use std::collections::BTreeMap;

/// Recognized comparison operators for a single filter criterion, per
/// spec.md §6's wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Is,
    Not,
    Lt,
    Lte,
    Gt,
    Gte,
    Prefix,
    Suffix,
    Contains,
    Fulltext,
    Range,
    Null,
    NotNull,
}

#[derive(Debug, Clone)]
pub struct Criterion {
    pub field: String,
    pub operator: Operator,
    pub values: Vec<Value>,
    pub not: bool,
}

impl Criterion {
    pub fn new(field: impl Into<String>, operator: Operator, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            values,
            not: false,
        }
    }

    pub fn is(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, Operator::Is, vec![value])
    }

    pub fn prefix(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, Operator::Prefix, vec![Value::Text(value.into())])
    }

    pub fn negated(mut self) -> Self {
        self.not = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

/// Well-known filter option keys.
pub const OPTION_FORCE_INDEX_RECORD: &str = "ForceIndexRecord";

/// Logical filter AST — the wire format translated by a driver's
/// `QueryGenerator` into a native statement + parameter list.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub criteria: Vec<Criterion>,
    pub sort: Vec<SortField>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Field projection; empty means "all fields".
    pub fields: Vec<String>,
    pub options: BTreeMap<String, String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn force_index_record(mut self) -> Self {
        self.options
            .insert(OPTION_FORCE_INDEX_RECORD.to_string(), "true".to_string());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(|s| s.as_str())
    }

    pub fn option_flag(&self, key: &str) -> bool {
        matches!(self.option(key), Some("true") | Some("1"))
    }

    /// True when the caller asked for an index-only, non-rehydrated
    /// response: only the identity field is projected.
    pub fn id_only(&self) -> bool {
        self.fields.len() == 1 && self.fields[0] == "id"
    }

    pub fn effective_limit(&self) -> u64 {
        self.limit.unwrap_or(u64::MAX)
    }

    pub fn effective_offset(&self) -> u64 {
        self.offset.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_index_record_option_round_trips() {
        let filter = Filter::new().force_index_record();
        assert!(filter.option_flag(OPTION_FORCE_INDEX_RECORD));
    }

    #[test]
    fn id_only_detects_single_id_projection() {
        let filter = Filter::new().with_fields(vec!["id".to_string()]);
        assert!(filter.id_only());
        let filter = Filter::new().with_fields(vec!["id".to_string(), "name".to_string()]);
        assert!(!filter.id_only());
    }
}
