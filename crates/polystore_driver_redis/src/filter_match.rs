//! Client-side `Filter` evaluation over decoded hashes. Redis has no
//! secondary index of its own, so `query_func`/`list_values`/`delete_query`
//! all SCAN the collection's keyspace and filter/sort here instead of
//! pushing the predicate down to the store — the same fallback shape
//! `polystore_testkit::InMemoryBackend` uses for its own linear scan.

use polystore_core::{Criterion, Filter, Operator, Record, SortDirection, Value};
use std::cmp::Ordering;

pub fn matches_filter(record: &Record, filter: &Filter) -> bool {
    filter.criteria.iter().all(|criterion| matches_criterion(record, criterion))
}

fn matches_criterion(record: &Record, criterion: &Criterion) -> bool {
    let field_value = if criterion.field == "id" {
        record.scalar_id().cloned()
    } else {
        record.get(&criterion.field).cloned()
    };

    let outcome = match criterion.operator {
        Operator::Null => field_value.as_ref().map(Value::is_null).unwrap_or(true),
        Operator::NotNull => field_value.as_ref().map(|v| !v.is_null()).unwrap_or(false),
        Operator::Is => field_value.as_ref().map(|v| criterion.values.contains(v)).unwrap_or(false),
        Operator::Not => field_value.as_ref().map(|v| !criterion.values.contains(v)).unwrap_or(true),
        Operator::Lt => compare(&field_value, criterion.values.first(), Ordering::Less),
        Operator::Lte => {
            compare(&field_value, criterion.values.first(), Ordering::Less)
                || compare(&field_value, criterion.values.first(), Ordering::Equal)
        }
        Operator::Gt => compare(&field_value, criterion.values.first(), Ordering::Greater),
        Operator::Gte => {
            compare(&field_value, criterion.values.first(), Ordering::Greater)
                || compare(&field_value, criterion.values.first(), Ordering::Equal)
        }
        Operator::Prefix => match (&field_value, criterion.values.first()) {
            (Some(Value::Text(s)), Some(Value::Text(prefix))) => s.starts_with(prefix.as_str()),
            _ => false,
        },
        Operator::Suffix => match (&field_value, criterion.values.first()) {
            (Some(Value::Text(s)), Some(Value::Text(suffix))) => s.ends_with(suffix.as_str()),
            _ => false,
        },
        Operator::Contains | Operator::Fulltext => match (&field_value, criterion.values.first()) {
            (Some(Value::Text(s)), Some(Value::Text(needle))) => s.to_lowercase().contains(&needle.to_lowercase()),
            _ => false,
        },
        Operator::Range => match (&field_value, criterion.values.as_slice()) {
            (Some(v), [lo, hi, ..]) => v >= lo && v <= hi,
            _ => false,
        },
    };

    if criterion.not {
        !outcome
    } else {
        outcome
    }
}

fn compare(value: &Option<Value>, bound: Option<&Value>, expected: Ordering) -> bool {
    match (value, bound) {
        (Some(v), Some(b)) => v.cmp(b) == expected,
        _ => false,
    }
}

pub fn sort_records(records: &mut [Record], filter: &Filter) {
    if filter.sort.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for sort_field in &filter.sort {
            let av = a.get(&sort_field.field);
            let bv = b.get(&sort_field.field);
            let ordering = av.cmp(&bv);
            let ordering = match sort_field.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::Criterion;

    fn record_with_name(name: &str) -> Record {
        let mut record = Record::with_id(Value::Text(name.to_string()));
        record.set("name", Value::Text(name.to_string()));
        record
    }

    #[test]
    fn prefix_criterion_matches_start_of_string() {
        let filter = Filter::new().with_criterion(Criterion::prefix("name", "a"));
        assert!(matches_filter(&record_with_name("ada"), &filter));
        assert!(!matches_filter(&record_with_name("bob"), &filter));
    }

    #[test]
    fn sort_descending_reverses_order() {
        let mut records = vec![record_with_name("ada"), record_with_name("bob")];
        let filter = Filter {
            sort: vec![polystore_core::SortField { field: "name".to_string(), direction: SortDirection::Descending }],
            ..Filter::new()
        };
        sort_records(&mut records, &filter);
        assert_eq!(records[0].get("name"), Some(&Value::Text("bob".to_string())));
    }
}
