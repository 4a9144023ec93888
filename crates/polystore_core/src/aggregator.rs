//! Aggregation plane over a collection: scalar reducers plus grouped
//! aggregates, per spec.md §4.8.

use crate::error::DbResult;
use crate::filter::Filter;
use crate::record::{Record, RecordSet};
use crate::value::Value;

/// A single aggregate request inside a `group_by` call: apply `function` to
/// `field`, binding the result under `alias` in each group's record.
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub function: AggregateFunction,
    pub field: String,
    pub alias: String,
}

impl Aggregate {
    pub fn new(function: AggregateFunction, field: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            function,
            field: field.into(),
            alias: alias.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

/// Scalar reducers plus `GroupBy` over a single collection.
///
/// A driver either implements this natively (SQL `SUM`/`GROUP BY`, a Mongo
/// aggregation pipeline) or, when the store has no native aggregation
/// support, layers it atop `Indexer::query_func` by streaming every matching
/// record and reducing in memory.
pub trait Aggregator: Send + Sync {
    fn sum(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<f64>;
    fn count(&self, collection: &str, filter: &Filter) -> DbResult<u64>;
    fn min(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<Value>;
    fn max(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<Value>;
    fn avg(&self, collection: &str, field: &str, filter: &Filter) -> DbResult<f64>;

    /// Group matching records by `group_fields`, computing `aggregates` per
    /// group. Each resulting `Record`'s id is the concatenated group key
    /// (joined the same way a compound index id would be); its fields hold
    /// the group-by columns plus one field per aggregate alias.
    fn group_by(
        &self,
        collection: &str,
        group_fields: &[String],
        aggregates: &[Aggregate],
        filter: &Filter,
    ) -> DbResult<RecordSet>;
}

/// Shared reduction helper for `Aggregator` implementations that compute
/// `group_by` by streaming rows rather than pushing the grouping down to the
/// store (the in-memory testkit backend, Redis, DynamoDB's scan path).
pub fn reduce_groups(
    rows: impl IntoIterator<Item = Record>,
    group_fields: &[String],
    aggregates: &[Aggregate],
    joiner: &str,
) -> RecordSet {
    use std::collections::BTreeMap;

    struct GroupAccumulator {
        key_values: Vec<Value>,
        count: u64,
        sums: BTreeMap<String, f64>,
        mins: BTreeMap<String, Value>,
        maxes: BTreeMap<String, Value>,
    }

    let mut groups: BTreeMap<String, GroupAccumulator> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();

    for row in rows {
        let key_values: Vec<Value> = group_fields
            .iter()
            .map(|f| row.get(f).cloned().unwrap_or(Value::Null))
            .collect();
        let key = key_values
            .iter()
            .map(|v| v.as_key_component())
            .collect::<Vec<_>>()
            .join(joiner);

        let accumulator = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            GroupAccumulator {
                key_values: key_values.clone(),
                count: 0,
                sums: BTreeMap::new(),
                mins: BTreeMap::new(),
                maxes: BTreeMap::new(),
            }
        });
        accumulator.count += 1;

        for agg in aggregates {
            let value = row.get(&agg.field).cloned().unwrap_or(Value::Null);
            match agg.function {
                AggregateFunction::Sum | AggregateFunction::Avg => {
                    if let Some(n) = value.as_float() {
                        *accumulator.sums.entry(agg.alias.clone()).or_insert(0.0) += n;
                    }
                }
                AggregateFunction::Min => {
                    accumulator
                        .mins
                        .entry(agg.alias.clone())
                        .and_modify(|current| {
                            if value < *current {
                                *current = value.clone();
                            }
                        })
                        .or_insert_with(|| value.clone());
                }
                AggregateFunction::Max => {
                    accumulator
                        .maxes
                        .entry(agg.alias.clone())
                        .and_modify(|current| {
                            if value > *current {
                                *current = value.clone();
                            }
                        })
                        .or_insert_with(|| value.clone());
                }
                AggregateFunction::Count => {}
            }
        }
    }

    let records: Vec<Record> = order
        .into_iter()
        .map(|key| {
            let accumulator = groups.remove(&key).expect("just inserted");
            let mut record = Record::with_id(Value::Text(key));
            for (field, value) in group_fields.iter().zip(accumulator.key_values.iter()) {
                record.set(field.clone(), value.clone());
            }
            for agg in aggregates {
                let value = match agg.function {
                    AggregateFunction::Count => Value::Int(accumulator.count as i64),
                    AggregateFunction::Sum => Value::Float(
                        *accumulator.sums.get(&agg.alias).unwrap_or(&0.0),
                    ),
                    AggregateFunction::Avg => {
                        let sum = *accumulator.sums.get(&agg.alias).unwrap_or(&0.0);
                        if accumulator.count == 0 {
                            Value::Null
                        } else {
                            Value::Float(sum / accumulator.count as f64)
                        }
                    }
                    AggregateFunction::Min => accumulator
                        .mins
                        .get(&agg.alias)
                        .cloned()
                        .unwrap_or(Value::Null),
                    AggregateFunction::Max => accumulator
                        .maxes
                        .get(&agg.alias)
                        .cloned()
                        .unwrap_or(Value::Null),
                };
                record.set(agg.alias.clone(), value);
            }
            record
        })
        .collect();

    RecordSet::from_records(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(region: &str, amount: i64) -> Record {
        let mut r = Record::with_id(Value::Text(format!("{region}-{amount}")));
        r.set("region", Value::Text(region.to_string()));
        r.set("amount", Value::Int(amount));
        r
    }

    #[test]
    fn group_by_sums_and_counts_per_group() {
        let rows = vec![record("east", 10), record("east", 5), record("west", 2)];
        let aggregates = vec![
            Aggregate::new(AggregateFunction::Sum, "amount", "total"),
            Aggregate::new(AggregateFunction::Count, "amount", "n"),
        ];
        let result = reduce_groups(rows, &["region".to_string()], &aggregates, ":");
        assert_eq!(result.records.len(), 2);
        let east = result
            .records
            .iter()
            .find(|r| r.get("region") == Some(&Value::Text("east".into())))
            .unwrap();
        assert_eq!(east.get("total"), Some(&Value::Float(15.0)));
        assert_eq!(east.get("n"), Some(&Value::Int(2)));
    }

    #[test]
    fn group_by_tracks_min_and_max() {
        let rows = vec![record("east", 10), record("east", 5)];
        let aggregates = vec![
            Aggregate::new(AggregateFunction::Min, "amount", "lo"),
            Aggregate::new(AggregateFunction::Max, "amount", "hi"),
        ];
        let result = reduce_groups(rows, &["region".to_string()], &aggregates, ":");
        let east = &result.records[0];
        assert_eq!(east.get("lo"), Some(&Value::Int(5)));
        assert_eq!(east.get("hi"), Some(&Value::Int(10)));
    }
}
