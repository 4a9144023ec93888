//! Translates a logical [`Filter`] into a DynamoDB access plan: a native
//! `Query` when the filter pins the partition key (optionally narrowed by a
//! sort-key range), falling back to a `Scan` with a `FilterExpression`
//! otherwise. This mirrors `polystore_sql::SqlQueryGenerator`'s per-criterion
//! dispatch, adapted to DynamoDB's placeholder-based expression syntax in
//! place of bound SQL parameters.

use crate::types::value_to_attribute;
use aws_sdk_dynamodb::types::AttributeValue;
use polystore_core::{Collection, Criterion, DbError, DbResult, Filter, Operator, SortDirection};
use std::collections::HashMap;

/// A compiled plan ready to hand to either a `Query` or `Scan` builder.
pub struct QueryPlan {
    pub key_condition_expression: Option<String>,
    pub filter_expression: Option<String>,
    pub attribute_names: HashMap<String, String>,
    pub attribute_values: HashMap<String, AttributeValue>,
    /// `true` when the plan pinned the partition key and a native `Query`
    /// can be issued; `false` means the caller must `Scan`.
    pub is_query: bool,
    pub scan_index_forward: bool,
}

struct Placeholders {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
    next: u32,
}

impl Placeholders {
    fn new() -> Self {
        Self { names: HashMap::new(), values: HashMap::new(), next: 0 }
    }

    fn name_for(&mut self, field: &str) -> String {
        let placeholder = format!("#f{}", self.next);
        self.names.insert(placeholder.clone(), field.to_string());
        self.next += 1;
        placeholder
    }

    fn value_for(&mut self, attr: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.next);
        self.values.insert(placeholder.clone(), attr);
        self.next += 1;
        placeholder
    }
}

fn value_at(values: &[polystore_core::Value], idx: usize) -> polystore_core::Value {
    values.get(idx).cloned().unwrap_or(polystore_core::Value::Null)
}

pub fn plan_query(collection: &Collection, filter: &Filter) -> DbResult<QueryPlan> {
    let key_fields = collection.key_fields();
    let partition_field = key_fields.first().map(|f| f.name.clone());
    let sort_field = key_fields.get(1).map(|f| f.name.clone());

    let mut placeholders = Placeholders::new();

    let partition_criterion = partition_field.as_ref().and_then(|name| {
        filter
            .criteria
            .iter()
            .find(|c| &c.field == name && matches!(c.operator, Operator::Is) && !c.not && c.values.len() == 1)
    });

    let Some(partition_criterion) = partition_criterion else {
        return plan_scan(filter, placeholders);
    };

    let pk_name = placeholders.name_for(&partition_criterion.field);
    let pk_value = placeholders.value_for(value_to_attribute(&partition_criterion.values[0]));
    let mut key_condition = format!("{pk_name} = {pk_value}");

    let mut consumed_sort = false;
    let mut scan_index_forward = true;

    if let Some(sort_name) = &sort_field {
        if let Some(criterion) = filter.criteria.iter().find(|c| &c.field == sort_name) {
            key_condition.push_str(" AND ");
            key_condition.push_str(&sort_key_condition(criterion, &mut placeholders)?);
            consumed_sort = true;
        }

        if let Some(sort) = filter.sort.iter().find(|s| &s.field == sort_name) {
            scan_index_forward = matches!(sort.direction, SortDirection::Ascending);
        } else if !filter.sort.is_empty() {
            return Err(DbError::Unsupported(
                "dynamodb can only sort by the collection's sort key".to_string(),
            ));
        }
    } else if !filter.sort.is_empty() {
        return Err(DbError::Unsupported(
            "dynamodb query requires a declared sort key to honor a sort order".to_string(),
        ));
    }

    let remaining: Vec<&Criterion> = filter
        .criteria
        .iter()
        .filter(|c| {
            !std::ptr::eq(*c, partition_criterion) && !(consumed_sort && sort_field.as_deref() == Some(c.field.as_str()))
        })
        .collect();

    let filter_expression = build_filter_expression(&remaining, &mut placeholders)?;

    Ok(QueryPlan {
        key_condition_expression: Some(key_condition),
        filter_expression,
        attribute_names: placeholders.names,
        attribute_values: placeholders.values,
        is_query: true,
        scan_index_forward,
    })
}

fn plan_scan(filter: &Filter, mut placeholders: Placeholders) -> DbResult<QueryPlan> {
    if !filter.sort.is_empty() {
        return Err(DbError::Unsupported(
            "dynamodb scan (no partition-key equality in filter) cannot guarantee sort order".to_string(),
        ));
    }
    let criteria: Vec<&Criterion> = filter.criteria.iter().collect();
    let filter_expression = build_filter_expression(&criteria, &mut placeholders)?;
    Ok(QueryPlan {
        key_condition_expression: None,
        filter_expression,
        attribute_names: placeholders.names,
        attribute_values: placeholders.values,
        is_query: false,
        scan_index_forward: true,
    })
}

fn sort_key_condition(criterion: &Criterion, placeholders: &mut Placeholders) -> DbResult<String> {
    if criterion.not {
        return Err(DbError::Unsupported("dynamodb sort-key condition cannot be negated".to_string()));
    }
    let name = placeholders.name_for(&criterion.field);
    match criterion.operator {
        Operator::Is => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            Ok(format!("{name} = {v}"))
        }
        Operator::Lt => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            Ok(format!("{name} < {v}"))
        }
        Operator::Lte => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            Ok(format!("{name} <= {v}"))
        }
        Operator::Gt => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            Ok(format!("{name} > {v}"))
        }
        Operator::Gte => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            Ok(format!("{name} >= {v}"))
        }
        Operator::Prefix => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            Ok(format!("begins_with({name}, {v})"))
        }
        Operator::Range => {
            let lo = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            let hi = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 1)));
            Ok(format!("{name} BETWEEN {lo} AND {hi}"))
        }
        other => Err(DbError::Unsupported(format!("dynamodb sort key does not support operator {other:?}"))),
    }
}

fn build_filter_expression(criteria: &[&Criterion], placeholders: &mut Placeholders) -> DbResult<Option<String>> {
    if criteria.is_empty() {
        return Ok(None);
    }
    let mut clauses = Vec::with_capacity(criteria.len());
    for criterion in criteria {
        clauses.push(criterion_expression(criterion, placeholders)?);
    }
    Ok(Some(clauses.join(" AND ")))
}

fn criterion_expression(criterion: &Criterion, placeholders: &mut Placeholders) -> DbResult<String> {
    let name = placeholders.name_for(&criterion.field);
    let expr = match criterion.operator {
        Operator::Is => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            format!("{name} = {v}")
        }
        Operator::Not => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            format!("{name} <> {v}")
        }
        Operator::Lt => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            format!("{name} < {v}")
        }
        Operator::Lte => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            format!("{name} <= {v}")
        }
        Operator::Gt => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            format!("{name} > {v}")
        }
        Operator::Gte => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            format!("{name} >= {v}")
        }
        Operator::Prefix => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            format!("begins_with({name}, {v})")
        }
        Operator::Contains | Operator::Fulltext => {
            let v = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            format!("contains({name}, {v})")
        }
        Operator::Range => {
            let lo = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 0)));
            let hi = placeholders.value_for(value_to_attribute(&value_at(&criterion.values, 1)));
            format!("{name} BETWEEN {lo} AND {hi}")
        }
        Operator::Null => format!("attribute_not_exists({name})"),
        Operator::NotNull => format!("attribute_exists({name})"),
        Operator::Suffix => {
            return Err(DbError::Unsupported(
                "dynamodb has no native suffix-match expression function".to_string(),
            ))
        }
    };
    if criterion.not {
        Ok(format!("(NOT {expr})"))
    } else {
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::{Field, FieldType, Value};

    fn events() -> Collection {
        Collection::new("events")
            .with_field(Field::new("tenant", FieldType::String).identity())
            .with_field(Field::new("ts", FieldType::Int).key())
            .with_field(Field::new("kind", FieldType::String))
    }

    #[test]
    fn partition_equality_produces_native_query() {
        let filter = Filter::new().with_criterion(Criterion::is("tenant", Value::Text("acme".into())));
        let plan = plan_query(&events(), &filter).unwrap();
        assert!(plan.is_query);
        assert!(plan.key_condition_expression.unwrap().contains('='));
    }

    #[test]
    fn missing_partition_equality_falls_back_to_scan() {
        let filter = Filter::new().with_criterion(Criterion::is("kind", Value::Text("click".into())));
        let plan = plan_query(&events(), &filter).unwrap();
        assert!(!plan.is_query);
        assert!(plan.filter_expression.is_some());
    }

    #[test]
    fn sort_key_range_is_pushed_into_key_condition() {
        let filter = Filter::new()
            .with_criterion(Criterion::is("tenant", Value::Text("acme".into())))
            .with_criterion(Criterion::new("ts", Operator::Gte, vec![Value::Int(100)]));
        let plan = plan_query(&events(), &filter).unwrap();
        assert!(plan.key_condition_expression.unwrap().contains(">="));
        assert!(plan.filter_expression.is_none());
    }

    #[test]
    fn suffix_operator_is_unsupported() {
        let filter = Filter::new().with_criterion(Criterion::new("kind", Operator::Suffix, vec![Value::Text("x".into())]));
        assert!(plan_query(&events(), &filter).is_err());
    }
}
