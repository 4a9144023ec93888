use crate::dialect::SqlDialect;
use crate::pagination::limit_offset_clause;
use polystore_core::{Criterion, Filter, GeneratedQuery, Operator, QueryGenerator, SortDirection, Value};

/// Translates a logical [`Filter`] into a `SELECT` statement plus bound
/// parameters, against a caller-supplied [`SqlDialect`]. One instance is
/// shared by the sqlite/postgres/mysql driver crates, each constructing it
/// over their own dialect.
pub struct SqlQueryGenerator<'a> {
    dialect: &'a dyn SqlDialect,
    schema: Option<String>,
}

impl<'a> SqlQueryGenerator<'a> {
    pub fn new(dialect: &'a dyn SqlDialect, schema: Option<String>) -> Self {
        Self { dialect, schema }
    }

    /// The `WHERE` predicate alone (no `WHERE` keyword, no `ORDER BY`/
    /// `LIMIT`), with its bound params, starting placeholder numbering at 1.
    /// Lets callers that need to graft the predicate onto a statement other
    /// than `generate_select`'s own `SELECT` (an `UPDATE`/`DELETE`, a
    /// `COUNT`, a `DISTINCT` projection) reuse the same `Criterion`
    /// translation without re-parsing `generate_select`'s rendered text.
    pub fn generate_where(&self, filter: &Filter) -> (Option<String>, Vec<Value>) {
        let mut next_index = 1;
        self.where_clause(filter, &mut next_index)
    }

    fn where_clause(&self, filter: &Filter, next_index: &mut usize) -> (Option<String>, Vec<Value>) {
        if filter.criteria.is_empty() {
            return (None, Vec::new());
        }

        let mut params = Vec::new();
        let conditions: Vec<String> = filter
            .criteria
            .iter()
            .map(|criterion| self.render_criterion(criterion, next_index, &mut params))
            .collect();

        (Some(conditions.join(" AND ")), params)
    }

    fn render_criterion(&self, criterion: &Criterion, next_index: &mut usize, params: &mut Vec<Value>) -> String {
        let column = self.dialect.quote_identifier(&criterion.field);
        let style = self.dialect.placeholder_style();

        let mut bind = |value: Value, params: &mut Vec<Value>| -> String {
            let placeholder = style.render(*next_index);
            *next_index += 1;
            params.push(value);
            placeholder
        };

        let condition = match criterion.operator {
            Operator::Is => match criterion.values.first() {
                Some(Value::Null) | None => format!("{} IS NULL", column),
                Some(value) => format!("{} = {}", column, bind(value.clone(), params)),
            },
            Operator::Not => match criterion.values.first() {
                Some(Value::Null) | None => format!("{} IS NOT NULL", column),
                Some(value) => format!("{} <> {}", column, bind(value.clone(), params)),
            },
            Operator::Lt => format!("{} < {}", column, bind(first_or_null(&criterion.values), params)),
            Operator::Lte => format!("{} <= {}", column, bind(first_or_null(&criterion.values), params)),
            Operator::Gt => format!("{} > {}", column, bind(first_or_null(&criterion.values), params)),
            Operator::Gte => format!("{} >= {}", column, bind(first_or_null(&criterion.values), params)),
            Operator::Prefix => {
                let pattern = format!("{}%", text_or_empty(&criterion.values));
                format!("{} LIKE {}", column, bind(Value::Text(pattern), params))
            }
            Operator::Suffix => {
                let pattern = format!("%{}", text_or_empty(&criterion.values));
                format!("{} LIKE {}", column, bind(Value::Text(pattern), params))
            }
            Operator::Contains | Operator::Fulltext => {
                let pattern = format!("%{}%", text_or_empty(&criterion.values));
                format!("{} LIKE {}", column, bind(Value::Text(pattern), params))
            }
            Operator::Range => {
                let lo = criterion.values.first().cloned().unwrap_or(Value::Null);
                let hi = criterion.values.get(1).cloned().unwrap_or(Value::Null);
                format!(
                    "{} BETWEEN {} AND {}",
                    column,
                    bind(lo, params),
                    bind(hi, params)
                )
            }
            Operator::Null => format!("{} IS NULL", column),
            Operator::NotNull => format!("{} IS NOT NULL", column),
        };

        if criterion.not {
            format!("NOT ({})", condition)
        } else {
            condition
        }
    }

    fn order_by_clause(&self, filter: &Filter) -> Option<String> {
        if filter.sort.is_empty() {
            return None;
        }
        let fragments: Vec<String> = filter
            .sort
            .iter()
            .map(|sort| {
                let direction = match sort.direction {
                    SortDirection::Ascending => "ASC",
                    SortDirection::Descending => "DESC",
                };
                format!("{} {}", self.dialect.quote_identifier(&sort.field), direction)
            })
            .collect();
        Some(fragments.join(", "))
    }

    fn select_list(&self, filter: &Filter) -> String {
        if filter.fields.is_empty() {
            "*".to_string()
        } else {
            filter
                .fields
                .iter()
                .map(|f| self.dialect.quote_identifier(f))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

fn first_or_null(values: &[Value]) -> Value {
    values.first().cloned().unwrap_or(Value::Null)
}

fn text_or_empty(values: &[Value]) -> String {
    values.first().and_then(Value::as_str).unwrap_or("").to_string()
}

impl<'a> QueryGenerator for SqlQueryGenerator<'a> {
    fn generate_select(&self, collection: &str, filter: &Filter) -> GeneratedQuery {
        let table = self.dialect.qualified_table(self.schema.as_deref(), collection);
        let mut text = format!("SELECT {} FROM {}", self.select_list(filter), table);

        let mut next_index = 1;
        let (where_clause, mut params) = self.where_clause(filter, &mut next_index);
        if let Some(predicate) = where_clause {
            text.push_str(" WHERE ");
            text.push_str(&predicate);
        }

        if let Some(order_by) = self.order_by_clause(filter) {
            text.push_str(" ORDER BY ");
            text.push_str(&order_by);
        }

        let (limit_offset, mut pagination_params) =
            limit_offset_clause(self.dialect, next_index, filter.limit, filter.offset);
        text.push_str(&limit_offset);
        params.append(&mut pagination_params);

        GeneratedQuery { text, params }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::AnsiDialect;
    use polystore_core::{Criterion, SortField};

    #[test]
    fn equality_criterion_binds_a_placeholder() {
        let dialect = AnsiDialect;
        let generator = SqlQueryGenerator::new(&dialect, None);
        let filter = Filter::new().with_criterion(Criterion::is("id", Value::Int(7)));

        let query = generator.generate_select("users", &filter);
        assert_eq!(query.text, "SELECT * FROM \"users\" WHERE \"id\" = ?");
        assert_eq!(query.params, vec![Value::Int(7)]);
    }

    #[test]
    fn range_criterion_binds_two_placeholders_in_order() {
        let dialect = AnsiDialect;
        let generator = SqlQueryGenerator::new(&dialect, None);
        let filter = Filter::new().with_criterion(Criterion::new(
            "age",
            Operator::Range,
            vec![Value::Int(18), Value::Int(65)],
        ));

        let query = generator.generate_select("users", &filter);
        assert_eq!(query.text, "SELECT * FROM \"users\" WHERE \"age\" BETWEEN ? AND ?");
        assert_eq!(query.params, vec![Value::Int(18), Value::Int(65)]);
    }

    #[test]
    fn sort_and_pagination_append_after_predicate() {
        let dialect = AnsiDialect;
        let generator = SqlQueryGenerator::new(&dialect, Some("public".to_string()));
        let filter = Filter::new()
            .with_criterion(Criterion::is("status", Value::Text("active".to_string())))
            .with_limit(10)
            .with_offset(20);
        let filter = Filter { sort: vec![SortField { field: "name".to_string(), direction: SortDirection::Descending }], ..filter };

        let query = generator.generate_select("users", &filter);
        assert_eq!(
            query.text,
            "SELECT * FROM \"public\".\"users\" WHERE \"status\" = ? ORDER BY \"name\" DESC LIMIT ? OFFSET ?"
        );
        assert_eq!(query.params, vec![Value::Text("active".to_string()), Value::Int(10), Value::Int(20)]);
    }

    #[test]
    fn generate_where_omits_order_by_and_limit() {
        let dialect = AnsiDialect;
        let generator = SqlQueryGenerator::new(&dialect, None);
        let filter = Filter::new()
            .with_criterion(Criterion::is("status", Value::Text("active".to_string())))
            .with_limit(10);
        let filter = Filter { sort: vec![SortField { field: "name".to_string(), direction: SortDirection::Descending }], ..filter };

        let (predicate, params) = generator.generate_where(&filter);
        assert_eq!(predicate.as_deref(), Some("\"status\" = ?"));
        assert_eq!(params, vec![Value::Text("active".to_string())]);
    }

    #[test]
    fn negated_prefix_wraps_in_not() {
        let dialect = AnsiDialect;
        let generator = SqlQueryGenerator::new(&dialect, None);
        let filter = Filter::new()
            .with_criterion(Criterion::prefix("email", "spam").negated());

        let query = generator.generate_select("users", &filter);
        assert_eq!(query.text, "SELECT * FROM \"users\" WHERE NOT (\"email\" LIKE ?)");
        assert_eq!(query.params, vec![Value::Text("spam%".to_string())]);
    }
}
