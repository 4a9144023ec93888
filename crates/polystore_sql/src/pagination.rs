use crate::dialect::SqlDialect;
use polystore_core::Value;

/// Render `LIMIT <n> OFFSET <m>` (with bound placeholders) and the params
/// to bind for it. `next_index` is the 1-based position of the first
/// placeholder this clause consumes, only meaningful for `DollarNumber`
/// dialects.
pub fn limit_offset_clause(
    dialect: &dyn SqlDialect,
    next_index: usize,
    limit: Option<u64>,
    offset: Option<u64>,
) -> (String, Vec<Value>) {
    let style = dialect.placeholder_style();
    let mut clause = String::new();
    let mut params = Vec::new();
    let mut index = next_index;

    if let Some(limit) = limit {
        clause.push_str(&format!(" LIMIT {}", style.render(index)));
        params.push(Value::Int(limit as i64));
        index += 1;
    }
    if let Some(offset) = offset {
        clause.push_str(&format!(" OFFSET {}", style.render(index)));
        params.push(Value::Int(offset as i64));
    }

    (clause, params)
}

/// `SELECT COUNT(*) FROM <table> [WHERE <predicate>]` used by drivers that
/// need an exact total before `EXACT_COUNT_CAP` kicks in (spec.md §8).
pub fn count_query(table_ref: &str, where_clause: Option<&str>) -> String {
    match where_clause {
        Some(predicate) if !predicate.is_empty() => {
            format!("SELECT COUNT(*) FROM {} WHERE {}", table_ref, predicate)
        }
        _ => format!("SELECT COUNT(*) FROM {}", table_ref),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::AnsiDialect;

    #[test]
    fn question_mark_dialect_ignores_index() {
        let dialect = AnsiDialect;
        let (clause, params) = limit_offset_clause(&dialect, 1, Some(10), Some(20));
        assert_eq!(clause, " LIMIT ? OFFSET ?");
        assert_eq!(params, vec![Value::Int(10), Value::Int(20)]);
    }

    #[test]
    fn missing_offset_omits_that_fragment() {
        let dialect = AnsiDialect;
        let (clause, params) = limit_offset_clause(&dialect, 1, Some(5), None);
        assert_eq!(clause, " LIMIT ?");
        assert_eq!(params, vec![Value::Int(5)]);
    }

    #[test]
    fn count_query_wraps_predicate() {
        assert_eq!(
            count_query("\"users\"", Some("\"age\" > ?")),
            "SELECT COUNT(*) FROM \"users\" WHERE \"age\" > ?"
        );
        assert_eq!(count_query("\"users\"", None), "SELECT COUNT(*) FROM \"users\"");
    }
}
