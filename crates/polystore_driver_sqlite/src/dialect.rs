use polystore_core::Value;
use polystore_sql::{PlaceholderStyle, SqlDialect};

pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn quote_identifier(&self, name: &str) -> String {
        quote_ident(name)
    }

    fn qualified_table(&self, _schema: Option<&str>, table: &str) -> String {
        // SQLite has no schema-qualified table references outside ATTACHed
        // databases, which collections never use here.
        quote_ident(table)
    }

    fn value_to_literal(&self, value: &Value) -> String {
        value_to_literal(value)
    }

    fn escape_string(&self, s: &str) -> String {
        escape_string(s)
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn escape_string(s: &str) -> String {
    s.replace('\'', "''")
}

pub fn value_to_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => {
            if f.is_nan() || f.is_infinite() {
                "NULL".to_string()
            } else {
                f.to_string()
            }
        }
        Value::Text(s) => format!("'{}'", escape_string(s)),
        Value::Bytes(b) => format!("X'{}'", hex::encode(b)),
        Value::DateTime(dt) => format!("'{}'", dt.to_rfc3339()),
        Value::Array(_) | Value::Object(_) => {
            let json = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
            format!("'{}'", escape_string(&json))
        }
    }
}

/// Convert a value straight to a bound `rusqlite` parameter, skipping the
/// literal-text round trip `value_to_literal` uses for debug/EXPLAIN output.
pub fn value_to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as SqlValue;
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::DateTime(dt) => SqlValue::Text(dt.to_rfc3339()),
        Value::Array(_) | Value::Object(_) => {
            SqlValue::Text(serde_json::to_string(value).unwrap_or_else(|_| "null".to_string()))
        }
    }
}

pub fn sql_to_value(raw: &rusqlite::types::ValueRef) -> Value {
    use rusqlite::types::ValueRef;
    match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(*i),
        ValueRef::Real(f) => Value::Float(*f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_doubles_embedded_quotes() {
        assert_eq!(quote_ident("wei\"rd"), "\"wei\"\"rd\"");
    }

    #[test]
    fn bool_literal_renders_as_integer() {
        assert_eq!(value_to_literal(&Value::Bool(true)), "1");
        assert_eq!(value_to_literal(&Value::Bool(false)), "0");
    }
}
