use polystore_core::Value;

/// Positional-parameter placeholder syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` (SQLite, MySQL).
    QuestionMark,
    /// `$1`, `$2`, ... (PostgreSQL).
    DollarNumber,
}

impl PlaceholderStyle {
    /// Render the placeholder for the `index`-th bound parameter (1-based).
    pub fn render(&self, index: usize) -> String {
        match self {
            PlaceholderStyle::QuestionMark => "?".to_string(),
            PlaceholderStyle::DollarNumber => format!("${}", index),
        }
    }
}

/// Database-specific SQL syntax: identifier quoting, table qualification,
/// and literal rendering for the handful of values that end up inlined
/// rather than bound (e.g. LIKE pattern construction happens on the
/// caller's side; the dialect only needs to know how to quote and escape).
pub trait SqlDialect: Send + Sync {
    fn quote_identifier(&self, name: &str) -> String;

    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String;

    fn value_to_literal(&self, value: &Value) -> String;

    fn escape_string(&self, s: &str) -> String;

    fn placeholder_style(&self) -> PlaceholderStyle;

    /// Whether INSERT/UPDATE/DELETE can return the affected row directly.
    /// PostgreSQL does; SQLite and MySQL must re-query by identity.
    fn supports_returning(&self) -> bool {
        false
    }
}

/// ANSI-ish default: double-quoted identifiers, `?` placeholders. Used
/// directly by the sqlite driver and as the base every other dialect
/// overrides from.
pub struct AnsiDialect;

impl SqlDialect for AnsiDialect {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(s) => format!("{}.{}", self.quote_identifier(s), self.quote_identifier(table)),
            None => self.quote_identifier(table),
        }
    }

    fn value_to_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_nan() {
                    "'NaN'".to_string()
                } else if f.is_infinite() {
                    if *f > 0.0 { "'Infinity'".to_string() } else { "'-Infinity'".to_string() }
                } else {
                    f.to_string()
                }
            }
            Value::Text(s) => format!("'{}'", self.escape_string(s)),
            Value::Bytes(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
                format!("X'{}'", hex)
            }
            Value::DateTime(dt) => format!("'{}'", dt.to_rfc3339()),
            Value::Array(arr) => {
                let items: Vec<String> = arr.iter().map(|v| self.value_to_literal(v)).collect();
                format!("ARRAY[{}]", items.join(", "))
            }
            Value::Object(_) => {
                format!("'{}'", self.escape_string(&value_to_json_text(value)))
            }
        }
    }

    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }
}

fn value_to_json_text(value: &Value) -> String {
    // Minimal object rendering for the rare case a JSON/object column is
    // inlined as a literal; driver crates normally bind object values as
    // parameters instead.
    match value {
        Value::Object(fields) => {
            let parts: Vec<String> = fields
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", k, value_to_json_text(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(value_to_json_text).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Text(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bytes(_) | Value::DateTime(_) => format!("\"{}\"", value.as_str().unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_identifier_doubles_embedded_quotes() {
        let dialect = AnsiDialect;
        assert_eq!(dialect.quote_identifier("weird\"name"), "\"weird\"\"name\"");
    }

    #[test]
    fn qualified_table_includes_schema_when_present() {
        let dialect = AnsiDialect;
        assert_eq!(dialect.qualified_table(Some("public"), "users"), "\"public\".\"users\"");
        assert_eq!(dialect.qualified_table(None, "users"), "\"users\"");
    }

    #[test]
    fn dollar_number_placeholders_increment() {
        let style = PlaceholderStyle::DollarNumber;
        assert_eq!(style.render(1), "$1");
        assert_eq!(style.render(2), "$2");
    }
}
