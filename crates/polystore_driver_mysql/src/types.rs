use mysql::prelude::*;
use polystore_core::{Collection, DbResult, Record, Value};

/// Decode one column the way the workbench's own MySQL driver does: walk
/// down the candidate Rust types until one of them round-trips, falling
/// back to text. DATETIME/TIMESTAMP columns are special-cased first since
/// a blind `i64`/`f64` probe would otherwise swallow them as strings.
pub fn column_value(row: &mysql::Row, idx: usize, column: &mysql::Column) -> Value {
    use mysql::consts::ColumnType;

    let col_type = column.column_type();
    if matches!(
        col_type,
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_TIMESTAMP
    ) {
        if let Some(Ok(Some(text))) = row.get_opt::<Option<String>, _>(idx) {
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S") {
                let utc = chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(naive, chrono::Utc);
                return Value::DateTime(utc);
            }
            return Value::Text(text);
        }
        return Value::Null;
    }

    if let Some(result) = row.get_opt::<Option<i64>, _>(idx) {
        return match result {
            Ok(Some(v)) => Value::Int(v),
            Ok(None) => Value::Null,
            Err(_) => fallback_text(row, idx),
        };
    }
    if let Some(result) = row.get_opt::<Option<f64>, _>(idx) {
        return match result {
            Ok(Some(v)) => Value::Float(v),
            Ok(None) => Value::Null,
            Err(_) => fallback_text(row, idx),
        };
    }
    fallback_text(row, idx)
}

fn fallback_text(row: &mysql::Row, idx: usize) -> Value {
    match row.get_opt::<Option<Vec<u8>>, _>(idx) {
        Some(Ok(Some(bytes))) => match String::from_utf8(bytes.clone()) {
            Ok(s) => Value::Text(s),
            Err(_) => Value::Bytes(bytes),
        },
        Some(Ok(None)) => Value::Null,
        _ => Value::Null,
    }
}

pub fn row_to_record(collection: &Collection, row: &mysql::Row) -> DbResult<Record> {
    let mut record = Record::new();
    let columns = row.columns_ref();
    for (idx, column) in columns.iter().enumerate() {
        record.set(column.name_str().to_string(), column_value(row, idx, column));
    }
    let id: Vec<Value> = collection
        .key_fields()
        .iter()
        .map(|f| record.get(&f.name).cloned().unwrap_or(Value::Null))
        .collect();
    record.id = id;
    Ok(record)
}
