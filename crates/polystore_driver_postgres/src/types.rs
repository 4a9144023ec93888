use bytes::BytesMut;
use polystore_core::{Collection, DbResult, Record, Value};
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use postgres::Row;
use std::error::Error as StdError;

/// Wraps a borrowed [`Value`] so it can be handed to `postgres::Client`'s
/// positional-parameter APIs, delegating the wire encoding to whichever
/// concrete `ToSql` impl already exists for the matching Rust type.
pub struct PgParam<'a>(pub &'a Value);

impl<'a> ToSql for PgParam<'a> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => i.to_sql(ty, out),
            Value::Float(f) => f.to_sql(ty, out),
            Value::Text(s) => s.to_sql(ty, out),
            Value::Bytes(b) => b.to_sql(ty, out),
            Value::DateTime(dt) => dt.to_sql(ty, out),
            Value::Array(_) | Value::Object(_) => {
                let json = serde_json::to_string(self.0).unwrap_or_else(|_| "null".to_string());
                json.to_sql(ty, out)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool
    where
        Self: Sized,
    {
        true
    }

    to_sql_checked!();
}

/// Decode the column at `idx` by its reported Postgres type name, the same
/// dispatch the connection-pool GUI's driver uses for result-grid rendering.
pub fn column_value(row: &Row, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_().name();
    match type_name {
        "bool" => row.try_get::<_, bool>(idx).map(Value::Bool).unwrap_or(Value::Null),
        "int2" => row.try_get::<_, i16>(idx).map(|v| Value::Int(v as i64)).unwrap_or(Value::Null),
        "int4" => row.try_get::<_, i32>(idx).map(|v| Value::Int(v as i64)).unwrap_or(Value::Null),
        "int8" => row.try_get::<_, i64>(idx).map(Value::Int).unwrap_or(Value::Null),
        "float4" => row.try_get::<_, f32>(idx).map(|v| Value::Float(v as f64)).unwrap_or(Value::Null),
        "float8" | "numeric" => row.try_get::<_, f64>(idx).map(Value::Float).unwrap_or(Value::Null),
        "bytea" => row.try_get::<_, Vec<u8>>(idx).map(Value::Bytes).unwrap_or(Value::Null),
        "timestamp" | "timestamptz" => row
            .try_get::<_, chrono::DateTime<chrono::Utc>>(idx)
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        "json" | "jsonb" => row
            .try_get::<_, serde_json::Value>(idx)
            .ok()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(Value::Null),
        _ => row.try_get::<_, String>(idx).map(Value::Text).unwrap_or(Value::Null),
    }
}

pub fn row_to_record(collection: &Collection, row: &Row) -> DbResult<Record> {
    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        record.set(column.name(), column_value(row, idx));
    }
    let id: Vec<Value> = collection
        .key_fields()
        .iter()
        .map(|f| record.get(&f.name).cloned().unwrap_or(Value::Null))
        .collect();
    record.id = id;
    Ok(record)
}

