use aws_sdk_dynamodb::types::AttributeValue;
use polystore_core::{Collection, Record, Value};
use std::collections::HashMap;

/// Convert a logical [`Value`] to an `AttributeValue`. DynamoDB has no
/// separate int/float wire type — both collapse to `N`, a decimal string —
/// so the round trip through [`attribute_to_value`] has to re-sniff the
/// distinction from the string's shape.
pub fn value_to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Int(i) => AttributeValue::N(i.to_string()),
        Value::Float(f) => AttributeValue::N(f.to_string()),
        Value::Text(s) => AttributeValue::S(s.clone()),
        Value::Bytes(b) => AttributeValue::B(aws_sdk_dynamodb::primitives::Blob::new(b.clone())),
        Value::DateTime(dt) => AttributeValue::S(dt.to_rfc3339()),
        Value::Array(items) => AttributeValue::L(items.iter().map(value_to_attribute).collect()),
        Value::Object(map) => {
            let entries = map.iter().map(|(k, v)| (k.clone(), value_to_attribute(v))).collect();
            AttributeValue::M(entries)
        }
    }
}

/// Inverse of [`value_to_attribute`]. Numbers without a `.`/exponent decode
/// as `Value::Int`; everything else in `N` decodes as `Value::Float`.
pub fn attribute_to_value(attr: &AttributeValue) -> Value {
    match attr {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::N(n) => {
            if n.contains('.') || n.contains('e') || n.contains('E') {
                n.parse::<f64>().map(Value::Float).unwrap_or(Value::Null)
            } else {
                n.parse::<i64>().map(Value::Int).unwrap_or_else(|_| n.parse::<f64>().map(Value::Float).unwrap_or(Value::Null))
            }
        }
        AttributeValue::S(s) => Value::Text(s.clone()),
        AttributeValue::B(blob) => Value::Bytes(blob.clone().into_inner()),
        AttributeValue::L(items) => Value::Array(items.iter().map(attribute_to_value).collect()),
        AttributeValue::M(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), attribute_to_value(v))).collect())
        }
        // Sets (SS/NS/BS) never appear in data we write ourselves; degrade to
        // an array so a hand-populated table doesn't trip decoding.
        AttributeValue::Ss(items) => Value::Array(items.iter().cloned().map(Value::Text).collect()),
        AttributeValue::Ns(items) => {
            Value::Array(items.iter().map(|n| n.parse::<f64>().map(Value::Float).unwrap_or(Value::Null)).collect())
        }
        _ => Value::Null,
    }
}

/// Build the item map to `put_item`, renaming nothing: unlike Mongo's `_id`,
/// DynamoDB key attributes keep their schema field names.
pub fn item_from_record(record: &Record) -> HashMap<String, AttributeValue> {
    record.fields.iter().map(|(k, v)| (k.clone(), value_to_attribute(v))).collect()
}

/// Inverse of [`item_from_record`], deriving `Record::id` from `key_fields()`.
pub fn record_from_item(collection: &Collection, item: &HashMap<String, AttributeValue>) -> Record {
    let mut record = Record::new();
    for (k, v) in item {
        record.set(k.clone(), attribute_to_value(v));
    }
    record.id = collection.key_fields().iter().map(|f| record.get(&f.name).cloned().unwrap_or(Value::Null)).collect();
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_round_trip_without_becoming_floats() {
        let attr = value_to_attribute(&Value::Int(42));
        assert_eq!(attribute_to_value(&attr), Value::Int(42));
    }

    #[test]
    fn floats_round_trip() {
        let attr = value_to_attribute(&Value::Float(3.5));
        assert_eq!(attribute_to_value(&attr), Value::Float(3.5));
    }

    #[test]
    fn null_round_trips() {
        let attr = value_to_attribute(&Value::Null);
        assert_eq!(attribute_to_value(&attr), Value::Null);
    }
}
