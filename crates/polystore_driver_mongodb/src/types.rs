use bson::{Bson, Document};
use polystore_core::{Collection, Record, Value};
use std::collections::BTreeMap;

/// Convert a logical [`Value`] to `Bson`. Strings matching ObjectId hex
/// format get promoted to `Bson::ObjectId`, the same special case the
/// workbench's JSON-to-BSON conversion applies, so identity values round-trip
/// through `_id` without the caller having to know they're hex strings.
pub fn value_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int(i) => Bson::Int64(*i),
        Value::Float(f) => Bson::Double(*f),
        Value::Text(s) => {
            if s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit()) {
                if let Ok(oid) = bson::oid::ObjectId::parse_str(s) {
                    return Bson::ObjectId(oid);
                }
            }
            Bson::String(s.clone())
        }
        Value::Bytes(b) => Bson::Binary(bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes: b.clone(),
        }),
        Value::DateTime(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
        Value::Array(items) => Bson::Array(items.iter().map(value_to_bson).collect()),
        Value::Object(map) => {
            let mut doc = Document::new();
            for (k, v) in map {
                doc.insert(k.clone(), value_to_bson(v));
            }
            Bson::Document(doc)
        }
    }
}

/// Convert `Bson` back to a logical [`Value`]. `Value` has no dedicated
/// ObjectId/Decimal128/regex/timestamp variants, so those collapse to their
/// textual representation, mirroring how the workbench's own `bson_to_value`
/// degrades the same exotic types for display.
pub fn bson_to_value(bson: &Bson) -> Value {
    match bson {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::Int(*i as i64),
        Bson::Int64(i) => Value::Int(*i),
        Bson::Double(f) => Value::Float(*f),
        Bson::String(s) => Value::Text(s.clone()),
        Bson::ObjectId(oid) => Value::Text(oid.to_hex()),
        Bson::DateTime(dt) => {
            let millis = dt.timestamp_millis();
            match chrono::DateTime::from_timestamp_millis(millis) {
                Some(datetime) => Value::DateTime(datetime),
                None => Value::Text(dt.to_string()),
            }
        }
        Bson::Binary(bin) => Value::Bytes(bin.bytes.clone()),
        Bson::Array(arr) => Value::Array(arr.iter().map(bson_to_value).collect()),
        Bson::Document(doc) => {
            let map: BTreeMap<String, Value> = doc.iter().map(|(k, v)| (k.clone(), bson_to_value(v))).collect();
            Value::Object(map)
        }
        Bson::Decimal128(d) => Value::Text(d.to_string()),
        Bson::RegularExpression(regex) => Value::Text(format!("/{}/{}", regex.pattern, regex.options)),
        Bson::JavaScriptCode(code) => Value::Text(code.clone()),
        Bson::JavaScriptCodeWithScope(code) => Value::Text(code.code.clone()),
        Bson::Timestamp(ts) => Value::Text(format!("Timestamp({}, {})", ts.time, ts.increment)),
        Bson::Symbol(s) => Value::Text(s.clone()),
        Bson::MaxKey => Value::Text("MaxKey".to_string()),
        Bson::MinKey => Value::Text("MinKey".to_string()),
        Bson::DbPointer(_) => Value::Text("DBPointer".to_string()),
    }
}

/// Build the document to store, renaming the schema's identity field to
/// Mongo's reserved `_id` key.
pub fn document_from_record(collection: &Collection, record: &Record) -> Document {
    let mut doc = Document::new();
    for (k, v) in &record.fields {
        let key = if k == &collection.identity_field { "_id".to_string() } else { k.clone() };
        doc.insert(key, value_to_bson(v));
    }
    doc
}

/// Inverse of [`document_from_record`]: rename `_id` back to the schema's
/// identity field name and derive `Record::id` from `key_fields()`.
pub fn record_from_document(collection: &Collection, doc: &Document) -> Record {
    let mut record = Record::new();
    for (k, v) in doc.iter() {
        let field_name = if k == "_id" { collection.identity_field.clone() } else { k.clone() };
        record.set(field_name, bson_to_value(v));
    }
    let id: Vec<Value> = collection
        .key_fields()
        .iter()
        .map(|f| record.get(&f.name).cloned().unwrap_or(Value::Null))
        .collect();
    record.id = id;
    record
}
