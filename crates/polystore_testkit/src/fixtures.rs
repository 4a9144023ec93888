use crate::in_memory::InMemoryBackend;
use polystore_core::{Backend, Collection, Field, FieldType, Record, Value};
use std::sync::Arc;

/// `{id: int, name: string}` — the minimal fixture collection used across
/// `polystore_core`'s own integration tests and the driver crates' suites.
pub fn sample_users_collection() -> Collection {
    Collection::new("users")
        .with_field(Field::new("id", FieldType::Int).identity())
        .with_field(Field::new("name", FieldType::String))
}

/// Register `sample_users_collection()` on `backend` and insert `(id, name)`
/// pairs, returning the inserted records in the same order.
pub fn seed_users(backend: &Arc<InMemoryBackend>, rows: &[(i64, &str)]) -> Vec<Record> {
    backend
        .register_collection(sample_users_collection())
        .expect("register_collection should not fail for a fresh in-memory backend");

    let records: Vec<Record> = rows
        .iter()
        .map(|(id, name)| {
            let mut record = Record::with_id(Value::Int(*id));
            record.set("id", Value::Int(*id));
            record.set("name", Value::Text((*name).to_string()));
            record
        })
        .collect();

    backend
        .insert("users", records)
        .expect("seeding users should not fail")
        .records
}
