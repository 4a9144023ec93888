use crate::error::{DbError, DbResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// How a collection's identity field is typed. Drives identity conversion
/// (string<->int coercion is allowed; everything else must match exactly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityFieldType {
    String,
    Int,
    Float,
    Bool,
    Time,
    Object,
    Array,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Time,
    Object,
    Array,
    Raw,
}

/// A single column/property declared on a `Collection`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub subtype: Option<String>,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub required: bool,
    pub unique: bool,
    pub identity: bool,
    pub key: bool,
    /// `Some("now")` is the sentinel meaning "server current time".
    pub default_value: Option<Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            subtype: None,
            length: None,
            precision: None,
            required: false,
            unique: false,
            identity: false,
            key: false,
            default_value: None,
        }
    }

    pub fn identity(mut self) -> Self {
        self.identity = true;
        self.required = true;
        self
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// `default_value = "now"` is a sentinel meaning "server current time",
    /// never a literal string to store.
    pub fn is_server_now_default(&self) -> bool {
        matches!(&self.default_value, Some(Value::Text(s)) if s == "now")
    }
}

/// An embedded-record relationship declared at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Field(s) on the owning record that identify the target record.
    pub keys: Vec<String>,
    pub collection: String,
    /// Fields to project from the target record (empty means "all").
    pub fields: Vec<String>,
}

/// A named table/bucket/namespace schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub identity_field: String,
    pub identity_field_type: IdentityFieldType,
    pub fields: Vec<Field>,
    pub index_compound_fields: Vec<String>,
    pub index_compound_field_joiner: String,
    pub embedded_collections: Vec<Relationship>,
    pub allow_missing_embedded_records: bool,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity_field: "id".to_string(),
            identity_field_type: IdentityFieldType::String,
            fields: Vec::new(),
            index_compound_fields: Vec::new(),
            index_compound_field_joiner: ":".to_string(),
            embedded_collections: Vec::new(),
            allow_missing_embedded_records: false,
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        if field.identity {
            self.identity_field = field.name.clone();
        }
        self.fields.push(field);
        self
    }

    pub fn with_embedded(mut self, relationship: Relationship) -> Self {
        self.embedded_collections.push(relationship);
        self
    }

    /// Identity field plus every field flagged `key`, in declaration order.
    /// This is the column set used to build composite WHERE clauses.
    pub fn key_fields(&self) -> Vec<&Field> {
        let mut out = Vec::new();
        if let Some(identity) = self.fields.iter().find(|f| f.identity) {
            out.push(identity);
        }
        for field in &self.fields {
            if field.key && !field.identity {
                out.push(field);
            }
        }
        out
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Build the equality filter criteria that identify a single record,
    /// pairing each key field with the matching component of `id`.
    ///
    /// `id` is a scalar for a single-column identity, or an ordered vector
    /// matching `key_fields()` for a composite key. A length mismatch is a
    /// schema error raised before any query is sent, per spec.
    pub fn build_identity_components(&self, id: &[Value]) -> DbResult<Vec<(String, Value)>> {
        let keys = self.key_fields();
        if keys.len() > 1 {
            if id.len() != keys.len() {
                return Err(DbError::SchemaMismatch(format!(
                    "collection {:?} has {} key fields but id has {} components",
                    self.name,
                    keys.len(),
                    id.len()
                )));
            }
            Ok(keys
                .iter()
                .zip(id.iter())
                .map(|(f, v)| (f.name.clone(), v.clone()))
                .collect())
        } else if let Some(identity) = keys.first() {
            if id.len() != 1 {
                return Err(DbError::SchemaMismatch(format!(
                    "collection {:?} has a single identity field but id has {} components",
                    self.name,
                    id.len()
                )));
            }
            Ok(vec![(identity.name.clone(), id[0].clone())])
        } else {
            Err(DbError::SchemaMismatch(format!(
                "collection {:?} declares no identity or key fields",
                self.name
            )))
        }
    }

    /// Encode a composite id as a single joined string for the index plane.
    pub fn encode_compound_id(&self, components: &[Value]) -> String {
        components
            .iter()
            .map(|v| v.as_key_component())
            .collect::<Vec<_>>()
            .join(&self.index_compound_field_joiner)
    }

    /// Split a compound index id back into its declared components. When the
    /// split yields fewer parts than declared, the caller is expected to top
    /// up from the index record's own fields before calling this again with
    /// the full candidate list — see `query_impl::run_query`.
    pub fn split_compound_id(&self, encoded: &str) -> Vec<String> {
        if self.index_compound_fields.len() <= 1 {
            return vec![encoded.to_string()];
        }
        encoded
            .split(self.index_compound_field_joiner.as_str())
            .map(|s| s.to_string())
            .collect()
    }
}

/// Overlays caller-supplied metadata (relationships, required/key flags) on
/// top of a backend-discovered schema, preferring the discovered field types
/// but keeping caller-only annotations that the live store doesn't expose.
pub fn apply_definition(discovered: &Collection, caller_supplied: &Collection) -> Collection {
    let mut merged = discovered.clone();
    merged.embedded_collections = caller_supplied.embedded_collections.clone();
    merged.allow_missing_embedded_records = caller_supplied.allow_missing_embedded_records;
    merged.index_compound_fields = caller_supplied.index_compound_fields.clone();
    merged.index_compound_field_joiner = caller_supplied.index_compound_field_joiner.clone();

    for caller_field in &caller_supplied.fields {
        if let Some(discovered_field) = merged.fields.iter_mut().find(|f| f.name == caller_field.name) {
            if caller_field.default_value.is_some() {
                discovered_field.default_value = caller_field.default_value.clone();
            }
            discovered_field.key = discovered_field.key || caller_field.key;
        } else {
            merged.fields.push(caller_field.clone());
        }
    }
    merged
}

/// Kind of change between two `Collection` snapshots, produced by `diff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDeltaKind {
    CollectionKeyName,
    CollectionKeyType,
    FieldMissing,
    FieldName,
    FieldType,
    FieldLength,
    FieldProperty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDelta {
    pub kind: SchemaDeltaKind,
    pub field: Option<String>,
    pub detail: String,
}

impl Collection {
    /// Compute the deltas needed to turn `self` into `other`. Used both for
    /// schema-drift detection and, behind the `migrate` feature, to derive
    /// additive `ALTER` statements.
    pub fn diff(&self, other: &Collection) -> Vec<SchemaDelta> {
        let mut deltas = Vec::new();

        if self.identity_field != other.identity_field {
            deltas.push(SchemaDelta {
                kind: SchemaDeltaKind::CollectionKeyName,
                field: None,
                detail: format!(
                    "identity field {:?} -> {:?}",
                    self.identity_field, other.identity_field
                ),
            });
        }
        if self.identity_field_type != other.identity_field_type {
            deltas.push(SchemaDelta {
                kind: SchemaDeltaKind::CollectionKeyType,
                field: None,
                detail: format!(
                    "identity type {:?} -> {:?}",
                    self.identity_field_type, other.identity_field_type
                ),
            });
        }

        for field in &other.fields {
            match self.fields.iter().find(|f| f.name == field.name) {
                None => deltas.push(SchemaDelta {
                    kind: SchemaDeltaKind::FieldMissing,
                    field: Some(field.name.clone()),
                    detail: format!("field {:?} missing", field.name),
                }),
                Some(existing) => {
                    if existing.field_type != field.field_type {
                        deltas.push(SchemaDelta {
                            kind: SchemaDeltaKind::FieldType,
                            field: Some(field.name.clone()),
                            detail: format!(
                                "{:?} -> {:?}",
                                existing.field_type, field.field_type
                            ),
                        });
                    }
                    if existing.length != field.length {
                        deltas.push(SchemaDelta {
                            kind: SchemaDeltaKind::FieldLength,
                            field: Some(field.name.clone()),
                            detail: format!("{:?} -> {:?}", existing.length, field.length),
                        });
                    }
                    if existing.required != field.required || existing.unique != field.unique {
                        deltas.push(SchemaDelta {
                            kind: SchemaDeltaKind::FieldProperty,
                            field: Some(field.name.clone()),
                            detail: "required/unique flags differ".to_string(),
                        });
                    }
                }
            }
        }

        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_collection() -> Collection {
        Collection::new("users")
            .with_field(Field::new("id", FieldType::Int).identity())
            .with_field(Field::new("name", FieldType::String))
    }

    #[test]
    fn key_fields_put_identity_first() {
        let tenant_sku = Collection::new("inventory")
            .with_field(Field::new("id", FieldType::String).identity())
            .with_field(Field::new("tenant", FieldType::String).key())
            .with_field(Field::new("sku", FieldType::String).key());
        let keys: Vec<_> = tenant_sku.key_fields().iter().map(|f| f.name.clone()).collect();
        assert_eq!(keys, vec!["id", "tenant", "sku"]);
    }

    #[test]
    fn composite_key_arity_mismatch_is_schema_error() {
        let c = Collection::new("inventory")
            .with_field(Field::new("tenant", FieldType::String).key())
            .with_field(Field::new("sku", FieldType::String).key());
        let err = c.build_identity_components(&[Value::Text("acme".into())]);
        assert!(matches!(err, Err(DbError::SchemaMismatch(_))));
    }

    #[test]
    fn compound_id_round_trips() {
        let c = Collection {
            index_compound_fields: vec!["tenant".into(), "sku".into()],
            ..Collection::new("inventory")
        };
        let encoded = c.encode_compound_id(&[Value::Text("acme".into()), Value::Text("42".into())]);
        assert_eq!(encoded, "acme:42");
        assert_eq!(c.split_compound_id(&encoded), vec!["acme", "42"]);
    }

    #[test]
    fn diff_detects_missing_and_retyped_fields() {
        let base = users_collection();
        let mut other = base.clone();
        other.fields.push(Field::new("age", FieldType::Int));
        other.fields[1] = Field::new("name", FieldType::Int);
        let deltas = base.diff(&other);
        assert!(deltas.iter().any(|d| d.kind == SchemaDeltaKind::FieldMissing));
        assert!(deltas.iter().any(|d| d.kind == SchemaDeltaKind::FieldType));
    }
}
