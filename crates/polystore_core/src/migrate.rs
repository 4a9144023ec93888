//! Best-effort additive schema migrator, gated behind the `migrate` feature.
//! Per spec.md §9: "only additive field changes are currently well-specified
//! ... treat destructive migrations as an open question."

use crate::schema::{Collection, SchemaDelta, SchemaDeltaKind};

/// One additive change the migrator is confident about generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    pub collection: String,
    pub field: String,
    pub description: String,
}

/// A delta this migrator refuses to act on (renames, type narrowing, key
/// changes) — surfaced instead of silently dropped or guessed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedDelta {
    pub delta: SchemaDelta,
    pub reason: &'static str,
}

/// Plan an additive-only migration from `current` to `desired`.
///
/// Only `FieldMissing` deltas (a field present in `desired` but absent from
/// `current`) become `MigrationStep`s. Every other delta kind — renamed
/// identity fields, retyped columns, length/property changes — is returned
/// as an `UnsupportedDelta` for the caller to handle or reject; this
/// migrator never emits a destructive statement.
pub fn plan_additive_migration(
    current: &Collection,
    desired: &Collection,
) -> (Vec<MigrationStep>, Vec<UnsupportedDelta>) {
    let deltas = current.diff(desired);
    let mut steps = Vec::new();
    let mut unsupported = Vec::new();

    for delta in deltas {
        match delta.kind {
            SchemaDeltaKind::FieldMissing => {
                let field_name = delta.field.clone().unwrap_or_default();
                let field = desired.field(&field_name);
                let description = match field {
                    Some(f) => format!("add field {field_name:?} ({:?})", f.field_type),
                    None => format!("add field {field_name:?}"),
                };
                steps.push(MigrationStep {
                    collection: desired.name.clone(),
                    field: field_name,
                    description,
                });
            }
            SchemaDeltaKind::CollectionKeyName
            | SchemaDeltaKind::CollectionKeyType
            | SchemaDeltaKind::FieldName
            | SchemaDeltaKind::FieldType
            | SchemaDeltaKind::FieldLength
            | SchemaDeltaKind::FieldProperty => {
                unsupported.push(UnsupportedDelta {
                    delta,
                    reason: "destructive or ambiguous change; additive migrator does not act on this",
                });
            }
        }
    }

    (steps, unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType};

    #[test]
    fn new_field_becomes_an_additive_step() {
        let current = Collection::new("users").with_field(Field::new("id", FieldType::Int).identity());
        let desired = current.clone().with_field(Field::new("age", FieldType::Int));

        let (steps, unsupported) = plan_additive_migration(&current, &desired);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].field, "age");
        assert!(unsupported.is_empty());
    }

    #[test]
    fn retyped_field_is_reported_as_unsupported_not_applied() {
        let current = Collection::new("users")
            .with_field(Field::new("id", FieldType::Int).identity())
            .with_field(Field::new("name", FieldType::String));
        let mut desired = current.clone();
        desired.fields[1] = Field::new("name", FieldType::Int);

        let (steps, unsupported) = plan_additive_migration(&current, &desired);
        assert!(steps.is_empty());
        assert_eq!(unsupported.len(), 1);
        assert_eq!(unsupported[0].delta.kind, SchemaDeltaKind::FieldType);
    }
}
