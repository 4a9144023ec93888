//! Translates a logical [`Filter`] into a Mongo query document, the document
//! analogue of `polystore_sql::SqlQueryGenerator` (same per-criterion
//! dispatch over [`Operator`], adapted from bound SQL placeholders to BSON
//! operator expressions).

use crate::types::value_to_bson;
use bson::{Bson, Document};
use polystore_core::{Collection, Criterion, Filter, Operator, SortDirection, Value};

/// Build the `$and`-joined match document for every criterion in `filter`.
/// An empty filter matches everything (`{}`).
pub fn filter_to_document(collection: &Collection, filter: &Filter) -> Document {
    if filter.criteria.is_empty() {
        return Document::new();
    }
    if filter.criteria.len() == 1 {
        return criterion_to_document(collection, &filter.criteria[0]);
    }
    let clauses: Vec<Bson> = filter
        .criteria
        .iter()
        .map(|c| Bson::Document(criterion_to_document(collection, c)))
        .collect();
    let mut doc = Document::new();
    doc.insert("$and", Bson::Array(clauses));
    doc
}

fn field_key(collection: &Collection, field: &str) -> String {
    if field == collection.identity_field {
        "_id".to_string()
    } else {
        field.to_string()
    }
}

fn criterion_to_document(collection: &Collection, criterion: &Criterion) -> Document {
    let key = field_key(collection, &criterion.field);
    let expr = operator_expr(criterion);

    let mut doc = Document::new();
    if criterion.not {
        let mut not_doc = Document::new();
        not_doc.insert("$not", Bson::Document(expr));
        doc.insert(key, not_doc);
    } else {
        doc.insert(key, expr);
    }
    doc
}

fn operator_expr(criterion: &Criterion) -> Document {
    let mut expr = Document::new();
    match criterion.operator {
        Operator::Is => {
            expr.insert("$eq", value_to_bson(&first_or_null(&criterion.values)));
        }
        Operator::Not => {
            expr.insert("$ne", value_to_bson(&first_or_null(&criterion.values)));
        }
        Operator::Lt => {
            expr.insert("$lt", value_to_bson(&first_or_null(&criterion.values)));
        }
        Operator::Lte => {
            expr.insert("$lte", value_to_bson(&first_or_null(&criterion.values)));
        }
        Operator::Gt => {
            expr.insert("$gt", value_to_bson(&first_or_null(&criterion.values)));
        }
        Operator::Gte => {
            expr.insert("$gte", value_to_bson(&first_or_null(&criterion.values)));
        }
        Operator::Prefix => {
            let pattern = format!("^{}", regex_escape(&text_or_empty(&criterion.values)));
            expr.insert("$regex", Bson::String(pattern));
        }
        Operator::Suffix => {
            let pattern = format!("{}$", regex_escape(&text_or_empty(&criterion.values)));
            expr.insert("$regex", Bson::String(pattern));
        }
        Operator::Contains | Operator::Fulltext => {
            expr.insert("$regex", Bson::String(regex_escape(&text_or_empty(&criterion.values))));
        }
        Operator::Range => {
            let lo = criterion.values.first().cloned().unwrap_or(Value::Null);
            let hi = criterion.values.get(1).cloned().unwrap_or(Value::Null);
            expr.insert("$gte", value_to_bson(&lo));
            expr.insert("$lte", value_to_bson(&hi));
        }
        Operator::Null => {
            expr.insert("$eq", Bson::Null);
        }
        Operator::NotNull => {
            expr.insert("$ne", Bson::Null);
        }
    }
    expr
}

fn first_or_null(values: &[Value]) -> Value {
    values.first().cloned().unwrap_or(Value::Null)
}

fn text_or_empty(values: &[Value]) -> String {
    values.first().and_then(Value::as_str).unwrap_or("").to_string()
}

fn regex_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Build the `.sort()` document; `None` when the filter declares no sort.
pub fn sort_document(collection: &Collection, filter: &Filter) -> Option<Document> {
    if filter.sort.is_empty() {
        return None;
    }
    let mut doc = Document::new();
    for sort in &filter.sort {
        let direction = match sort.direction {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        };
        doc.insert(field_key(collection, &sort.field), Bson::Int32(direction));
    }
    Some(doc)
}

/// Build the `.projection()` document; `None` means "all fields".
pub fn projection_document(collection: &Collection, filter: &Filter) -> Option<Document> {
    if filter.fields.is_empty() {
        return None;
    }
    let mut doc = Document::new();
    for field in &filter.fields {
        doc.insert(field_key(collection, field), Bson::Int32(1));
    }
    Some(doc)
}

/// Equality predicate identifying one record by its (possibly composite) id.
pub fn identity_filter(collection: &Collection, id: &[Value]) -> polystore_core::DbResult<Document> {
    let components = collection.build_identity_components(id)?;
    let mut doc = Document::new();
    for (name, value) in components {
        doc.insert(field_key(collection, &name), value_to_bson(&value));
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::{Field, FieldType};

    fn users() -> Collection {
        Collection::new("users")
            .with_field(Field::new("id", FieldType::String).identity())
            .with_field(Field::new("name", FieldType::String))
    }

    #[test]
    fn equality_criterion_renders_eq_expr() {
        let collection = users();
        let filter = Filter::new().with_criterion(Criterion::is("name", Value::Text("ada".into())));
        let doc = filter_to_document(&collection, &filter);
        assert_eq!(doc.get_document("name").unwrap().get_str("$eq").unwrap(), "ada");
    }

    #[test]
    fn identity_field_renders_as_underscore_id() {
        let collection = users();
        let filter = Filter::new().with_criterion(Criterion::is("id", Value::Text("abc".into())));
        let doc = filter_to_document(&collection, &filter);
        assert!(doc.contains_key("_id"));
    }

    #[test]
    fn negated_prefix_wraps_in_not() {
        let collection = users();
        let filter = Filter::new().with_criterion(Criterion::prefix("name", "spam").negated());
        let doc = filter_to_document(&collection, &filter);
        let not_doc = doc.get_document("name").unwrap().get_document("$not").unwrap();
        assert_eq!(not_doc.get_str("$regex").unwrap(), "^spam");
    }

    #[test]
    fn multiple_criteria_join_with_and() {
        let collection = users();
        let filter = Filter::new()
            .with_criterion(Criterion::is("name", Value::Text("ada".into())))
            .with_criterion(Criterion::new("id", Operator::NotNull, vec![]));
        let doc = filter_to_document(&collection, &filter);
        assert_eq!(doc.get_array("$and").unwrap().len(), 2);
    }
}
