use crate::value::Value;
use std::collections::BTreeMap;

/// A single typed datum: an identity plus an unordered field map.
///
/// `id` may be a scalar (`Value`) or, for composite-key collections, an
/// ordered vector of `Value`s matching `Collection::key_fields()`.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub id: Vec<Value>,
    pub fields: BTreeMap<String, Value>,
    pub error: Option<String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: Value) -> Self {
        Self {
            id: vec![id],
            fields: BTreeMap::new(),
            error: None,
        }
    }

    pub fn with_composite_id(id: Vec<Value>) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            id: Vec::new(),
            fields: BTreeMap::new(),
            error: Some(message.into()),
        }
    }

    pub fn scalar_id(&self) -> Option<&Value> {
        if self.id.len() == 1 {
            self.id.first()
        } else {
            None
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Write a value at a dot/bracket path, materializing intermediate maps
    /// and arrays as needed (`a.b[0].c`). Only the leaf segment may be an
    /// array index in this implementation; intermediate segments are always
    /// object keys, which is sufficient for the relationship resolver's use
    /// (composite paths produced by its own tree walk never nest arrays of
    /// arrays).
    pub fn set_nested(&mut self, path: &str, value: Value) {
        let segments = parse_path(path);
        if segments.is_empty() {
            return;
        }
        set_nested_in_map(&mut self.fields, &segments, value);
    }

    pub fn get_nested(&self, path: &str) -> Option<&Value> {
        let segments = parse_path(path);
        let (first, rest) = segments.split_first()?;
        let mut current = self.fields.get(first.as_field()?)?;
        for segment in rest {
            current = match segment {
                PathSegment::Field(name) => match current {
                    Value::Object(map) => map.get(name)?,
                    _ => return None,
                },
                PathSegment::Index(i) => match current {
                    Value::Array(items) => items.get(*i)?,
                    _ => return None,
                },
            };
        }
        Some(current)
    }
}

#[derive(Debug, Clone)]
enum PathSegment {
    Field(String),
    Index(usize),
}

impl PathSegment {
    fn as_field(&self) -> Option<&str> {
        match self {
            PathSegment::Field(s) => Some(s),
            PathSegment::Index(_) => None,
        }
    }
}

fn parse_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    for raw in path.split('.') {
        let mut remainder = raw;
        if let Some(bracket) = remainder.find('[') {
            let (field, rest) = remainder.split_at(bracket);
            if !field.is_empty() {
                segments.push(PathSegment::Field(field.to_string()));
            }
            remainder = rest;
            while let Some(close) = remainder.find(']') {
                let idx_str = &remainder[1..close];
                if let Ok(idx) = idx_str.parse::<usize>() {
                    segments.push(PathSegment::Index(idx));
                }
                remainder = &remainder[close + 1..];
            }
        } else {
            segments.push(PathSegment::Field(remainder.to_string()));
        }
    }
    segments
}

fn set_nested_in_map(map: &mut BTreeMap<String, Value>, segments: &[PathSegment], value: Value) {
    let (first, rest) = match segments.split_first() {
        Some(pair) => pair,
        None => return,
    };
    let Some(field) = first.as_field() else {
        return;
    };

    if rest.is_empty() {
        map.insert(field.to_string(), value);
        return;
    }

    let entry = map
        .entry(field.to_string())
        .or_insert_with(|| default_for(&rest[0]));
    set_nested_in_value(entry, rest, value);
}

fn set_nested_in_value(current: &mut Value, segments: &[PathSegment], value: Value) {
    let (first, rest) = match segments.split_first() {
        Some(pair) => pair,
        None => return,
    };

    match first {
        PathSegment::Field(name) => {
            if !matches!(current, Value::Object(_)) {
                *current = Value::Object(BTreeMap::new());
            }
            if let Value::Object(map) = current {
                if rest.is_empty() {
                    map.insert(name.clone(), value);
                } else {
                    let entry = map
                        .entry(name.clone())
                        .or_insert_with(|| default_for(&rest[0]));
                    set_nested_in_value(entry, rest, value);
                }
            }
        }
        PathSegment::Index(idx) => {
            if !matches!(current, Value::Array(_)) {
                *current = Value::Array(Vec::new());
            }
            if let Value::Array(items) = current {
                while items.len() <= *idx {
                    items.push(Value::Null);
                }
                if rest.is_empty() {
                    items[*idx] = value;
                } else {
                    set_nested_in_value(&mut items[*idx], rest, value);
                }
            }
        }
    }
}

fn default_for(next: &PathSegment) -> Value {
    match next {
        PathSegment::Field(_) => Value::Object(BTreeMap::new()),
        PathSegment::Index(_) => Value::Array(Vec::new()),
    }
}

/// A page of records plus pagination metadata, the unit returned by every
/// query-shaped operation (`DefaultQueryImplementation`, `Aggregator::group_by`).
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub records: Vec<Record>,
    /// Total matching rows if known, else `None` ("unknown size").
    pub result_count: Option<u64>,
    pub known_size: bool,
    pub total_pages: u64,
    pub page: u64,
    pub records_per_page: u64,
}

impl RecordSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        let count = records.len() as u64;
        Self {
            records,
            result_count: Some(count),
            known_size: true,
            total_pages: 1,
            page: 1,
            records_per_page: count.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_nested_materializes_array_index() {
        let mut record = Record::new();
        record.set_nested("a.b[0].c", Value::Int(7));
        assert_eq!(record.get_nested("a.b[0].c"), Some(&Value::Int(7)));
    }

    #[test]
    fn set_nested_overwrites_existing_leaf() {
        let mut record = Record::new();
        record.set("name", Value::Text("old".into()));
        record.set_nested("name", Value::Text("new".into()));
        assert_eq!(record.get("name"), Some(&Value::Text("new".into())));
    }
}
