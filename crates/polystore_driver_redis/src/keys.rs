//! Key-naming scheme: one Redis hash per record at
//! `{prefix.}{dataset}.{collection}:{id}`, plus a schema pointer at
//! `{prefix.}{dataset}.{collection}:__schema__` written once via `SET ... NX`
//! so concurrent `register_collection` calls agree on the same definition.

pub fn collection_prefix(prefix: &str, dataset: &str, collection: &str) -> String {
    if prefix.is_empty() {
        format!("{dataset}.{collection}")
    } else {
        format!("{prefix}.{dataset}.{collection}")
    }
}

pub fn record_key(prefix: &str, dataset: &str, collection: &str, id: &str) -> String {
    format!("{}:{}", collection_prefix(prefix, dataset, collection), id)
}

pub fn schema_key(prefix: &str, dataset: &str, collection: &str) -> String {
    format!("{}:__schema__", collection_prefix(prefix, dataset, collection))
}

pub fn scan_pattern(prefix: &str, dataset: &str, collection: &str) -> String {
    format!("{}:*", collection_prefix(prefix, dataset, collection))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_key_omits_empty_prefix() {
        assert_eq!(record_key("", "app", "users", "42"), "app.users:42");
    }

    #[test]
    fn record_key_includes_prefix_when_set() {
        assert_eq!(record_key("tenantA", "app", "users", "42"), "tenantA.app.users:42");
    }

    #[test]
    fn schema_key_is_scoped_per_collection() {
        assert_eq!(schema_key("", "app", "users"), "app.users:__schema__");
    }
}
