//! Table-naming scheme: one DynamoDB table per collection, named
//! `{prefix.}{dataset}.{collection}` — the same dotted namespace the Redis
//! driver uses for its key prefix, just applied to a table name instead of a
//! per-record key.

pub fn table_name(prefix: &str, dataset: &str, collection: &str) -> String {
    if prefix.is_empty() {
        format!("{dataset}.{collection}")
    } else {
        format!("{prefix}.{dataset}.{collection}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_omits_empty_prefix() {
        assert_eq!(table_name("", "app", "users"), "app.users");
    }

    #[test]
    fn table_name_includes_prefix_when_set() {
        assert_eq!(table_name("tenantA", "app", "users"), "tenantA.app.users");
    }
}
