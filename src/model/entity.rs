//! Declarative table model: the durable form stored for diffing on the next apply.

use crate::model::ColumnType;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityModel {
    #[serde(default)]
    pub table_name: String,
    /// No uuid column and no (uuid, tenant) unique index.
    #[serde(default)]
    pub no_identity: bool,
    #[serde(default)]
    pub custom_columns: Vec<ColumnModel>,
    #[serde(default)]
    pub custom_indexes: Vec<IndexModel>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnModel {
    pub column_name: String,
    pub column_type: ColumnType,
    /// Only meaningful for `string` columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(default)]
    pub unique: bool,
    pub column_names: Vec<String>,
}

/// Reserved prefixes; indexes named this way are rebuilt from the model on every apply.
pub const UNIQUE_INDEX_PREFIX: &str = "uidx_";
pub const INDEX_PREFIX: &str = "idx_";

impl IndexModel {
    /// Explicit name, else `{uidx|idx}_{table}_{col1}_{col2}`.
    pub fn effective_name(&self, table: &str) -> String {
        match &self.index_name {
            Some(name) => name.clone(),
            None => derived_index_name(table, self.unique, &self.column_names),
        }
    }
}

pub fn derived_index_name(table: &str, unique: bool, columns: &[String]) -> String {
    let prefix = if unique { UNIQUE_INDEX_PREFIX } else { INDEX_PREFIX };
    format!("{}{}_{}", prefix, table, columns.join("_"))
}

/// Case-insensitive check for the reserved index naming convention.
pub fn is_reserved_index_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with(UNIQUE_INDEX_PREFIX) || lower.starts_with(INDEX_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_camel_case_model() {
        let json = r#"{
            "tableName": "orders",
            "noIdentity": false,
            "customColumns": [
                { "columnName": "number", "columnType": "string", "maxLength": 20, "nullable": false },
                { "columnName": "total", "columnType": "float" }
            ],
            "customIndexes": [ { "unique": true, "columnNames": ["number"] } ]
        }"#;
        let model: EntityModel = serde_json::from_str(json).unwrap();
        assert_eq!(model.table_name, "orders");
        assert_eq!(model.custom_columns[0].max_length, Some(20));
        assert!(!model.custom_columns[0].nullable);
        assert!(model.custom_columns[1].nullable);
        assert_eq!(model.custom_indexes[0].effective_name("orders"), "uidx_orders_number");
    }

    #[test]
    fn derives_plain_index_name() {
        let index = IndexModel {
            index_name: None,
            unique: false,
            column_names: vec!["customer".into(), "date".into()],
        };
        assert_eq!(index.effective_name("orders"), "idx_orders_customer_date");
    }

    #[test]
    fn recognizes_reserved_names() {
        assert!(is_reserved_index_name("IDX_orders_x"));
        assert!(is_reserved_index_name("uidx_orders_uuid_tenant_id"));
        assert!(!is_reserved_index_name("orders_pkey"));
    }
}
