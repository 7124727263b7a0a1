//! Declarative tenant model: named database objects applied in dependency order.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default)]
    pub database_objects: Vec<DatabaseObjectModel>,
}

impl TenantModel {
    pub fn objects_of(&self, kind: ObjectKind) -> impl Iterator<Item = &DatabaseObjectModel> {
        self.database_objects.iter().filter(move |o| o.kind == kind)
    }

    pub fn find(&self, kind: ObjectKind, name: &str) -> Option<&DatabaseObjectModel> {
        self.objects_of(kind).find(|o| o.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Table,
    View,
    Function,
    Type,
    Statement,
}

impl ObjectKind {
    /// Drop order: dependents before dependencies.
    pub const DROP_ORDER: [ObjectKind; 4] = [
        ObjectKind::View,
        ObjectKind::Table,
        ObjectKind::Function,
        ObjectKind::Type,
    ];

    /// Create/alter order. Statements run last, in model order.
    pub const APPLY_ORDER: [ObjectKind; 5] = [
        ObjectKind::Type,
        ObjectKind::Function,
        ObjectKind::Table,
        ObjectKind::View,
        ObjectKind::Statement,
    ];
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseObjectModel {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    /// DDL text; for `table` objects the serialized [`crate::model::EntityModel`].
    pub sql: String,
    /// When false the definition is stored but not applied this pass.
    #[serde(default)]
    pub execute: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_tenant_model() {
        let json = r#"{
            "schema": "acme",
            "databaseObjects": [
                { "name": "status", "type": "type", "sql": "CREATE TYPE ...", "execute": true },
                { "name": "open_orders", "type": "view", "sql": "CREATE VIEW ..." }
            ]
        }"#;
        let model: TenantModel = serde_json::from_str(json).unwrap();
        assert_eq!(model.schema.as_deref(), Some("acme"));
        assert_eq!(model.database_objects[0].kind, ObjectKind::Type);
        assert!(!model.database_objects[1].execute);
        assert!(model.find(ObjectKind::View, "OPEN_ORDERS").is_some());
        assert!(model.find(ObjectKind::Table, "open_orders").is_none());
    }
}
