//! Plan of named database object changes between two tenant models.

use crate::model::{DatabaseObjectModel, ObjectKind, TenantModel};

#[derive(Clone, Debug, PartialEq)]
pub enum ObjectAction<'a> {
    Drop { kind: ObjectKind, name: &'a str },
    /// `replace` drops the previous definition before the new one runs.
    Apply {
        object: &'a DatabaseObjectModel,
        replace: bool,
    },
}

/// Drops in [`ObjectKind::DROP_ORDER`], then applies in [`ObjectKind::APPLY_ORDER`].
///
/// An object is dropped when its name disappears from the model for its kind. It is applied
/// when flagged `execute` and either new or changed; when `tracks_text` is false every flagged
/// object is applied. Statements are never dropped and always run when flagged.
pub fn plan_objects<'a>(previous: &'a TenantModel, next: &'a TenantModel, tracks_text: bool) -> Vec<ObjectAction<'a>> {
    let mut actions = Vec::new();
    for kind in ObjectKind::DROP_ORDER {
        for old in previous.objects_of(kind) {
            if next.find(kind, &old.name).is_none() {
                actions.push(ObjectAction::Drop { kind, name: &old.name });
            }
        }
    }
    for kind in ObjectKind::APPLY_ORDER {
        for object in next.objects_of(kind).filter(|o| o.execute) {
            if kind == ObjectKind::Statement {
                actions.push(ObjectAction::Apply { object, replace: false });
                continue;
            }
            match previous.find(kind, &object.name) {
                None => actions.push(ObjectAction::Apply { object, replace: false }),
                Some(old) if !tracks_text || old.sql != object.sql => {
                    actions.push(ObjectAction::Apply { object, replace: true })
                }
                Some(_) => {}
            }
        }
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(kind: ObjectKind, name: &str, sql: &str, execute: bool) -> DatabaseObjectModel {
        DatabaseObjectModel {
            name: name.into(),
            kind,
            sql: sql.into(),
            execute,
        }
    }

    fn model(objects: Vec<DatabaseObjectModel>) -> TenantModel {
        TenantModel {
            database_objects: objects,
            ..TenantModel::default()
        }
    }

    #[test]
    fn drops_removed_objects_in_dependency_order() {
        let previous = model(vec![
            object(ObjectKind::Type, "status", "t", true),
            object(ObjectKind::View, "v_open", "v", true),
            object(ObjectKind::Function, "f_total", "f", true),
            object(ObjectKind::Statement, "seed", "s", true),
        ]);
        let next = model(vec![]);
        let plan = plan_objects(&previous, &next, true);
        assert_eq!(
            plan,
            vec![
                ObjectAction::Drop { kind: ObjectKind::View, name: "v_open" },
                ObjectAction::Drop { kind: ObjectKind::Function, name: "f_total" },
                ObjectAction::Drop { kind: ObjectKind::Type, name: "status" },
            ]
        );
    }

    #[test]
    fn applies_new_and_changed_objects_only() {
        let previous = model(vec![
            object(ObjectKind::View, "same", "select 1", true),
            object(ObjectKind::View, "changed", "select 1", true),
        ]);
        let next = model(vec![
            object(ObjectKind::View, "same", "select 1", true),
            object(ObjectKind::View, "changed", "select 2", true),
            object(ObjectKind::View, "staged", "select 3", false),
            object(ObjectKind::Type, "fresh", "create type", true),
        ]);
        let plan = plan_objects(&previous, &next, true);
        assert_eq!(plan.len(), 2);
        assert!(matches!(plan[0], ObjectAction::Apply { object, replace: false } if object.name == "fresh"));
        assert!(matches!(plan[1], ObjectAction::Apply { object, replace: true } if object.name == "changed"));
    }

    #[test]
    fn reapplies_everything_without_text_tracking() {
        let objects = vec![
            object(ObjectKind::Function, "f", "body", true),
            object(ObjectKind::Statement, "seed", "insert", true),
        ];
        let previous = model(objects.clone());
        let next = model(objects);
        let plan = plan_objects(&previous, &next, false);
        assert_eq!(plan.len(), 2);
        assert!(matches!(plan[0], ObjectAction::Apply { replace: true, .. }));
        assert!(matches!(plan[1], ObjectAction::Apply { replace: false, .. }));
        assert_eq!(plan_objects(&previous, &next, true).len(), 1);
    }

    #[test]
    fn name_match_is_per_kind() {
        let previous = model(vec![object(ObjectKind::View, "orders", "v", true)]);
        let next = model(vec![object(ObjectKind::Table, "orders", "{}", true)]);
        let plan = plan_objects(&previous, &next, true);
        assert_eq!(plan[0], ObjectAction::Drop { kind: ObjectKind::View, name: "orders" });
        assert!(matches!(plan[1], ObjectAction::Apply { replace: false, .. }));
    }
}
