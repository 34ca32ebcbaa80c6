use test_case::test_case;
use uuid::Uuid;

use super::*;
use crate::{
    domain::{EnumValue, Item, Value},
    storage::MemoryModel,
};

const BASE: &str = r"
metadata: {tool: RM Tool, revision: '1', connector: test}
modules:
  - id: m
    long_name: Module
    enum_types:
      type:
        long_name: Type
        values:
          - {id: functional, long_name: Functional}
          - {id: unset, long_name: Unset}
      tags:
        long_name: Tags
        values:
          - {id: a, long_name: A}
          - {id: b, long_name: B}
          - {id: c, long_name: C}
    requirement_types:
      sys:
        long_name: System Requirement
        attributes:
          capellaID: {long_name: Capella ID, type: String}
          submittedAt: {long_name: Submitted At, type: Date}
          type: {long_name: Type, type: Enum, enum_type: type}
          tags: {long_name: Tags, type: Enum, enum_type: tags, multi_valued: true}
          priority: {long_name: Priority, type: Integer}
    items:
      - id: F-1
        long_name: Functional Requirements
        children:
          - id: REQ-1
            long_name: First
            text: first text
            type: sys
            attributes:
              capellaID: R-1
              type: [functional]
              tags: [a, b]
              priority: 1
              submittedAt: '2022-06-30T15:07:18Z'
          - id: REQ-2
            long_name: Second
            type: sys
            attributes:
              type: [unset]
      - id: REQ-3
        long_name: Top level
";

fn base() -> Snapshot {
    serde_yaml::from_str(BASE).unwrap()
}

fn empty_model() -> MemoryModel {
    let mut model = MemoryModel::new();
    model.add_module("m", "Module");
    model
}

fn run(snapshot: &Snapshot, model: &MemoryModel, mode: Mode) -> Reconciliation {
    let mut config = Config::default();
    config.set_mode(mode);
    reconcile(snapshot, model, &config).unwrap()
}

/// A model that the base snapshot has already been synchronized into.
fn synced() -> MemoryModel {
    let mut model = empty_model();
    let reconciliation = run(&base(), &model, Mode::Strict);
    assert!(reconciliation.diagnostics.is_empty(), "{:?}", reconciliation.diagnostics);
    model.apply(&reconciliation.change_set).unwrap();
    model
}

fn actions(reconciliation: &Reconciliation) -> Vec<&ChangeAction> {
    reconciliation.change_set.actions().collect()
}

fn uuid_of(model: &MemoryModel, identifier: &str) -> Uuid {
    model.find_item(identifier).unwrap().uuid
}

fn find_item<'a>(items: &'a mut [Item], id: &str) -> Option<&'a mut Item> {
    for item in items {
        if item.id.as_str() == id {
            return Some(item);
        }
        if let Some(found) = find_item(&mut item.children, id) {
            return Some(found);
        }
    }
    None
}

fn item<'a>(snapshot: &'a mut Snapshot, id: &str) -> &'a mut Item {
    find_item(&mut snapshot.modules[0].items, id).unwrap()
}

fn promise(key: &str) -> Reference {
    Reference::Promise(PromiseRef::new(key.to_string()))
}

/// Position of the action creating `key`.
fn creation_of(actions: &[&ChangeAction], key: &str) -> Option<usize> {
    actions.iter().position(|action| {
        matches!(action, ChangeAction::Create { promise, .. } if promise.key() == key)
    })
}

/// Position of the first action modifying `target`.
fn modification_of(actions: &[&ChangeAction], target: &Reference) -> Option<usize> {
    actions.iter().position(|action| {
        matches!(action, ChangeAction::Modify { target: t, .. } if t == target)
    })
}

/// Applies the reconciliation and checks that a second run has nothing to do.
fn assert_converges(snapshot: &Snapshot, mut model: MemoryModel, mode: Mode) {
    let first = run(snapshot, &model, mode);
    model.apply(&first.change_set).unwrap();
    let second = run(snapshot, &model, mode);
    assert!(
        second.change_set.is_empty(),
        "second run still has actions: {:#?}",
        actions(&second)
    );
}

#[test]
fn initial_sync_creates_everything_in_dependency_order() {
    let model = empty_model();
    let reconciliation = run(&base(), &model, Mode::Strict);

    assert!(reconciliation.diagnostics.is_empty());
    let actions: Vec<ChangeAction> = reconciliation.change_set.actions().cloned().collect();
    assert_eq!(promise::find_dangling_promise(&actions), None);

    let kinds: Vec<EntityKind> = actions
        .iter()
        .map(|action| match action {
            ChangeAction::Create { entity, .. } => entity.kind(),
            other => panic!("unexpected action {other:?}"),
        })
        .collect();
    assert_eq!(kinds[0], EntityKind::TypesFolder);
    let first_item = kinds
        .iter()
        .position(|kind| !kind.is_type_system())
        .unwrap();
    assert!(kinds[first_item..].iter().all(|kind| !kind.is_type_system()));
    assert_eq!(
        ActionCounts::tally(&actions),
        ActionCounts {
            created: 4,
            updated: 0,
            deleted: 0,
            // folder + 2 enum types + 5 values + 1 requirement type + 5 attributes
            type_changes: 14,
        }
    );
}

#[test]
fn types_folder_uses_configured_name() {
    let model = empty_model();
    let config: Config =
        toml::from_str("_version = \"1\"\ntypes_folder_name = \"Definitions\"").unwrap();
    let reconciliation = reconcile(&base(), &model, &config).unwrap();

    assert!(matches!(
        actions(&reconciliation)[0],
        ChangeAction::Create {
            entity: Entity::TypesFolder { long_name },
            ..
        } if long_name == "Definitions"
    ));
}

#[test]
fn second_run_is_a_no_op() {
    let model = synced();
    let reconciliation = run(&base(), &model, Mode::Strict);

    assert!(reconciliation.change_set.is_empty());
    assert!(reconciliation.diagnostics.is_empty());
}

#[test]
fn single_attribute_change_is_one_modify() {
    let model = synced();
    let mut snapshot = base();
    item(&mut snapshot, "REQ-1")
        .attributes
        .insert("priority".into(), Value::Int(2));

    let reconciliation = run(&snapshot, &model, Mode::Strict);
    let actions = actions(&reconciliation);

    assert_eq!(actions.len(), 1);
    let ChangeAction::Modify { target, changes } = actions[0] else {
        panic!("expected a modify, got {:?}", actions[0]);
    };
    assert_eq!(*target, Reference::Existing(uuid_of(&model, "REQ-1")));
    assert!(matches!(
        changes.as_slice(),
        [FieldChange::Attribute {
            attribute,
            value: Some(AssignedValue::Primitive(Value::Int(2))),
            ..
        }] if attribute == "priority"
    ));
}

#[test]
fn multi_valued_enums_compare_as_sets() {
    let model = synced();
    let mut snapshot = base();
    item(&mut snapshot, "REQ-1").attributes.insert(
        "tags".into(),
        Value::EnumRefs(vec!["b".into(), "a".into()]),
    );

    assert!(run(&snapshot, &model, Mode::Strict).change_set.is_empty());
}

#[test]
fn new_enum_value_is_created_before_use() {
    let model = synced();
    let mut snapshot = base();
    snapshot.modules[0]
        .enum_types
        .get_mut("type")
        .unwrap()
        .values
        .push(EnumValue {
            id: "nonFunctional".into(),
            long_name: "Non-functional".into(),
        });
    item(&mut snapshot, "REQ-1").attributes.insert(
        "type".into(),
        Value::EnumRefs(vec!["nonFunctional".into()]),
    );

    let reconciliation = run(&snapshot, &model, Mode::Strict);
    let actions = actions(&reconciliation);

    let created = creation_of(&actions, "EnumValue type nonFunctional").unwrap();
    let req_1 = Reference::Existing(uuid_of(&model, "REQ-1"));
    let modified = modification_of(&actions, &req_1).unwrap();
    assert!(created < modified);

    let ChangeAction::Modify { changes, .. } = actions[modified] else {
        unreachable!()
    };
    assert!(matches!(
        changes.as_slice(),
        [FieldChange::Attribute { value: Some(AssignedValue::Enum(values)), .. }]
            if *values == vec![promise("EnumValue type nonFunctional")]
    ));
    assert_converges(&snapshot, model, Mode::Strict);
}

#[test]
fn removed_item_is_deleted_once() {
    let model = synced();
    let mut snapshot = base();
    snapshot.modules[0].items[0].children.remove(1);

    let reconciliation = run(&snapshot, &model, Mode::Strict);

    assert_eq!(
        actions(&reconciliation),
        vec![&ChangeAction::Delete {
            target: Reference::Existing(uuid_of(&model, "REQ-2"))
        }]
    );
}

#[test]
fn removed_folder_deletes_children_first() {
    let model = synced();
    let mut snapshot = base();
    snapshot.modules[0].items.remove(0);

    let reconciliation = run(&snapshot, &model, Mode::Strict);

    let expected: Vec<_> = ["REQ-1", "REQ-2", "F-1"]
        .into_iter()
        .map(|id| ChangeAction::Delete {
            target: Reference::Existing(uuid_of(&model, id)),
        })
        .collect();
    assert_eq!(
        reconciliation.change_set.actions().cloned().collect::<Vec<_>>(),
        expected
    );
}

#[test]
fn moved_item_is_extended_under_new_parent() {
    let model = synced();
    let mut snapshot = base();
    let moved = snapshot.modules[0].items[0].children.remove(1);
    snapshot.modules[0].items.push(moved);

    let module = model.find_module("m").unwrap();
    let reconciliation = run(&snapshot, &model, Mode::Strict);

    assert_eq!(
        actions(&reconciliation),
        vec![&ChangeAction::Extend {
            target: Reference::Existing(module.uuid),
            children: vec![Reference::Existing(uuid_of(&model, "REQ-2"))],
        }]
    );
    assert_converges(&snapshot, model, Mode::Strict);
}

#[test]
fn kind_conflict_recreates_node() {
    let model = synced();
    let mut snapshot = base();
    let child: Item = serde_yaml::from_str("{id: REQ-4, long_name: Child}").unwrap();
    item(&mut snapshot, "REQ-3").children.push(child);

    let reconciliation = run(&snapshot, &model, Mode::Strict);

    assert_eq!(reconciliation.diagnostics.len(), 1);
    assert_eq!(reconciliation.diagnostics[0].code, "StructuralKindConflict");
    assert_eq!(reconciliation.diagnostics[0].severity, Severity::Info);

    let actions = actions(&reconciliation);
    assert!(matches!(
        actions[0],
        ChangeAction::Create { promise, entity: Entity::Folder(_), .. }
            if promise.key() == "Folder REQ-3"
    ));
    assert!(matches!(
        actions[1],
        ChangeAction::Create { parent, .. } if *parent == promise("Folder REQ-3")
    ));
    assert_eq!(
        *actions[2],
        ChangeAction::Delete {
            target: Reference::Existing(uuid_of(&model, "REQ-3"))
        }
    );
    assert_converges(&snapshot, model, Mode::Strict);
}

#[test]
fn absent_attribute_is_unset() {
    let model = synced();
    let mut snapshot = base();
    item(&mut snapshot, "REQ-1").attributes.remove("priority");

    let reconciliation = run(&snapshot, &model, Mode::Strict);
    let actions = actions(&reconciliation);

    assert!(matches!(
        actions.as_slice(),
        [ChangeAction::Modify { changes, .. }] if matches!(
            changes.as_slice(),
            [FieldChange::Attribute { attribute, value: None, .. }] if attribute == "priority"
        )
    ));
    assert_converges(&snapshot, model, Mode::Strict);
}

#[test]
fn requirement_type_change_sets_every_value() {
    let model = synced();
    let mut snapshot: Snapshot = base();
    let usr = serde_yaml::from_str(
        "
long_name: User Requirement
attributes:
  priority: {long_name: Priority, type: Integer}
",
    )
    .unwrap();
    snapshot.modules[0]
        .requirement_types
        .insert("usr".into(), usr);
    let req = item(&mut snapshot, "REQ-2");
    req.requirement_type = Some("usr".into());
    req.attributes.clear();
    req.attributes.insert("priority".into(), Value::Int(5));

    let reconciliation = run(&snapshot, &model, Mode::Strict);
    let modify = actions(&reconciliation)
        .into_iter()
        .find_map(|action| match action {
            ChangeAction::Modify { target, changes }
                if *target == Reference::Existing(uuid_of(&model, "REQ-2")) =>
            {
                Some(changes.clone())
            }
            _ => None,
        })
        .unwrap();

    assert_eq!(
        modify,
        vec![
            FieldChange::RequirementType(Some(promise("RequirementType usr"))),
            FieldChange::Attribute {
                attribute: "priority".into(),
                definition: promise("AttributeDefinition priority usr"),
                value: Some(AssignedValue::Primitive(Value::Int(5))),
            },
        ]
    );
    assert_converges(&snapshot, model, Mode::Strict);
}

#[test]
fn attribute_kind_change_recreates_definition() {
    let model = synced();
    let mut snapshot = base();
    snapshot.modules[0]
        .requirement_types
        .get_mut("sys")
        .unwrap()
        .attributes
        .get_mut("priority")
        .unwrap()
        .kind = crate::domain::AttributeKind::String;
    item(&mut snapshot, "REQ-1")
        .attributes
        .insert("priority".into(), Value::Str("high".into()));

    let reconciliation = run(&snapshot, &model, Mode::Strict);
    let actions = actions(&reconciliation);

    assert!(matches!(actions[0], ChangeAction::Delete { .. }));
    assert!(matches!(
        actions[1],
        ChangeAction::Create { promise, .. } if promise.key() == "AttributeDefinition priority sys"
    ));
    assert!(matches!(
        actions[2],
        ChangeAction::Modify { changes, .. } if matches!(
            changes.as_slice(),
            [FieldChange::Attribute {
                definition,
                value: Some(AssignedValue::Primitive(Value::Str(_))),
                ..
            }] if *definition == promise("AttributeDefinition priority sys")
        )
    ));
    assert_converges(&snapshot, model, Mode::Strict);
}

#[test]
fn type_deletes_follow_item_deletes() {
    let model = synced();
    let mut snapshot = base();
    let module = &mut snapshot.modules[0];
    module.enum_types.remove("tags");
    module
        .requirement_types
        .get_mut("sys")
        .unwrap()
        .attributes
        .remove("tags");
    module.items.remove(1);
    item(&mut snapshot, "REQ-1").attributes.remove("tags");

    let reconciliation = run(&snapshot, &model, Mode::Strict);
    let actions = actions(&reconciliation);

    assert_eq!(actions.len(), 3);
    assert_eq!(
        *actions[0],
        ChangeAction::Delete {
            target: Reference::Existing(uuid_of(&model, "REQ-3"))
        }
    );
    assert!(actions[1..]
        .iter()
        .all(|action| matches!(action, ChangeAction::Delete { .. })));
    assert_converges(&snapshot, model, Mode::Strict);
}

#[test]
fn unused_enum_value_is_deleted() {
    let model = synced();
    let mut snapshot = base();
    snapshot.modules[0]
        .enum_types
        .get_mut("tags")
        .unwrap()
        .values
        .retain(|value| value.id != "c");

    let reconciliation = run(&snapshot, &model, Mode::Strict);

    assert!(reconciliation.diagnostics.is_empty());
    assert!(matches!(
        actions(&reconciliation).as_slice(),
        [ChangeAction::Delete { .. }]
    ));
    assert_converges(&snapshot, model, Mode::Strict);
}

#[test]
fn enum_value_still_in_use_aborts_strict_module() {
    let model = synced();
    let mut snapshot = base();
    snapshot.modules[0]
        .enum_types
        .get_mut("type")
        .unwrap()
        .values
        .retain(|value| value.id != "unset");
    item(&mut snapshot, "REQ-2")
        .attributes
        .insert("type".into(), Value::EnumRefs(vec!["functional".into()]));

    let reconciliation = run(&snapshot, &model, Mode::Strict);

    assert!(reconciliation.change_set.is_empty());
    assert_eq!(reconciliation.diagnostics.len(), 1);
    assert_eq!(reconciliation.diagnostics[0].code, "EnumValueInUse");
    assert!(reconciliation.diagnostics[0].message.contains("REQ-2"));
}

#[test]
fn unknown_module_is_skipped() {
    let model = synced();
    let mut snapshot = base();
    snapshot.modules[0].id = "X".parse().unwrap();

    let reconciliation = run(&snapshot, &model, Mode::Strict);

    assert!(!reconciliation.change_set.contains_module("X"));
    assert_eq!(reconciliation.diagnostics.len(), 1);
    assert_eq!(reconciliation.diagnostics[0].code, "UnknownModule");
    assert!(!reconciliation.has_errors());
}

#[test_case(Mode::Strict; "strict")]
#[test_case(Mode::Force; "force")]
fn undeclared_enum_value(mode: Mode) {
    let model = synced();
    let mut snapshot = base();
    let req = item(&mut snapshot, "REQ-1");
    req.long_name = "First, renamed".into();
    req.attributes
        .insert("type".into(), Value::EnumRefs(vec!["bogus".into()]));

    let reconciliation = run(&snapshot, &model, mode);

    assert_eq!(reconciliation.diagnostics.len(), 1);
    assert_eq!(reconciliation.diagnostics[0].code, "UndefinedEnumValue");
    match mode {
        Mode::Strict => {
            assert!(reconciliation.change_set.is_empty());
            assert!(reconciliation.has_errors());
        }
        Mode::Force => {
            assert_eq!(reconciliation.diagnostics[0].severity, Severity::Warning);
            assert_eq!(
                actions(&reconciliation),
                vec![&ChangeAction::Modify {
                    target: Reference::Existing(uuid_of(&model, "REQ-1")),
                    changes: vec![FieldChange::LongName("First, renamed".into())],
                }]
            );
        }
    }
}

#[test_case(Value::Str("one".into()), "PrimitiveTypeMismatch"; "string for integer")]
#[test_case(Value::EnumRefs(vec!["a".into()]), "PrimitiveTypeMismatch"; "enum for integer")]
fn mistyped_values_are_rejected(value: Value, code: &str) {
    let model = synced();
    let mut snapshot = base();
    item(&mut snapshot, "REQ-1")
        .attributes
        .insert("priority".into(), value);

    let reconciliation = run(&snapshot, &model, Mode::Force);

    assert_eq!(reconciliation.diagnostics[0].code, code);
    assert!(reconciliation.change_set.is_empty());
}

#[test]
fn single_valued_enum_requires_one_value() {
    let model = synced();
    let mut snapshot = base();
    item(&mut snapshot, "REQ-1").attributes.insert(
        "type".into(),
        Value::EnumRefs(vec!["functional".into(), "unset".into()]),
    );

    let reconciliation = run(&snapshot, &model, Mode::Force);

    assert_eq!(reconciliation.diagnostics.len(), 1);
    assert_eq!(reconciliation.diagnostics[0].code, "InvalidCardinality");
}

#[test]
fn undefined_attribute_is_reported() {
    let model = synced();
    let mut snapshot = base();
    item(&mut snapshot, "REQ-1")
        .attributes
        .insert("owner".into(), Value::Str("me".into()));
    item(&mut snapshot, "REQ-3")
        .attributes
        .insert("owner".into(), Value::Str("me".into()));

    let reconciliation = run(&snapshot, &model, Mode::Force);

    let codes: Vec<_> = reconciliation
        .diagnostics
        .iter()
        .map(|diagnostic| (diagnostic.code.as_str(), diagnostic.node_id.as_deref()))
        .collect();
    assert_eq!(
        codes,
        vec![
            ("UndefinedAttribute", Some("REQ-1")),
            ("UndefinedAttribute", Some("REQ-3"))
        ]
    );
    assert!(reconciliation.change_set.is_empty());
}

#[test]
fn undeclared_requirement_type_in_force_mode_creates_untyped_node() {
    let model = synced();
    let mut snapshot = base();
    let new: Item = serde_yaml::from_str(
        "{id: REQ-9, long_name: New, type: nope, attributes: {priority: 3}}",
    )
    .unwrap();
    snapshot.modules[0].items.push(new);

    let reconciliation = run(&snapshot, &model, Mode::Force);

    assert_eq!(reconciliation.diagnostics.len(), 1);
    assert_eq!(reconciliation.diagnostics[0].code, "UndefinedTypeReference");
    let actions = actions(&reconciliation);
    assert!(matches!(
        actions.as_slice(),
        [ChangeAction::Create { entity: Entity::Requirement(fields), .. }]
            if fields.requirement_type.is_none() && fields.attributes.is_empty()
    ));
}

#[test]
fn enum_attribute_with_undeclared_enumeration_is_skipped() {
    let model = empty_model();
    let mut snapshot = base();
    snapshot.modules[0]
        .requirement_types
        .get_mut("sys")
        .unwrap()
        .attributes
        .get_mut("tags")
        .unwrap()
        .kind = crate::domain::AttributeKind::Enum {
        enum_type: "missing".into(),
        multi_valued: true,
    };

    let reconciliation = run(&snapshot, &model, Mode::Force);

    // Reported once for the definition, not again for REQ-1's value.
    assert_eq!(reconciliation.diagnostics.len(), 1);
    assert_eq!(reconciliation.diagnostics[0].code, "UndefinedTypeReference");
    assert!(!reconciliation.change_set.actions().any(|action| matches!(
        action,
        ChangeAction::Create { promise, .. } if promise.key() == "AttributeDefinition tags sys"
    )));
}

#[test]
fn duplicate_item_identifiers_abort_strict_module() {
    let model = synced();
    let mut snapshot = base();
    let duplicate: Item = serde_yaml::from_str("{id: REQ-3, long_name: Again}").unwrap();
    snapshot.modules[0].items.push(duplicate);

    let reconciliation = run(&snapshot, &model, Mode::Strict);

    assert!(reconciliation.change_set.is_empty());
    assert_eq!(reconciliation.diagnostics[0].code, "DuplicateIdentifier");
}

#[test]
fn duplicate_enum_values_are_reported() {
    let model = empty_model();
    let mut snapshot = base();
    snapshot.modules[0]
        .enum_types
        .get_mut("tags")
        .unwrap()
        .values
        .push(EnumValue {
            id: "a".into(),
            long_name: "A again".into(),
        });

    let reconciliation = run(&snapshot, &model, Mode::Force);

    assert_eq!(reconciliation.diagnostics.len(), 1);
    assert_eq!(reconciliation.diagnostics[0].code, "DuplicateIdentifier");
    assert_eq!(
        reconciliation
            .change_set
            .actions()
            .filter(|action| matches!(
                action,
                ChangeAction::Create { promise, .. } if promise.key() == "EnumValue tags a"
            ))
            .count(),
        1
    );
}

#[test]
fn module_long_name_is_updated() {
    let model = synced();
    let mut snapshot = base();
    snapshot.modules[0].long_name = Some("Renamed".into());

    let reconciliation = run(&snapshot, &model, Mode::Strict);
    let module = model.find_module("m").unwrap();

    assert_eq!(
        actions(&reconciliation),
        vec![&ChangeAction::Modify {
            target: Reference::Existing(module.uuid),
            changes: vec![FieldChange::LongName("Renamed".into())],
        }]
    );
}

#[test]
fn modules_keep_snapshot_order() {
    let mut model = MemoryModel::new();
    for id in ["a", "b", "c", "d"] {
        model.add_module(id, id);
    }
    let snapshot: Snapshot = serde_yaml::from_str(
        "
modules:
  - {id: d, items: [{id: D-1, long_name: d}]}
  - {id: b, items: [{id: B-1, long_name: b}]}
  - {id: c, items: [{id: C-1, long_name: c}]}
  - {id: a, items: [{id: A-1, long_name: a}]}
",
    )
    .unwrap();

    let reconciliation = run(&snapshot, &model, Mode::Strict);

    let order: Vec<_> = reconciliation
        .change_set
        .modules()
        .iter()
        .map(|module| module.module_id.as_str())
        .collect();
    assert_eq!(order, vec!["d", "b", "c", "a"]);
}

#[test]
fn failed_module_does_not_block_others() {
    let mut model = synced();
    model.add_module("n", "Other");
    let mut snapshot = base();
    let other: Module = serde_yaml::from_str("{id: n, items: [{id: N-1, long_name: n}]}").unwrap();
    snapshot.modules.push(other);
    item(&mut snapshot, "REQ-1")
        .attributes
        .insert("priority".into(), Value::Bool(true));

    let reconciliation = run(&snapshot, &model, Mode::Strict);

    assert!(!reconciliation.change_set.contains_module("m"));
    assert!(reconciliation.change_set.contains_module("n"));
}

#[test]
fn changed_timestamp_is_one_modify() {
    let model = synced();
    let mut snapshot = base();
    let later: Value = serde_yaml::from_str("'2022-07-01T09:00:00Z'").unwrap();
    item(&mut snapshot, "REQ-1")
        .attributes
        .insert("submittedAt".into(), later.clone());

    let reconciliation = run(&snapshot, &model, Mode::Strict);

    assert_eq!(
        actions(&reconciliation),
        vec![&ChangeAction::Modify {
            target: Reference::Existing(uuid_of(&model, "REQ-1")),
            changes: vec![FieldChange::Attribute {
                attribute: "submittedAt".into(),
                definition: Reference::Existing(
                    model
                        .type_definitions_of(&model.find_module("m").unwrap())
                        .requirement_types[0]
                        .attributes
                        .iter()
                        .find(|attribute| attribute.identifier == "submittedAt")
                        .unwrap()
                        .uuid
                ),
                value: Some(AssignedValue::Primitive(later)),
            }],
        }]
    );
}

#[test]
fn same_instant_in_another_offset_is_unchanged() {
    let model = synced();
    let mut snapshot = base();
    let shifted: Value = serde_yaml::from_str("'2022-06-30T17:07:18+02:00'").unwrap();
    item(&mut snapshot, "REQ-1")
        .attributes
        .insert("submittedAt".into(), shifted);

    assert!(run(&snapshot, &model, Mode::Strict).change_set.is_empty());
}

#[test]
fn new_item_references_new_enum_value() {
    let model = synced();
    let mut snapshot = base();
    snapshot.modules[0]
        .enum_types
        .get_mut("type")
        .unwrap()
        .values
        .push(EnumValue {
            id: "nonFunctional".into(),
            long_name: "Non-functional".into(),
        });
    let new: Item = serde_yaml::from_str(
        "{id: REQ-5, long_name: Fifth, type: sys, attributes: {type: [nonFunctional]}}",
    )
    .unwrap();
    snapshot.modules[0].items.push(new);

    let reconciliation = run(&snapshot, &model, Mode::Strict);
    let actions = actions(&reconciliation);

    let value = creation_of(&actions, "EnumValue type nonFunctional").unwrap();
    let created = creation_of(&actions, "Requirement REQ-5").unwrap();
    assert!(value < created);
    assert!(matches!(
        actions[created],
        ChangeAction::Create { entity: Entity::Requirement(fields), .. }
            if fields.attributes.len() == 1
                && fields.attributes[0].value
                    == AssignedValue::Enum(vec![promise("EnumValue type nonFunctional")])
    ));
    assert_converges(&snapshot, model, Mode::Strict);
}

#[test]
fn duplicate_item_in_force_mode_keeps_nodes_below_it() {
    let model = synced();
    let mut snapshot = base();
    let folder = snapshot.modules[0].items.remove(0);
    let mut duplicate: Item = serde_yaml::from_str("{id: REQ-3, long_name: Again}").unwrap();
    duplicate.children.push(folder);
    snapshot.modules[0].items.push(duplicate);

    let reconciliation = run(&snapshot, &model, Mode::Force);

    let codes: Vec<_> = reconciliation
        .diagnostics
        .iter()
        .map(|diagnostic| diagnostic.code.as_str())
        .collect();
    assert_eq!(codes, vec!["DuplicateIdentifier"]);
    assert!(!reconciliation
        .change_set
        .actions()
        .any(|action| matches!(action, ChangeAction::Delete { .. })));
}

#[test]
fn identifiers_with_spaces_get_distinct_promises() {
    let model = empty_model();
    let snapshot: Snapshot = serde_yaml::from_str(
        "
modules:
  - id: m
    enum_types:
      'a b':
        long_name: AB
        values: [{id: c, long_name: C}]
      a:
        long_name: A
        values: [{id: 'b c', long_name: BC}]
    requirement_types:
      sys:
        long_name: Sys
        attributes:
          'x y': {long_name: XY, type: String}
      'y sys':
        long_name: YSys
        attributes:
          x: {long_name: X, type: String}
    items:
      - {id: R-1, long_name: R, type: sys, attributes: {'x y': one}}
      - {id: R-2, long_name: R, type: 'y sys', attributes: {x: two}}
",
    )
    .unwrap();

    let reconciliation = run(&snapshot, &model, Mode::Strict);

    assert!(reconciliation.diagnostics.is_empty());
    assert_eq!(
        ActionCounts::tally(reconciliation.change_set.actions()).type_changes,
        // folder + 2 enum types + 2 values + 2 requirement types + 2 attributes
        9
    );
    assert_converges(&snapshot, model, Mode::Strict);
}
