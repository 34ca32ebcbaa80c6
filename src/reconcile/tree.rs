//! Reconciliation of a module's folders and requirements.
//!
//! Items are matched to existing nodes by identifier, anywhere in the
//! module. A match keeps the node's identity: it is modified in place and,
//! if its parent changed, moved with an [`Extend`](ChangeAction::Extend).
//! Nodes that no item matched are deleted once the whole tree has been
//! walked, children before their parents.

use std::collections::HashSet;

use tracing::{debug, instrument, trace};
use uuid::Uuid;

use super::{
    changeset::{
        AssignedValue, AttributeAssignment, ChangeAction, Entity, FieldChange, ItemFields,
        Reference,
    },
    diagnostics::Violation,
    promise::{enum_value_key, item_key},
    types::{AttributeContract, AttributeTable, ValueContract},
    ModulePass,
};
use crate::{
    domain::{Item, Value},
    model::{ExistingNode, ModelAccessor},
};

/// The requirement type an item ends up with.
enum ItemType<'t> {
    /// The item has no requirement type.
    Untyped,
    /// The item names a declared requirement type.
    Declared { id: &'t str, reference: Reference },
    /// The item names a type that isn't declared; its type and attributes
    /// are left alone.
    Undeclared,
}

/// A validated attribute value.
struct CheckedValue<'i, 't> {
    attribute: &'i str,
    value: &'i Value,
    contract: &'t AttributeContract,
    assigned: AssignedValue,
}

/// Bookkeeping for one tree walk.
#[derive(Default)]
struct TreeState {
    seen: HashSet<String>,
    matched: HashSet<Uuid>,
}

impl<A: ModelAccessor> ModulePass<'_, A> {
    /// Reconciles every item of the module against the existing tree.
    #[instrument(skip_all)]
    pub(crate) fn reconcile_tree(&mut self, table: &AttributeTable) {
        let mut state = TreeState::default();
        let module = self.module;
        let root = Reference::Existing(self.module_ref.uuid);
        self.reconcile_children(&module.items, &root, table, &mut state);

        let deletes: Vec<_> = self
            .index
            .post_order()
            .filter(|indexed| !state.matched.contains(&indexed.node.uuid))
            .map(|indexed| {
                trace!(identifier = %indexed.node.identifier, "node removed");
                ChangeAction::Delete {
                    target: Reference::Existing(indexed.node.uuid),
                }
            })
            .collect();
        debug!(
            matched = state.matched.len(),
            deleted = deletes.len(),
            "item tree reconciled"
        );
        self.item_deletes.extend(deletes);
    }

    fn reconcile_children(
        &mut self,
        items: &[Item],
        parent: &Reference,
        table: &AttributeTable,
        state: &mut TreeState,
    ) {
        let mut moved = Vec::new();

        for item in items {
            if !state.seen.insert(item.id.to_string()) {
                self.report(
                    Some(item.id.as_str()),
                    &Violation::DuplicateIdentifier {
                        what: "item",
                        identifier: item.id.to_string(),
                    },
                );
                self.retain_subtree(&item.children, state);
                continue;
            }

            let kind = item.kind();
            let existing = self
                .index
                .get(item.id.as_str())
                .map(|indexed| (indexed.node.clone(), indexed.parent));

            match existing {
                Some((node, current_parent)) if node.kind == kind => {
                    state.matched.insert(node.uuid);
                    if Reference::Existing(current_parent) != *parent {
                        moved.push(Reference::Existing(node.uuid));
                    }
                    self.update_item(&node, item, table);
                    self.reconcile_children(
                        &item.children,
                        &Reference::Existing(node.uuid),
                        table,
                        state,
                    );
                }
                Some((node, _)) => {
                    self.report(
                        Some(item.id.as_str()),
                        &Violation::StructuralKindConflict {
                            identifier: item.id.to_string(),
                            from: node.kind.as_str(),
                            to: kind.as_str(),
                        },
                    );
                    self.create_item(item, parent, table, state);
                }
                None => self.create_item(item, parent, table, state),
            }
        }

        if !moved.is_empty() {
            self.actions.push(ChangeAction::Extend {
                target: parent.clone(),
                children: moved,
            });
        }
    }

    /// Keeps the existing nodes named inside a skipped subtree, leaving
    /// them untouched.
    fn retain_subtree(&self, items: &[Item], state: &mut TreeState) {
        for item in items {
            if let Some(indexed) = self.index.get(item.id.as_str()) {
                state.matched.insert(indexed.node.uuid);
            }
            self.retain_subtree(&item.children, state);
        }
    }

    fn create_item(
        &mut self,
        item: &Item,
        parent: &Reference,
        table: &AttributeTable,
        state: &mut TreeState,
    ) {
        let kind = item.kind();
        let (requirement_type, attributes) = match self.item_type(item, table) {
            ItemType::Declared { id, reference } => {
                let attributes = self
                    .checked_attributes(item, id, table)
                    .into_iter()
                    .map(|checked| AttributeAssignment {
                        attribute: checked.attribute.to_string(),
                        definition: checked.contract.definition.clone(),
                        value: checked.assigned,
                    })
                    .collect();
                (Some(reference), attributes)
            }
            ItemType::Untyped | ItemType::Undeclared => (None, Vec::new()),
        };

        let promise = self.registry.fulfil(item_key(kind, item.id.as_str()));
        self.actions.push(ChangeAction::Create {
            promise: promise.clone(),
            parent: parent.clone(),
            entity: Entity::item(
                kind,
                ItemFields {
                    identifier: item.id.to_string(),
                    long_name: item.long_name.clone(),
                    text: item.text.clone(),
                    requirement_type,
                    attributes,
                },
            ),
        });

        self.reconcile_children(&item.children, &Reference::Promise(promise), table, state);
    }

    fn update_item(&mut self, node: &ExistingNode, item: &Item, table: &AttributeTable) {
        let mut changes = Vec::new();
        if node.long_name != item.long_name {
            changes.push(FieldChange::LongName(item.long_name.clone()));
        }
        if node.text != item.text {
            changes.push(FieldChange::Text(item.text.clone()));
        }

        match self.item_type(item, table) {
            ItemType::Undeclared => {}
            ItemType::Untyped => {
                if node.requirement_type.is_some() {
                    changes.push(FieldChange::RequirementType(None));
                }
            }
            ItemType::Declared { id, reference } => {
                let retyped = node.requirement_type.as_deref() != Some(id);
                if retyped {
                    changes.push(FieldChange::RequirementType(Some(reference)));
                }
                self.diff_attributes(node, item, id, retyped, table, &mut changes);
            }
        }

        if !changes.is_empty() {
            self.actions.push(ChangeAction::Modify {
                target: Reference::Existing(node.uuid),
                changes,
            });
        }
    }

    /// Appends attribute changes of a matched node.
    ///
    /// When the node's requirement type changes, or a definition is new,
    /// stored values are treated as absent: every supplied value is set and
    /// nothing is unset.
    fn diff_attributes(
        &mut self,
        node: &ExistingNode,
        item: &Item,
        requirement_type: &str,
        retyped: bool,
        table: &AttributeTable,
        changes: &mut Vec<FieldChange>,
    ) {
        let checked = self.checked_attributes(item, requirement_type, table);
        let current = |attribute: &str, contract: &AttributeContract| {
            if retyped || contract.fresh {
                None
            } else {
                self.accessor.attribute_value(node.uuid, attribute)
            }
        };

        let mut updates = Vec::new();
        for checked in checked {
            let unchanged = current(checked.attribute, checked.contract).is_some_and(|stored| {
                stored.matches(checked.value, checked.contract.contract.is_multi_valued())
            });
            if !unchanged {
                updates.push(FieldChange::Attribute {
                    attribute: checked.attribute.to_string(),
                    definition: checked.contract.definition.clone(),
                    value: Some(checked.assigned),
                });
            }
        }

        for (attribute, contract) in table.attributes_of(requirement_type) {
            if item.attributes.contains_key(attribute) {
                continue;
            }
            if current(attribute, contract).is_some() {
                updates.push(FieldChange::Attribute {
                    attribute: attribute.to_string(),
                    definition: contract.definition.clone(),
                    value: None,
                });
            }
        }

        changes.extend(updates);
    }

    fn item_type<'t>(&mut self, item: &Item, table: &'t AttributeTable) -> ItemType<'t> {
        let Some(id) = item.requirement_type.as_deref() else {
            for attribute in item.attributes.keys() {
                self.report(
                    Some(item.id.as_str()),
                    &Violation::UndefinedAttribute {
                        attribute: attribute.clone(),
                        context: "because the item has no requirement type".to_string(),
                    },
                );
            }
            return ItemType::Untyped;
        };

        match table.requirement_type_entry(id) {
            Some((id, reference)) => ItemType::Declared {
                id,
                reference: reference.clone(),
            },
            None => {
                self.report(
                    Some(item.id.as_str()),
                    &Violation::UndefinedTypeReference {
                        referrer: format!("item {:?}", item.id.as_str()),
                        what: "requirement type",
                        target: id.to_string(),
                    },
                );
                ItemType::Undeclared
            }
        }
    }

    /// The item's attribute values that pass validation, ordered by id.
    ///
    /// Every rejected value is reported and left out.
    fn checked_attributes<'i, 't>(
        &mut self,
        item: &'i Item,
        requirement_type: &str,
        table: &'t AttributeTable,
    ) -> Vec<CheckedValue<'i, 't>> {
        let mut checked = Vec::with_capacity(item.attributes.len());
        for (attribute, value) in &item.attributes {
            let Some(contract) = table.attribute(requirement_type, attribute) else {
                if table.is_invalid(requirement_type, attribute) {
                    trace!(attribute, "definition was rejected, dropping value");
                } else {
                    self.report(
                        Some(item.id.as_str()),
                        &Violation::UndefinedAttribute {
                            attribute: attribute.clone(),
                            context: format!("for requirement type {requirement_type:?}"),
                        },
                    );
                }
                continue;
            };

            match self.check_value(attribute, value, &contract.contract) {
                Ok(assigned) => checked.push(CheckedValue {
                    attribute,
                    value,
                    contract,
                    assigned,
                }),
                Err(violations) => {
                    for violation in &violations {
                        self.report(Some(item.id.as_str()), violation);
                    }
                }
            }
        }
        checked
    }

    fn check_value(
        &mut self,
        attribute: &str,
        value: &Value,
        contract: &ValueContract,
    ) -> Result<AssignedValue, Vec<Violation>> {
        match contract {
            ValueContract::Primitive(kind) => {
                if value.primitive_kind() == Some(*kind) {
                    Ok(AssignedValue::Primitive(value.clone()))
                } else {
                    Err(vec![Violation::PrimitiveTypeMismatch {
                        attribute: attribute.to_string(),
                        expected: kind.to_string(),
                        found: value.kind_name(),
                    }])
                }
            }
            ValueContract::Enum {
                enum_type,
                multi_valued,
                options,
            } => {
                let Value::EnumRefs(selected) = value else {
                    return Err(vec![Violation::PrimitiveTypeMismatch {
                        attribute: attribute.to_string(),
                        expected: "Enum".to_string(),
                        found: value.kind_name(),
                    }]);
                };

                let mut violations: Vec<_> = selected
                    .iter()
                    .filter(|option| !options.contains(*option))
                    .map(|option| Violation::UndefinedEnumValue {
                        attribute: attribute.to_string(),
                        enum_type: enum_type.clone(),
                        value: option.clone(),
                    })
                    .collect();
                if !multi_valued && selected.len() != 1 {
                    violations.push(Violation::InvalidCardinality {
                        attribute: attribute.to_string(),
                        count: selected.len(),
                    });
                }
                if !violations.is_empty() {
                    return Err(violations);
                }

                // Repeated options collapse into one selection.
                let mut emitted = HashSet::new();
                let references = selected
                    .iter()
                    .filter(|option| emitted.insert(option.as_str()))
                    .map(|option| self.registry.resolve(&enum_value_key(enum_type, option)))
                    .collect();
                Ok(AssignedValue::Enum(references))
            }
        }
    }
}
