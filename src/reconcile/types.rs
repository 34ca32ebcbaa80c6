//! Reconciliation of a module's type system.
//!
//! Runs before the item tree so that every enumeration type, enumeration
//! value, requirement type and attribute definition an item might reference
//! is either bound to an existing entity or created by an earlier action.
//! The outcome is an [`AttributeTable`] describing, per requirement type,
//! which attributes exist and what values they accept.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, instrument};

use super::{
    changeset::{ChangeAction, DefinitionKind, Entity, FieldChange, Reference},
    diagnostics::Violation,
    promise::{
        attribute_definition_key, enum_type_key, enum_value_key, requirement_type_key,
        types_folder_key,
    },
    ModulePass,
};
use crate::{
    domain::{
        AttributeDefinition, EnumValue, EnumerationType, KindClass, PrimitiveKind,
        RequirementType, Value,
    },
    model::{
        ExistingAttributeDefinition, ExistingEnumType, ExistingRequirementType, ModelAccessor,
        TypeDefinitions,
    },
};

/// What values an attribute accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueContract {
    /// Values of one primitive kind.
    Primitive(PrimitiveKind),
    /// A selection among the options of an enumeration type.
    Enum {
        /// Identifier of the enumeration type.
        enum_type: String,
        /// Whether several options may be selected.
        multi_valued: bool,
        /// Identifiers of the declared options.
        options: BTreeSet<String>,
    },
}

impl ValueContract {
    /// Whether the contract permits more than one option.
    #[must_use]
    pub const fn is_multi_valued(&self) -> bool {
        matches!(self, Self::Enum { multi_valued: true, .. })
    }
}

/// One attribute definition, as seen by the tree reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeContract {
    /// The definition that assigned values belong to.
    pub definition: Reference,
    /// The accepted values.
    pub contract: ValueContract,
    /// Whether values currently stored for this attribute are invalidated,
    /// because the definition is new or its enumeration changed.
    pub fresh: bool,
}

/// Requirement types and their attribute definitions after type
/// reconciliation.
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    requirement_types: HashMap<String, Reference>,
    attributes: HashMap<String, BTreeMap<String, AttributeContract>>,
    invalid: HashSet<(String, String)>,
}

impl AttributeTable {
    /// The reference of a declared requirement type.
    #[must_use]
    pub fn requirement_type(&self, requirement_type: &str) -> Option<&Reference> {
        self.requirement_types.get(requirement_type)
    }

    /// The declared requirement type `id`, with the key borrowed from the
    /// table.
    pub(crate) fn requirement_type_entry(&self, id: &str) -> Option<(&str, &Reference)> {
        self.requirement_types
            .get_key_value(id)
            .map(|(id, reference)| (id.as_str(), reference))
    }

    /// The contract of one attribute of a requirement type.
    #[must_use]
    pub fn attribute(&self, requirement_type: &str, attribute: &str) -> Option<&AttributeContract> {
        self.attributes
            .get(requirement_type)
            .and_then(|attributes| attributes.get(attribute))
    }

    /// Every valid attribute of a requirement type, ordered by id.
    pub fn attributes_of(
        &self,
        requirement_type: &str,
    ) -> impl Iterator<Item = (&str, &AttributeContract)> + '_ {
        self.attributes
            .get(requirement_type)
            .into_iter()
            .flatten()
            .map(|(attribute, contract)| (attribute.as_str(), contract))
    }

    /// Whether the definition was declared but skipped because it is
    /// invalid. Values for such attributes are dropped without a further
    /// diagnostic.
    #[must_use]
    pub fn is_invalid(&self, requirement_type: &str, attribute: &str) -> bool {
        self.invalid
            .contains(&(requirement_type.to_string(), attribute.to_string()))
    }

    fn insert_type(&mut self, requirement_type: &str, reference: Reference) {
        self.requirement_types
            .insert(requirement_type.to_string(), reference);
    }

    fn insert_attribute(
        &mut self,
        requirement_type: &str,
        attribute: &str,
        contract: AttributeContract,
    ) {
        self.attributes
            .entry(requirement_type.to_string())
            .or_default()
            .insert(attribute.to_string(), contract);
    }

    fn mark_invalid(&mut self, requirement_type: &str, attribute: &str) {
        self.invalid
            .insert((requirement_type.to_string(), attribute.to_string()));
    }
}

impl<A: ModelAccessor> ModulePass<'_, A> {
    /// Reconciles the types folder, enumeration types and requirement types.
    #[instrument(skip_all)]
    pub(crate) fn reconcile_types(&mut self) -> AttributeTable {
        let existing = self.accessor.type_definitions_of(&self.module_ref);
        let folder = self.reconcile_types_folder(existing.folder);

        self.reconcile_enum_types(&folder, &existing);
        let table = self.reconcile_requirement_types(&folder, &existing.requirement_types);

        debug!(
            requirement_types = table.requirement_types.len(),
            "type system reconciled"
        );
        table
    }

    fn reconcile_types_folder(&mut self, existing: Option<uuid::Uuid>) -> Reference {
        let key = types_folder_key(self.module.id.as_str());
        if let Some(uuid) = existing {
            self.registry.bind(key, uuid);
            return Reference::Existing(uuid);
        }

        let needed =
            !self.module.enum_types.is_empty() || !self.module.requirement_types.is_empty();
        if !needed {
            return self.registry.resolve(&key);
        }

        let promise = self.registry.fulfil(key);
        self.actions.push(ChangeAction::Create {
            promise: promise.clone(),
            parent: Reference::Existing(self.module_ref.uuid),
            entity: Entity::TypesFolder {
                long_name: self.config.types_folder_name().to_string(),
            },
        });
        Reference::Promise(promise)
    }

    fn reconcile_enum_types(&mut self, folder: &Reference, definitions: &TypeDefinitions) {
        let existing = &definitions.enum_types;
        let by_identifier: HashMap<&str, &ExistingEnumType> = existing
            .iter()
            .map(|enum_type| (enum_type.identifier.as_str(), enum_type))
            .collect();

        let module = self.module;
        for (id, enum_type) in &module.enum_types {
            let values = self.unique_values(id, enum_type);
            match by_identifier.get(id.as_str()) {
                None => self.create_enum_type(folder, id, enum_type, &values),
                Some(current) => {
                    self.update_enum_type(id, enum_type, &values, current, definitions);
                }
            }
        }

        for enum_type in existing {
            if !module.enum_types.contains_key(&enum_type.identifier) {
                debug!(enum_type = %enum_type.identifier, "enumeration type removed");
                self.type_deletes.push(ChangeAction::Delete {
                    target: Reference::Existing(enum_type.uuid),
                });
            }
        }
    }

    /// The options of `enum_type`, with repeated identifiers reported and
    /// dropped.
    fn unique_values<'e>(
        &mut self,
        id: &str,
        enum_type: &'e EnumerationType,
    ) -> Vec<&'e EnumValue> {
        let mut seen = HashSet::new();
        let mut values = Vec::with_capacity(enum_type.values.len());
        for value in &enum_type.values {
            if seen.insert(value.id.as_str()) {
                values.push(value);
            } else {
                self.report(
                    Some(id),
                    &Violation::DuplicateIdentifier {
                        what: "enumeration value",
                        identifier: value.id.clone(),
                    },
                );
            }
        }
        values
    }

    fn create_enum_type(
        &mut self,
        folder: &Reference,
        id: &str,
        enum_type: &EnumerationType,
        values: &[&EnumValue],
    ) {
        let promise = self.registry.fulfil(enum_type_key(id));
        self.actions.push(ChangeAction::Create {
            promise: promise.clone(),
            parent: folder.clone(),
            entity: Entity::EnumerationType {
                identifier: id.to_string(),
                long_name: enum_type.long_name.clone(),
            },
        });

        let parent = Reference::Promise(promise);
        for value in values {
            self.create_enum_value(&parent, id, value);
        }
    }

    fn create_enum_value(&mut self, parent: &Reference, enum_type: &str, value: &EnumValue) {
        let promise = self.registry.fulfil(enum_value_key(enum_type, &value.id));
        self.actions.push(ChangeAction::Create {
            promise,
            parent: parent.clone(),
            entity: Entity::EnumValue {
                identifier: value.id.clone(),
                long_name: value.long_name.clone(),
            },
        });
    }

    fn update_enum_type(
        &mut self,
        id: &str,
        enum_type: &EnumerationType,
        values: &[&EnumValue],
        current: &ExistingEnumType,
        definitions: &TypeDefinitions,
    ) {
        self.registry.bind(enum_type_key(id), current.uuid);
        for value in &current.values {
            self.registry
                .bind(enum_value_key(id, &value.identifier), value.uuid);
        }

        if enum_type.long_name != current.long_name {
            self.actions.push(ChangeAction::Modify {
                target: Reference::Existing(current.uuid),
                changes: vec![FieldChange::LongName(enum_type.long_name.clone())],
            });
        }

        let parent = Reference::Existing(current.uuid);
        for value in values {
            match current
                .values
                .iter()
                .find(|existing| existing.identifier == value.id)
            {
                None => self.create_enum_value(&parent, id, value),
                Some(existing) if existing.long_name != value.long_name => {
                    self.actions.push(ChangeAction::Modify {
                        target: Reference::Existing(existing.uuid),
                        changes: vec![FieldChange::LongName(value.long_name.clone())],
                    });
                }
                Some(_) => {}
            }
        }

        for existing in &current.values {
            if enum_type.value(&existing.identifier).is_some() {
                continue;
            }
            let users = self.enum_value_users(definitions, id, &existing.identifier);
            if users.is_empty() {
                self.type_deletes.push(ChangeAction::Delete {
                    target: Reference::Existing(existing.uuid),
                });
            } else {
                self.report(
                    Some(id),
                    &Violation::EnumValueInUse {
                        enum_type: id.to_string(),
                        value: existing.identifier.clone(),
                        users: users.join(", "),
                    },
                );
            }
        }
    }

    /// Identifiers of existing requirements that select `value` of
    /// `enum_type` through any attribute.
    fn enum_value_users(
        &self,
        definitions: &TypeDefinitions,
        enum_type: &str,
        value: &str,
    ) -> Vec<String> {
        let attributes: Vec<(&str, &str)> = definitions
            .requirement_types
            .iter()
            .flat_map(|requirement_type| {
                requirement_type.attributes.iter().filter_map(move |attribute| {
                    match attribute.kind.classify() {
                        KindClass::Enum { enum_type: e, .. } if e == enum_type => Some((
                            requirement_type.identifier.as_str(),
                            attribute.identifier.as_str(),
                        )),
                        _ => None,
                    }
                })
            })
            .collect();
        if attributes.is_empty() {
            return Vec::new();
        }

        self.index
            .iter()
            .filter(|indexed| {
                let Some(node_type) = indexed.node.requirement_type.as_deref() else {
                    return false;
                };
                attributes
                    .iter()
                    .filter(|(requirement_type, _)| *requirement_type == node_type)
                    .any(|(_, attribute)| {
                        matches!(
                            self.accessor.attribute_value(indexed.node.uuid, attribute),
                            Some(Value::EnumRefs(selected)) if selected.iter().any(|s| s == value)
                        )
                    })
            })
            .map(|indexed| indexed.node.identifier.clone())
            .collect()
    }

    fn reconcile_requirement_types(
        &mut self,
        folder: &Reference,
        existing: &[ExistingRequirementType],
    ) -> AttributeTable {
        let mut table = AttributeTable::default();
        let by_identifier: HashMap<&str, &ExistingRequirementType> = existing
            .iter()
            .map(|requirement_type| (requirement_type.identifier.as_str(), requirement_type))
            .collect();

        let module = self.module;
        for (id, requirement_type) in &module.requirement_types {
            match by_identifier.get(id.as_str()) {
                None => self.create_requirement_type(folder, id, requirement_type, &mut table),
                Some(current) => {
                    self.update_requirement_type(id, requirement_type, current, &mut table);
                }
            }
        }

        for requirement_type in existing {
            if !module.requirement_types.contains_key(&requirement_type.identifier) {
                debug!(requirement_type = %requirement_type.identifier, "requirement type removed");
                self.type_deletes.push(ChangeAction::Delete {
                    target: Reference::Existing(requirement_type.uuid),
                });
            }
        }
        table
    }

    fn create_requirement_type(
        &mut self,
        folder: &Reference,
        id: &str,
        requirement_type: &RequirementType,
        table: &mut AttributeTable,
    ) {
        let promise = self.registry.fulfil(requirement_type_key(id));
        self.actions.push(ChangeAction::Create {
            promise: promise.clone(),
            parent: folder.clone(),
            entity: Entity::RequirementType {
                identifier: id.to_string(),
                long_name: requirement_type.long_name.clone(),
            },
        });

        let parent = Reference::Promise(promise);
        table.insert_type(id, parent.clone());
        for (attribute, definition) in &requirement_type.attributes {
            self.create_attribute_definition(&parent, id, attribute, definition, table);
        }
    }

    fn update_requirement_type(
        &mut self,
        id: &str,
        requirement_type: &RequirementType,
        current: &ExistingRequirementType,
        table: &mut AttributeTable,
    ) {
        self.registry.bind(requirement_type_key(id), current.uuid);
        let parent = Reference::Existing(current.uuid);
        table.insert_type(id, parent.clone());

        if requirement_type.long_name != current.long_name {
            self.actions.push(ChangeAction::Modify {
                target: parent.clone(),
                changes: vec![FieldChange::LongName(requirement_type.long_name.clone())],
            });
        }

        for (attribute, definition) in &requirement_type.attributes {
            match current
                .attributes
                .iter()
                .find(|existing| existing.identifier == *attribute)
            {
                None => self.create_attribute_definition(&parent, id, attribute, definition, table),
                Some(existing) => {
                    self.update_attribute_definition(
                        &parent, id, attribute, definition, existing, table,
                    );
                }
            }
        }

        for existing in &current.attributes {
            if !requirement_type.attributes.contains_key(&existing.identifier) {
                debug!(
                    attribute = %existing.identifier,
                    requirement_type = id,
                    "attribute definition removed"
                );
                self.type_deletes.push(ChangeAction::Delete {
                    target: Reference::Existing(existing.uuid),
                });
            }
        }
    }

    /// The contract of a declared attribute, or `None` if its enumeration
    /// type is not declared in the module.
    fn value_contract(
        &mut self,
        requirement_type: &str,
        attribute: &str,
        definition: &AttributeDefinition,
    ) -> Option<ValueContract> {
        match definition.kind.classify() {
            KindClass::Primitive(kind) => Some(ValueContract::Primitive(kind)),
            KindClass::Enum {
                enum_type,
                multi_valued,
            } => {
                let Some(declared) = self.module.enum_types.get(enum_type) else {
                    self.report(
                        Some(requirement_type),
                        &Violation::UndefinedTypeReference {
                            referrer: format!(
                                "attribute {attribute:?} of requirement type {requirement_type:?}"
                            ),
                            what: "enumeration type",
                            target: enum_type.to_string(),
                        },
                    );
                    return None;
                };
                Some(ValueContract::Enum {
                    enum_type: enum_type.to_string(),
                    multi_valued,
                    options: declared.values.iter().map(|value| value.id.clone()).collect(),
                })
            }
        }
    }

    fn definition_kind(&mut self, contract: &ValueContract) -> DefinitionKind {
        match contract {
            ValueContract::Primitive(kind) => DefinitionKind::Primitive(*kind),
            ValueContract::Enum {
                enum_type,
                multi_valued,
                ..
            } => DefinitionKind::Enum {
                data_type: self.registry.resolve(&enum_type_key(enum_type)),
                multi_valued: *multi_valued,
            },
        }
    }

    fn create_attribute_definition(
        &mut self,
        parent: &Reference,
        requirement_type: &str,
        attribute: &str,
        definition: &AttributeDefinition,
        table: &mut AttributeTable,
    ) {
        let Some(contract) = self.value_contract(requirement_type, attribute, definition) else {
            table.mark_invalid(requirement_type, attribute);
            return;
        };

        let kind = self.definition_kind(&contract);
        let promise = self
            .registry
            .fulfil(attribute_definition_key(attribute, requirement_type));
        self.actions.push(ChangeAction::Create {
            promise: promise.clone(),
            parent: parent.clone(),
            entity: Entity::AttributeDefinition {
                identifier: attribute.to_string(),
                long_name: definition.long_name.clone(),
                definition: kind,
            },
        });

        table.insert_attribute(
            requirement_type,
            attribute,
            AttributeContract {
                definition: Reference::Promise(promise),
                contract,
                fresh: true,
            },
        );
    }

    fn update_attribute_definition(
        &mut self,
        parent: &Reference,
        requirement_type: &str,
        attribute: &str,
        definition: &AttributeDefinition,
        current: &ExistingAttributeDefinition,
        table: &mut AttributeTable,
    ) {
        let Some(contract) = self.value_contract(requirement_type, attribute, definition) else {
            table.mark_invalid(requirement_type, attribute);
            return;
        };

        let key = attribute_definition_key(attribute, requirement_type);
        let mut changes = Vec::new();
        match (&contract, current.kind.classify()) {
            (ValueContract::Primitive(kind), KindClass::Primitive(existing))
                if *kind == existing => {}
            (
                ValueContract::Enum {
                    enum_type,
                    multi_valued,
                    ..
                },
                KindClass::Enum {
                    enum_type: existing_type,
                    multi_valued: existing_multi,
                },
            ) => {
                if enum_type != existing_type {
                    changes.push(FieldChange::DataType(
                        self.registry.resolve(&enum_type_key(enum_type)),
                    ));
                }
                if *multi_valued != existing_multi {
                    changes.push(FieldChange::MultiValued(*multi_valued));
                }
            }
            _ => {
                // The kind itself changed: replace the definition. The old
                // one goes first so that no two definitions share the id.
                debug!(
                    attribute,
                    requirement_type, "attribute kind changed, re-creating definition"
                );
                self.actions.push(ChangeAction::Delete {
                    target: Reference::Existing(current.uuid),
                });
                self.registry.unbind(&key);
                self.create_attribute_definition(
                    parent,
                    requirement_type,
                    attribute,
                    definition,
                    table,
                );
                return;
            }
        }

        self.registry.bind(key, current.uuid);
        let fresh = !changes.is_empty();
        if definition.long_name != current.long_name {
            changes.insert(0, FieldChange::LongName(definition.long_name.clone()));
        }
        if !changes.is_empty() {
            self.actions.push(ChangeAction::Modify {
                target: Reference::Existing(current.uuid),
                changes,
            });
        }

        table.insert_attribute(
            requirement_type,
            attribute,
            AttributeContract {
                definition: Reference::Existing(current.uuid),
                contract,
                fresh,
            },
        );
    }
}
