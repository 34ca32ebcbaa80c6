//! The actions produced by reconciliation.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{NodeKind, PrimitiveKind, Value};

/// A symbolic handle for an entity that the same change set creates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromiseRef(String);

impl PromiseRef {
    pub(crate) const fn new(key: String) -> Self {
        Self(key)
    }

    /// The symbolic key, e.g. `EnumValue type nonFunctional`.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PromiseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise({})", self.0)
    }
}

/// A reference to a model entity: either one that exists already or one that
/// an earlier action of the same change set creates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    /// An entity in the model.
    Existing(Uuid),
    /// An entity created by this change set.
    Promise(PromiseRef),
}

impl Reference {
    /// The promise, if this reference is one.
    #[must_use]
    pub const fn as_promise(&self) -> Option<&PromiseRef> {
        match self {
            Self::Existing(_) => None,
            Self::Promise(promise) => Some(promise),
        }
    }

    /// Whether the referenced entity already exists in the model.
    #[must_use]
    pub const fn is_existing(&self) -> bool {
        matches!(self, Self::Existing(_))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Existing(uuid) => write!(f, "{uuid}"),
            Self::Promise(promise) => write!(f, "{promise}"),
        }
    }
}

/// The kind of entity a [`ChangeAction::Create`] introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// The folder holding a module's type definitions.
    TypesFolder,
    /// An enumeration data type.
    EnumerationType,
    /// One option of an enumeration type.
    EnumValue,
    /// A requirement type.
    RequirementType,
    /// An attribute definition of a requirement type.
    AttributeDefinition,
    /// A folder of requirements.
    Folder,
    /// A requirement.
    Requirement,
}

impl EntityKind {
    /// Whether this kind belongs to the type system rather than the item tree.
    #[must_use]
    pub const fn is_type_system(self) -> bool {
        !matches!(self, Self::Folder | Self::Requirement)
    }
}

impl From<NodeKind> for EntityKind {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Folder => Self::Folder,
            NodeKind::Requirement => Self::Requirement,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The kind of a new or modified attribute definition, with enumeration
/// types given as references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    /// A primitive attribute.
    Primitive(PrimitiveKind),
    /// An enumeration attribute.
    Enum {
        /// The enumeration type providing the options.
        data_type: Reference,
        /// Whether several options may be selected.
        multi_valued: bool,
    },
}

/// A value assigned to an attribute, with enumeration options given as
/// references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignedValue {
    /// A primitive value.
    Primitive(Value),
    /// Selected enumeration options.
    Enum(Vec<Reference>),
}

/// One attribute value on a created or modified item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeAssignment {
    /// The attribute id.
    pub attribute: String,
    /// The attribute definition the value belongs to.
    pub definition: Reference,
    /// The value.
    pub value: AssignedValue,
}

/// Fields of a new folder or requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFields {
    /// External identifier.
    pub identifier: String,
    /// Display name.
    pub long_name: String,
    /// Body text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Requirement type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_type: Option<Reference>,
    /// Attribute values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeAssignment>,
}

/// The entity introduced by a [`ChangeAction::Create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Entity {
    /// See [`EntityKind::TypesFolder`].
    TypesFolder {
        /// Display name.
        long_name: String,
    },
    /// See [`EntityKind::EnumerationType`].
    EnumerationType {
        /// External identifier.
        identifier: String,
        /// Display name.
        long_name: String,
    },
    /// See [`EntityKind::EnumValue`].
    EnumValue {
        /// External identifier.
        identifier: String,
        /// Display name.
        long_name: String,
    },
    /// See [`EntityKind::RequirementType`].
    RequirementType {
        /// External identifier.
        identifier: String,
        /// Display name.
        long_name: String,
    },
    /// See [`EntityKind::AttributeDefinition`].
    AttributeDefinition {
        /// External identifier (the attribute id).
        identifier: String,
        /// Display name.
        long_name: String,
        /// Declared kind.
        definition: DefinitionKind,
    },
    /// See [`EntityKind::Folder`].
    Folder(ItemFields),
    /// See [`EntityKind::Requirement`].
    Requirement(ItemFields),
}

impl Entity {
    /// The kind of entity.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::TypesFolder { .. } => EntityKind::TypesFolder,
            Self::EnumerationType { .. } => EntityKind::EnumerationType,
            Self::EnumValue { .. } => EntityKind::EnumValue,
            Self::RequirementType { .. } => EntityKind::RequirementType,
            Self::AttributeDefinition { .. } => EntityKind::AttributeDefinition,
            Self::Folder(_) => EntityKind::Folder,
            Self::Requirement(_) => EntityKind::Requirement,
        }
    }

    /// Creates a folder or requirement entity.
    #[must_use]
    pub const fn item(kind: NodeKind, fields: ItemFields) -> Self {
        match kind {
            NodeKind::Folder => Self::Folder(fields),
            NodeKind::Requirement => Self::Requirement(fields),
        }
    }

    /// Every reference the entity's fields contain.
    pub fn references(&self) -> impl Iterator<Item = &Reference> + '_ {
        let (data_type, fields) = match self {
            Self::AttributeDefinition {
                definition: DefinitionKind::Enum { data_type, .. },
                ..
            } => (Some(data_type), None),
            Self::Folder(fields) | Self::Requirement(fields) => (None, Some(fields)),
            _ => (None, None),
        };
        let item_refs = fields.into_iter().flat_map(|fields| {
            fields
                .requirement_type
                .iter()
                .chain(fields.attributes.iter().flat_map(AttributeAssignment::references))
        });
        data_type.into_iter().chain(item_refs)
    }
}

impl AttributeAssignment {
    fn references(&self) -> impl Iterator<Item = &Reference> + '_ {
        let values = match &self.value {
            AssignedValue::Enum(values) => values.as_slice(),
            AssignedValue::Primitive(_) => &[],
        };
        std::iter::once(&self.definition).chain(values)
    }
}

/// One field changed by a [`ChangeAction::Modify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldChange {
    /// New display name.
    LongName(String),
    /// New body text; `None` clears it.
    Text(Option<String>),
    /// New requirement type; `None` removes it.
    RequirementType(Option<Reference>),
    /// New attribute value; a `None` value unsets the attribute.
    Attribute {
        /// The attribute id.
        attribute: String,
        /// The attribute definition.
        definition: Reference,
        /// The value.
        value: Option<AssignedValue>,
    },
    /// New enumeration type of an attribute definition.
    DataType(Reference),
    /// New multi-valued flag of an attribute definition.
    MultiValued(bool),
}

impl FieldChange {
    /// A short name of the changed field, used in reports.
    #[must_use]
    pub fn field_name(&self) -> &str {
        match self {
            Self::LongName(_) => "long_name",
            Self::Text(_) => "text",
            Self::RequirementType(_) => "type",
            Self::Attribute { attribute, .. } => attribute,
            Self::DataType(_) => "data_type",
            Self::MultiValued(_) => "multi_valued",
        }
    }

    fn references(&self) -> Box<dyn Iterator<Item = &Reference> + '_> {
        match self {
            Self::RequirementType(Some(reference)) | Self::DataType(reference) => {
                Box::new(std::iter::once(reference))
            }
            Self::Attribute {
                definition, value, ..
            } => {
                let values = match value {
                    Some(AssignedValue::Enum(values)) => values.as_slice(),
                    _ => &[],
                };
                Box::new(std::iter::once(definition).chain(values))
            }
            _ => Box::new(std::iter::empty()),
        }
    }
}

/// A single step of a change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// Create a new entity below `parent`.
    Create {
        /// The promise this creation fulfils.
        promise: PromiseRef,
        /// Where the entity is created.
        parent: Reference,
        /// The entity and its fields.
        entity: Entity,
    },
    /// Change fields of an entity.
    Modify {
        /// The modified entity.
        target: Reference,
        /// Only the fields that differ.
        changes: Vec<FieldChange>,
    },
    /// Remove an entity, together with anything it still contains.
    Delete {
        /// The removed entity.
        target: Reference,
    },
    /// Move existing folders or requirements below `target`.
    Extend {
        /// The new parent.
        target: Reference,
        /// The moved nodes, in snapshot order.
        children: Vec<Reference>,
    },
}

impl ChangeAction {
    /// The reference this action is applied at: the parent of a creation,
    /// or the target of any other action.
    #[must_use]
    pub const fn anchor(&self) -> &Reference {
        match self {
            Self::Create { parent, .. } => parent,
            Self::Modify { target, .. } | Self::Delete { target } | Self::Extend { target, .. } => {
                target
            }
        }
    }

    /// Every reference the action uses, excluding the promise a creation
    /// fulfils.
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = vec![self.anchor()];
        match self {
            Self::Create { entity, .. } => refs.extend(entity.references()),
            Self::Modify { changes, .. } => {
                refs.extend(changes.iter().flat_map(FieldChange::references));
            }
            Self::Extend { children, .. } => refs.extend(children),
            Self::Delete { .. } => {}
        }
        refs
    }
}

/// The actions computed for one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleChanges {
    /// External identifier of the module.
    pub module_id: String,
    /// Actions in replay order.
    pub actions: Vec<ChangeAction>,
}

/// The ordered output of a reconciliation run.
///
/// Actions are grouped by module; within a module the order is the replay
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    modules: Vec<ModuleChanges>,
}

impl ChangeSet {
    /// Appends the actions of one module. Modules without actions are not
    /// recorded.
    pub fn push(&mut self, changes: ModuleChanges) {
        if !changes.actions.is_empty() {
            self.modules.push(changes);
        }
    }

    /// The per-module groups, in snapshot order.
    #[must_use]
    pub fn modules(&self) -> &[ModuleChanges] {
        &self.modules
    }

    /// Every action, in replay order.
    pub fn actions(&self) -> impl Iterator<Item = &ChangeAction> + '_ {
        self.modules.iter().flat_map(|module| &module.actions)
    }

    /// Total number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.iter().map(|module| module.actions.len()).sum()
    }

    /// Whether there is nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Whether the given module contributed any actions.
    #[must_use]
    pub fn contains_module(&self, module_id: &str) -> bool {
        self.modules.iter().any(|module| module.module_id == module_id)
    }
}

/// Counts of actions by class, used for summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionCounts {
    /// Folders and requirements created.
    pub created: usize,
    /// Modify actions, plus moves.
    pub updated: usize,
    /// Delete actions.
    pub deleted: usize,
    /// Creations of type-system entities.
    pub type_changes: usize,
}

impl ActionCounts {
    /// Tallies the given actions.
    pub fn tally<'a>(actions: impl IntoIterator<Item = &'a ChangeAction>) -> Self {
        let mut counts = Self::default();
        for action in actions {
            match action {
                ChangeAction::Create { entity, .. } if entity.kind().is_type_system() => {
                    counts.type_changes += 1;
                }
                ChangeAction::Create { .. } => counts.created += 1,
                ChangeAction::Modify { .. } | ChangeAction::Extend { .. } => counts.updated += 1,
                ChangeAction::Delete { .. } => counts.deleted += 1,
            }
        }
        counts
    }

    /// Number of actions counted.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.created + self.updated + self.deleted + self.type_changes
    }
}

/// A lookup of creations by promise key.
pub(crate) fn creations_by_promise(actions: &[ChangeAction]) -> BTreeMap<&str, Vec<usize>> {
    let mut map: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (index, action) in actions.iter().enumerate() {
        if let ChangeAction::Create { promise, .. } = action {
            map.entry(promise.key()).or_default().push(index);
        }
    }
    map
}
