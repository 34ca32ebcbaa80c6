//! An in-memory requirements model.
//!
//! The [`MemoryModel`] stores modules, their type systems and their item
//! trees as a flat list of nodes linked by parent [`Uuid`]. It implements
//! [`ModelAccessor`] so the reconciler can read from it, and it can replay a
//! [`ChangeSet`] so the result of a synchronization can be inspected,
//! persisted, and reconciled again.

use std::{
    collections::{BTreeMap, HashMap},
    io,
    path::Path,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    domain::{AttributeKind, NodeKind, Value},
    model::{
        ExistingAttributeDefinition, ExistingEnumType, ExistingEnumValue, ExistingNode,
        ExistingRequirementType, ModelAccessor, ModuleRef, TypeDefinitions,
    },
    reconcile::{
        ActionCounts, AssignedValue, ChangeAction, ChangeSet, DefinitionKind, Entity,
        FieldChange, ItemFields, Reference,
    },
};

/// One entity of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Model identifier.
    pub uuid: Uuid,
    /// The containing node; `None` for modules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uuid>,
    /// External identifier.
    pub identifier: String,
    /// Display name.
    pub long_name: String,
    /// Kind specific content.
    #[serde(flatten)]
    pub body: NodeBody,
}

/// Kind specific content of a [`Node`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NodeBody {
    /// A synchronization unit.
    Module,
    /// The folder holding a module's type definitions.
    TypesFolder,
    /// An enumeration data type.
    EnumerationType,
    /// An option of the parent enumeration type.
    EnumValue,
    /// A requirement type.
    RequirementType,
    /// An attribute of the parent requirement type.
    AttributeDefinition {
        /// Declared kind, with enumeration types named by identifier.
        definition: AttributeKind,
    },
    /// A folder.
    Folder(ItemContent),
    /// A requirement.
    Requirement(ItemContent),
}

/// The content shared by folders and requirements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemContent {
    /// Body text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Identifier of the requirement type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement_type: Option<String>,
    /// Attribute values keyed by attribute identifier. Enumeration values
    /// hold option identifiers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

impl NodeBody {
    const fn item(&self) -> Option<(NodeKind, &ItemContent)> {
        match self {
            Self::Folder(content) => Some((NodeKind::Folder, content)),
            Self::Requirement(content) => Some((NodeKind::Requirement, content)),
            _ => None,
        }
    }

    fn item_mut(&mut self) -> Option<&mut ItemContent> {
        match self {
            Self::Folder(content) | Self::Requirement(content) => Some(content),
            _ => None,
        }
    }
}

/// An error raised while replaying a change set.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ApplyError {
    /// A promise was used before the action creating it.
    #[error("module {module:?}: unresolved promise {key:?}")]
    UnresolvedPromise {
        /// The module being applied.
        module: String,
        /// The promise key.
        key: String,
    },

    /// A reference points at a node that doesn't exist.
    #[error("module {module:?}: no node with uuid {uuid}")]
    MissingNode {
        /// The module being applied.
        module: String,
        /// The missing node.
        uuid: Uuid,
    },

    /// An action targets a node of the wrong kind.
    #[error("module {module:?}: node {uuid} can't take a {field} change")]
    InvalidTarget {
        /// The module being applied.
        module: String,
        /// The targeted node.
        uuid: Uuid,
        /// The rejected field.
        field: String,
    },
}

/// An error raised while loading or saving a [`MemoryModel`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The file couldn't be read or written.
    #[error("failed to access model file: {0}")]
    Io(#[from] io::Error),

    /// The file content is invalid.
    #[error("invalid model file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A model held entirely in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryModel {
    nodes: Vec<Node>,

    /// An index from UUID to position in `nodes`.
    #[serde(skip)]
    index: HashMap<Uuid, usize>,
}

impl MemoryModel {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a model from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be read or isn't a valid model.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        let mut model: Self = serde_yaml::from_str(&content)?;
        model.reindex();
        debug!(nodes = model.nodes.len(), path = %path.display(), "loaded model");
        Ok(model)
    }

    /// Writes the model to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the model can't be serialized or written.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Adds an empty module and returns its uuid.
    pub fn add_module(&mut self, identifier: &str, long_name: &str) -> Uuid {
        self.insert(None, identifier, long_name, NodeBody::Module)
    }

    /// A node by uuid.
    #[must_use]
    pub fn node(&self, uuid: Uuid) -> Option<&Node> {
        self.index.get(&uuid).map(|&position| &self.nodes[position])
    }

    /// Finds a folder or requirement by external identifier.
    #[must_use]
    pub fn find_item(&self, identifier: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|node| node.identifier == identifier && node.body.item().is_some())
    }

    /// Number of nodes of any kind.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the model holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Replays every action of `change_set` in order.
    ///
    /// Promises are resolved per module: each creation records the uuid it
    /// assigns under its promise key.
    ///
    /// # Errors
    ///
    /// Returns an error on the first action that can't be applied. Actions
    /// before it remain applied.
    #[instrument(skip_all, fields(actions = change_set.len()))]
    pub fn apply(&mut self, change_set: &ChangeSet) -> Result<ActionCounts, ApplyError> {
        for module in change_set.modules() {
            let mut replay = Replay {
                module: &module.module_id,
                promises: HashMap::new(),
            };
            for action in &module.actions {
                self.apply_action(&mut replay, action)?;
            }
        }
        Ok(ActionCounts::tally(change_set.actions()))
    }

    fn apply_action(
        &mut self,
        replay: &mut Replay<'_>,
        action: &ChangeAction,
    ) -> Result<(), ApplyError> {
        match action {
            ChangeAction::Create {
                promise,
                parent,
                entity,
            } => {
                let parent = self.resolve(replay, parent)?;
                let (identifier, long_name, body) = self.node_content(replay, entity)?;
                let uuid = self.insert(Some(parent), &identifier, &long_name, body);
                replay.promises.insert(promise.key().to_string(), uuid);
            }
            ChangeAction::Modify { target, changes } => {
                let uuid = self.resolve(replay, target)?;
                for change in changes {
                    self.apply_change(replay, uuid, change)?;
                }
            }
            ChangeAction::Delete { target } => {
                let uuid = self.resolve(replay, target)?;
                self.delete(uuid);
            }
            ChangeAction::Extend { target, children } => {
                let parent = self.resolve(replay, target)?;
                for child in children {
                    let child = self.resolve(replay, child)?;
                    self.move_node(child, parent);
                }
            }
        }
        Ok(())
    }

    fn node_content(
        &self,
        replay: &Replay<'_>,
        entity: &Entity,
    ) -> Result<(String, String, NodeBody), ApplyError> {
        Ok(match entity {
            Entity::TypesFolder { long_name } => {
                (long_name.clone(), long_name.clone(), NodeBody::TypesFolder)
            }
            Entity::EnumerationType {
                identifier,
                long_name,
            } => (identifier.clone(), long_name.clone(), NodeBody::EnumerationType),
            Entity::EnumValue {
                identifier,
                long_name,
            } => (identifier.clone(), long_name.clone(), NodeBody::EnumValue),
            Entity::RequirementType {
                identifier,
                long_name,
            } => (identifier.clone(), long_name.clone(), NodeBody::RequirementType),
            Entity::AttributeDefinition {
                identifier,
                long_name,
                definition,
            } => {
                let kind = match definition {
                    DefinitionKind::Primitive(kind) => AttributeKind::from(*kind),
                    DefinitionKind::Enum {
                        data_type,
                        multi_valued,
                    } => AttributeKind::Enum {
                        enum_type: self.identifier_of(replay, data_type)?,
                        multi_valued: *multi_valued,
                    },
                };
                (
                    identifier.clone(),
                    long_name.clone(),
                    NodeBody::AttributeDefinition { definition: kind },
                )
            }
            Entity::Folder(fields) => {
                let content = self.item_content(replay, fields)?;
                (fields.identifier.clone(), fields.long_name.clone(), NodeBody::Folder(content))
            }
            Entity::Requirement(fields) => {
                let content = self.item_content(replay, fields)?;
                (
                    fields.identifier.clone(),
                    fields.long_name.clone(),
                    NodeBody::Requirement(content),
                )
            }
        })
    }

    fn item_content(
        &self,
        replay: &Replay<'_>,
        fields: &ItemFields,
    ) -> Result<ItemContent, ApplyError> {
        let requirement_type = fields
            .requirement_type
            .as_ref()
            .map(|reference| self.identifier_of(replay, reference))
            .transpose()?;
        let attributes = fields
            .attributes
            .iter()
            .map(|assignment| {
                Ok((
                    assignment.attribute.clone(),
                    self.stored_value(replay, &assignment.value)?,
                ))
            })
            .collect::<Result<_, ApplyError>>()?;
        Ok(ItemContent {
            text: fields.text.clone(),
            requirement_type,
            attributes,
        })
    }

    fn stored_value(
        &self,
        replay: &Replay<'_>,
        value: &AssignedValue,
    ) -> Result<Value, ApplyError> {
        match value {
            AssignedValue::Primitive(value) => Ok(value.clone()),
            AssignedValue::Enum(options) => options
                .iter()
                .map(|option| self.identifier_of(replay, option))
                .collect::<Result<_, _>>()
                .map(Value::EnumRefs),
        }
    }

    fn apply_change(
        &mut self,
        replay: &Replay<'_>,
        uuid: Uuid,
        change: &FieldChange,
    ) -> Result<(), ApplyError> {
        let invalid = || ApplyError::InvalidTarget {
            module: replay.module.to_string(),
            uuid,
            field: change.field_name().to_string(),
        };

        match change {
            FieldChange::LongName(long_name) => {
                self.node_mut(replay, uuid)?.long_name.clone_from(long_name);
            }
            FieldChange::Text(text) => {
                let content = self.item_mut(replay, uuid)?.ok_or_else(invalid)?;
                content.text.clone_from(text);
            }
            FieldChange::RequirementType(reference) => {
                let requirement_type = reference
                    .as_ref()
                    .map(|reference| self.identifier_of(replay, reference))
                    .transpose()?;
                let content = self.item_mut(replay, uuid)?.ok_or_else(invalid)?;
                content.requirement_type = requirement_type;
                content.attributes.clear();
            }
            FieldChange::Attribute {
                attribute, value, ..
            } => {
                let value = value
                    .as_ref()
                    .map(|value| self.stored_value(replay, value))
                    .transpose()?;
                let content = self.item_mut(replay, uuid)?.ok_or_else(invalid)?;
                match value {
                    Some(value) => {
                        content.attributes.insert(attribute.clone(), value);
                    }
                    None => {
                        content.attributes.remove(attribute);
                    }
                }
            }
            FieldChange::DataType(reference) => {
                let enum_type = self.identifier_of(replay, reference)?;
                match &mut self.node_mut(replay, uuid)?.body {
                    NodeBody::AttributeDefinition {
                        definition: AttributeKind::Enum { enum_type: e, .. },
                    } => *e = enum_type,
                    _ => return Err(invalid()),
                }
                self.strip_values(uuid);
            }
            FieldChange::MultiValued(multi) => {
                match &mut self.node_mut(replay, uuid)?.body {
                    NodeBody::AttributeDefinition {
                        definition: AttributeKind::Enum { multi_valued, .. },
                    } => *multi_valued = *multi,
                    _ => return Err(invalid()),
                }
                self.strip_values(uuid);
            }
        }
        Ok(())
    }

    fn resolve(&self, replay: &Replay<'_>, reference: &Reference) -> Result<Uuid, ApplyError> {
        let uuid = match reference {
            Reference::Existing(uuid) => *uuid,
            Reference::Promise(promise) => *replay.promises.get(promise.key()).ok_or_else(|| {
                ApplyError::UnresolvedPromise {
                    module: replay.module.to_string(),
                    key: promise.key().to_string(),
                }
            })?,
        };
        if self.index.contains_key(&uuid) {
            Ok(uuid)
        } else {
            Err(replay.missing(uuid))
        }
    }

    fn identifier_of(
        &self,
        replay: &Replay<'_>,
        reference: &Reference,
    ) -> Result<String, ApplyError> {
        let uuid = self.resolve(replay, reference)?;
        self.node(uuid)
            .map(|node| node.identifier.clone())
            .ok_or_else(|| replay.missing(uuid))
    }

    fn node_mut(&mut self, replay: &Replay<'_>, uuid: Uuid) -> Result<&mut Node, ApplyError> {
        self.index
            .get(&uuid)
            .map(|&position| &mut self.nodes[position])
            .ok_or_else(|| replay.missing(uuid))
    }

    fn item_mut(
        &mut self,
        replay: &Replay<'_>,
        uuid: Uuid,
    ) -> Result<Option<&mut ItemContent>, ApplyError> {
        Ok(self.node_mut(replay, uuid)?.body.item_mut())
    }

    fn insert(
        &mut self,
        parent: Option<Uuid>,
        identifier: &str,
        long_name: &str,
        body: NodeBody,
    ) -> Uuid {
        let uuid = Uuid::new_v4();
        self.index.insert(uuid, self.nodes.len());
        self.nodes.push(Node {
            uuid,
            parent,
            identifier: identifier.to_string(),
            long_name: long_name.to_string(),
            body,
        });
        uuid
    }

    /// Removes a node and everything below it.
    ///
    /// Removing an attribute definition also removes the values stored for
    /// it.
    fn delete(&mut self, uuid: Uuid) {
        if matches!(
            self.node(uuid).map(|node| &node.body),
            Some(NodeBody::AttributeDefinition { .. })
        ) {
            self.strip_values(uuid);
        }

        let mut doomed = vec![uuid];
        let mut cursor = 0;
        while let Some(&current) = doomed.get(cursor) {
            doomed.extend(
                self.nodes
                    .iter()
                    .filter(|node| node.parent == Some(current))
                    .map(|node| node.uuid),
            );
            cursor += 1;
        }
        self.nodes.retain(|node| !doomed.contains(&node.uuid));
        self.reindex();
    }

    /// Moves a node to the end of `parent`'s children.
    fn move_node(&mut self, uuid: Uuid, parent: Uuid) {
        if let Some(position) = self.index.get(&uuid).copied() {
            let mut node = self.nodes.remove(position);
            node.parent = Some(parent);
            self.nodes.push(node);
            self.reindex();
        }
    }

    /// Removes the values of an attribute definition from every item of
    /// its requirement type, within the same module.
    fn strip_values(&mut self, definition: Uuid) {
        let Some(node) = self.node(definition) else {
            return;
        };
        let attribute = node.identifier.clone();
        let Some(requirement_type) = node.parent.and_then(|parent| self.node(parent)) else {
            return;
        };
        let requirement_type = requirement_type.identifier.clone();
        let module = self.module_of(definition);

        let affected: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| {
                node.body.item().is_some_and(|(_, content)| {
                    content.requirement_type.as_deref() == Some(requirement_type.as_str())
                })
            })
            .filter(|(_, node)| self.module_of(node.uuid) == module)
            .map(|(position, _)| position)
            .collect();

        for position in affected {
            if let Some(content) = self.nodes[position].body.item_mut() {
                content.attributes.remove(&attribute);
            }
        }
    }

    fn module_of(&self, uuid: Uuid) -> Option<Uuid> {
        let mut current = self.node(uuid)?;
        while let Some(parent) = current.parent {
            current = self.node(parent)?;
        }
        Some(current.uuid)
    }

    fn children(&self, parent: Uuid) -> impl Iterator<Item = &Node> + '_ {
        self.nodes
            .iter()
            .filter(move |node| node.parent == Some(parent))
    }

    fn reindex(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (node.uuid, position))
            .collect();
    }
}

struct Replay<'a> {
    module: &'a str,
    promises: HashMap<String, Uuid>,
}

impl Replay<'_> {
    fn missing(&self, uuid: Uuid) -> ApplyError {
        ApplyError::MissingNode {
            module: self.module.to_string(),
            uuid,
        }
    }
}

impl ModelAccessor for MemoryModel {
    fn find_module(&self, identifier: &str) -> Option<ModuleRef> {
        self.nodes
            .iter()
            .find(|node| matches!(node.body, NodeBody::Module) && node.identifier == identifier)
            .map(|node| ModuleRef {
                uuid: node.uuid,
                identifier: node.identifier.clone(),
                long_name: node.long_name.clone(),
            })
    }

    fn children_of(&self, node: Uuid) -> Vec<ExistingNode> {
        self.children(node)
            .filter_map(|child| {
                let (kind, content) = child.body.item()?;
                Some(ExistingNode {
                    uuid: child.uuid,
                    identifier: child.identifier.clone(),
                    kind,
                    long_name: child.long_name.clone(),
                    text: content.text.clone(),
                    requirement_type: content.requirement_type.clone(),
                })
            })
            .collect()
    }

    fn attribute_value(&self, node: Uuid, attribute_id: &str) -> Option<Value> {
        let (_, content) = self.node(node)?.body.item()?;
        content.attributes.get(attribute_id).cloned()
    }

    fn type_definitions_of(&self, module: &ModuleRef) -> TypeDefinitions {
        let Some(folder) = self
            .children(module.uuid)
            .find(|node| matches!(node.body, NodeBody::TypesFolder))
        else {
            return TypeDefinitions::default();
        };

        let mut definitions = TypeDefinitions {
            folder: Some(folder.uuid),
            ..TypeDefinitions::default()
        };
        for node in self.children(folder.uuid) {
            match node.body {
                NodeBody::EnumerationType => definitions.enum_types.push(ExistingEnumType {
                    uuid: node.uuid,
                    identifier: node.identifier.clone(),
                    long_name: node.long_name.clone(),
                    values: self
                        .children(node.uuid)
                        .map(|value| ExistingEnumValue {
                            uuid: value.uuid,
                            identifier: value.identifier.clone(),
                            long_name: value.long_name.clone(),
                        })
                        .collect(),
                }),
                NodeBody::RequirementType => {
                    definitions.requirement_types.push(ExistingRequirementType {
                        uuid: node.uuid,
                        identifier: node.identifier.clone(),
                        long_name: node.long_name.clone(),
                        attributes: self
                            .children(node.uuid)
                            .filter_map(|attribute| match &attribute.body {
                                NodeBody::AttributeDefinition { definition } => {
                                    Some(ExistingAttributeDefinition {
                                        uuid: attribute.uuid,
                                        identifier: attribute.identifier.clone(),
                                        long_name: attribute.long_name.clone(),
                                        kind: definition.clone(),
                                    })
                                }
                                _ => None,
                            })
                            .collect(),
                    });
                }
                _ => {}
            }
        }
        definitions
    }
}
