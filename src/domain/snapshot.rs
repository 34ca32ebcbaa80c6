//! In-memory representation of an exported RM snapshot.
//!
//! A [`Snapshot`] holds one or more [`Module`]s. Each module declares its
//! enumeration types and requirement types, and carries an ordered forest of
//! [`Item`]s. Snapshots are plain data; reconciliation lives in
//! [`crate::reconcile`].

use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::domain::{AttributeKind, RmId, Value};

/// Provenance information attached to a snapshot by the exporting connector.
///
/// These fields are never validated; they only end up in reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Name and version of the RM tool.
    #[serde(default)]
    pub tool: String,
    /// Revision of the exported data.
    #[serde(default)]
    pub revision: String,
    /// Name and version of the connector that produced the snapshot.
    #[serde(default)]
    pub connector: String,
}

/// A full export, possibly covering several modules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Provenance of the export.
    #[serde(default)]
    pub metadata: Metadata,
    /// The exported modules.
    #[serde(default)]
    pub modules: Vec<Module>,
}

impl Snapshot {
    /// Reads a snapshot from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid
    /// snapshot.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Errors raised while reading a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The content is not a valid snapshot.
    #[error("invalid snapshot: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// One synchronization unit, matched by `id` against a module in the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Stable identifier, unique within the snapshot.
    pub id: RmId,
    /// Display name. Left untouched in the model when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    /// Enumeration types keyed by id.
    #[serde(default)]
    pub enum_types: BTreeMap<String, EnumerationType>,
    /// Requirement types keyed by id.
    #[serde(default)]
    pub requirement_types: BTreeMap<String, RequirementType>,
    /// Top level items, in document order.
    #[serde(default)]
    pub items: Vec<Item>,
}

/// An enumeration data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationType {
    /// Display name.
    pub long_name: String,
    /// The options, in declaration order.
    #[serde(default)]
    pub values: Vec<EnumValue>,
}

impl EnumerationType {
    /// Looks up an option by id.
    #[must_use]
    pub fn value(&self, id: &str) -> Option<&EnumValue> {
        self.values.iter().find(|value| value.id == id)
    }
}

/// One option of an [`EnumerationType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    /// Identifier, unique within the enumeration type.
    pub id: String,
    /// Display name.
    pub long_name: String,
}

/// A requirement type and the attributes it declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementType {
    /// Display name.
    pub long_name: String,
    /// Attribute definitions keyed by attribute id.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeDefinition>,
}

/// The declaration of one attribute of a requirement type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    /// Display name.
    pub long_name: String,
    /// What values the attribute accepts.
    #[serde(flatten)]
    pub kind: AttributeKind,
}

/// Whether an item is a container or a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// A node with children.
    Folder,
    /// A leaf node.
    Requirement,
}

impl NodeKind {
    /// The name used in promise keys and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Folder => "Folder",
            Self::Requirement => "Requirement",
        }
    }
}

/// A requirement or folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stable identifier, unique within the module.
    pub id: RmId,
    /// Display name.
    #[serde(default)]
    pub long_name: String,
    /// Body text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Identifier of the item's requirement type.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub requirement_type: Option<String>,
    /// Attribute values keyed by attribute id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    /// Child items, in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Item>,
}

impl Item {
    /// The structural kind of the item.
    ///
    /// An item with at least one child is a folder, anything else is a
    /// requirement. This means a folder that was emptied in the RM tool is
    /// indistinguishable from a requirement.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        if self.children.is_empty() {
            NodeKind::Requirement
        } else {
            NodeKind::Folder
        }
    }
}

impl Module {
    /// Iterate over every item depth-first, in document order.
    ///
    /// Each step yields the item together with its ancestors, outermost
    /// first. Calling `walk` again starts a fresh traversal.
    #[must_use]
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: vec![self.items.iter()],
            ancestors: Vec::new(),
        }
    }

    /// Total number of items in the module.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.walk().count()
    }
}

/// An item yielded by [`Module::walk`].
#[derive(Debug, Clone)]
pub struct WalkEntry<'a> {
    /// The item itself.
    pub item: &'a Item,
    /// The chain of ancestors, outermost first.
    pub ancestors: Vec<&'a Item>,
}

impl WalkEntry<'_> {
    /// The direct parent, or `None` for top level items.
    #[must_use]
    pub fn parent(&self) -> Option<&Item> {
        self.ancestors.last().copied()
    }
}

/// Depth-first iterator over the items of a [`Module`].
#[derive(Debug)]
pub struct Walk<'a> {
    stack: Vec<std::slice::Iter<'a, Item>>,
    ancestors: Vec<&'a Item>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = WalkEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let level = self.stack.last_mut()?;
            if let Some(item) = level.next() {
                let entry = WalkEntry {
                    item,
                    ancestors: self.ancestors.clone(),
                };
                if !item.children.is_empty() {
                    self.ancestors.push(item);
                    self.stack.push(item.children.iter());
                }
                return Some(entry);
            }
            self.stack.pop();
            self.ancestors.pop();
        }
    }
}
