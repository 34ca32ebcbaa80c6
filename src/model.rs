//! Read-only view over the target model.
//!
//! The reconciler only ever talks to the model through [`ModelAccessor`].
//! Entities in the model are addressed by [`Uuid`]; each one also carries
//! the external identifier it was created from, which is what snapshot
//! entities are matched against.

use uuid::Uuid;

use crate::domain::{AttributeKind, NodeKind, Value};

/// A module in the model that a snapshot module can be synchronized into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRef {
    /// Model identifier.
    pub uuid: Uuid,
    /// External identifier.
    pub identifier: String,
    /// Display name.
    pub long_name: String,
}

/// A folder or requirement that already exists in the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingNode {
    /// Model identifier.
    pub uuid: Uuid,
    /// External identifier.
    pub identifier: String,
    /// Structural kind.
    pub kind: NodeKind,
    /// Display name.
    pub long_name: String,
    /// Body text.
    pub text: Option<String>,
    /// External identifier of the node's requirement type.
    pub requirement_type: Option<String>,
}

/// The type system of a module as it currently exists in the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeDefinitions {
    /// The folder holding all type definitions, if the module has one.
    pub folder: Option<Uuid>,
    /// Enumeration types, in model order.
    pub enum_types: Vec<ExistingEnumType>,
    /// Requirement types, in model order.
    pub requirement_types: Vec<ExistingRequirementType>,
}

/// An enumeration type in the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingEnumType {
    /// Model identifier.
    pub uuid: Uuid,
    /// External identifier.
    pub identifier: String,
    /// Display name.
    pub long_name: String,
    /// Options, in model order.
    pub values: Vec<ExistingEnumValue>,
}

/// One option of an [`ExistingEnumType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingEnumValue {
    /// Model identifier.
    pub uuid: Uuid,
    /// External identifier.
    pub identifier: String,
    /// Display name.
    pub long_name: String,
}

/// A requirement type in the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRequirementType {
    /// Model identifier.
    pub uuid: Uuid,
    /// External identifier.
    pub identifier: String,
    /// Display name.
    pub long_name: String,
    /// Attribute definitions, in model order.
    pub attributes: Vec<ExistingAttributeDefinition>,
}

/// An attribute definition in the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingAttributeDefinition {
    /// Model identifier.
    pub uuid: Uuid,
    /// External identifier (the attribute id).
    pub identifier: String,
    /// Display name.
    pub long_name: String,
    /// Declared kind. Enumeration kinds reference the enumeration type by
    /// its external identifier.
    pub kind: AttributeKind,
}

/// Query surface over the target model.
///
/// Implementations must present a frozen view for the duration of a
/// reconciliation run. A failed lookup is not an error: it means the entity
/// does not exist yet and should be created.
pub trait ModelAccessor {
    /// Finds a module by its external identifier.
    fn find_module(&self, identifier: &str) -> Option<ModuleRef>;

    /// Returns the folders and requirements directly below `node`, in model
    /// order. `node` may be a module.
    fn children_of(&self, node: Uuid) -> Vec<ExistingNode>;

    /// Reads the current value of an attribute on a folder or requirement.
    fn attribute_value(&self, node: Uuid, attribute_id: &str) -> Option<Value>;

    /// Returns the type definitions stored below a module.
    fn type_definitions_of(&self, module: &ModuleRef) -> TypeDefinitions;
}

impl<T: ModelAccessor + ?Sized> ModelAccessor for &T {
    fn find_module(&self, identifier: &str) -> Option<ModuleRef> {
        (**self).find_module(identifier)
    }

    fn children_of(&self, node: Uuid) -> Vec<ExistingNode> {
        (**self).children_of(node)
    }

    fn attribute_value(&self, node: Uuid, attribute_id: &str) -> Option<Value> {
        (**self).attribute_value(node, attribute_id)
    }

    fn type_definitions_of(&self, module: &ModuleRef) -> TypeDefinitions {
        (**self).type_definitions_of(module)
    }
}
