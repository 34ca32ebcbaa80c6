//! Symbolic references to entities that do not exist yet.
//!
//! While reconciling a module, later actions frequently need to point at an
//! entity that an earlier action of the same change set creates: a
//! requirement selecting a freshly added enumeration value, a child below a
//! new folder, and so on. The [`PromiseRegistry`] hands out a stable
//! [`PromiseRef`] per symbolic key and remembers which keys map onto
//! entities that already exist, so callers can always ask for a
//! [`Reference`] by key.

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
};

use uuid::Uuid;

use super::changeset::{creations_by_promise, ChangeAction, PromiseRef, Reference};

/// One component of a symbolic key.
///
/// Identifiers containing whitespace, quotes or backslashes are written as
/// quoted, escaped strings so that keys built from different components
/// never coincide.
fn component(identifier: &str) -> Cow<'_, str> {
    let plain = !identifier.is_empty()
        && !identifier
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\');
    if plain {
        Cow::Borrowed(identifier)
    } else {
        Cow::Owned(format!("{identifier:?}"))
    }
}

/// Symbolic key of a module's types folder.
pub fn types_folder_key(module_id: &str) -> String {
    format!("RequirementTypesFolder {}", component(module_id))
}

/// Symbolic key of an enumeration type.
pub fn enum_type_key(enum_type: &str) -> String {
    format!("EnumerationDataTypeDefinition {}", component(enum_type))
}

/// Symbolic key of an enumeration value.
pub fn enum_value_key(enum_type: &str, value: &str) -> String {
    format!("EnumValue {} {}", component(enum_type), component(value))
}

/// Symbolic key of a requirement type.
pub fn requirement_type_key(requirement_type: &str) -> String {
    format!("RequirementType {}", component(requirement_type))
}

/// Symbolic key of an attribute definition.
pub fn attribute_definition_key(attribute: &str, requirement_type: &str) -> String {
    format!(
        "AttributeDefinition {} {}",
        component(attribute),
        component(requirement_type)
    )
}

/// Symbolic key of a folder or requirement.
pub fn item_key(kind: crate::domain::NodeKind, identifier: &str) -> String {
    format!("{} {}", kind.as_str(), component(identifier))
}

/// Interning table of promises for one module pass.
#[derive(Debug, Default)]
pub struct PromiseRegistry {
    existing: HashMap<String, Uuid>,
    issued: HashSet<String>,
    fulfilled: HashSet<String>,
}

impl PromiseRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the promise for `key`.
    ///
    /// Calling this twice with the same key yields equal handles.
    pub fn promise(&mut self, key: impl Into<String>) -> PromiseRef {
        let key = key.into();
        self.issued.insert(key.clone());
        PromiseRef::new(key)
    }

    /// Records that the entity behind `key` already exists in the model.
    pub fn bind(&mut self, key: impl Into<String>, uuid: Uuid) {
        self.existing.insert(key.into(), uuid);
    }

    /// Forgets an existing binding, so that `key` resolves to a promise.
    ///
    /// Used when an existing entity is deleted and re-created.
    pub fn unbind(&mut self, key: &str) {
        self.existing.remove(key);
    }

    /// Whether `key` is bound to an existing entity.
    #[must_use]
    pub fn is_bound(&self, key: &str) -> bool {
        self.existing.contains_key(key)
    }

    /// Returns the existing entity for `key`, or else the promise for it.
    pub fn resolve(&mut self, key: &str) -> Reference {
        match self.existing.get(key) {
            Some(uuid) => Reference::Existing(*uuid),
            None => Reference::Promise(self.promise(key)),
        }
    }

    /// Returns the promise that a creation of `key` fulfils.
    pub fn fulfil(&mut self, key: impl Into<String>) -> PromiseRef {
        let promise = self.promise(key);
        self.fulfilled.insert(promise.key().to_string());
        promise
    }

    /// Whether a creation for `key` has been emitted.
    #[must_use]
    pub fn is_fulfilled(&self, key: &str) -> bool {
        self.fulfilled.contains(key)
    }

    /// Number of promises handed out so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.issued.len()
    }

    /// Whether no promise was handed out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

/// Checks that every promise used by `actions` is created exactly once, and
/// before it is first used.
///
/// Returns the key of the first offending promise.
pub fn find_dangling_promise(actions: &[ChangeAction]) -> Option<String> {
    let creations = creations_by_promise(actions);
    if let Some((key, _)) = creations.iter().find(|(_, indices)| indices.len() > 1) {
        return Some((*key).to_string());
    }

    for (index, action) in actions.iter().enumerate() {
        for promise in action.references().into_iter().filter_map(Reference::as_promise) {
            match creations.get(promise.key()) {
                Some(created) if created[0] < index => {}
                _ => return Some(promise.key().to_string()),
            }
        }
    }
    None
}
