//! Integrity violations and the diagnostics reported for them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// How integrity violations are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Any violation aborts the module; none of its actions are emitted.
    #[default]
    Strict,
    /// Violations skip only the offending attribute or definition.
    Force,
}

/// An integrity problem found in a snapshot module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    /// The module has no counterpart in the model.
    #[error("no module with identifier {module:?} exists in the model")]
    UnknownModule {
        /// The snapshot module id.
        module: String,
    },

    /// A requirement type or enumeration type is referenced but not declared
    /// in the module.
    #[error("{referrer} references undefined {what} {target:?}")]
    UndefinedTypeReference {
        /// Who holds the reference.
        referrer: String,
        /// `"requirement type"` or `"enumeration type"`.
        what: &'static str,
        /// The missing id.
        target: String,
    },

    /// An attribute is set that the item's requirement type doesn't declare.
    #[error("attribute {attribute:?} is not defined {context}")]
    UndefinedAttribute {
        /// The attribute id.
        attribute: String,
        /// Either the requirement type, or a note that the item has none.
        context: String,
    },

    /// An enumeration attribute selects an option that isn't declared.
    #[error("value {value:?} of attribute {attribute:?} is not an option of {enum_type:?}")]
    UndefinedEnumValue {
        /// The attribute id.
        attribute: String,
        /// The enumeration type id.
        enum_type: String,
        /// The undeclared option.
        value: String,
    },

    /// A value's kind disagrees with its attribute definition.
    #[error("attribute {attribute:?} expects a {expected} value, got {found}")]
    PrimitiveTypeMismatch {
        /// The attribute id.
        attribute: String,
        /// The declared kind.
        expected: String,
        /// The kind of the supplied value.
        found: &'static str,
    },

    /// A single-valued enumeration attribute doesn't select exactly one
    /// option.
    #[error("attribute {attribute:?} takes exactly one value, got {count}")]
    InvalidCardinality {
        /// The attribute id.
        attribute: String,
        /// The number of supplied values.
        count: usize,
    },

    /// An enumeration value is removed from the snapshot while requirements
    /// in the model still select it.
    #[error("value {value:?} of enumeration type {enum_type:?} is still used by {users}")]
    EnumValueInUse {
        /// The enumeration type id.
        enum_type: String,
        /// The removed option.
        value: String,
        /// Identifiers of the requirements using it.
        users: String,
    },

    /// An identifier occurs more than once where it must be unique.
    #[error("duplicate {what} identifier {identifier:?}")]
    DuplicateIdentifier {
        /// What kind of entity is duplicated.
        what: &'static str,
        /// The duplicated id.
        identifier: String,
    },

    /// A node changed between folder and requirement. Handled by deleting
    /// the existing node and creating a fresh one.
    #[error("{identifier:?} changed from {from} to {to}; it will be re-created")]
    StructuralKindConflict {
        /// The node id.
        identifier: String,
        /// The kind in the model.
        from: &'static str,
        /// The kind in the snapshot.
        to: &'static str,
    },
}

impl Violation {
    /// A stable machine-readable name for the violation.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownModule { .. } => "UnknownModule",
            Self::UndefinedTypeReference { .. } => "UndefinedTypeReference",
            Self::UndefinedAttribute { .. } => "UndefinedAttribute",
            Self::UndefinedEnumValue { .. } => "UndefinedEnumValue",
            Self::PrimitiveTypeMismatch { .. } => "PrimitiveTypeMismatch",
            Self::InvalidCardinality { .. } => "InvalidCardinality",
            Self::EnumValueInUse { .. } => "EnumValueInUse",
            Self::DuplicateIdentifier { .. } => "DuplicateIdentifier",
            Self::StructuralKindConflict { .. } => "StructuralKindConflict",
        }
    }

    /// Whether the violation is only informational and never blocks a
    /// module.
    #[must_use]
    pub const fn is_informational(&self) -> bool {
        matches!(self, Self::StructuralKindConflict { .. })
    }

    /// Whether the violation is always recovered locally, whatever the
    /// mode.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnknownModule { .. })
    }
}

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Nothing went wrong; reported for transparency.
    Info,
    /// Something was skipped, but the module was synchronized.
    Warning,
    /// The module was not synchronized.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// A message explaining a skip or abort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// How serious the problem is.
    pub severity: Severity,
    /// Machine readable violation name.
    pub code: String,
    /// The module the problem was found in.
    pub module_id: String,
    /// The item or type the problem concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Human readable description.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.severity, self.code, self.module_id)?;
        if let Some(node) = &self.node_id {
            write!(f, " / {node}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Collects violations for one module pass.
///
/// Callers always skip whatever triggered a violation; the mode only decides
/// whether the module as a whole is still emitted at the end of the pass.
#[derive(Debug)]
pub struct Validator {
    mode: Mode,
    module_id: String,
    diagnostics: Vec<Diagnostic>,
    blocking: usize,
}

impl Validator {
    /// Creates a validator for the given module.
    #[must_use]
    pub fn new(mode: Mode, module_id: impl Into<String>) -> Self {
        Self {
            mode,
            module_id: module_id.into(),
            diagnostics: Vec::new(),
            blocking: 0,
        }
    }

    /// The active mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Records a violation concerning `node`.
    pub fn report(&mut self, node: Option<&str>, violation: &Violation) {
        let severity = if violation.is_informational() {
            info!(module = %self.module_id, node, "{violation}");
            Severity::Info
        } else if violation.is_recoverable() {
            warn!(module = %self.module_id, "{violation}");
            Severity::Warning
        } else {
            warn!(module = %self.module_id, node, "{violation}");
            self.blocking += 1;
            match self.mode {
                Mode::Strict => Severity::Error,
                Mode::Force => Severity::Warning,
            }
        };

        self.diagnostics.push(Diagnostic {
            severity,
            code: violation.code().to_string(),
            module_id: self.module_id.clone(),
            node_id: node.map(str::to_string),
            message: violation.to_string(),
        });
    }

    /// Whether the module must be discarded.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self.mode, Mode::Strict) && self.blocking > 0
    }

    /// Number of non-informational violations.
    #[must_use]
    pub const fn violation_count(&self) -> usize {
        self.blocking
    }

    /// Consumes the validator, returning its diagnostics.
    #[must_use]
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}
