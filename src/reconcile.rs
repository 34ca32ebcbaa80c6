//! The reconciliation engine.
//!
//! [`reconcile`] compares every module of a [`Snapshot`] with its
//! counterpart in the model and produces a [`ChangeSet`] plus diagnostics.
//! Each module is handled by an independent pass: the type system is
//! reconciled first (see [`types`]), then the item tree (see [`tree`]). Both
//! emit into the same ordered buffer. Deletions are buffered separately and
//! appended once everything that might still need the deleted entities has
//! been emitted.

use std::collections::HashSet;

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    domain::{Config, Module, Snapshot},
    model::{ExistingNode, ModelAccessor, ModuleRef},
};

/// Output action types.
pub mod changeset;
pub use changeset::{
    ActionCounts, AssignedValue, AttributeAssignment, ChangeAction, ChangeSet, DefinitionKind,
    Entity, EntityKind, FieldChange, ItemFields, ModuleChanges, PromiseRef, Reference,
};

mod diagnostics;
pub use diagnostics::{Diagnostic, Mode, Severity, Validator, Violation};

pub mod promise;
pub use promise::PromiseRegistry;

pub mod tree;
pub mod types;
pub use types::{AttributeContract, AttributeTable, ValueContract};

#[cfg(test)]
mod tests;

/// A fatal error that aborts the whole run.
///
/// These indicate a defect in the engine rather than a problem with the
/// snapshot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// A promise is used without being created exactly once beforehand.
    #[error("module {module:?} produced a dangling promise {key:?}")]
    DanglingPromise {
        /// The module whose change set is broken.
        module: String,
        /// The promise key.
        key: String,
    },
}

/// The result of reconciling a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Actions for every module that was synchronized.
    pub change_set: ChangeSet,
    /// Every skip, abort and informational notice, in snapshot order.
    pub diagnostics: Vec<Diagnostic>,
}

impl Reconciliation {
    /// Whether any module was aborted.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|diagnostic| diagnostic.severity == Severity::Error)
    }
}

/// Reconciles every module of `snapshot` against the model.
///
/// Modules are processed in parallel; the output keeps snapshot order.
///
/// # Errors
///
/// Returns [`ReconcileError::DanglingPromise`] if any module produced an
/// inconsistent change set. Integrity problems in the snapshot are never
/// errors; they are reported as diagnostics.
#[instrument(skip_all, fields(modules = snapshot.modules.len(), mode = ?config.mode))]
pub fn reconcile<A>(
    snapshot: &Snapshot,
    accessor: &A,
    config: &Config,
) -> Result<Reconciliation, ReconcileError>
where
    A: ModelAccessor + Sync,
{
    let mut diagnostics = Vec::new();
    let mut seen = HashSet::new();
    let mut modules = Vec::with_capacity(snapshot.modules.len());
    for module in &snapshot.modules {
        if seen.insert(module.id.as_str()) {
            modules.push(module);
        } else {
            let mut validator = Validator::new(config.mode, module.id.as_str());
            validator.report(
                None,
                &Violation::DuplicateIdentifier {
                    what: "module",
                    identifier: module.id.to_string(),
                },
            );
            diagnostics.extend(validator.into_diagnostics());
        }
    }

    let outcomes: Vec<_> = modules
        .par_iter()
        .map(|module| reconcile_module(module, accessor, config))
        .collect();

    let mut change_set = ChangeSet::default();
    for outcome in outcomes {
        let outcome = outcome?;
        diagnostics.extend(outcome.diagnostics);
        if let Some(changes) = outcome.changes {
            change_set.push(changes);
        }
    }

    info!(
        actions = change_set.len(),
        diagnostics = diagnostics.len(),
        "reconciliation finished"
    );

    Ok(Reconciliation {
        change_set,
        diagnostics,
    })
}

/// The result of reconciling one module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleOutcome {
    /// The module's actions, or `None` if the module was skipped or aborted.
    pub changes: Option<ModuleChanges>,
    /// Diagnostics raised for the module.
    pub diagnostics: Vec<Diagnostic>,
}

/// Reconciles a single module.
///
/// # Errors
///
/// Returns [`ReconcileError::DanglingPromise`] if the computed actions
/// reference a promise that isn't created exactly once before its first use.
#[instrument(skip_all, fields(module = %module.id))]
pub fn reconcile_module<A: ModelAccessor>(
    module: &Module,
    accessor: &A,
    config: &Config,
) -> Result<ModuleOutcome, ReconcileError> {
    let mut validator = Validator::new(config.mode, module.id.as_str());

    let Some(module_ref) = accessor.find_module(&module.id) else {
        validator.report(
            None,
            &Violation::UnknownModule {
                module: module.id.to_string(),
            },
        );
        return Ok(ModuleOutcome {
            changes: None,
            diagnostics: validator.into_diagnostics(),
        });
    };

    let mut pass = ModulePass::new(module, module_ref, accessor, config, validator);
    pass.reconcile_module_fields();
    let table = pass.reconcile_types();
    pass.reconcile_tree(&table);
    pass.finish()
}

/// The existing folders and requirements of a module, indexed once per pass.
#[derive(Debug, Default)]
pub(crate) struct ExistingIndex {
    nodes: Vec<IndexedNode>,
    by_identifier: std::collections::HashMap<String, usize>,
    post_order: Vec<usize>,
}

#[derive(Debug)]
pub(crate) struct IndexedNode {
    pub(crate) node: ExistingNode,
    pub(crate) parent: Uuid,
}

impl ExistingIndex {
    fn build<A: ModelAccessor>(accessor: &A, root: Uuid) -> Self {
        let mut index = Self::default();
        index.visit(accessor, root);
        index
    }

    fn visit<A: ModelAccessor>(&mut self, accessor: &A, parent: Uuid) {
        for node in accessor.children_of(parent) {
            let uuid = node.uuid;
            let position = self.nodes.len();
            if self.by_identifier.contains_key(&node.identifier) {
                debug!(
                    identifier = %node.identifier,
                    "identifier occurs more than once in the model"
                );
            } else {
                self.by_identifier.insert(node.identifier.clone(), position);
            }
            self.nodes.push(IndexedNode { node, parent });
            self.visit(accessor, uuid);
            self.post_order.push(position);
        }
    }

    pub(crate) fn get(&self, identifier: &str) -> Option<&IndexedNode> {
        self.by_identifier
            .get(identifier)
            .map(|&position| &self.nodes[position])
    }

    /// Every node, children before their parents.
    pub(crate) fn post_order(&self) -> impl Iterator<Item = &IndexedNode> + '_ {
        self.post_order.iter().map(|&position| &self.nodes[position])
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &IndexedNode> + '_ {
        self.nodes.iter()
    }
}

/// State of one module pass.
pub(crate) struct ModulePass<'a, A> {
    module: &'a Module,
    module_ref: ModuleRef,
    accessor: &'a A,
    config: &'a Config,
    validator: Validator,
    registry: PromiseRegistry,
    index: ExistingIndex,
    actions: Vec<ChangeAction>,
    item_deletes: Vec<ChangeAction>,
    type_deletes: Vec<ChangeAction>,
}

impl<'a, A: ModelAccessor> ModulePass<'a, A> {
    fn new(
        module: &'a Module,
        module_ref: ModuleRef,
        accessor: &'a A,
        config: &'a Config,
        validator: Validator,
    ) -> Self {
        let index = ExistingIndex::build(accessor, module_ref.uuid);
        debug!(existing = index.nodes.len(), "indexed existing nodes");
        Self {
            module,
            module_ref,
            accessor,
            config,
            validator,
            registry: PromiseRegistry::new(),
            index,
            actions: Vec::new(),
            item_deletes: Vec::new(),
            type_deletes: Vec::new(),
        }
    }

    fn reconcile_module_fields(&mut self) {
        let Some(long_name) = &self.module.long_name else {
            return;
        };
        if *long_name != self.module_ref.long_name {
            self.actions.push(ChangeAction::Modify {
                target: Reference::Existing(self.module_ref.uuid),
                changes: vec![FieldChange::LongName(long_name.clone())],
            });
        }
    }

    fn report(&mut self, node: Option<&str>, violation: &Violation) {
        self.validator.report(node, violation);
    }

    fn finish(self) -> Result<ModuleOutcome, ReconcileError> {
        let Self {
            module,
            validator,
            mut actions,
            item_deletes,
            type_deletes,
            ..
        } = self;

        actions.extend(item_deletes);
        actions.extend(type_deletes);

        if let Some(key) = promise::find_dangling_promise(&actions) {
            return Err(ReconcileError::DanglingPromise {
                module: module.id.to_string(),
                key,
            });
        }

        let changes = if validator.is_aborted() {
            info!(
                violations = validator.violation_count(),
                "module aborted, discarding its actions"
            );
            None
        } else {
            debug!(actions = actions.len(), "module reconciled");
            Some(ModuleChanges {
                module_id: module.id.to_string(),
                actions,
            })
        };

        Ok(ModuleOutcome {
            changes,
            diagnostics: validator.into_diagnostics(),
        })
    }
}
