//! Summaries of a synchronization run.
//!
//! A [`ChangeReport`] condenses a [`Reconciliation`] into per-module action
//! counts and renders them as a commit message, together with the provenance
//! recorded in the snapshot metadata and a digest of the change set.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    domain::{Metadata, Snapshot},
    reconcile::{ActionCounts, ChangeSet, Diagnostic, Reconciliation, Severity},
};

/// Action counts of one synchronized module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    /// External identifier of the module.
    pub module_id: String,
    /// What the module's actions do.
    pub counts: ActionCounts,
}

/// The outcome of a run, ready to be printed or committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeReport {
    metadata: Metadata,
    modules: Vec<ModuleSummary>,
    skipped: Vec<String>,
    digest: String,
}

impl ChangeReport {
    /// Builds the report of `reconciliation`, which was computed from
    /// `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the change set cannot be serialized for hashing.
    pub fn new(
        snapshot: &Snapshot,
        reconciliation: &Reconciliation,
    ) -> Result<Self, serde_json::Error> {
        let modules = reconciliation
            .change_set
            .modules()
            .iter()
            .map(|module| ModuleSummary {
                module_id: module.module_id.clone(),
                counts: ActionCounts::tally(&module.actions),
            })
            .collect();

        let mut skipped: Vec<String> = Vec::new();
        for diagnostic in reconciliation.diagnostics.iter().filter(|d| skips_module(d)) {
            if !skipped.contains(&diagnostic.module_id) {
                skipped.push(diagnostic.module_id.clone());
            }
        }

        Ok(Self {
            metadata: snapshot.metadata.clone(),
            modules,
            skipped,
            digest: digest(&reconciliation.change_set)?,
        })
    }

    /// Per-module summaries, in snapshot order.
    #[must_use]
    pub fn modules(&self) -> &[ModuleSummary] {
        &self.modules
    }

    /// Identifiers of modules that were not synchronized.
    #[must_use]
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Hex encoded SHA-256 of the serialized change set.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Counts summed over every module.
    #[must_use]
    pub fn totals(&self) -> ActionCounts {
        self.modules
            .iter()
            .fold(ActionCounts::default(), |total, module| ActionCounts {
                created: total.created + module.counts.created,
                updated: total.updated + module.counts.updated,
                deleted: total.deleted + module.counts.deleted,
                type_changes: total.type_changes + module.counts.type_changes,
            })
    }

    /// Renders the report as a commit message.
    #[must_use]
    pub fn commit_message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.modules.len() == 1 { "" } else { "s" };
        write!(f, "Synchronized {} module{plural}", self.modules.len())?;
        if !self.metadata.tool.is_empty() {
            write!(f, " from {}", self.metadata.tool)?;
        }
        writeln!(f)?;

        if !self.modules.is_empty() || !self.skipped.is_empty() {
            writeln!(f)?;
        }
        for module in &self.modules {
            let counts = module.counts;
            writeln!(
                f,
                "- {}: {} created, {} updated, {} deleted, {} type changes",
                module.module_id,
                counts.created,
                counts.updated,
                counts.deleted,
                counts.type_changes
            )?;
        }
        for module in &self.skipped {
            writeln!(f, "- {module}: skipped")?;
        }

        writeln!(f)?;
        if !self.metadata.tool.is_empty() {
            writeln!(f, "Source-Tool: {}", self.metadata.tool)?;
        }
        if !self.metadata.revision.is_empty() {
            writeln!(f, "Source-Revision: {}", self.metadata.revision)?;
        }
        if !self.metadata.connector.is_empty() {
            writeln!(f, "Source-Connector: {}", self.metadata.connector)?;
        }
        writeln!(f, "Change-Set-Digest: sha256:{}", self.digest)?;
        write!(f, "Generated-By: reqsync {}", env!("CARGO_PKG_VERSION"))
    }
}

/// Whether `diagnostic` means its module was not synchronized.
///
/// A repeated module id is reported against the module, but only the repeat
/// is dropped; the first occurrence is still synchronized.
fn skips_module(diagnostic: &Diagnostic) -> bool {
    let repeated_module = diagnostic.code == "DuplicateIdentifier" && diagnostic.node_id.is_none();
    (diagnostic.severity == Severity::Error && !repeated_module)
        || diagnostic.code == "UnknownModule"
}

/// Hashes the JSON serialization of a change set.
///
/// # Errors
///
/// Returns an error if the change set cannot be serialized.
pub fn digest(change_set: &ChangeSet) -> Result<String, serde_json::Error> {
    let encoded = serde_json::to_vec(change_set)?;
    let hash = Sha256::digest(encoded);
    Ok(format!("{hash:x}"))
}
