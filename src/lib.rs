//! Snapshot to model reconciliation for requirements management data.
//!
//! An RM tool periodically exports a [`Snapshot`] of one or more modules.
//! [`reconcile`] compares each exported module with its counterpart in a
//! requirements model, reached through a [`ModelAccessor`], and produces an
//! ordered [`ChangeSet`] of create, modify, delete and extend actions which,
//! replayed in order, bring the model up to date.
//!
//! ```no_run
//! use reqsync::{reconcile, Config, MemoryModel, Snapshot};
//!
//! # fn main() -> anyhow::Result<()> {
//! let snapshot = Snapshot::load("export.yaml".as_ref())?;
//! let mut model = MemoryModel::load("model.yaml".as_ref())?;
//!
//! let reconciliation = reconcile(&snapshot, &model, &Config::default())?;
//! model.apply(&reconciliation.change_set)?;
//! # Ok(())
//! # }
//! ```

pub mod domain;
pub use domain::{Config, Snapshot};

pub mod model;
pub use model::ModelAccessor;

pub mod reconcile;
pub use reconcile::{reconcile, ChangeSet, Mode, ReconcileError, Reconciliation};

pub mod report;
pub use report::ChangeReport;

pub mod storage;
pub use storage::MemoryModel;
