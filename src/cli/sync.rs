use std::{fs, path::Path};

use anyhow::Context;
use reqsync::{reconcile, reconcile::ModuleChanges, ChangeReport};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use super::{print_diagnostics, Inputs};
use crate::cli::terminal::Colorize;

#[derive(Debug, clap::Parser)]
pub struct Command {
    #[command(flatten)]
    inputs: Inputs,

    /// Show what would be changed without making changes
    #[arg(long)]
    dry_run: bool,
}

impl Command {
    #[instrument]
    pub fn run(self, config: &Path) -> anyhow::Result<()> {
        let (config, mut model, snapshot) = self.inputs.load(config)?;
        let reconciliation = reconcile(&snapshot, &model, &config)?;
        print_diagnostics(&reconciliation.diagnostics);

        let report = ChangeReport::new(&snapshot, &reconciliation)?;

        if reconciliation.change_set.is_empty() {
            println!("{}", "✅ Model is up to date.".success());
        } else if self.dry_run {
            println!("Would apply {} actions:", reconciliation.change_set.len());
            println!();
            println!("{report}");
        } else {
            let dir = config.change_set_dir();
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            for module in reconciliation.change_set.modules() {
                write_change_set(dir, module)?;
            }

            let counts = model.apply(&reconciliation.change_set)?;
            model
                .save(&self.inputs.model)
                .with_context(|| format!("failed to write model {}", self.inputs.model.display()))?;
            info!(actions = counts.total(), "applied change set");

            println!("{report}");
        }

        if reconciliation.has_errors() {
            std::process::exit(2);
        }
        Ok(())
    }
}

/// Writes one module's actions to `<dir>/<module>.yaml`.
fn write_change_set(dir: &Path, module: &ModuleChanges) -> anyhow::Result<()> {
    let path = dir.join(format!("{}.yaml", file_stem(&module.module_id)));
    let content = serde_yaml::to_string(module)?;
    fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))
}

/// A file name safe rendition of a module identifier.
///
/// Identifiers that had to be rewritten get a short hash of the original
/// appended, so distinct modules never share a file.
fn file_stem(module_id: &str) -> String {
    let sanitized: String = module_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized == module_id {
        return sanitized;
    }
    let hash = Sha256::digest(module_id.as_bytes());
    format!("{sanitized}~{}", &format!("{hash:x}")[..8])
}
