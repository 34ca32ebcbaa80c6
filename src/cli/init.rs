use std::path::{Path, PathBuf};

use anyhow::Context;
use reqsync::{Config, MemoryModel, ModelAccessor};
use tracing::instrument;

use crate::cli::terminal::Colorize;

#[derive(Debug, clap::Parser)]
pub struct Command {
    /// The model file to create or extend
    #[arg(long, default_value = "model.yaml")]
    model: PathBuf,

    /// External identifier of the new module, as used in snapshots
    #[arg(long)]
    module: String,

    /// Display name of the new module (defaults to the identifier)
    #[arg(long)]
    long_name: Option<String>,
}

impl Command {
    #[instrument]
    pub fn run(self, config_path: &Path) -> anyhow::Result<()> {
        let mut model = if self.model.exists() {
            MemoryModel::load(&self.model)
                .with_context(|| format!("failed to load model {}", self.model.display()))?
        } else {
            MemoryModel::new()
        };

        if model.find_module(&self.module).is_some() {
            anyhow::bail!(
                "module '{}' already exists in {}",
                self.module,
                self.model.display()
            );
        }

        let long_name = self.long_name.as_deref().unwrap_or(&self.module);
        model.add_module(&self.module, long_name);
        model
            .save(&self.model)
            .with_context(|| format!("failed to write model {}", self.model.display()))?;
        println!(
            "{}",
            format!("✅ Added module '{}' to {}", self.module, self.model.display()).success()
        );

        if !config_path.exists() {
            Config::default()
                .save(config_path)
                .map_err(|e| anyhow::anyhow!("Failed to create {}: {e}", config_path.display()))?;
            println!("  Created: {}", config_path.display());
        }

        Ok(())
    }
}
