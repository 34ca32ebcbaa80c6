use std::path::{Path, PathBuf};

mod init;
mod plan;
mod sync;
mod terminal;

use anyhow::Context;
use clap::ArgAction;
use reqsync::{domain::Metadata, reconcile::Diagnostic, Config, MemoryModel, Mode, Snapshot};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::cli::terminal::Colorize;

#[derive(Debug, clap::Parser)]
#[command(version, about)]
pub struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the configuration file
    #[arg(short, long, default_value = "reqsync.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        Self::setup_logging(self.verbose);
        self.command.run(&self.config)
    }

    fn setup_logging(verbosity: u8) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let level = match verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };

        let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false)
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

#[derive(Debug, clap::Parser)]
pub enum Command {
    /// Add an empty module to a model file, creating the file if needed
    Init(init::Command),

    /// Compute the change set for a snapshot without applying it
    ///
    /// Exits with code 2 if any module was aborted.
    Plan(plan::Command),

    /// Compute the change set, record it and apply it to the model
    Sync(sync::Command),
}

impl Command {
    fn run(self, config: &Path) -> anyhow::Result<()> {
        match self {
            Self::Init(command) => command.run(config)?,
            Self::Plan(command) => command.run(config)?,
            Self::Sync(command) => command.run(config)?,
        }
        Ok(())
    }
}

/// Inputs shared by `plan` and `sync`.
#[derive(Debug, clap::Args)]
pub struct Inputs {
    /// The model file to reconcile against
    #[arg(long, default_value = "model.yaml")]
    model: PathBuf,

    /// A snapshot file, or a directory of `*.yaml`/`*.yml` snapshot files
    #[arg(long)]
    snapshot: PathBuf,

    /// Skip offending attributes and definitions instead of aborting the
    /// module
    #[arg(long)]
    force: bool,
}

impl Inputs {
    /// Loads the configuration, model and snapshot.
    #[instrument(skip(self))]
    fn load(&self, config: &Path) -> anyhow::Result<(Config, MemoryModel, Snapshot)> {
        let mut config = load_config(config)?;
        if self.force {
            config.set_mode(Mode::Force);
        }

        let model = MemoryModel::load(&self.model)
            .with_context(|| format!("failed to load model {}", self.model.display()))?;
        let snapshot = load_snapshot(&self.snapshot)?;
        debug!(modules = snapshot.modules.len(), "loaded snapshot");

        Ok((config, model, snapshot))
    }
}

/// Loads the configuration file, falling back to the defaults if it doesn't
/// exist.
fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        debug!(path = %path.display(), "no configuration file, using defaults");
        return Ok(Config::default());
    }
    Config::load(path).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}

/// Loads a snapshot file, or merges every snapshot file below a directory.
///
/// Files in a directory are read in path order; the metadata of the first
/// file wins.
fn load_snapshot(path: &Path) -> anyhow::Result<Snapshot> {
    if !path.is_dir() {
        return Snapshot::load(path)
            .with_context(|| format!("failed to load snapshot {}", path.display()));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| {
            path.extension()
                .is_some_and(|extension| extension == "yaml" || extension == "yml")
        })
        .collect();
    paths.sort();

    let mut merged: Option<Snapshot> = None;
    for file in &paths {
        let snapshot = Snapshot::load(file)
            .with_context(|| format!("failed to load snapshot {}", file.display()))?;
        match &mut merged {
            Some(merged) => merged.modules.extend(snapshot.modules),
            None => merged = Some(snapshot),
        }
    }

    merged.ok_or_else(|| anyhow::anyhow!("no snapshot files found in {}", path.display()))
}

/// Prints diagnostics to stderr.
fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let line = diagnostic.to_string();
        let line = match diagnostic.severity {
            reqsync::reconcile::Severity::Error => line.error(),
            reqsync::reconcile::Severity::Warning => line.warning(),
            reqsync::reconcile::Severity::Info => line.dim(),
        };
        eprintln!("{line}");
    }
}

/// A one line description of the snapshot's origin.
fn describe_source(metadata: &Metadata) -> String {
    match (metadata.tool.is_empty(), metadata.revision.is_empty()) {
        (true, _) => "snapshot".to_string(),
        (false, true) => metadata.tool.clone(),
        (false, false) => format!("{} (revision {})", metadata.tool, metadata.revision),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    const SNAPSHOT_A: &str = "
metadata: {tool: RM Tool, revision: '7'}
modules:
  - id: a
";

    const SNAPSHOT_B: &str = "
metadata: {tool: Other}
modules:
  - id: b
";

    #[test]
    fn snapshot_directories_are_merged_in_path_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("2-b.yml"), SNAPSHOT_B).unwrap();
        fs::write(dir.path().join("1-a.yaml"), SNAPSHOT_A).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let snapshot = load_snapshot(dir.path()).unwrap();

        assert_eq!(snapshot.metadata.tool, "RM Tool");
        let ids: Vec<_> = snapshot.modules.iter().map(|m| m.id.to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn empty_snapshot_directory_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load_snapshot(dir.path()).is_err());
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join("reqsync.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn source_description_uses_metadata() {
        let metadata = Metadata {
            tool: "RM Tool".into(),
            revision: "7".into(),
            connector: String::new(),
        };
        assert_eq!(describe_source(&metadata), "RM Tool (revision 7)");
        assert_eq!(describe_source(&Metadata::default()), "snapshot");
    }
}
