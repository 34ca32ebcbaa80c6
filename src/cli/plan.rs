use std::path::Path;

use reqsync::{reconcile, ChangeReport};
use tracing::instrument;

use super::{describe_source, print_diagnostics, Inputs};
use crate::cli::terminal::{rule, Colorize};

/// Serialization format of the printed change set.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Output {
    Yaml,
    Json,
}

#[derive(Debug, clap::Parser)]
pub struct Command {
    #[command(flatten)]
    inputs: Inputs,

    /// Format of the printed change set
    #[arg(long, default_value = "yaml")]
    output: Output,
}

impl Command {
    #[instrument]
    pub fn run(self, config: &Path) -> anyhow::Result<()> {
        let (config, model, snapshot) = self.inputs.load(config)?;
        let reconciliation = reconcile(&snapshot, &model, &config)?;

        let rendered = match self.output {
            Output::Yaml => serde_yaml::to_string(&reconciliation.change_set)?,
            Output::Json => serde_json::to_string_pretty(&reconciliation.change_set)?,
        };
        println!("{rendered}");

        print_diagnostics(&reconciliation.diagnostics);

        let report = ChangeReport::new(&snapshot, &reconciliation)?;
        let totals = report.totals();
        eprintln!("{}", rule().dim());
        eprintln!(
            "Planned {} actions for {} modules from {}",
            totals.total(),
            report.modules().len(),
            describe_source(&snapshot.metadata)
        );

        if reconciliation.has_errors() {
            eprintln!(
                "{}",
                format!("⚠️  {} modules aborted", report.skipped().len()).warning()
            );
            std::process::exit(2);
        }
        Ok(())
    }
}
