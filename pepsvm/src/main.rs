use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::pipeline::{write_error_file, Pipeline, RunKind};
use crate::prediction_tools::structure_features::DsspExecutable;
use crate::prediction_tools::svm_light::SvmLightCommands;

mod analysis;
mod attributes;
mod config;
mod data_handling;
mod errors;
mod features;
mod helper_functions;
mod models;
mod pipeline;
mod prediction_tools;
#[cfg(test)]
mod test_fixtures;

/// Peptide annotation and SVM classification pipeline.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Run type to execute.
    #[arg(value_enum)]
    run: RunKind,

    /// JSON run configuration.
    #[arg(short, long)]
    config: PathBuf,
}

fn execute(cli: &Cli, config: &PipelineConfig) -> anyhow::Result<()> {
    let svm = if cli.run.uses_svm() {
        Some(SvmLightCommands::from_config(&config.svm)?)
    } else {
        None
    };
    let structure_engine = match (&config.models, cli.run.computes_features()) {
        (Some(models), true) => Some(DsspExecutable::from_command(&models.dssp_command)?),
        _ => None,
    };

    let pipeline = Pipeline::new(config, cli.run, svm, structure_engine)?;
    pipeline
        .run()
        .with_context(|| format!("{:?} run '{}' failed", cli.run, config.run_name))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_path(&cli.config)
        .with_context(|| format!("could not load configuration {}", cli.config.display()))?;
    info!("Run '{}' in {}", config.run_name, config.run_dir().display());

    if let Err(err) = execute(&cli, &config) {
        error!("{:#}", err);
        // An existing error file already describes the first failure.
        let recorded = matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::ErrorExists { .. }));
        if !recorded {
            match write_error_file(&config, &err) {
                Ok(path) => info!("Wrote error file {}", path.display()),
                Err(write_err) => error!("Could not write error file: {}", write_err),
            }
        }
        return Err(err);
    }
    Ok(())
}
