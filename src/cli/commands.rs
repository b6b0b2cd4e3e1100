//! CLI command definitions

use crate::core::config::PipelineFile;
use crate::core::value::Value;
use crate::process::wire;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

/// Run a pipeline template
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file (defaults to the user config file)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Template to run
    pub template: String,

    /// Positional template arguments
    #[arg(value_parser = parse_value)]
    pub args: Vec<Value>,

    /// Print output values as JSON
    #[arg(long)]
    pub json: bool,

    /// Cancel the run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print node events to stderr as they happen
    #[arg(long)]
    pub events: bool,
}

/// Validate a pipeline file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List the templates of a pipeline file
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Path to pipeline YAML file (defaults to the user config file)
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

/// Load the given pipeline file, or the default one
pub fn load_pipeline_file(file: Option<&PathBuf>) -> Result<(PathBuf, PipelineFile)> {
    let path = match file {
        Some(path) => path.clone(),
        None => PipelineFile::default_path()
            .context("No pipeline file given and no config directory available")?,
    };
    let pipelines = PipelineFile::from_file(&path)
        .with_context(|| format!("Failed to load pipeline file {}", path.display()))?;
    Ok((path, pipelines))
}

/// Template arguments use the same decoding as process output lines
pub fn parse_value(s: &str) -> Result<Value, String> {
    Ok(wire::decode(s))
}
