use pipeshell::cli::commands::{load_pipeline_file, ListCommand, RunCommand, ValidateCommand};
use pipeshell::cli::output::*;
use pipeshell::cli::{Cli, Command};
use pipeshell::core::state::Outcome;
use pipeshell::execution::Engine;

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Logs go to stderr; stdout carries pipeline output
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pipeshell={}", default_level)));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_template(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_templates(cmd)?,
    }

    Ok(())
}

async fn run_template(cmd: &RunCommand) -> Result<()> {
    let (path, pipelines) = load_pipeline_file(cmd.file.as_ref())?;
    debug!("Loaded pipeline file {}", path.display());
    let template = pipelines.template(&cmd.template)?;

    let mut config = pipelines.engine_config();
    if let Some(secs) = cmd.timeout {
        config = config.with_timeout(Some(Duration::from_secs(secs)));
    }

    let engine = Engine::new(pipelines.bindings().into_shared()).with_config(config);
    if cmd.events {
        engine.add_event_handler(|event| eprintln!("{}", format_graph_event(&event)));
    }

    let mut invocation = engine
        .invoke(&template, cmd.args.clone())
        .await
        .with_context(|| format!("Failed to start template '{}'", cmd.template))?;

    let cancel = invocation.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Interrupted, cancelling", WARN);
            cancel.cancel();
        }
    });

    while let Some(next) = invocation.next().await {
        match next {
            Ok(value) => println!("{}", format_value(&value, cmd.json)),
            Err(_) => break,
        }
    }

    let report = invocation.finish().await;
    interrupt.abort();

    if cmd.events {
        for summary in &report.nodes {
            eprintln!("{}", format_node_summary(summary));
        }
    }

    match &report.outcome {
        Outcome::Success { .. } => Ok(()),
        Outcome::Failure { error, secondary } => {
            error!("Template '{}' failed: {}", cmd.template, error);
            eprintln!("{}", format_failure(error, secondary));
            std::process::exit(exit_code(&report));
        }
        Outcome::Cancelled { .. } => {
            eprintln!("{} {} {}", WARN, style(&cmd.template).bold(), style("cancelled").yellow());
            std::process::exit(exit_code(&report));
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline file...", INFO);

    match load_pipeline_file(Some(&cmd.file)) {
        Ok((_, pipelines)) => {
            println!("{} Pipeline file is valid!", CHECK);
            println!("  Templates: {}", style(pipelines.templates.len()).cyan());
            println!("  Variables: {}", style(pipelines.variables.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&pipelines)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

fn list_templates(cmd: &ListCommand) -> Result<()> {
    let (path, pipelines) = load_pipeline_file(cmd.file.as_ref())?;

    if pipelines.templates.is_empty() {
        println!("{} No templates in {}", INFO, path.display());
        return Ok(());
    }

    println!("{} Templates in {}:", INFO, style(path.display()).dim());
    for (name, config) in &pipelines.templates {
        let params = if config.params.is_empty() {
            String::new()
        } else {
            format!(" {}", config.params.join(" "))
        };
        match &config.description {
            Some(description) => println!(
                "  {}{} - {}",
                style(name).bold(),
                style(params).cyan(),
                style(description).dim()
            ),
            None => println!("  {}{}", style(name).bold(), style(params).cyan()),
        }
    }

    Ok(())
}
