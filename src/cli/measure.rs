use std::path::PathBuf;

use clap::Args;
use color_eyre::{
    eyre::{eyre, Context, Result},
    Help,
};
use owo_colors::OwoColorize;
use tracing::info;

use crate::core::{measure_command, Measurement, PublishConfig, PublishContext};

use super::{output_json, OutputFormat};

lazy_static::lazy_static! {
    static ref DEFAULT_MEASURED_COMMAND: Vec<String> =
        vec![String::from("az"), String::from("--version")];
}

#[derive(Debug, Args)]
pub(crate) struct Params {
    /// Path to perf publish configuration
    #[arg(short, long)]
    config_path: Option<PathBuf>,
    /// Output format
    #[arg(value_enum, short = 'f', long, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,
    /// Number of measured runs
    #[arg(short, long, default_value_t = 10)]
    runs: usize,
    /// Number of unmeasured runs before the measured ones
    #[arg(short, long, default_value_t = 1)]
    warmup: usize,
    /// Command to measure, defaults to 'az --version'
    #[arg(last = true)]
    command: Vec<String>,
}

pub(crate) fn execute(args: Params) -> Result<()> {
    let (config, root) = PublishConfig::load(args.config_path)?;
    let run_context = PublishContext::new(&config, &root)
        .with_context(|| eyre!("Failed to initialize run"))?;
    if !run_context.env.exists() {
        return Err(eyre!(
            "Environment '{}' does not exist",
            run_context.env.path().as_ref().display()
        )
        .with_suggestion(|| "Run 'perf-publish provision' to create the environment"));
    }
    let command = if args.command.is_empty() {
        DEFAULT_MEASURED_COMMAND.clone()
    } else {
        args.command
    };

    let activation = run_context.env.activation_env()?;
    info!(target: "user-log",
        "Measuring '{}' over {} run(s) after {} warmup run(s)",
        command.join(" "),
        args.runs,
        args.warmup
    );
    let measurement = measure_command(&activation, &command, args.runs, args.warmup)
        .with_context(|| eyre!("Failed to measure '{}'", command.join(" ")))?;

    match args.format {
        OutputFormat::Plain => output_plain(&measurement),
        OutputFormat::Json => output_json(&measurement),
    }
}

fn output_plain(measurement: &Measurement) -> Result<()> {
    let stats = &measurement.stats;
    info!(target: "user-ui",
        "{} {} over {} run(s)",
        "Command:".cyan().bold(),
        measurement.command.join(" ").magenta(),
        stats.runs
    );
    for (label, value) in [
        ("min", stats.min),
        ("max", stats.max),
        ("mean", stats.mean),
        ("median", stats.median),
    ] {
        info!(target: "user-ui", "  {:<8} {:.3}s", label, value.as_secs_f64());
    }
    Ok(())
}
