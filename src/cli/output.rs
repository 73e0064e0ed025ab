use clap::ValueEnum;
use color_eyre::eyre::{Context, Result};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Plain,
    Json,
}

pub(crate) fn output_json(value: &impl Serialize) -> Result<()> {
    info!(
        target: "user-ui",
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output into JSON")?
    );
    Ok(())
}
