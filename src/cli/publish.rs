use std::path::PathBuf;

use chrono_humanize::{Accuracy, HumanTime, Tense};
use clap::Args;
use color_eyre::{
    eyre::{eyre, Context, Result},
    Help,
};
use owo_colors::OwoColorize;
use tracing::info;

use crate::core::{
    total_duration, BlobClient, BuildId, PlannedStep, PublishConfig, PublishContext, PublishError,
    PublishPipeline, PublishReport, StorageCredentials,
};

use super::{output_json, OutputFormat};

#[derive(Debug, Args)]
pub(crate) struct Params {
    /// Path to perf publish configuration
    #[arg(short, long)]
    config_path: Option<PathBuf>,
    /// Output format
    #[arg(value_enum, short = 'f', long, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,
    /// Print the steps that would run without running them
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Build and archive the bundle without uploading it
    #[arg(long, default_value_t = false)]
    skip_upload: bool,
    /// Build id to use instead of the current timestamp
    #[arg(long)]
    build_id: Option<BuildId>,
    #[command(flatten)]
    storage: StorageArgs,
}

#[derive(Debug, Args)]
struct StorageArgs {
    /// Storage connection string
    #[arg(long, env = "AZURE_STORAGE_CONNECTION_STRING", hide_env_values = true)]
    connection_string: Option<String>,
    /// Storage account name
    #[arg(long, env = "AZURE_STORAGE_ACCOUNT")]
    account_name: Option<String>,
    /// Storage account key
    #[arg(long, env = "AZURE_STORAGE_KEY", hide_env_values = true)]
    account_key: Option<String>,
    /// Shared access signature token
    #[arg(long, env = "AZURE_STORAGE_SAS_TOKEN", hide_env_values = true)]
    sas_token: Option<String>,
}

impl StorageArgs {
    fn credentials(&self) -> Result<StorageCredentials> {
        Ok(StorageCredentials::resolve(
            self.connection_string.as_deref(),
            self.account_name.as_deref(),
            self.account_key.as_deref(),
            self.sas_token.as_deref(),
        )
        .context("Failed to determine storage credentials")
        .with_suggestion(|| {
            "Set AZURE_STORAGE_CONNECTION_STRING, or AZURE_STORAGE_ACCOUNT with AZURE_STORAGE_KEY or AZURE_STORAGE_SAS_TOKEN, or pass --skip-upload"
        })?)
    }
}

pub(crate) fn execute(args: Params) -> Result<()> {
    let (config, root) = PublishConfig::load(args.config_path)?;
    let run_context = PublishContext::new(&config, &root)
        .with_context(|| eyre!("Failed to initialize run"))?;

    if args.dry_run {
        let plan = PublishPipeline::new(&run_context)
            .with_build_id(args.build_id)
            .plan(!args.skip_upload);
        return match args.format {
            OutputFormat::Plain => output_plan_plain(&plan),
            OutputFormat::Json => output_json(&plan),
        };
    }

    let blob_client = if args.skip_upload {
        None
    } else {
        Some(
            BlobClient::new(
                args.storage.credentials()?,
                run_context.storage.endpoint.as_deref(),
            )
            .context("Failed to initialize blob storage client")?,
        )
    };
    let pipeline = PublishPipeline::new(&run_context)
        .with_build_id(args.build_id)
        .with_upload(blob_client.as_ref());

    let report = match pipeline.run() {
        Ok(report) => report,
        Err(err @ PublishError::EnvironmentMissing(_)) => {
            return Err(eyre!(err)
                .with_suggestion(|| "Run 'perf-publish provision' to create the environment"));
        }
        Err(err @ PublishError::ArtifactsDirOverlaps(_, _)) => {
            return Err(eyre!(err).with_suggestion(|| {
                "Point 'artifacts_dir' at a directory used only for build artifacts"
            }));
        }
        Err(err @ PublishError::BuildScriptNotExecutable(_)) => {
            return Err(eyre!(err).with_suggestion(|| "Make the build script executable"));
        }
        Err(err) => return Err(eyre!(err)),
    };

    match args.format {
        OutputFormat::Plain => output_plain(&report),
        OutputFormat::Json => output_json(&report),
    }
}

fn output_plan_plain(plan: &[PlannedStep]) -> Result<()> {
    for (index, planned) in plan.iter().enumerate() {
        info!(target: "user-ui",
            "{:>2}. {} {}",
            index + 1,
            format!("{}:", planned.step).cyan().bold(),
            planned.description
        );
    }
    Ok(())
}

fn output_plain(report: &PublishReport) -> Result<()> {
    match report.build_id.started_at() {
        Some(started_at) => info!(target: "user-ui",
            "{} {} started {}",
            "Build:".cyan().bold(),
            report.build_id.magenta(),
            HumanTime::from(started_at).to_text_en(Accuracy::Rough, Tense::Past)
        ),
        None => info!(target: "user-ui", "{} {}", "Build:".cyan().bold(), report.build_id.magenta()),
    }
    info!(target: "user-ui",
        "{} {} with {} file(s)",
        "Bundle:".cyan().bold(),
        report.bundle.display().blue(),
        report.files.len().magenta()
    );
    for file in report.files.iter() {
        info!(target: "user-ui", "  - {}", file.display());
    }
    for file in report.excluded.iter() {
        info!(target: "user-ui", "  {} {}", "excluded".yellow(), file.display());
    }
    info!(target: "user-ui",
        "{} {} ({} bytes, sha256 {})",
        "Archive:".cyan().bold(),
        report.archive.path.display().blue(),
        report.archive.size,
        report.archive.sha256
    );
    match report.uploaded_to.as_ref() {
        Some(url) => info!(target: "user-ui", "{} {}", "Uploaded:".green().bold(), url),
        None => info!(target: "user-ui", "{} skipped", "Uploaded:".yellow().bold()),
    }
    for timing in report.timings.iter() {
        info!(target: "user-ui",
            "  {:<16} {:.3}s",
            timing.label,
            timing.duration.as_secs_f64()
        );
    }
    info!(target: "user-ui",
        "{} {:.3}s",
        "Total:".cyan().bold(),
        total_duration(&report.timings).as_secs_f64()
    );
    Ok(())
}
