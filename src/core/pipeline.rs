use std::{fmt::Display, fs, io, path::PathBuf};

use serde::Serialize;
use subprocess::{Exec, ExitStatus, NullFile};
use thiserror::Error;
use tracing::{info, trace};

use super::{
    archive_root, create_archive, summarize_archive, ArchiveSummary, BlobClient, BuildId, Bundle,
    BundleError, PerformanceMonitor, ProvisionError, PublishContext, StepTiming, UploadError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum PublishStep {
    Clean,
    Activate,
    BuildId,
    Build,
    CreateBundle,
    CopyOutputs,
    Exclude,
    CopyAuxiliary,
    Archive,
    Upload,
}

impl Display for PublishStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishStep::Clean => write!(f, "clean"),
            PublishStep::Activate => write!(f, "activate"),
            PublishStep::BuildId => write!(f, "build-id"),
            PublishStep::Build => write!(f, "build"),
            PublishStep::CreateBundle => write!(f, "create-bundle"),
            PublishStep::CopyOutputs => write!(f, "copy-outputs"),
            PublishStep::Exclude => write!(f, "exclude"),
            PublishStep::CopyAuxiliary => write!(f, "copy-auxiliary"),
            PublishStep::Archive => write!(f, "archive"),
            PublishStep::Upload => write!(f, "upload"),
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum StepError {
    #[error("Build script exited with {0:?}")]
    BuildFailed(ExitStatus),
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("Failed due to unexpected IO error")]
    IO(#[from] io::Error),
    #[error("Failed due to unexpected sub process error")]
    Popen(#[from] subprocess::PopenError),
}

#[derive(Debug, Error)]
pub(crate) enum PublishError {
    #[error("Environment '{}' does not exist", .0.display())]
    EnvironmentMissing(PathBuf),
    #[error("Artifacts directory '{}' contains '{}', which cleaning would remove", .0.display(), .1.display())]
    ArtifactsDirOverlaps(PathBuf, PathBuf),
    #[error("Build script '{}' does not exist", .0.display())]
    BuildScriptMissing(PathBuf),
    #[error("Build script '{}' is not executable", .0.display())]
    BuildScriptNotExecutable(PathBuf),
    #[error("Publish step '{0}' failed")]
    Step(PublishStep, #[source] StepError),
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct PlannedStep {
    pub step: PublishStep,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct PublishReport {
    pub build_id: BuildId,
    pub bundle: PathBuf,
    pub copied: Vec<PathBuf>,
    pub excluded: Vec<PathBuf>,
    pub auxiliary: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
    pub archive: ArchiveSummary,
    pub uploaded_to: Option<String>,
    pub timings: Vec<StepTiming>,
}

/// Runs the build and publishes its outputs, stopping at the first failing
/// step.
pub(crate) struct PublishPipeline<'a> {
    ctx: &'a PublishContext,
    build_id: Option<BuildId>,
    blob_client: Option<&'a BlobClient>,
}

impl<'a> PublishPipeline<'a> {
    pub fn new(ctx: &'a PublishContext) -> PublishPipeline<'a> {
        PublishPipeline {
            ctx,
            build_id: None,
            blob_client: None,
        }
    }

    pub fn with_build_id(mut self, build_id: Option<BuildId>) -> Self {
        self.build_id = build_id;
        self
    }

    pub fn with_upload(mut self, blob_client: Option<&'a BlobClient>) -> Self {
        self.blob_client = blob_client;
        self
    }

    pub fn check_preconditions(&self) -> Result<(), PublishError> {
        let artifacts = self.ctx.artifacts.as_ref();
        let protected = [
            self.ctx.root.as_path(),
            self.ctx.env.path().as_ref(),
            self.ctx.build_script.as_path(),
        ]
        .into_iter()
        .chain(self.ctx.auxiliary_files.iter().map(PathBuf::as_path));
        for path in protected {
            if path.starts_with(artifacts) {
                return Err(PublishError::ArtifactsDirOverlaps(
                    artifacts.to_path_buf(),
                    path.to_path_buf(),
                ));
            }
        }
        if !self.ctx.env.exists() {
            return Err(PublishError::EnvironmentMissing(
                self.ctx.env.path().as_ref().to_path_buf(),
            ));
        }
        if !self.ctx.build_script.is_file() {
            return Err(PublishError::BuildScriptMissing(self.ctx.build_script.clone()));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&self.ctx.build_script)
                .map(|metadata| metadata.permissions().mode())
                .unwrap_or(0);
            if mode & 0o111 == 0 {
                return Err(PublishError::BuildScriptNotExecutable(
                    self.ctx.build_script.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Steps `run` would perform, with their resolved paths.
    pub fn plan(&self, include_upload: bool) -> Vec<PlannedStep> {
        let artifacts = &self.ctx.artifacts;
        let build_id = self
            .build_id
            .map(|build_id| build_id.to_string())
            .unwrap_or_else(|| String::from("<timestamp>"));
        let bundle = artifacts.perf_root().as_ref().join(&build_id);
        let mut steps = vec![
            (
                PublishStep::Clean,
                format!("remove '{}'", artifacts.as_ref().display()),
            ),
            (
                PublishStep::Activate,
                format!("activate environment '{}'", self.ctx.env.path().as_ref().display()),
            ),
            (PublishStep::BuildId, format!("use build id {}", build_id)),
            (
                PublishStep::Build,
                format!(
                    "run '{}' with TRAVIS_BUILD_NUMBER={}",
                    self.ctx.build_script.display(),
                    build_id
                ),
            ),
            (
                PublishStep::CreateBundle,
                format!("create '{}'", bundle.display()),
            ),
            (
                PublishStep::CopyOutputs,
                format!(
                    "copy '{}' into the bundle",
                    artifacts.build_output().as_ref().display()
                ),
            ),
            (
                PublishStep::Exclude,
                String::from("remove excluded artifacts from the bundle"),
            ),
            (
                PublishStep::CopyAuxiliary,
                format!(
                    "copy {} into the bundle",
                    self.ctx
                        .auxiliary_files
                        .iter()
                        .map(|file| format!("'{}'", file.display()))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ),
            (
                PublishStep::Archive,
                format!(
                    "archive the bundle as '{}' into '{}'",
                    archive_root_display(&build_id),
                    artifacts.archive().as_ref().display()
                ),
            ),
        ];
        if include_upload {
            steps.push((
                PublishStep::Upload,
                format!(
                    "upload '{}' to container '{}' as '{}'",
                    artifacts.archive().as_ref().display(),
                    self.ctx.storage.container,
                    self.ctx.storage.blob_name
                ),
            ));
        }
        steps
            .into_iter()
            .map(|(step, description)| PlannedStep { step, description })
            .collect()
    }

    pub fn run(&self) -> Result<PublishReport, PublishError> {
        self.check_preconditions()?;
        let ctx = self.ctx;
        let artifacts = &ctx.artifacts;
        let mut timings = Vec::new();

        run_step(PublishStep::Clean, &mut timings, || {
            if artifacts.as_ref().exists() {
                fs::remove_dir_all(artifacts.as_ref())?;
            }
            Ok(())
        })?;
        let activation = run_step(PublishStep::Activate, &mut timings, || {
            Ok(ctx.env.activation_env()?)
        })?;
        let build_id = run_step(PublishStep::BuildId, &mut timings, || {
            Ok(self.build_id.unwrap_or_else(BuildId::now))
        })?;
        info!(target: "user-log", "Building perf artifacts for build {}", build_id);
        run_step(PublishStep::Build, &mut timings, || {
            let cmd = activation
                .apply(Exec::cmd(&ctx.build_script))
                .env("TRAVIS_BUILD_NUMBER", build_id.to_string())
                .cwd(&ctx.root)
                .stdin(NullFile);
            trace!("Executing command: {}", cmd.to_cmdline_lossy());
            let exit_status = cmd.join()?;
            if exit_status.success() {
                Ok(())
            } else {
                Err(StepError::BuildFailed(exit_status))
            }
        })?;
        let bundle = run_step(PublishStep::CreateBundle, &mut timings, || {
            Ok(Bundle::create(artifacts.bundle(&build_id))?)
        })?;
        let copied = run_step(PublishStep::CopyOutputs, &mut timings, || {
            Ok(bundle.collect_outputs(&artifacts.build_output())?)
        })?;
        let excluded = run_step(PublishStep::Exclude, &mut timings, || {
            Ok(bundle.exclude(&ctx.excluded_artifacts)?)
        })?;
        let (auxiliary, files) = run_step(PublishStep::CopyAuxiliary, &mut timings, || {
            let auxiliary = bundle.add_auxiliary(&ctx.auxiliary_files)?;
            Ok((auxiliary, bundle.manifest()?))
        })?;
        let archive = run_step(PublishStep::Archive, &mut timings, || {
            create_archive(&bundle, &build_id, &artifacts.archive())?;
            Ok(summarize_archive(&artifacts.archive())?)
        })?;
        let uploaded_to = match self.blob_client {
            Some(blob_client) => Some(run_step(PublishStep::Upload, &mut timings, || {
                let url = blob_client.upload_file(
                    artifacts.archive().as_ref(),
                    &ctx.storage.container,
                    &ctx.storage.blob_name,
                )?;
                Ok(url.to_string())
            })?),
            None => {
                info!(target: "user-log", "Skipping upload of {}", artifacts.archive().as_ref().display());
                None
            }
        };

        Ok(PublishReport {
            build_id,
            bundle: bundle.path().as_ref().to_path_buf(),
            copied,
            excluded,
            auxiliary,
            files,
            archive,
            uploaded_to,
            timings,
        })
    }
}

fn archive_root_display(build_id: &str) -> String {
    match build_id.parse::<BuildId>() {
        Ok(build_id) => archive_root(&build_id).display().to_string(),
        Err(_) => format!("perf/{}", build_id),
    }
}

fn run_step<T>(
    step: PublishStep,
    timings: &mut Vec<StepTiming>,
    f: impl FnOnce() -> Result<T, StepError>,
) -> Result<T, PublishError> {
    let monitor = PerformanceMonitor::start(step.to_string());
    let result = f().map_err(|err| PublishError::Step(step, err));
    timings.push(monitor.finish());
    result
}
