use std::{
    env,
    fs::File,
    path::{Path, PathBuf},
};

use color_eyre::{
    eyre::{eyre, Context, Result},
    Help,
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use lazy_static::lazy_static;
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{ArtifactsPath, PackagePattern, VirtualEnv, VirtualEnvPath};

lazy_static! {
    pub static ref DEFAULT_CONFIG_FILE: PathBuf = PathBuf::from("perf-publish.json");
    static ref DEFAULT_WHEEL_PATTERNS: Vec<String> =
        vec![String::from("azure_cli_*.whl"), String::from("azure_cli-*.whl")];
    static ref DEFAULT_EXCLUDED_ARTIFACTS: Vec<String> = vec![String::from("azure_cli_fulltest*")];
    static ref DEFAULT_AUXILIARY_FILES: Vec<PathBuf> = vec![
        PathBuf::from("scripts").join("performance").join("measure.py"),
        PathBuf::from("scripts").join("performance").join("install.sh"),
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub container: String,
    pub blob_name: String,
    pub endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            container: String::from("perf"),
            blob_name: String::from("perf.tar"),
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    pub artifacts_dir: PathBuf,
    pub env_dir: PathBuf,
    pub build_script: PathBuf,
    pub python: String,
    pub wheel_dir: PathBuf,
    pub wheel_patterns: Vec<String>,
    pub excluded_artifacts: Vec<String>,
    pub auxiliary_files: Vec<PathBuf>,
    pub storage: StorageConfig,
}

impl Default for PublishConfig {
    fn default() -> Self {
        PublishConfig {
            artifacts_dir: PathBuf::from("artifacts"),
            env_dir: PathBuf::from("env"),
            build_script: PathBuf::from("scripts").join("ci").join("build.sh"),
            python: String::from("python3"),
            wheel_dir: PathBuf::from("."),
            wheel_patterns: DEFAULT_WHEEL_PATTERNS.clone(),
            excluded_artifacts: DEFAULT_EXCLUDED_ARTIFACTS.clone(),
            auxiliary_files: DEFAULT_AUXILIARY_FILES.clone(),
            storage: StorageConfig::default(),
        }
    }
}

impl PublishConfig {
    pub fn new(config_path: impl AsRef<Path>) -> Result<PublishConfig> {
        trace!("Reading configuration file '{}'", config_path.as_ref().display());
        let config_file = File::open(config_path.as_ref()).with_context(|| {
            eyre!(
                "Failed to find perf-publish configuration at '{}'",
                config_path.as_ref().display()
            )
        })?;
        let config = serde_json::from_reader(config_file)
            .with_context(|| {
                eyre!(
                    "Failed to read configuration file '{}'",
                    config_path.as_ref().display()
                )
            })
            .with_suggestion(|| {
                format!(
                    "Make sure '{}' is a valid perf-publish json configuration",
                    config_path.as_ref().display()
                )
            })?;
        debug!("Configuration file '{}' loaded", config_path.as_ref().display());
        Ok(config)
    }

    /// Loads the configuration and returns it together with the directory
    /// relative paths are resolved against.
    ///
    /// Without an explicit path the default file in the working directory is
    /// used when present, and the built-in defaults otherwise.
    pub fn load(config_path: Option<PathBuf>) -> Result<(PublishConfig, PathBuf)> {
        let current_dir = env::current_dir().context("Failed to determine current working directory")?;
        let config_path = match config_path {
            Some(config_path) => config_path,
            None => {
                let default_path = current_dir.join(DEFAULT_CONFIG_FILE.as_path());
                if !default_path.is_file() {
                    debug!(
                        "No configuration found at '{}', using defaults",
                        default_path.display()
                    );
                    return Ok((PublishConfig::default(), current_dir));
                }
                default_path
            }
        };
        let config_path = config_path
            .canonicalize()
            .context("Failed to canonicalize path to configuration file")
            .with_suggestion(|| {
                format!(
                    "Make sure '{}' is a valid perf-publish json configuration",
                    config_path.display()
                )
            })?;
        let config = PublishConfig::new(&config_path)?;
        let root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or(current_dir);
        Ok((config, root))
    }
}

/// Configuration with every path made absolute and every pattern compiled.
#[derive(Debug)]
pub(crate) struct PublishContext {
    pub root: PathBuf,
    pub artifacts: ArtifactsPath,
    pub env: VirtualEnv,
    pub build_script: PathBuf,
    pub python: String,
    pub wheel_dir: PathBuf,
    pub wheel_patterns: Vec<PackagePattern>,
    pub excluded_artifacts: GlobSet,
    pub auxiliary_files: Vec<PathBuf>,
    pub storage: StorageConfig,
}

impl PublishContext {
    pub fn new(config: &PublishConfig, root: impl AsRef<Path>) -> Result<PublishContext> {
        let root = root.as_ref();
        let resolve = |path: &Path| -> Result<PathBuf> {
            Ok(path
                .absolutize_from(root)
                .with_context(|| format!("Failed to resolve path '{}'", path.display()))?
                .to_path_buf())
        };

        let mut wheel_patterns = Vec::new();
        for pattern in config.wheel_patterns.iter() {
            wheel_patterns.push(PackagePattern::new(pattern).with_context(|| {
                format!("Invalid glob pattern '{}' in 'wheel_patterns'", pattern)
            })?);
        }
        let mut excluded_builder = GlobSetBuilder::new();
        for pattern in config.excluded_artifacts.iter() {
            excluded_builder.add(Glob::new(pattern).with_context(|| {
                format!("Invalid glob pattern '{}' in 'excluded_artifacts'", pattern)
            })?);
        }
        let mut auxiliary_files = Vec::new();
        for file in config.auxiliary_files.iter() {
            auxiliary_files.push(resolve(file)?);
        }

        Ok(PublishContext {
            root: root.to_path_buf(),
            artifacts: ArtifactsPath::from(resolve(&config.artifacts_dir)?),
            env: VirtualEnv::new(VirtualEnvPath::from(resolve(&config.env_dir)?)),
            build_script: resolve(&config.build_script)?,
            python: config.python.clone(),
            wheel_dir: resolve(&config.wheel_dir)?,
            wheel_patterns,
            excluded_artifacts: excluded_builder.build()?,
            auxiliary_files,
            storage: config.storage.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    #[test]
    fn defaults_match_ci_layout() {
        let config = PublishConfig::default();
        let context = PublishContext::new(&config, "/work").unwrap();
        assert_eq!(context.artifacts.as_ref(), Path::new("/work/artifacts"));
        assert_eq!(context.env.path().as_ref(), Path::new("/work/env"));
        assert_eq!(context.build_script, PathBuf::from("/work/scripts/ci/build.sh"));
        assert_eq!(context.wheel_dir, PathBuf::from("/work"));
        assert_eq!(
            context.auxiliary_files,
            vec![
                PathBuf::from("/work/scripts/performance/measure.py"),
                PathBuf::from("/work/scripts/performance/install.sh"),
            ]
        );
        assert_eq!(
            context
                .wheel_patterns
                .iter()
                .map(|pattern| pattern.as_str())
                .collect::<Vec<_>>(),
            vec!["azure_cli_*.whl", "azure_cli-*.whl"]
        );
        assert!(context.excluded_artifacts.is_match("azure_cli_fulltest-2.0.21-py2.py3-none-any.whl"));
        assert!(!context.excluded_artifacts.is_match("azure_cli_core-2.0.21-py2.py3-none-any.whl"));
        assert_eq!(context.storage.container, "perf");
        assert_eq!(context.storage.blob_name, "perf.tar");
    }

    #[test]
    fn relative_paths_resolve_against_config_directory() {
        let tmp = TempDir::new("config").unwrap();
        let config_path = tmp.path().join("perf.json");
        fs::write(
            &config_path,
            r#"{
                "artifacts_dir": "out",
                "env_dir": "/opt/perf-env",
                "storage": { "container": "nightly" }
            }"#,
        )
        .unwrap();

        let (config, root) = PublishConfig::load(Some(config_path)).unwrap();
        let context = PublishContext::new(&config, &root).unwrap();

        let root = tmp.path().canonicalize().unwrap();
        assert_eq!(context.artifacts.as_ref(), root.join("out"));
        assert_eq!(context.env.path().as_ref(), Path::new("/opt/perf-env"));
        assert_eq!(context.storage.container, "nightly");
        assert_eq!(context.storage.blob_name, "perf.tar");
        assert_eq!(context.build_script, root.join("scripts/ci/build.sh"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let tmp = TempDir::new("config").unwrap();
        let config_path = tmp.path().join("perf.json");
        fs::write(&config_path, r#"{ "artifact_dir": "out" }"#).unwrap();
        assert!(PublishConfig::load(Some(config_path)).is_err());
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let tmp = TempDir::new("config").unwrap();
        assert!(PublishConfig::load(Some(tmp.path().join("missing.json"))).is_err());
    }

    #[test]
    fn invalid_excluded_pattern_is_rejected() {
        let config = PublishConfig {
            excluded_artifacts: vec![String::from("azure_cli_[")],
            ..PublishConfig::default()
        };
        let err = PublishContext::new(&config, "/work").unwrap_err();
        assert!(format!("{:#}", err).contains("excluded_artifacts"));
    }
}
