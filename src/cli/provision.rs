use std::path::PathBuf;

use clap::Args;
use color_eyre::{
    eyre::{eyre, Context, Result},
    Help,
};
use owo_colors::OwoColorize;
use path_absolutize::Absolutize;
use tracing::info;

use crate::core::{PerformanceMonitor, PublishConfig, PublishContext, VirtualEnv};

#[derive(Debug, Args)]
pub(crate) struct Params {
    /// Path to perf publish configuration
    #[arg(short, long)]
    config_path: Option<PathBuf>,
    /// Directory containing the wheels to install, overrides the configured one
    #[arg(short, long)]
    wheel_dir: Option<PathBuf>,
    /// Remove the contents of an existing environment before creating it
    #[arg(long, default_value_t = false)]
    clear: bool,
}

pub(crate) fn execute(args: Params) -> Result<()> {
    let (config, root) = PublishConfig::load(args.config_path)?;
    let run_context = PublishContext::new(&config, &root)
        .with_context(|| eyre!("Failed to initialize run"))?;
    let wheel_dir = match args.wheel_dir {
        Some(wheel_dir) => wheel_dir
            .absolutize()
            .context("Failed to resolve wheel directory")?
            .to_path_buf(),
        None => run_context.wheel_dir.clone(),
    };

    let package_sets = VirtualEnv::find_packages(&wheel_dir, &run_context.wheel_patterns)
        .with_context(|| {
            eyre!(
                "Failed to find packages to install in '{}'",
                wheel_dir.display()
            )
        })
        .with_suggestion(|| "Build the CLI wheels before provisioning the environment")?;

    let python = VirtualEnv::find_python(&run_context.python)?;
    let monitor = PerformanceMonitor::start("provision");
    info!(target: "user-log",
        "Creating environment {}",
        run_context.env.path().as_ref().display().blue()
    );
    run_context
        .env
        .provision(&python, args.clear, &package_sets)
        .with_context(|| {
            eyre!(
                "Failed to provision environment at '{}'",
                run_context.env.path().as_ref().display()
            )
        })?;
    let timing = monitor.finish();

    let installed = package_sets
        .iter()
        .map(|package_set| package_set.files.len())
        .sum::<usize>();
    info!(target: "user-ui",
        "{} Installed {} package(s) into {} in {:.3}s",
        "Provisioned:".green().bold(),
        installed.magenta(),
        run_context.env.path().as_ref().display().blue(),
        timing.duration.as_secs_f64()
    );
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::STUB_PYTHON;
    use std::{fs, os::unix::fs::PermissionsExt, path::Path};
    use tempdir::TempDir;

    #[test]
    fn provisions_from_configuration_twice() {
        let tmp = TempDir::new("provision").unwrap();
        let root = tmp.path();
        for name in ["azure_cli_core-1.whl", "azure_cli-1.whl", "azure_cli_fulltest.txt"] {
            fs::write(root.join(name), b"").unwrap();
        }
        let log = root.join("pip.log");
        let python = root.join("python");
        fs::write(&python, STUB_PYTHON.replace("PIP_LOG", log.to_str().unwrap())).unwrap();
        fs::set_permissions(&python, fs::Permissions::from_mode(0o755)).unwrap();
        let config_path = root.join("perf-publish.json");
        fs::write(
            &config_path,
            serde_json::json!({ "python": python }).to_string(),
        )
        .unwrap();

        for clear in [false, true] {
            execute(Params {
                config_path: Some(config_path.clone()),
                wheel_dir: None,
                clear,
            })
            .unwrap();
        }

        assert!(root.join("env").join("bin").join("python").is_file());
        let installed = fs::read_to_string(&log)
            .unwrap()
            .lines()
            .map(|line| {
                Path::new(line)
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect::<Vec<_>>();
        assert_eq!(
            installed,
            vec![
                "azure_cli_core-1.whl",
                "azure_cli-1.whl",
                "azure_cli_core-1.whl",
                "azure_cli-1.whl"
            ]
        );
    }
}
