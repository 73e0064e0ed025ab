use std::{
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use globset::{Glob, GlobMatcher};
use subprocess::{Exec, ExitStatus, NullFile};
use thiserror::Error;
use tracing::{debug, info, trace};
use which::which;

use super::VirtualEnvPath;

#[derive(Debug, Error)]
pub(crate) enum ProvisionError {
    #[error("Failed to find python interpreter '{0}'")]
    PythonNotFound(String, #[source] which::Error),
    #[error("Invalid package pattern '{0}'")]
    InvalidPattern(String, #[source] globset::Error),
    #[error("No packages matching '{pattern}' found in '{}'", .dir.display())]
    NoMatchingPackages { pattern: String, dir: PathBuf },
    #[error("Command '{0}' failed with {1:?}")]
    CommandFailed(String, ExitStatus),
    #[error("Failed to build PATH for the environment")]
    InvalidPath(#[from] env::JoinPathsError),
    #[error("Failed due to unexpected IO error")]
    IO(#[from] std::io::Error),
    #[error("Failed due to unexpected sub process error")]
    Popen(#[from] subprocess::PopenError),
}

/// A file name glob selecting one family of wheel packages.
#[derive(Debug, Clone)]
pub(crate) struct PackagePattern {
    pattern: String,
    matcher: GlobMatcher,
}

impl PackagePattern {
    pub fn new(pattern: &str) -> Result<PackagePattern, ProvisionError> {
        let glob = Glob::new(pattern)
            .map_err(|err| ProvisionError::InvalidPattern(pattern.to_string(), err))?;
        Ok(PackagePattern {
            pattern: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn is_match(&self, file_name: impl AsRef<Path>) -> bool {
        self.matcher.is_match(file_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PackageSet {
    pub pattern: String,
    pub files: Vec<PathBuf>,
}

/// Environment variables that make a child process run inside a virtual
/// environment, the equivalent of sourcing its `activate` script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ActivationEnv {
    vars: Vec<(OsString, OsString)>,
    removed: Vec<OsString>,
}

impl ActivationEnv {
    pub fn apply(&self, mut cmd: Exec) -> Exec {
        for key in self.removed.iter() {
            cmd = cmd.env_remove(key);
        }
        for (key, value) in self.vars.iter() {
            cmd = cmd.env(key, value);
        }
        cmd
    }
}

#[cfg(test)]
impl ActivationEnv {
    pub fn get(&self, key: impl AsRef<std::ffi::OsStr>) -> Option<&std::ffi::OsStr> {
        self.vars
            .iter()
            .find(|(name, _)| name.as_os_str() == key.as_ref())
            .map(|(_, value)| value.as_os_str())
    }

    pub fn is_removed(&self, key: impl AsRef<std::ffi::OsStr>) -> bool {
        self.removed.iter().any(|name| name.as_os_str() == key.as_ref())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct VirtualEnv {
    path: VirtualEnvPath,
}

impl VirtualEnv {
    pub fn new(path: VirtualEnvPath) -> VirtualEnv {
        VirtualEnv { path }
    }

    pub fn path(&self) -> &VirtualEnvPath {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.as_ref().is_dir()
    }

    pub fn bin_dir(&self) -> PathBuf {
        if cfg!(windows) {
            self.path.as_ref().join("Scripts")
        } else {
            self.path.as_ref().join("bin")
        }
    }

    pub fn python(&self) -> PathBuf {
        if cfg!(windows) {
            self.bin_dir().join("python.exe")
        } else {
            self.bin_dir().join("python")
        }
    }

    pub fn find_python(python: &str) -> Result<PathBuf, ProvisionError> {
        which(python).map_err(|err| ProvisionError::PythonNotFound(python.to_string(), err))
    }

    pub fn create_command(&self, python: impl AsRef<Path>, clear: bool) -> Exec {
        let mut cmd = Exec::cmd(python.as_ref()).arg("-m").arg("venv");
        if clear {
            cmd = cmd.arg("--clear");
        }
        cmd.arg(self.path.as_ref()).stdin(NullFile)
    }

    pub fn create(&self, python: impl AsRef<Path>, clear: bool) -> Result<(), ProvisionError> {
        debug!(
            "Creating environment at '{}' with {}",
            self.path.as_ref().display(),
            python.as_ref().display()
        );
        run(self.create_command(python, clear))
    }

    /// Finds, for every pattern in order, the files in `dir` whose name
    /// matches it. Every pattern must match at least one file.
    pub fn find_packages(
        dir: impl AsRef<Path>,
        patterns: &[PackagePattern],
    ) -> Result<Vec<PackageSet>, ProvisionError> {
        let mut candidates = Vec::new();
        for entry in fs::read_dir(dir.as_ref())? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                candidates.push(entry.path());
            }
        }
        candidates.sort();

        let mut package_sets = Vec::new();
        for pattern in patterns {
            let files = candidates
                .iter()
                .filter(|path| {
                    path.file_name()
                        .map(|name| pattern.is_match(name))
                        .unwrap_or(false)
                })
                .cloned()
                .collect::<Vec<_>>();
            if files.is_empty() {
                return Err(ProvisionError::NoMatchingPackages {
                    pattern: pattern.as_str().to_string(),
                    dir: dir.as_ref().to_path_buf(),
                });
            }
            trace!("Pattern '{}' matched {:?}", pattern.as_str(), files);
            package_sets.push(PackageSet {
                pattern: pattern.as_str().to_string(),
                files,
            });
        }
        Ok(package_sets)
    }

    pub fn install_command(&self, packages: &PackageSet) -> Exec {
        Exec::cmd(self.python())
            .arg("-m")
            .arg("pip")
            .arg("install")
            .args(packages.files.as_slice())
            .stdin(NullFile)
    }

    pub fn install(&self, packages: &PackageSet) -> Result<(), ProvisionError> {
        info!(target: "user-log",
            "Installing {} package(s) matching '{}'",
            packages.files.len(),
            packages.pattern
        );
        run(self.install_command(packages))
    }

    /// Creates the environment, or reuses an existing one, then installs each
    /// package set in order.
    pub fn provision(
        &self,
        python: impl AsRef<Path>,
        clear: bool,
        package_sets: &[PackageSet],
    ) -> Result<(), ProvisionError> {
        self.create(python, clear)?;
        for packages in package_sets {
            self.install(packages)?;
        }
        Ok(())
    }

    pub fn activation_env(&self) -> Result<ActivationEnv, ProvisionError> {
        self.activation_env_with_path(env::var_os("PATH"))
    }

    pub fn activation_env_with_path(
        &self,
        current_path: Option<OsString>,
    ) -> Result<ActivationEnv, ProvisionError> {
        let mut paths = vec![self.bin_dir()];
        if let Some(current_path) = current_path {
            paths.extend(env::split_paths(&current_path));
        }
        Ok(ActivationEnv {
            vars: vec![
                (
                    OsString::from("VIRTUAL_ENV"),
                    self.path.as_ref().as_os_str().to_os_string(),
                ),
                (OsString::from("PATH"), env::join_paths(paths)?),
            ],
            removed: vec![OsString::from("PYTHONHOME")],
        })
    }
}

fn run(cmd: Exec) -> Result<(), ProvisionError> {
    let cmdline = cmd.to_cmdline_lossy();
    trace!("Executing command: {}", cmdline);
    let exit_status = cmd.join()?;
    if exit_status.success() {
        Ok(())
    } else {
        Err(ProvisionError::CommandFailed(cmdline, exit_status))
    }
}

/// Stand-in interpreter: `-m venv <dir>` copies itself to `<dir>/bin/python`,
/// `-m pip install <files>` appends the files to a log.
#[cfg(all(test, unix))]
pub(crate) const STUB_PYTHON: &str = r#"#!/bin/sh
set -e
if [ "$1" = "-m" ] && [ "$2" = "venv" ]; then
    for last in "$@"; do :; done
    mkdir -p "$last/bin"
    cp "$0" "$last/bin/python"
    exit 0
fi
shift 3
echo "$*" >> "PIP_LOG"
"#;
