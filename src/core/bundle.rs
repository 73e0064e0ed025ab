use std::{
    fs,
    path::{Path, PathBuf},
};

use globset::GlobSet;
use ignore::WalkBuilder;
use thiserror::Error;
use tracing::{debug, trace};

use super::{copy_file_preserving_mtime, BuildOutputPath, BundlePath};

#[derive(Debug, Error)]
pub(crate) enum BundleError {
    #[error("Build output directory '{}' does not exist", .0.display())]
    MissingBuildOutput(PathBuf),
    #[error("Auxiliary file '{}' does not exist", .0.display())]
    MissingAuxiliaryFile(PathBuf),
    #[error("Failed to walk directory '{}'", .0.display())]
    Walk(PathBuf, #[source] ignore::Error),
    #[error("Failed due to unexpected IO error")]
    IO(#[from] std::io::Error),
}

/// The directory collecting everything that gets archived for a build.
#[derive(Debug)]
pub(crate) struct Bundle {
    path: BundlePath,
}

impl Bundle {
    pub fn create(path: BundlePath) -> Result<Bundle, BundleError> {
        fs::create_dir_all(path.as_ref())?;
        debug!("Created bundle directory '{}'", path.as_ref().display());
        Ok(Bundle { path })
    }

    pub fn path(&self) -> &BundlePath {
        &self.path
    }

    /// Copies every file below the build output directory into the bundle,
    /// keeping relative paths. Returns the copied relative paths.
    pub fn collect_outputs(&self, build_output: &BuildOutputPath) -> Result<Vec<PathBuf>, BundleError> {
        if !build_output.as_ref().is_dir() {
            return Err(BundleError::MissingBuildOutput(
                build_output.as_ref().to_path_buf(),
            ));
        }
        let mut copied = Vec::new();
        for (source, relative_path, is_dir) in walk(build_output.as_ref())? {
            let destination = self.path.as_ref().join(&relative_path);
            if is_dir {
                fs::create_dir_all(&destination)?;
                continue;
            }
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            trace!(
                "Copying build output {} to {}",
                source.display(),
                destination.display()
            );
            copy_file_preserving_mtime(&source, &destination)?;
            copied.push(relative_path);
        }
        Ok(copied)
    }

    /// Deletes bundle files whose file name matches `excluded`.
    pub fn exclude(&self, excluded: &GlobSet) -> Result<Vec<PathBuf>, BundleError> {
        let mut removed = Vec::new();
        for (path, relative_path, is_dir) in walk(self.path.as_ref())? {
            if is_dir {
                continue;
            }
            let is_excluded = path
                .file_name()
                .map(|name| excluded.is_match(name))
                .unwrap_or(false);
            if is_excluded {
                debug!("Removing excluded artifact {}", relative_path.display());
                fs::remove_file(&path)?;
                removed.push(relative_path);
            }
        }
        Ok(removed)
    }

    /// Copies the given files into the root of the bundle by file name.
    pub fn add_auxiliary(&self, files: &[PathBuf]) -> Result<Vec<PathBuf>, BundleError> {
        let mut added = Vec::new();
        for file in files {
            let file_name = match file.file_name() {
                Some(file_name) if file.is_file() => file_name,
                _ => return Err(BundleError::MissingAuxiliaryFile(file.clone())),
            };
            let destination = self.path.as_ref().join(file_name);
            trace!(
                "Copying auxiliary file {} to {}",
                file.display(),
                destination.display()
            );
            copy_file_preserving_mtime(file, &destination)?;
            added.push(PathBuf::from(file_name));
        }
        Ok(added)
    }

    /// Relative paths of all files currently in the bundle, sorted.
    pub fn manifest(&self) -> Result<Vec<PathBuf>, BundleError> {
        let mut files = walk(self.path.as_ref())?
            .into_iter()
            .filter(|(_, _, is_dir)| !is_dir)
            .map(|(_, relative_path, _)| relative_path)
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }
}

/// Lists everything below `root` as `(path, path relative to root, is_dir)`,
/// excluding `root` itself.
fn walk(root: &Path) -> Result<Vec<(PathBuf, PathBuf, bool)>, BundleError> {
    let mut entries = Vec::new();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .follow_links(true)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();
    for entry in walker {
        let entry = entry.map_err(|err| BundleError::Walk(root.to_path_buf(), err))?;
        let Ok(relative_path) = entry.path().strip_prefix(root) else {
            continue;
        };
        if relative_path.as_os_str().is_empty() {
            continue;
        }
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        entries.push((entry.path().to_path_buf(), relative_path.to_path_buf(), is_dir));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactsPath, BuildId};
    use globset::{Glob, GlobSetBuilder};
    use tempdir::TempDir;

    fn fulltest_globset() -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new("azure_cli_fulltest*").unwrap());
        builder.build().unwrap()
    }

    fn layout(tmp: &TempDir) -> (ArtifactsPath, Bundle) {
        let artifacts = ArtifactsPath::from(tmp.path().join("artifacts"));
        let bundle = Bundle::create(artifacts.bundle(&BuildId::from_timestamp(1510697600))).unwrap();
        (artifacts, bundle)
    }

    #[test]
    fn bundles_outputs_without_fulltest_package() {
        let tmp = TempDir::new("bundle").unwrap();
        let (artifacts, bundle) = layout(&tmp);
        let build_dir = artifacts.build_output();
        fs::create_dir_all(build_dir.as_ref()).unwrap();
        for name in [
            "azure_cli_fulltest-1.0.whl",
            "azure_cli_core-1.0.whl",
            "azure_cli_component-1.0.whl",
        ] {
            fs::write(build_dir.as_ref().join(name), name.as_bytes()).unwrap();
        }
        let scripts = tmp.path().join("scripts");
        fs::create_dir_all(&scripts).unwrap();
        fs::write(scripts.join("measure.py"), b"print('measure')").unwrap();
        fs::write(scripts.join("install.sh"), b"#!/bin/sh\n").unwrap();

        let copied = bundle.collect_outputs(&build_dir).unwrap();
        let excluded = bundle.exclude(&fulltest_globset()).unwrap();
        let added = bundle
            .add_auxiliary(&[scripts.join("measure.py"), scripts.join("install.sh")])
            .unwrap();

        assert_eq!(copied.len(), 3);
        assert_eq!(excluded, vec![PathBuf::from("azure_cli_fulltest-1.0.whl")]);
        assert_eq!(
            added,
            vec![PathBuf::from("measure.py"), PathBuf::from("install.sh")]
        );
        assert_eq!(
            bundle.manifest().unwrap(),
            vec![
                PathBuf::from("azure_cli_component-1.0.whl"),
                PathBuf::from("azure_cli_core-1.0.whl"),
                PathBuf::from("install.sh"),
                PathBuf::from("measure.py"),
            ]
        );
        assert_eq!(
            fs::read(bundle.path().as_ref().join("azure_cli_core-1.0.whl")).unwrap(),
            b"azure_cli_core-1.0.whl"
        );
    }

    #[test]
    fn keeps_nested_build_outputs() {
        let tmp = TempDir::new("bundle").unwrap();
        let (artifacts, bundle) = layout(&tmp);
        let nested = artifacts.build_output().as_ref().join("debian");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("azure-cli_2.0.21-1_all.deb"), b"deb").unwrap();
        fs::write(nested.join("azure_cli_fulltest-1.0.whl"), b"test").unwrap();

        bundle.collect_outputs(&artifacts.build_output()).unwrap();
        bundle.exclude(&fulltest_globset()).unwrap();

        assert_eq!(
            bundle.manifest().unwrap(),
            vec![PathBuf::from("debian").join("azure-cli_2.0.21-1_all.deb")]
        );
    }

    #[test]
    fn missing_build_output_is_an_error() {
        let tmp = TempDir::new("bundle").unwrap();
        let (artifacts, bundle) = layout(&tmp);
        assert!(matches!(
            bundle.collect_outputs(&artifacts.build_output()),
            Err(BundleError::MissingBuildOutput(_))
        ));
    }

    #[test]
    fn missing_auxiliary_file_is_an_error() {
        let tmp = TempDir::new("bundle").unwrap();
        let (_, bundle) = layout(&tmp);
        let missing = tmp.path().join("measure.py");
        match bundle.add_auxiliary(&[missing.clone()]) {
            Err(BundleError::MissingAuxiliaryFile(path)) => assert_eq!(path, missing),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
