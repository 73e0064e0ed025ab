use filetime::FileTime;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use super::BuildId;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub(crate) struct ArtifactsPath(PathBuf);

impl From<PathBuf> for ArtifactsPath {
    fn from(value: PathBuf) -> Self {
        ArtifactsPath(value)
    }
}

impl AsRef<Path> for ArtifactsPath {
    fn as_ref(&self) -> &Path {
        self.0.as_path()
    }
}

impl ArtifactsPath {
    pub fn build_output(&self) -> BuildOutputPath {
        BuildOutputPath(self.0.join("build"))
    }

    pub fn perf_root(&self) -> PerfRootPath {
        PerfRootPath(self.0.join("perf"))
    }

    pub fn bundle(&self, build_id: &BuildId) -> BundlePath {
        BundlePath(self.perf_root().0.join(build_id.to_string()))
    }

    pub fn archive(&self) -> ArchivePath {
        ArchivePath(self.0.join("perf.tar"))
    }
}

/// Directory the external build script writes its outputs to.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub(crate) struct BuildOutputPath(PathBuf);

impl AsRef<Path> for BuildOutputPath {
    fn as_ref(&self) -> &Path {
        self.0.as_path()
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub(crate) struct PerfRootPath(PathBuf);

impl AsRef<Path> for PerfRootPath {
    fn as_ref(&self) -> &Path {
        self.0.as_path()
    }
}

/// Directory holding the outputs of a single build, `perf/<build-id>`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub(crate) struct BundlePath(PathBuf);

impl AsRef<Path> for BundlePath {
    fn as_ref(&self) -> &Path {
        self.0.as_path()
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub(crate) struct ArchivePath(PathBuf);

impl AsRef<Path> for ArchivePath {
    fn as_ref(&self) -> &Path {
        self.0.as_path()
    }
}

impl ArchivePath {
    /// Location the archive is written to before being moved into place.
    pub fn part_path(&self) -> PathBuf {
        let mut file_name = self
            .0
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        file_name.push(".part");
        self.0.with_file_name(file_name)
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub(crate) struct VirtualEnvPath(PathBuf);

impl From<PathBuf> for VirtualEnvPath {
    fn from(value: PathBuf) -> Self {
        VirtualEnvPath(value)
    }
}

impl AsRef<Path> for VirtualEnvPath {
    fn as_ref(&self) -> &Path {
        self.0.as_path()
    }
}

/// Copies a file and carries its modification time over to the copy.
pub(crate) fn copy_file_preserving_mtime(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
) -> io::Result<u64> {
    let metadata = fs::metadata(source.as_ref())?;
    let bytes = fs::copy(source.as_ref(), destination.as_ref())?;
    filetime::set_file_mtime(
        destination.as_ref(),
        FileTime::from_last_modification_time(&metadata),
    )?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn artifact_layout() {
        let artifacts = ArtifactsPath::from(PathBuf::from("/work/artifacts"));
        let build_id = BuildId::from_timestamp(1_500_000_000);
        assert_eq!(
            artifacts.build_output().as_ref(),
            Path::new("/work/artifacts/build")
        );
        assert_eq!(
            artifacts.bundle(&build_id).as_ref(),
            Path::new("/work/artifacts/perf/1500000000")
        );
        assert_eq!(
            artifacts.archive().as_ref(),
            Path::new("/work/artifacts/perf.tar")
        );
        assert_eq!(
            artifacts.archive().part_path(),
            PathBuf::from("/work/artifacts/perf.tar.part")
        );
    }

    #[test]
    fn copy_keeps_modification_time() {
        let tmp = TempDir::new("fs-copy").unwrap();
        let source = tmp.path().join("source.whl");
        let destination = tmp.path().join("destination.whl");
        fs::write(&source, b"wheel").unwrap();
        let mtime = FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(&source, mtime).unwrap();

        let copied = copy_file_preserving_mtime(&source, &destination).unwrap();

        assert_eq!(copied, 5);
        assert_eq!(fs::read(&destination).unwrap(), b"wheel");
        let metadata = fs::metadata(&destination).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&metadata), mtime);
    }
}
