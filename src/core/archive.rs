use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter},
    path::{Path, PathBuf},
};

use serde::Serialize;
use tar::{Archive, Builder};
use tracing::debug;

use super::{ArchivePath, BuildId, Bundle, ShaSum};

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ArchiveSummary {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: ShaSum,
    pub entries: usize,
}

/// Root of the bundle inside the archive, `perf/<build-id>`.
pub(crate) fn archive_root(build_id: &BuildId) -> PathBuf {
    Path::new("perf").join(build_id.to_string())
}

/// Writes the bundle as an uncompressed tar archive.
///
/// The archive is written next to its final location and renamed once
/// complete, so a failed run never leaves a truncated `perf.tar` behind.
pub(crate) fn create_archive(
    bundle: &Bundle,
    build_id: &BuildId,
    archive: &ArchivePath,
) -> io::Result<()> {
    let part_path = archive.part_path();
    _ = fs::remove_file(part_path.as_path());
    let file = File::create(part_path.as_path())?;
    let mut builder = Builder::new(BufWriter::new(file));
    builder.append_dir_all(archive_root(build_id), bundle.path().as_ref())?;
    let writer = builder.into_inner()?;
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    drop(file);
    fs::rename(part_path.as_path(), archive.as_ref())?;
    debug!(
        "Archived bundle '{}' to '{}'",
        bundle.path().as_ref().display(),
        archive.as_ref().display()
    );
    Ok(())
}

/// Paths of the regular files contained in an archive, in archive order.
pub(crate) fn archive_entries(path: impl AsRef<Path>) -> io::Result<Vec<PathBuf>> {
    let mut tar = Archive::new(BufReader::new(File::open(path.as_ref())?));
    let mut files = Vec::new();
    for entry in tar.entries()? {
        let entry = entry?;
        if entry.header().entry_type().is_file() {
            files.push(entry.path()?.to_path_buf());
        }
    }
    Ok(files)
}

pub(crate) fn summarize_archive(archive: &ArchivePath) -> io::Result<ArchiveSummary> {
    let size = fs::metadata(archive.as_ref())?.len();
    let sha256 = ShaSum::from_path(archive.as_ref())?;
    let entries = archive_entries(archive.as_ref())?.len();
    debug!(
        "Archive '{}' holds {} files ({} bytes, sha256 {})",
        archive.as_ref().display(),
        entries,
        size,
        sha256
    );
    Ok(ArchiveSummary {
        path: archive.as_ref().to_path_buf(),
        size,
        sha256,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ArtifactsPath;
    use std::io::Read;
    use tempdir::TempDir;

    #[test]
    fn archive_reproduces_bundle_contents() {
        let tmp = TempDir::new("archive").unwrap();
        let artifacts = ArtifactsPath::from(tmp.path().join("artifacts"));
        let build_id = BuildId::from_timestamp(1510697600);
        let bundle = Bundle::create(artifacts.bundle(&build_id)).unwrap();
        let bundle_dir = bundle.path().as_ref();
        fs::write(bundle_dir.join("azure_cli_core-1.0.whl"), vec![7u8; 4096]).unwrap();
        fs::write(bundle_dir.join("measure.py"), b"import timeit\n").unwrap();
        fs::create_dir_all(bundle_dir.join("nested")).unwrap();
        fs::write(bundle_dir.join("nested").join("install.sh"), b"#!/bin/sh\n").unwrap();

        create_archive(&bundle, &build_id, &artifacts.archive()).unwrap();

        assert!(artifacts.archive().as_ref().is_file());
        assert!(!artifacts.archive().part_path().exists());

        let mut entries = archive_entries(artifacts.archive().as_ref()).unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("perf/1510697600/azure_cli_core-1.0.whl"),
                PathBuf::from("perf/1510697600/measure.py"),
                PathBuf::from("perf/1510697600/nested/install.sh"),
            ]
        );

        let mut tar = Archive::new(File::open(artifacts.archive().as_ref()).unwrap());
        for entry in tar.entries().unwrap() {
            let mut entry = entry.unwrap();
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .unwrap()
                .strip_prefix("perf/1510697600")
                .unwrap()
                .to_path_buf();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            assert_eq!(contents, fs::read(bundle_dir.join(relative)).unwrap());
        }

        let summary = summarize_archive(&artifacts.archive()).unwrap();
        assert_eq!(summary.entries, 3);
        assert_eq!(
            summary.size,
            fs::metadata(artifacts.archive().as_ref()).unwrap().len()
        );
        assert_eq!(
            summary.sha256,
            ShaSum::from_path(artifacts.archive().as_ref()).unwrap()
        );
    }
}
