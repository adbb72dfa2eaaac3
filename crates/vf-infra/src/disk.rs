use std::ffi::OsString;
use std::path::{Path, PathBuf};

use domain_xml::DiskFormat;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::debug;

use crate::{Error, Result};

/// Transfer buffer for golden-to-runtime copies.
pub const COPY_BUFFER_SIZE: usize = 5 * 1024 * 1024;

const IMAGE_EXTENSIONS: [&str; 3] = ["img", "qcow2", "raw"];
const RUNTIME_MARKER: &str = "_run";

/// A runtime disk ready to be attached to a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedDisk {
    pub path: PathBuf,
    pub format: DiskFormat,
    pub bytes: u64,
}

/// Path of the private writable copy of `golden`.
///
/// `/vm/runner-1.qcow2` becomes `/vm/runner-1_run.qcow2`; names without a
/// known image extension get the marker appended (`/vm/disk` -> `/vm/disk_run`).
pub fn runtime_disk_path(golden: &Path) -> PathBuf {
    let known_ext = golden
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| IMAGE_EXTENSIONS.contains(e));

    let file_name = match (known_ext, golden.file_stem(), golden.file_name()) {
        (Some(ext), Some(stem), _) => {
            let mut name = stem.to_os_string();
            name.push(RUNTIME_MARKER);
            name.push(".");
            name.push(ext);
            name
        }
        (_, _, Some(name)) => {
            let mut name = name.to_os_string();
            name.push(RUNTIME_MARKER);
            name
        }
        // `..` or a bare root: nothing to rename, mark the whole path.
        _ => {
            let mut path = OsString::from(golden.as_os_str());
            path.push(RUNTIME_MARKER);
            return PathBuf::from(path);
        }
    };

    golden.with_file_name(file_name)
}

/// Image format implied by the golden image's extension.
pub fn disk_format(golden: &Path) -> DiskFormat {
    match golden.extension().and_then(|e| e.to_str()) {
        Some("qcow2") => DiskFormat::Qcow2,
        _ => DiskFormat::Raw,
    }
}

/// Copy `golden` to its runtime path, replacing any previous runtime copy.
///
/// The golden image is only ever opened for reading. On failure the runtime
/// file may be missing or partially written.
pub async fn stage(golden: &Path) -> Result<StagedDisk> {
    let runtime = runtime_disk_path(golden);
    let stage_err = |source| Error::DiskStage {
        golden: golden.to_path_buf(),
        runtime: runtime.clone(),
        source,
    };

    debug!(src = %golden.display(), tgt = %runtime.display(), "copying boot disk");

    let source = File::open(golden).await.map_err(stage_err)?;
    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, source);
    let mut destination = File::create(&runtime).await.map_err(stage_err)?;

    let bytes = tokio::io::copy_buf(&mut reader, &mut destination)
        .await
        .map_err(stage_err)?;
    destination.flush().await.map_err(stage_err)?;

    debug!(tgt = %runtime.display(), bytes, "boot disk staged");

    Ok(StagedDisk {
        path: runtime,
        format: disk_format(golden),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_runtime_path_next_to_golden() {
        assert_eq!(
            runtime_disk_path(Path::new("/vm/runner-1.qcow2")),
            PathBuf::from("/vm/runner-1_run.qcow2")
        );
        assert_eq!(
            runtime_disk_path(Path::new("/vm/runner-1.img")),
            PathBuf::from("/vm/runner-1_run.img")
        );
        assert_eq!(
            runtime_disk_path(Path::new("/vm/base.tar.raw")),
            PathBuf::from("/vm/base.tar_run.raw")
        );
        assert_eq!(runtime_disk_path(Path::new("/vm/disk")), PathBuf::from("/vm/disk_run"));
        assert_eq!(
            runtime_disk_path(Path::new("/vm/disk.iso")),
            PathBuf::from("/vm/disk.iso_run")
        );
    }

    #[test]
    fn derivation_is_stable_and_distinct() {
        let goldens = [
            "/vm/runner-1.qcow2",
            "/vm/runner-2.qcow2",
            "/vm/runner-1.img",
            "/vm/runner-1",
            "/other/runner-1.qcow2",
        ];
        let runtimes: Vec<PathBuf> = goldens.iter().map(|g| runtime_disk_path(Path::new(g))).collect();

        for (golden, runtime) in goldens.iter().zip(&runtimes) {
            assert_eq!(&runtime_disk_path(Path::new(golden)), runtime);
            assert_ne!(Path::new(golden), runtime.as_path());
        }
        for (i, a) in runtimes.iter().enumerate() {
            for b in &runtimes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn infers_format_from_extension() {
        assert_eq!(disk_format(Path::new("/vm/a.qcow2")), DiskFormat::Qcow2);
        assert_eq!(disk_format(Path::new("/vm/a.img")), DiskFormat::Raw);
        assert_eq!(disk_format(Path::new("/vm/a")), DiskFormat::Raw);
    }

    #[tokio::test]
    async fn stage_copies_without_touching_golden() {
        let dir = tempfile::tempdir().unwrap();
        let golden = dir.path().join("runner-1.img");
        let content: Vec<u8> = (0..COPY_BUFFER_SIZE + 4096).map(|i| (i % 251) as u8).collect();
        std::fs::write(&golden, &content).unwrap();

        let staged = stage(&golden).await.unwrap();

        assert_eq!(staged.path, dir.path().join("runner-1_run.img"));
        assert_eq!(staged.format, DiskFormat::Raw);
        assert_eq!(staged.bytes, content.len() as u64);
        assert_eq!(std::fs::read(&staged.path).unwrap(), content);
        assert_eq!(std::fs::read(&golden).unwrap(), content);
    }

    #[tokio::test]
    async fn stage_handles_empty_images() {
        let dir = tempfile::tempdir().unwrap();
        let golden = dir.path().join("empty.qcow2");
        std::fs::write(&golden, b"").unwrap();

        let staged = stage(&golden).await.unwrap();

        assert_eq!(staged.bytes, 0);
        assert_eq!(staged.format, DiskFormat::Qcow2);
        assert!(std::fs::read(&staged.path).unwrap().is_empty());
        assert!(std::fs::read(&golden).unwrap().is_empty());
    }

    #[tokio::test]
    async fn restaging_truncates_previous_runtime_copy() {
        let dir = tempfile::tempdir().unwrap();
        let golden = dir.path().join("runner-1.img");
        std::fs::write(&golden, b"fresh").unwrap();
        std::fs::write(runtime_disk_path(&golden), b"dirty runtime state from last boot").unwrap();

        let staged = stage(&golden).await.unwrap();

        assert_eq!(std::fs::read(&staged.path).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn missing_golden_fails_to_stage() {
        let dir = tempfile::tempdir().unwrap();
        let golden = dir.path().join("missing.qcow2");

        let err = stage(&golden).await.unwrap_err();

        match &err {
            Error::DiskStage { golden: g, runtime, source } => {
                assert_eq!(g, &golden);
                assert_eq!(runtime, &runtime_disk_path(&golden));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(std::error::Error::source(&err).is_some());
        assert!(!runtime_disk_path(&golden).exists());
    }
}
