//! Build artifact staging
//!
//! Artifacts are named deterministically from the KG version. Remote
//! transfer is done by an external tool; this module resolves and verifies
//! local copies and publishes outputs into a drop directory.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

/// Snapshot artifact name for a KG version
pub fn snapshot_artifact_name(version: &str) -> String {
    format!("curie_to_pmids_v1.0_KG{}.sqlite", version)
}

/// Output artifact name for a KG version
pub fn output_artifact_name(version: &str) -> String {
    format!("curie_ngd_v1.0_KG{}.sqlite", version)
}

/// Remote location of an artifact, relative to the artifact host's home
pub fn remote_artifact_path(version: &str, name: &str) -> String {
    format!("~/KG{}/{}", version, name)
}

/// Moves build artifacts in and out of the local workspace
#[async_trait]
pub trait ArtifactStager: Send + Sync {
    /// Ensure a verified local copy of the snapshot for `version`
    async fn ensure_snapshot(&self, version: &str) -> Result<PathBuf>;

    /// Publish the finished output database for `version`
    async fn publish_output(&self, version: &str, path: &Path) -> Result<()>;
}

/// Stager backed by local directories
///
/// A `<artifact>.sha256` sidecar next to the snapshot, when present, must
/// match the file's SHA-256 digest.
pub struct FsStager {
    staging_dir: PathBuf,
    publish_dir: Option<PathBuf>,
}

impl FsStager {
    pub fn new(staging_dir: impl Into<PathBuf>, publish_dir: Option<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            publish_dir,
        }
    }
}

/// Hex SHA-256 digest of a file
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

#[async_trait]
impl ArtifactStager for FsStager {
    async fn ensure_snapshot(&self, version: &str) -> Result<PathBuf> {
        let path = self.staging_dir.join(snapshot_artifact_name(version));
        if !path.is_file() {
            return Err(AppError::SnapshotUnavailable {
                path: path.display().to_string(),
                message: format!(
                    "not staged; fetch {} first",
                    remote_artifact_path(version, &snapshot_artifact_name(version))
                ),
            });
        }

        let sidecar = sidecar_path(&path);
        match tokio::fs::read_to_string(&sidecar).await {
            Ok(contents) => {
                // sha256sum format: "<digest>  <file name>"
                let expected = contents.split_whitespace().next().unwrap_or_default().to_lowercase();
                let actual = sha256_file(&path).await?;
                if expected != actual {
                    return Err(AppError::ChecksumMismatch {
                        path: path.display().to_string(),
                        expected,
                        actual,
                    });
                }
                info!(path = %path.display(), "Snapshot checksum verified");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "No checksum sidecar, skipping verification");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(path)
    }

    async fn publish_output(&self, version: &str, path: &Path) -> Result<()> {
        let Some(publish_dir) = &self.publish_dir else {
            info!(path = %path.display(), "No publish directory configured, output left in place");
            return Ok(());
        };

        tokio::fs::create_dir_all(publish_dir).await?;
        let target = publish_dir.join(output_artifact_name(version));
        tokio::fs::copy(path, &target).await?;

        let digest = sha256_file(&target).await?;
        tokio::fs::write(
            sidecar_path(&target),
            format!("{}  {}\n", digest, output_artifact_name(version)),
        )
        .await?;

        info!(target = %target.display(), sha256 = %digest, "Output published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_names() {
        assert_eq!(snapshot_artifact_name("2.10.2"), "curie_to_pmids_v1.0_KG2.10.2.sqlite");
        assert_eq!(output_artifact_name("2.10.2"), "curie_ngd_v1.0_KG2.10.2.sqlite");
        assert_eq!(
            remote_artifact_path("2.10.2", &output_artifact_name("2.10.2")),
            "~/KG2.10.2/curie_ngd_v1.0_KG2.10.2.sqlite"
        );
    }

    #[tokio::test]
    async fn test_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let stager = FsStager::new(dir.path(), None);
        let err = stager.ensure_snapshot("2.10.2").await.unwrap_err();
        assert!(matches!(err, AppError::SnapshotUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_checksum_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(snapshot_artifact_name("2.10.2"));
        std::fs::write(&path, b"snapshot bytes").unwrap();
        let stager = FsStager::new(dir.path(), None);

        // No sidecar: accepted
        assert_eq!(stager.ensure_snapshot("2.10.2").await.unwrap(), path);

        let digest = sha256_file(&path).await.unwrap();
        std::fs::write(sidecar_path(&path), format!("{}  x.sqlite\n", digest)).unwrap();
        assert!(stager.ensure_snapshot("2.10.2").await.is_ok());

        std::fs::write(sidecar_path(&path), "deadbeef\n").unwrap();
        let err = stager.ensure_snapshot("2.10.2").await.unwrap_err();
        assert!(matches!(err, AppError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_publish_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("local.sqlite");
        std::fs::write(&output, b"ngd rows").unwrap();
        let publish_dir = dir.path().join("published");

        let stager = FsStager::new(dir.path(), Some(publish_dir.clone()));
        stager.publish_output("2.10.2", &output).await.unwrap();

        let target = publish_dir.join(output_artifact_name("2.10.2"));
        assert_eq!(std::fs::read(&target).unwrap(), b"ngd rows");
        let sidecar = std::fs::read_to_string(sidecar_path(&target)).unwrap();
        assert!(sidecar.starts_with(&sha256_file(&target).await.unwrap()));
    }
}
