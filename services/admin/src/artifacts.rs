//! Artifact resolver: maps a user and platform to the certificate bundle on
//! disk.
//!
//! There is exactly one file per user per platform, named
//! `{username}.{p12|mobileconfig|sswan}` inside the certificate directory.
//! A missing file is always reported as [`LinkError::ArtifactMissing`];
//! nothing is ever synthesized in its place.

use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::error::LinkError;
use crate::models::Platform;
use crate::validation::validate_username;

/// A resolved, existing artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub path: PathBuf,
    /// Download name, `{username}.{extension}`
    pub file_name: String,
    pub content_type: &'static str,
}

/// Certificate directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    cert_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
        }
    }

    /// Create the certificate directory if needed
    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.cert_dir).await
    }

    /// Where the artifact for `username` and `platform` lives
    pub fn path_for(&self, username: &str, platform: Platform) -> PathBuf {
        self.cert_dir.join(platform.file_name(username))
    }

    /// Resolve an untyped platform value
    pub async fn resolve_artifact(
        &self,
        username: &str,
        platform: &str,
    ) -> Result<ArtifactRef, LinkError> {
        let platform: Platform = platform.parse()?;
        self.resolve(username, platform).await
    }

    pub async fn resolve(&self, username: &str, platform: Platform) -> Result<ArtifactRef, LinkError> {
        let file_name = platform.file_name(username);
        if validate_username(username).is_err() {
            error!(username = %username, "Refusing to resolve artifact for malformed username");
            return Err(LinkError::ArtifactMissing(file_name));
        }

        let path = self.cert_dir.join(&file_name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(ArtifactRef {
                path,
                file_name,
                content_type: platform.content_type(),
            }),
            _ => {
                warn!(path = %path.display(), "Certificate artifact missing");
                Err(LinkError::ArtifactMissing(file_name))
            }
        }
    }

    /// Read an artifact's bytes
    pub async fn read(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, LinkError> {
        tokio::fs::read(&artifact.path).await.map_err(|e| {
            warn!(path = %artifact.path.display(), error = %e, "Failed to read artifact");
            LinkError::ArtifactMissing(artifact.file_name.clone())
        })
    }

    /// Which platforms currently have an artifact for `username`
    pub async fn available_platforms(&self, username: &str) -> Vec<Platform> {
        let mut available = Vec::new();
        for platform in Platform::ALL {
            if self.resolve(username, platform).await.is_ok() {
                available.push(platform);
            }
        }
        available
    }

    /// Delete every artifact of a user, returning how many were removed
    pub async fn remove_all(&self, username: &str) -> std::io::Result<usize> {
        if validate_username(username).is_err() {
            return Ok(0);
        }

        let mut removed = 0;
        for platform in Platform::ALL {
            let path = self.path_for(username, platform);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        info!(username = %username, removed, "Removed certificate artifacts");
        Ok(removed)
    }
}
