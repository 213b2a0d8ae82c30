//! External certificate provisioning through the `ikev2.sh` tool
//!
//! The tool is run directly, never through a shell, with the username as a
//! single argument. Callers treat it as slow and fallible and record the
//! outcome themselves.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::models::Platform;
use crate::validation::validate_username;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("invalid username: {0}")]
    InvalidUsername(String),

    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{action} exited with {status}: {stderr}")]
    Failed {
        action: &'static str,
        status: String,
        stderr: String,
    },

    #[error("failed to move artifact {file}: {source}")]
    Artifact {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs the provisioning tool and collects its artifacts
#[derive(Debug, Clone)]
pub struct Provisioner {
    command: PathBuf,
    output_dir: PathBuf,
    cert_dir: PathBuf,
}

impl Provisioner {
    pub fn new(
        command: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        cert_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            command: command.into(),
            output_dir: output_dir.into(),
            cert_dir: cert_dir.into(),
        }
    }

    /// Create client credentials and move the bundles into the certificate
    /// directory. Returns the platforms whose bundle was produced.
    pub async fn provision(&self, username: &str) -> Result<Vec<Platform>, ProvisionError> {
        validate_username(username).map_err(ProvisionError::InvalidUsername)?;

        self.run("--addclient", username, None).await?;

        tokio::fs::create_dir_all(&self.cert_dir)
            .await
            .map_err(|source| ProvisionError::Artifact {
                file: self.cert_dir.display().to_string(),
                source,
            })?;

        let mut produced = Vec::new();
        for platform in Platform::ALL {
            let file = platform.file_name(username);
            let from = self.output_dir.join(&file);
            if tokio::fs::metadata(&from).await.is_err() {
                warn!(username = %username, file = %file, "Provisioning produced no artifact");
                continue;
            }
            move_file(&from, &self.cert_dir.join(&file))
                .await
                .map_err(|source| ProvisionError::Artifact { file, source })?;
            produced.push(platform);
        }

        info!(username = %username, artifacts = produced.len(), "Provisioned VPN client");
        Ok(produced)
    }

    /// Revoke and delete client credentials
    pub async fn revoke(&self, username: &str) -> Result<(), ProvisionError> {
        validate_username(username).map_err(ProvisionError::InvalidUsername)?;

        // Both steps ask for confirmation on stdin
        self.run("--revokeclient", username, Some(b"y\n")).await?;
        self.run("--deleteclient", username, Some(b"y\n")).await?;

        info!(username = %username, "Revoked VPN client");
        Ok(())
    }

    async fn run(
        &self,
        action: &'static str,
        username: &str,
        input: Option<&[u8]>,
    ) -> Result<(), ProvisionError> {
        let spawn_error = |source| ProvisionError::Spawn {
            command: self.command.display().to_string(),
            source,
        };

        let mut child = Command::new(&self.command)
            .arg(action)
            .arg(username)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            // The tool may exit without reading; a broken pipe is not fatal
            if let Err(e) = stdin.write_all(input).await {
                warn!(action, error = %e, "Could not write confirmation to provisioning tool");
            }
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(action, username = %username, status = %output.status, "Provisioning tool failed");
            return Err(ProvisionError::Failed {
                action,
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(())
    }
}

/// Rename, falling back to copy and delete across filesystems
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::os::unix::fs::PermissionsExt;

    struct Fixture {
        dir: tempfile::TempDir,
        provisioner: Provisioner,
    }

    impl Fixture {
        fn new(script_body: &str) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let out = dir.path().join("out");
            let certs = dir.path().join("certs");
            std::fs::create_dir_all(&out).expect("out dir");

            let script = dir.path().join("ikev2.sh");
            let log = dir.path().join("calls.log");
            let text = format!(
                "#!/bin/sh\nLOG='{}'\nOUT='{}'\n{}\n",
                log.display(),
                out.display(),
                script_body
            );
            std::fs::write(&script, text).expect("script");
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
                .expect("chmod");

            Self {
                provisioner: Provisioner::new(&script, &out, &certs),
                dir,
            }
        }

        fn calls(&self) -> String {
            std::fs::read_to_string(self.dir.path().join("calls.log")).unwrap_or_default()
        }

        fn cert(&self, file: &str) -> PathBuf {
            self.dir.path().join("certs").join(file)
        }
    }

    const TOOL: &str = r#"
if [ "$1" = "--addclient" ]; then
  echo "add $2" >> "$LOG"
  for ext in p12 mobileconfig sswan; do echo bundle > "$OUT/$2.$ext"; done
else
  read answer
  echo "$1 $2 $answer" >> "$LOG"
fi
exit 0
"#;

    #[tokio::test]
    #[serial]
    async fn test_provision_moves_all_artifacts() -> Result<(), ProvisionError> {
        let fixture = Fixture::new(TOOL);

        let produced = fixture.provisioner.provision("alice").await?;
        assert_eq!(produced, Platform::ALL.to_vec());
        assert!(fixture.cert("alice.p12").exists());
        assert!(fixture.cert("alice.mobileconfig").exists());
        assert!(fixture.cert("alice.sswan").exists());
        assert_eq!(fixture.calls(), "add alice\n");
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_revoke_confirms_both_steps() -> Result<(), ProvisionError> {
        let fixture = Fixture::new(TOOL);

        fixture.provisioner.revoke("bob").await?;
        assert_eq!(
            fixture.calls(),
            "--revokeclient bob y\n--deleteclient bob y\n"
        );
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_failing_tool_is_reported() {
        let fixture = Fixture::new("echo 'no such client' >&2\nexit 3");

        let err = fixture.provisioner.revoke("bob").await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Failed { action: "--revokeclient", ref stderr, .. } if stderr == "no such client"
        ));
    }

    #[tokio::test]
    #[serial]
    async fn test_username_is_validated_before_running() {
        let fixture = Fixture::new(TOOL);

        assert!(matches!(
            fixture.provisioner.provision("alice; rm -rf /").await,
            Err(ProvisionError::InvalidUsername(_))
        ));
        assert!(fixture.calls().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_tool_is_a_spawn_error() {
        let provisioner = Provisioner::new("/nonexistent/ikev2.sh", "/tmp", "/tmp");
        assert!(matches!(
            provisioner.provision("alice").await,
            Err(ProvisionError::Spawn { .. })
        ));
    }
}
