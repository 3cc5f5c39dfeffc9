//! Sink that writes payloads to files under a base directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::errors::Interrupted;

use super::Sink;

/// Writes each payload to `{base}/{path}`, creating parent directories as
/// needed. Regular files are written with mode 0644, directories with 0755.
pub struct FilesystemSink {
    base: PathBuf,
}

impl FilesystemSink {
    /// Creates the base directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the base directory cannot be created.
    pub async fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        tokio::fs::create_dir_all(&base)
            .await
            .with_context(|| format!("failed to create output directory {}", base.display()))?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

#[async_trait]
impl Sink for FilesystemSink {
    fn name(&self) -> String {
        format!("filesystem({})", self.base.display())
    }

    fn kind(&self) -> &'static str {
        "filesystem"
    }

    async fn write(&mut self, cancel: &CancellationToken, path: &str, data: Bytes) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Interrupted::Cancelled.into());
        }

        let target = self.base.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        tokio::fs::write(&target, &data)
            .await
            .with_context(|| format!("failed to write to file {}", target.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o644))
                .await
                .with_context(|| format!("failed to set permissions on {}", target.display()))?;
        }

        Ok(())
    }

    async fn close(&mut self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }
}
