//! Sink adapter that buffers every write into an archiver and flushes the
//! finished archive to an inner sink exactly once on close.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::archivers::Archiver;

use super::Sink;

/// Collects all writes into the archiver; on `close`, finalizes the archive
/// and performs exactly one `write` on the inner sink (under the archive
/// base name plus the archiver's extension) followed by exactly one `close`.
pub struct ArchiveSink {
    inner: Box<dyn Sink>,
    archiver: Box<dyn Archiver>,
    archive_name: String,
}

impl ArchiveSink {
    pub fn new(
        inner: Box<dyn Sink>,
        archiver: Box<dyn Archiver>,
        archive_name: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            archiver,
            archive_name: archive_name.into(),
        }
    }
}

#[async_trait]
impl Sink for ArchiveSink {
    fn name(&self) -> String {
        format!("archive({})->{}", self.archive_name, self.inner.name())
    }

    fn kind(&self) -> &'static str {
        "archive"
    }

    async fn write(&mut self, cancel: &CancellationToken, path: &str, data: Bytes) -> Result<()> {
        self.archiver
            .add_file(cancel, path, &data)
            .context("failed to add file to archive")
    }

    async fn close(&mut self, cancel: &CancellationToken) -> Result<()> {
        let bytes = self.archiver.finish().context("failed to finalize archive")?;

        let filename = format!("{}{}", self.archive_name, self.archiver.extension());
        self.inner
            .write(cancel, &filename, bytes.into())
            .await
            .context("failed to write archive to sink")?;

        self.inner
            .close(cancel)
            .await
            .context("failed to close inner sink")
    }
}
