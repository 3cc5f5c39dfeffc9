//! Output sinks: destinations for encoded payloads.

pub mod archive;
pub mod fs;
pub mod s3;
pub mod stream;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

pub use archive::ArchiveSink;
pub use fs::FilesystemSink;
pub use s3::{ObjectUploader, S3Config, S3Sink};
pub use stream::StreamSink;

/// A destination for encoded payloads. `close` is called exactly once after
/// the last write; sink finalization on the cleanup path receives a fresh,
/// uncancelled token.
#[async_trait]
pub trait Sink: Send {
    fn name(&self) -> String;

    fn kind(&self) -> &'static str;

    async fn write(&mut self, cancel: &CancellationToken, path: &str, data: Bytes) -> Result<()>;

    async fn close(&mut self, cancel: &CancellationToken) -> Result<()>;
}

impl std::fmt::Debug for dyn Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind(), self.name())
    }
}
