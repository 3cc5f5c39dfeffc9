//! Sink that copies every payload to a fixed writer, typically stdout.

use std::io::Write;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::errors::Interrupted;

use super::Sink;

/// Writes each payload to the underlying writer as-is. The `path` argument is
/// advisory and ignored; `close` is a no-op.
pub struct StreamSink<W> {
    writer: W,
}

impl<W: Write + Send> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl StreamSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

#[async_trait]
impl<W: Write + Send> Sink for StreamSink<W> {
    fn name(&self) -> String {
        "stream".to_string()
    }

    fn kind(&self) -> &'static str {
        "stream"
    }

    async fn write(&mut self, cancel: &CancellationToken, _path: &str, data: Bytes) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Interrupted::Cancelled.into());
        }
        self.writer
            .write_all(&data)
            .context("failed to copy data to stream")?;
        self.writer.flush().context("failed to flush stream")?;
        Ok(())
    }

    async fn close(&mut self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_pass_through_in_order() {
        let mut sink = StreamSink::new(Vec::new());
        let cancel = CancellationToken::new();
        sink.write(&cancel, "a.json", Bytes::from_static(b"{\"a\":1}\n"))
            .await
            .unwrap();
        sink.write(&cancel, "b.json", Bytes::from_static(b"{\"b\":2}\n"))
            .await
            .unwrap();
        sink.close(&cancel).await.unwrap();
        assert_eq!(sink.writer, b"{\"a\":1}\n{\"b\":2}\n");
    }

    #[tokio::test]
    async fn test_cancelled_write_fails() {
        let mut sink = StreamSink::new(Vec::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sink
            .write(&cancel, "a.json", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<Interrupted>(),
            Some(&Interrupted::Cancelled)
        );
    }
}
