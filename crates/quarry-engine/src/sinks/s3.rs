//! Sink that uploads payloads to S3-compatible object storage.
//!
//! Supports AWS S3, Cloudflare R2, MinIO, and other S3-compatible services
//! via a custom endpoint and path-style addressing. Multipart behavior (part
//! size, concurrency) is delegated to the SDK.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::errors::Interrupted;

use super::Sink;

/// Uploads a single object. Split out from the sink so tests can observe
/// uploads without a live endpoint.
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        data: Bytes,
    ) -> Result<()>;
}

struct SdkUploader {
    client: aws_sdk_s3::Client,
}

#[async_trait]
impl ObjectUploader for SdkUploader {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        data: Bytes,
    ) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data));
        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }
        request.send().await.map_err(|err| anyhow!(err))?;
        Ok(())
    }
}

/// Configuration for [`S3Sink::new`]. Empty strings mean "not set".
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: String,
    pub prefix: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub force_path_style: bool,
}

/// Uploads each payload as `key = prefix/path`, with `Content-Type` derived
/// from the path extension when recognized.
pub struct S3Sink {
    bucket: String,
    prefix: String,
    uploader: Box<dyn ObjectUploader>,
}

impl S3Sink {
    /// Builds a sink backed by the AWS SDK. Credentials come from the
    /// explicit access keys when both are set, otherwise from the SDK
    /// credential chain.
    pub async fn new(cfg: S3Config) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if !cfg.region.is_empty() {
            loader = loader.region(Region::new(cfg.region.clone()));
        }
        if !cfg.access_key_id.is_empty() && !cfg.secret_access_key.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                cfg.access_key_id.clone(),
                cfg.secret_access_key.clone(),
                None,
                None,
                "quarry-job",
            ));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if !cfg.endpoint.is_empty() {
            builder = builder.endpoint_url(&cfg.endpoint);
        }
        if cfg.force_path_style {
            builder = builder.force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(builder.build());

        Ok(Self::with_uploader(
            cfg.bucket,
            cfg.prefix,
            Box::new(SdkUploader { client }),
        ))
    }

    /// Builds a sink with a custom uploader. Useful for tests.
    pub fn with_uploader(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        uploader: Box<dyn ObjectUploader>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            uploader,
        }
    }
}

#[async_trait]
impl Sink for S3Sink {
    fn name(&self) -> String {
        if self.prefix.is_empty() {
            format!("s3({})", self.bucket)
        } else {
            format!("s3({}/{})", self.bucket, self.prefix)
        }
    }

    fn kind(&self) -> &'static str {
        "s3"
    }

    async fn write(&mut self, cancel: &CancellationToken, path: &str, data: Bytes) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Interrupted::Cancelled.into());
        }

        let key = join_key(&self.prefix, path);
        self.uploader
            .upload(&self.bucket, &key, content_type_for_path(path), data)
            .await
            .with_context(|| format!("failed to upload to s3://{}/{}", self.bucket, key))?;
        Ok(())
    }

    async fn close(&mut self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }
}

fn join_key(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let path = path.trim_start_matches('/');
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!("{prefix}/{path}")
    }
}

// Content-Type from the file extension; unknown extensions get none.
fn content_type_for_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext)?;
    match ext {
        "json" => Some("application/json"),
        "yaml" | "yml" => Some("application/x-yaml"),
        "xml" => Some("application/xml"),
        "txt" => Some("text/plain"),
        "tar" => Some("application/x-tar"),
        "gz" => Some("application/gzip"),
        "zst" => Some("application/zstd"),
        _ => None,
    }
}
