//! Core contracts implemented by every collector and step kind.

use std::any::Any;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use quarry_types::StepResult;

/// URL-safe timestamp format without colons (`chrono` strftime syntax).
/// This is the recommended format for S3 keys and filesystem paths.
pub const ISO8601_BASIC: &str = "%Y%m%dT%H%M%SZ";

/// A data-source holder with an explicit lifecycle: `start` is called before
/// any step queries it, `close` is always attempted on pipeline teardown.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Human-readable name: the kind plus a discriminant, e.g. `http(host)`.
    fn name(&self) -> String;

    fn kind(&self) -> &'static str;

    /// Prepares the collector for use. Must be idempotent: calling twice is
    /// safe and the second call is a no-op.
    async fn start(&self, cancel: &CancellationToken) -> Result<()>;

    /// Releases the collector's resources. Called with a fresh, uncancelled
    /// token so cleanup completes even after a cancelled run.
    async fn close(&self, cancel: &CancellationToken) -> Result<()>;

    /// Upcast used by step factories to recover the concrete collector type.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A single result-producing operation, optionally bound to a collector.
/// Stateless after construction; collectors are only dereferenced inside
/// `resolve`, never during step construction.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> String;

    fn kind(&self) -> &'static str;

    async fn resolve(&self, cancel: &CancellationToken) -> Result<StepResult>;
}

impl std::fmt::Debug for dyn Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind(), self.name())
    }
}

impl std::fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind(), self.name())
    }
}
