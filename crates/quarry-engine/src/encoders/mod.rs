//! Result encoders.

pub mod json;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use quarry_types::StepResult;

pub use json::JsonEncoder;

/// Encodes a single result's `data` into a byte payload. Deterministic per
/// input.
pub trait Encoder: Send + Sync {
    fn encode_result(&self, cancel: &CancellationToken, result: &StepResult) -> Result<Vec<u8>>;

    /// File extension for encoded payloads, without a leading dot.
    fn file_extension(&self) -> &'static str;
}

impl std::fmt::Debug for dyn Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Encoder(.{})", self.file_extension())
    }
}
