//! JSON encoder with configurable indentation.

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use quarry_types::StepResult;

use crate::errors::Interrupted;

use super::Encoder;

/// Encodes result data as JSON. An empty indent produces compact output; a
/// non-empty indent (e.g. `"  "` or `"\t"`) produces pretty output. Every
/// payload is newline-terminated, so compact stdout output is one record per
/// line.
pub struct JsonEncoder {
    indent: String,
}

impl JsonEncoder {
    pub fn new(indent: impl Into<String>) -> Self {
        Self {
            indent: indent.into(),
        }
    }
}

impl Encoder for JsonEncoder {
    fn encode_result(&self, cancel: &CancellationToken, result: &StepResult) -> Result<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(Interrupted::Cancelled.into());
        }

        let mut buf = Vec::new();
        if self.indent.is_empty() {
            serde_json::to_writer(&mut buf, &result.data)
        } else {
            let formatter = serde_json::ser::PrettyFormatter::with_indent(self.indent.as_bytes());
            let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
            result.data.serialize(&mut serializer)
        }
        .context("failed to encode result as JSON")?;
        buf.push(b'\n');
        Ok(buf)
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(encoder: &JsonEncoder, data: serde_json::Value) -> String {
        let result = StepResult::new(data);
        let bytes = encoder
            .encode_result(&CancellationToken::new(), &result)
            .unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_compact_output_is_one_line() {
        let encoder = JsonEncoder::new("");
        let out = encode(&encoder, serde_json::json!({"value": "hi"}));
        assert_eq!(out, "{\"value\":\"hi\"}\n");
    }

    #[test]
    fn test_indented_output() {
        let encoder = JsonEncoder::new("  ");
        let out = encode(&encoder, serde_json::json!({"k": 1}));
        assert_eq!(out, "{\n  \"k\": 1\n}\n");
    }

    #[test]
    fn test_deterministic_per_input() {
        let encoder = JsonEncoder::new("");
        let data = serde_json::json!({"b": 2, "a": 1});
        assert_eq!(encode(&encoder, data.clone()), encode(&encoder, data));
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(JsonEncoder::new("").file_extension(), "json");
    }

    #[test]
    fn test_cancelled_encode_fails() {
        let encoder = JsonEncoder::new("");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = encoder
            .encode_result(&cancel, &StepResult::new(serde_json::json!(1)))
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<Interrupted>(),
            Some(&Interrupted::Cancelled)
        );
    }
}
