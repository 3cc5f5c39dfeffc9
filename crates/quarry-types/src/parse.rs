//! Job document parsing.

use anyhow::{Context, Result};

use crate::job::CollectJob;

/// Parses a YAML or JSON job document into a [`CollectJob`].
///
/// YAML is a superset of JSON, so both formats are accepted interchangeably.
/// Unknown fields are rejected. Structural validation beyond the schema is a
/// separate pass, see [`crate::validate`].
///
/// # Errors
///
/// Returns an error if the document is malformed or contains unknown fields.
pub fn parse_collect_job(data: &[u8]) -> Result<CollectJob> {
    serde_yaml::from_slice(data).context("failed to unmarshal job document")
}
