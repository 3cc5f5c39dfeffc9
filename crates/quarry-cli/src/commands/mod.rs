pub mod collect;
pub mod validate;
pub mod version;

use anyhow::{bail, Context, Result};

/// Reads a job document from a local path or an `http(s)://` URL. Returns
/// the raw bytes and whether the source was remote.
pub async fn read_job_document(reference: &str) -> Result<(Vec<u8>, bool)> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        let response = reqwest::get(reference)
            .await
            .with_context(|| format!("failed to fetch remote job file '{reference}'"))?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                "request to remote job file '{reference}' failed with status {}",
                status.as_u16()
            );
        }

        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read remote job file '{reference}'"))?;
        return Ok((body.to_vec(), true));
    }

    let bytes = tokio::fs::read(reference)
        .await
        .with_context(|| format!("failed to read local job file '{reference}'"))?;
    Ok((bytes, false))
}

/// Resolves the template allow-list. With `--pass-all-env` the allow-list
/// becomes every variable name currently present in the environment; a
/// warning is logged because this widens what a job document may read.
pub fn resolve_allow_list(allowed_env: Vec<String>, pass_all_env: bool) -> Vec<String> {
    if pass_all_env {
        tracing::warn!("allowing all environment variables to be used in job configuration");
        std::env::vars().map(|(name, _)| name).collect()
    } else {
        allowed_env
    }
}
