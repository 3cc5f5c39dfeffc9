use anyhow::{bail, Context, Result};
use chrono::Utc;

use quarry_engine::{build_variables, expand_job};
use quarry_types::{parse_collect_job, validate};

use super::{read_job_document, resolve_allow_list};

/// Parses, validates, and expands a job document without executing it.
/// Prints the per-field violation listing on failure, or a confirmation on
/// success.
pub async fn execute(job_ref: &str, allowed_env: Vec<String>, pass_all_env: bool) -> Result<()> {
    let (document, _) = read_job_document(job_ref).await?;

    tracing::debug!(job_file = %job_ref, "validating job file");
    let mut job = parse_collect_job(&document)
        .with_context(|| format!("failed to parse job file '{job_ref}'"))?;

    if let Err(err) = validate(&job) {
        println!("{err}");
        bail!("job file '{job_ref}' is invalid");
    }

    let allowed_env = resolve_allow_list(allowed_env, pass_all_env);
    let variables = build_variables(&job.metadata.name, Utc::now(), &allowed_env)
        .context("failed to build variables")?;
    expand_job(&mut job, &variables).context("failed to expand templates")?;

    println!("\u{2713} job file '{job_ref}' is valid");
    Ok(())
}
