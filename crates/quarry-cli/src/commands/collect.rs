use std::io::{BufRead, IsTerminal, Write};

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use quarry_engine::{compile_job, BuildContext, Registry, Runner};
use quarry_types::parse_collect_job;

use super::{read_job_document, resolve_allow_list};

/// Executes a collection job end to end: read, parse, compile, build, run.
pub async fn execute(
    job_ref: &str,
    allowed_env: Vec<String>,
    pass_all_env: bool,
    trust_remote: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let (document, is_remote) = read_job_document(job_ref).await?;

    if is_remote && !trust_remote {
        confirm_remote(job_ref, &document)?;
    }

    tracing::info!(job_file = %job_ref, "parsing job file");
    let job = parse_collect_job(&document)
        .with_context(|| format!("failed to parse job file '{job_ref}'"))?;

    let allowed_env = resolve_allow_list(allowed_env, pass_all_env);
    let compiled = compile_job(job, &allowed_env)?;

    let registry = Registry::with_builtins();
    let ctx = BuildContext::default();
    let mut runner = Runner::new(&compiled, &registry, &ctx)
        .await
        .context("failed to create runner")?;

    runner.run(cancel).await.context("failed to run job")
}

// A remote document that the operator has not explicitly trusted is shown in
// full and confirmed interactively; in non-interactive environments (no TTY,
// or CI set) it is refused outright.
fn confirm_remote(job_ref: &str, document: &[u8]) -> Result<()> {
    if !is_interactive() {
        bail!("remote job file requires --trust-remote in non-interactive mode");
    }

    tracing::warn!(job_file = %job_ref, "remote job file is not trusted");
    println!("{}", String::from_utf8_lossy(document));

    print!("Run this remote job file? (y/n): ");
    std::io::stdout().flush().context("failed to flush stdout")?;

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    if answer.trim() != "y" {
        bail!("remote job file is not trusted");
    }
    Ok(())
}

fn is_interactive() -> bool {
    if !std::env::var("CI").unwrap_or_default().is_empty() {
        return false;
    }
    std::io::stdin().is_terminal()
}
