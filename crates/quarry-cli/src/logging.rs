use anyhow::{bail, Result};
use tracing_subscriber::EnvFilter;

/// Initializes structured logging with tracing-subscriber.
///
/// The `RUST_LOG` env var wins when set; otherwise the provided level is
/// used, with `--debug` forcing `debug`. `fatal` is accepted for
/// compatibility and maps to `error`.
pub fn init(debug: bool, log_level: &str) -> Result<()> {
    let level = match log_level {
        "debug" | "info" | "warn" | "error" => log_level,
        "fatal" => "error",
        other => bail!("invalid log level {other}"),
    };
    let level = if debug { "debug" } else { level };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
