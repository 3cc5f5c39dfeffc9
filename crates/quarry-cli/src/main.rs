mod commands;
mod logging;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "quarry", version, about = "Declarative infrastructure data collection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    debug: bool,

    /// Log level (debug, info, warn, error, fatal)
    #[arg(short = 'l', long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a collection job
    Collect {
        /// Path or http(s):// URL of the job document
        job: String,

        /// Environment variable allowed in job templates (repeatable)
        #[arg(long = "allowed-env", value_name = "NAME")]
        allowed_env: Vec<String>,

        /// Allow every environment variable in job templates
        #[arg(long)]
        pass_all_env: bool,

        /// Trust a remote job document without prompting
        #[arg(long)]
        trust_remote: bool,
    },
    /// Parse, validate, and expand a job document without executing it
    Validate {
        /// Path or http(s):// URL of the job document
        job: String,

        /// Environment variable allowed in job templates (repeatable)
        #[arg(long = "allowed-env", value_name = "NAME")]
        allowed_env: Vec<String>,

        /// Allow every environment variable in job templates
        #[arg(long)]
        pass_all_env: bool,
    },
    /// Print build information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug, &cli.log_level)?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            signal_token.cancel();
        }
    });

    match cli.command {
        Commands::Collect {
            job,
            allowed_env,
            pass_all_env,
            trust_remote,
        } => commands::collect::execute(&job, allowed_env, pass_all_env, trust_remote, &cancel).await,
        Commands::Validate {
            job,
            allowed_env,
            pass_all_env,
        } => commands::validate::execute(&job, allowed_env, pass_all_env).await,
        Commands::Version => {
            commands::version::execute();
            Ok(())
        }
    }
}
