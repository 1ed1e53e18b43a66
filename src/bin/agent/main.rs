use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use quiz_chain_agent::config::{DEFAULT_BIND, DEFAULT_MAX_SECONDS};
use quiz_chain_agent::face::{self, AppState};
use quiz_chain_agent::{ChainDriver, Config, Credentials, FetchMode, RunContext};

#[derive(Parser, Debug)]
#[command(name = "agent", about = "Walks quiz chains and submits computed answers")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    #[arg(long, env = "QUIZ_EMAIL", global = true, default_value = "")]
    email: String,

    #[arg(long, env = "QUIZ_SECRET", global = true, default_value = "", hide_env_values = true)]
    secret: String,

    #[arg(long, env = "QUIZ_MAX_SECONDS", global = true, default_value_t = DEFAULT_MAX_SECONDS)]
    max_seconds: u64,

    #[arg(long, env = "QUIZ_FETCH_MODE", global = true, value_enum, default_value_t = FetchMode::Http)]
    fetch_mode: FetchMode,

    /// Default the log filter to debug instead of info.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept quiz tasks over HTTP.
    Serve {
        #[arg(long, env = "QUIZ_BIND", default_value = DEFAULT_BIND)]
        bind: String,
    },
    /// Solve one chain in the foreground.
    Solve {
        #[arg(long)]
        url: String,
    },
}

fn init_tracing(debug: bool) {
    let default_level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str().to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.common.debug);

    let common = cli.common;
    let config = Config::new(common.email, common.secret)
        .with_max_seconds(common.max_seconds)
        .with_fetch_mode(common.fetch_mode);

    match cli.command {
        Command::Serve { bind } => {
            let config = config.with_bind(bind);
            if config.secret.is_empty() {
                anyhow::bail!("QUIZ_SECRET must be set to accept tasks");
            }
            let driver = build_driver(&config).await?;
            let state = Arc::new(AppState::new(config, driver));
            face::serve(state).await
        }
        Command::Solve { url } => {
            let start_time = Instant::now();
            let driver = build_driver(&config).await?;
            let ctx = RunContext::new(0, &url);
            let creds = Credentials {
                email: config.email.clone(),
                secret: config.secret.clone(),
            };
            let report = driver
                .drive(&ctx, &url, &creds, start_time, config.max_seconds)
                .await;
            info!(
                steps = report.steps,
                submissions = report.submissions,
                stop = %report.stop,
                "chain finished"
            );
            Ok(())
        }
    }
}

/// Browser launch blocks, so it runs off the async workers.
async fn build_driver(config: &Config) -> Result<Arc<ChainDriver>> {
    let mode = config.fetch_mode;
    let config = config.clone();
    let driver = tokio::task::spawn_blocking(move || ChainDriver::from_config(&config))
        .await
        .map_err(|e| anyhow::anyhow!("Driver setup panicked: {}", e))??;
    info!(?mode, "Driver ready");
    Ok(Arc::new(driver))
}
