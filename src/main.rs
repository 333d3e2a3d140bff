use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shotgun_desktop_bridge::config::BridgeConfig;
use shotgun_desktop_bridge::process_manager;
use shotgun_desktop_bridge::runtime::BridgeRuntime;

#[derive(Debug, Clone, Parser)]
#[command(
    author,
    version,
    about = "Local trust bridge for Shotgun toolkit automation"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(
        long,
        global = true,
        env = "SHOTGUN_BRIDGE_CONFIG",
        default_value = "shotgun-bridge.toml"
    )]
    config: PathBuf,

    /// Log level filter, e.g. info,debug,trace.
    #[arg(long, global = true, env = "SHOTGUN_BRIDGE_LOG", default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum CliCommand {
    /// Run both bridge channels until interrupted.
    Serve,
    /// Run one toolkit command directly, bypassing the websocket surface.
    Exec(ExecArgs),
}

#[derive(Debug, Clone, Args)]
struct ExecArgs {
    /// Pipeline configuration directory containing the toolkit scripts.
    pipeline_config: PathBuf,
    /// Toolkit command name (must start with "shotgun").
    command: String,
    /// Arguments passed through to the toolkit script.
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let config = BridgeConfig::load(&cli.config)?;
    match cli.command.unwrap_or(CliCommand::Serve) {
        CliCommand::Serve => {
            let manager = process_manager::create(config.toolkit.launcher.clone());
            BridgeRuntime::run_blocking(config, manager).await
        }
        CliCommand::Exec(args) => run_exec(config, args).await,
    }
}

async fn run_exec(config: BridgeConfig, args: ExecArgs) -> Result<()> {
    let manager = process_manager::create(config.toolkit.launcher.clone());
    let (tx, rx) = tokio::sync::oneshot::channel();
    manager
        .execute_toolkit_command(
            &args.pipeline_config,
            &args.command,
            &args.args,
            Box::new(move |stdout, stderr, exit_code| {
                let _ = tx.send((stdout, stderr, exit_code));
            }),
        )
        .await?;

    let (stdout, stderr, _exit_code) = rx
        .await
        .context("toolkit command completed without reporting output")?;
    std::io::stdout()
        .write_all(&stdout)
        .context("failed writing captured stdout")?;
    std::io::stderr()
        .write_all(&stderr)
        .context("failed writing captured stderr")?;
    Ok(())
}

fn init_logging(filter: &str) {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env)
        .with_target(false)
        .init();
}
