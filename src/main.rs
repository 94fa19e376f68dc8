use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use outpost::config::HostConfig;
use outpost::executor::CommandExecutor;
use outpost::gateway::{ServerConfig, start_server};
use outpost::supervisor::ProcessSupervisor;
use outpost::workdir::{DEFAULT_REPOSITORY, WorkdirRegistry};

#[derive(Parser)]
#[command(name = "outpost")]
#[command(version, about = "Remote execution and preview host for mobile cloud-IDE clients")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Root directory for repository working trees
    #[arg(long, global = true)]
    pub project_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the execution API and preview gateway
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Public base URL used to mint proxy URLs
        #[arg(long)]
        gateway_base: Option<String>,

        /// Idle window in seconds before the host shuts itself down
        #[arg(long)]
        idle_secs: Option<u64>,

        /// Directory for rolling log files (stderr only when omitted)
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Execute one command and print the JSON result
    Exec {
        /// Shell command to run
        command: String,

        /// Repository id providing working-directory continuity
        #[arg(short, long, default_value = DEFAULT_REPOSITORY)]
        repository: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = HostConfig::load().context("Failed to load configuration")?;
    if let Some(root) = cli.project_root.clone() {
        config.project_root = root;
    }

    match cli.command {
        Commands::Serve {
            port,
            gateway_base,
            idle_secs,
            log_dir,
        } => {
            // Keep the guard alive for the lifetime of the server
            let _log_guard = init_tracing(cli.verbose, log_dir.as_deref());

            if let Some(base) = gateway_base {
                config.gateway_base = base;
            } else if config.gateway_base == HostConfig::default().gateway_base {
                config.gateway_base = format!("http://localhost:{port}");
            }
            if let Some(secs) = idle_secs {
                config.idle_window = std::time::Duration::from_secs(secs);
            }

            start_server(ServerConfig { port, host: config }).await?;
        }
        Commands::Exec {
            command,
            repository,
        } => {
            let _log_guard = init_tracing(cli.verbose, None);
            config
                .ensure_project_root()
                .context("Failed to prepare project root")?;

            let workdirs = Arc::new(WorkdirRegistry::new(config.project_root.clone()));
            let supervisor = Arc::new(ProcessSupervisor::new(config.stop_grace));
            let executor = CommandExecutor::new(config, workdirs, supervisor);

            let result = executor.execute(&command, &repository).await;
            let success = result.success;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !success {
                std::process::exit(result.exit_code.clamp(1, 125));
            }
        }
    }

    Ok(())
}

/// Initialize tracing: env-filtered stderr output, plus a daily-rolling
/// file when a log directory is given.
fn init_tracing(
    verbose: bool,
    log_dir: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "outpost=debug" } else { "outpost=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "outpost.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
