//! # toolseek CLI
//!
//! | Command | Description |
//! |---------|-------------|
//! | `toolseek serve` | Run the retrieval server in the foreground |
//! | `toolseek start` | Start the server in the background and wait until healthy |
//! | `toolseek stop` | Stop the background server |
//! | `toolseek status` | Report whether the server is running |
//! | `toolseek update [--force]` | Refresh tool embeddings from the tools file |
//! | `toolseek search "<query>"` | Find the tools most relevant to a query |
//! | `toolseek list` | List the tools in the on-disk snapshot |
//!
//! Every command except `serve` prints one status line and exits 0 on
//! success, 1 on failure.

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use toolseek::config::{Config, LogFormat};
use toolseek::process::{ProcessManager, ServerState, StartOutcome, StopOutcome};
use toolseek::retrieval::VectorStore;
use toolseek::{server, ToolSearchClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "toolseek",
    version,
    about = "Semantic tool retrieval: embed tool definitions once, search them on every turn"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server in the foreground.
    Serve,
    /// Start the server in the background.
    Start,
    /// Stop the background server.
    Stop,
    /// Show whether the server is running.
    Status,
    /// Re-embed tools whose definitions changed.
    Update {
        /// Re-embed every tool, ignoring the cache.
        #[arg(long)]
        force: bool,
    },
    /// Search for tools relevant to a query.
    Search {
        query: String,
        /// Number of results (defaults to TOOLSEEK_DEFAULT_TOP_K).
        #[arg(long, short = 'k', allow_negative_numbers = true)]
        top_k: Option<i64>,
    },
    /// List tools in the on-disk snapshot.
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&cli.command, config.log_format);

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(command: &Commands, format: LogFormat) {
    let default_filter = match command {
        Commands::Serve => "toolseek=info,tower_http=debug",
        _ => "toolseek=warn",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run(command: Commands, config: Config) -> anyhow::Result<()> {
    match command {
        Commands::Serve => {
            tracing::info!(port = config.port, "Starting toolseek retrieval server");
            server::run_server(config).await
        }
        Commands::Start => {
            let mut manager = ProcessManager::new(&config)?;
            let outcome = manager.start().await?;
            println!(
                "{}",
                start_report(&outcome, &config, &manager.files().log_path())?
            );
            Ok(())
        }
        Commands::Stop => {
            let mut manager = ProcessManager::new(&config)?;
            let outcome = manager.stop().await?;
            println!("{}", stop_report(&outcome, &config)?);
            Ok(())
        }
        Commands::Status => {
            let mut manager = ProcessManager::new(&config)?;
            let status = manager.status().await;
            match status.state {
                ServerState::Running => {
                    let tools = status.health.as_ref().map_or(0, |h| h.tool_count);
                    let pid = status.record.as_ref().map(|r| r.pid);
                    let uptime = status
                        .uptime
                        .map(|d| format!(", up {}s", d.num_seconds().max(0)))
                        .unwrap_or_default();
                    println!(
                        "Server running{} on {}, {} tools{}",
                        pid_suffix(pid),
                        config.base_url(),
                        tools,
                        uptime
                    );
                    Ok(())
                }
                ServerState::Unknown => anyhow::bail!(
                    "server is not answering but runtime files exist in {} (crashed?); run `toolseek stop` to clean up",
                    config.runtime_dir.display()
                ),
                _ => {
                    println!("Server is not running");
                    Ok(())
                }
            }
        }
        Commands::Update { force } => {
            let mut client = ToolSearchClient::new(config)?;
            let response = client.update(force).await?;
            if response.success {
                println!("{}", response.message);
                Ok(())
            } else {
                if !response.failed.is_empty() {
                    eprintln!("Failed tools: {}", response.failed.join(", "));
                }
                anyhow::bail!("{}", response.message)
            }
        }
        Commands::Search { query, top_k } => {
            let top_k = top_k.unwrap_or(config.default_top_k);
            let mut client = ToolSearchClient::new(config)?;
            let hits = client.search(&query, top_k).await?;
            if hits.is_empty() {
                println!("No matching tools");
            }
            for hit in hits {
                println!("{:.4}  {}  [{}]", hit.score, hit.name, hit.definition.origin);
            }
            Ok(())
        }
        Commands::List => {
            let store = VectorStore::load(&config.store_dir);
            if store.is_empty() {
                println!("No tools embedded yet; run `toolseek update`");
                return Ok(());
            }
            for record in store.records() {
                println!("{}  [{}]", record.name, record.definition.origin);
            }
            Ok(())
        }
    }
}

/// Status line for `start`. A server that was already running is a
/// conflict and fails the command.
fn start_report(
    outcome: &StartOutcome,
    config: &Config,
    log_path: &std::path::Path,
) -> anyhow::Result<String> {
    match outcome {
        StartOutcome::Started { pid } => Ok(format!(
            "Server started (pid {}) on {}",
            pid,
            config.base_url()
        )),
        StartOutcome::AlreadyRunning { pid } => anyhow::bail!(
            "server already running{} on {}",
            pid_suffix(*pid),
            config.base_url()
        ),
        StartOutcome::TimedOut { pid } => anyhow::bail!(
            "server (pid {}) did not become healthy within {:?}; see {}",
            pid,
            config.startup_timeout,
            log_path.display()
        ),
    }
}

fn stop_report(outcome: &StopOutcome, config: &Config) -> anyhow::Result<String> {
    match outcome {
        StopOutcome::NotRunning => Ok("Server is not running".to_string()),
        StopOutcome::Stopped { pid } => Ok(format!("Server stopped{}", pid_suffix(*pid))),
        StopOutcome::Unresponsive { pid } => anyhow::bail!(
            "server process {} is alive but not answering on {}; kill it manually, then run `toolseek stop` again",
            pid,
            config.base_url()
        ),
    }
}

fn pid_suffix(pid: Option<u32>) -> String {
    pid.map(|pid| format!(" (pid {})", pid)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    fn config() -> Config {
        Config::for_home(PathBuf::from("/tmp/toolseek-cli-test"))
    }

    #[test]
    fn test_start_when_already_running_fails() {
        let outcome = StartOutcome::AlreadyRunning { pid: Some(42) };

        let err = start_report(&outcome, &config(), Path::new("server.log")).unwrap_err();

        assert!(err.to_string().contains("already running (pid 42)"));
    }

    #[test]
    fn test_start_reports_started_pid() {
        let line = start_report(
            &StartOutcome::Started { pid: 7 },
            &config(),
            Path::new("server.log"),
        )
        .unwrap();

        assert!(line.starts_with("Server started (pid 7)"));
    }

    #[test]
    fn test_start_timeout_points_at_log() {
        let err = start_report(
            &StartOutcome::TimedOut { pid: 7 },
            &config(),
            Path::new("/var/log/server.log"),
        )
        .unwrap_err();

        assert!(err.to_string().contains("/var/log/server.log"));
    }

    #[test]
    fn test_stop_outcomes() {
        assert!(stop_report(&StopOutcome::NotRunning, &config()).is_ok());
        assert_eq!(
            stop_report(&StopOutcome::Stopped { pid: Some(9) }, &config()).unwrap(),
            "Server stopped (pid 9)"
        );
        assert!(stop_report(&StopOutcome::Unresponsive { pid: 9 }, &config()).is_err());
    }
}
