use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use haven::config::Settings;
use haven::error::BridgeResult;
use haven::runtime::discovery::{self, RuntimeKind};
use haven::runtime::manager::{BridgeManager, RetryOptions};

/// Bridge to browser-dependent SDKs running in a JavaScript subprocess
#[derive(Parser)]
#[command(name = "haven")]
#[command(version)]
#[command(about = "Bridge to browser-dependent SDKs running in a JavaScript subprocess")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug mode in the JS runtime
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the JavaScript runtimes installed on this machine
    Doctor {
        /// Prefer this runtime kind when resolving the default (deno, bun, node)
        #[arg(long)]
        prefer: Option<String>,
    },
    /// Ping the JS runtime, starting it if necessary
    Ping,
    /// Show bridge manager status as JSON
    Status,
    /// Call a method on the JS runtime
    Call {
        /// Method name (e.g. "lit.encrypt", "synapse.getStatus")
        method: String,

        /// Parameters as a JSON document
        #[arg(long)]
        params: Option<String>,

        /// Per-call timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Maximum retry attempts
        #[arg(long, default_value_t = 3)]
        retries: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Log to stderr so stdout stays clean for command output.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> BridgeResult<()> {
    match cli.command {
        Commands::Doctor { prefer } => doctor(prefer).await,
        Commands::Ping => {
            configure(&cli).await?;
            let manager = BridgeManager::instance();
            let result = async {
                let bridge = manager.get_bridge().await?;
                Ok::<bool, haven::BridgeError>(bridge.ping().await)
            }
            .await;
            manager.shutdown().await;
            if result? {
                println!("pong");
                Ok(())
            } else {
                Err(haven::BridgeError::transport("runtime did not answer ping"))
            }
        }
        Commands::Status => {
            configure(&cli).await?;
            let status = BridgeManager::instance().get_status().await;
            let rendered = serde_json::to_string_pretty(&status)
                .map_err(|e| haven::BridgeError::config(e.to_string()))?;
            println!("{rendered}");
            Ok(())
        }
        Commands::Call { .. } => {
            configure(&cli).await?;
            let Commands::Call {
                method,
                params,
                timeout,
                retries,
            } = cli.command
            else {
                unreachable!()
            };
            let params = match params {
                Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
                    haven::BridgeError::config(format!("--params is not valid JSON: {e}"))
                })?),
                None => None,
            };
            let options = RetryOptions {
                max_retries: retries,
                timeout: timeout.map(Duration::from_secs),
                ..RetryOptions::default()
            };

            let manager = BridgeManager::instance();
            let result = manager.call_with_retry(&method, params, options).await;
            manager.shutdown().await;

            let value = result?;
            let rendered = serde_json::to_string_pretty(&value)
                .map_err(|e| haven::BridgeError::config(e.to_string()))?;
            println!("{rendered}");
            Ok(())
        }
    }
}

/// Load settings and apply them to the singleton manager.
async fn configure(cli: &Cli) -> BridgeResult<()> {
    let settings = Settings::load(cli.config.as_deref()).await?;
    let mut config = settings.manager_config();
    if cli.debug {
        config.debug = true;
    }
    haven::configure_bridge(config).await
}

/// List installed runtimes and mark the one discovery would pick.
async fn doctor(prefer: Option<String>) -> BridgeResult<()> {
    let preferred = match prefer {
        Some(name) => Some(
            RuntimeKind::from_str(&name).map_err(haven::BridgeError::config)?,
        ),
        None => None,
    };

    let runtimes = discovery::discover_all_runtimes().await;
    if runtimes.is_empty() {
        return Err(haven::BridgeError::NoRuntimeFound);
    }

    let default = discovery::discover_runtime(preferred).await?;
    for info in runtimes {
        let marker = if info.executable == default.executable {
            "  (default)"
        } else {
            ""
        };
        println!("{:<16} {}{}", info.display_name(), info.executable.display(), marker);
    }
    Ok(())
}
