use atp_investor::config::AppConfig;
use atp_investor::context::AppContext;
use atp_investor::error::Result;
use atp_investor::llm::{ClaudeStageRunner, LlmBackend};
use atp_investor::scheduler::{self, Scheduler};
use atp_investor::socials::SocialsAgent;
use atp_investor::toolset::{AtpClient, TelegramNotifier, Toolset, ALL_TOOL_NAMES};
use atp_investor::wallet::{JsonRpcBalanceSource, WalletService};
use atp_investor::workflow::stages::{investment_stages, STAGE_PORTFOLIO_ANALYSIS};
use atp_investor::workflow::WorkflowEngine;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atp-investor", about = "Autonomous IQ investment bot for ATP agents")]
struct Cli {
    /// Configuration directory
    #[arg(short, long, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single investment cycle and exit
    Once,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load_from(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(errors) = config.validate() {
        for problem in &errors {
            error!("config: {problem}");
        }
        eprintln!("Configuration invalid ({} problem(s)), aborting", errors.len());
        std::process::exit(1);
    }

    let (app, engine, backend) = match build(&config) {
        Ok(parts) => parts,
        Err(e) => {
            error!("Startup failed: {e}");
            eprintln!("Startup failed: {e}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(Commands::Once) => {
            info!("Starting ATP investor (single cycle)");
            if let Err(e) = scheduler::run_cycle(&app, &engine).await {
                error!("Cycle failed: {e}");
                std::process::exit(2);
            }
        }
        None => {
            info!("Starting ATP investor (scheduled)");
            let scheduler = match Scheduler::new(&config.schedule.cron) {
                Ok(s) => s,
                Err(e) => {
                    error!("Startup failed: {e}");
                    std::process::exit(1);
                }
            };

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(true);
            });

            if config.telegram.interactive {
                let chat_agent = SocialsAgent::new(app.toolset.telegram(), Arc::clone(&backend));
                let chat_shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    chat_agent.run(chat_shutdown).await;
                });
            }

            if let Err(e) = scheduler.run(&app, &engine, shutdown_rx).await {
                error!("Scheduler stopped: {e}");
                std::process::exit(2);
            }
            info!("Shutdown complete");
        }
    }
}

/// Wire the long-lived services together from validated configuration.
/// The backend is returned separately so the interactive chat agent can
/// share it with the workflow stages.
fn build(config: &AppConfig) -> Result<(AppContext, WorkflowEngine, Arc<dyn LlmBackend>)> {
    let balance_source = Arc::new(JsonRpcBalanceSource::new(config.wallet.rpc_url.as_str()));
    let wallet = WalletService::new(&config.wallet, &config.investment, balance_source)?;

    let toolset = Arc::new(Toolset::new(
        AtpClient::new(&config.atp),
        TelegramNotifier::new(&config.telegram),
        wallet.address().to_string(),
        &config.investment,
    ));

    let backend: Arc<dyn LlmBackend> =
        Arc::new(ClaudeStageRunner::new(Arc::clone(&toolset), config.llm.model.clone()));

    let engine = WorkflowEngine::new(
        investment_stages(Arc::clone(&backend)),
        STAGE_PORTFOLIO_ANALYSIS,
        config.llm.max_steps,
        &ALL_TOOL_NAMES,
    )?;

    let app = AppContext::new(wallet, toolset, config.investment.history_capacity);
    Ok((app, engine, backend))
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| fallback_filter(&config.logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Filter used when `RUST_LOG` is absent: the configured level governs
/// every target, this crate included.
fn fallback_filter(level: &str) -> EnvFilter {
    EnvFilter::new(level)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
