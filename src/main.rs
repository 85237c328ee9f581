use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use agent_orchestrator::cli::{Cli, Commands};
use agent_orchestrator::config::AppConfig;
use agent_orchestrator::startup::{AppContext, CheckStatus};
use agent_orchestrator::{api, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli
        .load_config()
        .with_context(|| format!("loading config from {}", cli.config_path().display()))?;
    logging::init(&config.logging).context("initializing logging")?;

    if let Err(e) = run(cli.command, config).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(command: Commands, config: AppConfig) -> anyhow::Result<()> {
    match command {
        Commands::Serve { .. } => serve(config).await,
        Commands::Recover => {
            let ctx = AppContext::build(config).await?;
            let recovered = ctx.recovery.auto_recover_interrupted_workflows().await?;
            println!("Recovered {} workflow(s)", recovered.len());
            for state in recovered {
                println!("  {}  {}  progress {:.0}%", state.workflow_id, state.status, state.progress * 100.0);
            }
            Ok(())
        }
        Commands::Cleanup { max_age_hours } => {
            let ctx = AppContext::build(config).await?;
            let removed = ctx.cleanup_stale_workflows(max_age_hours).await?;
            println!("Removed {} workflow(s) older than {}h", removed, max_age_hours);
            Ok(())
        }
        Commands::Status { workflow_id } => {
            let ctx = AppContext::build(config).await?;
            let state = ctx
                .persistence
                .load_workflow_state(&workflow_id)
                .await?
                .with_context(|| format!("workflow {} not found", workflow_id))?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Commands::CheckConfig => {
            config.validate()?;
            let ctx = AppContext::build(config).await?;
            let checks = ctx.startup_checks().await;
            for check in &checks {
                let symbol = match check.status {
                    CheckStatus::Success => "ok  ",
                    CheckStatus::Warning => "warn",
                    CheckStatus::Failed => "FAIL",
                };
                println!("[{}] {}: {}", symbol, check.name, check.message);
            }
            if checks.iter().any(|c| c.status == CheckStatus::Failed) {
                anyhow::bail!("configuration check failed");
            }
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let ctx = Arc::new(AppContext::build(config).await?);
    let recovered = ctx.start().await?;
    if !recovered.is_empty() {
        info!("Resumed {} interrupted workflow(s)", recovered.len());
    }

    let result = api::serve(Arc::clone(&ctx), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    })
    .await;

    ctx.shutdown().await;
    result.map_err(Into::into)
}
