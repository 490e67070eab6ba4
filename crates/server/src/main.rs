mod bootstrap;
mod health;
mod http;
mod slack_api;
mod socket;
mod store;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use taskbot_core::config::{AppConfig, LoadOptions, TransportMode};
use taskbot_slack::socket::{ReconnectPolicy, SocketModeRunner};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    bootstrap::Application,
    health::HealthState,
    http::IngressState,
    socket::WebSocketTransport,
};

#[derive(Debug, Parser)]
#[command(
    name = "taskbot-server",
    about = "Slack task bot",
    long_about = "Turns unanswered mentions, /업무추가 commands and trigger reactions into tasks on the team sheet.",
    after_help = "Examples:\n  taskbot-server\n  taskbot-server --config taskbot.toml --check"
)]
struct Cli {
    #[arg(long, help = "Path to a taskbot.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, help = "Validate configuration and exit")]
    check: bool,
}

fn init_logging(config: &AppConfig) {
    use taskbot_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run(Cli::parse()).await
}

async fn run(cli: Cli) -> Result<()> {
    let require_file = cli.config.is_some();
    let config = AppConfig::load(LoadOptions {
        config_path: cli.config,
        require_file,
        ..LoadOptions::default()
    })?;
    init_logging(&config);

    if cli.check {
        info!(
            event_name = "system.config.valid",
            correlation_id = "bootstrap",
            transport_mode = config.transport_mode().as_str(),
            roster_size = config.pipeline.roster.len(),
            "configuration is valid"
        );
        return Ok(());
    }

    let app = bootstrap::bootstrap_with_config(config)?;
    let transport_mode = app.config.transport_mode();
    info!(
        event_name = "system.server.slack_transport_mode",
        correlation_id = "bootstrap",
        transport_mode = transport_mode.as_str(),
        "slack transport mode selected"
    );

    match transport_mode {
        TransportMode::SocketMode => run_socket_mode(app).await?,
        TransportMode::Http => run_http_mode(app).await?,
    }

    info!(event_name = "system.server.stopping", correlation_id = "shutdown", "taskbot stopping");
    Ok(())
}

async fn run_socket_mode(app: Application) -> Result<()> {
    let health = HealthState::new(TransportMode::SocketMode, app.config.pipeline.roster.len());
    health::spawn(&app.config.server.bind_address, app.config.server.port, health::router(health))
        .await?;

    let transport = Arc::new(WebSocketTransport::new(Arc::clone(&app.slack_api)));
    let runner = SocketModeRunner::new(transport, app.processor, ReconnectPolicy::default());

    info!(event_name = "system.server.started", correlation_id = "bootstrap", "taskbot started");
    tokio::select! {
        result = runner.start() => result,
        signal = wait_for_shutdown() => signal,
    }
}

async fn run_http_mode(app: Application) -> Result<()> {
    warn!(
        event_name = "system.server.http_mode",
        correlation_id = "bootstrap",
        "no app token configured; slack must be able to reach this server on a public url"
    );
    if app.config.slack.signing_secret.is_none() {
        warn!(
            event_name = "system.server.unsigned_ingress",
            correlation_id = "bootstrap",
            "no signing secret configured; incoming requests are not verified"
        );
    }

    let health = HealthState::new(TransportMode::Http, app.config.pipeline.roster.len());
    let ingress = IngressState::new(app.processor, app.config.slack.signing_secret.clone());
    let router = http::router(ingress).merge(health::router(health));
    health::spawn(&app.config.server.bind_address, app.config.server.port, router).await?;

    info!(event_name = "system.server.started", correlation_id = "bootstrap", "taskbot started");
    wait_for_shutdown().await
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
