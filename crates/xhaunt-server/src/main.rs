use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use xhaunt_server::{load_config_from, telemetry, HttpAuthVerifier};
use xhaunt_store::{Database, GatewayContext};
use xhaunt_xmpp::component::outbound_channel;
use xhaunt_xmpp::{ComponentStream, ProvisioningFlow, RegistrationController, StreamPresenceNotifier};

/// XEP-0077 registration gateway component.
#[derive(Debug, Parser)]
#[command(name = "xhaunt", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "xhaunt.toml")]
    config: PathBuf,

    /// Load the configuration, migrate the database and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

    telemetry::init(&config.logging)
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to initialize telemetry")?;

    info!("XHaunt starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let db = Database::open("gateway", &config.database_config())
        .await
        .context("Failed to open gateway database")?;
    let context = GatewayContext::open(db)
        .await
        .context("Failed to prepare gateway database")?;

    if cli.check {
        context.close().await.context("Failed to close gateway database")?;
        info!("Configuration and database OK");
        return Ok(());
    }

    let verifier = HttpAuthVerifier::new(config.auth.endpoint.clone(), config.auth_timeout())
        .context("Failed to build HTTP client")?;
    let controller = Arc::new(RegistrationController::new(context.clone(), Arc::new(verifier)));

    let component = config.component_config();
    let (outbound, outbound_rx) = outbound_channel();
    let notifier = StreamPresenceNotifier::new(component.jid.clone(), outbound.clone());
    let flow = Arc::new(ProvisioningFlow::new(controller, Arc::new(notifier)));

    let stream = ComponentStream::connect(&component)
        .await
        .with_context(|| format!("Failed to connect to {}:{}", component.server, component.port))?;

    let served = stream
        .serve(flow, outbound, outbound_rx, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await;

    context.close().await.context("Failed to close gateway database")?;
    served.context("Component stream ended with an error")?;

    info!("XHaunt stopped");
    Ok(())
}
