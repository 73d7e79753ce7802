use anyhow::{Context, Result};
use conduit::api::{create_router, ApiState};
use conduit::auth::{AuthResolver, CustomAuthRegistry};
use conduit::catalog::{ServiceCatalog, ServiceManifest};
use conduit::config::RuntimeConfig;
use conduit::connection::ConnectionStore;
use conduit::invoke::EndpointInvoker;
use conduit::transform::TransformerRegistry;
use conduit::vault::Vault;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conduit=info".into()),
        )
        .init();

    info!("Conduit connector core starting...");

    // Read configuration from environment
    let api_port: u16 = std::env::var("CONDUIT_API_PORT")
        .unwrap_or_else(|_| "3002".to_string())
        .parse()
        .context("CONDUIT_API_PORT must be a valid port number")?;

    let runtime_config = RuntimeConfig::from_env();

    // Seal key is optional: without one, connections simply cannot outlive
    // the process key, which is already true for this in-memory core.
    let vault = match std::env::var("CONDUIT_SEAL_KEY") {
        Ok(key) => Vault::new(&key).context("CONDUIT_SEAL_KEY must be a base64 32-byte key")?,
        Err(_) => {
            info!("CONDUIT_SEAL_KEY not set, using an ephemeral in-memory key");
            Vault::ephemeral()
        }
    };
    let vault = Arc::new(vault);

    info!(
        api_port = api_port,
        request_timeout_secs = runtime_config.request_timeout_secs,
        max_attempts = runtime_config.max_attempts,
        "Configuration loaded"
    );

    // Assemble the core
    let catalog = Arc::new(ServiceCatalog::new());
    let custom_auth = Arc::new(CustomAuthRegistry::new());
    let transformers = Arc::new(TransformerRegistry::new());
    let auth = Arc::new(AuthResolver::new(
        Arc::clone(&custom_auth),
        runtime_config.refresh_threshold_secs,
    ));
    let store = Arc::new(ConnectionStore::new(
        Arc::clone(&catalog),
        Arc::clone(&auth),
        Arc::clone(&vault),
    ));
    let invoker = Arc::new(EndpointInvoker::new(
        Arc::clone(&catalog),
        Arc::clone(&store),
        auth,
        vault,
        transformers,
        runtime_config,
    ));

    // Load service descriptors from the manifest file, if configured
    if let Ok(manifest_path) = std::env::var("CONDUIT_SERVICES_FILE") {
        let text = std::fs::read_to_string(&manifest_path)
            .with_context(|| format!("Failed to read services file at {}", manifest_path))?;
        let manifest: ServiceManifest =
            toml::from_str(&text).context("Failed to parse services file")?;
        let count = manifest.services.len();
        for service in manifest.services {
            catalog
                .register(service)
                .context("Failed to register service from manifest")?;
        }
        info!(service_count = count, path = %manifest_path, "Service manifest loaded");
    }

    // Start HTTP API server
    let router = create_router(ApiState {
        catalog,
        store,
        invoker,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", api_port))
        .await
        .context("Failed to bind connector API port")?;
    info!(port = api_port, "Connector API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Connector API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Connector core stopped");

    Ok(())
}
