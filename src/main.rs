//! Application entry point.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use delegation_billing_engine::api::create_router;
use delegation_billing_engine::app::{
    AppState, CrankConfig, DeadLetterConfig, ProcessorConfig, RecoveryConfig, WorkerConfig,
    spawn_billing_worker, spawn_reclaim_crank,
};
use delegation_billing_engine::domain::{OperatorAlerter, WebhookIngestor};
use delegation_billing_engine::executor::{BundlerConfig, BundlerExecutor, NetworkRegistry};
use delegation_billing_engine::infra::{
    HttpWebhookIngestor, LogAlerter, PostgresConfig, PostgresLedger, WebhookAlerter,
};

/// Application configuration
struct Config {
    database_url: String,
    /// Smart-account address redemptions are executed from
    redeemer_address: String,
    redeemer_private_key: SecretString,
    /// JSON array of supported networks
    networks_json: String,
    host: String,
    port: u16,
    enable_background_worker: bool,
    worker_poll_interval_secs: u64,
    enable_stale_crank: bool,
    crank_poll_interval_secs: u64,
    processor_config: ProcessorConfig,
    /// Operator alert webhook (optional - logs alerts if not set)
    alert_webhook_url: Option<String>,
    /// `provider=url` pairs for webhook re-ingestion (optional)
    ingestors: Option<String>,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let redeemer_address =
            env::var("REDEEMER_ADDRESS").context("REDEEMER_ADDRESS not set")?;
        let redeemer_private_key = Self::load_signer_key()?;
        let networks_json = env::var("NETWORKS").context(
            "NETWORKS not set (expected a JSON array of {chain_id, name, rpc_url, bundler_url})",
        )?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        let enable_background_worker = env::var("ENABLE_BACKGROUND_WORKER")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let worker_poll_interval_secs = env::var("WORKER_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let enable_stale_crank = env::var("ENABLE_STALE_CRANK")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let crank_poll_interval_secs = env::var("CRANK_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let mut processor_config = ProcessorConfig::default();
        if let Some(concurrency) = env::var("PROCESSOR_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            processor_config.concurrency = concurrency;
        }
        if let Some(max_retries) = env::var("MAX_RETRIES").ok().and_then(|v| v.parse().ok()) {
            processor_config.max_retries = max_retries;
        }

        Ok(Self {
            database_url,
            redeemer_address,
            redeemer_private_key,
            networks_json,
            host,
            port,
            enable_background_worker,
            worker_poll_interval_secs,
            enable_stale_crank,
            crank_poll_interval_secs,
            processor_config,
            alert_webhook_url: env::var("ALERT_WEBHOOK_URL").ok(),
            ingestors: env::var("INGESTORS").ok(),
        })
    }

    fn load_signer_key() -> Result<SecretString> {
        let key_str = env::var("REDEEMER_PRIVATE_KEY").map_err(|_| {
            anyhow::anyhow!(
                "REDEEMER_PRIVATE_KEY environment variable is not set.\n\
                 This is a REQUIRED configuration for production.\n\
                 Please set REDEEMER_PRIVATE_KEY to the redeemer account's signing key."
            )
        })?;

        if key_str.is_empty() {
            anyhow::bail!(
                "REDEEMER_PRIVATE_KEY environment variable is empty.\n\
                 Please provide a valid signing key."
            );
        }

        if key_str == "YOUR_PRIVATE_KEY_HERE" {
            anyhow::bail!(
                "REDEEMER_PRIVATE_KEY is set to the default placeholder value.\n\
                 Please replace it with the redeemer account's actual signing key.\n\
                 SECURITY WARNING: Never run in production without a valid key!"
            );
        }

        info!("Loading signer key from environment");
        Ok(SecretString::from(key_str))
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!(
        "🏗️  Delegation Billing Engine v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;

    info!("📦 Initializing infrastructure...");

    let ledger = PostgresLedger::new(&config.database_url, PostgresConfig::default()).await?;
    ledger.run_migrations().await?;
    let ledger = Arc::new(ledger);
    info!("   ✓ Ledger connected and migrated");

    let networks = NetworkRegistry::from_json(&config.networks_json)
        .context("Failed to parse NETWORKS as a JSON array of network configs")?;
    info!("   ✓ {} network(s) configured", networks.len());

    let executor = Arc::new(BundlerExecutor::new(
        networks,
        config.redeemer_address.clone(),
        config.redeemer_private_key.clone(),
        BundlerConfig::default(),
    )?);
    info!("   ✓ Bundler executor initialized for {}", config.redeemer_address);

    let alerter: Arc<dyn OperatorAlerter> = match &config.alert_webhook_url {
        Some(url) => {
            info!("   ✓ Operator alerts via webhook");
            Arc::new(WebhookAlerter::new(
                url.clone(),
                "delegation-billing-engine".to_string(),
            )?)
        }
        None => {
            warn!("   ○ No ALERT_WEBHOOK_URL set; system alerts go to the log only");
            Arc::new(LogAlerter)
        }
    };

    let ingestors: Vec<Arc<dyn WebhookIngestor>> = match &config.ingestors {
        Some(value) => HttpWebhookIngestor::from_env_value(value)?
            .into_iter()
            .map(|ingestor| Arc::new(ingestor) as Arc<dyn WebhookIngestor>)
            .collect(),
        None => Vec::new(),
    };
    if ingestors.is_empty() {
        info!("   ○ No webhook ingestors configured; dead-letter reprocessing is ledger-only");
    } else {
        info!("   ✓ {} webhook ingestor(s) configured", ingestors.len());
    }

    let app_state = Arc::new(AppState::with_configs(
        ledger,
        executor,
        alerter,
        ingestors,
        config.processor_config.clone(),
        DeadLetterConfig::default(),
        RecoveryConfig::default(),
    ));

    // Start background billing worker if enabled
    let worker_shutdown_tx = if config.enable_background_worker {
        let worker_config = WorkerConfig {
            poll_interval: std::time::Duration::from_secs(config.worker_poll_interval_secs),
        };
        let (_worker_handle, shutdown_tx) =
            spawn_billing_worker(Arc::clone(&app_state.processor), worker_config);
        info!(
            "   ✓ Billing worker started (poll: {}s)",
            config.worker_poll_interval_secs
        );
        Some(shutdown_tx)
    } else {
        info!("   ○ Billing worker disabled");
        None
    };

    // Start stale-lock crank (reclaims subscriptions abandoned mid-processing)
    let crank_shutdown_tx = if config.enable_stale_crank && config.enable_background_worker {
        let crank_config = CrankConfig {
            poll_interval: std::time::Duration::from_secs(config.crank_poll_interval_secs),
        };
        let (_crank_handle, shutdown_tx) =
            spawn_reclaim_crank(Arc::clone(&app_state.processor), crank_config);
        info!(
            "   ✓ Stale-lock crank started (poll: {}s)",
            config.crank_poll_interval_secs
        );
        Some(shutdown_tx)
    } else {
        info!("   ○ Stale-lock crank disabled");
        None
    };

    let router = create_router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("🚀 Server starting on http://{}", addr);
    info!("📖 Swagger UI available at http://{}/swagger-ui", addr);
    info!("📄 OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Signal worker and crank to shutdown
    if let Some(tx) = worker_shutdown_tx {
        let _ = tx.send(true);
    }
    if let Some(tx) = crank_shutdown_tx {
        let _ = tx.send(true);
    }

    info!("Server shutdown complete");
    Ok(())
}
