use fundrail_backend::api;
use fundrail_backend::clock::SystemClock;
use fundrail_backend::config::AppConfig;
use fundrail_backend::database::Stores;
use fundrail_backend::logging::init_tracing;
use fundrail_backend::payments::factory::GatewayRegistry;
use fundrail_backend::services::exchange_rate::ExchangeRateService;
use fundrail_backend::services::notification::NotificationService;
use fundrail_backend::services::rate_providers::{FixedRateProvider, HttpRateProvider};
use fundrail_backend::Engine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

const RESUME_POLL_LIMIT: i64 = 1000;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(feature = "database")]
async fn open_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    if config.database.skip_externals {
        warn!("SKIP_EXTERNALS set, running on in-memory stores");
        return Ok(Stores::in_memory());
    }
    let pool = fundrail_backend::database::init_pool_from_config(&config.database).await?;
    fundrail_backend::database::health_check(&pool).await?;
    Ok(Stores::postgres(pool))
}

#[cfg(not(feature = "database"))]
async fn open_stores(_config: &AppConfig) -> anyhow::Result<Stores> {
    warn!("built without the database feature, running on in-memory stores");
    Ok(Stores::in_memory())
}

fn rate_service(config: &AppConfig) -> anyhow::Result<ExchangeRateService> {
    let engine = &config.engine;
    let service = ExchangeRateService::new(engine.rate_service_config());
    if let Some(fixed) = &engine.fixed_rates {
        info!("using fixed exchange rates");
        return Ok(service.add_provider(Arc::new(FixedRateProvider::parse(fixed)?)));
    }
    match &engine.rate_api_url {
        Some(url) => {
            let provider =
                HttpRateProvider::new(url.clone(), Duration::from_secs(engine.gateway_timeout_secs))?;
            Ok(service.add_provider(Arc::new(provider)))
        }
        None => {
            warn!("no RATE_API_URL or FIXED_RATES configured, only USD can be quoted");
            Ok(service)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging)?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        gateways = ?config.gateways.enabled_gateways,
        "starting fundrail backend"
    );

    let stores = open_stores(&config).await?;
    let registry = GatewayRegistry::with_config(&config.gateways)?;
    let rates = Arc::new(rate_service(&config)?);

    let engine = Engine::assemble(
        stores,
        registry,
        rates,
        Arc::new(NotificationService::new()),
        Arc::new(SystemClock),
        &config.engine,
        config.scheduler.clone(),
    );
    if let Err(e) = engine.start(RESUME_POLL_LIMIT).await {
        error!(error = %e, "failed to resume pending poll loops");
    }

    let app = api::router(engine.app_state());
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "failed to bind");
        e
    })?;
    info!(address = %addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    info!("server shutdown complete");
    Ok(())
}
