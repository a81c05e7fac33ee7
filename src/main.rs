use airtime_gateway::airtime::aggregator::AggregatorClient;
use airtime_gateway::airtime::dealer::DealerDirect;
use airtime_gateway::airtime::provider::AirtimeProvider;
use airtime_gateway::api::{self, ApiState};
use airtime_gateway::config::AppConfig;
use airtime_gateway::database;
use airtime_gateway::database::store::{GatewayStore, PgStore};
use airtime_gateway::health::{HealthChecker, HealthState};
use airtime_gateway::logging::init_tracing;
use airtime_gateway::payments::daraja::{DarajaClient, PaymentRail};
use airtime_gateway::payments::security::SecurityCredential;
use airtime_gateway::payments::utils::UpstreamClient;
use airtime_gateway::services::bonus::BonusEngine;
use airtime_gateway::services::dispatch::AirtimeDispatcher;
use airtime_gateway::services::lifecycle::LifecycleEngine;
use airtime_gateway::services::notify::Notifier;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

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

async fn health(State(checker): State<HealthChecker>) -> impl IntoResponse {
    let status = checker.check().await;
    let code = if status.status == HealthState::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().map_err(|e| anyhow::anyhow!("configuration: {e}"))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("configuration: {e}"))?;

    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting airtime gateway"
    );

    // Database
    let pool = database::connect(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        anyhow::anyhow!("database: {e}")
    })?;
    sqlx::migrate!()
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("migrations: {e}"))?;
    let store: Arc<dyn GatewayStore> = Arc::new(PgStore::new(pool.clone()));
    info!("Database pool initialized");

    // Payment rail client; the certificate loads once here and the raw
    // initiator password stays inside the client.
    let credential = SecurityCredential::from_certificate_file(&config.daraja.cert_path)
        .map_err(|e| anyhow::anyhow!("certificate: {e}"))?;
    let rail: Arc<dyn PaymentRail> = Arc::new(DarajaClient::new(
        config.daraja.clone(),
        credential,
        Duration::from_secs(config.http.timeout_secs),
        config.http.max_retries,
    )?);
    info!("Payment rail client initialized");

    // Airtime providers behind the common dispatch interface
    let provider_http = UpstreamClient::new(
        Duration::from_secs(config.http.timeout_secs),
        config.http.max_retries,
    )?;
    let dealer: Arc<dyn AirtimeProvider> = Arc::new(DealerDirect::new(
        config.dealer.clone(),
        provider_http.clone(),
        store.clone(),
    ));
    let aggregator: Arc<dyn AirtimeProvider> = Arc::new(AggregatorClient::new(
        config.aggregator.clone(),
        provider_http,
    ));

    let dispatcher = AirtimeDispatcher::new(dealer, aggregator, store.clone());
    let bonus = BonusEngine::new(store.clone());
    let notifier = Arc::new(Notifier::new(config.notify.clone(), store.clone()));
    let engine = Arc::new(LifecycleEngine::new(
        store.clone(),
        rail,
        dispatcher,
        bonus,
        Some(notifier),
    ));
    info!("Lifecycle engine initialized");

    let api_state = ApiState {
        engine,
        store: store.clone(),
    };
    let health_checker = HealthChecker::new(pool);

    let health_routes = Router::new()
        .route("/health", get(health))
        .with_state(health_checker);

    let app = Router::new()
        .route("/", get(api::topup::root))
        .route("/ping", get(api::topup::ping))
        .route("/stk-push", post(api::topup::initiate))
        .route("/stk-callback", post(api::callbacks::stk_callback))
        .route(
            "/daraja-reversal-result",
            post(api::callbacks::reversal_result),
        )
        .route(
            "/daraja-reversal-timeout",
            post(api::callbacks::reversal_timeout),
        )
        .route(
            "/transaction-status/{id}",
            get(api::topup::transaction_status),
        )
        .route("/api/airtime-bonuses/current", get(api::bonuses::current))
        .route("/api/airtime-bonuses/update", post(api::bonuses::update))
        .with_state(api_state)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {}: {}", addr, e);
        e
    })?;
    info!(address = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}
