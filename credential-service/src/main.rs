use credential_service::{
    build_router,
    config::CredentialConfig,
    db,
    services::{
        metrics::init_metrics, spawn_expiry_sweeper, CredentialService, CredentialStores,
        Database, EventNotifier, HttpUserDirectory, RedisEventPublisher, TokenCodec, TokenPolicy,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = CredentialConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting credential service"
    );

    let pool = db::connect(&config.database).await?;
    let stores = CredentialStores::from_backend(Arc::new(Database::new(pool)));

    let publisher = RedisEventPublisher::new(&config.redis).await?;
    let notifier = EventNotifier::new(Arc::new(publisher));

    let directory = HttpUserDirectory::new(&config.user_directory)?;
    let codec = TokenCodec::new(&config.jwt)?;

    let credentials = CredentialService::new(
        stores,
        codec,
        Arc::new(directory),
        notifier,
        TokenPolicy::from_config(&config.token_policy),
    );

    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let password_reset_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.password_reset_attempts,
        config.rate_limit.password_reset_window_seconds,
    );

    let sweeper = spawn_expiry_sweeper(
        credentials.clone(),
        Duration::from_secs(config.sweep_interval_seconds),
    );

    let state = AppState {
        config: config.clone(),
        credentials,
        login_rate_limiter,
        password_reset_rate_limiter,
    };
    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

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
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
