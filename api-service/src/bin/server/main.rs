use std::net::SocketAddr;
use std::sync::Arc;

use api_service::bootstrap::build_app_state;
use api_service::bootstrap::identity_verifiers;
use api_service::config::Config;
use api_service::config::RuntimeEnvironment;
use api_service::inbound::http::router::create_router;
use api_service::inbound::http::router::AppState;
use api_service::outbound::repositories::InMemoryRefreshTokenRepository;
use api_service::outbound::repositories::InMemoryUserRepository;
use api_service::outbound::repositories::PostgresRefreshTokenRepository;
use api_service::outbound::repositories::PostgresUserRepository;
use auth::Clock;
use auth::SystemClock;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::load()?;
    init_tracing(config.environment);

    tracing::info!(
        service = "api-service",
        version = env!("CARGO_PKG_VERSION"),
        "Service starting"
    );

    config.validate()?;

    tracing::info!(
        environment = %config.environment,
        http_port = config.server.http_port,
        persistent_storage = config.database.url.is_some(),
        apple_enabled = config.oauth.apple_client_id.is_some(),
        mock_tokens = config.oauth.allow_mock_tokens,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let verifiers = identity_verifiers(&config.oauth)?;

    let state = match &config.database.url {
        Some(url) => {
            let pg_pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(url)
                .await?;
            tracing::info!(
                max_connections = config.database.max_connections,
                database = "postgresql",
                "Database connection pool created"
            );

            sqlx::migrate!("./migrations").run(&pg_pool).await?;
            tracing::info!(database = "postgresql", "Database migrations completed");

            let query_timeout = config.database.query_timeout();
            build_app_state(
                &config,
                Arc::new(PostgresUserRepository::new(pg_pool.clone(), query_timeout)),
                Arc::new(PostgresRefreshTokenRepository::new(pg_pool, query_timeout)),
                verifiers,
                clock,
            )?
        }
        None => {
            tracing::warn!("No database configured; using in-memory storage");
            build_app_state(
                &config,
                Arc::new(InMemoryUserRepository::new()),
                Arc::new(InMemoryRefreshTokenRepository::new()),
                verifiers,
                clock,
            )?
        }
    };

    spawn_maintenance(&state, config.sessions.sweep_interval());

    let http_address = format!("{}:{}", config.server.host, config.server.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_address).await?;
    tracing::info!(
        address = %http_address,
        port = config.server.http_port,
        protocol = "http",
        "Http server listening"
    );

    let http_application = create_router(state, &config.cors.allowed_origins);
    axum::serve(
        http_listener,
        http_application.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server exited successfully");
    Ok(())
}

fn init_tracing(environment: RuntimeEnvironment) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "api_service=debug,auth=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if environment == RuntimeEnvironment::Production {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Periodically delete expired refresh tokens and forget idle rate-limit
/// clients.
fn spawn_maintenance(state: &AppState, every: std::time::Duration) {
    let auth_service = Arc::clone(&state.auth_service);
    let rate_limiter = state.rate_limiter.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;

            if let Err(e) = auth_service.sweep_expired_sessions().await {
                tracing::error!(error = %e, "Refresh token sweep failed");
            }

            rate_limiter.retain_recent();
            tracing::debug!(
                tracked_clients = rate_limiter.tracked_clients(),
                "Rate limiter state pruned"
            );
        }
    });
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
