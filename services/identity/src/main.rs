//! Identity service HTTP server.

use dentalbook_auth::{JwtService, PasswordHasher};
use dentalbook_core::environment::SystemClock;
use dentalbook_core::event_bus::EventBus;
use dentalbook_redpanda::RedpandaEventBus;
use dentalbook_runtime::{metrics::MetricsExporter, shutdown};
use dentalbook_web::AuthState;
use identity_service::Accounts;
use identity_service::aggregates::AccountEnvironment;
use identity_service::config::Config;
use identity_service::repository::PostgresAccountRepository;
use identity_service::server::{AppState, build_router};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "identity_service=info,dentalbook=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting identity service");

    let config = Config::from_env();
    info!(
        redpanda_brokers = %config.redpanda.brokers,
        issuer = %config.auth.issuer,
        token_ttl = ?config.auth.token_ttl,
        "Configuration loaded"
    );

    let metrics = match MetricsExporter::install() {
        Ok(exporter) => Some(exporter),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        },
    };

    info!("Connecting to database...");
    let pool = dentalbook_postgres::connect(&config.database).await?;
    let repository = PostgresAccountRepository::new(pool);
    repository.migrate().await?;
    info!("Database ready");

    info!("Connecting to Redpanda event bus...");
    let event_bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(&config.redpanda.consumer_group)
            .build()?,
    );
    info!("Event bus connected");

    let env = AccountEnvironment::new(Arc::new(SystemClock), event_bus);
    let accounts = Accounts::new(
        Arc::new(repository),
        PasswordHasher::new(config.auth.bcrypt_cost),
        JwtService::new(&config.auth),
        env,
    );

    let state = AppState::new(
        accounts.clone(),
        AuthState::new(Arc::new(accounts), config.auth.internal_service_key.clone()),
        metrics,
    );
    let app = build_router(state);

    let addr = config.server.address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown::signal())
    .await?;

    info!("Server stopped");
    Ok(())
}
