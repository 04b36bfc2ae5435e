//! Profile service HTTP server and replication reconciler.

use dentalbook_auth::RemoteTokenValidator;
use dentalbook_core::environment::SystemClock;
use dentalbook_core::event_bus::EventBus;
use dentalbook_redpanda::RedpandaEventBus;
use dentalbook_runtime::consumer::EventConsumer;
use dentalbook_runtime::{metrics::MetricsExporter, shutdown};
use dentalbook_web::AuthState;
use profile_service::aggregates::ProfileEnvironment;
use profile_service::config::Config;
use profile_service::identity::HttpAccountSource;
use profile_service::reconciler::Reconciler;
use profile_service::repository::PostgresProfileRepository;
use profile_service::server::{AppState, build_router};
use profile_service::Profiles;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "profile_service=info,dentalbook=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting profile service");

    let config = Config::from_env();
    info!(
        redpanda_brokers = %config.redpanda.brokers,
        identity_url = %config.auth.identity_url,
        topics = ?config.replication.topics,
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
    let repository = PostgresProfileRepository::new(pool);
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

    let accounts = HttpAccountSource::new(
        &config.auth.identity_url,
        config.auth.internal_service_key.clone(),
        config.auth.request_timeout,
    )?;
    let validator = RemoteTokenValidator::from_config(&config.auth)?;

    let env = ProfileEnvironment::new(Arc::new(SystemClock), Arc::clone(&event_bus));
    let profiles = Profiles::new(Arc::new(repository), Arc::new(accounts), env);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let handles = vec![
        EventConsumer::new(
            "profile-reconciler",
            config.replication.topics.clone(),
            Arc::clone(&event_bus),
            Arc::new(Reconciler::new(profiles.clone())),
            shutdown_tx.subscribe(),
        )
        .with_retry_delay(config.replication.retry_delay)
        .spawn(),
    ];
    info!("Replication reconciler started");

    let state = AppState::new(
        profiles,
        AuthState::new(Arc::new(validator), config.auth.internal_service_key.clone()),
        metrics,
    );
    let app = build_router(state);

    let addr = config.server.address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await?;

    let _ = shutdown_tx.send(());
    shutdown::drain(handles, config.server.shutdown_timeout).await;

    info!("Server stopped");
    Ok(())
}
