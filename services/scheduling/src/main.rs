//! Scheduling service HTTP server.

use dentalbook_auth::RemoteTokenValidator;
use dentalbook_core::environment::SystemClock;
use dentalbook_core::event_bus::EventBus;
use dentalbook_postgres::{Outbox, OutboxRelay};
use dentalbook_redpanda::RedpandaEventBus;
use dentalbook_runtime::{metrics::MetricsExporter, shutdown};
use dentalbook_web::{AuthState, RoomBroadcaster};
use scheduling_service::aggregates::AppointmentEnvironment;
use scheduling_service::config::{Config, DeliveryMode};
use scheduling_service::directory::HttpUserDirectory;
use scheduling_service::repository::PostgresAppointmentRepository;
use scheduling_service::server::{AppState, build_router};
use scheduling_service::{Scheduler, sweeps};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scheduling_service=info,dentalbook=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting scheduling service");

    let config = Config::from_env();
    info!(
        redpanda_brokers = %config.redpanda.brokers,
        profile_url = %config.directory.profile_url,
        delivery = ?config.delivery,
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
    let repository = PostgresAppointmentRepository::new(pool.clone());
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

    let directory = HttpUserDirectory::new(
        &config.directory.profile_url,
        config.auth.internal_service_key.clone(),
        config.directory.timeout,
    )?;
    let validator = RemoteTokenValidator::from_config(&config.auth)?;

    let rooms = RoomBroadcaster::new();
    let env = AppointmentEnvironment::new(
        Arc::new(SystemClock),
        Arc::clone(&event_bus),
        rooms.clone(),
        config.clinic.clone(),
    );
    let scheduler = Scheduler::new(Arc::new(repository), Arc::new(directory), env, config.delivery);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut handles = sweeps::spawn_all(&scheduler, &config.sweeps, &shutdown_tx);
    if config.delivery == DeliveryMode::Outbox {
        handles.push(
            OutboxRelay::new(
                Outbox::new(pool),
                Arc::clone(&event_bus),
                Duration::from_millis(500),
                shutdown_tx.subscribe(),
            )
            .spawn(),
        );
    }
    info!(tasks = handles.len(), "Background tasks started");

    let state = AppState::new(
        scheduler,
        AuthState::new(Arc::new(validator), config.auth.internal_service_key.clone()),
        rooms,
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
