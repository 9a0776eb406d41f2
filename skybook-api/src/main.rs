use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use skybook_api::{app, worker, AppState};
use skybook_core::bus::EventBus;
use skybook_core::repository::BookingRepository;
use skybook_saga::{BookingSaga, SagaMetrics};
use skybook_store::app_config::Config;
use skybook_store::{
    DbClient, DelayQueue, EventProducer, KafkaEventBus, PgBookingRepository, PgFlightRepository, RedisClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "skybook_api=debug,skybook_saga=debug,skybook_store=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting SkyBook API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let redis = RedisClient::new(&config.redis.url).await.context("Failed to connect to Redis")?;
    let producer = EventProducer::new(&config.kafka).context("Failed to create Kafka producer")?;

    let delays = DelayQueue::new(
        redis,
        config.redis.delay_queue_key.clone(),
        Duration::from_secs(config.delivery.claim_lease_seconds),
    );
    let bus: Arc<dyn EventBus> = Arc::new(KafkaEventBus::new(producer.clone(), delays.clone()));

    let flights = Arc::new(PgFlightRepository::new(db.pool.clone()));
    let bookings: Arc<dyn BookingRepository> = Arc::new(PgBookingRepository::new(db.pool.clone()));
    let metrics = SagaMetrics::new().context("Failed to register metrics")?;

    let saga = Arc::new(BookingSaga::new(
        flights,
        bookings.clone(),
        bus.clone(),
        config.payment_window(),
        metrics,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = worker::spawn_workers(&config, saga.clone(), bookings, producer, delays, bus, shutdown_rx)
        .context("Failed to start Kafka consumers")?;

    let app = app(AppState { saga });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.context("Failed to bind")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // HTTP is drained; now stop the consumers, sweeper and reconciler.
    tracing::info!("Stopping background workers");
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!("Worker ended abnormally: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
