use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use skybook_core::bus::{topics, EventBus, MessageHandler};
use skybook_core::repository::BookingRepository;
use skybook_saga::{BookingSaga, ExpiryHandler, OverdueReconciler, PaymentOutcomeHandler};
use skybook_store::app_config::Config;
use skybook_store::{DelayQueue, DelaySweeper, EventConsumer, EventProducer};

/// Start every background task. Each one stops when `shutdown` flips to true.
pub fn spawn_workers(
    config: &Config,
    saga: Arc<BookingSaga>,
    bookings: Arc<dyn BookingRepository>,
    producer: EventProducer,
    delays: DelayQueue,
    bus: Arc<dyn EventBus>,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>, rdkafka::error::KafkaError> {
    let handlers: [(&str, Arc<dyn MessageHandler>); 2] = [
        (topics::PAYMENT_STATUS, Arc::new(PaymentOutcomeHandler::new(saga.clone())) as Arc<dyn MessageHandler>),
        (topics::BOOKING_EXPIRED, Arc::new(ExpiryHandler::new(saga.clone())) as Arc<dyn MessageHandler>),
    ];

    let mut tasks = Vec::new();
    for (topic, handler) in handlers {
        let consumer = EventConsumer::new(&config.kafka, &config.delivery, topic, handler, bus.clone())?;
        tasks.push(tokio::spawn(consumer.run(shutdown.clone())));
    }

    let sweeper = DelaySweeper::new(delays, producer, &config.delivery);
    tasks.push(tokio::spawn(sweeper.run(shutdown.clone())));

    let rules = &config.business_rules;
    let reconciler = OverdueReconciler::new(
        saga,
        bookings,
        chrono::Duration::seconds(rules.expiry_grace_seconds as i64),
        Duration::from_secs(rules.reconcile_interval_seconds),
    );
    tasks.push(tokio::spawn(reconciler.run(shutdown)));

    info!(count = tasks.len(), "Background workers started");
    Ok(tasks)
}
