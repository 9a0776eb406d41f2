pub mod app_config;
pub mod booking_repo;
pub mod consumer;
pub mod database;
pub mod delay_queue;
pub mod events;
pub mod flight_repo;
pub mod ledger;
pub mod memory;
pub mod redis_repo;

pub use booking_repo::PgBookingRepository;
pub use consumer::{EventConsumer, MessageProcessor, RetryPolicy};
pub use database::DbClient;
pub use delay_queue::{DelayQueue, DelaySweeper};
pub use events::{EventProducer, KafkaEventBus};
pub use flight_repo::PgFlightRepository;
pub use memory::{InMemoryBus, InMemoryStore};
pub use redis_repo::RedisClient;
