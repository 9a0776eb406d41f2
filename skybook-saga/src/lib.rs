pub mod dispatch;
pub mod handlers;
pub mod metrics;
pub mod orchestrator;
pub mod reconciler;

pub use dispatch::Dispatcher;
pub use handlers::{ExpiryHandler, PaymentOutcomeHandler};
pub use metrics::SagaMetrics;
pub use orchestrator::{BookingCreated, BookingDetails, BookingSaga, DiscardReason, SagaOutcome};
pub use reconciler::OverdueReconciler;
