use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};
use skybook_core::repository::{BookingRepository, OverdueCursor};
use skybook_core::CoreResult;
use crate::orchestrator::{BookingSaga, SagaOutcome};

const BATCH_SIZE: u32 = 100;

/// Expires pending bookings whose scheduled expiry never arrived.
///
/// Runs the same transition as the delayed `booking.expired` message, so
/// racing it is harmless: whichever lands second is discarded.
pub struct OverdueReconciler {
    saga: Arc<BookingSaga>,
    bookings: Arc<dyn BookingRepository>,
    grace: chrono::Duration,
    interval: Duration,
    batch_size: u32,
}

impl OverdueReconciler {
    pub fn new(
        saga: Arc<BookingSaga>,
        bookings: Arc<dyn BookingRepository>,
        grace: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            saga,
            bookings,
            grace,
            interval,
            batch_size: BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Overdue reconciler started");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        warn!(error = %e, "Overdue reconciliation failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Overdue reconciler stopped");
    }

    /// Walks every overdue booking once, page by page. Returns how many this
    /// pass expired.
    pub async fn reconcile_once(&self) -> CoreResult<usize> {
        let cutoff = Utc::now() - self.grace;
        let mut after: Option<OverdueCursor> = None;
        let mut expired = 0;

        loop {
            let page = self.bookings.list_overdue(cutoff, after, self.batch_size).await?;
            let Some(last) = page.last().copied() else {
                break;
            };

            for cursor in &page {
                let booking_id = cursor.booking_id;
                match self.saga.handle_expiry(booking_id).await {
                    Ok(SagaOutcome::Applied(_)) => expired += 1,
                    Ok(SagaOutcome::Discarded(_)) => {}
                    Err(e) if e.is_retryable() => return Err(e),
                    // The cursor moves past it, so it cannot starve later bookings.
                    Err(e) => warn!(%booking_id, error = %e, "Could not expire overdue booking"),
                }
            }

            if page.len() < self.batch_size as usize {
                break;
            }
            after = Some(last);
        }

        if expired > 0 {
            info!(expired, "Expired overdue bookings");
        }
        Ok(expired)
    }
}
