use axum::{
    extract::{rejection::{JsonRejection, PathRejection}, Path, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use skybook_core::CreateBookingRequest;
use skybook_saga::{BookingCreated, BookingDetails};
use skybook_shared::pii::Masked;
use tracing::info;
use uuid::Uuid;
use crate::error::AppError;
use crate::state::AppState;

pub const USER_EMAIL_HEADER: &str = "x-user-email";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", get(list_bookings).post(create_booking))
        .route("/v1/bookings/{booking_id}", get(get_booking))
}

/// POST /v1/bookings
/// Reserve seats and open the payment window
async fn create_booking(
    State(state): State<AppState>,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BookingCreated>), AppError> {
    let Json(req) = payload?;
    info!(flight_id = %req.flight_id, seats = req.num_seats, "Creating booking");

    let created = state.saga.create_booking(req).await?;
    info!(booking_id = %created.booking_id, "Booking created");

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /v1/bookings
/// The caller's bookings, newest first
async fn list_bookings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<BookingDetails>>, AppError> {
    let user_email = headers
        .get(USER_EMAIL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("missing {} header", USER_EMAIL_HEADER)))?;

    info!(payer = %Masked(user_email), "Fetching bookings");
    let bookings = state.saga.list_bookings(user_email).await?;

    Ok(Json(bookings))
}

/// GET /v1/bookings/{booking_id}
async fn get_booking(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<BookingDetails>, AppError> {
    let Path(booking_id) = path?;
    let booking = state.saga.get_booking(booking_id).await?;
    info!(%booking_id, status = %booking.status, "Retrieved booking status");

    Ok(Json(booking))
}
