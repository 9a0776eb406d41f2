use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};
use skybook_core::search::{FlightPage, FlightSearchRequest};
use tracing::info;
use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/flights", get(search_flights))
}

/// GET /v1/flights?origin=&destination=&date=&limit=&page=
async fn search_flights(
    State(state): State<AppState>,
    query: Result<Query<FlightSearchRequest>, QueryRejection>,
) -> Result<Json<FlightPage>, AppError> {
    let Query(req) = query?;
    info!(origin = ?req.origin, destination = ?req.destination, date = ?req.date, "Searching flights");

    let page = state.saga.search_flights(req).await?;
    info!(found = page.flights.len(), total = page.total, "Flight search complete");

    Ok(Json(page))
}
