use axum::{
    extract::{Path, Query, State},
    response::Json,
    Extension,
};
use serde_json::json;
use validator::Validate;

use crate::{
    errors::Result,
    models::booking::{
        Booking, BookingQuery, BookingStatusHistory, CreateBookingRequest, UpdateStatusRequest,
    },
    models::user::Claims,
    services::booking_ledger,
    state::AppState,
};

pub async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<Json<Booking>> {
    payload.validate()?;
    let booking = booking_ledger::create_booking(&state.pool, &claims, &payload).await?;
    Ok(Json(booking))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<BookingQuery>,
) -> Result<Json<Vec<Booking>>> {
    let bookings = booking_ledger::list_bookings(
        &state.pool,
        &claims,
        query.status.as_deref(),
        query.hostel,
    )
    .await?;
    Ok(Json(bookings))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<i64>,
) -> Result<Json<Booking>> {
    let booking = booking_ledger::get_booking(&state.pool, &claims, booking_id).await?;
    Ok(Json(booking))
}

pub async fn update_booking_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<i64>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<serde_json::Value>> {
    let booking = booking_ledger::transition(
        &state.pool,
        &claims,
        booking_id,
        &payload.status,
        payload.reason.as_deref().unwrap_or(""),
    )
    .await?;

    Ok(Json(json!({
        "message": "Status updated successfully",
        "booking": booking,
    })))
}

pub async fn booking_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<i64>,
) -> Result<Json<Vec<BookingStatusHistory>>> {
    let history = booking_ledger::booking_history(&state.pool, &claims, booking_id).await?;
    Ok(Json(history))
}
