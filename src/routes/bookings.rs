use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::handlers::bookings;
use crate::middleware::auth::auth_middleware;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(bookings::list_bookings).post(bookings::create_booking))
        .route("/:id", get(bookings::get_booking))
        .route("/:id/status", post(bookings::update_booking_status))
        .route("/:id/history", get(bookings::booking_history))
        .layer(from_fn_with_state(state, auth_middleware))
}
