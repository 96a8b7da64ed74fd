use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::handlers::payments;
use crate::middleware::auth::auth_middleware;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let authed = Router::new()
        .route("/", get(payments::list_payments))
        .route("/mpesa/initiate", post(payments::initiate_mpesa_payment))
        .route("/card/initiate", post(payments::initiate_card_payment))
        .route("/status/:transaction_id", get(payments::payment_status))
        .layer(from_fn_with_state(state, auth_middleware));

    // The provider cannot send a bearer token; the callback authenticates
    // with a shared secret instead.
    let webhook = Router::new().route("/mpesa/callback", post(payments::mpesa_callback));

    authed.merge(webhook)
}
