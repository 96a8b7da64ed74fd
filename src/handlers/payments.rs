use axum::{
    extract::{Path, Query, State},
    response::Json,
    Extension,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};
use validator::Validate;

use crate::{
    errors::{is_unique_violation, AppError, Result},
    models::booking::Booking,
    models::payment::{
        InitiateCardRequest, InitiateMpesaRequest, MpesaCallbackPayload, Payment, PaymentMethod,
        PaymentStatus, PaymentStatusResponse,
    },
    models::user::Claims,
    services::{card_wallet, notifier, reconciler},
    state::AppState,
};

/// `AH<timestamp><booking_id>`, unique per second per booking. A rapid
/// duplicate initiation collides on the unique column and surfaces as a
/// conflict instead of a second live payment.
fn generate_transaction_id(prefix: &str, booking_id: i64) -> String {
    format!(
        "{}{}{}",
        prefix,
        Utc::now().format("%Y%m%d%H%M%S"),
        booking_id
    )
}

/// The caller may only pay for their own booking; anything else reads as
/// absent rather than forbidden.
async fn owned_booking(state: &AppState, claims: &Claims, booking_id: i64) -> Result<Booking> {
    sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1 AND student_id = $2")
        .bind(booking_id)
        .bind(claims.sub)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("booking"))
}

/// One payment may be in flight or settled per booking; failed attempts may
/// be retried with a fresh payment row.
/// The initiation acknowledgment only promotes a payment that is still
/// pending. A callback that settled it in the meantime wins.
fn promotes_to_processing(status: PaymentStatus) -> bool {
    status == PaymentStatus::Pending
}

async fn ensure_no_active_payment(state: &AppState, booking_id: i64) -> Result<()> {
    let active: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM payments WHERE booking_id = $1 AND status IN ('processing', 'completed') LIMIT 1",
    )
    .bind(booking_id)
    .fetch_optional(&state.pool)
    .await?;

    if active.is_some() {
        return Err(AppError::conflict(
            "A payment for this booking is already in progress or completed",
        ));
    }
    Ok(())
}

async fn hostel_name(state: &AppState, booking: &Booking) -> Result<String> {
    let (name,): (String,) = sqlx::query_as("SELECT name FROM hostels WHERE id = $1")
        .bind(booking.hostel_id)
        .fetch_one(&state.pool)
        .await?;
    Ok(name)
}

async fn mark_payment_failed(state: &AppState, payment_id: i64, reason: &str) -> Result<()> {
    sqlx::query(
        "UPDATE payments SET status = 'failed', failure_reason = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(payment_id)
    .bind(reason)
    .execute(&state.pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn list_payments(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Payment>>> {
    let payments = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(claims.sub)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(payments))
}

pub async fn initiate_mpesa_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<InitiateMpesaRequest>,
) -> Result<Json<serde_json::Value>> {
    payload.validate()?;
    if payload.amount <= Decimal::ZERO {
        return Err(AppError::validation("amount must be greater than 0"));
    }

    let mpesa = state
        .mpesa_service
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable("M-Pesa service is not available".to_string()))?
        .clone();

    let booking = owned_booking(&state, &claims, payload.booking_id).await?;
    ensure_no_active_payment(&state, booking.id).await?;
    let hostel = hostel_name(&state, &booking).await?;

    let transaction_id = generate_transaction_id("AH", booking.id);
    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (booking_id, user_id, amount, method, transaction_id, phone_number)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(booking.id)
    .bind(claims.sub)
    .bind(payload.amount)
    .bind(PaymentMethod::Mpesa.as_str())
    .bind(&transaction_id)
    .bind(&payload.phone_number)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::conflict("Duplicate payment attempt, try again shortly")
        } else {
            e.into()
        }
    })?;

    let transaction_desc = format!("Payment for {}", hostel);

    match mpesa
        .initiate_stk_push(
            &payload.phone_number,
            &payload.amount,
            &transaction_id,
            &transaction_desc,
        )
        .await
    {
        Ok(resp) if resp.response_code == "0" => {
            let mut tx = state.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO mpesa_transactions
                    (payment_id, merchant_request_id, checkout_request_id, phone_number,
                     amount, account_reference, transaction_desc)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(payment.id)
            .bind(&resp.merchant_request_id)
            .bind(&resp.checkout_request_id)
            .bind(&payload.phone_number)
            .bind(payload.amount)
            .bind(&transaction_id)
            .bind(&transaction_desc)
            .execute(&mut *tx)
            .await?;

            let (current_status,): (String,) =
                sqlx::query_as("SELECT status FROM payments WHERE id = $1 FOR UPDATE")
                    .bind(payment.id)
                    .fetch_one(&mut *tx)
                    .await?;

            let current = PaymentStatus::parse(&current_status).ok_or_else(|| {
                AppError::validation(format!("Unknown payment status '{}'", current_status))
            })?;

            if promotes_to_processing(current) {
                sqlx::query(
                    "UPDATE payments SET status = 'processing', updated_at = NOW() WHERE id = $1",
                )
                .bind(payment.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        AppError::conflict("Another payment for this booking is already active")
                    } else {
                        e.into()
                    }
                })?;
            } else {
                warn!(
                    "Payment {} is already {}, leaving its status untouched",
                    payment.id, current_status
                );
            }

            tx.commit().await?;

            Ok(Json(json!({
                "message": "STK push sent successfully",
                "transaction_id": transaction_id,
                "checkout_request_id": resp.checkout_request_id,
            })))
        }
        Ok(resp) => {
            // Provider answered but did not accept the request.
            mark_payment_failed(&state, payment.id, &resp.response_description).await?;
            Err(AppError::ProviderRejected(resp.response_description))
        }
        Err(AppError::ProviderRejected(message)) => {
            mark_payment_failed(&state, payment.id, &message).await?;
            Err(AppError::ProviderRejected(message))
        }
        Err(e) => {
            // Transient token/network failure: the payment stays pending and
            // the caller may retry the initiation.
            error!("STK push not submitted for payment {}: {}", payment.id, e);
            Err(e)
        }
    }
}

pub async fn initiate_card_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<InitiateCardRequest>,
) -> Result<Json<serde_json::Value>> {
    if payload.amount <= Decimal::ZERO {
        return Err(AppError::validation("amount must be greater than 0"));
    }

    let booking = owned_booking(&state, &claims, payload.booking_id).await?;
    ensure_no_active_payment(&state, booking.id).await?;
    let hostel = hostel_name(&state, &booking).await?;

    let transaction_id = generate_transaction_id("CW", booking.id);
    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (booking_id, user_id, amount, method, status, transaction_id)
        VALUES ($1, $2, $3, $4, 'processing', $5)
        RETURNING *
        "#,
    )
    .bind(booking.id)
    .bind(claims.sub)
    .bind(payload.amount)
    .bind(PaymentMethod::Card.as_str())
    .bind(&transaction_id)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::conflict("Duplicate payment attempt, try again shortly")
        } else {
            e.into()
        }
    })?;

    let external_transaction_id = card_wallet::settle(&state.pool, payment.id).await?;

    notifier::payment_succeeded(&state.pool, claims.sub, &hostel).await;

    Ok(Json(json!({
        "message": "Card payment processed successfully",
        "transaction_id": transaction_id,
        "external_transaction_id": external_transaction_id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CallbackAuth {
    pub token: Option<String>,
}

/// Provider webhook. Authenticated with a shared secret in the query string;
/// the provider expects a success acknowledgment even when the payload does
/// not match anything on our side, otherwise it keeps retrying.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Query(auth): Query<CallbackAuth>,
    Json(payload): Json<MpesaCallbackPayload>,
) -> Result<Json<serde_json::Value>> {
    let mpesa = state
        .mpesa_service
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable("M-Pesa service is not available".to_string()))?;

    if auth.token.as_deref() != Some(mpesa.callback_secret()) {
        warn!("M-Pesa callback with bad or missing secret rejected");
        return Err(AppError::PermissionDenied);
    }

    let callback = &payload.body.stk_callback;
    let ack = json!({ "ResultCode": 0, "ResultDesc": "Success" });

    match reconciler::process_callback(&state.pool, callback).await {
        Ok(report) => {
            match &report.outcome {
                reconciler::ReconcileOutcome::Completed { .. } => {
                    notifier::payment_succeeded(&state.pool, report.user_id, &report.hostel_name)
                        .await;
                }
                reconciler::ReconcileOutcome::Failed { .. } => {
                    notifier::payment_failed(&state.pool, report.user_id, &report.hostel_name)
                        .await;
                }
                reconciler::ReconcileOutcome::AlreadyApplied => {
                    warn!(
                        "Callback redelivery for booking {} ignored",
                        report.booking_id
                    );
                }
            }
            Ok(Json(ack))
        }
        Err(AppError::NotFound(_)) => {
            warn!(
                "Callback for unknown checkout_request_id {}",
                callback.checkout_request_id
            );
            Ok(Json(ack))
        }
        // A ledger failure aborts the whole unit; the provider will retry
        // and the retry is idempotent.
        Err(e) => Err(e),
    }
}

pub async fn payment_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(transaction_id): Path<String>,
) -> Result<Json<PaymentStatusResponse>> {
    let payment = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE transaction_id = $1 AND user_id = $2",
    )
    .bind(&transaction_id)
    .bind(claims.sub)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound("payment"))?;

    Ok(Json(PaymentStatusResponse {
        status: payment.status,
        transaction_id: payment.transaction_id,
        external_transaction_id: payment.external_transaction_id,
        amount: payment.amount,
        created_at: payment.created_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiation_ack_never_demotes_a_settled_payment() {
        assert!(promotes_to_processing(PaymentStatus::Pending));
        for status in [
            PaymentStatus::Processing,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
        ] {
            assert!(!promotes_to_processing(status));
        }
    }

    #[test]
    fn transaction_id_carries_prefix_and_booking_id() {
        let id = generate_transaction_id("AH", 42);
        assert!(id.starts_with("AH"));
        assert!(id.ends_with("42"));
        // AH + YYYYmmddHHMMSS + booking id
        assert_eq!(id.len(), 2 + 14 + 2);
    }

    #[test]
    fn transaction_id_timestamp_is_numeric() {
        let id = generate_transaction_id("CW", 7);
        let timestamp = &id[2..16];
        assert!(timestamp.chars().all(|c| c.is_ascii_digit()));
    }
}
