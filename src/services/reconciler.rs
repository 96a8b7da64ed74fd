//! Matches an asynchronous provider notification back to the locally
//! initiated payment and applies the resulting state transition exactly once.
//!
//! The payment row is the serialization point: it is locked with
//! `SELECT ... FOR UPDATE`, so of two concurrent deliveries for the same
//! checkout id one applies the transition and the other finds a terminal
//! status and exits as a no-op.

use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::errors::{AppError, Result};
use crate::models::booking::BookingStatus;
use crate::models::payment::{MpesaTransaction, Payment, PaymentStatus, StkCallback};
use crate::services::booking_ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    ApplySuccess,
    ApplyFailure,
    /// The payment already reached a terminal status; a duplicate or late
    /// delivery changes nothing and emits nothing.
    Skip,
}

/// Pure transition decision, one per inbound callback.
pub fn decide(current: PaymentStatus, result_code: i64) -> ReconcileAction {
    if current.is_terminal() {
        return ReconcileAction::Skip;
    }
    if result_code == 0 {
        ReconcileAction::ApplySuccess
    } else {
        ReconcileAction::ApplyFailure
    }
}

#[derive(Debug)]
pub enum ReconcileOutcome {
    Completed { receipt: String },
    Failed { reason: String },
    AlreadyApplied,
}

#[derive(Debug)]
pub struct ReconcileReport {
    pub outcome: ReconcileOutcome,
    pub user_id: i64,
    pub booking_id: i64,
    pub hostel_name: String,
}

/// Apply one provider callback. Everything (provider-transaction update,
/// payment update, booking transition) commits or rolls back as a unit;
/// notifications are emitted by the caller after the commit.
pub async fn process_callback(pool: &PgPool, callback: &StkCallback) -> Result<ReconcileReport> {
    let mut tx = pool.begin().await?;

    let session = sqlx::query_as::<_, MpesaTransaction>(
        "SELECT * FROM mpesa_transactions WHERE checkout_request_id = $1",
    )
    .bind(&callback.checkout_request_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("transaction"))?;

    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
        .bind(session.payment_id)
        .fetch_one(&mut *tx)
        .await?;

    let (hostel_name,): (String,) = sqlx::query_as(
        r#"
        SELECT h.name FROM bookings b
        JOIN hostels h ON h.id = b.hostel_id
        WHERE b.id = $1
        "#,
    )
    .bind(payment.booking_id)
    .fetch_one(&mut *tx)
    .await?;

    let current = PaymentStatus::parse(&payment.status)
        .ok_or_else(|| AppError::validation(format!("Unknown payment status '{}'", payment.status)))?;

    let outcome = match decide(current, callback.result_code) {
        ReconcileAction::Skip => {
            warn!(
                "Duplicate callback for payment {} (status {}), ignoring",
                payment.id, payment.status
            );
            ReconcileOutcome::AlreadyApplied
        }
        ReconcileAction::ApplySuccess => {
            let receipt = callback.receipt_number().unwrap_or_default();

            sqlx::query(
                r#"
                UPDATE mpesa_transactions
                SET result_code = $2, result_desc = $3, mpesa_receipt_number = $4
                WHERE payment_id = $1
                "#,
            )
            .bind(payment.id)
            .bind(callback.result_code.to_string())
            .bind(&callback.result_desc)
            .bind(&receipt)
            .execute(&mut *tx)
            .await?;

            apply_success(&mut tx, &payment, &receipt).await?;

            info!(
                "Payment {} completed, booking {} confirmed (receipt {})",
                payment.id, payment.booking_id, receipt
            );
            ReconcileOutcome::Completed { receipt }
        }
        ReconcileAction::ApplyFailure => {
            sqlx::query(
                r#"
                UPDATE mpesa_transactions
                SET result_code = $2, result_desc = $3
                WHERE payment_id = $1
                "#,
            )
            .bind(payment.id)
            .bind(callback.result_code.to_string())
            .bind(&callback.result_desc)
            .execute(&mut *tx)
            .await?;

            apply_failure(&mut tx, &payment, &callback.result_desc).await?;

            info!(
                "Payment {} failed: {} (booking {} stays pending)",
                payment.id, callback.result_desc, payment.booking_id
            );
            ReconcileOutcome::Failed {
                reason: callback.result_desc.clone(),
            }
        }
    };

    tx.commit().await?;

    Ok(ReconcileReport {
        outcome,
        user_id: payment.user_id,
        booking_id: payment.booking_id,
        hostel_name,
    })
}

/// Completion primitive shared by the callback path and the synchronous
/// card/wallet path: payment to `completed`, booking to `confirmed` with the
/// external reference stored on both, all within the caller's transaction.
pub(crate) async fn apply_success(
    tx: &mut Transaction<'_, Postgres>,
    payment: &Payment,
    external_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE payments
        SET status = 'completed', external_transaction_id = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(payment.id)
    .bind(external_id)
    .execute(&mut **tx)
    .await?;

    let (booking_status,): (String,) =
        sqlx::query_as("SELECT status FROM bookings WHERE id = $1 FOR UPDATE")
            .bind(payment.booking_id)
            .fetch_one(&mut **tx)
            .await?;

    // A booking confirmed by an earlier payment keeps a single history entry.
    if booking_status != BookingStatus::Confirmed.as_str() {
        booking_ledger::apply_transition(
            tx,
            payment.booking_id,
            BookingStatus::Confirmed,
            payment.user_id,
            "Payment received",
        )
        .await?;
    }

    sqlx::query("UPDATE bookings SET payment_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(payment.booking_id)
        .bind(external_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

pub(crate) async fn apply_failure(
    tx: &mut Transaction<'_, Postgres>,
    payment: &Payment,
    reason: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE payments
        SET status = 'failed', failure_reason = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(payment.id)
    .bind(reason)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_code_on_live_payment_applies_success() {
        assert_eq!(decide(PaymentStatus::Processing, 0), ReconcileAction::ApplySuccess);
        // A callback can outrun the initiation response's status write.
        assert_eq!(decide(PaymentStatus::Pending, 0), ReconcileAction::ApplySuccess);
    }

    #[test]
    fn failure_code_on_live_payment_applies_failure() {
        assert_eq!(decide(PaymentStatus::Processing, 1032), ReconcileAction::ApplyFailure);
        assert_eq!(decide(PaymentStatus::Pending, 1), ReconcileAction::ApplyFailure);
    }

    #[test]
    fn terminal_payment_skips_redelivery() {
        assert_eq!(decide(PaymentStatus::Completed, 0), ReconcileAction::Skip);
        assert_eq!(decide(PaymentStatus::Completed, 1032), ReconcileAction::Skip);
        assert_eq!(decide(PaymentStatus::Failed, 0), ReconcileAction::Skip);
        assert_eq!(decide(PaymentStatus::Refunded, 0), ReconcileAction::Skip);
    }
}
