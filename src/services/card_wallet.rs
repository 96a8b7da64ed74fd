//! Simulated card/wallet provider. There is no real integration behind this
//! path; it settles immediately through the same completion primitive the
//! M-Pesa callback uses, so a real provider can replace it later without
//! touching the reconciliation logic.

use sqlx::PgPool;

use crate::errors::Result;
use crate::models::payment::Payment;
use crate::services::reconciler;

/// Settle a freshly created card/wallet payment. Returns the simulated
/// external transaction id.
pub async fn settle(pool: &PgPool, payment_id: i64) -> Result<String> {
    let mut tx = pool.begin().await?;

    let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
        .bind(payment_id)
        .fetch_one(&mut *tx)
        .await?;

    let external_id = format!("CW_{}", payment.transaction_id);
    reconciler::apply_success(&mut tx, &payment, &external_id).await?;

    tx.commit().await?;

    tracing::info!(
        "Card/wallet payment {} settled as {}",
        payment.id,
        external_id
    );
    Ok(external_id)
}
