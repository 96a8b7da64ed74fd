//! Best-effort user notifications. A failed insert is logged and swallowed;
//! payment and booking state never roll back because a notification could
//! not be written.

use sqlx::PgPool;

use crate::models::notification::{Notification, NotificationKind};

pub async fn notify(
    pool: &PgPool,
    user_id: i64,
    title: &str,
    message: &str,
    kind: NotificationKind,
) {
    let result = sqlx::query_as::<_, Notification>(
        r#"
        INSERT INTO notifications (user_id, title, message, kind)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(title)
    .bind(message)
    .bind(kind.as_str())
    .fetch_one(pool)
    .await;

    match result {
        Ok(n) => tracing::debug!("Notification {} for user {}: {}", n.id, user_id, title),
        Err(e) => tracing::error!("Failed to notify user {}: {}", user_id, e),
    }
}

pub async fn payment_succeeded(pool: &PgPool, user_id: i64, hostel_name: &str) {
    notify(
        pool,
        user_id,
        "Payment Successful",
        &format!("Your payment for {} has been confirmed.", hostel_name),
        NotificationKind::Success,
    )
    .await;
}

pub async fn payment_failed(pool: &PgPool, user_id: i64, hostel_name: &str) {
    notify(
        pool,
        user_id,
        "Payment Failed",
        &format!("Your payment for {} failed. Please try again.", hostel_name),
        NotificationKind::Error,
    )
    .await;
}
