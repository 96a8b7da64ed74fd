//! Booking creation, role-scoped reads, and the status-transition operation.
//!
//! A transition is two writes, a history append and the status update, done
//! inside one transaction so the audit log always mirrors the statuses the
//! booking has actually assumed.

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::errors::{AppError, Result};
use crate::models::booking::{
    compute_fees, Booking, BookingStatus, BookingStatusHistory, CreateBookingRequest,
};
use crate::models::user::{Claims, Role};

#[derive(Debug, sqlx::FromRow)]
struct BookingAccess {
    id: i64,
    student_id: i64,
    landlord_id: i64,
}

pub async fn create_booking(
    pool: &PgPool,
    claims: &Claims,
    req: &CreateBookingRequest,
) -> Result<Booking> {
    if req.check_out <= req.check_in {
        return Err(AppError::validation("check_out must be after check_in"));
    }
    if req.amount <= Decimal::ZERO {
        return Err(AppError::validation("amount must be greater than 0"));
    }

    let hostel: Option<(i64,)> = sqlx::query_as("SELECT id FROM hostels WHERE id = $1")
        .bind(req.hostel_id)
        .fetch_optional(pool)
        .await?;
    if hostel.is_none() {
        return Err(AppError::NotFound("hostel"));
    }

    let room_type: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM room_types WHERE id = $1 AND hostel_id = $2")
            .bind(req.room_type_id)
            .bind(req.hostel_id)
            .fetch_optional(pool)
            .await?;
    if room_type.is_none() {
        return Err(AppError::NotFound("room type"));
    }

    let (service_fee, total_amount) = compute_fees(req.amount);

    let booking = sqlx::query_as::<_, Booking>(
        r#"
        INSERT INTO bookings
            (student_id, hostel_id, room_type_id, check_in, check_out, guests,
             amount, service_fee, total_amount, special_requests)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(claims.sub)
    .bind(req.hostel_id)
    .bind(req.room_type_id)
    .bind(req.check_in)
    .bind(req.check_out)
    .bind(req.guests)
    .bind(req.amount)
    .bind(service_fee)
    .bind(total_amount)
    .bind(req.special_requests.as_deref().unwrap_or(""))
    .fetch_one(pool)
    .await?;

    tracing::info!("Booking {} created by user {}", booking.id, claims.sub);
    Ok(booking)
}

/// Bookings the caller may see: students their own, landlords those of their
/// hostels, agents and admins everything.
pub async fn list_bookings(
    pool: &PgPool,
    claims: &Claims,
    status: Option<&str>,
    hostel: Option<i64>,
) -> Result<Vec<Booking>> {
    let bookings = match claims.role {
        Role::Student => {
            sqlx::query_as::<_, Booking>(
                r#"
                SELECT b.* FROM bookings b
                WHERE b.student_id = $1
                  AND ($2::varchar IS NULL OR b.status = $2)
                  AND ($3::bigint IS NULL OR b.hostel_id = $3)
                ORDER BY b.created_at DESC
                "#,
            )
            .bind(claims.sub)
            .bind(status)
            .bind(hostel)
            .fetch_all(pool)
            .await?
        }
        Role::Landlord => {
            sqlx::query_as::<_, Booking>(
                r#"
                SELECT b.* FROM bookings b
                JOIN hostels h ON h.id = b.hostel_id
                WHERE h.landlord_id = $1
                  AND ($2::varchar IS NULL OR b.status = $2)
                  AND ($3::bigint IS NULL OR b.hostel_id = $3)
                ORDER BY b.created_at DESC
                "#,
            )
            .bind(claims.sub)
            .bind(status)
            .bind(hostel)
            .fetch_all(pool)
            .await?
        }
        Role::Agent | Role::Admin => {
            sqlx::query_as::<_, Booking>(
                r#"
                SELECT b.* FROM bookings b
                WHERE ($1::varchar IS NULL OR b.status = $1)
                  AND ($2::bigint IS NULL OR b.hostel_id = $2)
                ORDER BY b.created_at DESC
                "#,
            )
            .bind(status)
            .bind(hostel)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(bookings)
}

pub async fn get_booking(pool: &PgPool, claims: &Claims, booking_id: i64) -> Result<Booking> {
    let booking = match claims.role {
        Role::Student => {
            sqlx::query_as::<_, Booking>(
                "SELECT * FROM bookings WHERE id = $1 AND student_id = $2",
            )
            .bind(booking_id)
            .bind(claims.sub)
            .fetch_optional(pool)
            .await?
        }
        Role::Landlord => {
            sqlx::query_as::<_, Booking>(
                r#"
                SELECT b.* FROM bookings b
                JOIN hostels h ON h.id = b.hostel_id
                WHERE b.id = $1 AND h.landlord_id = $2
                "#,
            )
            .bind(booking_id)
            .bind(claims.sub)
            .fetch_optional(pool)
            .await?
        }
        Role::Agent | Role::Admin => {
            sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
                .bind(booking_id)
                .fetch_optional(pool)
                .await?
        }
    };

    booking.ok_or(AppError::NotFound("booking"))
}

pub async fn booking_history(
    pool: &PgPool,
    claims: &Claims,
    booking_id: i64,
) -> Result<Vec<BookingStatusHistory>> {
    // Visibility follows the booking itself.
    get_booking(pool, claims, booking_id).await?;

    let history = sqlx::query_as::<_, BookingStatusHistory>(
        r#"
        SELECT * FROM booking_status_history
        WHERE booking_id = $1
        ORDER BY created_at, id
        "#,
    )
    .bind(booking_id)
    .fetch_all(pool)
    .await?;

    Ok(history)
}

pub async fn transition(
    pool: &PgPool,
    claims: &Claims,
    booking_id: i64,
    new_status: &str,
    reason: &str,
) -> Result<Booking> {
    let status = BookingStatus::parse(new_status)
        .ok_or_else(|| AppError::validation(format!("Invalid status '{}'", new_status)))?;

    let mut tx = pool.begin().await?;

    // Lock the booking row for the duration of the transition.
    let access = sqlx::query_as::<_, BookingAccess>(
        r#"
        SELECT b.id, b.student_id, h.landlord_id
        FROM bookings b
        JOIN hostels h ON h.id = b.hostel_id
        WHERE b.id = $1
        FOR UPDATE OF b
        "#,
    )
    .bind(booking_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("booking"))?;

    let allowed = match claims.role {
        Role::Student => access.student_id == claims.sub,
        Role::Landlord => access.landlord_id == claims.sub,
        role => role.is_elevated(),
    };
    if !allowed {
        return Err(AppError::PermissionDenied);
    }

    apply_transition(&mut tx, access.id, status, claims.sub, reason).await?;

    let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
        .bind(booking_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        "Booking {} -> {} by user {}",
        booking_id,
        status,
        claims.sub
    );
    Ok(booking)
}

/// History append plus status write against an already-locked booking row.
/// Every status change in the system, user-driven or payment-driven, funnels
/// through here so the log stays complete.
pub(crate) async fn apply_transition(
    tx: &mut Transaction<'_, Postgres>,
    booking_id: i64,
    new_status: BookingStatus,
    changed_by: i64,
    reason: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO booking_status_history (booking_id, status, changed_by, reason)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(booking_id)
    .bind(new_status.as_str())
    .bind(changed_by)
    .bind(reason)
    .execute(&mut **tx)
    .await?;

    sqlx::query("UPDATE bookings SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(booking_id)
        .bind(new_status.as_str())
        .execute(&mut **tx)
        .await?;

    Ok(())
}
