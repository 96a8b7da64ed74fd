use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Flat percentage applied on top of the booking amount.
pub const SERVICE_FEE_RATE: Decimal = dec!(0.025);

/// Money columns are NUMERIC(10,2).
pub const MONEY_PRECISION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Booking {
    pub id: i64,
    pub student_id: i64,
    pub hostel_id: i64,
    pub room_type_id: i64,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: i32,
    pub amount: Decimal,
    pub service_fee: Decimal,
    pub total_amount: Decimal,
    pub status: String,
    /// External payment reference, filled once a payment settles.
    pub payment_id: String,
    pub special_requests: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BookingStatusHistory {
    pub id: i64,
    pub booking_id: i64,
    pub status: String,
    pub changed_by: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    pub hostel_id: i64,
    pub room_type_id: i64,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    #[validate(range(min = 1, max = 10))]
    pub guests: i32,
    pub amount: Decimal,
    pub special_requests: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BookingQuery {
    pub status: Option<String>,
    pub hostel: Option<i64>,
}

/// Fee and total derived from the base amount, computed once at creation and
/// never recomputed afterwards.
pub fn compute_fees(amount: Decimal) -> (Decimal, Decimal) {
    let service_fee = (amount * SERVICE_FEE_RATE).round_dp(MONEY_PRECISION);
    let total = amount + service_fee;
    (service_fee, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_is_two_and_a_half_percent() {
        let (fee, total) = compute_fees(dec!(10000.00));
        assert_eq!(fee, dec!(250.00));
        assert_eq!(total, dec!(10250.00));
    }

    #[test]
    fn fee_rounds_to_money_precision() {
        let (fee, total) = compute_fees(dec!(333.33));
        // 333.33 * 0.025 = 8.33325
        assert_eq!(fee, dec!(8.33));
        assert_eq!(total, dec!(341.66));
    }

    #[test]
    fn fee_on_zero_amount_is_zero() {
        let (fee, total) = compute_fees(Decimal::ZERO);
        assert_eq!(fee, Decimal::ZERO);
        assert_eq!(total, Decimal::ZERO);
    }

    #[test]
    fn recognizes_the_five_statuses() {
        for value in ["pending", "confirmed", "rejected", "cancelled", "completed"] {
            let status = BookingStatus::parse(value).unwrap();
            assert_eq!(status.as_str(), value);
        }
    }

    #[test]
    fn rejects_unknown_status_strings() {
        assert!(BookingStatus::parse("archived").is_none());
        assert!(BookingStatus::parse("Confirmed").is_none());
        assert!(BookingStatus::parse("").is_none());
    }
}
