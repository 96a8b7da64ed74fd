pub mod bookings;
pub mod payments;
