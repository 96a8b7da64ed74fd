pub mod booking;
pub mod notification;
pub mod payment;
pub mod user;
