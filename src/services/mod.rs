pub mod booking_ledger;
pub mod card_wallet;
pub mod mpesa_service;
pub mod notifier;
pub mod reconciler;
