pub mod checkout;
pub mod intake;
pub mod payment;
pub mod public;
pub mod webhooks;
