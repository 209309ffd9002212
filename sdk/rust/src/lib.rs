//! Client SDK for the rxcheckout server.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rxcheckout_sdk::{CheckoutClient, IntentSync, MemoryStorage};
//!
//! # async fn run() -> rxcheckout_sdk::Result<()> {
//! let client = Arc::new(CheckoutClient::new(
//!     "https://checkout.example.com",
//!     Arc::new(MemoryStorage::new()),
//! ));
//! let prefill = client.fetch_prefill("token-from-url").await?;
//! let sync = IntentSync::new(client.clone());
//! let order = rxcheckout_sdk::Order {
//!     medication: "semaglutide".into(),
//!     plan: "monthly".into(),
//!     ..Default::default()
//! };
//! let intent = sync.update(&prefill.to_details(order)).await?;
//! # let _ = intent;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod storage;
mod sync;
mod types;

pub use client::*;
pub use error::*;
pub use storage::*;
pub use sync::*;
pub use types::*;
