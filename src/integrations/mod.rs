//! Downstream systems notified when a payment succeeds.
//!
//! Each client owns its mapping from a `PaidOrder` to the vendor's schema
//! and retries 429s through the shared `RetryPolicy`.

mod airtable;
mod ghl;
mod intakeq;
mod meta_capi;

pub use airtable::*;
pub use ghl::*;
pub use intakeq::*;
pub use meta_capi::*;

use std::sync::Arc;

use crate::config::Config;
use crate::fanout::FulfillmentSink;

/// Build the sinks enabled by `config`, in delivery order.
pub fn build_sinks(config: &Config) -> Vec<Arc<dyn FulfillmentSink>> {
    let mut sinks: Vec<Arc<dyn FulfillmentSink>> = Vec::new();

    if let Some(intakeq) = &config.intakeq {
        sinks.push(Arc::new(IntakeqClient::new(intakeq.clone())));
    }
    if let Some(airtable) = &config.airtable {
        sinks.push(Arc::new(AirtableClient::new(airtable.clone())));
    }
    if let Some(ghl) = &config.ghl {
        sinks.push(Arc::new(GhlClient::new(ghl.clone())));
    }
    if let Some(meta) = &config.meta {
        sinks.push(Arc::new(MetaCapiClient::new(meta.clone())));
    }

    if sinks.is_empty() {
        tracing::warn!("No downstream integrations configured, paid orders will only be logged");
    } else {
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        tracing::info!("Fulfillment sinks enabled: {}", names.join(", "));
    }

    sinks
}
