//! Best-effort delivery of a paid order to downstream systems.
//!
//! Sinks are called one after another. A failing sink is logged and recorded
//! in the report; it never stops the remaining sinks from running.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::PaidOrder;
use crate::util::redact_email;

#[async_trait]
pub trait FulfillmentSink: Send + Sync {
    /// Short name used in logs and the webhook response
    fn name(&self) -> &'static str;

    async fn deliver(&self, order: &PaidOrder) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkOutcome {
    pub sink: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    pub outcomes: Vec<SinkOutcome>,
}

impl FanoutReport {
    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.ok)
    }

    pub fn failed(&self) -> impl Iterator<Item = &SinkOutcome> {
        self.outcomes.iter().filter(|o| !o.ok)
    }
}

pub async fn fan_out(sinks: &[Arc<dyn FulfillmentSink>], order: &PaidOrder) -> FanoutReport {
    let mut report = FanoutReport::default();

    for sink in sinks {
        let outcome = match sink.deliver(order).await {
            Ok(()) => {
                tracing::info!(
                    sink = sink.name(),
                    payment_intent = %order.payment_intent_id,
                    "Order delivered"
                );
                SinkOutcome {
                    sink: sink.name(),
                    ok: true,
                    error: None,
                }
            }
            Err(e) => {
                // Vendor error bodies may contain PHI; they stay in the logs.
                tracing::error!(
                    sink = sink.name(),
                    payment_intent = %order.payment_intent_id,
                    email = %redact_email(order.email()),
                    "Order delivery failed: {}",
                    e
                );
                SinkOutcome {
                    sink: sink.name(),
                    ok: false,
                    error: Some(format!("{} delivery failed", sink.name())),
                }
            }
        };
        report.outcomes.push(outcome);
    }

    report
}
