//! Debounced, fingerprint-keyed PaymentIntent reconciliation.
//!
//! Every edit in the checkout form calls [`IntentSync::update`]. A request
//! is issued only after the details have stayed the same for the debounce
//! window, and only when the fingerprint differs from the last request.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::{CheckoutError, Result};
use crate::types::{CheckoutDetails, PaymentIntent};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(350);

/// Whatever actually creates the intent (normally [`crate::CheckoutClient`]).
#[async_trait]
pub trait IntentRequester: Send + Sync {
    async fn request_intent(&self, details: &CheckoutDetails) -> Result<PaymentIntent>;
}

/// Result slot of an issued request; `None` while it is in flight.
type Outcome = Option<Result<PaymentIntent>>;

#[derive(Default)]
struct SyncState {
    /// Bumped on every update; a waiting update that sees a newer value has
    /// been superseded.
    generation: u64,
    /// Fingerprint of the last request issued, with its outcome channel.
    /// Cleared when that request fails so the next update retries.
    issued: Option<(String, watch::Receiver<Outcome>)>,
    current: Option<PaymentIntent>,
}

pub struct IntentSync<R> {
    requester: Arc<R>,
    debounce: Duration,
    state: Mutex<SyncState>,
}

impl<R: IntentRequester> IntentSync<R> {
    pub fn new(requester: Arc<R>) -> Self {
        Self::with_debounce(requester, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(requester: Arc<R>, debounce: Duration) -> Self {
        Self {
            requester,
            debounce,
            state: Mutex::new(SyncState::default()),
        }
    }

    /// The most recent intent, if one has been created.
    pub fn current(&self) -> Option<PaymentIntent> {
        self.state.lock().ok().and_then(|s| s.current.clone())
    }

    /// Submit the latest checkout details.
    ///
    /// Returns the intent for these details, or `None` when a later update
    /// superseded this one during the debounce window. Details matching the
    /// last issued request share its result, waiting for it if needed.
    pub async fn update(&self, details: &CheckoutDetails) -> Result<Option<PaymentIntent>> {
        let key = details.fingerprint();

        let (generation, joined) = {
            let mut state = self.lock();
            state.generation += 1;
            let joined = state
                .issued
                .as_ref()
                .filter(|(issued, _)| *issued == key)
                .map(|(_, rx)| rx.clone());
            (state.generation, joined)
        };
        if let Some(rx) = joined {
            return Self::outcome(rx).await.map(Some);
        }

        tokio::time::sleep(self.debounce).await;

        let tx = {
            let mut state = self.lock();
            if state.generation != generation {
                return Ok(None);
            }
            let (tx, rx) = watch::channel(None);
            state.issued = Some((key.clone(), rx));
            tx
        };

        let result = self.requester.request_intent(details).await;
        {
            let mut state = self.lock();
            if state.issued.as_ref().is_some_and(|(issued, _)| *issued == key) {
                match &result {
                    Ok(intent) => state.current = Some(intent.clone()),
                    Err(_) => state.issued = None,
                }
            }
        }
        tx.send_replace(Some(result.clone()));
        result.map(Some)
    }

    async fn outcome(mut rx: watch::Receiver<Outcome>) -> Result<PaymentIntent> {
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| Err(CheckoutError::network("intent request abandoned"))),
            Err(_) => Err(CheckoutError::network("intent request abandoned")),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SyncState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
