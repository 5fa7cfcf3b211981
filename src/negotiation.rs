//! Rendezvous between the retry loop and whoever answers the user's
//! prompts.
//!
//! At most one negotiation is outstanding per broker. A caller arriving
//! while another request is pending is answered immediately with
//! [`FallbackIntent::Stop`] or [`ValidationIntent::Cancel`] so the user never
//! sees two competing prompts.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

use crate::error::ValidationRequiredError;
use crate::fallback::{FallbackHandler, FallbackIntent, FallbackRequest};
use crate::lock_unpoisoned;
use crate::retry::{ValidationIntent, ValidationNegotiator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRequest {
    pub message: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub learn_more_url: Option<String>,
}

impl From<&ValidationRequiredError> for ValidationRequest {
    fn from(error: &ValidationRequiredError) -> Self {
        Self {
            message: error.message.clone(),
            link: error.validation_link.clone(),
            description: error.validation_description.clone(),
            learn_more_url: error.learn_more_url.clone(),
        }
    }
}

/// The question currently waiting for an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingNegotiation {
    Fallback(FallbackRequest),
    Validation(ValidationRequest),
}

enum Responder {
    Fallback(oneshot::Sender<FallbackIntent>),
    Validation(oneshot::Sender<ValidationIntent>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Fallback,
    Validation,
}

impl Responder {
    fn kind(&self) -> Kind {
        match self {
            Self::Fallback(_) => Kind::Fallback,
            Self::Validation(_) => Kind::Validation,
        }
    }
}

struct PendingSlot {
    id: u64,
    responder: Responder,
}

#[derive(Default)]
struct BrokerState {
    pending: Option<PendingSlot>,
    next_id: u64,
}

pub struct NegotiationBroker {
    state: Mutex<BrokerState>,
    updates: watch::Sender<Option<PendingNegotiation>>,
}

impl Default for NegotiationBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl NegotiationBroker {
    #[must_use]
    pub fn new() -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            state: Mutex::new(BrokerState::default()),
            updates,
        }
    }

    /// Observes the pending request. `None` means nothing is waiting.
    pub fn subscribe(&self) -> watch::Receiver<Option<PendingNegotiation>> {
        self.updates.subscribe()
    }

    pub fn pending(&self) -> Option<PendingNegotiation> {
        self.updates.borrow().clone()
    }

    /// Answers a pending fallback request. Returns false when none is waiting.
    pub fn resolve_fallback(&self, intent: FallbackIntent) -> bool {
        match self.take_pending(Kind::Fallback) {
            Some(Responder::Fallback(sender)) => sender.send(intent).is_ok(),
            _ => false,
        }
    }

    /// Answers a pending validation request. Returns false when none is
    /// waiting.
    pub fn resolve_validation(&self, intent: ValidationIntent) -> bool {
        match self.take_pending(Kind::Validation) {
            Some(Responder::Validation(sender)) => sender.send(intent).is_ok(),
            _ => false,
        }
    }

    pub async fn request_fallback(&self, request: FallbackRequest) -> FallbackIntent {
        let (sender, receiver) = oneshot::channel();
        let Some(id) = self.occupy(
            Responder::Fallback(sender),
            PendingNegotiation::Fallback(request),
        ) else {
            info!("negotiation already pending, stopping concurrent fallback");
            return FallbackIntent::Stop;
        };

        let _release = SlotRelease { broker: self, id };
        receiver.await.unwrap_or(FallbackIntent::Stop)
    }

    pub async fn request_validation(&self, request: ValidationRequest) -> ValidationIntent {
        let (sender, receiver) = oneshot::channel();
        let Some(id) = self.occupy(
            Responder::Validation(sender),
            PendingNegotiation::Validation(request),
        ) else {
            info!("negotiation already pending, cancelling concurrent validation");
            return ValidationIntent::Cancel;
        };

        let _release = SlotRelease { broker: self, id };
        receiver.await.unwrap_or(ValidationIntent::Cancel)
    }

    fn occupy(&self, responder: Responder, request: PendingNegotiation) -> Option<u64> {
        let mut state = lock_unpoisoned(&self.state);
        if state.pending.is_some() {
            return None;
        }

        state.next_id += 1;
        let id = state.next_id;
        state.pending = Some(PendingSlot { id, responder });
        self.updates.send_replace(Some(request));
        debug!(id, "negotiation pending");
        Some(id)
    }

    fn take_pending(&self, kind: Kind) -> Option<Responder> {
        let mut state = lock_unpoisoned(&self.state);
        if !state
            .pending
            .as_ref()
            .is_some_and(|slot| slot.responder.kind() == kind)
        {
            return None;
        }

        let slot = state.pending.take()?;
        self.updates.send_replace(None);
        Some(slot.responder)
    }

    fn release(&self, id: u64) {
        let mut state = lock_unpoisoned(&self.state);
        if state.pending.as_ref().is_some_and(|slot| slot.id == id) {
            state.pending = None;
            self.updates.send_replace(None);
            debug!(id, "abandoned negotiation released");
        }
    }
}

/// Frees the slot when the waiting caller goes away unanswered.
struct SlotRelease<'a> {
    broker: &'a NegotiationBroker,
    id: u64,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        self.broker.release(self.id);
    }
}

#[async_trait]
impl FallbackHandler for NegotiationBroker {
    async fn handle_fallback(&self, request: FallbackRequest) -> FallbackIntent {
        self.request_fallback(request).await
    }
}

#[async_trait]
impl ValidationNegotiator for NegotiationBroker {
    async fn on_validation_required(&self, error: &ValidationRequiredError) -> ValidationIntent {
        self.request_validation(ValidationRequest::from(error)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn request() -> FallbackRequest {
        FallbackRequest {
            failed_model: "gemini-2.5-pro".to_string(),
            fallback_model: "gemini-2.5-flash".to_string(),
            message: "quota".to_string(),
            terminal: true,
        }
    }

    #[tokio::test]
    async fn pending_request_is_published_and_resolved() {
        let broker = Arc::new(NegotiationBroker::new());
        let mut updates = broker.subscribe();

        let waiter = tokio::spawn({
            let broker = Arc::clone(&broker);
            async move { broker.request_fallback(request()).await }
        });

        updates
            .wait_for(Option::is_some)
            .await
            .expect("broker should stay alive");
        assert_eq!(broker.pending(), Some(PendingNegotiation::Fallback(request())));

        assert!(broker.resolve_fallback(FallbackIntent::RetryAlways));
        assert_eq!(
            waiter.await.expect("waiter should not panic"),
            FallbackIntent::RetryAlways
        );
        assert_eq!(broker.pending(), None);
    }

    #[tokio::test]
    async fn resolving_wrong_kind_is_rejected() {
        let broker = NegotiationBroker::new();
        assert!(!broker.resolve_fallback(FallbackIntent::Stop));
        assert!(!broker.resolve_validation(ValidationIntent::Verify));
    }

    #[tokio::test]
    async fn abandoned_request_frees_the_slot() {
        let broker = NegotiationBroker::new();
        {
            let pending = broker.request_fallback(request());
            tokio::pin!(pending);
            assert!(futures_util::poll!(pending.as_mut()).is_pending());
            assert!(broker.pending().is_some());
        }

        assert_eq!(broker.pending(), None);
        assert!(!broker.resolve_fallback(FallbackIntent::Stop));
    }
}
