//! In-process request/response correlation.
//!
//! The wire carries no request ids, so every tracked request gets a local id
//! and is paired with the reply kind it expects. A reply resolves the oldest
//! pending request of its kind; a reply nobody waits for resolves nothing and
//! is ignored by its consumers. Entries lapse once their reply deadline
//! passes, so an unanswered request never absorbs a later error.

use std::{collections::VecDeque, fmt};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::protocol::{ClientRequest, MessageKind};

/// Locally generated id for one tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A tracked request waiting for its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: RequestId,
    pub request_kind: &'static str,
    pub reply: MessageKind,
    /// Peer or product the request targeted, when relevant.
    pub target: Option<String>,
    pub sent_at_ms: u64,
    /// Replies arriving at or after this instant are no longer paired.
    pub expires_at_ms: u64,
}

impl PendingRequest {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Ordered ledger of requests awaiting replies.
#[derive(Debug, Clone)]
pub struct CorrelationLedger {
    pending: VecDeque<PendingRequest>,
    reply_timeout_ms: u64,
}

impl CorrelationLedger {
    pub fn new(reply_timeout_ms: u64) -> Self {
        Self {
            pending: VecDeque::new(),
            reply_timeout_ms,
        }
    }

    /// Track `request` if it expects a reply.
    pub fn register(&mut self, request: &ClientRequest, now_ms: u64) -> Option<RequestId> {
        self.prune(now_ms);
        let reply = request.expected_reply()?;
        let id = RequestId::new();
        trace!(%id, request = request.kind(), ?reply, "tracking request");
        self.pending.push_back(PendingRequest {
            id,
            request_kind: request.kind(),
            reply,
            target: request.target(),
            sent_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(self.reply_timeout_ms),
        });
        Some(id)
    }

    /// Pop the oldest request waiting for `reply`.
    pub fn resolve(&mut self, reply: MessageKind, now_ms: u64) -> Option<PendingRequest> {
        self.prune(now_ms);
        let index = self.pending.iter().position(|entry| entry.reply == reply)?;
        self.pending.remove(index)
    }

    /// Attribute a bare `error` message to a pending request.
    ///
    /// Checkout-family requests win (the user is blocked on them and the
    /// legacy fallback depends on seeing the failure); otherwise the oldest
    /// pending request is chosen. Expired entries are never blamed.
    pub fn attribute_error(&mut self, now_ms: u64) -> Option<PendingRequest> {
        self.prune(now_ms);
        let index = self
            .pending
            .iter()
            .position(|entry| {
                matches!(
                    entry.reply,
                    MessageKind::OrderResponse | MessageKind::CheckoutResponse
                )
            })
            .or_else(|| (!self.pending.is_empty()).then_some(0))?;
        let entry = self.pending.remove(index)?;
        debug!(id = %entry.id, request = entry.request_kind, "attributed error to pending request");
        Some(entry)
    }

    /// Forget a request whose reply will no longer be honored.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|entry| entry.id != id);
        before != self.pending.len()
    }

    /// Drop every entry whose reply deadline has passed.
    pub fn prune(&mut self, now_ms: u64) {
        let before = self.pending.len();
        self.pending.retain(|entry| !entry.is_expired(now_ms));
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!(dropped, "expired unanswered requests");
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_waiting_for(&self, reply: MessageKind) -> bool {
        self.pending.iter().any(|entry| entry.reply == reply)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT_MS: u64 = 3_500;

    fn chat_delete(peer: &str) -> ClientRequest {
        ClientRequest::ChatDelete {
            username: None,
            peer: peer.into(),
        }
    }

    #[test]
    fn untracked_requests_are_not_registered() {
        let mut ledger = CorrelationLedger::new(TIMEOUT_MS);
        assert_eq!(ledger.register(&ClientRequest::GetCart, 0), None);
        assert!(ledger.is_empty());
    }

    #[test]
    fn resolves_oldest_request_of_matching_kind() {
        let mut ledger = CorrelationLedger::new(TIMEOUT_MS);
        let first = ledger.register(&chat_delete("bob"), 0).expect("tracked");
        ledger.register(&ClientRequest::ClearCart { username: None }, 1);
        let second = ledger.register(&chat_delete("carol"), 2).expect("tracked");

        let resolved = ledger
            .resolve(MessageKind::ChatDeleteResponse, 10)
            .expect("pending");
        assert_eq!(resolved.id, first);
        assert_eq!(resolved.target.as_deref(), Some("bob"));

        let resolved = ledger
            .resolve(MessageKind::ChatDeleteResponse, 10)
            .expect("pending");
        assert_eq!(resolved.id, second);
        assert_eq!(ledger.resolve(MessageKind::ChatDeleteResponse, 10), None);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn unexpected_reply_resolves_nothing() {
        let mut ledger = CorrelationLedger::new(TIMEOUT_MS);
        assert_eq!(ledger.resolve(MessageKind::OrderResponse, 0), None);
    }

    #[test]
    fn errors_prefer_checkout_then_oldest() {
        let mut ledger = CorrelationLedger::new(TIMEOUT_MS);
        ledger.register(&ClientRequest::ClearCart { username: None }, 0);
        let order = ledger
            .register(
                &ClientRequest::CreateOrder {
                    items: Vec::new(),
                    username: None,
                },
                1,
            )
            .expect("tracked");

        assert_eq!(ledger.attribute_error(10).map(|entry| entry.id), Some(order));
        assert_eq!(
            ledger.attribute_error(10).map(|entry| entry.reply),
            Some(MessageKind::ClearCartResponse)
        );
        assert_eq!(ledger.attribute_error(10), None);
    }

    #[test]
    fn cancelled_requests_stop_matching() {
        let mut ledger = CorrelationLedger::new(TIMEOUT_MS);
        let id = ledger
            .register(&ClientRequest::Checkout { username: None }, 0)
            .expect("tracked");
        assert!(ledger.is_waiting_for(MessageKind::CheckoutResponse));
        assert!(ledger.cancel(id));
        assert!(!ledger.cancel(id));
        assert_eq!(ledger.resolve(MessageKind::CheckoutResponse, 10), None);
    }

    #[test]
    fn expired_entries_are_not_blamed_for_errors() {
        let mut ledger = CorrelationLedger::new(TIMEOUT_MS);
        for product_id in 0..1_000 {
            ledger.register(
                &ClientRequest::AddToCart {
                    product_id,
                    quantity: 1,
                },
                0,
            );
        }
        assert_eq!(ledger.len(), 1_000);

        assert_eq!(ledger.attribute_error(3_600_000), None);
        assert!(ledger.is_empty());
    }

    #[test]
    fn replies_after_the_deadline_resolve_nothing() {
        let mut ledger = CorrelationLedger::new(TIMEOUT_MS);
        ledger.register(&ClientRequest::ClearCart { username: None }, 100);
        let fresh = ledger
            .register(&ClientRequest::ClearCart { username: None }, 3_000)
            .expect("tracked");

        // The first entry lapses at 3_600; the second one is still live.
        let resolved = ledger
            .resolve(MessageKind::ClearCartResponse, 3_600)
            .expect("live entry");
        assert_eq!(resolved.id, fresh);
        assert_eq!(resolved.expires_at_ms, 6_500);
        assert!(ledger.is_empty());
    }

    #[test]
    fn registering_prunes_lapsed_entries() {
        let mut ledger = CorrelationLedger::new(TIMEOUT_MS);
        ledger.register(&chat_delete("bob"), 0);
        ledger.register(&chat_delete("carol"), 10_000);
        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger
                .attribute_error(10_100)
                .and_then(|entry| entry.target),
            Some("carol".to_owned())
        );
    }
}
