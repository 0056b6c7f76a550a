//! Client-side protocol reconciliation for the storefront.
//!
//! This crate defines the wire protocol, the newline-delimited JSON framer,
//! and the synchronous, clock-injected state machines that keep the local
//! cart, checkout, chat and catalog views consistent with the server.

/// Optimistic cart edits and snapshot reconciliation.
pub mod cart;
/// Chat scope, filtering and undoable deletion.
pub mod chat;
/// Single-flight checkout with watchdog and legacy fallback.
pub mod checkout;
/// Local request ids paired with expected reply kinds.
pub mod correlation;
/// Message-kind to consumer routing.
pub mod dispatch;
/// Reducer tying every module together.
pub mod engine;
/// Stable engine error types and server code classification.
pub mod error;
/// Newline-delimited JSON framing.
pub mod framer;
/// Alert deduplication.
pub mod notify;
/// Catalog paging, keyword search and product detail.
pub mod pagination;
/// Undoable deferred actions.
pub mod pending;
/// Wire message types.
pub mod protocol;
/// Snapshot signatures and the duplicate-rebuild gate.
pub mod reconcile;
/// One-shot timers driven by the injected clock.
pub mod timer;
/// Intents, alerts, configuration and view snapshots.
pub mod types;

pub use cart::{CartEngine, CartTotals, QuantityEdit};
pub use chat::{ChatScope, ChatTracker};
pub use checkout::{CheckoutAttempt, CheckoutMachine, CheckoutOutcome, CheckoutState};
pub use correlation::{CorrelationLedger, PendingRequest, RequestId};
pub use dispatch::{Consumer, Dispatcher};
pub use engine::StorefrontEngine;
pub use error::{EngineError, ErrorCategory, ProtocolError, classify_server_code, friendly_message};
pub use framer::{LineFramer, decode_line, encode_request};
pub use notify::{NotificationGuard, Suppression};
pub use pagination::{PageController, PageState};
pub use pending::PendingAction;
pub use protocol::{
    Ack, CartLine, CartSnapshot, ChatDeleteResponse, ChatEntry, ChatInitResponse, ClientRequest,
    MessageKind, OrderId, OrderItem, OrderResponse, PresenceUpdate, ProductDetail, ProductSummary,
    ProductsPage, SearchResults, ServerError, ServerMessage, SortMode,
};
pub use reconcile::{Signature, SnapshotGate, SnapshotOutcome};
pub use timer::{CancelableTimer, earliest_deadline};
pub use types::{
    Alert, AlertLevel, CartRowView, CartView, CatalogView, ChatView, CheckoutView,
    ConnectionState, EngineConfig, EngineEvent, EngineOutput, EngineSnapshot, Intent,
};
