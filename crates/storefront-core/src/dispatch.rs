use std::collections::HashMap;

use crate::protocol::MessageKind;

/// Logical consumer of decoded server messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consumer {
    Cart,
    Checkout,
    Chat,
    Catalog,
    /// Generic `error` relay; attributes the error and raises alerts.
    Alerts,
}

/// Routing table from message kind to the consumers that receive it.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    routes: HashMap<MessageKind, Vec<Consumer>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routing used by the storefront engine.
    pub fn standard() -> Self {
        let mut dispatcher = Self::new();
        dispatcher
            .register(MessageKind::CartSnapshot, Consumer::Cart)
            .register(MessageKind::ClearCartResponse, Consumer::Cart)
            .register(MessageKind::AddToCartResponse, Consumer::Cart)
            .register(MessageKind::OrderResponse, Consumer::Checkout)
            .register(MessageKind::OrderResponse, Consumer::Catalog)
            .register(MessageKind::CheckoutResponse, Consumer::Checkout)
            .register(MessageKind::CheckoutResponse, Consumer::Catalog)
            .register(MessageKind::ChatInitResponse, Consumer::Chat)
            .register(MessageKind::ChatMessage, Consumer::Chat)
            .register(MessageKind::ChatDeleteResponse, Consumer::Chat)
            .register(MessageKind::Presence, Consumer::Chat)
            .register(MessageKind::ProductsResponse, Consumer::Catalog)
            .register(MessageKind::SearchResults, Consumer::Catalog)
            .register(MessageKind::ProductDetail, Consumer::Catalog)
            .register(MessageKind::Error, Consumer::Alerts);
        dispatcher
    }

    /// Add `consumer` for `kind`. Registering the same pair twice is a no-op.
    pub fn register(&mut self, kind: MessageKind, consumer: Consumer) -> &mut Self {
        let consumers = self.routes.entry(kind).or_default();
        if !consumers.contains(&consumer) {
            consumers.push(consumer);
        }
        self
    }

    /// Consumers for `kind`, in registration order. Unrouted kinds get none.
    pub fn route(&self, kind: MessageKind) -> &[Consumer] {
        self.routes.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }
}
