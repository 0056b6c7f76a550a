//! Storefront reducer: routes decoded server messages and user intents to
//! the reconciliation modules and collects the resulting side effects.

use tracing::{debug, trace, warn};

use crate::{
    cart::CartEngine,
    chat::ChatTracker,
    checkout::{CheckoutMachine, CheckoutOutcome},
    correlation::{CorrelationLedger, PendingRequest, RequestId},
    dispatch::{Consumer, Dispatcher},
    error::EngineError,
    notify::NotificationGuard,
    pagination::PageController,
    protocol::{Ack, CartLine, ClientRequest, MessageKind, ServerMessage},
    timer::earliest_deadline,
    types::{Alert, AlertLevel, EngineConfig, EngineOutput, EngineSnapshot, Intent},
};

const CHECKOUT_NOTICE_WINDOW_MS: u64 = 3_000;
const CHECKOUT_FAILURE_WINDOW_MS: u64 = 5_000;
const CONNECTION_WINDOW_MS: u64 = 5_000;

type Outputs = Vec<EngineOutput>;

/// Per-tag dedup window; `None` uses the guard default.
fn alert_window(tag: &str) -> Option<u64> {
    match tag {
        "empty_cart" | "no_selection" | "partial_selection" | "order_ok" | "clear_fail" => {
            Some(CHECKOUT_NOTICE_WINDOW_MS)
        }
        "checkout_fail" | "checkout_timeout" => Some(CHECKOUT_FAILURE_WINDOW_MS),
        "connection_lost" => Some(CONNECTION_WINDOW_MS),
        _ => None,
    }
}

/// Reply kinds that must match a tracked request before they are honored.
fn is_correlated(kind: MessageKind) -> bool {
    matches!(
        kind,
        MessageKind::ClearCartResponse
            | MessageKind::AddToCartResponse
            | MessageKind::OrderResponse
            | MessageKind::CheckoutResponse
            | MessageKind::ChatDeleteResponse
    )
}

/// Synchronous, clock-injected engine owning every reconciliation module.
#[derive(Debug, Clone)]
pub struct StorefrontEngine {
    config: EngineConfig,
    dispatcher: Dispatcher,
    ledger: CorrelationLedger,
    guard: NotificationGuard,
    cart: CartEngine,
    checkout: CheckoutMachine,
    chat: ChatTracker,
    catalog: PageController,
}

impl StorefrontEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            dispatcher: Dispatcher::standard(),
            ledger: CorrelationLedger::new(
                config.reply_timeout_ms.max(config.checkout_timeout_ms),
            ),
            guard: NotificationGuard::new(
                config.alert_global_cooldown_ms,
                config.alert_default_window_ms,
            ),
            cart: CartEngine::new(config.snapshot_dedup_window_ms, config.clear_resync_delay_ms),
            checkout: CheckoutMachine::new(
                config.checkout_timeout_ms,
                config.checkout_reload_delay_ms,
                config.legacy_checkout,
            ),
            chat: ChatTracker::new(
                config.username.clone(),
                config.chat_history_limit,
                config.chat_max_items,
                config.snapshot_dedup_window_ms,
                config.undo_window_ms,
            ),
            catalog: PageController::new(config.page_size),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cart(&self) -> &CartEngine {
        &self.cart
    }

    pub fn checkout(&self) -> &CheckoutMachine {
        &self.checkout
    }

    pub fn chat(&self) -> &ChatTracker {
        &self.chat
    }

    pub fn catalog(&self) -> &PageController {
        &self.catalog
    }

    /// Initial fetches issued once the connection is up.
    pub fn startup(&mut self, now_ms: u64) -> Outputs {
        let mut out = Vec::new();
        self.send(&mut out, ClientRequest::GetCart, now_ms);
        let products = self.catalog.reload();
        self.send(&mut out, products, now_ms);
        let chat = self.chat.init_request();
        self.send(&mut out, chat, now_ms);
        out
    }

    /// Apply one decoded server message.
    pub fn handle_message(&mut self, message: ServerMessage, now_ms: u64) -> Outputs {
        let mut out = Vec::new();
        let kind = message.kind();
        let consumers = self.dispatcher.route(kind).to_vec();
        if consumers.is_empty() {
            trace!(?kind, "no consumer for server message");
            return out;
        }

        let correlated = match kind {
            MessageKind::Error => self.ledger.attribute_error(now_ms),
            kind if is_correlated(kind) => {
                let resolved = self.ledger.resolve(kind, now_ms);
                if resolved.is_none() {
                    debug!(?kind, "uncorrelated reply ignored");
                }
                resolved
            }
            _ => None,
        };

        for consumer in consumers {
            match consumer {
                Consumer::Cart => self.consume_cart(&message, correlated.as_ref(), &mut out, now_ms),
                Consumer::Checkout => {
                    self.consume_checkout(&message, correlated.as_ref(), &mut out, now_ms)
                }
                Consumer::Chat => self.consume_chat(&message, correlated.as_ref(), &mut out, now_ms),
                Consumer::Catalog => {
                    self.consume_catalog(&message, correlated.as_ref(), &mut out, now_ms)
                }
                Consumer::Alerts => {
                    self.consume_error(&message, correlated.clone(), &mut out, now_ms)
                }
            }
        }
        out
    }

    /// Apply one user intent.
    pub fn handle_intent(&mut self, intent: Intent, now_ms: u64) -> Outputs {
        let mut out = Vec::new();
        trace!(intent = intent.kind(), "handling intent");
        match intent {
            Intent::Refresh => out = self.startup(now_ms),
            Intent::ReloadCart => {
                let request = self.cart.resync_now();
                self.send(&mut out, request, now_ms);
            }
            Intent::SetQuantity {
                product_id,
                quantity,
            } => {
                let stock_limit = self
                    .cart
                    .lines()
                    .iter()
                    .find(|line| line.product_id == product_id)
                    .and_then(CartLine::stock_limit);
                match self.cart.set_quantity(product_id, quantity, now_ms) {
                    Ok(edit) => {
                        if let (Some(_), Some(limit)) = (edit.clamped_from, stock_limit) {
                            let alert = Alert::new(
                                "stock_limit",
                                AlertLevel::Warning,
                                "库存不足",
                                format!("最多可购买 {limit} 件"),
                            );
                            self.raise(&mut out, alert, now_ms);
                        }
                        if let Some(request) = edit.request {
                            self.send(&mut out, request, now_ms);
                        }
                    }
                    Err(error) => self.raise_error(&mut out, &error, now_ms),
                }
            }
            Intent::RemoveLine { product_id } => {
                match self.cart.remove_existing(product_id, now_ms) {
                    Ok(request) => {
                        self.send(&mut out, request, now_ms);
                    }
                    Err(error) => self.raise_error(&mut out, &error, now_ms),
                }
            }
            Intent::ClearCart => {
                let request = self.cart.clear(self.config.username.clone(), now_ms);
                self.send(&mut out, request, now_ms);
            }
            Intent::AddToCart {
                product_id,
                quantity,
            } => {
                if quantity == 0 {
                    let error = EngineError::validation("invalid_quantity", "购买数量无效");
                    self.raise_error(&mut out, &error, now_ms);
                } else {
                    let request = ClientRequest::AddToCart {
                        product_id,
                        quantity,
                    };
                    self.send(&mut out, request, now_ms);
                }
            }
            Intent::ToggleLine { index } => {
                if let Err(error) = self.cart.toggle(index) {
                    self.raise_error(&mut out, &error, now_ms);
                }
            }
            Intent::SelectAll { selected } => self.cart.select_all(selected),
            Intent::Checkout => {
                match self
                    .checkout
                    .begin(&self.cart, self.config.username.clone(), now_ms)
                {
                    Ok(Some(request)) => {
                        let id = self.send(&mut out, request, now_ms);
                        self.checkout.bind_request(id);
                    }
                    Ok(None) => {}
                    Err(error) => self.raise_error(&mut out, &error, now_ms),
                }
            }
            Intent::SelectChatPeer { peer } => {
                let request = self.chat.select(peer);
                self.send(&mut out, request, now_ms);
            }
            Intent::SendChat { content } => {
                if let Some(request) = self.chat.compose(&content) {
                    self.send(&mut out, request, now_ms);
                }
            }
            Intent::DeleteChatHistory { peer } => self.chat.request_delete(peer, now_ms),
            Intent::UndoDelete => {
                self.chat.undo_delete();
            }
            Intent::JumpToPage { page } => {
                let request = self.catalog.jump_to(page);
                self.send(&mut out, request, now_ms);
            }
            Intent::SetSort { sort } => {
                if let Some(request) = self.catalog.set_sort(sort) {
                    self.send(&mut out, request, now_ms);
                }
            }
            Intent::SetPageSize { size } => match self.catalog.set_page_size(size) {
                Ok(Some(request)) => {
                    self.send(&mut out, request, now_ms);
                }
                Ok(None) => {}
                Err(error) => self.raise_error(&mut out, &error, now_ms),
            },
            Intent::Search { keyword } => match self.catalog.search(&keyword) {
                Ok(request) => {
                    self.send(&mut out, request, now_ms);
                }
                Err(error) => self.raise_error(&mut out, &error, now_ms),
            },
            Intent::ClearSearch => {
                if let Some(request) = self.catalog.clear_search() {
                    self.send(&mut out, request, now_ms);
                }
            }
            Intent::ShowProduct { product_id } => {
                let request = self.catalog.request_detail(product_id);
                self.send(&mut out, request, now_ms);
            }
            Intent::CloseProduct => self.catalog.close_detail(),
            Intent::DismissAlert => {
                self.guard.dismiss();
            }
        }
        out
    }

    /// Fire every timer that is due at `now_ms`.
    pub fn on_tick(&mut self, now_ms: u64) -> Outputs {
        let mut out = Vec::new();
        if let Some(outcome) = self.checkout.poll_watchdog(now_ms) {
            self.apply_checkout(outcome, &mut out, now_ms);
        }
        if let Some(request) = self.checkout.poll_reload(now_ms) {
            self.send(&mut out, request, now_ms);
        }
        if let Some(request) = self.cart.poll_resync(now_ms) {
            self.send(&mut out, request, now_ms);
        }
        if let Some(request) = self.chat.poll_delete(now_ms) {
            self.send(&mut out, request, now_ms);
        }
        out
    }

    /// Earliest pending timer deadline, if any.
    pub fn next_deadline_ms(&self) -> Option<u64> {
        earliest_deadline([
            self.cart.next_deadline_ms(),
            self.checkout.next_deadline_ms(),
            self.chat.next_deadline_ms(),
        ])
    }

    /// Connection dropped: abandon in-flight work and tell the user once.
    pub fn on_disconnected(&mut self, now_ms: u64) -> Outputs {
        let mut out = Vec::new();
        if self.checkout.abort().is_some() {
            warn!("checkout abandoned by connection loss");
        }
        self.ledger.clear();
        let alert = Alert::new(
            "connection_lost",
            AlertLevel::Error,
            "连接已断开",
            "与服务器的连接已断开",
        );
        self.raise(&mut out, alert, now_ms);
        out
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            cart: self.cart.view(),
            checkout: self.checkout.view(),
            chat: self.chat.view(),
            catalog: self.catalog.view(),
            alert_visible: self.guard.is_visible(),
        }
    }

    fn consume_cart(
        &mut self,
        message: &ServerMessage,
        correlated: Option<&PendingRequest>,
        out: &mut Outputs,
        now_ms: u64,
    ) {
        match message {
            ServerMessage::CartSnapshot(snapshot) => {
                let outcome = self.cart.apply_snapshot(snapshot.items.clone(), now_ms);
                trace!(?outcome, "cart snapshot offered");
            }
            ServerMessage::ClearCartResponse(ack) if correlated.is_some() => {
                if !ack.success {
                    self.clear_failed(ack_error(ack), out, now_ms);
                }
            }
            ServerMessage::AddToCartResponse(ack) if correlated.is_some() => {
                if ack.success {
                    let alert = Alert::new("add_to_cart", AlertLevel::Info, "提示", "已加入购物车");
                    self.raise(out, alert, now_ms);
                    let request = self.cart.resync_now();
                    self.send(out, request, now_ms);
                } else {
                    self.add_failed(&ack_error(ack), out, now_ms);
                }
            }
            _ => {}
        }
    }

    fn consume_checkout(
        &mut self,
        message: &ServerMessage,
        correlated: Option<&PendingRequest>,
        out: &mut Outputs,
        now_ms: u64,
    ) {
        let Some(pending) = correlated else {
            return;
        };
        let outcome = match message {
            ServerMessage::OrderResponse(response) => {
                self.checkout.on_order_response(pending.id, response, now_ms)
            }
            ServerMessage::CheckoutResponse(ack) => {
                self.checkout.on_checkout_response(pending.id, ack, now_ms)
            }
            _ => None,
        };
        if let Some(outcome) = outcome {
            self.apply_checkout(outcome, out, now_ms);
        }
    }

    fn consume_chat(
        &mut self,
        message: &ServerMessage,
        correlated: Option<&PendingRequest>,
        out: &mut Outputs,
        now_ms: u64,
    ) {
        match message {
            ServerMessage::ChatInitResponse(response) => {
                self.chat.on_init_response(response.clone(), now_ms);
            }
            ServerMessage::ChatMessage(entry) => {
                self.chat.on_message(entry.clone());
            }
            ServerMessage::ChatDeleteResponse(response) => {
                let Some(pending) = correlated else {
                    return;
                };
                let peer = pending.target.as_deref().unwrap_or_default();
                if !self.chat.on_delete_confirmed(peer, response) {
                    let error = EngineError::from_server(None, response.message.as_deref());
                    self.delete_failed(&error, out, now_ms);
                }
            }
            ServerMessage::Presence(update) => {
                let request = self.chat.on_presence(update.clone());
                self.send(out, request, now_ms);
            }
            _ => {}
        }
    }

    fn consume_catalog(
        &mut self,
        message: &ServerMessage,
        correlated: Option<&PendingRequest>,
        out: &mut Outputs,
        now_ms: u64,
    ) {
        let reload_after_order = match message {
            ServerMessage::ProductsResponse(page) => {
                if let Some(request) = self.catalog.on_response(page.clone()) {
                    self.send(out, request, now_ms);
                }
                false
            }
            ServerMessage::SearchResults(results) => {
                self.catalog.on_search_results(results.clone());
                false
            }
            ServerMessage::ProductDetail(detail) => {
                if let Err(error) = self.catalog.on_detail(detail.clone()) {
                    let alert = Alert::new(
                        "product_detail",
                        AlertLevel::Warning,
                        "商品详情",
                        error.message,
                    );
                    self.raise(out, alert, now_ms);
                }
                false
            }
            ServerMessage::OrderResponse(response) => response.success,
            ServerMessage::CheckoutResponse(ack) => ack.success,
            _ => false,
        };
        // Stock and sales counts changed after a purchase.
        if reload_after_order && correlated.is_some() {
            let request = self.catalog.reload();
            self.send(out, request, now_ms);
        }
    }

    fn consume_error(
        &mut self,
        message: &ServerMessage,
        correlated: Option<PendingRequest>,
        out: &mut Outputs,
        now_ms: u64,
    ) {
        let ServerMessage::Error(server_error) = message else {
            return;
        };
        let error = EngineError::from_server(
            server_error.code.as_deref(),
            Some(server_error.message.as_str()),
        );
        let Some(pending) = correlated else {
            warn!(code = %error.code, "unattributed server error");
            self.raise(out, error_alert("server_error", "错误", &error), now_ms);
            return;
        };

        debug!(id = %pending.id, request = pending.request_kind, code = %error.code, "server error for request");
        match pending.reply {
            MessageKind::OrderResponse | MessageKind::CheckoutResponse => {
                if let Some(outcome) = self.checkout.on_error(pending.id, error, now_ms) {
                    self.apply_checkout(outcome, out, now_ms);
                }
            }
            MessageKind::ClearCartResponse => self.clear_failed(error, out, now_ms),
            MessageKind::AddToCartResponse => self.add_failed(&error, out, now_ms),
            MessageKind::ChatDeleteResponse => self.delete_failed(&error, out, now_ms),
            _ => self.raise(out, error_alert("server_error", "错误", &error), now_ms),
        }
    }

    fn apply_checkout(&mut self, outcome: CheckoutOutcome, out: &mut Outputs, now_ms: u64) {
        match outcome {
            CheckoutOutcome::Succeeded {
                order_id,
                total,
                purchased,
                legacy,
            } => {
                let message = match order_id {
                    Some(order_id) => format!("订单号 {order_id}，合计 ¥{total:.2}"),
                    None => format!("合计 ¥{total:.2}"),
                };
                self.raise(out, Alert::new("order_ok", AlertLevel::Info, "下单成功", message), now_ms);
                if legacy {
                    self.cart.clear_local(now_ms);
                }
                for item in purchased {
                    let request = self.cart.remove(item.product_id, now_ms);
                    self.send(out, request, now_ms);
                }
            }
            CheckoutOutcome::FellBack { request } => {
                let id = self.send(out, request, now_ms);
                self.checkout.bind_request(id);
            }
            CheckoutOutcome::Failed { error } => {
                self.raise(out, error_alert("checkout_fail", "结算失败", &error), now_ms);
            }
            CheckoutOutcome::TimedOut { request_id } => {
                if let Some(id) = request_id {
                    self.ledger.cancel(id);
                }
                let alert = Alert::new(
                    "checkout_timeout",
                    AlertLevel::Error,
                    "结算超时",
                    "服务器未响应，请稍后重试",
                );
                self.raise(out, alert, now_ms);
            }
        }
    }

    fn clear_failed(&mut self, error: EngineError, out: &mut Outputs, now_ms: u64) {
        self.raise(out, error_alert("clear_fail", "清空失败", &error), now_ms);
        let request = self.cart.resync_now();
        self.send(out, request, now_ms);
    }

    fn add_failed(&mut self, error: &EngineError, out: &mut Outputs, now_ms: u64) {
        self.raise(out, error_alert("add_to_cart", "加入购物车失败", error), now_ms);
    }

    fn delete_failed(&mut self, error: &EngineError, out: &mut Outputs, now_ms: u64) {
        self.raise(out, error_alert("chat_delete", "删除聊天记录失败", error), now_ms);
    }

    fn send(&mut self, out: &mut Outputs, request: ClientRequest, now_ms: u64) -> Option<RequestId> {
        let id = self.ledger.register(&request, now_ms);
        out.push(EngineOutput::Send(request));
        id
    }

    fn raise(&mut self, out: &mut Outputs, alert: Alert, now_ms: u64) {
        if self.guard.admit(&alert.tag, alert_window(&alert.tag), now_ms) {
            out.push(EngineOutput::Alert(alert));
        }
    }

    fn raise_error(&mut self, out: &mut Outputs, error: &EngineError, now_ms: u64) {
        let alert = Alert::new(error.code.clone(), AlertLevel::Warning, "提示", error.message.clone());
        self.raise(out, alert, now_ms);
    }
}

fn ack_error(ack: &Ack) -> EngineError {
    EngineError::from_server(None, ack.message.as_deref())
}

fn error_alert(tag: &str, title: &str, error: &EngineError) -> Alert {
    Alert::new(tag, AlertLevel::Error, title, error.message.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        framer::decode_line,
        protocol::{CartSnapshot, OrderItem, OrderResponse, ServerError},
    };

    fn line(product_id: i64, price: f64, quantity: u32) -> CartLine {
        CartLine {
            product_id,
            name: format!("product-{product_id}"),
            price,
            discount_price: None,
            on_sale: false,
            quantity,
            stock: -1,
        }
    }

    fn engine() -> StorefrontEngine {
        StorefrontEngine::new(EngineConfig {
            username: Some("alice".into()),
            ..EngineConfig::default()
        })
    }

    fn loaded(lines: Vec<CartLine>) -> StorefrontEngine {
        let mut engine = engine();
        engine.handle_message(
            ServerMessage::CartSnapshot(CartSnapshot { items: lines }),
            0,
        );
        engine
    }

    fn decode(json: &str) -> ServerMessage {
        decode_line(json.as_bytes())
            .expect("line should decode")
            .expect("line should not be blank")
    }

    fn sent(outputs: &[EngineOutput]) -> Vec<&ClientRequest> {
        outputs
            .iter()
            .filter_map(|output| match output {
                EngineOutput::Send(request) => Some(request),
                EngineOutput::Alert(_) => None,
            })
            .collect()
    }

    fn alerts(outputs: &[EngineOutput]) -> Vec<&Alert> {
        outputs
            .iter()
            .filter_map(|output| match output {
                EngineOutput::Alert(alert) => Some(alert),
                EngineOutput::Send(_) => None,
            })
            .collect()
    }

    #[test]
    fn startup_fetches_cart_catalog_and_broadcast_chat() {
        let mut engine = engine();
        let outputs = engine.startup(0);
        let requests = sent(&outputs);
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0], &ClientRequest::GetCart);
        assert!(matches!(
            requests[1],
            ClientRequest::GetProducts { page: 1, size: 12, .. }
        ));
        assert!(matches!(requests[2], ClientRequest::ChatInit { peer: None, .. }));
    }

    #[test]
    fn quantity_edit_updates_total_immediately() {
        let mut engine = loaded(vec![line(1, 10.0, 2)]);
        let outputs = engine.handle_intent(
            Intent::SetQuantity {
                product_id: 1,
                quantity: 5,
            },
            100,
        );
        assert_eq!(
            sent(&outputs),
            vec![&ClientRequest::SetCartQuantity {
                product_id: 1,
                quantity: 5
            }]
        );
        assert_eq!(engine.snapshot().cart.total, 50.0);
    }

    #[test]
    fn duplicate_snapshot_keeps_selection() {
        let mut engine = loaded(vec![line(1, 10.0, 1), line(2, 5.0, 1)]);
        engine.handle_intent(Intent::ToggleLine { index: 1 }, 100);
        engine.handle_message(
            decode(r#"{"type":"cart_items","items":[{"product_id":2,"price":5,"quantity":1},{"product_id":1,"price":10,"quantity":1}]}"#),
            200,
        );
        assert_eq!(engine.snapshot().cart.selected_count, 1);
        assert_eq!(engine.snapshot().cart.total, 10.0);
    }

    #[test]
    fn order_success_alerts_once_then_removes_lines() {
        let mut engine = loaded(vec![line(1, 10.0, 1), line(2, 20.0, 1)]);
        let outputs = engine.handle_intent(Intent::Checkout, 100);
        assert_eq!(
            sent(&outputs),
            vec![&ClientRequest::CreateOrder {
                items: vec![
                    OrderItem {
                        product_id: 1,
                        quantity: 1
                    },
                    OrderItem {
                        product_id: 2,
                        quantity: 1
                    },
                ],
                username: Some("alice".into()),
            }]
        );

        let outputs = engine.handle_message(
            decode(r#"{"type":"order_response","success":true,"order_id":7}"#),
            200,
        );
        let raised = alerts(&outputs);
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].title, "下单成功");
        assert!(raised[0].message.contains("¥30.00"));
        assert!(matches!(outputs[0], EngineOutput::Alert(_)));

        let removals: Vec<_> = sent(&outputs)
            .into_iter()
            .filter(|request| matches!(request, ClientRequest::RemoveFromCart { .. }))
            .collect();
        assert_eq!(removals.len(), 2);
        assert!(engine.snapshot().cart.rows.is_empty());
        assert!(
            sent(&outputs)
                .iter()
                .any(|request| matches!(request, ClientRequest::GetProducts { .. }))
        );

        let outputs = engine.on_tick(500);
        assert_eq!(sent(&outputs), vec![&ClientRequest::GetCart]);
    }

    #[test]
    fn checkout_timeout_alerts_once_and_allows_retry() {
        let mut engine = loaded(vec![line(1, 10.0, 1)]);
        engine.handle_intent(Intent::Checkout, 0);
        assert_eq!(engine.next_deadline_ms(), Some(3_500));

        let outputs = engine.on_tick(3_500);
        let raised = alerts(&outputs);
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].tag, "checkout_timeout");
        assert!(!engine.snapshot().checkout.in_flight);

        let late = engine.handle_message(
            decode(r#"{"type":"order_response","success":true,"order_id":1}"#),
            3_600,
        );
        assert!(late.is_empty());

        engine.handle_intent(Intent::DismissAlert, 3_700);
        let outputs = engine.handle_intent(Intent::Checkout, 3_800);
        assert!(matches!(
            sent(&outputs).as_slice(),
            [ClientRequest::CreateOrder { .. }]
        ));
    }

    #[test]
    fn checkout_while_in_flight_sends_nothing() {
        let mut engine = loaded(vec![line(1, 10.0, 1)]);
        engine.handle_intent(Intent::Checkout, 0);
        assert!(engine.handle_intent(Intent::Checkout, 10).is_empty());
    }

    #[test]
    fn unknown_type_error_triggers_legacy_fallback() {
        let mut engine = loaded(vec![line(1, 10.0, 1)]);
        engine.handle_intent(Intent::Checkout, 0);
        let outputs = engine.handle_message(
            decode(r#"{"type":"error","message":"Unknown message type: create_order"}"#),
            100,
        );
        assert_eq!(
            sent(&outputs),
            vec![&ClientRequest::Checkout {
                username: Some("alice".into())
            }]
        );
        assert!(alerts(&outputs).is_empty());

        let outputs = engine.handle_message(
            decode(r#"{"type":"checkout_response","success":true}"#),
            200,
        );
        assert_eq!(alerts(&outputs)[0].title, "下单成功");
        assert!(engine.snapshot().cart.rows.is_empty());
    }

    #[test]
    fn undo_window_lapse_sends_exactly_one_delete() {
        let mut engine = engine();
        engine.handle_intent(
            Intent::SelectChatPeer {
                peer: Some("bob".into()),
            },
            0,
        );
        engine.handle_intent(
            Intent::DeleteChatHistory {
                peer: Some("bob".into()),
            },
            0,
        );
        assert!(engine.snapshot().chat.undo_visible);
        assert!(engine.on_tick(2_999).is_empty());

        let outputs = engine.on_tick(3_000);
        assert_eq!(
            sent(&outputs),
            vec![&ClientRequest::ChatDelete {
                username: Some("alice".into()),
                peer: "bob".into(),
            }]
        );
        assert!(engine.on_tick(6_000).is_empty());
        assert!(!engine.snapshot().chat.undo_visible);
    }

    #[test]
    fn undo_cancels_the_delete() {
        let mut engine = engine();
        engine.handle_intent(Intent::DeleteChatHistory { peer: None }, 0);
        engine.handle_intent(Intent::UndoDelete, 1_000);
        assert!(engine.on_tick(10_000).is_empty());
    }

    #[test]
    fn server_errors_with_same_tag_100ms_apart_alert_once() {
        let mut engine = engine();
        let first = engine.handle_message(
            decode(r#"{"type":"error","message":"Invalid JSON"}"#),
            1_000,
        );
        engine.handle_intent(Intent::DismissAlert, 1_050);
        let second = engine.handle_message(
            decode(r#"{"type":"error","message":"Invalid JSON"}"#),
            1_100,
        );
        assert_eq!(alerts(&first).len(), 1);
        assert_eq!(alerts(&first)[0].tag, "server_error");
        assert!(second.is_empty());
    }

    #[test]
    fn checkout_errors_100ms_apart_alert_once() {
        let mut engine = loaded(vec![line(1, 10.0, 1)]);
        engine.handle_intent(Intent::Checkout, 0);
        let first = engine.handle_message(
            decode(r#"{"type":"error","code":"INSUFFICIENT_STOCK","message":"no stock"}"#),
            100,
        );
        assert_eq!(alerts(&first).len(), 1);
        assert_eq!(alerts(&first)[0].tag, "checkout_fail");
        assert!(!engine.snapshot().checkout.in_flight);

        engine.handle_intent(Intent::DismissAlert, 150);
        let retry = engine.handle_intent(Intent::Checkout, 160);
        assert!(matches!(
            sent(&retry).as_slice(),
            [ClientRequest::CreateOrder { .. }]
        ));
        let second = engine.handle_message(
            decode(r#"{"type":"error","code":"INSUFFICIENT_STOCK","message":"no stock"}"#),
            200,
        );
        // Still attributed to the retried checkout, but the alert is deduplicated.
        assert!(alerts(&second).is_empty());
        assert!(!engine.snapshot().checkout.in_flight);
        assert_eq!(engine.next_deadline_ms(), None);
    }

    #[test]
    fn legacy_checkout_refuses_partial_selection() {
        let mut engine = StorefrontEngine::new(EngineConfig {
            username: Some("alice".into()),
            legacy_checkout: true,
            ..EngineConfig::default()
        });
        engine.handle_message(
            ServerMessage::CartSnapshot(CartSnapshot {
                items: vec![line(1, 10.0, 1), line(2, 20.0, 1), line(3, 100.0, 1)],
            }),
            0,
        );
        engine.handle_intent(Intent::ToggleLine { index: 1 }, 10);
        engine.handle_intent(Intent::ToggleLine { index: 2 }, 20);

        let outputs = engine.handle_intent(Intent::Checkout, 100);
        assert!(sent(&outputs).is_empty());
        assert_eq!(alerts(&outputs)[0].tag, "partial_selection");
        assert!(!engine.snapshot().checkout.in_flight);
        assert_eq!(engine.snapshot().cart.rows.len(), 3);
    }

    #[test]
    fn stale_unanswered_request_is_not_blamed_for_later_error() {
        let mut engine = engine();
        for product_id in 0..1_000 {
            engine.handle_intent(
                Intent::AddToCart {
                    product_id,
                    quantity: 1,
                },
                0,
            );
        }
        let outputs = engine.handle_message(
            decode(r#"{"type":"error","message":"Invalid JSON"}"#),
            3_600_000,
        );
        let raised = alerts(&outputs);
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].tag, "server_error");
    }

    #[test]
    fn search_shows_matches_from_first_page() {
        let mut engine = engine();
        engine.handle_message(
            decode(r#"{"type":"products_response","products":[],"total":60}"#),
            0,
        );
        engine.handle_intent(Intent::JumpToPage { page: 4 }, 10);

        let outputs = engine.handle_intent(
            Intent::Search {
                keyword: " tea ".into(),
            },
            20,
        );
        assert_eq!(
            sent(&outputs),
            vec![&ClientRequest::Search {
                keyword: "tea".into()
            }]
        );
        engine.handle_message(
            decode(r#"{"type":"search_results","results":[{"product_id":5,"name":"green tea","price":18}]}"#),
            30,
        );
        let catalog = engine.snapshot().catalog;
        assert_eq!(catalog.page, 1);
        assert_eq!(catalog.query.as_deref(), Some("tea"));
        assert_eq!(catalog.products[0].product_id, 5);

        let outputs = engine.handle_intent(Intent::ClearSearch, 40);
        assert!(matches!(
            sent(&outputs).as_slice(),
            [ClientRequest::GetProducts { page: 1, .. }]
        ));
    }

    #[test]
    fn blank_search_warns_locally() {
        let mut engine = engine();
        let outputs = engine.handle_intent(
            Intent::Search {
                keyword: "  ".into(),
            },
            0,
        );
        assert!(sent(&outputs).is_empty());
        assert_eq!(alerts(&outputs)[0].tag, "empty_keyword");
    }

    #[test]
    fn product_detail_opens_requested_product() {
        let mut engine = engine();
        let outputs = engine.handle_intent(Intent::ShowProduct { product_id: 5 }, 0);
        assert_eq!(
            sent(&outputs),
            vec![&ClientRequest::GetProductDetail { product_id: 5 }]
        );
        engine.handle_message(
            decode(r#"{"type":"product_detail","product":{"product_id":5,"name":"green tea","price":18}}"#),
            10,
        );
        let detail = engine.snapshot().catalog.detail.expect("detail shown");
        assert_eq!(detail.name, "green tea");

        engine.handle_intent(Intent::CloseProduct, 20);
        assert_eq!(engine.snapshot().catalog.detail, None);

        engine.handle_intent(Intent::ShowProduct { product_id: 99 }, 30);
        let outputs = engine.handle_message(
            decode(r#"{"type":"product_detail","product":{"product_id":1,"name":"other","price":1}}"#),
            40,
        );
        assert_eq!(alerts(&outputs)[0].tag, "product_detail");
        assert_eq!(engine.snapshot().catalog.detail, None);
    }

    #[test]
    fn local_validation_repeats_close_together_alert_once() {
        let mut engine = engine();
        let first = engine.handle_intent(Intent::Checkout, 0);
        engine.handle_intent(Intent::DismissAlert, 50);
        let second = engine.handle_intent(Intent::Checkout, 100);
        assert_eq!(alerts(&first).len(), 1);
        assert_eq!(alerts(&first)[0].tag, "empty_cart");
        assert!(second.is_empty());
    }

    #[test]
    fn failed_order_surfaces_friendly_text() {
        let mut engine = loaded(vec![line(1, 10.0, 1)]);
        engine.handle_intent(Intent::Checkout, 0);
        let outputs = engine.handle_message(
            ServerMessage::OrderResponse(OrderResponse {
                success: false,
                code: Some("INSUFFICIENT_STOCK".into()),
                ..OrderResponse::default()
            }),
            100,
        );
        let raised = alerts(&outputs);
        assert_eq!(raised[0].tag, "checkout_fail");
        assert_eq!(raised[0].message, "库存不足，请调整购买数量");
        assert_eq!(engine.snapshot().cart.rows.len(), 1);
    }

    #[test]
    fn uncorrelated_replies_are_ignored() {
        let mut engine = loaded(vec![line(1, 10.0, 1)]);
        let outputs = engine.handle_message(
            decode(r#"{"type":"clear_cart_response","success":false,"message":"boom"}"#),
            10,
        );
        assert!(outputs.is_empty());
    }

    #[test]
    fn failed_clear_alerts_and_resyncs() {
        let mut engine = loaded(vec![line(1, 10.0, 1)]);
        engine.handle_intent(Intent::ClearCart, 0);
        assert!(engine.snapshot().cart.rows.is_empty());

        let outputs = engine.handle_message(
            ServerMessage::Error(ServerError {
                code: Some("NOT_LOGGED_IN".into()),
                message: "login first".into(),
            }),
            100,
        );
        assert_eq!(alerts(&outputs)[0].tag, "clear_fail");
        assert_eq!(alerts(&outputs)[0].message, "请先登录");
        assert_eq!(sent(&outputs), vec![&ClientRequest::GetCart]);
        // The resync timer was replaced by the immediate reload.
        assert!(engine.on_tick(2_000).is_empty());
    }

    #[test]
    fn unattributed_error_raises_generic_alert() {
        let mut engine = engine();
        let outputs = engine.handle_message(
            decode(r#"{"type":"error","message":"Invalid JSON"}"#),
            0,
        );
        assert_eq!(alerts(&outputs)[0].tag, "server_error");
    }

    #[test]
    fn add_to_cart_success_reloads_cart() {
        let mut engine = engine();
        engine.handle_intent(
            Intent::AddToCart {
                product_id: 4,
                quantity: 2,
            },
            0,
        );
        let outputs = engine.handle_message(
            decode(r#"{"type":"add_to_cart_response","success":true}"#),
            50,
        );
        assert_eq!(alerts(&outputs)[0].tag, "add_to_cart");
        assert_eq!(sent(&outputs), vec![&ClientRequest::GetCart]);
    }

    #[test]
    fn presence_refetches_chat_history() {
        let mut engine = engine();
        let outputs = engine.handle_message(
            decode(r#"{"type":"user_online","username":"bob","online_users":["alice","bob"]}"#),
            0,
        );
        assert!(matches!(
            sent(&outputs).as_slice(),
            [ClientRequest::ChatInit { .. }]
        ));
        assert_eq!(engine.snapshot().chat.online_peers, vec!["bob".to_owned()]);
    }

    #[test]
    fn unknown_messages_change_nothing() {
        let mut engine = engine();
        let before = engine.snapshot();
        assert!(engine.handle_message(decode(r#"{"type":"banner","text":"sale"}"#), 0).is_empty());
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn disconnect_abandons_checkout() {
        let mut engine = loaded(vec![line(1, 10.0, 1)]);
        engine.handle_intent(Intent::Checkout, 0);
        let outputs = engine.on_disconnected(100);
        assert_eq!(alerts(&outputs)[0].tag, "connection_lost");
        assert!(!engine.snapshot().checkout.in_flight);
        assert_eq!(engine.next_deadline_ms(), None);
    }
}
