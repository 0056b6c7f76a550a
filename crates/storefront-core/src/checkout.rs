use tracing::{debug, info, warn};

use crate::{
    cart::CartEngine,
    correlation::RequestId,
    error::{EngineError, ErrorCategory},
    protocol::{Ack, ClientRequest, OrderId, OrderItem, OrderResponse},
    timer::CancelableTimer,
    types::CheckoutView,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    Idle,
    InFlight,
}

/// Snapshot of the cart taken when a checkout starts.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutAttempt {
    pub used_new_protocol: bool,
    pub fallback_tried: bool,
    pub selected_count: usize,
    pub total_rows: usize,
    pub started_at_ms: u64,
    pub items: Vec<OrderItem>,
    pub total: f64,
    username: Option<String>,
    request_id: Option<RequestId>,
}

/// How an in-flight attempt ended (or continued, for the fallback).
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    Succeeded {
        order_id: Option<OrderId>,
        total: f64,
        /// Lines to drop from the cart; empty after a legacy whole-cart checkout.
        purchased: Vec<OrderItem>,
        legacy: bool,
    },
    /// Retry with the legacy protocol; the attempt stays in flight.
    FellBack { request: ClientRequest },
    Failed { error: EngineError },
    TimedOut { request_id: Option<RequestId> },
}

/// Single-flight guard around order creation.
#[derive(Debug, Clone)]
pub struct CheckoutMachine {
    attempt: Option<CheckoutAttempt>,
    watchdog: CancelableTimer<()>,
    timeout_ms: u64,
    reload: CancelableTimer<()>,
    reload_delay_ms: u64,
    legacy_only: bool,
}

impl CheckoutMachine {
    pub fn new(timeout_ms: u64, reload_delay_ms: u64, legacy_only: bool) -> Self {
        Self {
            attempt: None,
            watchdog: CancelableTimer::new(),
            timeout_ms,
            reload: CancelableTimer::new(),
            reload_delay_ms,
            legacy_only,
        }
    }

    pub fn state(&self) -> CheckoutState {
        if self.attempt.is_some() {
            CheckoutState::InFlight
        } else {
            CheckoutState::Idle
        }
    }

    pub fn attempt(&self) -> Option<&CheckoutAttempt> {
        self.attempt.as_ref()
    }

    /// Start a checkout for the selected cart lines.
    ///
    /// Returns `Ok(None)` when an attempt is already in flight; the intent is
    /// then a no-op. In legacy mode every row must be selected.
    pub fn begin(
        &mut self,
        cart: &CartEngine,
        username: Option<String>,
        now_ms: u64,
    ) -> Result<Option<ClientRequest>, EngineError> {
        if self.attempt.is_some() {
            debug!("checkout already in flight; ignoring intent");
            return Ok(None);
        }
        if cart.is_empty() {
            return Err(EngineError::validation("empty_cart", "购物车为空"));
        }
        let totals = cart.totals();
        if totals.selected_count == 0 {
            return Err(EngineError::validation("no_selection", "请选择要结算的商品"));
        }
        // The legacy request buys the whole server-side cart.
        if self.legacy_only && totals.selected_count != totals.total_rows {
            return Err(EngineError::validation(
                "partial_selection",
                "当前结算方式仅支持全选购物车",
            ));
        }

        let items = cart.selected_items();
        let used_new_protocol = !self.legacy_only;
        let request = if used_new_protocol {
            ClientRequest::CreateOrder {
                items: items.clone(),
                username: username.clone(),
            }
        } else {
            ClientRequest::Checkout {
                username: username.clone(),
            }
        };

        info!(
            selected = totals.selected_count,
            rows = totals.total_rows,
            request = request.kind(),
            "checkout started"
        );
        self.attempt = Some(CheckoutAttempt {
            used_new_protocol,
            fallback_tried: false,
            selected_count: totals.selected_count,
            total_rows: totals.total_rows,
            started_at_ms: now_ms,
            items,
            total: totals.total,
            username,
            request_id: None,
        });
        self.watchdog.arm(now_ms, self.timeout_ms, ());
        Ok(Some(request))
    }

    /// Associate the tracked request id with the current attempt.
    pub fn bind_request(&mut self, request_id: Option<RequestId>) {
        if let Some(attempt) = &mut self.attempt {
            attempt.request_id = request_id;
        }
    }

    /// Handle a correlated `order_response`.
    pub fn on_order_response(
        &mut self,
        request_id: RequestId,
        response: &OrderResponse,
        now_ms: u64,
    ) -> Option<CheckoutOutcome> {
        self.current(request_id)?;
        if response.success {
            return self.succeed(response.order_id.clone(), now_ms);
        }
        let error = EngineError::from_server(response.code.as_deref(), response.message.as_deref());
        Some(self.fail_or_fall_back(error, now_ms))
    }

    /// Handle a correlated legacy `checkout_response`.
    pub fn on_checkout_response(
        &mut self,
        request_id: RequestId,
        ack: &Ack,
        now_ms: u64,
    ) -> Option<CheckoutOutcome> {
        self.current(request_id)?;
        if ack.success {
            return self.succeed(None, now_ms);
        }
        let error = EngineError::from_server(None, ack.message.as_deref());
        Some(self.fail_or_fall_back(error, now_ms))
    }

    /// Handle a generic `error` that was attributed to this attempt.
    pub fn on_error(
        &mut self,
        request_id: RequestId,
        error: EngineError,
        now_ms: u64,
    ) -> Option<CheckoutOutcome> {
        self.current(request_id)?;
        Some(self.fail_or_fall_back(error, now_ms))
    }

    /// Fire the watchdog if it is due.
    pub fn poll_watchdog(&mut self, now_ms: u64) -> Option<CheckoutOutcome> {
        self.watchdog.poll_expired(now_ms)?;
        let attempt = self.attempt.take()?;
        warn!(
            elapsed_ms = now_ms.saturating_sub(attempt.started_at_ms),
            "checkout timed out"
        );
        Some(CheckoutOutcome::TimedOut {
            request_id: attempt.request_id,
        })
    }

    /// Fire the post-success cart reload if it is due.
    pub fn poll_reload(&mut self, now_ms: u64) -> Option<ClientRequest> {
        self.reload
            .poll_expired(now_ms)
            .map(|()| ClientRequest::GetCart)
    }

    /// Abandon the attempt without surfacing anything (connection loss).
    pub fn abort(&mut self) -> Option<CheckoutAttempt> {
        self.watchdog.cancel();
        self.attempt.take()
    }

    pub fn next_deadline_ms(&self) -> Option<u64> {
        crate::timer::earliest_deadline([self.watchdog.deadline_ms(), self.reload.deadline_ms()])
    }

    pub fn view(&self) -> CheckoutView {
        CheckoutView {
            in_flight: self.attempt.is_some(),
            used_new_protocol: self
                .attempt
                .as_ref()
                .map(|attempt| attempt.used_new_protocol)
                .unwrap_or(!self.legacy_only),
        }
    }

    fn current(&self, request_id: RequestId) -> Option<&CheckoutAttempt> {
        let attempt = self.attempt.as_ref()?;
        if attempt.request_id.is_some_and(|bound| bound != request_id) {
            debug!(%request_id, "reply belongs to a superseded checkout request");
            return None;
        }
        Some(attempt)
    }

    fn succeed(&mut self, order_id: Option<OrderId>, now_ms: u64) -> Option<CheckoutOutcome> {
        let attempt = self.attempt.take()?;
        self.watchdog.cancel();
        self.reload.arm(now_ms, self.reload_delay_ms, ());
        let legacy = !attempt.used_new_protocol;
        info!(
            order_id = order_id.as_ref().map(ToString::to_string),
            legacy, "checkout succeeded"
        );
        Some(CheckoutOutcome::Succeeded {
            order_id,
            total: attempt.total,
            purchased: if legacy { Vec::new() } else { attempt.items },
            legacy,
        })
    }

    fn fail_or_fall_back(&mut self, error: EngineError, now_ms: u64) -> CheckoutOutcome {
        let eligible = self.attempt.as_ref().is_some_and(|attempt| {
            error.is_unsupported()
                && attempt.used_new_protocol
                && !attempt.fallback_tried
                && attempt.selected_count == attempt.total_rows
        });

        if eligible && let Some(attempt) = &mut self.attempt {
            attempt.used_new_protocol = false;
            attempt.fallback_tried = true;
            attempt.request_id = None;
            warn!(code = %error.code, "create_order unsupported; retrying with legacy checkout");
            self.watchdog.arm(now_ms, self.timeout_ms, ());
            return CheckoutOutcome::FellBack {
                request: ClientRequest::Checkout {
                    username: attempt.username.clone(),
                },
            };
        }

        self.watchdog.cancel();
        self.attempt = None;
        let error = if error.category == ErrorCategory::Protocol {
            EngineError::new(ErrorCategory::Protocol, error.code, "当前服务器不支持该结算方式")
        } else {
            error
        };
        warn!(code = %error.code, "checkout failed");
        CheckoutOutcome::Failed { error }
    }
}
