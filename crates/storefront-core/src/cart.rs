//! Cart reconciliation: optimistic local edits plus wholesale server snapshots.

use tracing::{debug, trace};

use crate::{
    error::EngineError,
    protocol::{CartLine, ClientRequest, OrderItem},
    reconcile::{Signature, SnapshotGate, SnapshotOutcome},
    timer::CancelableTimer,
    types::{CartRowView, CartView},
};

/// Selection-scoped cart totals.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CartTotals {
    pub total: f64,
    pub original_total: f64,
    pub selected_count: usize,
    pub total_rows: usize,
}

/// Outcome of a quantity edit.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityEdit {
    /// Request to send; `None` when the quantity did not change.
    pub request: Option<ClientRequest>,
    /// Requested quantity, when it was lowered to the stock cap.
    pub clamped_from: Option<u32>,
}

/// Owner of the local cart lines and their selection.
#[derive(Debug, Clone)]
pub struct CartEngine {
    lines: Vec<CartLine>,
    selected: Vec<bool>,
    gate: SnapshotGate,
    resync: CancelableTimer<()>,
    resync_delay_ms: u64,
}

impl CartEngine {
    pub fn new(dedup_window_ms: u64, resync_delay_ms: u64) -> Self {
        Self {
            lines: Vec::new(),
            selected: Vec::new(),
            gate: SnapshotGate::new(dedup_window_ms),
            resync: CancelableTimer::new(),
            resync_delay_ms,
        }
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn is_selected(&self, index: usize) -> bool {
        self.selected.get(index).copied().unwrap_or(false)
    }

    /// Replace local lines with an authoritative snapshot.
    ///
    /// Identical snapshots inside the dedup window are skipped so selection
    /// survives; any applied snapshot resets selection to "all selected".
    pub fn apply_snapshot(&mut self, items: Vec<CartLine>, now_ms: u64) -> SnapshotOutcome {
        let outcome = self.gate.offer(items.signature(), now_ms);
        if outcome == SnapshotOutcome::Skipped {
            return outcome;
        }
        debug!(line_count = items.len(), "cart snapshot applied");
        self.selected = vec![true; items.len()];
        self.lines = items;
        outcome
    }

    /// Optimistically change the quantity of `product_id`.
    ///
    /// Quantities above a known stock are clamped; zero removes the line.
    pub fn set_quantity(
        &mut self,
        product_id: i64,
        quantity: u32,
        now_ms: u64,
    ) -> Result<QuantityEdit, EngineError> {
        let index = self.index_of(product_id)?;
        let line = &self.lines[index];
        let (quantity, clamped_from) = match line.stock_limit() {
            Some(limit) if quantity > limit => (limit, Some(quantity)),
            _ => (quantity, None),
        };

        if quantity == 0 {
            let request = self.remove(product_id, now_ms);
            return Ok(QuantityEdit {
                request: Some(request),
                clamped_from,
            });
        }
        if self.lines[index].quantity == quantity {
            return Ok(QuantityEdit {
                request: None,
                clamped_from,
            });
        }

        self.lines[index].quantity = quantity;
        self.record_local_state(now_ms);
        trace!(product_id, quantity, "optimistic quantity edit");
        Ok(QuantityEdit {
            request: Some(ClientRequest::SetCartQuantity {
                product_id,
                quantity,
            }),
            clamped_from,
        })
    }

    /// Optimistically drop `product_id` and return the removal request.
    ///
    /// The request is produced even if the line is already gone locally, so
    /// callers that must tell the server (post-checkout cleanup) always can.
    pub fn remove(&mut self, product_id: i64, now_ms: u64) -> ClientRequest {
        if let Some(index) = self.position(product_id) {
            self.lines.remove(index);
            self.selected.remove(index);
            self.record_local_state(now_ms);
            trace!(product_id, "optimistic line removal");
        }
        ClientRequest::RemoveFromCart { product_id }
    }

    /// Validate that `product_id` is in the cart before removing it.
    pub fn remove_existing(
        &mut self,
        product_id: i64,
        now_ms: u64,
    ) -> Result<ClientRequest, EngineError> {
        self.index_of(product_id)?;
        Ok(self.remove(product_id, now_ms))
    }

    /// Optimistically empty the cart and arm the follow-up resync.
    pub fn clear(&mut self, username: Option<String>, now_ms: u64) -> ClientRequest {
        self.clear_local(now_ms);
        self.resync.arm(now_ms, self.resync_delay_ms, ());
        debug!(delay_ms = self.resync_delay_ms, "cart cleared locally; resync armed");
        ClientRequest::ClearCart { username }
    }

    /// Empty local lines without talking to the server.
    pub fn clear_local(&mut self, now_ms: u64) {
        self.lines.clear();
        self.selected.clear();
        self.record_local_state(now_ms);
    }

    /// Fire the deferred authoritative reload, if due.
    pub fn poll_resync(&mut self, now_ms: u64) -> Option<ClientRequest> {
        self.resync
            .poll_expired(now_ms)
            .map(|()| ClientRequest::GetCart)
    }

    /// Reload immediately instead of waiting for the resync timer.
    pub fn resync_now(&mut self) -> ClientRequest {
        self.resync.cancel();
        self.gate.reset();
        ClientRequest::GetCart
    }

    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.resync.deadline_ms()
    }

    /// Flip selection of the row at `index`; returns the new state.
    pub fn toggle(&mut self, index: usize) -> Result<bool, EngineError> {
        let selected = self.selected.get_mut(index).ok_or_else(|| {
            EngineError::validation("invalid_row", format!("cart row {index} does not exist"))
        })?;
        *selected = !*selected;
        Ok(*selected)
    }

    pub fn select_all(&mut self, selected: bool) {
        self.selected.iter_mut().for_each(|flag| *flag = selected);
    }

    pub fn selected_count(&self) -> usize {
        self.selected.iter().filter(|flag| **flag).count()
    }

    fn selected_lines(&self) -> impl Iterator<Item = &CartLine> {
        self.lines
            .iter()
            .zip(&self.selected)
            .filter_map(|(line, selected)| selected.then_some(line))
    }

    /// Checkout payload for the selected lines.
    pub fn selected_items(&self) -> Vec<OrderItem> {
        self.selected_lines()
            .map(|line| OrderItem {
                product_id: line.product_id,
                quantity: line.quantity,
            })
            .collect()
    }

    pub fn totals(&self) -> CartTotals {
        let (total, original_total) = self
            .selected_lines()
            .fold((0.0, 0.0), |(total, original), line| {
                (total + line.subtotal(), original + line.original_subtotal())
            });
        CartTotals {
            total,
            original_total,
            selected_count: self.selected_count(),
            total_rows: self.lines.len(),
        }
    }

    pub fn view(&self) -> CartView {
        let totals = self.totals();
        CartView {
            rows: self
                .lines
                .iter()
                .zip(&self.selected)
                .map(|(line, selected)| CartRowView {
                    line: line.clone(),
                    selected: *selected,
                    subtotal: line.subtotal(),
                })
                .collect(),
            total: totals.total,
            original_total: totals.original_total,
            selected_count: totals.selected_count,
        }
    }

    fn record_local_state(&mut self, now_ms: u64) {
        self.gate.record(self.lines.signature(), now_ms);
    }

    fn position(&self, product_id: i64) -> Option<usize> {
        self.lines
            .iter()
            .position(|line| line.product_id == product_id)
    }

    fn index_of(&self, product_id: i64) -> Result<usize, EngineError> {
        self.position(product_id).ok_or_else(|| {
            EngineError::validation(
                "unknown_product",
                format!("product {product_id} is not in the cart"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn cart_with(lines: Vec<CartLine>) -> CartEngine {
        let mut cart = CartEngine::new(800, 1_000);
        cart.apply_snapshot(lines, 0);
        cart
    }

    #[test]
    fn quantity_edit_recomputes_total_before_any_reply() {
        let mut cart = cart_with(vec![line(1, 10.0, 2)]);
        let edit = cart.set_quantity(1, 5, 100).expect("edit should work");

        assert_eq!(
            edit.request,
            Some(ClientRequest::SetCartQuantity {
                product_id: 1,
                quantity: 5
            })
        );
        assert_eq!(cart.totals().total, 50.0);
    }

    #[test]
    fn duplicate_snapshot_inside_window_keeps_selection() {
        let items = vec![line(1, 10.0, 1), line(2, 5.0, 1)];
        let mut cart = cart_with(items.clone());
        cart.toggle(1).expect("row exists");

        assert_eq!(
            cart.apply_snapshot(items.clone(), 500),
            SnapshotOutcome::Skipped
        );
        assert!(!cart.is_selected(1));
        assert_eq!(cart.lines().len(), 2);

        assert_eq!(cart.apply_snapshot(items, 2_000), SnapshotOutcome::Applied);
        assert!(cart.is_selected(1));
    }

    #[test]
    fn confirming_snapshot_after_optimistic_edit_is_skipped() {
        let mut cart = cart_with(vec![line(1, 10.0, 2)]);
        cart.set_quantity(1, 3, 1_000).expect("edit should work");

        let outcome = cart.apply_snapshot(vec![line(1, 10.0, 3)], 1_200);
        assert_eq!(outcome, SnapshotOutcome::Skipped);

        let outcome = cart.apply_snapshot(vec![line(1, 10.0, 2)], 1_300);
        assert_eq!(outcome, SnapshotOutcome::Applied);
        assert_eq!(cart.lines()[0].quantity, 2);
    }

    #[test]
    fn total_is_scoped_to_selected_rows() {
        let mut sale = line(2, 30.0, 1);
        sale.on_sale = true;
        sale.discount_price = Some(20.0);
        let mut cart = cart_with(vec![line(1, 10.0, 2), sale]);

        let totals = cart.totals();
        assert_eq!(totals.total, 40.0);
        assert_eq!(totals.original_total, 50.0);

        cart.toggle(0).expect("row exists");
        assert_eq!(cart.totals().total, 20.0);

        cart.select_all(false);
        let totals = cart.totals();
        assert_eq!(totals.total, 0.0);
        assert_eq!(totals.selected_count, 0);
        assert!(cart.selected_items().is_empty());
    }

    #[test]
    fn quantity_is_clamped_to_known_stock() {
        let mut limited = line(1, 10.0, 1);
        limited.stock = 3;
        let mut cart = cart_with(vec![limited]);

        let edit = cart.set_quantity(1, 9, 10).expect("edit should work");
        assert_eq!(edit.clamped_from, Some(9));
        assert_eq!(cart.lines()[0].quantity, 3);
    }

    #[test]
    fn zero_quantity_removes_the_line() {
        let mut cart = cart_with(vec![line(1, 10.0, 1), line(2, 1.0, 1)]);
        let edit = cart.set_quantity(1, 0, 10).expect("edit should work");

        assert_eq!(
            edit.request,
            Some(ClientRequest::RemoveFromCart { product_id: 1 })
        );
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.selected_count(), 1);
    }

    #[test]
    fn editing_unknown_product_is_a_validation_error() {
        let mut cart = cart_with(vec![line(1, 10.0, 1)]);
        let err = cart.set_quantity(99, 1, 0).expect_err("must fail");
        assert_eq!(err.code, "unknown_product");
        assert!(cart.remove_existing(99, 0).is_err());
    }

    #[test]
    fn clear_arms_a_single_deferred_reload() {
        let mut cart = cart_with(vec![line(1, 10.0, 1)]);
        let request = cart.clear(Some("alice".into()), 5_000);

        assert_eq!(
            request,
            ClientRequest::ClearCart {
                username: Some("alice".into())
            }
        );
        assert!(cart.is_empty());
        assert_eq!(cart.next_deadline_ms(), Some(6_000));
        assert_eq!(cart.poll_resync(5_999), None);
        assert_eq!(cart.poll_resync(6_000), Some(ClientRequest::GetCart));
        assert_eq!(cart.poll_resync(7_000), None);
    }

    #[test]
    fn removing_a_row_keeps_selection_aligned() {
        let mut cart = cart_with(vec![line(1, 1.0, 1), line(2, 2.0, 1), line(3, 3.0, 1)]);
        cart.toggle(2).expect("row exists");
        cart.remove(1, 10);

        assert!(cart.is_selected(0));
        assert!(!cart.is_selected(1));
        assert_eq!(cart.totals().total, 2.0);
    }
}
