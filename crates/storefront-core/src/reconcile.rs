//! Signature-based short-circuit for authoritative snapshots.
//!
//! Local edits are applied optimistically and record the signature of the
//! resulting state; a server snapshot with the same signature arriving inside
//! the window is then known to carry no news and is skipped.

use tracing::trace;

use crate::protocol::{CartLine, ChatEntry};

/// Order-independent fingerprint of a snapshot.
pub trait Signature {
    fn signature(&self) -> String;
}

impl Signature for [CartLine] {
    fn signature(&self) -> String {
        let mut pairs: Vec<(i64, u32)> = self
            .iter()
            .map(|line| (line.product_id, line.quantity))
            .collect();
        pairs.sort_unstable();
        pairs
            .iter()
            .map(|(product_id, quantity)| format!("{product_id}:{quantity}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Signature for [ChatEntry] {
    fn signature(&self) -> String {
        let mut keys: Vec<String> = self
            .iter()
            .map(|entry| {
                format!(
                    "{}>{}@{}#{}",
                    entry.from,
                    entry.to,
                    entry.created_at,
                    entry.content.len()
                )
            })
            .collect();
        keys.sort_unstable();
        keys.join(",")
    }
}

/// Result of offering a snapshot to a [`SnapshotGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied,
    Skipped,
}

/// Remembers the last applied signature and when it was applied.
#[derive(Debug, Clone)]
pub struct SnapshotGate {
    window_ms: u64,
    last: Option<(String, u64)>,
}

impl SnapshotGate {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last: None,
        }
    }

    /// Decide whether a snapshot with `signature` must be applied.
    ///
    /// Applying records the signature; skipping leaves the record untouched so
    /// the window is measured from the last real application.
    pub fn offer(&mut self, signature: String, now_ms: u64) -> SnapshotOutcome {
        if let Some((last_signature, applied_at)) = &self.last
            && *last_signature == signature
            && now_ms.saturating_sub(*applied_at) < self.window_ms
        {
            trace!(%signature, "snapshot matches last applied state; skipping");
            return SnapshotOutcome::Skipped;
        }
        self.last = Some((signature, now_ms));
        SnapshotOutcome::Applied
    }

    /// Record local state produced by an optimistic edit.
    pub fn record(&mut self, signature: String, now_ms: u64) {
        self.last = Some((signature, now_ms));
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
