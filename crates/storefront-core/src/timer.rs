/// Single-shot timer slot with at-most-once firing.
///
/// The engine never sleeps; callers poll with the current clock and the event
/// loop waits until [`CancelableTimer::deadline_ms`]. Firing and cancelling
/// both take the payload, so a slot can never fire twice or after a cancel.
#[derive(Debug, Clone)]
pub struct CancelableTimer<T> {
    armed: Option<Armed<T>>,
}

#[derive(Debug, Clone)]
struct Armed<T> {
    deadline_ms: u64,
    payload: T,
}

impl<T> Default for CancelableTimer<T> {
    fn default() -> Self {
        Self { armed: None }
    }
}

impl<T> CancelableTimer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the slot, replacing any armed payload (which is returned).
    pub fn arm(&mut self, now_ms: u64, delay_ms: u64, payload: T) -> Option<T> {
        self.armed
            .replace(Armed {
                deadline_ms: now_ms.saturating_add(delay_ms),
                payload,
            })
            .map(|armed| armed.payload)
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.armed.take().map(|armed| armed.payload)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.armed.as_ref().map(|armed| armed.deadline_ms)
    }

    pub fn payload(&self) -> Option<&T> {
        self.armed.as_ref().map(|armed| &armed.payload)
    }

    /// Take the payload if the deadline has passed.
    pub fn poll_expired(&mut self, now_ms: u64) -> Option<T> {
        match &self.armed {
            Some(armed) if now_ms >= armed.deadline_ms => self.cancel(),
            _ => None,
        }
    }
}

/// Earliest of several optional deadlines.
pub fn earliest_deadline(deadlines: impl IntoIterator<Item = Option<u64>>) -> Option<u64> {
    deadlines.into_iter().flatten().min()
}
