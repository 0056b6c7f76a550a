use std::collections::HashMap;

use tracing::{debug, trace};

/// Why an alert was held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    /// Another alert is still on screen.
    AlertVisible,
    /// Some alert was shown less than the global cooldown ago.
    GlobalCooldown,
    /// This tag was shown less than its own window ago.
    TagWindow,
}

/// Deduplicates user-visible alerts raised by overlapping async events.
///
/// Several independent paths (local validation, a failed reply, a generic
/// `error`) can describe the same failure; only the first gets through.
#[derive(Debug, Clone)]
pub struct NotificationGuard {
    global_cooldown_ms: u64,
    default_window_ms: u64,
    last_by_tag: HashMap<String, u64>,
    last_any_ms: Option<u64>,
    visible_tag: Option<String>,
}

impl NotificationGuard {
    pub fn new(global_cooldown_ms: u64, default_window_ms: u64) -> Self {
        Self {
            global_cooldown_ms,
            default_window_ms,
            last_by_tag: HashMap::new(),
            last_any_ms: None,
            visible_tag: None,
        }
    }

    /// Check whether an alert with `tag` may be shown now, without recording it.
    pub fn check(&self, tag: &str, window_ms: Option<u64>, now_ms: u64) -> Result<(), Suppression> {
        if self.visible_tag.is_some() {
            return Err(Suppression::AlertVisible);
        }
        if let Some(last_any) = self.last_any_ms
            && now_ms.saturating_sub(last_any) < self.global_cooldown_ms
        {
            return Err(Suppression::GlobalCooldown);
        }
        let window_ms = window_ms.unwrap_or(self.default_window_ms);
        if let Some(last_tag) = self.last_by_tag.get(tag)
            && now_ms.saturating_sub(*last_tag) < window_ms
        {
            return Err(Suppression::TagWindow);
        }
        Ok(())
    }

    /// Admit the alert if allowed, recording timestamps and the visible lock.
    pub fn admit(&mut self, tag: &str, window_ms: Option<u64>, now_ms: u64) -> bool {
        match self.check(tag, window_ms, now_ms) {
            Ok(()) => {
                self.last_any_ms = Some(now_ms);
                self.last_by_tag.insert(tag.to_owned(), now_ms);
                self.visible_tag = Some(tag.to_owned());
                debug!(%tag, "alert admitted");
                true
            }
            Err(reason) => {
                trace!(%tag, ?reason, "alert suppressed");
                false
            }
        }
    }

    /// Dismiss the visible alert. Returns whether one was visible.
    pub fn dismiss(&mut self) -> bool {
        self.visible_tag.take().is_some()
    }

    pub fn visible_tag(&self) -> Option<&str> {
        self.visible_tag.as_deref()
    }

    pub fn is_visible(&self) -> bool {
        self.visible_tag.is_some()
    }
}

impl Default for NotificationGuard {
    fn default() -> Self {
        Self::new(1_800, 400)
    }
}
