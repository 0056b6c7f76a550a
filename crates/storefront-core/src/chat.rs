//! Chat session tracking: active channel, inbound filtering, online peers,
//! and undoable history deletion.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info, trace};

use crate::{
    pending::PendingAction,
    protocol::{ChatDeleteResponse, ChatEntry, ChatInitResponse, ClientRequest, PresenceUpdate},
    reconcile::{Signature, SnapshotGate, SnapshotOutcome},
    types::ChatView,
};

/// Conversation the user is looking at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChatScope {
    #[default]
    Broadcast,
    Peer(String),
}

impl ChatScope {
    /// Peer name as carried by `chat_init`/`chat_delete`; empty for broadcast.
    pub fn wire_peer(&self) -> &str {
        match self {
            Self::Broadcast => "",
            Self::Peer(peer) => peer,
        }
    }

    pub fn peer(&self) -> Option<&str> {
        match self {
            Self::Broadcast => None,
            Self::Peer(peer) => Some(peer),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatTracker {
    self_identity: String,
    active: ChatScope,
    online_peers: Vec<String>,
    history: VecDeque<ChatEntry>,
    history_limit: u16,
    max_items: usize,
    gate: SnapshotGate,
    pending_delete: PendingAction<ChatScope>,
}

impl ChatTracker {
    pub fn new(
        self_identity: Option<String>,
        history_limit: u16,
        max_items: usize,
        dedup_window_ms: u64,
        undo_window_ms: u64,
    ) -> Self {
        Self {
            self_identity: self_identity.unwrap_or_default(),
            active: ChatScope::Broadcast,
            online_peers: Vec::new(),
            history: VecDeque::new(),
            history_limit,
            max_items,
            gate: SnapshotGate::new(dedup_window_ms),
            pending_delete: PendingAction::new(undo_window_ms),
        }
    }

    pub fn active(&self) -> &ChatScope {
        &self.active
    }

    pub fn history(&self) -> impl Iterator<Item = &ChatEntry> {
        self.history.iter()
    }

    pub fn online_peers(&self) -> &[String] {
        &self.online_peers
    }

    /// Switch channel. Clears local history and returns the scoped fetch.
    ///
    /// Selecting oneself or a blank name falls back to broadcast.
    pub fn select(&mut self, peer: Option<String>) -> ClientRequest {
        let scope = match peer.map(|peer| peer.trim().to_owned()) {
            Some(peer) if !peer.is_empty() && peer != self.self_identity => ChatScope::Peer(peer),
            _ => ChatScope::Broadcast,
        };
        debug!(peer = scope.wire_peer(), "chat scope selected");
        self.active = scope;
        self.history.clear();
        self.gate.reset();
        self.init_request()
    }

    /// History fetch for the active scope.
    pub fn init_request(&self) -> ClientRequest {
        ClientRequest::ChatInit {
            username: self.username(),
            peer: self.active.peer().map(str::to_owned),
            limit: self.history_limit,
        }
    }

    /// Whether `entry` belongs to the active conversation.
    pub fn accepts(&self, entry: &ChatEntry) -> bool {
        match &self.active {
            ChatScope::Broadcast => entry.to.is_empty(),
            ChatScope::Peer(peer) => {
                (entry.from == self.self_identity && entry.to == *peer)
                    || (entry.from == *peer && entry.to == self.self_identity)
            }
        }
    }

    /// Append a relayed message if it belongs to the active conversation.
    pub fn on_message(&mut self, entry: ChatEntry) -> bool {
        if !self.accepts(&entry) {
            trace!(from = %entry.from, to = %entry.to, "chat message outside active scope");
            return false;
        }
        self.history.push_back(entry);
        while self.history.len() > self.max_items {
            self.history.pop_front();
        }
        true
    }

    /// Apply a history snapshot and the online list it carries.
    pub fn on_init_response(&mut self, response: ChatInitResponse, now_ms: u64) -> SnapshotOutcome {
        self.set_online(response.online_users);

        let messages: Vec<ChatEntry> = response
            .messages
            .into_iter()
            .filter(|entry| self.accepts(entry))
            .collect();
        let outcome = self.gate.offer(messages.signature(), now_ms);
        if outcome == SnapshotOutcome::Applied {
            let skip = messages.len().saturating_sub(self.max_items);
            self.history = messages.into_iter().skip(skip).collect();
        }
        outcome
    }

    /// Presence changes trigger a full refetch of the active scope.
    pub fn on_presence(&mut self, update: PresenceUpdate) -> ClientRequest {
        if let Some(online) = update.online_users {
            self.set_online(online);
        }
        self.init_request()
    }

    /// Build a send request; blank content is a no-op.
    pub fn compose(&self, content: &str) -> Option<ClientRequest> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        Some(ClientRequest::ChatSend {
            username: self.username(),
            to: self.active.peer().map(str::to_owned),
            content: content.to_owned(),
        })
    }

    /// Schedule history deletion for `peer` (`None` = broadcast).
    pub fn request_delete(&mut self, peer: Option<String>, now_ms: u64) {
        let scope = match peer.map(|peer| peer.trim().to_owned()) {
            Some(peer) if !peer.is_empty() => ChatScope::Peer(peer),
            _ => ChatScope::Broadcast,
        };
        if let Some(replaced) = self.pending_delete.schedule(scope, now_ms) {
            debug!(peer = replaced.wire_peer(), "pending chat delete replaced");
        }
    }

    pub fn undo_delete(&mut self) -> bool {
        self.pending_delete.undo().is_some()
    }

    /// Emit the destructive request once the undo window has lapsed.
    pub fn poll_delete(&mut self, now_ms: u64) -> Option<ClientRequest> {
        let scope = self.pending_delete.poll(now_ms)?;
        info!(peer = scope.wire_peer(), "chat history delete committed");
        Some(ClientRequest::ChatDelete {
            username: self.username(),
            peer: scope.wire_peer().to_owned(),
        })
    }

    /// Server confirmed a deletion for `peer` (wire form, `""` = broadcast).
    pub fn on_delete_confirmed(&mut self, peer: &str, response: &ChatDeleteResponse) -> bool {
        if !response.success {
            return false;
        }
        debug!(peer, deleted = response.deleted, "chat history deleted");
        if peer == self.active.wire_peer() {
            self.history.clear();
            self.gate.reset();
        }
        true
    }

    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.pending_delete.deadline_ms()
    }

    pub fn view(&self) -> ChatView {
        ChatView {
            self_identity: self.self_identity.clone(),
            active_peer: self.active.peer().map(str::to_owned),
            online_peers: self.online_peers.clone(),
            messages: self.history.iter().cloned().collect(),
            pending_delete: self
                .pending_delete
                .target()
                .map(|scope| scope.wire_peer().to_owned()),
            undo_visible: self.pending_delete.undo_visible(),
        }
    }

    fn set_online(&mut self, online: Vec<String>) {
        let mut seen = HashSet::new();
        self.online_peers = online
            .into_iter()
            .filter(|user| !user.is_empty() && *user != self.self_identity)
            .filter(|user| seen.insert(user.clone()))
            .collect();
    }

    fn username(&self) -> Option<String> {
        (!self.self_identity.is_empty()).then(|| self.self_identity.clone())
    }
}
