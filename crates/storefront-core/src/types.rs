use serde::{Deserialize, Serialize};

use crate::protocol::{CartLine, ChatEntry, ClientRequest, ProductSummary, SortMode};

/// Tunables for the reconciliation engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Logged-in identity; sent as `username` and used for chat filtering.
    pub username: Option<String>,
    /// Checkout watchdog.
    pub checkout_timeout_ms: u64,
    /// Delay before reloading the cart after a successful order.
    pub checkout_reload_delay_ms: u64,
    /// Delay before the authoritative reload that follows a clear-cart.
    pub clear_resync_delay_ms: u64,
    /// Window in which an identical snapshot is not rebuilt.
    pub snapshot_dedup_window_ms: u64,
    /// Undo window for destructive chat actions.
    pub undo_window_ms: u64,
    /// Minimum gap between any two alerts.
    pub alert_global_cooldown_ms: u64,
    /// Per-tag window when the call site does not choose one.
    pub alert_default_window_ms: u64,
    /// Catalog page size.
    pub page_size: u32,
    /// History size requested by `chat_init`.
    pub chat_history_limit: u16,
    /// Upper bound on retained chat messages.
    pub chat_max_items: usize,
    /// Start checkouts with the legacy whole-cart `checkout` request.
    pub legacy_checkout: bool,
    /// How long a tracked request may wait for its reply. Never shorter
    /// than the checkout watchdog.
    pub reply_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            username: None,
            checkout_timeout_ms: 3_500,
            checkout_reload_delay_ms: 300,
            clear_resync_delay_ms: 1_000,
            snapshot_dedup_window_ms: 800,
            undo_window_ms: 3_000,
            alert_global_cooldown_ms: 1_800,
            alert_default_window_ms: 400,
            page_size: 12,
            chat_history_limit: 50,
            chat_max_items: 500,
            legacy_checkout: false,
            reply_timeout_ms: 5_000,
        }
    }
}

/// User intent forwarded by the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Intent {
    /// Fetch cart, first catalog page and broadcast chat.
    Refresh,
    ReloadCart,
    SetQuantity { product_id: i64, quantity: u32 },
    RemoveLine { product_id: i64 },
    ClearCart,
    AddToCart { product_id: i64, quantity: u32 },
    /// Flip the checkbox of the cart row at `index`.
    ToggleLine { index: usize },
    SelectAll { selected: bool },
    Checkout,
    /// `None` selects the broadcast channel.
    SelectChatPeer { peer: Option<String> },
    SendChat { content: String },
    /// Delete history with a peer (`None` for broadcast), after an undo window.
    DeleteChatHistory { peer: Option<String> },
    UndoDelete,
    JumpToPage { page: u32 },
    SetSort { sort: SortMode },
    SetPageSize { size: u32 },
    /// Keyword search over the catalog; resets to the first page.
    Search { keyword: String },
    ClearSearch,
    ShowProduct { product_id: i64 },
    CloseProduct,
    DismissAlert,
}

impl Intent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
            Self::ReloadCart => "reload_cart",
            Self::SetQuantity { .. } => "set_quantity",
            Self::RemoveLine { .. } => "remove_line",
            Self::ClearCart => "clear_cart",
            Self::AddToCart { .. } => "add_to_cart",
            Self::ToggleLine { .. } => "toggle_line",
            Self::SelectAll { .. } => "select_all",
            Self::Checkout => "checkout",
            Self::SelectChatPeer { .. } => "select_chat_peer",
            Self::SendChat { .. } => "send_chat",
            Self::DeleteChatHistory { .. } => "delete_chat_history",
            Self::UndoDelete => "undo_delete",
            Self::JumpToPage { .. } => "jump_to_page",
            Self::SetSort { .. } => "set_sort",
            Self::SetPageSize { .. } => "set_page_size",
            Self::Search { .. } => "search",
            Self::ClearSearch => "clear_search",
            Self::ShowProduct { .. } => "show_product",
            Self::CloseProduct => "close_product",
            Self::DismissAlert => "dismiss_alert",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

/// User-visible alert admitted by the notification guard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alert {
    /// Stable dedup tag, for example `checkout_fail`.
    pub tag: String,
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(
        tag: impl Into<String>,
        level: AlertLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tag: tag.into(),
            level,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Side effect requested by one engine step.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Send(ClientRequest),
    Alert(Alert),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Event stream consumed by the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Snapshot(Box<EngineSnapshot>),
    Alert(Alert),
    Connection(ConnectionState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CartRowView {
    pub line: CartLine,
    pub selected: bool,
    pub subtotal: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CartView {
    pub rows: Vec<CartRowView>,
    /// Sum over selected rows at effective prices.
    pub total: f64,
    /// Same sum at list prices, for was/now display.
    pub original_total: f64,
    pub selected_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckoutView {
    pub in_flight: bool,
    pub used_new_protocol: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatView {
    pub self_identity: String,
    /// `None` is the broadcast channel.
    pub active_peer: Option<String>,
    pub online_peers: Vec<String>,
    pub messages: Vec<ChatEntry>,
    /// Peer whose history is scheduled for deletion (`Some("")` = broadcast).
    pub pending_delete: Option<String>,
    pub undo_visible: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CatalogView {
    pub products: Vec<ProductSummary>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u32,
    pub sort: SortMode,
    /// Active search keyword; `None` while browsing pages.
    pub query: Option<String>,
    /// Product shown in the detail panel.
    pub detail: Option<ProductSummary>,
}

/// Full reconciled state, rebuilt after every engine step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineSnapshot {
    pub cart: CartView,
    pub checkout: CheckoutView,
    pub chat: ChatView,
    pub catalog: CatalogView,
    pub alert_visible: bool,
}
