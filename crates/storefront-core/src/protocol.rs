//! Wire messages exchanged with the storefront server.
//!
//! Every message is one JSON object with a `type` discriminator. Field names
//! are snake_case on the wire; camelCase spellings are accepted on input.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::ProtocolError;

const UNKNOWN_STOCK: i64 = -1;

fn unknown_stock() -> i64 {
    UNKNOWN_STOCK
}

/// One row of the shopping cart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartLine {
    #[serde(alias = "productId")]
    pub product_id: i64,
    #[serde(default)]
    pub name: String,
    /// List price per unit.
    #[serde(default, alias = "unitPrice", alias = "listPrice")]
    pub price: f64,
    #[serde(default, alias = "discountPrice")]
    pub discount_price: Option<f64>,
    #[serde(default, alias = "onSale")]
    pub on_sale: bool,
    #[serde(default)]
    pub quantity: u32,
    /// Remaining stock; negative means unknown.
    #[serde(default = "unknown_stock")]
    pub stock: i64,
}

impl CartLine {
    /// Price actually charged per unit.
    pub fn effective_price(&self) -> f64 {
        match self.discount_price {
            Some(discount) if self.on_sale && discount > 0.0 && discount < self.price => discount,
            _ => self.price,
        }
    }

    /// Stock cap, when the server reported one.
    pub fn stock_limit(&self) -> Option<u32> {
        u32::try_from(self.stock).ok()
    }

    pub fn subtotal(&self) -> f64 {
        self.effective_price() * f64::from(self.quantity)
    }

    pub fn original_subtotal(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

/// Product row returned by catalog pages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductSummary {
    #[serde(alias = "productId")]
    pub product_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default, alias = "discountPrice")]
    pub discount_price: Option<f64>,
    #[serde(default, alias = "onSale")]
    pub on_sale: bool,
    #[serde(default = "unknown_stock")]
    pub stock: i64,
    #[serde(default)]
    pub sales: u64,
}

/// Chat message as stored and relayed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatEntry {
    #[serde(default, alias = "fromUser")]
    pub from: String,
    /// Recipient; empty for broadcast.
    #[serde(default, alias = "toUser", deserialize_with = "nullable_string")]
    pub to: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "createdAt", deserialize_with = "nullable_string")]
    pub created_at: String,
}

/// `(product_id, quantity)` pair carried by `create_order`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderItem {
    #[serde(alias = "productId")]
    pub product_id: i64,
    pub quantity: u32,
}

/// Product listing order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    Default,
    PriceAsc,
    PriceDesc,
    Sales,
    Newest,
}

/// Requests written to the server socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    GetCart,
    SetCartQuantity {
        product_id: i64,
        quantity: u32,
    },
    RemoveFromCart {
        product_id: i64,
    },
    AddToCart {
        product_id: i64,
        quantity: u32,
    },
    ClearCart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    CreateOrder {
        items: Vec<OrderItem>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    /// Legacy whole-cart checkout.
    Checkout {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    ChatInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
        limit: u16,
    },
    ChatSend {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        content: String,
    },
    /// Delete history with `peer`; an empty peer targets the broadcast channel.
    ChatDelete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        peer: String,
    },
    GetProducts {
        page: u32,
        size: u32,
        sort: SortMode,
    },
    /// Keyword search; the server answers with the full match list.
    Search {
        keyword: String,
    },
    GetProductDetail {
        product_id: i64,
    },
}

impl ClientRequest {
    /// Wire `type` string, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GetCart => "get_cart",
            Self::SetCartQuantity { .. } => "set_cart_quantity",
            Self::RemoveFromCart { .. } => "remove_from_cart",
            Self::AddToCart { .. } => "add_to_cart",
            Self::ClearCart { .. } => "clear_cart",
            Self::CreateOrder { .. } => "create_order",
            Self::Checkout { .. } => "checkout",
            Self::ChatInit { .. } => "chat_init",
            Self::ChatSend { .. } => "chat_send",
            Self::ChatDelete { .. } => "chat_delete",
            Self::GetProducts { .. } => "get_products",
            Self::Search { .. } => "search",
            Self::GetProductDetail { .. } => "get_product_detail",
        }
    }

    /// Reply kind this request is paired with by convention, if it expects one.
    ///
    /// Requests without a direct reply are reconciled through later snapshots.
    pub fn expected_reply(&self) -> Option<MessageKind> {
        match self {
            Self::ClearCart { .. } => Some(MessageKind::ClearCartResponse),
            Self::CreateOrder { .. } => Some(MessageKind::OrderResponse),
            Self::Checkout { .. } => Some(MessageKind::CheckoutResponse),
            Self::ChatDelete { .. } => Some(MessageKind::ChatDeleteResponse),
            Self::AddToCart { .. } => Some(MessageKind::AddToCartResponse),
            Self::GetCart
            | Self::SetCartQuantity { .. }
            | Self::RemoveFromCart { .. }
            | Self::ChatInit { .. }
            | Self::ChatSend { .. }
            | Self::GetProducts { .. }
            | Self::Search { .. }
            | Self::GetProductDetail { .. } => None,
        }
    }

    /// Request-specific correlation context (target peer or product).
    pub fn target(&self) -> Option<String> {
        match self {
            Self::ChatDelete { peer, .. } => Some(peer.clone()),
            Self::AddToCart { product_id, .. } => Some(product_id.to_string()),
            _ => None,
        }
    }
}

/// Generic `{success, message}` acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Ack {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CartSnapshot {
    #[serde(default)]
    pub items: Vec<CartLine>,
}

/// Order identifier; servers have sent both numbers and strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OrderId {
    Number(i64),
    Text(String),
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OrderResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "orderId")]
    pub order_id: Option<OrderId>,
    #[serde(default, deserialize_with = "lenient_code")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChatInitResponse {
    #[serde(default)]
    pub messages: Vec<ChatEntry>,
    #[serde(default, alias = "onlineUsers")]
    pub online_users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChatDeleteResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub deleted: u64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Presence change; only used as a refetch trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PresenceUpdate {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "onlineUsers")]
    pub online_users: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProductsPage {
    #[serde(default)]
    pub products: Vec<ProductSummary>,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SearchResults {
    #[serde(default)]
    pub results: Vec<ProductSummary>,
}

/// `product_detail`; the server may send `null` when the catalog is empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProductDetail {
    #[serde(default)]
    pub product: Option<ProductSummary>,
}

/// Generic `error` message, not tied to any request on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ServerError {
    #[serde(default, deserialize_with = "lenient_code")]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Discriminant of [`ServerMessage`], used for routing and correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    CartSnapshot,
    ClearCartResponse,
    AddToCartResponse,
    OrderResponse,
    CheckoutResponse,
    ChatInitResponse,
    ChatMessage,
    ChatDeleteResponse,
    Presence,
    ProductsResponse,
    SearchResults,
    ProductDetail,
    Error,
    Unknown,
}

/// Decoded server message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// `cart_items` or `cart_response`.
    CartSnapshot(CartSnapshot),
    ClearCartResponse(Ack),
    AddToCartResponse(Ack),
    OrderResponse(OrderResponse),
    /// Legacy checkout reply.
    CheckoutResponse(Ack),
    ChatInitResponse(ChatInitResponse),
    ChatMessage(ChatEntry),
    ChatDeleteResponse(ChatDeleteResponse),
    /// `presence`, `user_online` or `user_offline`.
    Presence(PresenceUpdate),
    ProductsResponse(ProductsPage),
    SearchResults(SearchResults),
    ProductDetail(ProductDetail),
    Error(ServerError),
    /// A `type` this client does not know; kept for forward compatibility.
    Unknown { kind: String },
}

impl ServerMessage {
    /// Decode one JSON value into a typed message.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        if !value.is_object() {
            return Err(ProtocolError::NotAnObject);
        }
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_owned();

        let message = match kind.as_str() {
            "cart_items" | "cart_response" => Self::CartSnapshot(payload(value)?),
            "clear_cart_response" => Self::ClearCartResponse(payload(value)?),
            "add_to_cart_response" => Self::AddToCartResponse(payload(value)?),
            "order_response" => Self::OrderResponse(payload(value)?),
            "checkout_response" => Self::CheckoutResponse(payload(value)?),
            "chat_init_response" => Self::ChatInitResponse(payload(value)?),
            "chat_message" => Self::ChatMessage(payload(value)?),
            "chat_delete_response" => Self::ChatDeleteResponse(payload(value)?),
            "presence" | "user_online" | "user_offline" => Self::Presence(payload(value)?),
            "products_response" => Self::ProductsResponse(payload(value)?),
            "search_results" => Self::SearchResults(payload(value)?),
            "product_detail" => Self::ProductDetail(payload(value)?),
            "error" => Self::Error(payload(value)?),
            _ => Self::Unknown { kind },
        };
        Ok(message)
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::CartSnapshot(_) => MessageKind::CartSnapshot,
            Self::ClearCartResponse(_) => MessageKind::ClearCartResponse,
            Self::AddToCartResponse(_) => MessageKind::AddToCartResponse,
            Self::OrderResponse(_) => MessageKind::OrderResponse,
            Self::CheckoutResponse(_) => MessageKind::CheckoutResponse,
            Self::ChatInitResponse(_) => MessageKind::ChatInitResponse,
            Self::ChatMessage(_) => MessageKind::ChatMessage,
            Self::ChatDeleteResponse(_) => MessageKind::ChatDeleteResponse,
            Self::Presence(_) => MessageKind::Presence,
            Self::ProductsResponse(_) => MessageKind::ProductsResponse,
            Self::SearchResults(_) => MessageKind::SearchResults,
            Self::ProductDetail(_) => MessageKind::ProductDetail,
            Self::Error(_) => MessageKind::Error,
            Self::Unknown { .. } => MessageKind::Unknown,
        }
    }
}

fn payload<T: DeserializeOwned>(value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(ProtocolError::Decode)
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept error codes sent either as strings or as numbers.
fn lenient_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(code)) => Some(code),
        Some(Value::Number(code)) => Some(code.to_string()),
        _ => None,
    })
}
