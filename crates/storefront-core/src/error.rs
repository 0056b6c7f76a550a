use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used for user-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Undecodable or truncated wire data.
    Transport,
    /// Local precondition failure (empty cart, nothing selected, bad input).
    Validation,
    /// Business failure reported by the server.
    Server,
    /// No reply arrived before the watchdog fired.
    Timeout,
    /// Server did not understand the request variant.
    Protocol,
    /// Engine bug or invariant break.
    Internal,
}

/// Stable engine error payload surfaced to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct EngineError {
    /// High-level error category.
    pub category: ErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl EngineError {
    /// Construct a new engine error.
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a local validation error. These never reach the server.
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, code, message)
    }

    /// Build an error from a server reply, classifying its optional code.
    pub fn from_server(code: Option<&str>, message: Option<&str>) -> Self {
        let message = message.map(str::trim).unwrap_or_default();
        match code.map(str::trim).filter(|code| !code.is_empty()) {
            Some(code) => Self::new(
                classify_server_code(code),
                code.to_ascii_uppercase(),
                friendly_message(code, message),
            ),
            None if is_unsupported_operation(message) => {
                Self::new(ErrorCategory::Protocol, "UNSUPPORTED", message)
            }
            None => Self::new(
                ErrorCategory::Server,
                "SERVER_ERROR",
                friendly_message("", message),
            ),
        }
    }

    /// Whether the failure text indicates the server does not know the request type.
    pub fn is_unsupported(&self) -> bool {
        self.category == ErrorCategory::Protocol || is_unsupported_operation(&self.message)
    }
}

/// Errors produced while framing or decoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A line was not valid JSON or did not match the expected schema.
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    /// An outgoing request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),
    /// The decoded JSON value was not an object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// The message object had no string `type` field.
    #[error("message has no `type` field")]
    MissingType,
}

/// Map server error codes to engine error categories.
pub fn classify_server_code(code: &str) -> ErrorCategory {
    match code.trim().to_ascii_uppercase().as_str() {
        "UNKNOWN_TYPE" | "UNSUPPORTED" | "UNKNOWN_MESSAGE_TYPE" => ErrorCategory::Protocol,
        "TIMEOUT" => ErrorCategory::Timeout,
        "INVALID_JSON" => ErrorCategory::Transport,
        "CART_EMPTY" | "EMPTY_CART" | "INVALID_QUANTITY" | "INVALID_REQUEST" => {
            ErrorCategory::Validation
        }
        _ => ErrorCategory::Server,
    }
}

/// Friendly text for a server error code, falling back to the server's own text.
pub fn friendly_message(code: &str, fallback: &str) -> String {
    let mapped = match code.trim().to_ascii_uppercase().as_str() {
        "CART_EMPTY" | "EMPTY_CART" => Some("购物车为空"),
        "INSUFFICIENT_STOCK" | "STOCK_NOT_ENOUGH" | "OUT_OF_STOCK" => {
            Some("库存不足，请调整购买数量")
        }
        "NOT_LOGGED_IN" | "UNAUTHORIZED" => Some("请先登录"),
        "PRODUCT_NOT_FOUND" => Some("商品不存在或已下架"),
        "INVALID_QUANTITY" => Some("购买数量无效"),
        "ORDER_NOT_FOUND" => Some("订单不存在"),
        "INVALID_JSON" => Some("请求格式错误"),
        _ => None,
    };

    match mapped {
        Some(text) => text.to_owned(),
        None if !fallback.trim().is_empty() => fallback.trim().to_owned(),
        None => "操作失败，请稍后重试".to_owned(),
    }
}

/// Heuristic for "the server does not support this operation" replies.
pub fn is_unsupported_operation(text: &str) -> bool {
    const MARKERS: [&str; 6] = [
        "unknown message type",
        "unknown type",
        "unsupported",
        "not supported",
        "未知",
        "不支持",
    ];
    let lowered = text.to_lowercase();
    MARKERS.iter().any(|marker| lowered.contains(marker))
}
