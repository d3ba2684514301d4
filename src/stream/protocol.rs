// =============================================================================
// Client frames & close codes
// =============================================================================

use serde::Serialize;

/// Close code for a deliberate shutdown; never triggers a reconnect.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported when a close frame carries no status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Reported when the socket drops without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// JSON control frames sent to the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe { symbol: String },
    Unsubscribe { symbol: String },
    Ping,
}

impl ClientFrame {
    pub fn subscribe(symbol: impl Into<String>) -> Self {
        Self::Subscribe {
            symbol: symbol.into(),
        }
    }

    pub fn unsubscribe(symbol: impl Into<String>) -> Self {
        Self::Unsubscribe {
            symbol: symbol.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// `true` for closures that must not be followed by a reconnect.
pub fn is_normal_closure(code: Option<u16>) -> bool {
    code == Some(NORMAL_CLOSURE)
}
