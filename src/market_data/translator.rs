// =============================================================================
// Message Translator — stream wire frames to canonical quotes
// =============================================================================
//
// Each feed speaks its own shape:
//
//   esp   { "symbol": "EUR/USD", "price": "1.1000", "quantity": "1000000",
//           "entry_type": "0", "time_stamp": "1700000000000000" }
//   rfs   { "quote_data": { ...full Quote... } }
//   exec  { "execution_data": { ... } }
//   any   { "type": "pong" }
//
// Frames are decoded once, at the transport boundary, into `StreamMessage`.
// ESP ticks are partial (one side of the book at a time) and are merged into
// the previous quote; RFS snapshots replace it; executions never touch the
// store.
// =============================================================================

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::market_data::QuoteStore;
use crate::types::{now_ms, Quote, StreamType};

/// A frame that could not be turned into a stream message.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("invalid value for field {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Which side of the book an ESP tick updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySide {
    Bid,
    Ask,
}

/// One incremental ESP price update.
#[derive(Debug, Clone, PartialEq)]
pub struct EspTick {
    pub symbol: String,
    pub price: f64,
    pub quantity: u64,
    pub side: EntrySide,
    /// Milliseconds, converted from the wire's microseconds.
    pub timestamp_ms: Option<i64>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Keepalive acknowledgement.
    Pong,
    Esp(EspTick),
    Rfs(Quote),
    Exec(Value),
    /// Well-formed but not meaningful for the current stream.
    Ignored,
}

/// What applying a message did.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Quote(Quote),
    Execution(Value),
    Nothing,
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a text frame received on a `stream` connection.
pub fn decode(stream: StreamType, text: &str) -> Result<StreamMessage, TranslateError> {
    let root: Value = serde_json::from_str(text)?;
    if !root.is_object() {
        return Err(TranslateError::NotAnObject);
    }

    if root.get("type").and_then(Value::as_str) == Some("pong") {
        return Ok(StreamMessage::Pong);
    }

    match stream {
        StreamType::Esp if has_value(&root, "symbol") => parse_esp_tick(&root).map(StreamMessage::Esp),
        StreamType::Rfs if has_value(&root, "quote_data") => {
            let quote: Quote = serde_json::from_value(root["quote_data"].clone())?;
            Ok(StreamMessage::Rfs(quote))
        }
        StreamType::Exec if has_value(&root, "execution_data") => {
            Ok(StreamMessage::Exec(root["execution_data"].clone()))
        }
        _ => Ok(StreamMessage::Ignored),
    }
}

fn has_value(root: &Value, field: &str) -> bool {
    root.get(field).map_or(false, |v| !v.is_null())
}

/// Parse an ESP tick.
///
/// Numeric fields may arrive as JSON numbers or as strings.
fn parse_esp_tick(root: &Value) -> Result<EspTick, TranslateError> {
    let symbol = root["symbol"]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or(TranslateError::MissingField("symbol"))?
        .to_string();

    let price = number_field(root, "price")?.ok_or(TranslateError::MissingField("price"))?;
    if !price.is_finite() || price < 0.0 {
        return Err(TranslateError::InvalidField {
            field: "price",
            value: price.to_string(),
        });
    }

    let quantity = number_field(root, "quantity")?
        .map(|q| if q > 0.0 { q.trunc() as u64 } else { 0 })
        .unwrap_or(0);

    let side = match &root["entry_type"] {
        Value::String(s) if s.trim() == "0" => EntrySide::Bid,
        Value::String(s) if s.trim() == "1" => EntrySide::Ask,
        Value::Number(n) if n.as_u64() == Some(0) => EntrySide::Bid,
        Value::Number(n) if n.as_u64() == Some(1) => EntrySide::Ask,
        Value::Null => return Err(TranslateError::MissingField("entry_type")),
        other => {
            return Err(TranslateError::InvalidField {
                field: "entry_type",
                value: other.to_string(),
            })
        }
    };

    // Microseconds on the wire.
    let timestamp_ms = number_field(root, "time_stamp")?.map(|us| (us / 1_000.0).trunc() as i64);

    Ok(EspTick {
        symbol,
        price,
        quantity,
        side,
        timestamp_ms,
    })
}

/// Read a field that may be a JSON number or a numeric string.
fn number_field(root: &Value, field: &'static str) -> Result<Option<f64>, TranslateError> {
    match root.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| TranslateError::InvalidField {
                field,
                value: s.clone(),
            }),
        Some(other) => Err(TranslateError::InvalidField {
            field,
            value: other.to_string(),
        }),
    }
}

// =============================================================================
// Merging & applying
// =============================================================================

/// Merge an ESP tick into the previous quote for its symbol.
///
/// Only the ticked side changes; `last` always takes the tick price, volume
/// is replaced, and the session range widens to include the price. Change is
/// measured against the previous `last`.
pub fn merge_esp(previous: Option<&Quote>, tick: &EspTick) -> Quote {
    let timestamp = tick.timestamp_ms.unwrap_or_else(now_ms);
    let prev = previous
        .cloned()
        .unwrap_or_else(|| Quote::flat(tick.symbol.clone(), tick.price, timestamp));

    let change = tick.price - prev.last;
    let change_percent = if prev.last != 0.0 {
        (change / prev.last) * 100.0
    } else {
        0.0
    };

    let mut next = prev.clone();
    match tick.side {
        EntrySide::Bid => next.bid = tick.price,
        EntrySide::Ask => next.ask = tick.price,
    }
    next.last = tick.price;
    next.volume = tick.quantity;
    next.timestamp = timestamp;
    next.high = prev.high.max(tick.price);
    next.low = prev.low.min(tick.price);
    next.change = change;
    next.change_percent = change_percent;
    next
}

/// Apply a decoded message to the store.
pub fn apply(store: &QuoteStore, message: StreamMessage) -> Applied {
    match message {
        StreamMessage::Esp(tick) => {
            let quote = store.update_with(&tick.symbol, |prev| merge_esp(prev, &tick));
            debug!(symbol = %quote.symbol, bid = quote.bid, ask = quote.ask, "esp quote merged");
            Applied::Quote(quote)
        }
        StreamMessage::Rfs(quote) => {
            debug!(symbol = %quote.symbol, last = quote.last, "rfs quote stored");
            store.upsert(quote.clone());
            Applied::Quote(quote)
        }
        StreamMessage::Exec(execution) => {
            info!(execution = %execution, "execution received");
            Applied::Execution(execution)
        }
        StreamMessage::Pong => {
            debug!("pong received");
            Applied::Nothing
        }
        StreamMessage::Ignored => Applied::Nothing,
    }
}

// =============================================================================
// Tests
// =============================================================================
