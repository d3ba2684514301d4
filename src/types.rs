// =============================================================================
// Shared types used across the quote streaming layer
// =============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Latest known market snapshot for a single instrument.
///
/// A quote is replaced wholesale on every update; nothing mutates a stored
/// quote in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    #[serde(deserialize_with = "de::lenient_f64")]
    pub bid: f64,
    #[serde(deserialize_with = "de::lenient_f64")]
    pub ask: f64,
    #[serde(deserialize_with = "de::lenient_f64")]
    pub last: f64,
    #[serde(default, deserialize_with = "de::lenient_u64")]
    pub volume: u64,
    /// Epoch milliseconds. Fractional milliseconds are truncated.
    #[serde(deserialize_with = "de::lenient_i64")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub change: f64,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub change_percent: f64,
    #[serde(deserialize_with = "de::lenient_f64")]
    pub open: f64,
    #[serde(deserialize_with = "de::lenient_f64")]
    pub high: f64,
    #[serde(deserialize_with = "de::lenient_f64")]
    pub low: f64,
    #[serde(deserialize_with = "de::lenient_f64")]
    pub close: f64,
}

impl Quote {
    /// A flat quote where every price field equals `price`.
    pub fn flat(symbol: impl Into<String>, price: f64, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            bid: price,
            ask: price,
            last: price,
            volume: 0,
            timestamp,
            change: 0.0,
            change_percent: 0.0,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// Mid price between bid and ask.
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Spread in basis points of the mid, 0 when the mid is 0.
    pub fn spread_bps(&self) -> f64 {
        let mid = self.mid();
        if mid > 0.0 {
            ((self.ask - self.bid) / mid) * 10_000.0
        } else {
            0.0
        }
    }
}

/// Which logical feed the connection targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    /// Event-stream-price: incremental bid/ask ticks.
    Esp,
    /// Request-for-stream: full quote snapshots.
    Rfs,
    /// Execution confirmations.
    Exec,
}

impl StreamType {
    pub const ALL: [StreamType; 3] = [StreamType::Esp, StreamType::Rfs, StreamType::Exec];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Esp => "esp",
            Self::Rfs => "rfs",
            Self::Exec => "exec",
        }
    }
}

impl Default for StreamType {
    fn default() -> Self {
        Self::Esp
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "esp" => Ok(Self::Esp),
            "rfs" => Ok(Self::Rfs),
            "exec" => Ok(Self::Exec),
            other => Err(format!("unknown stream type: {other}")),
        }
    }
}

/// Connection lifecycle state as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// `true` while a transport is open or being opened.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connected | Self::Connecting)
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Current epoch time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Lenient numeric deserialisers (feeds send numbers as strings or numbers)
// =============================================================================

pub(crate) mod de {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Int(u64),
        Float(f64),
        Str(String),
    }

    /// Accept `123`, `123.9` or `"123"` and truncate to an unsigned integer.
    pub fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match NumOrString::deserialize(deserializer)? {
            NumOrString::Int(v) => Ok(v),
            NumOrString::Float(v) => Ok(if v.is_finite() && v > 0.0 { v as u64 } else { 0 }),
            NumOrString::Str(s) => {
                let s = s.trim();
                if let Ok(v) = s.parse::<u64>() {
                    return Ok(v);
                }
                s.parse::<f64>()
                    .map(|v| if v.is_finite() && v > 0.0 { v as u64 } else { 0 })
                    .map_err(serde::de::Error::custom)
            }
        }
    }

    /// Accept `1700000000123`, `1700000000123.456` or `"1700000000123"` and
    /// truncate toward zero.
    pub fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let truncate = |v: f64| -> Result<i64, D::Error> {
            if v.is_finite() {
                Ok(v.trunc() as i64)
            } else {
                Err(serde::de::Error::custom(format!("non-finite integer {v}")))
            }
        };
        match NumOrString::deserialize(deserializer)? {
            NumOrString::Int(v) => i64::try_from(v).map_err(serde::de::Error::custom),
            NumOrString::Float(v) => truncate(v),
            NumOrString::Str(s) => {
                let s = s.trim();
                if let Ok(v) = s.parse::<i64>() {
                    return Ok(v);
                }
                let v = s.parse::<f64>().map_err(serde::de::Error::custom)?;
                truncate(v)
            }
        }
    }

    /// Accept a JSON number or a numeric string.
    pub fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match NumOrString::deserialize(deserializer)? {
            NumOrString::Int(v) => Ok(v as f64),
            NumOrString::Float(v) => Ok(v),
            NumOrString::Str(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom),
        }
    }
}
