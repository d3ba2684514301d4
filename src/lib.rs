// =============================================================================
// quote-stream — real-time quote subscription and distribution
// =============================================================================

pub mod auth;
pub mod config;
pub mod market_data;
pub mod provider;
pub mod stream;
pub mod types;

pub use auth::{AuthError, AuthProvider, StaticTokenAuth};
pub use config::{EndpointError, QuoteConfig};
pub use provider::{QuoteProvider, StreamView, SymbolSubscription};
pub use stream::{ConnectionManager, Connector, TransportError, WsConnector};
pub use types::{ConnectionStatus, Quote, StreamType};
