// =============================================================================
// Quote Provider — consumer-facing quote API
// =============================================================================
//
// One provider owns the quote store, the subscription tracker and exactly one
// feed: the live connection manager or, in mock mode, the synthetic ticker.
// Consumers subscribe by symbol, read quotes from the store, and observe
// updates, connection status and executions through channels.
//
// Dropping the provider shuts the feed down: no task, timer or transport
// outlives it.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::auth::AuthProvider;
use crate::config::QuoteConfig;
use crate::market_data::subscriptions::{Subscribed, Unsubscribed};
use crate::market_data::{MockFeed, QuoteStore, SubscriptionTracker};
use crate::stream::{ConnectionManager, Connector};
use crate::types::{ConnectionStatus, Quote, StreamType};

/// Stream selection and connection state, read together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamView {
    pub stream_type: StreamType,
    pub is_connected: bool,
    pub status: ConnectionStatus,
}

enum Feed {
    Live(ConnectionManager),
    Mock {
        feed: MockFeed,
        stream_type: Mutex<StreamType>,
        /// Never fed; keeps `executions()` uniform across modes.
        executions: broadcast::Sender<Value>,
    },
}

pub struct QuoteProvider {
    store: Arc<QuoteStore>,
    subscriptions: Arc<SubscriptionTracker>,
    auth: Arc<dyn AuthProvider>,
    auto_connect: bool,
    feed: Feed,
}

impl QuoteProvider {
    /// Build a provider. `config.mock_mode` selects the synthetic feed and the
    /// connector is left unused.
    pub fn new(
        config: QuoteConfig,
        auth: Arc<dyn AuthProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let store = Arc::new(QuoteStore::new());
        let subscriptions = Arc::new(SubscriptionTracker::new());
        let auto_connect = config.auto_connect;

        let feed = if config.mock_mode {
            info!(interval_ms = config.mock_tick_interval_ms, "quote provider in mock mode");
            let (executions, _) = broadcast::channel(1);
            Feed::Mock {
                feed: MockFeed::new(
                    config.mock_tick_interval(),
                    store.clone(),
                    subscriptions.clone(),
                ),
                stream_type: Mutex::new(config.default_stream_type),
                executions,
            }
        } else {
            Feed::Live(ConnectionManager::new(
                config,
                auth.clone(),
                connector,
                store.clone(),
                subscriptions.clone(),
            ))
        };

        Self {
            store,
            subscriptions,
            auth,
            auto_connect,
            feed,
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Bring the feed up: connect when auto-connect is on and the session is
    /// authenticated, or start the mock ticker.
    pub fn start(&self) {
        match &self.feed {
            Feed::Live(manager) => {
                if self.auto_connect && self.auth.is_authenticated() {
                    manager.connect();
                } else {
                    info!(
                        auto_connect = self.auto_connect,
                        authenticated = self.auth.is_authenticated(),
                        "quote provider started without connecting"
                    );
                }
            }
            Feed::Mock { feed, .. } => feed.start(),
        }
    }

    pub fn on_auth_changed(&self, authenticated: bool) {
        match &self.feed {
            Feed::Live(manager) => manager.on_auth_changed(authenticated),
            Feed::Mock { .. } => debug!(authenticated, "auth change ignored in mock mode"),
        }
    }

    /// Stop the feed and release every task, timer and transport.
    pub fn shutdown(&self) {
        match &self.feed {
            Feed::Live(manager) => manager.disconnect(),
            Feed::Mock { feed, .. } => feed.stop(),
        }
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Register interest in `symbol`. Safe to repeat; each call must be paired
    /// with an unsubscribe.
    pub fn subscribe_to_symbol(&self, symbol: &str) {
        match &self.feed {
            Feed::Live(manager) => {
                manager.subscribe(symbol);
            }
            Feed::Mock { feed, .. } => {
                if self.subscriptions.add(symbol) == Subscribed::First {
                    let quote = feed.seed(symbol);
                    debug!(symbol = %symbol, last = quote.last, "mock quote seeded");
                }
            }
        }
    }

    /// Release interest in `symbol`. The stored quote is kept.
    pub fn unsubscribe_from_symbol(&self, symbol: &str) {
        let outcome = match &self.feed {
            Feed::Live(manager) => manager.unsubscribe(symbol),
            Feed::Mock { .. } => self.subscriptions.remove(symbol),
        };
        if outcome == Unsubscribed::NotTracked {
            debug!(symbol = %symbol, "unsubscribe for untracked symbol");
        }
    }

    /// Subscribe to a set of symbols for as long as the returned guard lives.
    pub fn subscribe_symbols<S: AsRef<str>>(&self, symbols: &[S]) -> SymbolSubscription<'_> {
        let mut guard = SymbolSubscription {
            provider: self,
            symbols: Vec::new(),
            key: String::new(),
        };
        guard.set_symbols(symbols);
        guard
    }

    /// Symbols with at least one subscriber, sorted.
    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.subscriptions.symbols()
    }

    // -------------------------------------------------------------------------
    // Quotes
    // -------------------------------------------------------------------------

    pub fn get_quote(&self, symbol: &str) -> Option<Quote> {
        self.store.get(symbol)
    }

    /// Write a quote straight into the store.
    pub fn update_quote(&self, quote: Quote) {
        self.store.upsert(quote);
    }

    pub fn quotes(&self) -> HashMap<String, Quote> {
        self.store.snapshot()
    }

    /// Every quote written to the store from now on.
    pub fn updates(&self) -> broadcast::Receiver<Quote> {
        self.store.subscribe_updates()
    }

    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------

    pub fn connection_status(&self) -> ConnectionStatus {
        match &self.feed {
            Feed::Live(manager) => manager.status(),
            Feed::Mock { feed, .. } => feed.status(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status().is_connected()
    }

    pub fn reconnect(&self) {
        match &self.feed {
            Feed::Live(manager) => manager.reconnect(),
            Feed::Mock { feed, .. } => {
                feed.stop();
                feed.start();
            }
        }
    }

    pub fn stream_type(&self) -> StreamType {
        match &self.feed {
            Feed::Live(manager) => manager.stream_type(),
            Feed::Mock { stream_type, .. } => *stream_type.lock(),
        }
    }

    /// Switch feeds. Bursts of switches collapse into one reconnect.
    pub fn set_stream_type(&self, stream_type: StreamType) {
        match &self.feed {
            Feed::Live(manager) => manager.set_stream_type(stream_type),
            Feed::Mock {
                stream_type: current,
                ..
            } => *current.lock() = stream_type,
        }
    }

    pub fn stream_view(&self) -> StreamView {
        let status = self.connection_status();
        StreamView {
            stream_type: self.stream_type(),
            is_connected: status.is_connected(),
            status,
        }
    }

    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        match &self.feed {
            Feed::Live(manager) => manager.status_changes(),
            Feed::Mock { feed, .. } => feed.status_changes(),
        }
    }

    /// Raw execution payloads from the exec stream.
    pub fn executions(&self) -> broadcast::Receiver<Value> {
        match &self.feed {
            Feed::Live(manager) => manager.executions(),
            Feed::Mock { executions, .. } => executions.subscribe(),
        }
    }
}

impl Drop for QuoteProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// SymbolSubscription
// =============================================================================

/// Interest in a list of symbols, held until dropped.
///
/// The list is keyed by its joined form; `set_symbols` with a different list
/// unsubscribes what was removed and subscribes what was added.
pub struct SymbolSubscription<'a> {
    provider: &'a QuoteProvider,
    symbols: Vec<String>,
    key: String,
}

impl SymbolSubscription<'_> {
    pub fn set_symbols<S: AsRef<str>>(&mut self, symbols: &[S]) {
        let mut next: Vec<String> = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let symbol = symbol.as_ref();
            if !next.iter().any(|s| s == symbol) {
                next.push(symbol.to_string());
            }
        }

        let key = next.join(",");
        if key == self.key {
            return;
        }

        for removed in self.symbols.iter().filter(|s| !next.contains(*s)) {
            self.provider.unsubscribe_from_symbol(removed);
        }
        for added in next.iter().filter(|s| !self.symbols.contains(*s)) {
            self.provider.subscribe_to_symbol(added);
        }

        self.symbols = next;
        self.key = key;
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Current quotes for the held symbols that have one.
    pub fn quotes(&self) -> HashMap<String, Quote> {
        self.symbols
            .iter()
            .filter_map(|s| self.provider.get_quote(s).map(|q| (s.clone(), q)))
            .collect()
    }
}

impl Drop for SymbolSubscription<'_> {
    fn drop(&mut self) {
        for symbol in &self.symbols {
            self.provider.unsubscribe_from_symbol(symbol);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
