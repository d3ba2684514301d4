// =============================================================================
// Quote Store — latest snapshot per symbol
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::types::Quote;

/// Capacity of the update fan-out channel. Slow receivers lag, they never
/// block writers.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Latest quote per symbol, shared by the feed (writer) and consumers
/// (readers).
pub struct QuoteStore {
    quotes: RwLock<HashMap<String, Quote>>,
    /// Incremented on every write; consumers poll it to detect changes.
    version: AtomicU64,
    updates: broadcast::Sender<Quote>,
}

impl QuoteStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            quotes: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
            updates,
        }
    }

    /// Replace the stored quote for `quote.symbol`.
    pub fn upsert(&self, quote: Quote) {
        self.quotes
            .write()
            .insert(quote.symbol.clone(), quote.clone());
        self.version.fetch_add(1, Ordering::Relaxed);
        // No receivers is fine.
        let _ = self.updates.send(quote);
    }

    /// Read-modify-write for a single symbol under one write lock, so that
    /// incremental merges never interleave for the same symbol.
    pub fn update_with<F>(&self, symbol: &str, f: F) -> Quote
    where
        F: FnOnce(Option<&Quote>) -> Quote,
    {
        let updated = {
            let mut quotes = self.quotes.write();
            let next = f(quotes.get(symbol));
            quotes.insert(next.symbol.clone(), next.clone());
            next
        };
        self.version.fetch_add(1, Ordering::Relaxed);
        let _ = self.updates.send(updated.clone());
        updated
    }

    pub fn get(&self, symbol: &str) -> Option<Quote> {
        self.quotes.read().get(symbol).cloned()
    }

    /// Clone of every stored quote.
    pub fn snapshot(&self) -> HashMap<String, Quote> {
        self.quotes.read().clone()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Receive every quote written from now on.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<Quote> {
        self.updates.subscribe()
    }
}

impl Default for QuoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_and_bumps_version() {
        let store = QuoteStore::new();
        assert!(store.get("EUR/USD").is_none());
        assert_eq!(store.version(), 0);

        store.upsert(Quote::flat("EUR/USD", 1.10, 1));
        store.upsert(Quote::flat("EUR/USD", 1.11, 2));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("EUR/USD").unwrap().last, 1.11);
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn update_with_sees_previous_value() {
        let store = QuoteStore::new();
        store.upsert(Quote::flat("GBP/USD", 1.25, 1));

        let out = store.update_with("GBP/USD", |prev| {
            let mut q = prev.cloned().unwrap();
            q.bid = 1.24;
            q
        });

        assert_eq!(out.bid, 1.24);
        assert_eq!(store.get("GBP/USD").unwrap().bid, 1.24);
    }

    #[tokio::test]
    async fn writes_are_broadcast() {
        let store = QuoteStore::new();
        let mut rx = store.subscribe_updates();
        store.upsert(Quote::flat("USD/JPY", 150.0, 1));
        let q = rx.recv().await.unwrap();
        assert_eq!(q.symbol, "USD/JPY");
    }
}
