// =============================================================================
// Subscription Tracker — reference-counted symbol interest
// =============================================================================
//
// Several consumers may watch the same symbol. Each subscribe increments the
// symbol's count and each unsubscribe decrements it; the feed only hears about
// the 0 -> 1 and 1 -> 0 transitions. One consumer going away therefore never
// silences a symbol another consumer still watches.
// =============================================================================

use std::collections::BTreeMap;

use parking_lot::Mutex;

/// Outcome of a subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscribed {
    /// First interest in the symbol; the feed must be told.
    First,
    /// Symbol already tracked; count incremented.
    Again,
}

/// Outcome of an unsubscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsubscribed {
    /// Last interest released; the feed must be told.
    Last,
    /// Other consumers still hold the symbol.
    Remaining(usize),
    /// The symbol was not tracked.
    NotTracked,
}

pub struct SubscriptionTracker {
    counts: Mutex<BTreeMap<String, usize>>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn add(&self, symbol: &str) -> Subscribed {
        let mut counts = self.counts.lock();
        let count = counts.entry(symbol.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            Subscribed::First
        } else {
            Subscribed::Again
        }
    }

    pub fn remove(&self, symbol: &str) -> Unsubscribed {
        let mut counts = self.counts.lock();
        match counts.get_mut(symbol) {
            None => Unsubscribed::NotTracked,
            Some(count) if *count <= 1 => {
                counts.remove(symbol);
                Unsubscribed::Last
            }
            Some(count) => {
                *count -= 1;
                Unsubscribed::Remaining(*count)
            }
        }
    }

    /// Tracked symbols in sorted order.
    pub fn symbols(&self) -> Vec<String> {
        self.counts.lock().keys().cloned().collect()
    }
}

impl Default for SubscriptionTracker {
    fn default() -> Self {
        Self::new()
    }
}
