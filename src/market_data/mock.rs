// =============================================================================
// Mock Quote Feed — synthetic quotes when no live feed is configured
// =============================================================================
//
// The generator produces a plausible quote per symbol: a uniform random base
// price on the first draw, a small random walk around the previous `last`
// afterwards. The feed ticks every subscribed symbol on a fixed interval and
// stops the moment it is told to (or the owning provider goes away).
//
// Every generated quote satisfies `low <= bid <= ask <= high` with `last`
// between bid and ask.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::market_data::{QuoteStore, SubscriptionTracker};
use crate::types::{now_ms, ConnectionStatus, Quote};

/// Spread as a fraction of price.
const SPREAD_FRACTION: f64 = 0.001;
/// Largest relative move of a single random-walk step.
const MAX_STEP_FRACTION: f64 = 0.01;
/// Smallest price the walk may reach.
const MIN_PRICE: f64 = 0.01;

// =============================================================================
// MockQuoteGenerator
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct MockQuoteGenerator;

impl MockQuoteGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate the next quote for `symbol` using the thread-local RNG.
    pub fn generate(&self, symbol: &str, previous: Option<&Quote>) -> Quote {
        let mut rng = rand::rng();
        self.generate_with(&mut rng, symbol, previous)
    }

    pub fn generate_with<R: Rng>(
        &self,
        rng: &mut R,
        symbol: &str,
        previous: Option<&Quote>,
    ) -> Quote {
        let (base, change, open, prev_high, prev_low) = match previous {
            Some(prev) if prev.last > 0.0 => {
                let step: f64 = rng.random_range(-MAX_STEP_FRACTION..MAX_STEP_FRACTION);
                let base = (prev.last * (1.0 + step)).max(MIN_PRICE);
                (base, base - prev.last, prev.open, prev.high, prev.low)
            }
            _ => {
                let base: f64 = rng.random_range(100.0..1100.0);
                let change: f64 = rng.random_range(-5.0..5.0);
                (base, change, base - change, f64::MIN, f64::MAX)
            }
        };

        let spread = base * SPREAD_FRACTION;
        let bid = base - spread / 2.0;
        let ask = base + spread / 2.0;

        let widen: f64 = rng.random_range(1.0..2.0);
        let reach = change.abs() * widen;
        let high = (base + reach).max(ask).max(prev_high);
        let low = (base - reach).max(0.0).min(bid).min(prev_low);

        let change_percent = if base - change != 0.0 {
            (change / (base - change)) * 100.0
        } else {
            0.0
        };

        Quote {
            symbol: symbol.to_string(),
            bid,
            ask,
            last: base,
            volume: rng.random_range(0..1_000_000),
            timestamp: now_ms(),
            change,
            change_percent,
            open,
            high,
            low,
            close: base,
        }
    }
}

// =============================================================================
// MockFeed
// =============================================================================

/// Periodic synthetic feed for every subscribed symbol.
pub struct MockFeed {
    generator: MockQuoteGenerator,
    tick_interval: Duration,
    store: Arc<QuoteStore>,
    subscriptions: Arc<SubscriptionTracker>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    status: watch::Sender<ConnectionStatus>,
}

impl MockFeed {
    pub fn new(
        tick_interval: Duration,
        store: Arc<QuoteStore>,
        subscriptions: Arc<SubscriptionTracker>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            generator: MockQuoteGenerator::new(),
            tick_interval,
            store,
            subscriptions,
            ticker: Mutex::new(None),
            status,
        }
    }

    /// Generate and store a quote for `symbol` immediately.
    pub fn seed(&self, symbol: &str) -> Quote {
        let generator = self.generator;
        self.store
            .update_with(symbol, |prev| generator.generate(symbol, prev))
    }

    /// Start ticking. Restarts the ticker if it is already running.
    pub fn start(&self) {
        let mut ticker = self.ticker.lock();
        if let Some(handle) = ticker.take() {
            handle.abort();
        }

        let generator = self.generator;
        let store = self.store.clone();
        let subscriptions = self.subscriptions.clone();
        let period = self.tick_interval;
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        *ticker = Some(tokio::spawn(async move {
            loop {
                interval.tick().await;
                let symbols = subscriptions.symbols();
                for symbol in &symbols {
                    store.update_with(symbol, |prev| generator.generate(symbol, prev));
                }
                debug!(count = symbols.len(), "mock quotes ticked");
            }
        }));

        self.status.send_replace(ConnectionStatus::Connected);
        info!(interval_ms = period.as_millis() as u64, "mock quote feed started");
    }

    /// Stop ticking. Safe to call when already stopped.
    pub fn stop(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
            info!("mock quote feed stopped");
        }
        self.status.send_replace(ConnectionStatus::Disconnected);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}

impl Drop for MockFeed {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.get_mut().take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
