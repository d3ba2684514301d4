pub mod mock;
pub mod store;
pub mod subscriptions;
pub mod translator;

pub use mock::{MockFeed, MockQuoteGenerator};
pub use store::QuoteStore;
pub use subscriptions::SubscriptionTracker;
