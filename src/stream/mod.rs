pub mod connection;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::ConnectionManager;
pub use transport::{Connector, TransportError, WsConnector};
