mod bridge;
mod connector;
mod error;
mod process;
mod transport;

pub use bridge::Bridge;
pub use connector::BridgeConnector;
pub use error::{Result, TransportError};
pub use transport::{Transport, TransportConnector};
