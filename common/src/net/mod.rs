//! Network primitives for the exchange.
//!
//! TCP handles the order-entry path (gateway to clients); UDP multicast
//! carries the public market-data feed.

pub mod multicast;
pub mod tcp;

pub use multicast::MulticastSocket;
pub use tcp::{TcpServer, TcpSocket};
