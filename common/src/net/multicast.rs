//! UDP multicast socket for market-data egress.
//!
//! A thin wrapper around socket2 configured for publishing: multicast
//! loopback off, TTL and outgoing interface configurable.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// A UDP multicast socket used by the market-data publisher.
pub struct MulticastSocket {
    socket: Socket,
}

impl MulticastSocket {
    /// Creates a new unbound multicast socket with loopback disabled.
    pub fn new() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        // We don't want to receive our own packets
        socket.set_multicast_loop_v4(false)?;

        Ok(Self { socket })
    }

    /// Sends a datagram to a multicast group.
    ///
    /// # Returns
    /// The number of bytes sent
    pub fn send_to(&self, data: &[u8], addr: &str, port: u16) -> io::Result<usize> {
        let dest_addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Invalid address"))?;

        let socket_addr = SocketAddr::V4(SocketAddrV4::new(dest_addr, port));
        self.socket.send_to(data, &socket_addr.into())
    }

    /// Sets the multicast TTL (1 = local network only).
    pub fn set_multicast_ttl(&self, ttl: u32) -> io::Result<()> {
        self.socket.set_multicast_ttl_v4(ttl)
    }

    /// Sets the outgoing interface for multicast packets.
    pub fn set_multicast_interface(&self, interface: &str) -> io::Result<()> {
        let interface_addr: Ipv4Addr = interface
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Invalid interface address"))?;

        self.socket.set_multicast_if_v4(&interface_addr)
    }

    /// Returns a reference to the underlying socket.
    pub fn socket(&self) -> &Socket {
        &self.socket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multicast_socket_new() {
        let socket = MulticastSocket::new();
        assert!(socket.is_ok());
    }

    #[test]
    fn test_multicast_ttl() {
        let socket = MulticastSocket::new().unwrap();
        assert!(socket.set_multicast_ttl(1).is_ok());
    }

    #[test]
    fn test_invalid_destination_address() {
        let socket = MulticastSocket::new().unwrap();
        assert!(socket.send_to(b"x", "not-an-ip", 5000).is_err());
    }

    #[test]
    fn test_send_to_group() {
        let socket = MulticastSocket::new().unwrap();
        socket.set_multicast_ttl(0).unwrap();
        // Sending to a multicast group needs no receiver
        let sent = socket.send_to(b"hello", "239.255.0.1", 5000).unwrap();
        assert_eq!(sent, 5);
    }
}
