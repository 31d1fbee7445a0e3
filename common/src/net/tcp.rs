//! Non-blocking TCP endpoint and readiness-polled server.
//!
//! A `TcpSocket` owns one non-blocking connection with fixed-capacity RX
//! and TX byte buffers; a `TcpServer` owns a listener plus all accepted
//! sockets, driven by an epoll/kqueue readiness loop with zero timeout.

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use crate::time::{now_nanos, Nanos};
use crate::{log_error, log_info};

/// Size of the per-connection send and receive buffers.
pub const TCP_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Token reserved for the listener socket.
const LISTENER: Token = Token(0);

/// One non-blocking TCP connection with pre-sized RX/TX buffers.
///
/// `rx_valid` counts the valid bytes at the front of the RX buffer. After
/// the consumer processes a prefix it calls `consume`, which shifts the
/// remainder to the front. Writes go through the TX buffer and are
/// flushed by the owning server's loop; `send` itself never blocks.
pub struct TcpSocket {
    stream: TcpStream,
    rx: Box<[u8]>,
    rx_valid: usize,
    tx: Vec<u8>,
    peer: SocketAddr,
    closed: bool,
}

impl TcpSocket {
    /// Connects a non-blocking client endpoint to a remote address.
    ///
    /// The connect completes asynchronously; queued TX bytes are held
    /// until the socket becomes writable.
    pub fn connect(addr: &str, port: u16) -> io::Result<Self> {
        let target: SocketAddr = format!("{}:{}", addr, port)
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid connect address"))?;

        let stream = TcpStream::connect(target)?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, target))
    }

    /// One non-blocking receive-then-flush cycle for a standalone
    /// endpoint (sockets owned by a `TcpServer` are driven by it
    /// instead). Returns whether any bytes were received.
    pub fn send_and_recv(&mut self) -> bool {
        let received = self.fill_rx();
        self.flush_tx();
        received > 0
    }

    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            // vec![0; N] allocates zeroed pages; nothing is touched until
            // data actually arrives
            rx: vec![0u8; TCP_BUFFER_SIZE].into_boxed_slice(),
            rx_valid: 0,
            tx: Vec::with_capacity(4096),
            peer,
            closed: false,
        }
    }

    /// The valid received bytes not yet consumed.
    #[inline]
    pub fn rx_data(&self) -> &[u8] {
        &self.rx[..self.rx_valid]
    }

    /// Discards a processed prefix of the RX buffer, compacting the
    /// remaining bytes to the front.
    pub fn consume(&mut self, len: usize) {
        debug_assert!(len <= self.rx_valid);
        self.rx.copy_within(len..self.rx_valid, 0);
        self.rx_valid -= len;
    }

    /// Appends bytes to the TX buffer. Never blocks.
    ///
    /// On overflow the payload is dropped and an error is logged; a TX
    /// buffer sized for peak load should never fill.
    pub fn send(&mut self, data: &[u8]) {
        if self.tx.len() + data.len() > TCP_BUFFER_SIZE {
            log_error!("<TcpSocket> TX buffer overflow on {}; {} bytes dropped", self.peer, data.len());
            return;
        }
        self.tx.extend_from_slice(data);
    }

    /// The remote address of this connection.
    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Drains the socket into the RX buffer until it would block.
    ///
    /// Returns the number of bytes received. Marks the socket closed on
    /// EOF or a hard error.
    fn fill_rx(&mut self) -> usize {
        let mut received = 0usize;
        loop {
            if self.rx_valid == self.rx.len() {
                // RX buffer full; the consumer must catch up first
                break;
            }
            match self.stream.read(&mut self.rx[self.rx_valid..]) {
                Ok(0) => {
                    self.closed = true;
                    break;
                }
                Ok(n) => {
                    self.rx_valid += n;
                    received += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log_error!("<TcpSocket> read error on {}: {}", self.peer, e);
                    self.closed = true;
                    break;
                }
            }
        }
        received
    }

    /// Writes pending TX bytes until the socket would block, keeping any
    /// unwritten remainder for the next flush.
    fn flush_tx(&mut self) {
        if self.tx.is_empty() {
            return;
        }

        let mut sent = 0usize;
        while sent < self.tx.len() {
            match self.stream.write(&self.tx[sent..]) {
                Ok(n) => sent += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Async connect still in flight; keep the bytes queued
                Err(ref e) if e.kind() == io::ErrorKind::NotConnected => break,
                Err(e) => {
                    log_error!("<TcpSocket> write error on {}: {}", self.peer, e);
                    self.closed = true;
                    break;
                }
            }
        }
        self.tx.drain(..sent);
    }
}

/// A TCP server: listener socket plus accepted connections, driven by an
/// OS readiness mechanism (epoll on Linux, kqueue on the BSDs, via mio).
///
/// `poll()` drains readiness events with a zero timeout, accepting new
/// connections and noting which sockets became readable.
/// `send_and_receive()` then receives on every readable socket, invoking
/// the receive callback per socket with the batch RX timestamp, and
/// finally flushes pending output on all connections.
pub struct TcpServer {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    conns: HashMap<Token, TcpSocket>,
    next_token: usize,
    readable: Vec<Token>,
    local_addr: SocketAddr,
}

impl TcpServer {
    /// Binds to the given interface address and port and starts listening.
    pub fn listen(iface: &str, port: u16) -> io::Result<Self> {
        let addr: SocketAddr = format!("{}:{}", iface, port)
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid listen address"))?;

        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(1024),
            listener,
            conns: HashMap::new(),
            next_token: 1,
            readable: Vec::new(),
            local_addr,
        })
    }

    /// The actual bound address (useful when listening on port 0).
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of accepted connections currently open.
    #[inline]
    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    /// Returns the connection registered under `token`, if still open.
    #[inline]
    pub fn conn_mut(&mut self, token: Token) -> Option<&mut TcpSocket> {
        self.conns.get_mut(&token)
    }

    /// Drains readiness events with zero timeout: accepts pending
    /// connections and marks sockets that became readable.
    pub fn poll(&mut self) {
        match self.poll.poll(&mut self.events, Some(Duration::ZERO)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return,
            Err(e) => {
                log_error!("<TcpServer> poll error: {}", e);
                return;
            }
        }

        let mut accept_pending = false;
        for event in self.events.iter() {
            match event.token() {
                LISTENER => accept_pending = true,
                token => {
                    if (event.is_readable() || event.is_read_closed())
                        && !self.readable.contains(&token)
                    {
                        self.readable.push(token);
                    }
                }
            }
        }

        if accept_pending {
            self.accept_connections();
        }
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        log_error!("<TcpServer> failed to set TCP_NODELAY on {}: {}", peer, e);
                        continue;
                    }

                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(e) =
                        self.poll.registry().register(&mut stream, token, Interest::READABLE)
                    {
                        log_error!("<TcpServer> failed to register {}: {}", peer, e);
                        continue;
                    }

                    log_info!("<TcpServer> accepted connection from {}", peer);
                    self.conns.insert(token, TcpSocket::new(stream, peer));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log_error!("<TcpServer> accept error: {}", e);
                    break;
                }
            }
        }
    }

    /// Receives on every readable socket and flushes pending output.
    ///
    /// For each socket that yielded bytes, `on_rx` is invoked once with
    /// the socket and the batch RX timestamp taken when its bytes were
    /// read. Returns whether any socket received data, so the caller can
    /// run its batch-finished step exactly once per batch.
    pub fn send_and_receive<F>(&mut self, mut on_rx: F) -> bool
    where
        F: FnMut(Token, &mut TcpSocket, Nanos),
    {
        let mut received_any = false;

        let batch: Vec<Token> = self.readable.drain(..).collect();
        for token in batch {
            let Some(sock) = self.conns.get_mut(&token) else {
                continue;
            };

            let received = sock.fill_rx();
            if received > 0 {
                let t_rx = now_nanos();
                received_any = true;
                on_rx(token, sock, t_rx);
            }

            if sock.closed {
                self.close(token);
            }
        }

        // Flush pending output on every connection
        let mut dead: Vec<Token> = Vec::new();
        for (&token, sock) in self.conns.iter_mut() {
            sock.flush_tx();
            if sock.closed {
                dead.push(token);
            }
        }
        for token in dead {
            self.close(token);
        }

        received_any
    }

    fn close(&mut self, token: Token) {
        if let Some(mut sock) = self.conns.remove(&token) {
            log_info!("<TcpServer> closing connection to {}", sock.peer);
            let _ = self.poll.registry().deregister(&mut sock.stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream as StdTcpStream;
    use std::thread;
    use std::time::Duration;

    fn poll_until<F: FnMut(&mut TcpServer) -> bool>(server: &mut TcpServer, mut done: F) {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            server.poll();
            if done(server) {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("timed out waiting for server condition");
    }

    #[test]
    fn test_listen_on_ephemeral_port() {
        let server = TcpServer::listen("127.0.0.1", 0).unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_invalid_listen_address() {
        assert!(TcpServer::listen("not-an-address", 0).is_err());
    }

    #[test]
    fn test_accept_receive_and_reply() {
        let mut server = TcpServer::listen("127.0.0.1", 0).unwrap();
        let addr = server.local_addr();

        let client = thread::spawn(move || {
            let mut stream = StdTcpStream::connect(addr).unwrap();
            stream.write_all(b"ping").unwrap();

            let mut reply = [0u8; 4];
            stream
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            stream.read_exact(&mut reply).unwrap();
            reply
        });

        poll_until(&mut server, |s| s.connection_count() == 1);

        // Receive the ping, queue a pong on the same socket
        let mut batches = 0;
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while batches == 0 && std::time::Instant::now() < deadline {
            server.poll();
            let got = server.send_and_receive(|_token, sock, t_rx| {
                assert!(t_rx.as_u64() > 0);
                assert_eq!(sock.rx_data(), b"ping");
                sock.consume(4);
                sock.send(b"pong");
            });
            if got {
                batches += 1;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(batches, 1);

        // Flush the queued reply
        server.poll();
        server.send_and_receive(|_, _, _| {});

        assert_eq!(client.join().unwrap(), *b"pong");
    }

    #[test]
    fn test_partial_consume_keeps_remainder() {
        let mut server = TcpServer::listen("127.0.0.1", 0).unwrap();
        let addr = server.local_addr();

        let client = thread::spawn(move || {
            let mut stream = StdTcpStream::connect(addr).unwrap();
            stream.write_all(b"abcdef").unwrap();
            thread::sleep(Duration::from_millis(100));
        });

        poll_until(&mut server, |s| s.connection_count() == 1);

        let mut saw = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while saw.len() < 6 && std::time::Instant::now() < deadline {
            server.poll();
            server.send_and_receive(|_token, sock, _t_rx| {
                let batch = sock.rx_data().to_vec();
                saw.extend_from_slice(&batch);

                // Consume only a prefix; the remainder must compact to the front
                let prefix = batch.len().min(2);
                sock.consume(prefix);
                assert_eq!(sock.rx_data(), &batch[prefix..]);
                sock.consume(sock.rx_data().len());
            });
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(&saw, b"abcdef");

        client.join().unwrap();
    }

    #[test]
    fn test_client_endpoint_connect_and_exchange() {
        let mut server = TcpServer::listen("127.0.0.1", 0).unwrap();
        let port = server.local_addr().port();

        let mut client = TcpSocket::connect("127.0.0.1", port).unwrap();
        client.send(b"ping");

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut got_reply = false;
        while !got_reply && std::time::Instant::now() < deadline {
            client.send_and_recv();
            server.poll();
            server.send_and_receive(|_token, sock, _t_rx| {
                if sock.rx_data() == b"ping" {
                    sock.consume(4);
                    sock.send(b"pong");
                }
            });
            if client.rx_data() == b"pong" {
                got_reply = true;
            }
            thread::sleep(Duration::from_millis(1));
        }

        assert!(got_reply, "client endpoint should complete a round trip");
    }

    #[test]
    fn test_disconnect_removes_connection() {
        let mut server = TcpServer::listen("127.0.0.1", 0).unwrap();
        let addr = server.local_addr();

        let stream = StdTcpStream::connect(addr).unwrap();
        poll_until(&mut server, |s| s.connection_count() == 1);

        drop(stream);
        poll_until(&mut server, |s| {
            s.send_and_receive(|_, _, _| {});
            s.connection_count() == 0
        });
    }
}
