// Order gateway server
//
// The TCP front door of the exchange:
// 1. Accepts client connections and frames fixed-size sequenced requests,
//    tolerating coalesced and split records
// 2. Validates the per-client inbound sequence number and the socket the
//    client is bound to; violations are logged and skipped
// 3. Feeds valid requests to the FIFO sequencer, which publishes each
//    batch to the engine in RX-timestamp order
// 4. Drains the engine's response queue and sends each response back on
//    the owning client's socket with the next outbound sequence number

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use mio::Token;

use matchbook_common::net::tcp::{TcpServer, TcpSocket};
use matchbook_common::time::Nanos;
use matchbook_common::types::{MAX_CLIENTS, MAX_ORDER_IDS_PER_TICKER};
use matchbook_common::{fatal, log_error, log_info};

use crate::fifo_sequencer::FifoSequencer;
use crate::matching_engine::pin_to_core;
use crate::protocol::{
    ClientRequestQueue, ClientResponseQueue, OgsRequest, OgsResponse, OGS_REQUEST_SIZE,
};

/// The order gateway server.
///
/// Owns every client socket, both per-client sequence counters, and the
/// FIFO sequencer; it is the single producer of the engine's request
/// queue and the single consumer of its response queue.
pub struct OrderGateway {
    server: TcpServer,
    sequencer: FifoSequencer,
    rx_responses: Arc<ClientResponseQueue>,
    /// Expected next inbound sequence number per client (starts at 1)
    rx_seq: Box<[u64]>,
    /// Next outbound sequence number per client (starts at 1)
    tx_seq: Box<[u64]>,
    /// The socket each client is currently bound to
    client_conn: Box<[Option<Token>]>,
}

impl OrderGateway {
    /// Binds the gateway's listener on `iface:port`.
    pub fn new(
        iface: &str,
        port: u16,
        tx_requests: Arc<ClientRequestQueue>,
        rx_responses: Arc<ClientResponseQueue>,
    ) -> io::Result<Self> {
        let server = TcpServer::listen(iface, port)?;

        Ok(Self {
            server,
            sequencer: FifoSequencer::new(tx_requests),
            rx_responses,
            rx_seq: vec![1u64; MAX_CLIENTS].into_boxed_slice(),
            tx_seq: vec![1u64; MAX_CLIENTS].into_boxed_slice(),
            client_conn: vec![None; MAX_CLIENTS].into_boxed_slice(),
        })
    }

    /// The bound listener address.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Starts the gateway worker, optionally pinned to a CPU core.
    pub fn start(self, cpu: Option<usize>) -> OrderGatewayHandle {
        let running = Arc::new(AtomicBool::new(true));
        let run_flag = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name("order-gateway".to_string())
            .spawn(move || {
                if let Some(core) = cpu {
                    pin_to_core(core);
                }
                self.run(run_flag);
            })
            .expect("failed to spawn order gateway thread");

        OrderGatewayHandle {
            running,
            thread: Some(thread),
        }
    }

    fn run(mut self, running: Arc<AtomicBool>) {
        log_info!("<OGS> order gateway running on {}", self.local_addr());

        while running.load(Ordering::Relaxed) {
            self.server.poll();

            let Self {
                server,
                sequencer,
                rx_seq,
                client_conn,
                ..
            } = &mut self;

            let received = server.send_and_receive(|token, sock, t_rx| {
                Self::rx_callback(sequencer, rx_seq, client_conn, token, sock, t_rx);
            });

            // Batch finished: publish in strict arrival order
            if received {
                self.sequencer.sequence_and_publish();
            }

            self.drain_responses();
        }

        // Flush responses still buffered before shutting down
        self.server.send_and_receive(|_, _, _| {});
        log_info!("<OGS> order gateway stopped");
    }

    /// Per-socket receive callback: frames every complete request in the
    /// RX buffer, validates it, and hands it to the sequencer with the
    /// batch RX timestamp. Partial trailing records stay buffered.
    fn rx_callback(
        sequencer: &mut FifoSequencer,
        rx_seq: &mut [u64],
        client_conn: &mut [Option<Token>],
        token: Token,
        sock: &mut TcpSocket,
        t_rx: Nanos,
    ) {
        let mut consumed = 0usize;

        while sock.rx_data().len() >= consumed + OGS_REQUEST_SIZE {
            let record: OgsRequest =
                match OgsRequest::from_bytes(&sock.rx_data()[consumed..consumed + OGS_REQUEST_SIZE])
                {
                    Some(r) => *r,
                    None => break,
                };
            consumed += OGS_REQUEST_SIZE;

            // Copy packed fields out before use
            let client_id = record.request.client_id;
            let order_id = record.request.order_id;
            let seq = record.seq;

            if client_id as usize >= MAX_CLIENTS || order_id as usize >= MAX_ORDER_IDS_PER_TICKER {
                log_error!(
                    "<OGS> out-of-range ids from {} (client {} order {}); skipped",
                    sock.peer_addr(),
                    client_id,
                    order_id
                );
                continue;
            }

            // First request from this client binds it to this socket
            if client_conn[client_id as usize].is_none() {
                client_conn[client_id as usize] = Some(token);
            }

            if client_conn[client_id as usize] != Some(token) {
                // TODO: send a rejection back to the client
                log_error!(
                    "<OGS> client {} sent on {} but is bound to another socket; skipped",
                    client_id,
                    sock.peer_addr()
                );
                continue;
            }

            let expected = rx_seq[client_id as usize];
            if seq != expected {
                // TODO: send a rejection back to the client
                log_error!(
                    "<OGS> sequence error from client {}: expected {} received {}; skipped",
                    client_id,
                    expected,
                    seq
                );
                continue;
            }

            rx_seq[client_id as usize] += 1;
            sequencer.push_client_request(&record.request, t_rx);
        }

        sock.consume(consumed);
    }

    /// Sends every queued engine response to its client, framed with the
    /// client's next outbound sequence number.
    fn drain_responses(&mut self) {
        while let Some(response) = self.rx_responses.pop() {
            let client_id = response.client_id as usize;
            if client_id >= MAX_CLIENTS {
                fatal!("<OGS> response for out-of-range client {}", client_id);
            }

            let Some(token) = self.client_conn[client_id] else {
                fatal!("<OGS> missing socket for client {}", client_id);
            };
            let Some(sock) = self.server.conn_mut(token) else {
                fatal!("<OGS> socket for client {} is gone", client_id);
            };

            let n_seq = self.tx_seq[client_id];
            let framed = OgsResponse::new(n_seq, response);
            sock.send(framed.as_bytes());
            self.tx_seq[client_id] = n_seq + 1;
        }
    }
}

/// Join handle for a running order gateway.
pub struct OrderGatewayHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OrderGatewayHandle {
    /// Requests termination and joins the worker.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for OrderGatewayHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        ClientRequest, ClientRequestType, ClientResponse, ClientResponseType,
        OGS_RESPONSE_SIZE,
    };
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::{Duration, Instant};

    fn harness() -> (OrderGateway, Arc<ClientRequestQueue>, Arc<ClientResponseQueue>) {
        let requests: Arc<ClientRequestQueue> = Arc::from(ClientRequestQueue::new_boxed());
        let responses: Arc<ClientResponseQueue> = Arc::from(ClientResponseQueue::new_boxed());
        let gateway = OrderGateway::new(
            "127.0.0.1",
            0,
            Arc::clone(&requests),
            Arc::clone(&responses),
        )
        .unwrap();
        (gateway, requests, responses)
    }

    fn wire_request(seq: u64, client_id: u32, order_id: u64) -> OgsRequest {
        OgsRequest::new(
            seq,
            ClientRequest::new(ClientRequestType::New, client_id, 1, order_id, 1, 100, 10),
        )
    }

    fn pop_with_timeout(queue: &ClientRequestQueue) -> Option<ClientRequest> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(r) = queue.pop() {
                return Some(r);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn test_sequenced_request_reaches_engine_queue() {
        let (gateway, requests, _responses) = harness();
        let addr = gateway.local_addr();
        let mut handle = gateway.start(None);

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(wire_request(1, 7, 1).as_bytes()).unwrap();

        let got = pop_with_timeout(&requests).expect("request should be forwarded");
        let (client_id, order_id) = (got.client_id, got.order_id);
        assert_eq!(client_id, 7);
        assert_eq!(order_id, 1);
        assert!(requests.pop().is_none());

        handle.stop();
    }

    #[test]
    fn test_coalesced_and_split_records() {
        let (gateway, requests, _responses) = harness();
        let addr = gateway.local_addr();
        let mut handle = gateway.start(None);

        let mut client = TcpStream::connect(addr).unwrap();

        // Two records coalesced into one write
        let mut coalesced = Vec::new();
        coalesced.extend_from_slice(wire_request(1, 7, 1).as_bytes());
        coalesced.extend_from_slice(wire_request(2, 7, 2).as_bytes());
        client.write_all(&coalesced).unwrap();

        assert_eq!(pop_with_timeout(&requests).map(|r| r.order_id), Some(1));
        assert_eq!(pop_with_timeout(&requests).map(|r| r.order_id), Some(2));

        // One record split across two writes
        let third = wire_request(3, 7, 3);
        let bytes = third.as_bytes();
        client.write_all(&bytes[..10]).unwrap();
        client.flush().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(requests.pop().is_none(), "partial record must stay buffered");
        client.write_all(&bytes[10..]).unwrap();

        assert_eq!(pop_with_timeout(&requests).map(|r| r.order_id), Some(3));

        handle.stop();
    }

    #[test]
    fn test_bad_sequence_number_is_skipped() {
        let (gateway, requests, _responses) = harness();
        let addr = gateway.local_addr();
        let mut handle = gateway.start(None);

        let mut client = TcpStream::connect(addr).unwrap();

        // Expected seq is 1; a jump to 5 is a protocol violation
        client.write_all(wire_request(5, 7, 1).as_bytes()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(requests.pop().is_none());

        // The connection stays open and the expected seq is unchanged
        client.write_all(wire_request(1, 7, 2).as_bytes()).unwrap();
        assert_eq!(pop_with_timeout(&requests).map(|r| r.order_id), Some(2));

        handle.stop();
    }

    #[test]
    fn test_responses_framed_with_outbound_sequence() {
        let (gateway, requests, responses) = harness();
        let addr = gateway.local_addr();
        let mut handle = gateway.start(None);

        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        client.write_all(wire_request(1, 7, 1).as_bytes()).unwrap();
        pop_with_timeout(&requests).unwrap();

        // Act as the engine: two responses for client 7
        for leaves in [10u32, 0] {
            responses
                .push(ClientResponse::new(
                    ClientResponseType::Accepted,
                    7,
                    1,
                    1,
                    1,
                    1,
                    100,
                    0,
                    leaves,
                ))
                .unwrap();
        }

        let mut buf = vec![0u8; OGS_RESPONSE_SIZE * 2];
        client.read_exact(&mut buf).unwrap();

        let first = OgsResponse::from_bytes(&buf[..OGS_RESPONSE_SIZE]).unwrap();
        let second = OgsResponse::from_bytes(&buf[OGS_RESPONSE_SIZE..]).unwrap();
        let (s1, s2) = (first.seq, second.seq);
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);
        let leaves = second.response.leaves_qty;
        assert_eq!(leaves, 0);

        handle.stop();
    }

    #[test]
    fn test_out_of_range_client_id_is_skipped() {
        let (gateway, requests, _responses) = harness();
        let addr = gateway.local_addr();
        let mut handle = gateway.start(None);

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(wire_request(1, MAX_CLIENTS as u32 + 1, 1).as_bytes())
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(requests.pop().is_none());

        handle.stop();
    }
}
