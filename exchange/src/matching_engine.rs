// Order matching engine
//
// Owns one order book per ticker and a dedicated worker thread that
// spin-polls the request queue: NEW and CANCEL requests are routed to the
// right book, which emits responses and market updates back through the
// engine's channels. The loop performs no allocation and no blocking
// system calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use matchbook_common::types::{Side, MAX_TICKERS};
use matchbook_common::{fatal, log_debug, log_error, log_info, log_warn};

use crate::order_book::OrderBook;
use crate::protocol::{
    ClientRequest, ClientRequestType, ClientResponse, ClientResponseQueue, ClientRequestQueue,
    MarketUpdate, MarketUpdateQueue,
};

/// Pins the calling thread to a CPU core, logging the outcome.
pub(crate) fn pin_to_core(core: usize) {
    if core_affinity::set_for_current(core_affinity::CoreId { id: core }) {
        log_info!("pinned thread {:?} to core {}", std::thread::current().name(), core);
    } else {
        log_warn!("failed to pin thread to core {}", core);
    }
}

/// The engine's outbound channels: the response queue toward the gateway
/// and the market-update queue toward the publisher.
///
/// The order books emit through this handle; pushing is by value and
/// never blocks. A full queue is logged and the engine continues -
/// queues are sized for peak load, so recurring overflow means the
/// system is misconfigured.
pub struct EngineChannels {
    tx_responses: Arc<ClientResponseQueue>,
    tx_updates: Arc<MarketUpdateQueue>,
}

impl EngineChannels {
    pub fn new(tx_responses: Arc<ClientResponseQueue>, tx_updates: Arc<MarketUpdateQueue>) -> Self {
        Self {
            tx_responses,
            tx_updates,
        }
    }

    /// Queues a response for the gateway.
    #[inline]
    pub fn dispatch_client_response(&self, response: &ClientResponse) {
        if self.tx_responses.push(*response).is_err() {
            log_error!("<OME> client response queue full; response dropped");
        }
    }

    /// Queues a market update for the publisher.
    #[inline]
    pub fn publish_market_update(&self, update: &MarketUpdate) {
        if self.tx_updates.push(*update).is_err() {
            log_error!("<OME> market update queue full; update dropped");
        }
    }
}

/// The order matching engine: one book per supported ticker.
///
/// All books are created up front; an empty book costs nothing beyond
/// its indices.
pub struct MatchingEngine {
    books: Vec<OrderBook>,
    channels: EngineChannels,
    rx_requests: Arc<ClientRequestQueue>,
}

impl MatchingEngine {
    pub fn new(
        rx_requests: Arc<ClientRequestQueue>,
        tx_responses: Arc<ClientResponseQueue>,
        tx_updates: Arc<MarketUpdateQueue>,
    ) -> Self {
        let books = (0..MAX_TICKERS as u32).map(OrderBook::new).collect();

        Self {
            books,
            channels: EngineChannels::new(tx_responses, tx_updates),
            rx_requests,
        }
    }

    /// Processes one client request from the gateway.
    pub fn handle_client_request(&mut self, request: &ClientRequest) {
        // Copy fields out of the packed record
        let msg_type = request.msg_type;
        let client_id = request.client_id;
        let ticker_id = request.ticker_id;
        let order_id = request.order_id;
        let side_raw = request.side;
        let price = request.price;
        let qty = request.qty;

        let Some(request_type) = ClientRequestType::from_u8(msg_type) else {
            log_error!("<OME> invalid request type {} from client {}; dropped", msg_type, client_id);
            return;
        };

        if ticker_id as usize >= MAX_TICKERS {
            fatal!("<OME> request for unknown ticker {}", ticker_id);
        }

        match request_type {
            ClientRequestType::New => {
                let Some(side) = Side::from_i8(side_raw) else {
                    log_error!("<OME> invalid side {} from client {}; dropped", side_raw, client_id);
                    return;
                };
                self.books[ticker_id as usize].add_order(
                    &self.channels,
                    client_id,
                    order_id,
                    ticker_id,
                    side,
                    price,
                    qty,
                );
            }
            ClientRequestType::Cancel => {
                self.books[ticker_id as usize].cancel_order(
                    &self.channels,
                    client_id,
                    order_id,
                    ticker_id,
                );
            }
        }
    }

    /// Read access to a book, for inspection and tests.
    pub fn book(&self, ticker_id: u32) -> Option<&OrderBook> {
        self.books.get(ticker_id as usize)
    }

    /// Starts the matching thread, optionally pinned to a CPU core.
    ///
    /// Consumes the engine: the books are owned by the worker from here
    /// on and touched by no other thread.
    pub fn start(mut self, cpu: Option<usize>) -> MatchingEngineHandle {
        let running = Arc::new(AtomicBool::new(true));
        let run_flag = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name("matching-engine".to_string())
            .spawn(move || {
                if let Some(core) = cpu {
                    pin_to_core(core);
                }
                log_info!("<OME> matching engine thread started");

                while run_flag.load(Ordering::Relaxed) {
                    if let Some(request) = self.rx_requests.pop() {
                        self.handle_client_request(&request);
                    } else {
                        std::hint::spin_loop();
                    }
                }

                for book in &self.books {
                    log_debug!("{}", book.summary());
                }
                log_info!("<OME> matching engine thread stopped");
            })
            .expect("failed to spawn matching engine thread");

        MatchingEngineHandle {
            running,
            thread: Some(thread),
        }
    }
}

/// Join handle for a running matching engine.
pub struct MatchingEngineHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MatchingEngineHandle {
    /// Requests termination and joins the worker.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MatchingEngineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientResponseType, MarketUpdateType};
    use matchbook_common::types::INVALID_PRICE;

    fn harness() -> (
        MatchingEngine,
        Arc<ClientRequestQueue>,
        Arc<ClientResponseQueue>,
        Arc<MarketUpdateQueue>,
    ) {
        let requests: Arc<ClientRequestQueue> = Arc::from(ClientRequestQueue::new_boxed());
        let responses: Arc<ClientResponseQueue> = Arc::from(ClientResponseQueue::new_boxed());
        let updates: Arc<MarketUpdateQueue> = Arc::from(MarketUpdateQueue::new_boxed());
        let engine = MatchingEngine::new(
            Arc::clone(&requests),
            Arc::clone(&responses),
            Arc::clone(&updates),
        );
        (engine, requests, responses, updates)
    }

    fn new_order(client_id: u32, order_id: u64, side: i8, price: i64, qty: u32) -> ClientRequest {
        ClientRequest::new(ClientRequestType::New, client_id, 1, order_id, side, price, qty)
    }

    #[test]
    fn test_books_precreated_for_all_tickers() {
        let (engine, _rq, _rs, _up) = harness();
        for ticker in 0..MAX_TICKERS as u32 {
            assert!(engine.book(ticker).is_some());
        }
        assert!(engine.book(MAX_TICKERS as u32).is_none());
    }

    #[test]
    fn test_new_order_routed_to_book() {
        let (mut engine, _rq, responses, updates) = harness();

        engine.handle_client_request(&new_order(7, 1, 1, 100, 10));

        let resp = responses.pop().unwrap();
        let msg_type = resp.msg_type;
        assert_eq!(msg_type, ClientResponseType::Accepted as u8);
        assert!(responses.pop().is_none());

        let update = updates.pop().unwrap();
        let msg_type = update.msg_type;
        assert_eq!(msg_type, MarketUpdateType::Add as u8);

        assert_eq!(engine.book(1).unwrap().best_bid(), Some(100));
    }

    #[test]
    fn test_cancel_routed_to_book() {
        let (mut engine, _rq, responses, updates) = harness();

        engine.handle_client_request(&new_order(7, 1, 1, 100, 10));
        responses.pop().unwrap();
        updates.pop().unwrap();

        engine.handle_client_request(&ClientRequest::new(
            ClientRequestType::Cancel,
            7,
            1,
            1,
            0,
            INVALID_PRICE,
            0,
        ));

        let resp = responses.pop().unwrap();
        let msg_type = resp.msg_type;
        assert_eq!(msg_type, ClientResponseType::Canceled as u8);
        assert_eq!(engine.book(1).unwrap().best_bid(), None);
    }

    #[test]
    fn test_invalid_request_type_dropped() {
        let (mut engine, _rq, responses, updates) = harness();

        let mut req = new_order(7, 1, 1, 100, 10);
        req.msg_type = 255;
        engine.handle_client_request(&req);

        assert!(responses.pop().is_none());
        assert!(updates.pop().is_none());
    }

    #[test]
    fn test_invalid_side_dropped() {
        let (mut engine, _rq, responses, updates) = harness();

        engine.handle_client_request(&new_order(7, 1, 0, 100, 10));

        assert!(responses.pop().is_none());
        assert!(updates.pop().is_none());
    }

    #[test]
    #[should_panic(expected = "unknown ticker")]
    fn test_unknown_ticker_is_fatal() {
        let (mut engine, _rq, _rs, _up) = harness();
        let req = ClientRequest::new(ClientRequestType::New, 7, 999, 1, 1, 100, 10);
        engine.handle_client_request(&req);
    }

    #[test]
    fn test_threaded_engine_processes_queue() {
        let (engine, requests, responses, _updates) = harness();
        let mut handle = engine.start(None);

        requests.push(new_order(7, 1, 1, 100, 10)).unwrap();
        requests.push(new_order(8, 1, -1, 100, 4)).unwrap();

        // ACCEPTED, ACCEPTED+2 FILLED = 4 responses in submission order
        let mut got = Vec::new();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while got.len() < 4 && std::time::Instant::now() < deadline {
            if let Some(r) = responses.pop() {
                got.push(r.msg_type);
            }
        }
        handle.stop();

        assert_eq!(
            got,
            vec![
                ClientResponseType::Accepted as u8,
                ClientResponseType::Accepted as u8,
                ClientResponseType::Filled as u8,
                ClientResponseType::Filled as u8,
            ]
        );
    }
}
