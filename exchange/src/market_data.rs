// Market data publisher
//
// Consumes the engine's market-update queue on its own thread, stamps
// each record with a global market sequence number, and multicasts it
// over UDP. Tracks per-ticker best bid/offer from the update stream and
// periodically emits a snapshot for late joiners, framed by
// SNAPSHOT_START / SNAPSHOT_END records.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use matchbook_common::net::multicast::MulticastSocket;
use matchbook_common::types::{
    Price, Qty, Side, TickerId, INVALID_ORDER_ID, INVALID_PRIORITY, INVALID_TICKER_ID,
    MAX_TICKERS, SIDE_INVALID,
};
use matchbook_common::{log_error, log_info};

use crate::matching_engine::pin_to_core;
use crate::protocol::{MarketUpdate, MarketUpdateQueue, MarketUpdateType};

/// A market update as framed on the UDP wire: the global market sequence
/// number followed by the update record.
///
/// Layout (42 bytes total): seq: u64, then MarketUpdate.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct MdMessage {
    pub seq: u64,
    pub update: MarketUpdate,
}

impl MdMessage {
    #[inline]
    pub fn new(seq: u64, update: MarketUpdate) -> Self {
        Self { seq, update }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        AsBytes::as_bytes(self)
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Option<&Self> {
        FromBytes::ref_from(bytes)
    }
}

/// Size of MdMessage in bytes
pub const MD_MESSAGE_SIZE: usize = std::mem::size_of::<MdMessage>();

/// Configuration for the market data publisher.
#[derive(Debug, Clone)]
pub struct MarketDataPublisherConfig {
    /// Multicast group address (e.g., "239.255.0.1")
    pub multicast_addr: String,
    /// Port number for multicast
    pub port: u16,
    /// Local interface IP to send from ("0.0.0.0" for any)
    pub interface: String,
    /// Time-to-live for multicast packets (1 = local network only)
    pub ttl: u32,
    /// Updates between automatic snapshots; 0 disables snapshots
    pub snapshot_interval: u64,
}

impl Default for MarketDataPublisherConfig {
    fn default() -> Self {
        Self {
            multicast_addr: "239.255.0.1".to_string(),
            port: 5000,
            interface: "0.0.0.0".to_string(),
            ttl: 1,
            snapshot_interval: 1000,
        }
    }
}

/// Best bid and offer for a single ticker, maintained from the update
/// stream for snapshot generation.
#[derive(Debug, Clone, Copy, Default)]
struct TickerBbo {
    bid_price: Price,
    bid_qty: Qty,
    ask_price: Price,
    ask_qty: Qty,
}

/// Multicasts engine market updates with a global sequence number.
pub struct MarketDataPublisher {
    socket: MulticastSocket,
    config: MarketDataPublisherConfig,
    rx_updates: Arc<MarketUpdateQueue>,
    /// Global market sequence stamped on each outbound record
    next_seq: u64,
    bbo: [TickerBbo; MAX_TICKERS],
    updates_since_snapshot: u64,
    total_updates_sent: u64,
}

impl MarketDataPublisher {
    pub fn new(
        config: MarketDataPublisherConfig,
        rx_updates: Arc<MarketUpdateQueue>,
    ) -> io::Result<Self> {
        let socket = MulticastSocket::new()?;
        socket.set_multicast_ttl(config.ttl)?;
        socket.set_multicast_interface(&config.interface)?;

        Ok(Self {
            socket,
            config,
            rx_updates,
            next_seq: 1,
            bbo: [TickerBbo::default(); MAX_TICKERS],
            updates_since_snapshot: 0,
            total_updates_sent: 0,
        })
    }

    /// Total records sent since startup.
    #[inline]
    pub fn total_updates_sent(&self) -> u64 {
        self.total_updates_sent
    }

    /// Stamps and multicasts one update, then emits a snapshot if the
    /// configured interval elapsed.
    fn publish(&mut self, update: &MarketUpdate) {
        self.track_bbo(update);
        self.send_record(update);

        self.updates_since_snapshot += 1;
        if self.config.snapshot_interval > 0
            && self.updates_since_snapshot >= self.config.snapshot_interval
        {
            self.publish_snapshot();
            self.updates_since_snapshot = 0;
        }
    }

    /// Sends one record with the next global sequence number.
    fn send_record(&mut self, update: &MarketUpdate) {
        let message = MdMessage::new(self.next_seq, *update);
        match self
            .socket
            .send_to(message.as_bytes(), &self.config.multicast_addr, self.config.port)
        {
            Ok(_) => {
                self.next_seq += 1;
                self.total_updates_sent += 1;
            }
            Err(e) => {
                log_error!("<MDP> multicast send failed: {}", e);
            }
        }
    }

    /// Publishes the current per-ticker best bid/offer as a snapshot:
    /// SNAPSHOT_START, then per ticker a CLEAR followed by synthetic ADDs
    /// for each live side, then SNAPSHOT_END.
    fn publish_snapshot(&mut self) {
        self.send_record(&MarketUpdate::new(
            MarketUpdateType::SnapshotStart,
            INVALID_TICKER_ID,
            INVALID_ORDER_ID,
            SIDE_INVALID,
            0,
            0,
            INVALID_PRIORITY,
        ));

        for ticker in 0..MAX_TICKERS {
            let state = self.bbo[ticker];
            if state.bid_qty == 0 && state.ask_qty == 0 {
                continue;
            }

            self.send_record(&MarketUpdate::new(
                MarketUpdateType::Clear,
                ticker as TickerId,
                INVALID_ORDER_ID,
                SIDE_INVALID,
                0,
                0,
                INVALID_PRIORITY,
            ));

            if state.bid_qty > 0 {
                self.send_record(&MarketUpdate::new(
                    MarketUpdateType::Add,
                    ticker as TickerId,
                    INVALID_ORDER_ID,
                    Side::Buy.as_i8(),
                    state.bid_price,
                    state.bid_qty,
                    INVALID_PRIORITY,
                ));
            }
            if state.ask_qty > 0 {
                self.send_record(&MarketUpdate::new(
                    MarketUpdateType::Add,
                    ticker as TickerId,
                    INVALID_ORDER_ID,
                    Side::Sell.as_i8(),
                    state.ask_price,
                    state.ask_qty,
                    INVALID_PRIORITY,
                ));
            }
        }

        self.send_record(&MarketUpdate::new(
            MarketUpdateType::SnapshotEnd,
            INVALID_TICKER_ID,
            INVALID_ORDER_ID,
            SIDE_INVALID,
            0,
            0,
            INVALID_PRIORITY,
        ));
    }

    /// Folds one update into the per-ticker best bid/offer state.
    fn track_bbo(&mut self, update: &MarketUpdate) {
        let ticker_id = update.ticker_id;
        if ticker_id as usize >= MAX_TICKERS {
            return;
        }
        let state = &mut self.bbo[ticker_id as usize];

        let update_type = update.update_type();
        let side = update.side;
        let price = update.price;
        let qty = update.qty;

        match update_type {
            Some(MarketUpdateType::Add) | Some(MarketUpdateType::Modify) => {
                if side == Side::Buy.as_i8() {
                    if state.bid_qty == 0 || price > state.bid_price {
                        state.bid_price = price;
                        state.bid_qty = qty;
                    } else if price == state.bid_price {
                        state.bid_qty = qty;
                    }
                } else if side == Side::Sell.as_i8() {
                    if state.ask_qty == 0 || price < state.ask_price {
                        state.ask_price = price;
                        state.ask_qty = qty;
                    } else if price == state.ask_price {
                        state.ask_qty = qty;
                    }
                }
            }
            Some(MarketUpdateType::Cancel) => {
                // The BBO order is gone; the next-best is unknown until a
                // later ADD/MODIFY re-establishes it
                if side == Side::Buy.as_i8() && price == state.bid_price {
                    state.bid_price = 0;
                    state.bid_qty = 0;
                } else if side == Side::Sell.as_i8() && price == state.ask_price {
                    state.ask_price = 0;
                    state.ask_qty = 0;
                }
            }
            Some(MarketUpdateType::Trade) => {
                // The trade already shows as CANCEL/MODIFY of the resting
                // order; nothing to fold in
            }
            Some(MarketUpdateType::Clear) => {
                *state = TickerBbo::default();
            }
            _ => {}
        }
    }

    /// Starts the publisher thread, optionally pinned to a CPU core.
    pub fn start(mut self, cpu: Option<usize>) -> MarketDataPublisherHandle {
        let running = Arc::new(AtomicBool::new(true));
        let run_flag = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name("market-data".to_string())
            .spawn(move || {
                if let Some(core) = cpu {
                    pin_to_core(core);
                }
                log_info!("<MDP> market data publisher started");

                let mut idle_count = 0u32;
                while run_flag.load(Ordering::Relaxed) {
                    if let Some(update) = self.rx_updates.pop() {
                        self.publish(&update);
                        idle_count = 0;
                    } else {
                        idle_count = idle_count.saturating_add(1);
                        if idle_count < 1000 {
                            std::hint::spin_loop();
                        } else {
                            std::thread::yield_now();
                        }
                    }
                }

                // Drain what the engine already queued
                while let Some(update) = self.rx_updates.pop() {
                    self.publish(&update);
                }
                log_info!("<MDP> market data publisher stopped");
            })
            .expect("failed to spawn market data thread");

        MarketDataPublisherHandle {
            running,
            thread: Some(thread),
        }
    }
}

/// Join handle for a running market data publisher.
pub struct MarketDataPublisherHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MarketDataPublisherHandle {
    /// Requests termination and joins the worker.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MarketDataPublisherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher() -> MarketDataPublisher {
        let updates: Arc<MarketUpdateQueue> = Arc::from(MarketUpdateQueue::new_boxed());
        let config = MarketDataPublisherConfig {
            ttl: 0, // keep test packets on the host
            snapshot_interval: 0,
            ..Default::default()
        };
        MarketDataPublisher::new(config, updates).unwrap()
    }

    fn add(side: Side, price: Price, qty: Qty) -> MarketUpdate {
        MarketUpdate::new(MarketUpdateType::Add, 1, 10, side.as_i8(), price, qty, 1)
    }

    #[test]
    fn test_md_message_size() {
        assert_eq!(MD_MESSAGE_SIZE, 8 + std::mem::size_of::<MarketUpdate>());
    }

    #[test]
    fn test_md_message_roundtrip() {
        let msg = MdMessage::new(9, add(Side::Buy, 100, 5));
        let parsed = MdMessage::from_bytes(msg.as_bytes()).unwrap();
        let (seq, price) = (parsed.seq, parsed.update.price);
        assert_eq!(seq, 9);
        assert_eq!(price, 100);
    }

    #[test]
    fn test_sequence_numbers_increase_per_record() {
        let mut p = publisher();
        p.publish(&add(Side::Buy, 100, 5));
        p.publish(&add(Side::Sell, 105, 3));
        assert_eq!(p.total_updates_sent(), 2);
        assert_eq!(p.next_seq, 3);
    }

    #[test]
    fn test_bbo_tracks_better_prices() {
        let mut p = publisher();

        p.publish(&add(Side::Buy, 100, 5));
        p.publish(&add(Side::Buy, 99, 7)); // worse bid, ignored
        p.publish(&add(Side::Buy, 101, 2)); // better bid
        p.publish(&add(Side::Sell, 105, 3));
        p.publish(&add(Side::Sell, 104, 4)); // better ask

        let state = p.bbo[1];
        assert_eq!((state.bid_price, state.bid_qty), (101, 2));
        assert_eq!((state.ask_price, state.ask_qty), (104, 4));
    }

    #[test]
    fn test_bbo_clears_on_cancel() {
        let mut p = publisher();

        p.publish(&add(Side::Buy, 100, 5));
        p.publish(&MarketUpdate::new(
            MarketUpdateType::Cancel,
            1,
            10,
            Side::Buy.as_i8(),
            100,
            5,
            1,
        ));

        let state = p.bbo[1];
        assert_eq!(state.bid_qty, 0);
        assert_eq!(state.bid_price, 0);
    }

    #[test]
    fn test_snapshot_frames_and_counts() {
        let mut p = publisher();
        p.publish(&add(Side::Buy, 100, 5));
        p.publish(&add(Side::Sell, 105, 3));

        let before = p.total_updates_sent();
        p.publish_snapshot();
        // START + CLEAR + bid ADD + ask ADD + END
        assert_eq!(p.total_updates_sent(), before + 5);
    }

    #[test]
    fn test_snapshot_interval_triggers() {
        let updates: Arc<MarketUpdateQueue> = Arc::from(MarketUpdateQueue::new_boxed());
        let config = MarketDataPublisherConfig {
            ttl: 0,
            snapshot_interval: 2,
            ..Default::default()
        };
        let mut p = MarketDataPublisher::new(config, updates).unwrap();

        p.publish(&add(Side::Buy, 100, 5));
        assert_eq!(p.total_updates_sent(), 1);
        p.publish(&add(Side::Buy, 100, 6));
        // Second update crossed the interval: START + CLEAR + ADD + END follow
        assert_eq!(p.total_updates_sent(), 2 + 4);
    }
}
