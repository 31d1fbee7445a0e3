// Core type definitions and system limits for the exchange

// Type aliases
pub type OrderId = u64;
pub type TickerId = u32;
pub type ClientId = u32;
pub type Price = i64; // Fixed-point (cents)
pub type Qty = u32;
pub type Priority = u64; // FIFO position within a price level

// Invalid/sentinel constants. Every identifier reserves the maximum
// value of its type as "invalid".
pub const INVALID_ORDER_ID: OrderId = u64::MAX;
pub const INVALID_TICKER_ID: TickerId = u32::MAX;
pub const INVALID_CLIENT_ID: ClientId = u32::MAX;
pub const INVALID_PRICE: Price = i64::MAX;
pub const INVALID_QTY: Qty = u32::MAX;
pub const INVALID_PRIORITY: Priority = u64::MAX;

// System-wide limits. These are compile-time sizing knobs for the queues,
// pools, and direct-address indices; they can be tuned per deployment.

/// Maximum number of trading instruments supported
pub const MAX_TICKERS: usize = 8;
/// Maximum number of market participants
pub const MAX_CLIENTS: usize = 256;
/// Maximum number of live client order ids per instrument; also the
/// capacity of each book's order pool
pub const MAX_ORDER_IDS_PER_TICKER: usize = 8192;
/// Maximum simultaneously-live price levels per book
pub const MAX_PRICE_LEVELS: usize = 256;
/// Maximum requests the gateway sequencer may buffer within one batch
pub const MAX_PENDING_REQUESTS: usize = 1024;
/// Capacity of the client request and response queues
pub const MAX_CLIENT_UPDATES: usize = 256 * 1024;
/// Capacity of the market update queue
pub const MAX_MARKET_UPDATES: usize = 256 * 1024;

/// Represents the side of an order (buy or sell)
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy = 1,
    Sell = -1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Returns the side as its wire value (1 for Buy, -1 for Sell)
    #[inline]
    pub fn as_i8(&self) -> i8 {
        *self as i8
    }

    /// Parses a wire value; 0 is the reserved invalid tag
    #[inline]
    pub fn from_i8(value: i8) -> Option<Side> {
        match value {
            1 => Some(Side::Buy),
            -1 => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Wire value used where no side applies
pub const SIDE_INVALID: i8 = 0;
