// Message definitions for the exchange protocol
//
// Binary message protocol using zerocopy for zero-copy serialization.
// All structs are #[repr(C, packed)] with little-endian scalars for a
// predictable wire layout; the same records travel the intra-process
// queues and (wrapped with a sequence number) the TCP/UDP wire.

use matchbook_common::lf_queue::LFQueue;
use matchbook_common::types::{MAX_CLIENT_UPDATES, MAX_MARKET_UPDATES};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ============================================================================
// Message Type Enums
// ============================================================================

/// Client request types for order submission
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequestType {
    New = 1,
    Cancel = 2,
}

impl ClientRequestType {
    /// Convert from raw u8 value; 0 is the reserved invalid tag
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ClientRequestType::New),
            2 => Some(ClientRequestType::Cancel),
            _ => None,
        }
    }
}

/// Client response types for order acknowledgments
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientResponseType {
    Accepted = 1,
    Canceled = 2,
    Filled = 3,
    CancelRejected = 4,
}

impl ClientResponseType {
    /// Convert from raw u8 value; 0 is the reserved invalid tag
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ClientResponseType::Accepted),
            2 => Some(ClientResponseType::Canceled),
            3 => Some(ClientResponseType::Filled),
            4 => Some(ClientResponseType::CancelRejected),
            _ => None,
        }
    }
}

/// Market data update types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketUpdateType {
    Add = 1,
    Modify = 2,
    Cancel = 3,
    Trade = 4,
    Clear = 5,
    SnapshotStart = 6,
    SnapshotEnd = 7,
}

impl MarketUpdateType {
    /// Convert from raw u8 value; 0 is the reserved invalid tag
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MarketUpdateType::Add),
            2 => Some(MarketUpdateType::Modify),
            3 => Some(MarketUpdateType::Cancel),
            4 => Some(MarketUpdateType::Trade),
            5 => Some(MarketUpdateType::Clear),
            6 => Some(MarketUpdateType::SnapshotStart),
            7 => Some(MarketUpdateType::SnapshotEnd),
            _ => None,
        }
    }
}

// ============================================================================
// Message Structs
// ============================================================================

/// Order request, as carried on the request queue from the gateway to the
/// matching engine.
///
/// Layout (30 bytes total):
/// - msg_type: u8 - ClientRequestType
/// - client_id: u32
/// - ticker_id: u32
/// - order_id: u64 - client-issued order id
/// - side: i8 - 1 = buy, -1 = sell
/// - price: i64 - fixed-point price
/// - qty: u32
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct ClientRequest {
    pub msg_type: u8,
    pub client_id: u32,
    pub ticker_id: u32,
    pub order_id: u64,
    pub side: i8,
    pub price: i64,
    pub qty: u32,
}

impl ClientRequest {
    #[inline]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        msg_type: ClientRequestType,
        client_id: u32,
        ticker_id: u32,
        order_id: u64,
        side: i8,
        price: i64,
        qty: u32,
    ) -> Self {
        Self {
            msg_type: msg_type as u8,
            client_id,
            ticker_id,
            order_id,
            side,
            price,
            qty,
        }
    }

    /// Get the message type as enum
    #[inline]
    pub fn request_type(&self) -> Option<ClientRequestType> {
        ClientRequestType::from_u8(self.msg_type)
    }

    /// Get a byte slice reference to this message (zero-copy)
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        AsBytes::as_bytes(self)
    }

    /// Create a reference from a byte slice (zero-copy)
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Option<&Self> {
        FromBytes::ref_from(bytes)
    }
}

/// Engine response to a client order, as carried on the response queue
/// from the matching engine to the gateway.
///
/// Layout (42 bytes total):
/// - msg_type: u8 - ClientResponseType
/// - client_id: u32
/// - ticker_id: u32
/// - client_order_id: u64
/// - market_order_id: u64 - engine-issued order id
/// - side: i8
/// - price: i64
/// - exec_qty: u32 - quantity executed by this event
/// - leaves_qty: u32 - quantity still outstanding
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct ClientResponse {
    pub msg_type: u8,
    pub client_id: u32,
    pub ticker_id: u32,
    pub client_order_id: u64,
    pub market_order_id: u64,
    pub side: i8,
    pub price: i64,
    pub exec_qty: u32,
    pub leaves_qty: u32,
}

impl ClientResponse {
    #[inline]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        msg_type: ClientResponseType,
        client_id: u32,
        ticker_id: u32,
        client_order_id: u64,
        market_order_id: u64,
        side: i8,
        price: i64,
        exec_qty: u32,
        leaves_qty: u32,
    ) -> Self {
        Self {
            msg_type: msg_type as u8,
            client_id,
            ticker_id,
            client_order_id,
            market_order_id,
            side,
            price,
            exec_qty,
            leaves_qty,
        }
    }

    /// Get the message type as enum
    #[inline]
    pub fn response_type(&self) -> Option<ClientResponseType> {
        ClientResponseType::from_u8(self.msg_type)
    }

    /// Get a byte slice reference to this message (zero-copy)
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        AsBytes::as_bytes(self)
    }

    /// Create a reference from a byte slice (zero-copy)
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Option<&Self> {
        FromBytes::ref_from(bytes)
    }
}

/// Market data update message
///
/// Layout (34 bytes total):
/// - msg_type: u8 - MarketUpdateType
/// - ticker_id: u32
/// - order_id: u64 - market order id (invalid for trades)
/// - side: i8
/// - price: i64
/// - qty: u32
/// - priority: u64 - FIFO position within the price level
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct MarketUpdate {
    pub msg_type: u8,
    pub ticker_id: u32,
    pub order_id: u64,
    pub side: i8,
    pub price: i64,
    pub qty: u32,
    pub priority: u64,
}

impl MarketUpdate {
    #[inline]
    pub fn new(
        msg_type: MarketUpdateType,
        ticker_id: u32,
        order_id: u64,
        side: i8,
        price: i64,
        qty: u32,
        priority: u64,
    ) -> Self {
        Self {
            msg_type: msg_type as u8,
            ticker_id,
            order_id,
            side,
            price,
            qty,
            priority,
        }
    }

    /// Get the message type as enum
    #[inline]
    pub fn update_type(&self) -> Option<MarketUpdateType> {
        MarketUpdateType::from_u8(self.msg_type)
    }

    /// Get a byte slice reference to this message (zero-copy)
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        AsBytes::as_bytes(self)
    }

    /// Create a reference from a byte slice (zero-copy)
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Option<&Self> {
        FromBytes::ref_from(bytes)
    }
}

// ============================================================================
// Gateway wire wrappers
// ============================================================================

/// A client request as framed on the TCP wire: a strictly-increasing
/// per-client sequence number followed by the request record.
///
/// Layout (38 bytes total): seq: u64, then ClientRequest.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct OgsRequest {
    pub seq: u64,
    pub request: ClientRequest,
}

impl OgsRequest {
    #[inline]
    pub fn new(seq: u64, request: ClientRequest) -> Self {
        Self { seq, request }
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

/// A client response as framed on the TCP wire: a strictly-increasing
/// per-client sequence number followed by the response record.
///
/// Layout (50 bytes total): seq: u64, then ClientResponse.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct OgsResponse {
    pub seq: u64,
    pub response: ClientResponse,
}

impl OgsResponse {
    #[inline]
    pub fn new(seq: u64, response: ClientResponse) -> Self {
        Self { seq, response }
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

// ============================================================================
// Message Size Constants
// ============================================================================

/// Size of ClientRequest in bytes
pub const CLIENT_REQUEST_SIZE: usize = std::mem::size_of::<ClientRequest>();

/// Size of ClientResponse in bytes
pub const CLIENT_RESPONSE_SIZE: usize = std::mem::size_of::<ClientResponse>();

/// Size of MarketUpdate in bytes
pub const MARKET_UPDATE_SIZE: usize = std::mem::size_of::<MarketUpdate>();

/// Size of OgsRequest in bytes
pub const OGS_REQUEST_SIZE: usize = std::mem::size_of::<OgsRequest>();

/// Size of OgsResponse in bytes
pub const OGS_RESPONSE_SIZE: usize = std::mem::size_of::<OgsResponse>();

// ============================================================================
// Queue aliases
// ============================================================================

/// Requests from the gateway to the matching engine
pub type ClientRequestQueue = LFQueue<ClientRequest, MAX_CLIENT_UPDATES>;

/// Responses from the matching engine to the gateway
pub type ClientResponseQueue = LFQueue<ClientResponse, MAX_CLIENT_UPDATES>;

/// Market updates from the matching engine to the publisher
pub type MarketUpdateQueue = LFQueue<MarketUpdate, MAX_MARKET_UPDATES>;

// ============================================================================
// Tests
// ============================================================================
