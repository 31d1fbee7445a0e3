// Price-time priority limit order book
//
// One book per instrument. Orders at a price form an intrusive circular
// doubly-linked ring in FIFO priority order; price levels on a side form
// a second ring ordered from most to least aggressive. All records live
// in per-book memory pools and link to each other by stable pool index,
// so the hot path allocates nothing.
//
// Index invariants:
// - an order is linked into at most one level ring; its prev/next are
//   always valid while linked (a singleton ring points to itself)
// - level_index maps price % MAX_PRICE_LEVELS to the live level at that
//   slot; two distinct live prices mapping to the same slot is a fatal
//   configuration fault
// - client_index maps (client_id, client_order_id) to the resting order
//   for O(1) cancellation

use matchbook_common::fatal;
use matchbook_common::mem_pool::MemPool;
use matchbook_common::types::{
    ClientId, OrderId, Price, Priority, Qty, Side, TickerId, INVALID_ORDER_ID, INVALID_PRICE,
    INVALID_PRIORITY, INVALID_QTY, MAX_CLIENTS, MAX_ORDER_IDS_PER_TICKER, MAX_PRICE_LEVELS,
    SIDE_INVALID,
};

use crate::matching_engine::EngineChannels;
use crate::protocol::{
    ClientResponse, ClientResponseType, MarketUpdate, MarketUpdateType,
};

/// Sentinel for "no record" in the intrusive index links
const NIL: u32 = u32::MAX;

/// A resting order. `prev`/`next` link neighboring orders at the same
/// price level into a circular ring; `order0`'s predecessor is the tail.
struct Order {
    client_id: ClientId,
    client_order_id: OrderId,
    market_order_id: OrderId,
    side: Side,
    price: Price,
    qty: Qty,
    priority: Priority,
    prev: u32,
    next: u32,
}

/// One price level: the ring of orders resting at `price` on `side`.
/// `prev`/`next` link neighboring levels on the same side, ordered from
/// most to least aggressive.
struct OrdersAtPrice {
    side: Side,
    price: Price,
    /// Highest-priority order at this price
    order0: u32,
    prev: u32,
    next: u32,
}

/// Price-time priority order book for a single instrument.
///
/// Emits client responses and market updates through the owning engine's
/// channels; it performs no I/O and no allocation of its own past
/// construction.
pub struct OrderBook {
    ticker_id: TickerId,

    /// (client_id, client_order_id) -> order pool index, NIL when absent
    client_index: Box<[u32]>,
    /// price % MAX_PRICE_LEVELS -> level pool index, NIL when absent
    level_index: Box<[u32]>,

    /// Most aggressive level per side (highest bid, lowest ask)
    bids_head: u32,
    asks_head: u32,

    order_pool: Box<MemPool<Order, MAX_ORDER_IDS_PER_TICKER>>,
    level_pool: Box<MemPool<OrdersAtPrice, MAX_PRICE_LEVELS>>,

    next_market_oid: OrderId,
}

impl OrderBook {
    /// Creates an empty book for the given ticker.
    pub fn new(ticker_id: TickerId) -> Self {
        Self {
            ticker_id,
            client_index: vec![NIL; MAX_CLIENTS * MAX_ORDER_IDS_PER_TICKER].into_boxed_slice(),
            level_index: vec![NIL; MAX_PRICE_LEVELS].into_boxed_slice(),
            bids_head: NIL,
            asks_head: NIL,
            order_pool: MemPool::new_boxed(),
            level_pool: MemPool::new_boxed(),
            next_market_oid: 1,
        }
    }

    /// Returns the ticker this book is assigned to.
    #[inline]
    pub fn ticker_id(&self) -> TickerId {
        self.ticker_id
    }

    /// Next market order id the book will issue.
    #[inline]
    pub fn next_market_order_id(&self) -> OrderId {
        self.next_market_oid
    }

    /// Adds a new order: acknowledges it, matches the crossable portion
    /// against the opposite side, and rests any remainder in the book.
    pub fn add_order(
        &mut self,
        ome: &EngineChannels,
        client_id: ClientId,
        client_order_id: OrderId,
        ticker_id: TickerId,
        side: Side,
        price: Price,
        qty: Qty,
    ) {
        let market_oid = self.new_market_order_id();

        // Every accepted NEW is acknowledged before any of its fills
        ome.dispatch_client_response(&ClientResponse::new(
            ClientResponseType::Accepted,
            client_id,
            ticker_id,
            client_order_id,
            market_oid,
            side.as_i8(),
            price,
            0,
            qty,
        ));

        let qty_remains =
            self.find_match(ome, client_id, client_order_id, ticker_id, side, price, qty, market_oid);

        if qty_remains > 0 {
            let priority = self.next_priority(price);
            let Some(order_idx) = self.order_pool.allocate(Order {
                client_id,
                client_order_id,
                market_order_id: market_oid,
                side,
                price,
                qty: qty_remains,
                priority,
                prev: NIL,
                next: NIL,
            }) else {
                fatal!("<OrderBook> order pool exhausted on ticker {}", self.ticker_id);
            };
            self.add_order_to_book(order_idx as u32);

            ome.publish_market_update(&MarketUpdate::new(
                MarketUpdateType::Add,
                ticker_id,
                market_oid,
                side.as_i8(),
                price,
                qty_remains,
                priority,
            ));
        }
    }

    /// Cancels a resting order, if the (client, order id) pair names one.
    pub fn cancel_order(
        &mut self,
        ome: &EngineChannels,
        client_id: ClientId,
        order_id: OrderId,
        ticker_id: TickerId,
    ) {
        let in_range = (client_id as usize) < MAX_CLIENTS
            && (order_id as usize) < MAX_ORDER_IDS_PER_TICKER;
        let order_idx = if in_range {
            self.client_index[Self::client_slot(client_id, order_id)]
        } else {
            NIL
        };

        if order_idx == NIL {
            ome.dispatch_client_response(&ClientResponse::new(
                ClientResponseType::CancelRejected,
                client_id,
                ticker_id,
                order_id,
                INVALID_ORDER_ID,
                SIDE_INVALID,
                INVALID_PRICE,
                INVALID_QTY,
                INVALID_QTY,
            ));
            return;
        }

        let order = self.order_pool.get(order_idx as usize);
        let (market_oid, side, o_price, o_qty, o_priority) =
            (order.market_order_id, order.side, order.price, order.qty, order.priority);

        ome.dispatch_client_response(&ClientResponse::new(
            ClientResponseType::Canceled,
            client_id,
            ticker_id,
            order_id,
            market_oid,
            side.as_i8(),
            o_price,
            INVALID_QTY,
            o_qty,
        ));

        ome.publish_market_update(&MarketUpdate::new(
            MarketUpdateType::Cancel,
            ticker_id,
            market_oid,
            side.as_i8(),
            o_price,
            0,
            o_priority,
        ));

        self.remove_order_from_book(order_idx);
    }

    // ------------------------------------------------------------------
    // Matching
    // ------------------------------------------------------------------

    /// Matches an incoming order against the opposite side while it
    /// still crosses; returns the unmatched remainder.
    #[allow(clippy::too_many_arguments)]
    fn find_match(
        &mut self,
        ome: &EngineChannels,
        client_id: ClientId,
        client_order_id: OrderId,
        ticker_id: TickerId,
        side: Side,
        price: Price,
        qty: Qty,
        new_market_oid: OrderId,
    ) -> Qty {
        let mut qty_remains = qty;

        match side {
            Side::Buy => {
                while qty_remains > 0 && self.asks_head != NIL {
                    let head = self.level_pool.get(self.asks_head as usize);
                    if price < head.price {
                        break;
                    }
                    let order0 = head.order0;
                    self.match_order(
                        ome,
                        ticker_id,
                        client_id,
                        side,
                        client_order_id,
                        new_market_oid,
                        order0,
                        &mut qty_remains,
                    );
                }
            }
            Side::Sell => {
                while qty_remains > 0 && self.bids_head != NIL {
                    let head = self.level_pool.get(self.bids_head as usize);
                    if price > head.price {
                        break;
                    }
                    let order0 = head.order0;
                    self.match_order(
                        ome,
                        ticker_id,
                        client_id,
                        side,
                        client_order_id,
                        new_market_oid,
                        order0,
                        &mut qty_remains,
                    );
                }
            }
        }

        qty_remains
    }

    /// Executes one fill between the incoming order and the resting
    /// order `matched_idx` at the head of the opposite side.
    #[allow(clippy::too_many_arguments)]
    fn match_order(
        &mut self,
        ome: &EngineChannels,
        ticker_id: TickerId,
        client_id: ClientId,
        side: Side,
        client_order_id: OrderId,
        new_market_oid: OrderId,
        matched_idx: u32,
        qty_remains: &mut Qty,
    ) {
        let matched = self.order_pool.get_mut(matched_idx as usize);
        let fill = (*qty_remains).min(matched.qty);
        *qty_remains -= fill;
        matched.qty -= fill;

        let (m_client, m_coid, m_moid, m_side, m_price, m_qty, m_priority) = (
            matched.client_id,
            matched.client_order_id,
            matched.market_order_id,
            matched.side,
            matched.price,
            matched.qty,
            matched.priority,
        );

        // Both counterparties are told first, then the public trade print.
        // Fills reference the resting price: price improvement accrues to
        // the aggressor.
        ome.dispatch_client_response(&ClientResponse::new(
            ClientResponseType::Filled,
            client_id,
            ticker_id,
            client_order_id,
            new_market_oid,
            side.as_i8(),
            m_price,
            fill,
            *qty_remains,
        ));

        ome.dispatch_client_response(&ClientResponse::new(
            ClientResponseType::Filled,
            m_client,
            ticker_id,
            m_coid,
            m_moid,
            m_side.as_i8(),
            m_price,
            fill,
            m_qty,
        ));

        ome.publish_market_update(&MarketUpdate::new(
            MarketUpdateType::Trade,
            ticker_id,
            INVALID_ORDER_ID,
            side.as_i8(),
            m_price,
            fill,
            INVALID_PRIORITY,
        ));

        if m_qty == 0 {
            ome.publish_market_update(&MarketUpdate::new(
                MarketUpdateType::Cancel,
                ticker_id,
                m_moid,
                m_side.as_i8(),
                m_price,
                fill,
                INVALID_PRIORITY,
            ));
            self.remove_order_from_book(matched_idx);
        } else {
            ome.publish_market_update(&MarketUpdate::new(
                MarketUpdateType::Modify,
                ticker_id,
                m_moid,
                m_side.as_i8(),
                m_price,
                m_qty,
                m_priority,
            ));
        }
    }

    // ------------------------------------------------------------------
    // Linking and unlinking
    // ------------------------------------------------------------------

    #[inline]
    fn new_market_order_id(&mut self) -> OrderId {
        let oid = self.next_market_oid;
        self.next_market_oid += 1;
        oid
    }

    #[inline]
    fn client_slot(client_id: ClientId, client_order_id: OrderId) -> usize {
        client_id as usize * MAX_ORDER_IDS_PER_TICKER + client_order_id as usize
    }

    #[inline]
    fn price_to_index(price: Price) -> usize {
        price.rem_euclid(MAX_PRICE_LEVELS as Price) as usize
    }

    #[inline]
    fn level_at_price(&self, price: Price) -> u32 {
        self.level_index[Self::price_to_index(price)]
    }

    /// Priority of the next order to rest at `price`: one past the
    /// current tail of that level, or 1 for a fresh level.
    #[inline]
    fn next_priority(&self, price: Price) -> Priority {
        let lvl_idx = self.level_at_price(price);
        if lvl_idx == NIL {
            return 1;
        }
        let level = self.level_pool.get(lvl_idx as usize);
        let tail = self.level_tail(level);
        self.order_pool.get(tail as usize).priority + 1
    }

    /// The tail of a level's order ring is the head's predecessor.
    #[inline]
    fn level_tail(&self, level: &OrdersAtPrice) -> u32 {
        self.order_pool.get(level.order0 as usize).prev
    }

    #[inline]
    fn side_head(&self, side: Side) -> u32 {
        match side {
            Side::Buy => self.bids_head,
            Side::Sell => self.asks_head,
        }
    }

    #[inline]
    fn set_side_head(&mut self, side: Side, idx: u32) {
        match side {
            Side::Buy => self.bids_head = idx,
            Side::Sell => self.asks_head = idx,
        }
    }

    /// True when `a` is strictly more aggressive than `b` on `side`.
    #[inline]
    fn more_aggressive(side: Side, a: Price, b: Price) -> bool {
        match side {
            Side::Buy => a > b,
            Side::Sell => a < b,
        }
    }

    /// Links a freshly-allocated order into the book: appends it to its
    /// price level's ring, creating and placing the level first if the
    /// price is new, and records it in the client index.
    fn add_order_to_book(&mut self, order_idx: u32) {
        let order = self.order_pool.get(order_idx as usize);
        let (client_id, client_order_id, side, price) =
            (order.client_id, order.client_order_id, order.side, order.price);

        if (client_id as usize) >= MAX_CLIENTS
            || (client_order_id as usize) >= MAX_ORDER_IDS_PER_TICKER
        {
            fatal!(
                "<OrderBook> order identifiers out of range: client {} order {}",
                client_id,
                client_order_id
            );
        }

        let slot = Self::client_slot(client_id, client_order_id);
        if self.client_index[slot] != NIL {
            fatal!(
                "<OrderBook> duplicate live client order id: client {} order {}",
                client_id,
                client_order_id
            );
        }

        let lvl_idx = self.level_at_price(price);
        if lvl_idx == NIL {
            // First order at this price: singleton order ring, new level
            {
                let order = self.order_pool.get_mut(order_idx as usize);
                order.prev = order_idx;
                order.next = order_idx;
            }

            let Some(new_lvl) = self.level_pool.allocate(OrdersAtPrice {
                side,
                price,
                order0: order_idx,
                prev: NIL,
                next: NIL,
            }) else {
                fatal!("<OrderBook> price level pool exhausted on ticker {}", self.ticker_id);
            };
            self.add_price_level(new_lvl as u32);
        } else {
            let level = self.level_pool.get(lvl_idx as usize);
            if level.price != price {
                fatal!(
                    "<OrderBook> price slot collision: {} and {} share slot {}",
                    level.price,
                    price,
                    Self::price_to_index(price)
                );
            }
            debug_assert_eq!(level.side, side, "resting level on the wrong side");

            // Append as the new tail: between order0.prev and order0
            let order0 = level.order0;
            let tail = self.level_tail(level);
            {
                let order = self.order_pool.get_mut(order_idx as usize);
                order.prev = tail;
                order.next = order0;
            }
            self.order_pool.get_mut(tail as usize).next = order_idx;
            self.order_pool.get_mut(order0 as usize).prev = order_idx;
        }

        self.client_index[slot] = order_idx;
    }

    /// Inserts a new level into its side's ring at the correct
    /// aggressiveness position, and publishes it in the price slot table.
    fn add_price_level(&mut self, new_lvl: u32) {
        let (side, price) = {
            let level = self.level_pool.get(new_lvl as usize);
            (level.side, level.price)
        };

        let slot = Self::price_to_index(price);
        if self.level_index[slot] != NIL {
            fatal!("<OrderBook> price slot {} already occupied", slot);
        }
        self.level_index[slot] = new_lvl;

        let head = self.side_head(side);
        if head == NIL {
            // First level on this side: singleton ring
            let level = self.level_pool.get_mut(new_lvl as usize);
            level.prev = new_lvl;
            level.next = new_lvl;
            self.set_side_head(side, new_lvl);
            return;
        }

        // Find the insertion point: the first existing level the new one
        // outranks, scanning from the most aggressive end. Wrapping back
        // to the head means the new level is the least aggressive and
        // belongs at the tail - which is also "before head" in the ring.
        let mut insert_before = head;
        loop {
            let cur_price = self.level_pool.get(insert_before as usize).price;
            if Self::more_aggressive(side, price, cur_price) {
                break;
            }
            insert_before = self.level_pool.get(insert_before as usize).next;
            if insert_before == head {
                break;
            }
        }

        let prev = self.level_pool.get(insert_before as usize).prev;
        {
            let level = self.level_pool.get_mut(new_lvl as usize);
            level.prev = prev;
            level.next = insert_before;
        }
        self.level_pool.get_mut(prev as usize).next = new_lvl;
        self.level_pool.get_mut(insert_before as usize).prev = new_lvl;

        let head_price = self.level_pool.get(head as usize).price;
        if Self::more_aggressive(side, price, head_price) {
            self.set_side_head(side, new_lvl);
        }
    }

    /// Splices an order out of its level ring, releasing the level if it
    /// empties, and clears the client index entry.
    fn remove_order_from_book(&mut self, order_idx: u32) {
        let order = self.order_pool.get(order_idx as usize);
        let (client_id, client_order_id, side, price, prev, next) = (
            order.client_id,
            order.client_order_id,
            order.side,
            order.price,
            order.prev,
            order.next,
        );

        if prev == order_idx {
            // Only order at this price: the whole level goes
            self.remove_price_level(side, price);
        } else {
            self.order_pool.get_mut(prev as usize).next = next;
            self.order_pool.get_mut(next as usize).prev = prev;

            let lvl_idx = self.level_at_price(price);
            debug_assert_ne!(lvl_idx, NIL);
            let level = self.level_pool.get_mut(lvl_idx as usize);
            if level.order0 == order_idx {
                level.order0 = next;
            }
        }

        self.client_index[Self::client_slot(client_id, client_order_id)] = NIL;
        self.order_pool.deallocate(order_idx as usize);
    }

    /// Unlinks an empty level from its side ring, clears its price slot,
    /// and returns the block to the pool.
    fn remove_price_level(&mut self, side: Side, price: Price) {
        let slot = Self::price_to_index(price);
        let lvl_idx = self.level_index[slot];
        if lvl_idx == NIL {
            fatal!("<OrderBook> removing unknown price level {}", price);
        }

        let (prev, next) = {
            let level = self.level_pool.get(lvl_idx as usize);
            (level.prev, level.next)
        };

        if next == lvl_idx {
            // Last level on this side
            self.set_side_head(side, NIL);
        } else {
            self.level_pool.get_mut(prev as usize).next = next;
            self.level_pool.get_mut(next as usize).prev = prev;
            if self.side_head(side) == lvl_idx {
                self.set_side_head(side, next);
            }
        }

        self.level_index[slot] = NIL;
        self.level_pool.deallocate(lvl_idx as usize);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Best (highest) bid price, if any.
    pub fn best_bid(&self) -> Option<Price> {
        (self.bids_head != NIL).then(|| self.level_pool.get(self.bids_head as usize).price)
    }

    /// Best (lowest) ask price, if any.
    pub fn best_ask(&self) -> Option<Price> {
        (self.asks_head != NIL).then(|| self.level_pool.get(self.asks_head as usize).price)
    }

    /// Levels on one side from most to least aggressive, as
    /// (price, total qty, order count) triples.
    pub fn levels(&self, side: Side) -> Vec<(Price, Qty, usize)> {
        let mut out = Vec::new();
        let head = self.side_head(side);
        if head == NIL {
            return out;
        }

        let mut lvl_idx = head;
        loop {
            let level = self.level_pool.get(lvl_idx as usize);

            let mut total_qty: Qty = 0;
            let mut count = 0usize;
            let mut order_idx = level.order0;
            loop {
                let order = self.order_pool.get(order_idx as usize);
                total_qty += order.qty;
                count += 1;
                order_idx = order.next;
                if order_idx == level.order0 {
                    break;
                }
            }

            out.push((level.price, total_qty, count));
            lvl_idx = level.next;
            if lvl_idx == head {
                break;
            }
        }
        out
    }

    /// Priorities along one level's ring, head first. Empty if the price
    /// has no live level.
    pub fn level_priorities(&self, price: Price) -> Vec<Priority> {
        let mut out = Vec::new();
        let lvl_idx = self.level_at_price(price);
        if lvl_idx == NIL {
            return out;
        }
        let level = self.level_pool.get(lvl_idx as usize);
        if level.price != price {
            return out;
        }

        let mut order_idx = level.order0;
        loop {
            let order = self.order_pool.get(order_idx as usize);
            out.push(order.priority);
            order_idx = order.next;
            if order_idx == level.order0 {
                break;
            }
        }
        out
    }

    /// Human-readable dump of both sides, asks first, used when logging
    /// final book state. Verifies side-ring price ordering as it walks.
    pub fn summary(&self) -> String {
        let mut out = format!("----- ORDER BOOK FOR TICKER {} -----\n", self.ticker_id);

        for (label, side) in [("ASK", Side::Sell), ("BID", Side::Buy)] {
            let levels = self.levels(side);
            if levels.is_empty() {
                out.push_str(&format!("  [no {}S]\n", label));
                continue;
            }
            let mut last_price: Option<Price> = None;
            for (i, (price, qty, count)) in levels.iter().enumerate() {
                if let Some(last) = last_price {
                    debug_assert!(
                        Self::more_aggressive(side, last, *price),
                        "side ring out of order: {} before {}",
                        last,
                        price
                    );
                }
                last_price = Some(*price);
                out.push_str(&format!(
                    "  {}[{}] {:5} @ {:6} ({} orders)\n",
                    label, i, qty, price, count
                ));
            }
        }
        out
    }
}
