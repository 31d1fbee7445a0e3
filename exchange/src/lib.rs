//! The matchbook exchange core: the order matching engine, the client
//! order gateway that feeds it, and the market-data publisher that fans
//! its updates out. The three workers run on pinned threads and
//! communicate only through SPSC queues.

pub mod fifo_sequencer;
pub mod market_data;
pub mod matching_engine;
pub mod order_book;
pub mod order_gateway;
pub mod protocol;
