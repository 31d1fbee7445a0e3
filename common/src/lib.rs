//! Shared low-latency building blocks for the matchbook exchange:
//! SPSC queues, memory pools, the async logger, the monotonic clock, and
//! network wrappers.

pub mod lf_queue;
pub mod logging;
pub mod mem_pool;
pub mod net;
pub mod time;
pub mod types;

pub use types::*;
