// FIFO sequencer
//
// TCP multiplexing across many client sockets can hand the gateway
// events in an order that differs from their timestamped arrival. The
// sequencer buffers each batch of requests with its RX timestamp, sorts
// by timestamp (stable, so ties keep insertion order), and publishes the
// batch to the matching engine's request queue in strict arrival order.

use std::sync::Arc;

use matchbook_common::time::Nanos;
use matchbook_common::types::MAX_PENDING_REQUESTS;
use matchbook_common::{fatal, log_error};

use crate::protocol::{ClientRequest, ClientRequestQueue};

/// A client request awaiting sequencing, tagged with its RX timestamp.
#[derive(Clone, Copy)]
struct PendingRequest {
    t_rx: Nanos,
    request: ClientRequest,
}

/// Restores strict RX-timestamp order on each batch of requests received
/// across the gateway's sockets before they reach the engine.
pub struct FifoSequencer {
    tx_requests: Arc<ClientRequestQueue>,
    pending: Vec<PendingRequest>,
}

impl FifoSequencer {
    pub fn new(tx_requests: Arc<ClientRequestQueue>) -> Self {
        Self {
            tx_requests,
            pending: Vec::with_capacity(MAX_PENDING_REQUESTS),
        }
    }

    /// Buffers one request with its RX timestamp.
    ///
    /// # Fatal
    ///
    /// Overflowing the pending buffer is an invariant violation: it is
    /// sized for the largest batch a poll cycle can produce.
    pub fn push_client_request(&mut self, request: &ClientRequest, t_rx: Nanos) {
        if self.pending.len() >= MAX_PENDING_REQUESTS {
            fatal!("<FifoSequencer> too many pending requests");
        }
        self.pending.push(PendingRequest {
            t_rx,
            request: *request,
        });
    }

    /// Sorts the pending batch by RX timestamp and pushes it to the
    /// engine's request queue in order, then resets the buffer.
    ///
    /// A full request queue is reported and the record dropped; the
    /// sequencer still advances.
    pub fn sequence_and_publish(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        // Stable sort: requests with identical timestamps keep their
        // socket-poll order
        self.pending.sort_by_key(|p| p.t_rx);

        for pending in &self.pending {
            if self.tx_requests.push(pending.request).is_err() {
                log_error!("<FifoSequencer> request queue full; request dropped");
            }
        }

        self.pending.clear();
    }

    /// Number of requests buffered in the current batch.
    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
