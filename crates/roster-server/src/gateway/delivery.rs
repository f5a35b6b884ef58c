//! Tick-driven event delivery for one connection.
//!
//! Every tick the loop scans the shared log for undelivered entries matching
//! the connection's authorized subjects. An entry is claimed *before* the
//! send; if the send does not complete the claim is released so the entry can
//! be retried on a later tick or picked up by another authorized connection.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use roster_core::protocol::ServerFrame;
use roster_events::EventLog;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::connection::{ClientConnection, SendOutcome};
use crate::metrics::EVENTS_DELIVERED_TOTAL;

/// One delivery pass: scan, claim, send.
///
/// Returns the number of entries delivered. Stops early when the connection
/// reports closed — remaining claims are released for other connections.
pub fn deliver_pending(connection: &ClientConnection, events: &EventLog) -> usize {
    let subjects = connection.subject_ids();
    if subjects.is_empty() {
        return 0;
    }
    let mut delivered = 0usize;
    for entry in events.pending_for(&subjects) {
        // Claim first so no other connection can double-deliver this entry.
        if !events.claim(entry.seq) {
            continue;
        }
        let frame = ServerFrame::event(entry.subject, entry.payload.clone());
        match connection.send(Arc::new(frame.to_json())) {
            SendOutcome::Delivered => {
                delivered += 1;
                counter!(EVENTS_DELIVERED_TOTAL).increment(1);
            }
            SendOutcome::Busy => {
                // Queue full: leave the entry for a later tick.
                events.release(entry.seq);
            }
            SendOutcome::Closed => {
                events.release(entry.seq);
                break;
            }
        }
    }
    delivered
}

/// Run the delivery loop until the connection closes or `cancel` fires.
///
/// Does not unregister the connection — session teardown owns that.
#[instrument(skip_all, fields(conn_id = %connection.id))]
pub async fn run_delivery_loop(
    connection: Arc<ClientConnection>,
    events: Arc<EventLog>,
    tick: Duration,
    cancel: CancellationToken,
) {
    let mut interval = time::interval(tick);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if connection.is_closed() {
                    break;
                }
                let delivered = deliver_pending(&connection, &events);
                if delivered > 0 {
                    debug!(delivered, "delivered events");
                }
            }
            () = cancel.cancelled() => break,
        }
    }
    debug!("delivery loop exited");
}
