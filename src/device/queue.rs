//! Outgoing update batching.
//!
//! The first update of a tick opens a network queue stamped with the
//! current time; every later update in the same tick shares that timetag.
//! The poll tick sends the queue and clears the pending state.

use crate::network::NetworkDevice;
use crate::types::Timetag;

#[derive(Debug, Default)]
pub struct UpdateQueue {
    pending: Option<Timetag>,
    sent: u64,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the tick's queue unless one is already pending, and return its
    /// timetag
    pub fn maybe_start(&mut self, network: &mut dyn NetworkDevice) -> Timetag {
        if let Some(time) = self.pending {
            return time;
        }
        let time = Timetag::now();
        network.start_queue(time);
        self.pending = Some(time);
        time
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_time(&self) -> Option<Timetag> {
        self.pending
    }

    /// Send the pending queue. Returns its timetag, or `None` when nothing
    /// was pending.
    pub fn flush(&mut self, network: &mut dyn NetworkDevice) -> Option<Timetag> {
        let time = self.pending.take()?;
        network.send_queue(time);
        self.sent += 1;
        tracing::trace!("sent queue {}", time);
        Some(time)
    }

    /// Batches sent so far
    pub fn sent(&self) -> u64 {
        self.sent
    }
}
