//! Single-slot, debounced reconnection.
//!
//! Reconnection is split in two phases. Adverse path signals *arm* the slot; only the
//! teardown of the handle being replaced *fires* it. Until the old handle's cancellation
//! has been observed the new attempt cannot start, so two handles are never live at once.

use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingReconnection {
    pub(crate) id: u64,
    pub(crate) armed_at: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct ReconnectionScheduler {
    pending: Option<PendingReconnection>,
    next_id: u64,
}

impl ReconnectionScheduler {
    /// Arm the slot, cancelling and replacing any reconnection that is still pending.
    pub(crate) fn arm(&mut self) -> PendingReconnection {
        let pending = PendingReconnection {
            id: self.next_id,
            armed_at: Instant::now(),
        };
        self.next_id = self.next_id.wrapping_add(1);

        if let Some(_replaced) = self.pending.replace(pending) {
            #[cfg(feature = "tracing")]
            tracing::debug!(replaced = _replaced.id, by = pending.id, "Replacing pending reconnection");
        }

        pending
    }

    /// Consume the pending reconnection, if any. The slot is empty afterwards, so a
    /// reconnection runs at most once.
    pub(crate) fn fire(&mut self) -> Option<PendingReconnection> {
        self.pending.take()
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
