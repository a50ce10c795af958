//! Periodic liveness probing while a connection is ready.

use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::transport::TransportEvents;

/// `tokio::time::interval` rejects a zero period.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Drives heartbeat ticks for the live handle.
///
/// The ticker only emits [`Event::Heartbeat`](crate::transport::Event) into the
/// connection's event channel; the probe itself is sent by the connection so that it goes
/// through the same handle as every other frame. Ticks are tagged with the generation of
/// the handle they were started for, and [`is_active_for`](Self::is_active_for) lets the
/// connection drop ticks that were already queued when the scheduler stopped.
#[derive(Debug)]
pub(crate) struct HeartbeatScheduler {
    period: Duration,
    running: Option<Running>,
}

#[derive(Debug)]
struct Running {
    generation: u64,
    token: CancellationToken,
}

impl HeartbeatScheduler {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period: period.max(MIN_HEARTBEAT_INTERVAL),
            running: None,
        }
    }

    /// Start ticking for the handle behind `events`: once immediately, then every period.
    /// A previous ticker is stopped first.
    pub(crate) fn start(&mut self, generation: u64, events: TransportEvents) {
        self.stop();

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        #[cfg(feature = "tracing")]
        tracing::debug!(generation, period = ?self.period, "Starting heartbeat");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        if events.is_closed() {
                            break;
                        }
                        events.heartbeat();
                    }
                }
            }
        });

        self.running = Some(Running { generation, token });
    }

    /// Stop ticking. Returns whether a ticker was running.
    pub(crate) fn stop(&mut self) -> bool {
        let Some(running) = self.running.take() else {
            return false;
        };
        running.token.cancel();

        #[cfg(feature = "tracing")]
        tracing::debug!(generation = running.generation, "Stopped heartbeat");

        true
    }

    pub(crate) fn is_active_for(&self, generation: u64) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| running.generation == generation)
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
