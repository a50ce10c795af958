//! The boundary to the network provider.
//!
//! A [`Transport`] is one handle bound to a remote endpoint. It never calls back into the
//! connection directly: every notification (state changes, path signals, send and receive
//! completions) is pushed through the [`TransportEvents`] sink it was registered with, and
//! the connection consumes them on its own task. Each sink is stamped with the generation
//! of the handle it belongs to so late notifications from a replaced handle can be told
//! apart from the live one.
//!
//! - [`tungstenite::ConnectionFactory`]: the `tokio-tungstenite` provider
//! - [`socks`]: the SOCKS5 tunnel used by the proxy hook

#![expect(
    clippy::module_name_repetitions,
    reason = "Transport types include the module name to indicate their scope"
)]

pub mod socks;
pub mod tungstenite;

use tokio::sync::mpsc;

use crate::Result;
use crate::frame::Frame;
use crate::state::ProviderState;

/// A single transport handle.
///
/// Calls must not block: `start`, `send`, `receive`, and `cancel` only request work whose
/// outcome is reported later through the registered [`TransportEvents`].
pub trait Transport: Send + 'static {
    /// Install the sink for all notifications of this handle. Called once, before
    /// [`start`](Self::start).
    fn register(&mut self, events: TransportEvents);

    fn start(&mut self);

    /// Request cancellation. A handle must eventually report
    /// [`ProviderState::Cancelled`] (or [`ProviderState::Failed`]) after this call, and
    /// complete any outstanding receive with an error.
    fn cancel(&mut self);

    /// Queue a frame. The completion is reported with [`TransportEvents::sent`].
    fn send(&mut self, frame: Frame);

    /// Request the next inbound frame. Only one request is outstanding at a time; the
    /// completion is reported with [`TransportEvents::received`].
    fn receive(&mut self);
}

/// Builds unstarted transport handles for a fixed endpoint.
pub trait TransportFactory: Send + 'static {
    type Transport: Transport;

    fn make(&self) -> Self::Transport;
}

#[derive(Debug)]
pub(crate) enum Event {
    State(ProviderState),
    Viability(bool),
    BetterPath(bool),
    Received(Result<Frame>),
    Sent(Result<()>),
    Heartbeat,
}

#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) generation: u64,
    pub(crate) event: Event,
}

/// Notification sink handed to a [`Transport`].
///
/// Sending never fails from the transport's point of view: once the owning connection is
/// gone, notifications are dropped.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl TransportEvents {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { generation, tx }
    }

    /// The handle moved to a new lifecycle state.
    pub fn state(&self, state: ProviderState) {
        self.push(Event::State(state));
    }

    /// The current network path stopped (`false`) or resumed (`true`) carrying traffic.
    pub fn viability(&self, viable: bool) {
        self.push(Event::Viability(viable));
    }

    /// A preferable network path became available (`true`) or went away (`false`).
    pub fn better_path(&self, available: bool) {
        self.push(Event::BetterPath(available));
    }

    /// Completion of the outstanding [`Transport::receive`] request.
    pub fn received(&self, result: Result<Frame>) {
        self.push(Event::Received(result));
    }

    /// Completion of a [`Transport::send`] request.
    pub fn sent(&self, result: Result<()>) {
        self.push(Event::Sent(result));
    }

    pub(crate) fn heartbeat(&self) {
        self.push(Event::Heartbeat);
    }

    /// Whether the owning connection has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&self, event: Event) {
        _ = self.tx.send(Envelope {
            generation: self.generation,
            event,
        });
    }
}
