#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, watch};

use crate::Result;
use crate::config::Config;
use crate::delegate::ConnectionDelegate;
use crate::error::Error;
use crate::frame::{Frame, Opcode};
use crate::heartbeat::HeartbeatScheduler;
use crate::reconnect::ReconnectionScheduler;
use crate::state::{ConnectionState, ProviderState};
use crate::transport::tungstenite::ConnectionFactory;
use crate::transport::{Envelope, Event, Transport, TransportEvents, TransportFactory};

/// Payload of the liveness probe.
const HEARTBEAT_PAYLOAD: &[u8] = b"ping";

/// Contract shared by every WebSocket connection binding.
///
/// None of the methods block. `connect` and `disconnect` request a transition whose
/// completion is reported through [`ConnectionDelegate::on_state_changed`]; `send_*`
/// failures are reported through [`ConnectionDelegate::on_error`].
pub trait Connection: Send + Sync {
    fn connect(&self);

    fn disconnect(&self);

    fn send_text(&self, text: &str);

    fn send_binary(&self, bytes: Vec<u8>);

    fn status(&self) -> ConnectionState;

    /// Only a weak reference is kept.
    fn set_delegate(&self, delegate: &Arc<dyn ConnectionDelegate>);
}

enum Command {
    Connect,
    Disconnect,
    Send(Frame),
    SetDelegate(Weak<dyn ConnectionDelegate>),
}

/// WebSocket connection with heartbeat and path-aware reconnection.
///
/// All lifecycle work happens on one background task that owns the transport handle, the
/// heartbeat ticker and the pending reconnection; public methods only enqueue commands for
/// it. At most one handle is live at a time:
/// - `connect` while a handle exists does nothing
/// - losing path viability, or learning about a better path, cancels the handle and arms a
///   reconnection that only runs once the cancellation has been observed
/// - a heartbeat probe is sent as soon as the handle is ready and then every
///   [`Config::heartbeat_interval`], until teardown
///
/// Dropping the last clone cancels the live handle without notifying the delegate.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use resilient_websocket::config::Config;
/// use resilient_websocket::{Connection as _, ConnectionDelegate, WebSocketConnection};
///
/// # fn run(delegate: Arc<dyn ConnectionDelegate>) -> resilient_websocket::Result<()> {
/// let connection = WebSocketConnection::new("wss://echo.example/socket", Config::default())?;
/// connection.set_delegate(&delegate);
/// connection.connect();
/// connection.send_text("hello");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct WebSocketConnection {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl WebSocketConnection {
    /// Create a connection to `endpoint` backed by the `tokio-tungstenite` provider.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        let factory = ConnectionFactory::new(endpoint, config.clone())?;
        Ok(Self::with_factory(factory, &config))
    }

    /// Create a connection whose handles are built by `factory`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_factory<F: TransportFactory>(factory: F, config: &Config) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let worker = Worker {
            factory,
            delegate: None,
            handle: None,
            generation: 0,
            heartbeat: HeartbeatScheduler::new(config.heartbeat_interval()),
            reconnection: ReconnectionScheduler::default(),
            events_tx,
            state_tx,
        };

        tokio::spawn(worker.run(commands_rx, events_rx));

        Self {
            commands: commands_tx,
            state_rx,
        }
    }

    /// Subscribe to status changes.
    ///
    /// Unlike the delegate, the receiver only sees the status derived from the handle, so
    /// it never reports the extra `Disconnected` of an inbound close frame.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Connection task has terminated, dropping command");
        }
    }
}

impl Connection for WebSocketConnection {
    fn connect(&self) {
        self.command(Command::Connect);
    }

    fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    fn send_text(&self, text: &str) {
        self.command(Command::Send(Frame::text(text)));
    }

    fn send_binary(&self, bytes: Vec<u8>) {
        self.command(Command::Send(Frame::binary(bytes)));
    }

    fn status(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    fn set_delegate(&self, delegate: &Arc<dyn ConnectionDelegate>) {
        self.command(Command::SetDelegate(Arc::downgrade(delegate)));
    }
}

struct Handle<T> {
    transport: T,
    generation: u64,
    /// Last state the transport reported.
    state: ProviderState,
}

struct Worker<F: TransportFactory> {
    factory: F,
    delegate: Option<Weak<dyn ConnectionDelegate>>,
    handle: Option<Handle<F::Transport>>,
    /// Generation of the most recently created handle.
    generation: u64,
    heartbeat: HeartbeatScheduler,
    reconnection: ReconnectionScheduler,
    events_tx: mpsc::UnboundedSender<Envelope>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<F: TransportFactory> Worker<F> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Envelope>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(envelope) = events.recv() => self.on_event(envelope),
            }
        }

        self.shutdown();
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect(),
            Command::Send(frame) => self.send(frame),
            Command::SetDelegate(delegate) => self.delegate = Some(delegate),
        }
    }

    fn connect(&mut self) {
        if self.handle.is_some() {
            #[cfg(feature = "tracing")]
            tracing::trace!("Handle already live, ignoring connect");
            return;
        }

        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;

        #[cfg(feature = "tracing")]
        tracing::debug!(generation, "Creating transport handle");

        let mut transport = self.factory.make();
        transport.register(TransportEvents::new(generation, self.events_tx.clone()));
        transport.receive();
        transport.start();

        self.handle = Some(Handle {
            transport,
            generation,
            state: ProviderState::Setup,
        });
    }

    fn disconnect(&mut self) {
        // Teardown completes once the transport reports a terminal state.
        if let Some(handle) = self.handle.as_mut() {
            handle.transport.cancel();
        }
    }

    fn send(&mut self, frame: Frame) {
        let Some(handle) = self.handle.as_mut() else {
            self.report(&Error::not_connected());
            return;
        };

        if let Some(error) = handle.state.waiting_error() {
            let error = error.clone();
            self.report(&error);
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(opcode = %frame.opcode(), len = frame.payload().len(), "Sending frame");

        handle.transport.send(frame);
    }

    fn on_event(&mut self, envelope: Envelope) {
        let Envelope { generation, event } = envelope;

        let live = self
            .handle
            .as_ref()
            .is_some_and(|handle| handle.generation == generation);
        if !live {
            // Completions of a replaced handle still surface their errors, typically the
            // cancellation of an in-flight receive.
            match event {
                Event::Received(Err(e)) | Event::Sent(Err(e)) => self.report(&e),
                _stale => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(generation, event = ?_stale, "Ignoring event from replaced handle");
                }
            }
            return;
        }

        match event {
            Event::State(state) => self.on_state(state),
            Event::Viability(viable) => {
                if !viable {
                    self.replace_handle("path is no longer viable");
                }
            }
            Event::BetterPath(available) => {
                if available {
                    self.replace_handle("better path available");
                }
            }
            Event::Received(result) => self.on_received(result),
            Event::Sent(result) => {
                if let Err(e) = result {
                    self.report(&e);
                }
            }
            Event::Heartbeat => self.on_heartbeat(generation),
        }
    }

    fn on_state(&mut self, state: ProviderState) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        handle.state = state.clone();
        let generation = handle.generation;

        self.state_tx.send_replace(ConnectionState::from(&state));

        #[cfg(feature = "tracing")]
        tracing::debug!(generation, ?state, "Transport state changed");

        match state {
            ProviderState::Setup => {}
            ProviderState::Preparing => self.notify_state(ConnectionState::Connecting),
            ProviderState::Ready => {
                self.notify_state(ConnectionState::Connected);
                self.heartbeat.start(
                    generation,
                    TransportEvents::new(generation, self.events_tx.clone()),
                );
            }
            ProviderState::Waiting(e) => self.report(&e),
            ProviderState::Failed(e) => {
                self.report(&e);
                self.close_connection();
            }
            ProviderState::Cancelled => self.close_connection(),
        }
    }

    /// Cancel the live handle and arm a reconnection for when its teardown completes.
    fn replace_handle(&mut self, _reason: &'static str) {
        if let Some(handle) = self.handle.as_mut() {
            handle.transport.cancel();
        }
        let _pending = self.reconnection.arm();

        #[cfg(feature = "tracing")]
        tracing::debug!(reason = _reason, reconnection = _pending.id, "Scheduling reconnection");
    }

    fn close_connection(&mut self) {
        self.heartbeat.stop();
        if let Some(mut handle) = self.handle.take() {
            handle.transport.cancel();
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        self.notify_state(ConnectionState::Disconnected);

        // The old handle is released, so the reconnection can no longer overlap with it.
        if let Some(_pending) = self.reconnection.fire() {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                reconnection = _pending.id,
                waited = ?_pending.armed_at.elapsed(),
                "Reconnecting"
            );

            self.connect();
        }
    }

    fn on_received(&mut self, result: Result<Frame>) {
        match result {
            Ok(frame) => {
                self.dispatch(frame);
                if let Some(handle) = self.handle.as_mut() {
                    handle.transport.receive();
                }
            }
            Err(e) => self.report(&e),
        }
    }

    fn dispatch(&self, frame: Frame) {
        if frame.payload().is_empty() {
            return;
        }

        match frame.opcode() {
            Opcode::Binary => {
                if let Some(delegate) = self.delegate() {
                    delegate.on_binary_message(frame.into_payload());
                }
            }
            Opcode::Text => match String::from_utf8(frame.into_payload()) {
                Ok(text) => {
                    if let Some(delegate) = self.delegate() {
                        delegate.on_text_message(text);
                    }
                }
                Err(_e) => {
                    // Undecodable text is dropped without an error.
                    #[cfg(feature = "tracing")]
                    tracing::trace!(error = %_e, "Dropping text frame that is not UTF-8");
                }
            },
            Opcode::Close => self.notify_state(ConnectionState::Disconnected),
            // The transport answers peer pings on its own.
            Opcode::Ping | Opcode::Pong | Opcode::Continuation => {}
        }
    }

    fn on_heartbeat(&mut self, generation: u64) {
        if !self.heartbeat.is_active_for(generation) {
            return;
        }
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        if !matches!(handle.state, ProviderState::Ready) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(generation, "Sending heartbeat probe");

        handle.transport.send(Frame::ping(HEARTBEAT_PAYLOAD));
    }

    fn shutdown(&mut self) {
        self.heartbeat.stop();
        self.reconnection.fire();
        if let Some(mut handle) = self.handle.take() {
            handle.transport.cancel();
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Connection dropped, task terminating");
    }

    fn delegate(&self) -> Option<Arc<dyn ConnectionDelegate>> {
        self.delegate.as_ref()?.upgrade()
    }

    fn notify_state(&self, state: ConnectionState) {
        if let Some(delegate) = self.delegate() {
            delegate.on_state_changed(state);
        }
    }

    fn report(&self, error: &Error) {
        #[cfg(feature = "tracing")]
        tracing::debug!(%error, "Reporting error to delegate");

        if let Some(delegate) = self.delegate() {
            delegate.on_error(error);
        }
    }
}
