#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of the helpers"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use resilient_websocket::error::{Error, Kind};
use resilient_websocket::frame::Frame;
use resilient_websocket::state::ProviderState;
use resilient_websocket::transport::{Transport, TransportEvents, TransportFactory};
use resilient_websocket::{ConnectionDelegate, ConnectionState};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// How long a test waits for something that is expected to happen.
pub const PATIENCE: Duration = Duration::from_secs(2);

/// How long a test waits before concluding that nothing else will happen.
pub const QUIET: Duration = Duration::from_millis(100);

/// A delegate callback, as observed by a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    State(ConnectionState),
    Text(String),
    Binary(Vec<u8>),
    Error(Kind),
}

/// Delegate that forwards every callback into a channel.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Observed>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Observed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl ConnectionDelegate for Recorder {
    fn on_state_changed(&self, state: ConnectionState) {
        _ = self.tx.send(Observed::State(state));
    }

    fn on_text_message(&self, text: String) {
        _ = self.tx.send(Observed::Text(text));
    }

    fn on_binary_message(&self, bytes: Vec<u8>) {
        _ = self.tx.send(Observed::Binary(bytes));
    }

    fn on_error(&self, error: &Error) {
        _ = self.tx.send(Observed::Error(error.kind()));
    }
}

pub async fn next_observed(rx: &mut mpsc::UnboundedReceiver<Observed>) -> Observed {
    timeout(PATIENCE, rx.recv())
        .await
        .expect("timed out waiting for a delegate callback")
        .expect("recorder dropped")
}

/// Skip callbacks until `wanted` shows up.
pub async fn wait_for(rx: &mut mpsc::UnboundedReceiver<Observed>, wanted: &Observed) {
    loop {
        if next_observed(rx).await == *wanted {
            return;
        }
    }
}

/// Assert that no callback arrives for a while.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Observed>) {
    if let Ok(Some(observed)) = timeout(QUIET, rx.recv()).await {
        panic!("unexpected delegate callback: {observed:?}");
    }
}

/// A request the connection made to a [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start,
    Cancel,
    Receive,
    Send(Frame),
}

/// Test-side view of one transport handle: inject notifications through `events`, observe
/// what the connection asked for through `calls`.
pub struct MockRemote {
    pub events: TransportEvents,
    pub calls: mpsc::UnboundedReceiver<Call>,
}

impl MockRemote {
    pub async fn next_call(&mut self) -> Call {
        timeout(PATIENCE, self.calls.recv())
            .await
            .expect("timed out waiting for a transport call")
            .expect("transport dropped")
    }

    /// Skip calls until a matching one shows up.
    pub async fn wait_for_call(&mut self, wanted: &Call) {
        loop {
            if self.next_call().await == *wanted {
                return;
            }
        }
    }

    /// Next frame the connection sent, skipping any other call.
    pub async fn next_sent(&mut self) -> Frame {
        loop {
            if let Call::Send(frame) = self.next_call().await {
                return frame;
            }
        }
    }

    /// Drive the handle to ready, the way a provider reports a successful dial.
    pub fn ready(&self) {
        self.events.state(ProviderState::Preparing);
        self.events.state(ProviderState::Ready);
    }

    /// Drain calls made so far without waiting.
    pub fn drain_calls(&mut self) -> Vec<Call> {
        let mut calls = Vec::new();
        while let Ok(call) = self.calls.try_recv() {
            calls.push(call);
        }
        calls
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MockOptions {
    /// Answer every text or binary send with the same frame as an inbound message
    pub echo: bool,
    /// Report `Cancelled` as soon as the handle is cancelled
    pub auto_cancel: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            echo: false,
            auto_cancel: true,
        }
    }
}

/// Factory handing every created handle's [`MockRemote`] to the test.
pub struct MockFactory {
    options: MockOptions,
    remotes: mpsc::UnboundedSender<MockRemote>,
}

impl MockFactory {
    #[must_use]
    pub fn new(options: MockOptions) -> (Self, mpsc::UnboundedReceiver<MockRemote>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        (Self { options, remotes }, rx)
    }
}

impl TransportFactory for MockFactory {
    type Transport = MockTransport;

    fn make(&self) -> Self::Transport {
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();

        MockTransport {
            options: self.options,
            events: None,
            calls: calls_tx,
            pending: Some((calls_rx, self.remotes.clone())),
            cancelled: false,
        }
    }
}

pub struct MockTransport {
    options: MockOptions,
    events: Option<TransportEvents>,
    calls: mpsc::UnboundedSender<Call>,
    pending: Option<(mpsc::UnboundedReceiver<Call>, mpsc::UnboundedSender<MockRemote>)>,
    cancelled: bool,
}

impl Transport for MockTransport {
    fn register(&mut self, events: TransportEvents) {
        self.events = Some(events);
    }

    fn start(&mut self) {
        _ = self.calls.send(Call::Start);

        if let (Some(events), Some((calls, remotes))) = (self.events.clone(), self.pending.take()) {
            _ = remotes.send(MockRemote { events, calls });
        }
    }

    fn cancel(&mut self) {
        _ = self.calls.send(Call::Cancel);

        if self.cancelled {
            return;
        }
        self.cancelled = true;

        if self.options.auto_cancel
            && let Some(events) = &self.events
        {
            events.state(ProviderState::Cancelled);
        }
    }

    fn send(&mut self, frame: Frame) {
        _ = self.calls.send(Call::Send(frame.clone()));

        if let Some(events) = &self.events {
            events.sent(Ok(()));
            if self.options.echo
                && matches!(
                    frame.opcode(),
                    resilient_websocket::frame::Opcode::Text
                        | resilient_websocket::frame::Opcode::Binary
                )
            {
                events.received(Ok(frame));
            }
        }
    }

    fn receive(&mut self) {
        _ = self.calls.send(Call::Receive);
    }
}

/// Local WebSocket server echoing text and binary frames back to the client.
pub struct EchoServer {
    pub addr: SocketAddr,
    /// Every frame the server received, including pings
    pub received: mpsc::UnboundedReceiver<Message>,
    /// Close every open session from the server side
    close_tx: tokio::sync::broadcast::Sender<()>,
}

impl EchoServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (close_tx, _) = tokio::sync::broadcast::channel::<()>(4);
        let close = close_tx.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(mut ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                let received_tx = received_tx.clone();
                let mut close_rx = close.subscribe();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            message = ws_stream.next() => {
                                let Some(Ok(message)) = message else {
                                    break;
                                };
                                _ = received_tx.send(message.clone());

                                match message {
                                    Message::Text(_) | Message::Binary(_) => {
                                        if ws_stream.send(message).await.is_err() {
                                            break;
                                        }
                                    }
                                    Message::Close(_) => break,
                                    _ => {}
                                }
                            }
                            _ = close_rx.recv() => {
                                _ = ws_stream.close(None).await;
                                break;
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            received,
            close_tx,
        }
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// Close all sessions from the server side.
    pub fn close_all(&self) {
        _ = self.close_tx.send(());
    }

    /// Next frame the server received that matches `predicate`.
    pub async fn wait_for_frame<P: Fn(&Message) -> bool>(&mut self, predicate: P) -> Message {
        loop {
            let message = timeout(PATIENCE, self.received.recv())
                .await
                .expect("timed out waiting for the server to receive a frame")
                .expect("server stopped");
            if predicate(&message) {
                return message;
            }
        }
    }
}
