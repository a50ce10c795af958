//! `tokio-tungstenite` provider.
//!
//! Each [`TungsteniteTransport`] drives one WebSocket stream from a background task. The
//! task waits for explicit receive requests instead of reading eagerly, so inbound frames
//! are handed out one at a time in step with the connection's receive loop. Peer pings are
//! answered by tungstenite itself while reading.

use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, client_async_tls_with_config,
    connect_async_tls_with_config,
};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{Transport, TransportEvents, TransportFactory, socks};
use crate::Result;
use crate::config::{Config, Proxy};
use crate::error::{Error, Kind, TransportError};
use crate::frame::Frame;
use crate::state::ProviderState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a closing handshake may take before the stream is dropped anyway.
const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Transport security selected from the endpoint scheme.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Security {
    /// `wss://`
    Tls,
    /// `ws://`
    Plain,
}

impl Security {
    fn for_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "wss" => Some(Self::Tls),
            "ws" => Some(Self::Plain),
            _ => None,
        }
    }
}

/// Builds [`TungsteniteTransport`] handles for one endpoint.
///
/// ```
/// use resilient_websocket::config::Config;
/// use resilient_websocket::transport::tungstenite::{ConnectionFactory, Security};
///
/// let factory = ConnectionFactory::new("wss://echo.example/socket", Config::default())?;
/// assert_eq!(factory.security(), Security::Tls);
/// # Ok::<(), resilient_websocket::error::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    dial: Dial,
}

impl ConnectionFactory {
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        let (endpoint, security) = parse_endpoint(endpoint)?;

        Ok(Self {
            dial: Dial {
                security,
                proxy: config.proxy().cloned(),
                disable_nagle: config.disable_nagle(),
                endpoint,
            },
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.dial.endpoint
    }

    #[must_use]
    pub fn security(&self) -> Security {
        self.dial.security
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&Proxy> {
        self.dial.proxy.as_ref()
    }
}

impl TransportFactory for ConnectionFactory {
    type Transport = TungsteniteTransport;

    fn make(&self) -> Self::Transport {
        TungsteniteTransport::new(self.dial.clone())
    }
}

/// Parse a WebSocket endpoint and select its transport security from the scheme.
pub(crate) fn parse_endpoint(endpoint: &str) -> Result<(Url, Security)> {
    let endpoint = Url::parse(endpoint)?;
    let security = Security::for_scheme(endpoint.scheme()).ok_or_else(|| {
        Error::validation(format!(
            "unsupported WebSocket scheme `{}`, expected ws or wss",
            endpoint.scheme()
        ))
    })?;
    if endpoint.host_str().is_none() {
        return Err(Error::validation(format!("endpoint {endpoint} has no host")));
    }

    Ok((endpoint, security))
}

#[derive(Debug, Clone)]
struct Dial {
    endpoint: Url,
    security: Security,
    proxy: Option<Proxy>,
    disable_nagle: bool,
}

impl Dial {
    async fn connect(&self) -> std::result::Result<WsStream, TransportError> {
        let request = self.endpoint.as_str().into_client_request()?;
        let connector = match self.security {
            Security::Plain => Some(Connector::Plain),
            Security::Tls => None,
        };

        let (stream, _) = match &self.proxy {
            None => {
                connect_async_tls_with_config(request, None, self.disable_nagle, connector).await?
            }
            Some(proxy) => {
                let host = self
                    .endpoint
                    .host_str()
                    .ok_or_else(|| TransportError::Proxy("endpoint has no host".to_owned()))?;
                let port = self.endpoint.port_or_known_default().unwrap_or(match self.security {
                    Security::Tls => 443,
                    Security::Plain => 80,
                });

                let tunnel = socks::connect(proxy, host, port).await?;
                client_async_tls_with_config(request, tunnel, None, connector).await?
            }
        };

        Ok(stream)
    }
}

#[derive(Debug)]
enum IoCommand {
    Send(Frame),
    Receive,
}

/// One WebSocket stream driven by a background task.
///
/// Commands issued before [`start`](Transport::start) are queued and processed once the
/// stream is ready.
#[derive(Debug)]
pub struct TungsteniteTransport {
    dial: Dial,
    events: Option<TransportEvents>,
    commands_tx: mpsc::UnboundedSender<IoCommand>,
    commands_rx: Option<mpsc::UnboundedReceiver<IoCommand>>,
    token: CancellationToken,
}

impl TungsteniteTransport {
    fn new(dial: Dial) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        Self {
            dial,
            events: None,
            commands_tx,
            commands_rx: Some(commands_rx),
            token: CancellationToken::new(),
        }
    }
}

impl Transport for TungsteniteTransport {
    fn register(&mut self, events: TransportEvents) {
        self.events = Some(events);
    }

    fn start(&mut self) {
        if self.token.is_cancelled() {
            return;
        }
        let (Some(events), Some(commands)) = (self.events.clone(), self.commands_rx.take()) else {
            return;
        };

        tokio::spawn(run(self.dial.clone(), events, commands, self.token.clone()));
    }

    fn cancel(&mut self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();

        // Never started, so there is no task to report the cancellation.
        if let (Some(events), Some(mut commands)) = (self.events.as_ref(), self.commands_rx.take())
        {
            cancel_queued(events, &mut commands);
            events.state(ProviderState::Cancelled);
        }
    }

    fn send(&mut self, frame: Frame) {
        if self.commands_tx.send(IoCommand::Send(frame)).is_err()
            && let Some(events) = &self.events
        {
            events.sent(Err(Error::cancelled().with_kind(Kind::Send)));
        }
    }

    fn receive(&mut self) {
        if self.commands_tx.send(IoCommand::Receive).is_err()
            && let Some(events) = &self.events
        {
            events.received(Err(Error::cancelled()));
        }
    }
}

impl Drop for TungsteniteTransport {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(
    dial: Dial,
    events: TransportEvents,
    mut commands: mpsc::UnboundedReceiver<IoCommand>,
    token: CancellationToken,
) {
    events.state(ProviderState::Preparing);

    #[cfg(feature = "tracing")]
    tracing::debug!(endpoint = %dial.endpoint, security = %dial.security, "Dialling WebSocket endpoint");

    let dialled = tokio::select! {
        () = token.cancelled() => None,
        result = dial.connect() => Some(result),
    };

    let stream = match dialled {
        None => {
            cancel_queued(&events, &mut commands);
            events.state(ProviderState::Cancelled);
            return;
        }
        Some(Err(e)) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(endpoint = %dial.endpoint, error = %e, "Unable to connect");
            events.state(ProviderState::Failed(Error::with_source(Kind::Transport, e)));
            return;
        }
        Some(Ok(stream)) => stream,
    };

    events.state(ProviderState::Ready);

    let (mut sink, mut source) = stream.split();
    let mut receive_armed = false;

    loop {
        tokio::select! {
            () = token.cancelled() => break,

            command = commands.recv() => match command {
                Some(IoCommand::Send(frame)) => {
                    let result = match Message::try_from(frame) {
                        Ok(message) => sink
                            .send(message)
                            .await
                            .map_err(|e| Error::with_source(Kind::Send, TransportError::from(e))),
                        Err(e) => Err(e.with_kind(Kind::Send)),
                    };
                    events.sent(result);
                }
                Some(IoCommand::Receive) => receive_armed = true,
                None => break,
            },

            message = source.next(), if receive_armed => {
                receive_armed = false;

                match message {
                    Some(Ok(message)) => {
                        let closing = matches!(message, Message::Close(_));

                        #[cfg(feature = "tracing")]
                        tracing::trace!(?message, "Received WebSocket frame");

                        events.received(Ok(Frame::from(message)));

                        if closing {
                            // Completes the closing handshake started by the peer.
                            _ = timeout(CLOSE_GRACE_PERIOD, sink.close()).await;
                            events.state(ProviderState::Cancelled);
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        let error = TransportError::from(e);

                        if matches!(error, TransportError::ConnectionClosed) {
                            events.state(ProviderState::Cancelled);
                            return;
                        }

                        if error.is_path_loss() {
                            // Keep the handle until the connection cancels it.
                            events.received(Err(Error::with_source(Kind::Receive, error)));
                            events.viability(false);
                        } else {
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %error, "WebSocket stream failed");

                            let error = Error::with_source(Kind::Transport, error);
                            events.received(Err(error.clone().with_kind(Kind::Receive)));
                            events.state(ProviderState::Failed(error));
                            return;
                        }
                    }
                    None => {
                        events.state(ProviderState::Cancelled);
                        return;
                    }
                }
            }
        }
    }

    if receive_armed {
        events.received(Err(Error::cancelled()));
    }
    cancel_queued(&events, &mut commands);

    let going_away = Message::Close(Some(CloseFrame {
        code: CloseCode::Away,
        reason: "".into(),
    }));
    _ = timeout(CLOSE_GRACE_PERIOD, sink.send(going_away)).await;

    events.state(ProviderState::Cancelled);
}

/// Complete every queued request with a cancellation error.
fn cancel_queued(events: &TransportEvents, commands: &mut mpsc::UnboundedReceiver<IoCommand>) {
    while let Ok(command) = commands.try_recv() {
        match command {
            IoCommand::Send(_) => events.sent(Err(Error::cancelled().with_kind(Kind::Send))),
            IoCommand::Receive => events.received(Err(Error::cancelled())),
        }
    }
}
