//! Task-based binding: one WebSocket task per logical connection, with status tracked
//! explicitly instead of derived from a transport state machine.
//!
//! [`TaskConnection`] has no heartbeat and no reconnection. Use
//! [`WebSocketConnection`](crate::connection::WebSocketConnection) when liveness probing or
//! path-aware recovery matter.

#![expect(
    clippy::module_name_repetitions,
    reason = "The binding is named after the task that drives it"
)]

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::Result;
use crate::connection::Connection;
use crate::delegate::ConnectionDelegate;
use crate::error::{Error, Kind, TransportError};
use crate::state::ConnectionState;
use crate::transport::tungstenite::parse_endpoint;

const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// WebSocket connection bound to a single request/response style task.
///
/// `connect` and `disconnect` update [`status`](Connection::status) synchronously; the
/// open and close of the underlying task update it again asynchronously. The receive loop
/// re-arms after every delivered message and ends, with an error and an implicit
/// disconnect, on the first failure.
pub struct TaskConnection {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: Url,
    status: watch::Sender<ConnectionState>,
    delegate: Mutex<Option<Weak<dyn ConnectionDelegate>>>,
    session: Mutex<Option<Session>>,
    next_session: AtomicU64,
}

struct Session {
    id: u64,
    outbound: mpsc::UnboundedSender<Message>,
    token: CancellationToken,
}

impl TaskConnection {
    pub fn new(endpoint: &str) -> Result<Self> {
        let (endpoint, _) = parse_endpoint(endpoint)?;
        let (status, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(Inner {
                endpoint,
                status,
                delegate: Mutex::new(None),
                session: Mutex::new(None),
                next_session: AtomicU64::new(0),
            }),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status.subscribe()
    }
}

impl Connection for TaskConnection {
    /// Must be called from within a Tokio runtime.
    fn connect(&self) {
        let mut session = lock(&self.inner.session);
        if session.is_some() {
            return;
        }

        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *session = Some(Session {
            id,
            outbound: outbound_tx,
            token: token.clone(),
        });
        if self.inner.replace_status(session, ConnectionState::Connecting) {
            self.inner.notify_status(ConnectionState::Connecting);
        }

        tokio::spawn(Arc::clone(&self.inner).run(id, outbound_rx, token));
    }

    fn disconnect(&self) {
        self.inner.end_session(None);
    }

    fn send_text(&self, text: &str) {
        self.inner.send(Message::Text(text.into()));
    }

    fn send_binary(&self, bytes: Vec<u8>) {
        self.inner.send(Message::Binary(bytes.into()));
    }

    fn status(&self) -> ConnectionState {
        *self.inner.status.borrow()
    }

    fn set_delegate(&self, delegate: &Arc<dyn ConnectionDelegate>) {
        *lock(&self.inner.delegate) = Some(Arc::downgrade(delegate));
    }
}

impl Drop for TaskConnection {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.inner.session).take() {
            session.token.cancel();
        }
    }
}

impl fmt::Debug for TaskConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskConnection")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        id: u64,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        token: CancellationToken,
    ) {
        let dialled = tokio::select! {
            () = token.cancelled() => return,
            result = connect_async(self.endpoint.as_str()) => result,
        };

        let stream = match dialled {
            Ok((stream, _)) => stream,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(endpoint = %self.endpoint, error = %e, "Unable to connect");

                let error = Error::with_source(Kind::Transport, TransportError::from(e));
                self.end_session(Some((id, error)));
                return;
            }
        };

        if !self.set_status_if_current(id, ConnectionState::Connected) {
            return;
        }

        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    let going_away = Message::Close(Some(CloseFrame {
                        code: CloseCode::Away,
                        reason: "".into(),
                    }));
                    _ = timeout(CLOSE_GRACE_PERIOD, sink.send(going_away)).await;
                    return;
                }

                Some(message) = outbound.recv() => {
                    if let Err(e) = sink.send(message).await {
                        self.report(&Error::with_source(Kind::Send, TransportError::from(e)));
                    }
                }

                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(delegate) = self.delegate() {
                            delegate.on_text_message(text.to_string());
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Some(delegate) = self.delegate() {
                            delegate.on_binary_message(bytes.to_vec());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        _ = timeout(CLOSE_GRACE_PERIOD, sink.close()).await;
                        self.closed(id);
                        return;
                    }
                    // Pings are answered by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let error = TransportError::from(e);
                        if matches!(error, TransportError::ConnectionClosed) {
                            self.closed(id);
                        } else {
                            self.end_session(Some((id, Error::with_source(Kind::Receive, error))));
                        }
                        return;
                    }
                }
            }
        }
    }

    fn send(&self, message: Message) {
        let result = match lock(&self.session).as_ref() {
            None => Err(Error::not_connected()),
            Some(session) => session
                .outbound
                .send(message)
                .map_err(|_e| Error::with_source(Kind::Send, TransportError::ConnectionClosed)),
        };

        if let Err(e) = result {
            self.report(&e);
        }
    }

    /// Tear down the current session. With `failure`, only the session it belongs to is
    /// torn down, and its error is reported before the status change.
    fn end_session(&self, failure: Option<(u64, Error)>) {
        let mut session = lock(&self.session);
        if let Some((id, _)) = &failure
            && !is_current(session.as_ref(), *id)
        {
            return;
        }

        if let Some(ended) = session.take() {
            ended.token.cancel();
        }
        let changed = self.replace_status(session, ConnectionState::Disconnected);

        if let Some((_, error)) = failure {
            self.report(&error);
        }
        if changed {
            self.notify_status(ConnectionState::Disconnected);
        }
    }

    /// The peer closed the session.
    fn closed(&self, id: u64) {
        let mut session = lock(&self.session);
        if !is_current(session.as_ref(), id) {
            return;
        }
        session.take();

        if self.replace_status(session, ConnectionState::Disconnected) {
            self.notify_status(ConnectionState::Disconnected);
        }
    }

    /// Publish `status` only while `id` is still the live session.
    fn set_status_if_current(&self, id: u64, status: ConnectionState) -> bool {
        let session = lock(&self.session);
        if !is_current(session.as_ref(), id) {
            return false;
        }

        if self.replace_status(session, status) {
            self.notify_status(status);
        }
        true
    }

    /// Replace the status while the session guard is held, so a concurrent `connect` or
    /// `disconnect` cannot interleave between the check and the update. Returns whether
    /// the status changed.
    fn replace_status(
        &self,
        session: MutexGuard<'_, Option<Session>>,
        status: ConnectionState,
    ) -> bool {
        let previous = self.status.send_replace(status);
        drop(session);

        #[cfg(feature = "tracing")]
        if previous != status {
            tracing::debug!(%previous, %status, "Task connection status changed");
        }

        previous != status
    }

    /// Called without the session guard held.
    fn notify_status(&self, status: ConnectionState) {
        if let Some(delegate) = self.delegate() {
            delegate.on_state_changed(status);
        }
    }

    fn delegate(&self) -> Option<Arc<dyn ConnectionDelegate>> {
        lock(&self.delegate).as_ref()?.upgrade()
    }

    fn report(&self, error: &Error) {
        if let Some(delegate) = self.delegate() {
            delegate.on_error(error);
        }
    }
}

fn is_current(session: Option<&Session>, id: u64) -> bool {
    session.is_some_and(|current| current.id == id)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
