#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;

use tokio_tungstenite::tungstenite;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Kind {
    /// A frame was submitted while no handle was live
    NotConnected,
    /// The transport is waiting for a usable path; the condition is transient
    Waiting,
    /// The transport failed and the handle was torn down
    Transport,
    /// A receive request completed with an error, ending the inbound loop
    Receive,
    /// An outbound frame (including a heartbeat probe) could not be delivered
    Send,
    /// An in-flight operation completed because its handle was cancelled
    Cancelled,
    /// Invalid configuration or endpoint
    Validation,
    /// Internal error from dependencies
    Internal,
}

/// Error reported to a [`ConnectionDelegate`](crate::delegate::ConnectionDelegate).
///
/// Cloning is cheap: the source is shared, which lets the connection re-report the same
/// waiting error on every send attempt while the transport stays degraded.
#[derive(Debug, Clone)]
pub struct Error {
    kind: Kind,
    source: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Arc::new(source)),
        }
    }

    #[must_use]
    pub const fn new(kind: Kind) -> Self {
        Self { kind, source: None }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    /// Re-tag this error with a different [`Kind`], keeping the source.
    #[must_use]
    pub fn with_kind(self, kind: Kind) -> Self {
        Self { kind, ..self }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    #[must_use]
    pub fn not_connected() -> Self {
        Error::with_source(Kind::NotConnected, TransportError::NotConnected)
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Error::with_source(Kind::Cancelled, TransportError::Cancelled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Low-level transport failure carried as the source of an [`Error`].
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportError {
    /// Error establishing or using the WebSocket stream
    Connection(tungstenite::Error),
    /// Socket level failure outside the WebSocket protocol
    Io(io::Error),
    /// The proxy refused or garbled the tunnel handshake
    Proxy(String),
    /// The peer closed the stream
    ConnectionClosed,
    /// The handle was cancelled before the operation completed
    Cancelled,
    /// No live handle exists
    NotConnected,
}

impl TransportError {
    /// Whether this failure means the network path itself went away, as opposed to a
    /// protocol or peer level problem.
    #[must_use]
    pub fn is_path_loss(&self) -> bool {
        let kind = match self {
            Self::Io(e) | Self::Connection(tungstenite::Error::Io(e)) => e.kind(),
            _ => return false,
        };

        matches!(
            kind,
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::TimedOut
                | io::ErrorKind::NetworkUnreachable
                | io::ErrorKind::HostUnreachable
                | io::ErrorKind::NetworkDown
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::Io(e) => write!(f, "socket error: {e}"),
            Self::Proxy(reason) => write!(f, "proxy handshake failed: {reason}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::NotConnected => write!(f, "socket is not connected"),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::ConnectionClosed
            }
            other => Self::Connection(other),
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}
