//! Connection state as seen by consumers, and the provider states it is derived from.

#![expect(
    clippy::module_name_repetitions,
    reason = "State types include the module name to indicate what they describe"
)]

use crate::error::Error;

/// Application-visible connection state.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum_macros::Display)]
pub enum ConnectionState {
    /// No live handle, or the live handle cannot currently carry traffic
    #[default]
    Disconnected,
    /// The handle is dialling or handshaking
    Connecting,
    /// The handle is ready to carry frames
    Connected,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Lifecycle state reported by a transport handle.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub enum ProviderState {
    /// Created but not started
    #[default]
    Setup,
    /// Resolving, dialling, or performing the handshake
    Preparing,
    /// Able to send and receive
    Ready,
    /// Temporarily unable to make progress; the handle stays alive
    Waiting(Error),
    /// Permanently failed
    Failed(Error),
    /// Cancelled, either on request or after an orderly close
    Cancelled,
}

impl ProviderState {
    /// Whether the handle will never leave this state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Cancelled)
    }

    /// The error a caller should see instead of sending on a degraded handle.
    #[must_use]
    pub const fn waiting_error(&self) -> Option<&Error> {
        match self {
            Self::Waiting(e) => Some(e),
            _ => None,
        }
    }
}

impl From<&ProviderState> for ConnectionState {
    fn from(state: &ProviderState) -> Self {
        match state {
            ProviderState::Preparing => Self::Connecting,
            ProviderState::Ready => Self::Connected,
            ProviderState::Setup
            | ProviderState::Waiting(_)
            | ProviderState::Failed(_)
            | ProviderState::Cancelled => Self::Disconnected,
        }
    }
}
