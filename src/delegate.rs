use crate::error::Error;
use crate::state::ConnectionState;

/// Consumer of connection events.
///
/// Methods may be invoked from the connection's internal task rather than from the thread
/// that owns the consumer; implementations are responsible for hopping to whatever context
/// their own state requires. Connections only keep a weak reference to their delegate, so
/// dropping the consumer silently stops delivery.
///
/// For fatal transport failures, [`on_error`](Self::on_error) is delivered before the
/// matching [`on_state_changed`](Self::on_state_changed) with
/// [`ConnectionState::Disconnected`].
pub trait ConnectionDelegate: Send + Sync {
    fn on_state_changed(&self, state: ConnectionState);

    fn on_text_message(&self, text: String);

    fn on_binary_message(&self, bytes: Vec<u8>);

    fn on_error(&self, error: &Error);
}
