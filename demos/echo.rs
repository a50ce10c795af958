//! Connects to an echo endpoint, sends a few messages, and logs everything the connection
//! reports back.
//!
//! Run with:
//! ```sh
//! RUST_LOG=debug,rustls=off cargo run --example echo --features tracing -- wss://echo.websocket.org hello world
//! ```

use std::sync::Arc;
use std::time::Duration;

use resilient_websocket::config::Config;
use resilient_websocket::error::Error;
use resilient_websocket::{
    Connection as _, ConnectionDelegate, ConnectionState, WebSocketConnection,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};

const DEFAULT_ENDPOINT: &str = "wss://echo.websocket.org";

enum Update {
    State(ConnectionState),
    Text(String),
    Binary(usize),
    Error(String),
}

/// Forwards callbacks to the main task, which owns the console.
struct Forwarder(mpsc::UnboundedSender<Update>);

impl ConnectionDelegate for Forwarder {
    fn on_state_changed(&self, state: ConnectionState) {
        _ = self.0.send(Update::State(state));
    }

    fn on_text_message(&self, text: String) {
        _ = self.0.send(Update::Text(text));
    }

    fn on_binary_message(&self, bytes: Vec<u8>) {
        _ = self.0.send(Update::Binary(bytes.len()));
    }

    fn on_error(&self, error: &Error) {
        _ = self.0.send(Update::Error(error.to_string()));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let endpoint = args.next().unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned());
    let mut messages: Vec<String> = args.collect();
    if messages.is_empty() {
        messages.push("hello".to_owned());
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let delegate: Arc<dyn ConnectionDelegate> = Arc::new(Forwarder(tx));

    let connection = WebSocketConnection::new(&endpoint, Config::default())?;
    connection.set_delegate(&delegate);
    connection.connect();

    let mut state = connection.state_receiver();
    timeout(
        Duration::from_secs(10),
        state.wait_for(|state| state.is_connected()),
    )
    .await??;

    for message in &messages {
        connection.send_text(message);
    }

    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            Some(update) = rx.recv() => match update {
                Update::State(state) => info!(%state, "state changed"),
                Update::Text(text) => info!(%text, "received text"),
                Update::Binary(len) => info!(len, "received binary"),
                Update::Error(error) => warn!(%error, "connection error"),
            },
        }
    }

    connection.disconnect();
    if timeout(Duration::from_secs(2), state.wait_for(|state| !state.is_connected()))
        .await
        .is_err()
    {
        error!("connection did not close in time");
    }

    Ok(())
}
