#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod config;
pub mod connection;
pub mod delegate;
pub mod error;
pub mod frame;
pub(crate) mod heartbeat;
pub(crate) mod reconnect;
pub mod state;
pub mod task;
pub mod transport;

pub use connection::{Connection, WebSocketConnection};
pub use delegate::ConnectionDelegate;
pub use state::ConnectionState;
pub use task::TaskConnection;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
