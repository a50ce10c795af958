//! Typed frames exchanged with a transport. The transport owns the wire encoding; the core
//! only looks at the frame tag and the payload bytes.

use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::error::Error;

/// WebSocket opcode classifying a payload.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
    Continuation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    opcode: Opcode,
    payload: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }

    #[must_use]
    pub fn text(text: &str) -> Self {
        Self::new(Opcode::Text, text.as_bytes().to_vec())
    }

    #[must_use]
    pub fn binary(bytes: Vec<u8>) -> Self {
        Self::new(Opcode::Binary, bytes)
    }

    /// Liveness probe frame.
    #[must_use]
    pub fn ping(payload: &[u8]) -> Self {
        Self::new(Opcode::Ping, payload.to_vec())
    }

    #[must_use]
    pub fn pong(payload: &[u8]) -> Self {
        Self::new(Opcode::Pong, payload.to_vec())
    }

    /// Close frame carrying a status code and UTF-8 reason, as laid out on the wire.
    #[must_use]
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        Self::new(Opcode::Close, payload)
    }

    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::text(text.as_str()),
            Message::Binary(bytes) => Frame::binary(bytes.to_vec()),
            Message::Ping(bytes) => Frame::ping(&bytes),
            Message::Pong(bytes) => Frame::pong(&bytes),
            Message::Close(Some(close)) => Frame::close(close.code.into(), close.reason.as_str()),
            Message::Close(None) => Frame::new(Opcode::Close, Vec::new()),
            Message::Frame(raw) => Frame::new(Opcode::Continuation, raw.payload().to_vec()),
        }
    }
}

impl TryFrom<Frame> for Message {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        let Frame { opcode, payload } = frame;

        let message = match opcode {
            Opcode::Text => {
                let text = String::from_utf8(payload)
                    .map_err(|e| Error::validation(format!("text frame is not UTF-8: {e}")))?;
                Message::Text(text.into())
            }
            Opcode::Binary => Message::Binary(payload.into()),
            Opcode::Ping => Message::Ping(payload.into()),
            Opcode::Pong => Message::Pong(payload.into()),
            Opcode::Close => Message::Close(close_frame(&payload)),
            Opcode::Continuation => {
                return Err(Error::validation(
                    "continuation frames are produced by the transport, not sent",
                ));
            }
        };

        Ok(message)
    }
}

fn close_frame(payload: &[u8]) -> Option<CloseFrame> {
    let (code, reason) = payload.split_first_chunk::<2>()?;

    Some(CloseFrame {
        code: CloseCode::from(u16::from_be_bytes(*code)),
        reason: String::from_utf8_lossy(reason).into_owned().into(),
    })
}
