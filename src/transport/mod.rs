//! Transport sessions carrying raw frames.
//!
//! A session is a bidirectional message stream: inbound frames arrive on a
//! channel handed out at connect time, while flow control and shutdown go
//! through the [`TransportSession`] handle. A dropped connection simply
//! disconnects the frame channel.

mod memory;
mod websocket;

pub use memory::{MemoryConnector, MemoryRemote, MemorySession};
pub use websocket::{WebSocketConnector, WebSocketSession};

use crate::config::Endpoint;
use crate::error::Result;
use crate::types::{CloseStatus, SessionState};
use crossbeam_channel::Receiver;

/// One raw inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Control handle for an open session.
pub trait TransportSession: Send + Sync {
    /// Queue an outbound text frame.
    fn send(&self, text: &str) -> Result<()>;

    /// Stop reading from the peer until [`resume`](Self::resume).
    fn pause(&self);

    /// Start reading again, releasing anything held while paused.
    fn resume(&self);

    /// Request close with `status`. Later calls are ignored.
    fn close(&self, status: CloseStatus);

    /// Current lifecycle state.
    fn state(&self) -> SessionState;
}

/// Opens sessions against an endpoint.
pub trait Connector {
    type Session: TransportSession + 'static;

    /// Connect and return the session with its inbound frame channel.
    ///
    /// `frame_buffer` bounds the frames held between the session and the
    /// consumer.
    fn connect(
        &self,
        endpoint: &Endpoint,
        frame_buffer: usize,
    ) -> Result<(Self::Session, Receiver<Frame>)>;
}
