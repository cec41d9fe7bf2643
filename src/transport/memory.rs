//! In-process transport.
//!
//! [`MemoryConnector`] opens a session whose peer is a [`MemoryRemote`]
//! held by the caller, so the full pipeline can be driven without a
//! network. Frames pushed while paused are held and released in order on
//! resume.

use crate::config::Endpoint;
use crate::error::{ClientError, Result};
use crate::types::{CloseStatus, SessionState};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::{Connector, Frame, TransportSession};

struct Inner {
    state: SessionState,
    /// Present while the session can still deliver frames.
    sender: Option<Sender<Frame>>,
    /// Frames held back while paused.
    held: VecDeque<Frame>,
    /// Frames the client sent to the peer.
    outbound: Vec<String>,
    close_requests: Vec<CloseStatus>,
    connected_to: Option<String>,
    refuse: Option<String>,
}

impl Inner {
    fn deliver(&mut self, frame: Frame) -> bool {
        match &self.sender {
            Some(sender) => sender.send(frame).is_ok(),
            None => false,
        }
    }

    fn shut(&mut self) {
        self.sender = None;
        self.held.clear();
        self.state = SessionState::Closed;
    }
}

type Shared = Arc<Mutex<Inner>>;

/// Connector for an in-process session. Single use.
pub struct MemoryConnector {
    inner: Shared,
}

impl MemoryConnector {
    /// A connector and the remote end that will drive its session.
    pub fn pair() -> (Self, MemoryRemote) {
        let inner = Arc::new(Mutex::new(Inner {
            state: SessionState::Connecting,
            sender: None,
            held: VecDeque::new(),
            outbound: Vec::new(),
            close_requests: Vec::new(),
            connected_to: None,
            refuse: None,
        }));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            MemoryRemote { inner },
        )
    }

    /// A connector whose connect attempt fails with `reason`.
    pub fn refusing(reason: impl Into<String>) -> Self {
        let (connector, _remote) = Self::pair();
        connector.inner.lock().refuse = Some(reason.into());
        connector
    }
}

impl Connector for MemoryConnector {
    type Session = MemorySession;

    /// The frame channel is unbounded; `frame_buffer` is not applied.
    fn connect(
        &self,
        endpoint: &Endpoint,
        _frame_buffer: usize,
    ) -> Result<(MemorySession, Receiver<Frame>)> {
        let mut inner = self.inner.lock();
        if let Some(reason) = &inner.refuse {
            return Err(ClientError::Connect(reason.clone()));
        }
        if inner.state != SessionState::Connecting {
            return Err(ClientError::Connect("memory session already used".to_string()));
        }

        let (sender, receiver) = unbounded();
        inner.sender = Some(sender);
        inner.state = SessionState::Open;
        inner.connected_to = Some(endpoint.subscription_url()?.to_string());

        Ok((
            MemorySession {
                inner: Arc::clone(&self.inner),
            },
            receiver,
        ))
    }
}

/// Client side of an in-process session.
pub struct MemorySession {
    inner: Shared,
}

impl TransportSession for MemorySession {
    fn send(&self, text: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            return Err(ClientError::Closed);
        }
        inner.outbound.push(text.to_string());
        Ok(())
    }

    fn pause(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Open {
            inner.state = SessionState::Paused;
        }
    }

    fn resume(&self) {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Paused {
            return;
        }
        inner.state = SessionState::Open;
        while let Some(frame) = inner.held.pop_front() {
            if !inner.deliver(frame) {
                break;
            }
        }
    }

    fn close(&self, status: CloseStatus) {
        let mut inner = self.inner.lock();
        inner.close_requests.push(status);
        inner.shut();
    }

    fn state(&self) -> SessionState {
        self.inner.lock().state
    }
}

/// Peer end of an in-process session.
#[derive(Clone)]
pub struct MemoryRemote {
    inner: Shared,
}

impl MemoryRemote {
    /// Push a text frame. Returns `false` once the session is closed.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(Frame::Text(text.into()))
    }

    /// Push a binary frame. Returns `false` once the session is closed.
    pub fn send_binary(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.push(Frame::Binary(bytes.into()))
    }

    fn push(&self, frame: Frame) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Closed => false,
            SessionState::Paused => {
                inner.held.push_back(frame);
                true
            }
            SessionState::Connecting | SessionState::Open => inner.deliver(frame),
        }
    }

    /// Drop the connection from the peer side.
    pub fn disconnect(&self) {
        self.inner.lock().shut();
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Frames currently held back by a pause.
    pub fn held_count(&self) -> usize {
        self.inner.lock().held.len()
    }

    /// Text frames the client sent.
    pub fn outbound(&self) -> Vec<String> {
        self.inner.lock().outbound.clone()
    }

    /// Every close request the session received, in order.
    pub fn close_requests(&self) -> Vec<CloseStatus> {
        self.inner.lock().close_requests.clone()
    }

    /// The subscription URL the client connected with.
    pub fn connected_to(&self) -> Option<String> {
        self.inner.lock().connected_to.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventClientConfig;

    fn endpoint() -> Endpoint {
        EventClientConfig::new("rancher.local:8080/v2-beta")
            .endpoint()
            .unwrap()
    }

    #[test]
    fn test_pause_holds_frames_until_resume() {
        let (connector, remote) = MemoryConnector::pair();
        let (session, frames) = connector.connect(&endpoint(), 16).unwrap();

        session.pause();
        assert!(remote.send_text("a"));
        assert!(remote.send_text("b"));
        assert_eq!(remote.held_count(), 2);
        assert!(frames.try_recv().is_err());

        session.resume();
        assert_eq!(frames.try_recv().unwrap(), Frame::Text("a".to_string()));
        assert_eq!(frames.try_recv().unwrap(), Frame::Text("b".to_string()));
    }

    #[test]
    fn test_disconnect_ends_frame_stream() {
        let (connector, remote) = MemoryConnector::pair();
        let (session, frames) = connector.connect(&endpoint(), 16).unwrap();

        remote.send_text("last");
        remote.disconnect();

        assert_eq!(frames.iter().count(), 1);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!remote.send_text("late"));
    }

    #[test]
    fn test_connector_is_single_use() {
        let (connector, _remote) = MemoryConnector::pair();
        let _first = connector.connect(&endpoint(), 16).unwrap();
        assert!(matches!(
            connector.connect(&endpoint(), 16),
            Err(ClientError::Connect(_))
        ));
    }
}
