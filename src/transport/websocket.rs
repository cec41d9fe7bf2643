//! Websocket transport.
//!
//! A background reader thread owns the socket. It polls with a short read
//! timeout so it can pick up outbound frames, close requests and pause state
//! between reads. While paused it stops reading altogether, leaving
//! backpressure to TCP.

use crate::config::Endpoint;
use crate::error::{ClientError, Result};
use crate::types::{CloseStatus, SessionState};
use crossbeam_channel::{bounded, unbounded, Receiver, SendTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::borrow::Cow;
use std::io;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::client::Request;
use tungstenite::http::header::AUTHORIZATION;
use tungstenite::http::HeaderValue;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::{Connector, Frame, TransportSession};

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Default interval between checks for commands while idle.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default wait for the peer to answer our close frame.
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

enum Command {
    Send(String),
    Close(CloseStatus),
}

struct Shared {
    state: Mutex<SessionState>,
    changed: Condvar,
    closing: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
        self.changed.notify_all();
    }

    /// Block up to `timeout` while paused. Returns whether the session was paused.
    fn wait_if_paused(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::Paused {
            return false;
        }
        self.changed.wait_for(&mut state, timeout);
        true
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

/// Opens websocket sessions.
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    poll_interval: Duration,
    close_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// How long the reader blocks on the socket before checking for commands.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long a close waits for the peer's reply before dropping the
    /// connection.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for WebSocketConnector {
    type Session = WebSocketSession;

    fn connect(
        &self,
        endpoint: &Endpoint,
        frame_buffer: usize,
    ) -> Result<(WebSocketSession, Receiver<Frame>)> {
        let request = build_request(endpoint)?;
        let (socket, response) =
            tungstenite::connect(request).map_err(|e| ClientError::Connect(e.to_string()))?;
        debug!(
            url = %endpoint.redacted(),
            status = %response.status(),
            "websocket handshake complete"
        );

        set_read_timeout(socket.get_ref(), Some(self.poll_interval))
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let (frame_tx, frame_rx) = bounded(frame_buffer);
        let (command_tx, command_rx) = unbounded();
        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState::Open),
            changed: Condvar::new(),
            closing: AtomicBool::new(false),
        });

        let reader = Reader {
            socket,
            frames: frame_tx,
            commands: command_rx,
            shared: Arc::clone(&shared),
            poll_interval: self.poll_interval,
            close_timeout: self.close_timeout,
            close_deadline: None,
        };
        thread::Builder::new()
            .name("rancher-events-ws".to_string())
            .spawn(move || reader.run())
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok((
            WebSocketSession {
                commands: command_tx,
                shared,
            },
            frame_rx,
        ))
    }
}

/// Handshake request. Credentials travel in an `Authorization: Basic`
/// header rather than in the request URL.
fn build_request(endpoint: &Endpoint) -> Result<Request> {
    let mut request = endpoint.url().as_str().into_client_request()?;
    if let Some(credentials) = endpoint.credentials() {
        let value = HeaderValue::from_str(&credentials.basic_auth())
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

fn set_read_timeout(stream: &MaybeTlsStream<TcpStream>, timeout: Option<Duration>) -> io::Result<()> {
    match stream {
        MaybeTlsStream::Plain(s) => s.set_read_timeout(timeout),
        MaybeTlsStream::Rustls(s) => s.get_ref().set_read_timeout(timeout),
        _ => Ok(()),
    }
}

/// Websocket close code for a stop status. Codes a client may not send
/// (including the default 200) become a normal closure.
fn close_frame(status: CloseStatus) -> CloseFrame<'static> {
    let code = CloseCode::from(status.0);
    let code = if code.is_allowed() { code } else { CloseCode::Normal };
    CloseFrame {
        code,
        reason: Cow::Borrowed(""),
    }
}

struct Reader {
    socket: Socket,
    frames: Sender<Frame>,
    commands: Receiver<Command>,
    shared: Arc<Shared>,
    poll_interval: Duration,
    close_timeout: Duration,
    close_deadline: Option<Instant>,
}

impl Reader {
    /// Runs until the socket ends. Dropping `self` afterwards releases the
    /// socket and disconnects the frame channel.
    fn run(mut self) {
        loop {
            self.drain_commands();

            if self.close_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                debug!(timeout = ?self.close_timeout, "peer did not answer close, dropping connection");
                break;
            }

            if !self.shared.is_closing() && self.shared.wait_if_paused(self.poll_interval) {
                continue;
            }

            match self.socket.read() {
                Ok(Message::Text(text)) => {
                    if !self.forward(Frame::Text(text)) {
                        break;
                    }
                }
                Ok(Message::Binary(bytes)) => {
                    if !self.forward(Frame::Binary(bytes)) {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "peer closed websocket");
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(e))
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    debug!("websocket closed");
                    break;
                }
                Err(e) => {
                    if self.shared.is_closing() {
                        debug!(error = %e, "websocket read ended during close");
                    } else {
                        warn!(error = %e, "websocket read failed");
                    }
                    break;
                }
            }
        }
        self.shared.set_state(SessionState::Closed);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Send(text) => {
                    if let Err(e) = self.socket.send(Message::Text(text)) {
                        warn!(error = %e, "websocket send failed");
                    }
                }
                Command::Close(status) => {
                    debug!(%status, "closing websocket");
                    self.close_deadline = Some(Instant::now() + self.close_timeout);
                    if let Err(e) = self.socket.close(Some(close_frame(status))) {
                        debug!(error = %e, "websocket close failed");
                    }
                    let _ = self.socket.flush();
                }
            }
        }
    }

    /// Hand a frame to the consumer. Returns `false` when it is gone.
    fn forward(&self, frame: Frame) -> bool {
        let mut frame = frame;
        loop {
            if self.shared.is_closing() {
                trace!("dropping frame received after close");
                return true;
            }
            match self.frames.send_timeout(frame, self.poll_interval) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(f)) => frame = f,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

/// Handle to a websocket session driven by a background reader.
pub struct WebSocketSession {
    commands: Sender<Command>,
    shared: Arc<Shared>,
}

impl TransportSession for WebSocketSession {
    fn send(&self, text: &str) -> Result<()> {
        if self.shared.is_closing() {
            return Err(ClientError::Closed);
        }
        self.commands
            .send(Command::Send(text.to_string()))
            .map_err(|_| ClientError::Closed)
    }

    fn pause(&self) {
        let mut state = self.shared.state.lock();
        if *state == SessionState::Open {
            *state = SessionState::Paused;
        }
    }

    fn resume(&self) {
        let mut state = self.shared.state.lock();
        if *state == SessionState::Paused {
            *state = SessionState::Open;
            self.shared.changed.notify_all();
        }
    }

    fn close(&self, status: CloseStatus) {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.commands.send(Command::Close(status));
        self.shared.changed.notify_all();
    }

    fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }
}

impl Drop for WebSocketSession {
    fn drop(&mut self) {
        self.close(CloseStatus::default());
    }
}
