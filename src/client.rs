//! The event client: one transport session feeding the subscription registry.

use crate::config::{Endpoint, EventClientConfig};
use crate::decoder::{decode, decode_bytes};
use crate::error::{ClientError, Result};
use crate::subscriptions::{Listener, SubscriptionManager};
use crate::transport::{Connector, Frame, TransportSession, WebSocketConnector};
use crate::types::{CloseStatus, SessionState};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// Streaming client for the change-notification feed.
///
/// Frames are decoded and dispatched one at a time, in arrival order, on a
/// dedicated thread. Every derived topic of an event is dispatched before
/// the next frame is looked at.
///
/// There is no reconnection: when the session drops the stream just ends.
pub struct EventClient {
    endpoint: Endpoint,
    session: Box<dyn TransportSession>,
    subscriptions: Arc<SubscriptionManager>,
    stopped: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl EventClient {
    /// Connect over websocket.
    pub fn connect(config: EventClientConfig) -> Result<Self> {
        Self::connect_with(config, &WebSocketConnector::default())
    }

    /// Connect through `connector`.
    ///
    /// Configuration errors are reported before any connection attempt.
    pub fn connect_with<C: Connector>(config: EventClientConfig, connector: &C) -> Result<Self> {
        let endpoint = config.endpoint()?;
        debug!(url = %endpoint.redacted(), "opening event stream");

        let (session, frames) = connector.connect(&endpoint, config.frame_buffer)?;
        let subscriptions = Arc::new(SubscriptionManager::new());
        let stopped = Arc::new(AtomicBool::new(false));

        let pump = {
            let subscriptions = Arc::clone(&subscriptions);
            let stopped = Arc::clone(&stopped);
            thread::Builder::new()
                .name("rancher-events-dispatch".to_string())
                .spawn(move || run_pump(frames, &subscriptions, &stopped))
        };
        let pump = match pump {
            Ok(handle) => handle,
            Err(e) => {
                session.close(CloseStatus::default());
                return Err(ClientError::Transport(e.to_string()));
            }
        };

        Ok(Self {
            endpoint,
            session: Box::new(session),
            subscriptions,
            stopped,
            pump: Mutex::new(Some(pump)),
        })
    }

    /// Register `listener` on an exact topic name.
    ///
    /// Returns `false` if it was already registered there.
    pub fn subscribe(&self, topic: impl Into<String>, listener: &Listener) -> bool {
        self.subscriptions.subscribe(topic, listener)
    }

    /// Remove `listener` from `topic`.
    ///
    /// Once this returns, the listener sees no dispatch for any topic pass
    /// that starts afterwards.
    pub fn unsubscribe(&self, topic: &str, listener: &Listener) -> bool {
        self.subscriptions.unsubscribe(topic, listener)
    }

    /// The underlying registry.
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// The resolved endpoint this client connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Suspend reading from the session. Buffering is the session's concern.
    pub fn pause(&self) {
        if self.is_stopped() {
            return;
        }
        debug!("pausing event stream");
        self.session.pause();
    }

    /// Resume reading after [`pause`](Self::pause).
    pub fn resume(&self) {
        if self.is_stopped() {
            return;
        }
        debug!("resuming event stream");
        self.session.resume();
    }

    /// Stop with the default status (200).
    pub fn stop(&self) {
        self.stop_with_status(CloseStatus::default());
    }

    /// Close the session with `status`. Terminal; later calls do nothing.
    ///
    /// A dispatch already in progress finishes; no later frame is dispatched.
    pub fn stop_with_status(&self, status: CloseStatus) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(%status, "stopping event stream");
        self.session.close(status);
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Send a text frame to the server.
    pub fn send(&self, text: &str) -> Result<()> {
        if self.is_stopped() {
            return Err(ClientError::Closed);
        }
        self.session.send(text)
    }

    /// Observed session state; `Closed` once stopped.
    pub fn state(&self) -> SessionState {
        if self.is_stopped() {
            SessionState::Closed
        } else {
            self.session.state()
        }
    }

    /// Block until the stream ends (session dropped or client stopped).
    ///
    /// Must not be called from a listener.
    pub fn join(&self) {
        let handle = self.pump.lock().take();
        if let Some(handle) = handle {
            reap(handle);
        }
    }
}

impl Drop for EventClient {
    fn drop(&mut self) {
        self.stop();
        self.subscriptions.clear();
    }
}

/// Decode and dispatch frames until the session ends or the client stops.
fn run_pump(frames: Receiver<Frame>, subscriptions: &SubscriptionManager, stopped: &AtomicBool) {
    for frame in frames.iter() {
        if stopped.load(Ordering::Acquire) {
            break;
        }
        process_frame(frame, subscriptions);
    }
    debug!("event stream ended");
}

/// Wait for the dispatch thread. Returns `false` if it panicked.
fn reap(handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            warn!(%reason, "dispatch thread panicked");
            false
        }
    }
}

fn process_frame(frame: Frame, subscriptions: &SubscriptionManager) {
    let decoded = match &frame {
        Frame::Text(text) => decode(text),
        Frame::Binary(bytes) => decode_bytes(bytes),
    };

    match decoded {
        Ok(event) => {
            let delivered = subscriptions.dispatch_event(Arc::new(event));
            trace!(delivered, "dispatched event");
        }
        Err(failure) => {
            debug!(error = %failure.error, "undecodable frame");
            subscriptions.dispatch_failure(failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reap_reports_panicked_pump() {
        let handle = thread::spawn(|| panic!("listener blew up the pump"));
        assert!(!reap(handle));
    }

    #[test]
    fn test_reap_clean_exit() {
        let handle = thread::spawn(|| {});
        assert!(reap(handle));
    }
}
