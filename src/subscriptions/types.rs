//! Listener types for topic subscriptions.

use crate::types::Delivery;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

type Callback = dyn Fn(&Delivery) + Send + Sync;

enum Target {
    Callback(Box<Callback>),
    Channel(Sender<Delivery>),
}

/// A subscriber that can be registered on any number of topics.
///
/// Cloning is cheap and clones compare equal: identity is the shared
/// allocation, so the same `Listener` can later be passed to
/// `unsubscribe`.
#[derive(Clone)]
pub struct Listener {
    target: Arc<Target>,
}

impl Listener {
    /// Listener that runs `f` on the dispatching thread.
    ///
    /// A panic inside `f` is caught and logged; it never reaches other
    /// listeners or the stream.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        Self {
            target: Arc::new(Target::Callback(Box::new(f))),
        }
    }

    /// Listener that forwards deliveries into a bounded channel.
    ///
    /// Work happens on whichever thread drains the returned handle. A full
    /// buffer counts as a failed delivery for that dispatch. Once every
    /// clone of the listener is gone (unsubscribed everywhere, client
    /// dropped), the handle's receiver disconnects.
    pub fn channel(capacity: usize) -> (Self, ListenerHandle) {
        let (sender, receiver) = bounded(capacity);
        let listener = Self {
            target: Arc::new(Target::Channel(sender)),
        };
        let handle = ListenerHandle {
            listener: Arc::downgrade(&listener.target),
            receiver,
        };
        (listener, handle)
    }

    /// Whether two handles refer to the same listener.
    pub fn same_as(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.target, &other.target)
    }

    /// Deliver one dispatch, isolating any failure.
    pub(crate) fn invoke(&self, delivery: &Delivery) -> Result<(), ListenerFailure> {
        match self.target.as_ref() {
            Target::Callback(f) => panic::catch_unwind(AssertUnwindSafe(|| f(delivery)))
                .map_err(|payload| ListenerFailure::Panicked(panic_message(payload.as_ref()))),
            Target::Channel(sender) => match sender.try_send(delivery.clone()) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(ListenerFailure::BufferFull),
                Err(TrySendError::Disconnected(_)) => Err(ListenerFailure::Disconnected),
            },
        }
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.target.as_ref() {
            Target::Callback(_) => "callback",
            Target::Channel(_) => "channel",
        };
        f.debug_struct("Listener")
            .field("kind", &kind)
            .field("id", &Arc::as_ptr(&self.target))
            .finish()
    }
}

/// Why a single dispatch did not reach its listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenerFailure {
    /// The callback panicked.
    Panicked(String),
    /// Channel buffer was full (slow consumer).
    BufferFull,
    /// Receiving side of the channel was dropped.
    Disconnected,
}

impl fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerFailure::Panicked(msg) => write!(f, "listener panicked: {}", msg),
            ListenerFailure::BufferFull => f.write_str("listener buffer full"),
            ListenerFailure::Disconnected => f.write_str("listener receiver dropped"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Receiving end of a channel listener.
pub struct ListenerHandle {
    /// Weak so the handle alone never keeps the sender alive.
    listener: Weak<Target>,
    /// Channel to receive deliveries.
    pub receiver: Receiver<Delivery>,
}

impl ListenerHandle {
    /// The listener feeding this handle, for (un)subscribing.
    ///
    /// `None` once no registration or caller holds it any more.
    pub fn listener(&self) -> Option<Listener> {
        self.listener.upgrade().map(|target| Listener { target })
    }

    /// Receive the next delivery (blocking).
    pub fn recv(&self) -> Result<Delivery, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a delivery (non-blocking).
    pub fn try_recv(&self) -> Result<Delivery, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Delivery, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<Delivery> {
        self.receiver.try_iter().collect()
    }
}
