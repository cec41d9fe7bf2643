//! Topic subscriptions for the event stream.
//!
//! Listeners register on exact topic names; there is no wildcard matching.
//! Granularity comes from the derived topics instead: subscribing to
//! `resource.change.container` sees every container change, while
//! `resource.change.container.1i42.running` sees only one container
//! entering `running`.
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new();
//!
//! let (listener, handle) = Listener::channel(64);
//! manager.subscribe("resource.change.container", &listener);
//!
//! while let Ok(delivery) = handle.recv() {
//!     if let Some(event) = delivery.payload.as_event() {
//!         println!("{} -> {:?}", delivery.topic, event.resource_id);
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{Listener, ListenerFailure, ListenerHandle};
