//! # Rancher Events
//!
//! A streaming client for the Rancher `resource.change` feed that turns one
//! flat event stream into a topic hierarchy.
//!
//! ## Core Concepts
//!
//! - **Frames**: raw text messages from a transport session
//! - **Change events**: decoded frames; `ping` is a keepalive
//! - **Topics**: prefixes of `name.resourceType.resourceId`, each optionally
//!   suffixed with `transitioning` or the resource state
//! - **Listeners**: callbacks or channels registered on exact topic names
//!
//! ## Example
//!
//! ```ignore
//! use rancher_events::{EventClient, EventClientConfig, Listener};
//!
//! let client = EventClient::connect(
//!     EventClientConfig::from_base_url("https://rancher.example.com/v2-beta")
//!         .with_credentials("ACCESS", "SECRET"),
//! )?;
//!
//! let (listener, handle) = Listener::channel(64);
//! client.subscribe("resource.change.container.running", &listener);
//! client.subscribe("error", &Listener::new(|d| eprintln!("{:?}", d.payload)));
//!
//! while let Ok(delivery) = handle.recv() {
//!     println!("{}", delivery.topic);
//! }
//! ```

pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod subscriptions;
pub mod topics;
pub mod transport;
pub mod types;

// Re-exports
pub use client::EventClient;
pub use config::{Credentials, Endpoint, EventClientConfig};
pub use decoder::decode;
pub use error::{ClientError, Result};
pub use subscriptions::{Listener, ListenerFailure, ListenerHandle, SubscriptionManager};
pub use topics::{emission_topics, TopicSet, ERROR_TOPIC, PING_TOPIC};
pub use transport::{
    Connector, Frame, MemoryConnector, MemoryRemote, TransportSession, WebSocketConnector,
};
pub use types::*;
