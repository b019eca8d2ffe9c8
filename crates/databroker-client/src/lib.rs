//! # databroker-client
//!
//! Client-side connectivity to a signal databroker.
//!
//! - [`Connector`] brings a transport to the ready state within a timeout
//! - [`Connection`] offers reads, writes and subscriptions on leaves and trees
//! - [`Subscriber`] shares one server stream per (path, field) among listeners
//! - [`MemoryBroker`] is an in-process [`Transport`] for demos and tests

pub mod connection;
pub mod connector;
pub mod error;
pub mod listener;
pub mod memory;
pub mod subscriber;
pub mod subscription;
pub mod transport;
pub mod transporter;

pub use connection::Connection;
pub use connector::Connector;
pub use error::BrokerError;
pub use listener::{DisconnectListener, ListenerId, NodeListener, PathListener};
pub use memory::{MemoryBroker, Readiness};
pub use subscriber::Subscriber;
pub use subscription::{Subscription, SubscriptionKey};
pub use transport::{ConnectivityState, Credentials, Transport, UpdateStream};
pub use transporter::Transporter;
