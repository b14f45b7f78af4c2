//! Cross-instance connection exchange.
//!
//! Two deployments establish a data-sharing relationship with a two-party
//! handshake: the consumer submits a connection request, the provider's
//! administrator accepts or rejects it, and on acceptance both sides
//! materialize one input and one output stream per negotiated format.
//! Streams can then be paused and resumed, with every change mirrored to
//! the partner.
//!
//! The [`HandshakeCoordinator`] and [`StreamActivationManager`] own all
//! state transitions. Storage lives in [`requests`] and [`streams`];
//! outbound HTTP lives in [`remote`].

pub mod activation;
mod db;
pub mod error;
pub mod handshake;
pub mod locks;
pub mod remote;
pub mod requests;
pub mod streams;
pub mod types;

#[cfg(test)]
mod test_support;

pub use activation::StreamActivationManager;
pub use error::ExchangeError;
pub use handshake::HandshakeCoordinator;
pub use locks::KeyedLocks;
pub use remote::{RemoteClient, RemoteError, DEFAULT_REQUEST_TIMEOUT};
pub use types::{
    ConnectionRef, ConnectionRequest, CreateConnectionRequest, DecisionNotice, InstanceIdentity,
    PartnerConnection, RegistrationBody, RegistrationReceipt, Stream, StreamDescriptor, StreamKey,
    StreamStatusNotice,
};
