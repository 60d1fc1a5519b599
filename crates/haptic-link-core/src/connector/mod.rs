//! Transport layer.
//!
//! A [`Connector`] owns a duplex message channel to a server endpoint. The
//! session only ever talks to the trait, so transports can be swapped out
//! (a recording in-memory transport is used by the tests).

#[cfg(test)]
pub(crate) mod mock;
pub mod websocket;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::{ConnectError, DisconnectError, SendError};
use crate::protocol::WireMessage;

pub use websocket::WebSocketConnector;

/// Inbound frames from the server. The channel closes when the connection does.
pub type Inbound = mpsc::UnboundedReceiver<WireMessage>;

/// Duplex message transport to a remote endpoint.
pub trait Connector: Send + Sync {
    /// Open the transport and return the inbound frame stream.
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Inbound, ConnectError>>;

    /// Queue one frame for transmission.
    ///
    /// Fails with [`SendError::NotConnected`] once `disconnect` has been called.
    fn send(&self, message: WireMessage) -> BoxFuture<'_, Result<(), SendError>>;

    /// Close the transport.
    fn disconnect(&self) -> BoxFuture<'_, Result<(), DisconnectError>>;
}
