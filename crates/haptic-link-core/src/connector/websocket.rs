//! WebSocket transport.

use std::time::Duration;

use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::{ConnectError, DisconnectError, SendError};
use crate::protocol::WireMessage;

use super::{Connector, Inbound};

/// Default time allowed for the TCP + WebSocket upgrade.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

struct Link {
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Persistent WebSocket connection to a server, e.g. `ws://127.0.0.1:12345`.
///
/// Reading and writing run on their own tasks; frames are exchanged with the
/// session over channels.
pub struct WebSocketConnector {
    connect_timeout: Duration,
    link: Mutex<Option<Link>>,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            link: Mutex::new(None),
        }
    }

    async fn open(&self, endpoint: &str) -> Result<Inbound, ConnectError> {
        if self.link.lock().await.is_some() {
            return Err(ConnectError::AlreadyConnected);
        }

        // Not held across the handshake; `send` and `disconnect` must not wait on it.
        let (ws_stream, _) = timeout(self.connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| ConnectError::Unreachable(format!("{}: connection timed out", endpoint)))?
            .map_err(|e| ConnectError::Unreachable(format!("{}: {}", endpoint, e)))?;

        debug!(endpoint, "websocket connected");

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<WireMessage>();

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    warn!(error = %e, "websocket send error");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if in_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Err(_) => warn!("dropping non-UTF-8 binary frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "websocket closed by server");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
        });

        let mut link = self.link.lock().await;
        if link.is_some() {
            // A concurrent open won; close this one.
            let _ = out_tx.send(Message::Close(None));
            reader.abort();
            return Err(ConnectError::AlreadyConnected);
        }
        *link = Some(Link {
            outbound: out_tx,
            reader,
        });

        Ok(in_rx)
    }

    async fn transmit(&self, message: WireMessage) -> Result<(), SendError> {
        let link = self.link.lock().await;
        let link = link.as_ref().ok_or(SendError::NotConnected)?;
        link.outbound
            .send(Message::Text(message))
            .map_err(|_| SendError::Transport("websocket writer has stopped".to_string()))
    }

    async fn close(&self) -> Result<(), DisconnectError> {
        let link = self
            .link
            .lock()
            .await
            .take()
            .ok_or(DisconnectError::AlreadyDisconnected)?;

        // The writer flushes the close frame and shuts the sink; the reader is
        // not waited on since the server may never answer the close.
        let _ = link.outbound.send(Message::Close(None));
        drop(link);
        debug!("websocket disconnected");
        Ok(())
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Connector for WebSocketConnector {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<Inbound, ConnectError>> {
        Box::pin(self.open(endpoint))
    }

    fn send(&self, message: WireMessage) -> BoxFuture<'_, Result<(), SendError>> {
        Box::pin(self.transmit(message))
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), DisconnectError>> {
        Box::pin(self.close())
    }
}
