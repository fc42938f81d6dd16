//! Frame transport for the realtime stream

use crate::errors::{Error, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

const FRAME_BUFFER: usize = 1024;

/// Both directions of one open connection.
///
/// Dropping `outgoing` closes the connection; `incoming` ends when the
/// server goes away.
#[derive(Debug)]
pub struct FramePipe {
    pub incoming: mpsc::Receiver<Result<String>>,
    pub outgoing: mpsc::Sender<String>,
}

impl FramePipe {
    /// An in-memory pipe plus the server-side ends, for driving a binding without a socket.
    pub fn in_memory(capacity: usize) -> (Self, mpsc::Sender<Result<String>>, mpsc::Receiver<String>) {
        let (server_tx, incoming) = mpsc::channel(capacity);
        let (outgoing, server_rx) = mpsc::channel(capacity);
        (Self { incoming, outgoing }, server_tx, server_rx)
    }
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Opens a connection authenticated with `token` at handshake.
    async fn open(&self, token: &str) -> Result<FramePipe>;
}

/// WebSocket transport; the token travels as the `token` query parameter.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: Url,
}

impl WsTransport {
    pub fn new(stream_url: &str) -> Result<Self> {
        let url = Url::parse(stream_url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "Stream URL must be ws(s), got {}",
                stream_url
            )));
        }
        Ok(Self { url })
    }

    pub fn handshake_url(&self, token: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("token", token);
        url
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn open(&self, token: &str) -> Result<FramePipe> {
        debug!("Opening stream to {}", self.url);
        let (socket, _) = connect_async(self.handshake_url(token).as_str()).await?;
        let (mut write, mut read) = socket.split();

        let (in_tx, incoming) = mpsc::channel::<Result<String>>(FRAME_BUFFER);
        let (outgoing, mut out_rx) = mpsc::channel::<String>(FRAME_BUFFER);

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(Ok(text)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = in_tx.send(Err(Error::WebSocket(e))).await;
                        break;
                    }
                }
            }
            debug!("Stream reader finished");
        });

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!("Failed to send stream frame: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
            debug!("Stream writer closed");
        });

        Ok(FramePipe { incoming, outgoing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_in_handshake_url() {
        let transport = WsTransport::new("ws://localhost:3001").unwrap();
        let url = transport.handshake_url("abc.def");
        assert_eq!(url.as_str(), "ws://localhost:3001/?token=abc.def");
    }

    #[test]
    fn test_rejects_http_scheme() {
        assert!(WsTransport::new("http://localhost:3001").is_err());
    }

    #[tokio::test]
    async fn test_in_memory_pipe() {
        let (mut pipe, server_tx, mut server_rx) = FramePipe::in_memory(4);
        server_tx.send(Ok("hello".to_string())).await.unwrap();
        assert_eq!(pipe.incoming.recv().await.unwrap().unwrap(), "hello");

        pipe.outgoing.send("ping".to_string()).await.unwrap();
        assert_eq!(server_rx.recv().await.unwrap(), "ping");
    }
}
