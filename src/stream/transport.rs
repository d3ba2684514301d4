// =============================================================================
// Transport seam — WebSocket handshake and frame pump
// =============================================================================
//
// The connection manager never touches a socket directly. A `Connector` opens
// a `TransportLink`: an outbound channel the manager writes frames into and an
// inbound channel of transport events (text frames, errors, closure). The
// production connector pumps a tokio-tungstenite socket between the two.
// =============================================================================

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::stream::protocol::{ABNORMAL_CLOSURE, NO_STATUS_RECEIVED};

/// Handshake failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),
}

/// Frames written by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Events surfaced by an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Error(String),
    /// Terminal; no further events follow.
    Closed { code: Option<u16>, reason: String },
}

/// An open transport.
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports to a fully-formed (already authenticated) URL.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<TransportLink, TransportError>>;
}

// =============================================================================
// WsConnector
// =============================================================================

/// tokio-tungstenite backed connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<TransportLink, TransportError>> {
        async move {
            let (ws_stream, _response) = connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Handshake(e.to_string()))?;

            info!(host = url.host_str().unwrap_or(""), path = url.path(), "quote WebSocket handshake complete");

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            tokio::spawn(pump(ws_stream, out_rx, in_tx));

            Ok(TransportLink {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
        .boxed()
    }
}

/// Move frames between the socket and the link channels until either side
/// closes.
async fn pump<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        error!(error = %e, "quote WebSocket send failed");
                        let _ = inbound.send(TransportEvent::Error(e.to_string()));
                        let _ = inbound.send(TransportEvent::Closed {
                            code: Some(ABNORMAL_CLOSURE),
                            reason: "send failed".into(),
                        });
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    debug!(code, reason = %reason, "closing quote WebSocket");
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    let _ = write.close().await;
                    let _ = inbound.send(TransportEvent::Closed { code: Some(code), reason });
                    break;
                }
                None => {
                    // Link dropped by its owner.
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(TransportEvent::Text(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if inbound.send(TransportEvent::Text(text)).is_err() {
                            break;
                        }
                    }
                    Err(_) => debug!("non-UTF-8 binary frame ignored"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (u16::from(f.code), f.reason.into_owned()),
                        None => (NO_STATUS_RECEIVED, String::new()),
                    };
                    info!(code, reason = %reason, "quote WebSocket closed by peer");
                    let _ = inbound.send(TransportEvent::Closed { code: Some(code), reason });
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/Pong control frames are answered by tungstenite.
                }
                Some(Err(e)) => {
                    warn!(error = %e, "quote WebSocket read error");
                    let _ = inbound.send(TransportEvent::Error(e.to_string()));
                    let _ = inbound.send(TransportEvent::Closed {
                        code: Some(ABNORMAL_CLOSURE),
                        reason: e.to_string(),
                    });
                    break;
                }
                None => {
                    warn!("quote WebSocket stream ended");
                    let _ = inbound.send(TransportEvent::Closed {
                        code: Some(ABNORMAL_CLOSURE),
                        reason: "stream ended".into(),
                    });
                    break;
                }
            },
        }
    }
}
