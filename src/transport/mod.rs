//! Transport — a bidirectional, framed text-message connection to a venue (§4.1).
//!
//! Oblivious to protocol semantics: it reports every inbound frame to its
//! owner and never reconnects on its own — that policy belongs to the
//! Session Machine layered on top (§4.2). Generalized from the teacher's
//! `poloniex::websocket::WebSocketManager`, with the reconnect/ping-loop/
//! parsing logic lifted out since those are now `SessionMachine` concerns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Failure modes a Transport can surface (§4.1: "connection loss, send
/// error, parse failure of the outer frame").
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("transport is not open")]
    NotOpen,
}

/// Inbound notifications a Transport reports to its owner. Every frame is
/// reported, parsed or not — the Transport does not interpret payloads.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(String),
    /// Clean close (server-initiated or graceful EOF), distinct from `Error`.
    Closed,
    Error(String),
}

/// Moves encoded text frames between the process and a venue (§4.1).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self) -> Result<(), TransportError>;
    async fn send(&self, frame: String) -> Result<(), TransportError>;
    /// Clean close distinct from an unexpected drop (§4.1).
    async fn close(&self);
    fn is_open(&self) -> bool;
}

/// WebSocket transport backed by `tokio-tungstenite`.
pub struct WebSocketTransport {
    url: String,
    sink: Arc<Mutex<Option<WsSink>>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
    manual_close: Arc<AtomicBool>,
}

impl WebSocketTransport {
    /// Constructs a transport for `url`. Returns the receiver the owner
    /// uses to observe inbound frames and lifecycle events.
    pub fn new(url: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Self {
            url: url.into(),
            sink: Arc::new(Mutex::new(None)),
            events_tx,
            open: Arc::new(AtomicBool::new(false)),
            manual_close: Arc::new(AtomicBool::new(false)),
        };
        (transport, events_rx)
    }

    fn spawn_read_loop(&self, mut stream: SplitStream<WsStream>) {
        let events_tx = self.events_tx.clone();
        let open = Arc::clone(&self.open);
        let manual_close = Arc::clone(&self.manual_close);

        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        if events_tx.send(TransportEvent::Message(text.to_string())).is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!("transport closed by peer");
                        open.store(false, Ordering::SeqCst);
                        let _ = events_tx.send(TransportEvent::Closed);
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary/Ping/Pong frames: the Session Machine's own
                        // ping/pong handling operates at the text-frame
                        // protocol layer (§4.2), not here.
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "transport read error");
                        open.store(false, Ordering::SeqCst);
                        let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        open.store(false, Ordering::SeqCst);
                        if manual_close.load(Ordering::SeqCst) {
                            let _ = events_tx.send(TransportEvent::Closed);
                        } else {
                            let _ = events_tx.send(TransportEvent::Error(
                                "stream ended unexpectedly".to_string(),
                            ));
                        }
                        break;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<(), TransportError> {
        debug!(url = %self.url, "opening transport");
        self.manual_close.store(false, Ordering::SeqCst);

        let (ws_stream, _response) = connect_async(&self.url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (sink, stream) = ws_stream.split();
        *self.sink.lock().await = Some(sink);
        self.open.store(true, Ordering::SeqCst);

        self.spawn_read_loop(stream);
        info!(url = %self.url, "transport open");
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotOpen)?;
        sink.send(WsMessage::Text(frame.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self) {
        self.manual_close.store(true, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            if let Err(e) = sink.close().await {
                warn!(error = %e, "error closing transport sink");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
