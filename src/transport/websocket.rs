//! WebSocket client transport.
//!
//! Dials the browser's DevTools endpoint and pumps inbound text frames
//! into the transport event channel. Binary, ping and pong frames are
//! handled by tungstenite or ignored.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, TransportEventSender, TransportEvents};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for establishing the WebSocket connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// ============================================================================
// WebSocketTransport
// ============================================================================

/// WebSocket connection to a DevTools endpoint.
///
/// # Thread Safety
///
/// `WebSocketTransport` is `Send + Sync`; sends are serialized on an
/// internal async mutex, reads happen on a dedicated pump task.
pub struct WebSocketTransport {
    /// Write half of the socket.
    sink: Mutex<WsSink>,

    /// Set once the socket closed or reading was stopped.
    closed: AtomicBool,

    /// Read pump kill switch.
    stop_reading: AtomicBool,
}

impl WebSocketTransport {
    /// Connects to a `ws://` or `wss://` DevTools endpoint.
    ///
    /// Returns the transport handle plus the event receiver to hand to
    /// the connection.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] for an invalid URL or handshake failure
    /// - [`Error::ConnectionTimeout`] if the handshake exceeds 30s
    pub async fn connect(endpoint: &str) -> Result<(Arc<Self>, TransportEvents)> {
        let url = Url::parse(endpoint)
            .map_err(|e| Error::connection(format!("invalid endpoint {endpoint}: {e}")))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::connection(format!(
                "unsupported scheme {}: expected ws or wss",
                url.scheme()
            )));
        }

        let (ws_stream, _) = timeout(CONNECT_TIMEOUT, connect_async(endpoint))
            .await
            .map_err(|_| Error::connection_timeout(CONNECT_TIMEOUT.as_millis() as u64))?
            .map_err(|e| Error::connection(format!("WebSocket handshake failed: {e}")))?;

        debug!(%endpoint, "WebSocket transport connected");

        let (sink, source) = ws_stream.split();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let transport = Arc::new(Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
            stop_reading: AtomicBool::new(false),
        });

        let pump = Arc::clone(&transport);
        tokio::spawn(async move {
            pump.read_pump(source, event_tx).await;
        });

        Ok((transport, event_rx))
    }

    /// Read pump forwarding inbound frames to the event channel.
    async fn read_pump(&self, mut source: WsSource, events: TransportEventSender) {
        let reason = loop {
            if self.stop_reading.load(Ordering::SeqCst) {
                break "Transport stopped reading".to_string();
            }

            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    if events
                        .send(TransportEvent::Message(text.to_string()))
                        .is_err()
                    {
                        break "Transport consumer dropped".to_string();
                    }
                }

                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "WebSocket closed by remote");
                    break match frame {
                        Some(frame) if !frame.reason.is_empty() => frame.reason.to_string(),
                        _ => "WebSocket closed by remote".to_string(),
                    };
                }

                Some(Err(e)) => {
                    error!(error = %e, "WebSocket read error");
                    break format!("WebSocket error: {e}");
                }

                None => {
                    debug!("WebSocket stream ended");
                    break "WebSocket stream ended".to_string();
                }

                // Ignore Binary, Ping, Pong, Frame
                _ => {}
            }
        };

        self.closed.store(true, Ordering::SeqCst);
        let _ = events.send(TransportEvent::Closed(reason));
    }

    /// Sends a close frame and marks the transport closed.
    pub async fn shutdown(&self) {
        self.stop_reading();
        self.closed.store(true, Ordering::SeqCst);

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            warn!(error = %e, "WebSocket close failed");
        }
    }
}

// ============================================================================
// Transport Implementation
// ============================================================================

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_text(&self, text: String) -> Result<()> {
        if self.is_closed() {
            return Err(Error::message("transport is closed"));
        }

        trace!(len = text.len(), "Transport write");

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::message(e.to_string()))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn stop_reading(&self) {
        self.stop_reading.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Tests
// ============================================================================
