//! WebSocket engine and event loop.
//!
//! This module adapts one WebSocket connection into an [`Engine`]: outbound
//! envelopes are stamped and written as text frames, inbound frames are
//! decoded permissively and queued for the correlation layer.
//!
//! # Event Loop
//!
//! Each engine spawns a tokio task that handles:
//!
//! - Inbound frames from the peer (decode, forward or discard)
//! - Outbound frames from the API (write, acknowledge per frame)
//! - Close requests and remote close frames

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::engine::Engine;
use crate::envelope::{Envelope, WaitId};
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for establishing an outbound connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ConnectOptions
// ============================================================================

/// Options for establishing an outbound WebSocket connection.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use waitsock::engine::{ConnectOptions, WsEngine};
///
/// let options = ConnectOptions::new("ws://127.0.0.1:9000")
///     .with_timeout(Duration::from_secs(5));
/// let engine = WsEngine::connect_with(options).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Address to connect to (`ws://` or `wss://`).
    url: String,
    /// Sub-protocols offered in the handshake, in preference order.
    protocols: Vec<String>,
    /// Maximum time to wait for the handshake to complete.
    timeout: Duration,
}

impl ConnectOptions {
    /// Creates options for the given address with the default timeout (30s).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocols: Vec::new(),
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Offers a sub-protocol in the handshake (`Sec-WebSocket-Protocol`).
    ///
    /// Can be called multiple times; protocols are offered in call order.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the address to connect to.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the sub-protocols offered in the handshake.
    #[inline]
    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Returns the connect timeout.
    #[inline]
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

// ============================================================================
// EngineCommand
// ============================================================================

/// Internal commands for the event loop.
enum EngineCommand {
    /// Write one text frame and acknowledge the result.
    Send {
        frame: String,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Close the connection.
    Close { ack: oneshot::Sender<()> },
}

// ============================================================================
// WsEngine
// ============================================================================

/// WebSocket transport adapter.
///
/// Wraps one WebSocket connection from either side of the wire: dial out with
/// [`WsEngine::connect`], or receive accepted engines from
/// [`WsServerEngine`](crate::engine::WsServerEngine). The engine spawns an
/// internal event loop task that owns the stream.
///
/// # Thread Safety
///
/// `WsEngine` is `Send + Sync`; all operations take `&self` and are
/// non-blocking.
#[derive(Debug)]
pub struct WsEngine {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    /// Inbound envelope stream, handed out once.
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    /// Cleared when the event loop terminates.
    open: Arc<AtomicBool>,
}

impl WsEngine {
    /// Creates an engine from an established WebSocket stream.
    ///
    /// Spawns the event loop task internally. Inbound frames begin buffering
    /// immediately, before [`Engine::incoming`] is taken.
    pub fn from_stream<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            incoming_tx,
            Arc::clone(&open),
        ));

        Self {
            command_tx,
            incoming_rx: Mutex::new(Some(incoming_rx)),
            open,
        }
    }

    /// Connects to a WebSocket address with the default timeout (30s).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] if the address does not parse or is not
    ///   `ws://` / `wss://`
    /// - [`Error::ConnectTimeout`] if the handshake does not complete in time
    /// - [`Error::WebSocket`] if the peer refuses or the handshake fails
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(ConnectOptions::new(url)).await
    }

    /// Connects to a WebSocket address with explicit options.
    ///
    /// # Errors
    ///
    /// Same as [`WsEngine::connect`].
    pub async fn connect_with(options: ConnectOptions) -> Result<Self> {
        let url = Url::parse(options.url())
            .map_err(|e| Error::invalid_address(format!("{}: {e}", options.url())))?;

        match url.scheme() {
            "ws" | "wss" => {}
            scheme => {
                return Err(Error::invalid_address(format!(
                    "unsupported scheme {scheme:?} in {}",
                    options.url()
                )));
            }
        }

        let mut request = options.url().into_client_request()?;
        if !options.protocols().is_empty() {
            let offered = options.protocols().join(", ");
            let value = HeaderValue::from_str(&offered)
                .map_err(|_| Error::invalid_address(format!("invalid sub-protocols: {offered}")))?;
            request
                .headers_mut()
                .insert("sec-websocket-protocol", value);
        }

        let (ws_stream, _response) = timeout(options.timeout(), connect_async(request))
            .await
            .map_err(|_| Error::connect_timeout(options.timeout().as_millis() as u64))??;

        debug!(url = %url, "WebSocket connection established");

        Ok(Self::from_stream(ws_stream))
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<EngineCommand>,
        incoming_tx: mpsc::UnboundedSender<Envelope>,
        open: Arc<AtomicBool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Inbound frames from the peer
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_frame(&text, &incoming_tx);
                        }

                        Some(Ok(Message::Binary(bytes))) => {
                            match std::str::from_utf8(&bytes) {
                                Ok(text) => Self::handle_incoming_frame(text, &incoming_tx),
                                Err(_) => warn!(len = bytes.len(), "Discarding non-UTF-8 binary frame"),
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Ping, Pong, raw frames
                        _ => {}
                    }
                }

                // Commands from the API
                command = command_rx.recv() => {
                    match command {
                        Some(EngineCommand::Send { frame, ack }) => {
                            let result = ws_write
                                .send(Message::Text(frame.into()))
                                .await
                                .map_err(|e| Error::connection(e.to_string()));

                            if result.is_ok() {
                                trace!("Frame sent");
                            }

                            let _ = ack.send(result);
                        }

                        Some(EngineCommand::Close { ack }) => {
                            debug!("Close command received");
                            let _ = ws_write.close().await;
                            open.store(false, Ordering::Release);
                            let _ = ack.send(());
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        open.store(false, Ordering::Release);

        debug!("Engine loop terminated");
    }

    /// Decodes one inbound frame and forwards it, or discards it.
    fn handle_incoming_frame(text: &str, incoming_tx: &mpsc::UnboundedSender<Envelope>) {
        match Envelope::decode(text) {
            Some(envelope) => {
                trace!(wait_id = ?envelope.wait_id(), "Frame decoded");
                let _ = incoming_tx.send(envelope);
            }
            None => {
                warn!(frame = %text, "Discarding undecodable frame");
            }
        }
    }
}

// ============================================================================
// Engine Implementation
// ============================================================================

#[async_trait::async_trait]
impl Engine for WsEngine {
    async fn send(&self, mut envelope: Envelope) -> Result<WaitId> {
        let wait_id = envelope.ensure_wait_id().clone();
        let frame = envelope.encode()?;

        let (ack_tx, ack_rx) = oneshot::channel();
        self.command_tx
            .send(EngineCommand::Send {
                frame,
                ack: ack_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match ack_rx.await {
            Ok(result) => result.map(|()| wait_id),
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    fn incoming(&self) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        self.incoming_rx.lock().take()
    }

    async fn close(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();

        if self
            .command_tx
            .send(EngineCommand::Close { ack: ack_tx })
            .is_ok()
        {
            let _ = ack_rx.await;
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

// ============================================================================
// Tests
// ============================================================================
