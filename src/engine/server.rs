//! WebSocket listener producing one engine per connection.
//!
//! This module provides the server-side counterpart of
//! [`WsEngine`](crate::engine::WsEngine): a bound listener that upgrades
//! every inbound TCP connection to WebSocket and queues a ready engine for
//! each.
//!
//! # Connection Flow
//!
//! 1. [`WsServerEngine::bind`] - Bind a TCP listener (port 0 for random)
//! 2. Accept loop upgrades inbound connections in the background
//! 3. [`ServerEngine::accept`] - Pop the next ready engine
//! 4. Wrap the engine in a [`Session`](crate::Session) and exchange envelopes

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::ServerEngine;
use crate::engine::ws::WsEngine;
use crate::error::{Error, Result};

// ============================================================================
// WsServerEngine
// ============================================================================

/// A bound WebSocket listener.
///
/// Accepts connections continuously on a background task; each completed
/// upgrade becomes a [`WsEngine`] waiting in the accept queue. Connections
/// arriving before anyone calls [`accept`](ServerEngine::accept) are not
/// dropped.
///
/// The listener stops when [`close`](ServerEngine::close) is called or the
/// engine is dropped. Engines already accepted keep working.
///
/// # Example
///
/// ```ignore
/// use std::net::{IpAddr, Ipv4Addr};
/// use waitsock::engine::{ServerEngine, WsServerEngine};
///
/// let server = WsServerEngine::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
/// let url = server.ws_url();
///
/// // Hand the URL to a client...
///
/// let engine = server.accept().await?;
/// ```
pub struct WsServerEngine {
    /// Address the listener is bound to.
    local_addr: SocketAddr,
    /// Queue of engines for completed upgrades.
    accepted_rx: Mutex<mpsc::UnboundedReceiver<WsEngine>>,
    /// Accept loop task, aborted on close and drop.
    accept_task: JoinHandle<()>,
}

impl WsServerEngine {
    /// Binds a WebSocket listener to the specified address and port.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        debug!(port = local_addr.port(), "WebSocket listener bound");

        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(Self::run_accept_loop(listener, accepted_tx));

        Ok(Self {
            local_addr,
            accepted_rx: Mutex::new(accepted_rx),
            accept_task,
        })
    }

    /// Returns the port the listener is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the WebSocket URL for this listener.
    ///
    /// Format: `ws://{ip}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Returns the local socket address.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop that upgrades inbound connections.
    async fn run_accept_loop(listener: TcpListener, accepted_tx: mpsc::UnboundedSender<WsEngine>) {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                    break;
                }
            };

            debug!(?addr, "TCP connection accepted");

            // Upgrade handshakes run concurrently with further accepts
            let accepted_tx = accepted_tx.clone();
            tokio::spawn(async move {
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws_stream) => {
                        info!(?addr, "WebSocket connection established");
                        let _ = accepted_tx.send(WsEngine::from_stream(ws_stream));
                    }
                    Err(e) => {
                        warn!(?addr, error = %e, "WebSocket upgrade failed");
                    }
                }
            });
        }
    }
}

// ============================================================================
// ServerEngine Implementation
// ============================================================================

#[async_trait]
impl ServerEngine for WsServerEngine {
    type Socket = WsEngine;

    async fn accept(&self) -> Result<WsEngine> {
        let mut accepted_rx = self.accepted_rx.lock().await;
        accepted_rx
            .recv()
            .await
            .ok_or_else(|| Error::connection("listener closed"))
    }

    async fn close(&self) -> Result<()> {
        self.accept_task.abort();
        Ok(())
    }
}

impl Drop for WsServerEngine {
    fn drop(&mut self) {
        // Frees the port even when close() was never called
        self.accept_task.abort();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;

    use serde_json::json;

    use crate::engine::Engine;
    use crate::envelope::Envelope;

    fn envelope(value: serde_json::Value) -> Envelope {
        Envelope::from_value(value).expect("object payload")
    }

    #[tokio::test]
    async fn test_server_bind_random_port() {
        let server = WsServerEngine::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");

        assert!(server.port() > 0);
        assert!(server.ws_url().starts_with("ws://127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_server_ws_url_format() {
        let server = WsServerEngine::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");

        let url = server.ws_url();
        let expected = format!("ws://127.0.0.1:{}", server.port());
        assert_eq!(url, expected);
    }

    #[tokio::test]
    async fn test_server_local_addr() {
        let server = WsServerEngine::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");

        let addr = server.local_addr();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(addr.port(), server.port());
    }

    #[tokio::test]
    async fn test_accepted_engine_receives_frames() {
        let server = WsServerEngine::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");

        let client = WsEngine::connect(&server.ws_url())
            .await
            .expect("connect should succeed");
        let accepted = server.accept().await.expect("accept should succeed");
        let mut inbound = accepted.incoming().expect("stream available");

        let sent_id = client
            .send(envelope(json!({ "hello": 1 })))
            .await
            .expect("send should succeed");

        let received = inbound.recv().await.expect("envelope delivered");
        assert_eq!(received.wait_id(), Some(&sent_id));
        assert_eq!(received.get_u64("hello"), 1);
    }

    #[tokio::test]
    async fn test_accept_multiple_connections() {
        let server = WsServerEngine::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");
        let url = server.ws_url();

        let first = WsEngine::connect(&url).await.expect("first connect");
        let second = WsEngine::connect(&url).await.expect("second connect");

        let engine_a = server.accept().await.expect("first accept");
        let engine_b = server.accept().await.expect("second accept");

        assert!(engine_a.is_open());
        assert!(engine_b.is_open());
        assert!(first.is_open());
        assert!(second.is_open());
    }

    #[tokio::test]
    async fn test_close_stops_accepting() {
        let server = WsServerEngine::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");

        server.close().await.expect("close should succeed");

        let err = server.accept().await.expect_err("accept should fail");
        assert!(err.is_connection_error());
    }
}
