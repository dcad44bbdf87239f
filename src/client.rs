//! Connect and listen helpers.
//!
//! The shortest path from an address to a working [`Session`]: dial with
//! [`connect`], serve with [`listen`]. Both sides speak the same envelope
//! protocol, so which end dialed stops mattering once the session exists.

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;

use crate::engine::{ConnectOptions, WsEngine, WsServerEngine};
use crate::error::Result;
use crate::session::{Session, SessionServer};

// ============================================================================
// Helpers
// ============================================================================

/// Connects to a WebSocket address and wraps the connection in a session.
///
/// Resolves only once the handshake has completed and the transport is
/// usable for sending; a transport that fails before opening surfaces the
/// error instead of hanging.
///
/// # Errors
///
/// - [`Error::InvalidAddress`](crate::Error::InvalidAddress) if the address
///   does not parse or is not `ws://` / `wss://`
/// - [`Error::ConnectTimeout`](crate::Error::ConnectTimeout) if the
///   handshake does not complete within the default timeout (30s)
/// - [`Error::WebSocket`](crate::Error::WebSocket) if the peer refuses or
///   the handshake fails
///
/// # Example
///
/// ```ignore
/// use serde_json::json;
///
/// let session = waitsock::connect("ws://127.0.0.1:9000").await?;
/// let reply = session.send(json!({ "op": "status" })).await?;
/// ```
pub async fn connect(url: &str) -> Result<Session> {
    Session::new(WsEngine::connect(url).await?)
}

/// Connects with explicit options (sub-protocols, handshake timeout).
///
/// # Errors
///
/// Same as [`connect`].
pub async fn connect_with(options: ConnectOptions) -> Result<Session> {
    Session::new(WsEngine::connect_with(options).await?)
}

/// Binds a WebSocket listener that yields one session per connection.
///
/// Use port 0 to let the OS assign a random available port.
///
/// # Errors
///
/// Returns [`Error::Io`](crate::Error::Io) if binding fails.
///
/// # Example
///
/// ```ignore
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let server = waitsock::listen(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
/// let session = server.accept().await?;
/// ```
pub async fn listen(ip: IpAddr, port: u16) -> Result<SessionServer<WsServerEngine>> {
    SessionServer::bind(ip, port).await
}

// ============================================================================
// Tests
// ============================================================================
