//! One session per accepted connection.
//!
//! [`SessionServer`] pairs any [`ServerEngine`] with the session facade:
//! each accepted socket engine is wrapped in a fresh [`Session`] and handed
//! over. No two sessions ever share an engine, and the server keeps no
//! per-connection state after handoff.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};

use crate::engine::{ServerEngine, WsServerEngine};
use crate::error::Result;
use crate::session::Session;

// ============================================================================
// SessionServer
// ============================================================================

/// Listener yielding an independent [`Session`] per connection.
///
/// # Example
///
/// ```ignore
/// use std::net::{IpAddr, Ipv4Addr};
/// use waitsock::SessionServer;
///
/// let server = SessionServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
/// loop {
///     let session = server.accept().await?;
///     tokio::spawn(handle(session));
/// }
/// ```
pub struct SessionServer<E: ServerEngine> {
    /// The listener producing socket engines.
    engine: E,
}

impl<E: ServerEngine> SessionServer<E> {
    /// Wraps a server engine.
    #[must_use]
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Waits for the next connection and wraps it in a fresh session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`](crate::Error::Connection) once the
    /// listener has shut down.
    pub async fn accept(&self) -> Result<Session> {
        let socket = self.engine.accept().await?;
        Session::new(socket)
    }

    /// Returns the underlying server engine.
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Stops listening.
    ///
    /// Sessions already accepted keep working.
    ///
    /// # Errors
    ///
    /// Propagates listener close errors.
    pub async fn close(&self) -> Result<()> {
        self.engine.close().await
    }
}

// ============================================================================
// WebSocket Convenience
// ============================================================================

impl SessionServer<WsServerEngine> {
    /// Binds a WebSocket listener and wraps it.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        Ok(Self::new(WsServerEngine::bind(ip, port).await?))
    }

    /// Returns the port the listener is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.engine.port()
    }

    /// Returns the WebSocket URL for this listener.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        self.engine.ws_url()
    }

    /// Returns the local socket address.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.engine.local_addr()
    }
}

// ============================================================================
// Tests
// ============================================================================
