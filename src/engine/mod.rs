//! Socket engines: transport adapters behind the correlation layer.
//!
//! An engine owns one message-oriented connection. It stamps outbound
//! envelopes with a correlation token, writes them as text frames, and
//! decodes inbound frames into [`Envelope`]s on a buffered queue. Everything
//! above the engine (correlation, event routing) lives in
//! [`Session`](crate::Session) and is transport-agnostic.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Session        │                              │  Remote Peer    │
//! │                 │        text frames           │                 │
//! │  WsEngine       │◄────────────────────────────►│  WebSocket      │
//! │  (event loop)   │      one JSON object         │  endpoint       │
//! │                 │        per frame             │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. [`WsEngine::connect`] or [`WsServerEngine::accept`] - Obtain an engine
//! 2. [`Engine::incoming`] - Take the inbound envelope stream (once)
//! 3. [`Engine::send`] - Stamp and transmit outbound envelopes
//! 4. [`Engine::close`] - Close the underlying connection
//!
//! Inbound envelopes buffer from the moment the engine exists, so frames
//! arriving before the stream is taken are never lost.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `ws` | WebSocket engine over tokio-tungstenite |
//! | `server` | WebSocket listener producing engines per connection |
//! | `memory` | In-process channel engine for tests and benchmarks |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::envelope::{Envelope, WaitId};
use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// In-process channel engine.
pub mod memory;

/// WebSocket listener.
pub mod server;

/// WebSocket engine.
pub mod ws;

// ============================================================================
// Engine
// ============================================================================

/// One message-oriented connection, adapted for correlation.
///
/// Implementations stamp outbound envelopes, perform permissive inbound
/// decoding (undecodable frames are logged and dropped, never fatal), and
/// expose a single take-once inbound stream.
///
/// # Thread Safety
///
/// Engines are `Send + Sync`; all operations take `&self` and are safe to
/// call from any task.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Stamps the envelope with a correlation token if it lacks one, then
    /// transmits it as a single text frame.
    ///
    /// Returns the token the envelope went out with, so the caller can
    /// correlate a future reply.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if the
    ///   connection is no longer writable
    /// - [`Error::Connection`](crate::Error::Connection) if the transport
    ///   write fails
    /// - [`Error::Json`](crate::Error::Json) if the payload cannot be
    ///   serialized
    async fn send(&self, envelope: Envelope) -> Result<WaitId>;

    /// Takes the inbound envelope stream.
    ///
    /// Returns `Some` exactly once; later calls return `None`. The stream
    /// yields every successfully decoded inbound envelope in arrival order
    /// and ends when the connection closes.
    fn incoming(&self) -> Option<mpsc::UnboundedReceiver<Envelope>>;

    /// Closes the connection.
    ///
    /// Idempotent. In-flight inbound envelopes already decoded remain
    /// readable from the stream taken via [`incoming`](Engine::incoming).
    async fn close(&self) -> Result<()>;

    /// Returns `true` while the connection can still carry frames.
    fn is_open(&self) -> bool;
}

// ============================================================================
// ServerEngine
// ============================================================================

/// A listener that yields one [`Engine`] per accepted connection.
#[async_trait]
pub trait ServerEngine: Send + Sync + 'static {
    /// Engine type produced for each accepted connection.
    type Socket: Engine;

    /// Waits for the next inbound connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`](crate::Error::Connection) once the
    /// listener has shut down and no further connections can arrive.
    async fn accept(&self) -> Result<Self::Socket>;

    /// Stops listening.
    ///
    /// Engines already accepted are unaffected.
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::{MemoryConnector, MemoryEngine, MemoryServerEngine};
pub use server::WsServerEngine;
pub use ws::{ConnectOptions, WsEngine};
