//! Waitsock - Request/reply correlation over WebSocket.
//!
//! This library turns message-oriented connections into request/reply
//! conversations: every outbound payload is stamped with a `waitId` token,
//! and the reply carrying that token resolves the matching wait. Named
//! events and plain messages ride the same wire.
//!
//! # Architecture
//!
//! Both peers are symmetric once connected: each holds a [`Session`] over
//! its end of the wire, and either side can send, reply, emit, or subscribe.
//!
//! - Each [`Session`] owns: engine + dispatch task + pending-wait table
//! - `waitId` tokens are opaque strings, scoped to one connection
//! - Inbound envelopes route to exactly one lane: reply, event, or message
//! - Transports plug in via [`Engine`]; WebSocket and in-memory ship
//!
//! # Quick Start
//!
//! ```no_run
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! use serde_json::json;
//! use waitsock::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Serve: one independent session per connection
//!     let server = waitsock::listen(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
//!     let url = server.ws_url();
//!
//!     tokio::spawn(async move {
//!         while let Ok(session) = server.accept().await {
//!             let mut messages = session.messages().expect("fresh session");
//!             tokio::spawn(async move {
//!                 while let Some(request) = messages.recv().await {
//!                     let _ = request.send_no_reply(json!({ "ok": true })).await;
//!                 }
//!             });
//!         }
//!     });
//!
//!     // Dial and await a correlated reply
//!     let session = waitsock::connect(&url).await?;
//!     let reply = session.send(json!({ "op": "status" })).await?;
//!     println!("ok: {}", reply.get_bool("ok"));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Connect and listen helpers |
//! | [`engine`] | Transport adapters: WebSocket, in-memory, the [`Engine`] trait |
//! | [`envelope`] | Wire format: [`Envelope`] and [`WaitId`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`session`] | Correlation facade: [`Session`], [`IncomingMessage`] |
//!
//! # Behavior
//!
//! - **Symmetric**: the dialing side and the accepting side expose the same API
//! - **Permissive decode**: a corrupt frame is discarded, never fatal
//! - **Race-free startup**: inbound queues buffer from engine creation, so
//!   nothing is lost between accept and session construction
//! - **Bounded waits**: every reply wait carries a timeout (default 30s)

// ============================================================================
// Modules
// ============================================================================

/// Connect and listen helpers.
///
/// The shortest path to a working [`Session`] on either side of the wire.
pub mod client;

/// Transport adapters.
///
/// The [`Engine`] and [`ServerEngine`] traits plus the WebSocket and
/// in-memory implementations.
pub mod engine;

/// Wire format.
///
/// [`Envelope`] pairs a JSON payload with its correlation token.
pub mod envelope;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Correlation facade.
///
/// [`Session`] drives one connection; [`IncomingMessage`] wraps each
/// delivered envelope with its reply paths.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

// Connect helpers
pub use client::{connect, connect_with, listen};

// Engine types
pub use engine::{
    ConnectOptions, Engine, MemoryConnector, MemoryEngine, MemoryServerEngine, ServerEngine,
    WsEngine, WsServerEngine,
};

// Wire types
pub use envelope::{Envelope, WAIT_ID_KEY, WaitId};

// Error types
pub use error::{Error, Result};

// Session types
pub use session::{DEFAULT_REPLY_TIMEOUT, EVENT_KEY, IncomingMessage, Session, SessionServer};
