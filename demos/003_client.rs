//! Client for the echo server.
//!
//! Demonstrates:
//! - Dialing with explicit connect options
//! - Sequential correlated round trips on one session
//! - A reply chain riding a single correlation token
//!
//! Usage (against a running 002_echo_server):
//!   cargo run --example 003_client
//!   cargo run --example 003_client -- --port 9200

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use common::Args;
use serde_json::json;
use waitsock::{ConnectOptions, Result};

// ============================================================================
// Constants
// ============================================================================

const ROUND_TRIPS: u64 = 10;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== 003: Client ===\n");

    let url = format!("ws://127.0.0.1:{}", args.port);

    // ========================================================================
    // Dial
    // ========================================================================

    println!("[1] Connecting to {url}...");
    let options = ConnectOptions::new(&url).with_timeout(Duration::from_secs(5));
    let session = waitsock::connect_with(options).await?;
    println!("    ✓ Connected\n");

    // ========================================================================
    // Round Trips
    // ========================================================================

    println!("[2] {ROUND_TRIPS} sequential round trips...");
    for n in 0..ROUND_TRIPS {
        let reply = session.send(json!({ "n": n })).await?;
        assert_eq!(reply.get_u64("n"), n);
    }
    println!("    ✓ All replies correlated\n");

    // ========================================================================
    // Reply Chain
    // ========================================================================

    // The echo server answers every message on its incoming token, so
    // replying to a reply keeps one token alive across the whole chain.
    println!("[3] Reply chain on one token...");
    let first = session.send(json!({ "step": 1 })).await?;
    let second = first.send(json!({ "step": 2 })).await?;
    assert_eq!(second.wait_id(), first.wait_id());
    println!("    ✓ Step {} arrived on the same token", second.get_u64("step"));

    session.close().await?;
    println!("\nDone.");

    Ok(())
}
