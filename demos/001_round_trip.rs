//! Correlated request/reply round trip in one process.
//!
//! Demonstrates:
//! - Binding a listener and accepting sessions
//! - Correlated send resolving with the matching reply
//! - Replying on the incoming token with send_no_reply
//! - Named events flowing on the same wire as replies
//!
//! Usage:
//!   cargo run --example 001_round_trip
//!   cargo run --example 001_round_trip -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};

use common::Args;
use serde_json::json;
use waitsock::Result;

// ============================================================================
// Constants
// ============================================================================

const REQUEST_COUNT: u64 = 3;

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

async fn run(_args: Args) -> Result<()> {
    println!("=== 001: Round Trip ===\n");

    // ========================================================================
    // Serve
    // ========================================================================

    println!("[1] Binding listener...");
    let server = waitsock::listen(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
    let url = server.ws_url();
    println!("    ✓ Listening on {url}\n");

    tokio::spawn(async move {
        while let Ok(session) = server.accept().await {
            let mut messages = session.messages().expect("fresh session");
            let emitter = session.clone();
            tokio::spawn(async move {
                while let Some(request) = messages.recv().await {
                    let n = request.get_u64("n");
                    let _ = request
                        .send_no_reply(json!({ "n": n, "squared": n * n }))
                        .await;
                    let _ = emitter.send_emit("progress", json!({ "served": n })).await;
                }
            });
        }
    });

    // ========================================================================
    // Dial
    // ========================================================================

    println!("[2] Connecting...");
    let session = waitsock::connect(&url).await?;
    println!("    ✓ Connected\n");

    let mut progress = session.subscribe("progress");

    // ========================================================================
    // Request/Reply
    // ========================================================================

    println!("[3] Sending correlated requests...");
    for n in 1..=REQUEST_COUNT {
        let reply = session.send(json!({ "n": n })).await?;
        println!("    ✓ {n}^2 = {}", reply.get_u64("squared"));
    }

    // ========================================================================
    // Events
    // ========================================================================

    println!("\n[4] Draining progress events...");
    for _ in 0..REQUEST_COUNT {
        if let Some(event) = progress.recv().await {
            println!("    ✓ served n={}", event.get_u64("served"));
        }
    }

    session.close().await?;
    println!("\nDone.");

    Ok(())
}
